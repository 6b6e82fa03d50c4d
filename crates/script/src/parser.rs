//! Parser for rule scripts.
//!
//! Precedence climbing over a pre-lexed token vector. Arrow functions are
//! recognized by scanning ahead to the matching `)` and checking for `=>`.

use std::rc::Rc;

use crate::ast::{
    AssignOp, BinaryOp, DeclKind, Element, Expr, ForInit, FunctionBody, FunctionDef, Literal, LogicalOp, Param,
    Pattern, PropKey, Property, Stmt, TemplatePart, UnaryOp,
};
use crate::error::{Result, ScriptError};
use crate::lexer::Lexer;
use crate::span::Span;
use crate::stack::{StackGuard, STACK_BUDGET};
use crate::token::{is_reserved, TemplatePiece, Token, TokenKind};

/// Nesting limit; deeper input is rejected instead of overflowing the stack.
const MAX_NESTING: usize = 64;
/// Longest run of left-associated operators (`a + b + ...`, `a.b.c...`) in one expression.
const MAX_CHAIN: usize = 256;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    stack: StackGuard,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self> {
        Ok(Self::from_tokens(Lexer::tokenize(source)?))
    }

    fn from_tokens(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0, depth: 0, stack: StackGuard::arm(STACK_BUDGET) }
    }

    /// Parse a statement list up to end of input.
    pub fn parse_program(&mut self) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.at_eof() {
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    /// Parse exactly one expression (an optional trailing `;` is allowed).
    pub fn parse_standalone_expression(&mut self) -> Result<Expr> {
        let expr = self.parse_expression()?;
        while self.check(&TokenKind::Semicolon) {
            self.advance();
        }
        if !self.at_eof() {
            return Err(self.unexpected());
        }
        Ok(expr)
    }

    // ---------------- token helpers ----------------

    fn current(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self, n: usize) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + n).min(last)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn check_ident(&self, name: &str) -> bool {
        self.current().is_ident(name)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(ScriptError::syntax(format!("expected {what}, found {}", describe(&self.current().kind)), self.current().span))
        }
    }

    fn unexpected(&self) -> ScriptError {
        ScriptError::syntax(format!("unexpected {}", describe(&self.current().kind)), self.current().span)
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING || self.stack.exhausted() {
            return Err(ScriptError::syntax("script nested too deeply", self.current().span));
        }
        Ok(())
    }

    fn extend_chain(&self, len: &mut usize) -> Result<()> {
        *len += 1;
        if *len > MAX_CHAIN {
            return Err(ScriptError::syntax("expression chain too long", self.current().span));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Binding name: any identifier that is not a reserved word.
    fn binding_name(&mut self) -> Result<Rc<str>> {
        match &self.current().kind {
            TokenKind::Ident(name) if !is_reserved(name) => {
                let name: Rc<str> = Rc::from(name.as_str());
                self.advance();
                Ok(name)
            }
            _ => Err(ScriptError::syntax(format!("expected identifier, found {}", describe(&self.current().kind)), self.current().span)),
        }
    }

    /// Property name after `.` or in an object literal: reserved words are fine.
    fn property_name(&mut self) -> Result<Rc<str>> {
        match &self.current().kind {
            TokenKind::Ident(name) => {
                let name: Rc<str> = Rc::from(name.as_str());
                self.advance();
                Ok(name)
            }
            _ => Err(ScriptError::syntax(format!("expected property name, found {}", describe(&self.current().kind)), self.current().span)),
        }
    }

    fn consume_semicolon(&mut self) -> Result<()> {
        if self.eat(&TokenKind::Semicolon) {
            return Ok(());
        }
        let tok = self.current();
        if tok.kind == TokenKind::RBrace || tok.kind == TokenKind::Eof || tok.newline_before {
            return Ok(());
        }
        Err(self.unexpected())
    }

    // ---------------- statements ----------------

    fn parse_statement(&mut self) -> Result<Stmt> {
        self.enter()?;
        let stmt = self.parse_statement_inner();
        self.leave();
        stmt
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt> {
        let tok = self.current().clone();
        match &tok.kind {
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Ident(word) => match word.as_str() {
                "let" | "const" | "var" => {
                    let kind = self.parse_decl_kind();
                    let decls = self.parse_declarators()?;
                    self.consume_semicolon()?;
                    Ok(Stmt::Decl { kind, decls, span: tok.span })
                }
                "function" if matches!(self.peek(1).kind, TokenKind::Ident(_)) => {
                    self.advance();
                    let name = self.binding_name()?;
                    let def = self.parse_function_rest(Some(name), tok.span)?;
                    Ok(Stmt::Function(def))
                }
                "if" => self.parse_if(),
                "for" => self.parse_for(),
                "while" => {
                    self.advance();
                    self.expect(&TokenKind::LParen, "'('")?;
                    let test = self.parse_expression()?;
                    self.expect(&TokenKind::RParen, "')'")?;
                    let body = Box::new(self.parse_statement()?);
                    Ok(Stmt::While { test, body })
                }
                "do" => {
                    self.advance();
                    let body = Box::new(self.parse_statement()?);
                    if !self.check_ident("while") {
                        return Err(self.unexpected());
                    }
                    self.advance();
                    self.expect(&TokenKind::LParen, "'('")?;
                    let test = self.parse_expression()?;
                    self.expect(&TokenKind::RParen, "')'")?;
                    self.consume_semicolon()?;
                    Ok(Stmt::DoWhile { body, test })
                }
                "return" => {
                    self.advance();
                    let next = self.current();
                    let value = if next.newline_before
                        || matches!(next.kind, TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof)
                    {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    self.consume_semicolon()?;
                    Ok(Stmt::Return(value, tok.span))
                }
                "break" => {
                    self.advance();
                    self.consume_semicolon()?;
                    Ok(Stmt::Break(tok.span))
                }
                "continue" => {
                    self.advance();
                    self.consume_semicolon()?;
                    Ok(Stmt::Continue(tok.span))
                }
                "throw" => {
                    self.advance();
                    let value = self.parse_expression()?;
                    self.consume_semicolon()?;
                    Ok(Stmt::Throw(value, tok.span))
                }
                "try" => self.parse_try(),
                "class" | "switch" | "with" | "import" | "export" | "yield" | "await" | "async" => {
                    Err(ScriptError::syntax(format!("'{word}' is not supported in rule scripts"), tok.span))
                }
                _ => self.parse_expression_statement(),
            },
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt> {
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.at_eof() {
                return Err(ScriptError::syntax("unexpected end of input, expected '}'", self.current().span));
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn parse_decl_kind(&mut self) -> DeclKind {
        let tok = self.advance();
        match &tok.kind {
            TokenKind::Ident(w) if w == "const" => DeclKind::Const,
            TokenKind::Ident(w) if w == "var" => DeclKind::Var,
            _ => DeclKind::Let,
        }
    }

    fn parse_declarators(&mut self) -> Result<Vec<(Pattern, Option<Expr>)>> {
        let mut decls = Vec::new();
        loop {
            let pattern = self.parse_pattern()?;
            let init = if self.eat(&TokenKind::Eq) { Some(self.parse_assignment()?) } else { None };
            decls.push((pattern, init));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(decls)
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.advance();
        self.expect(&TokenKind::LParen, "'('")?;
        let test = self.parse_expression()?;
        self.expect(&TokenKind::RParen, "')'")?;
        let cons = Box::new(self.parse_statement()?);
        let alt = if self.check_ident("else") {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If { test, cons, alt })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        self.advance();
        self.expect(&TokenKind::LParen, "'('")?;

        let mut init = None;
        if self.check_ident("let") || self.check_ident("const") || self.check_ident("var") {
            let kind = self.parse_decl_kind();
            let pattern = self.parse_pattern()?;
            if let Some(stmt) = self.try_parse_for_each(kind, pattern.clone())? {
                return Ok(stmt);
            }
            let first_init = if self.eat(&TokenKind::Eq) { Some(self.parse_assignment()?) } else { None };
            let mut decls = vec![(pattern, first_init)];
            if self.eat(&TokenKind::Comma) {
                decls.extend(self.parse_declarators()?);
            }
            init = Some(ForInit::Decl(kind, decls));
        } else if let TokenKind::Ident(name) = &self.current().kind {
            if !is_reserved(name) && (self.peek(1).is_ident("of") || self.peek(1).is_ident("in")) {
                let pattern = Pattern::Ident(self.binding_name()?);
                if let Some(stmt) = self.try_parse_for_each(DeclKind::Var, pattern)? {
                    return Ok(stmt);
                }
            }
        }
        if init.is_none() && !self.check(&TokenKind::Semicolon) {
            init = Some(ForInit::Expr(self.parse_expression()?));
        }
        self.expect(&TokenKind::Semicolon, "';'")?;
        let test = if self.check(&TokenKind::Semicolon) { None } else { Some(self.parse_expression()?) };
        self.expect(&TokenKind::Semicolon, "';'")?;
        let update = if self.check(&TokenKind::RParen) { None } else { Some(self.parse_expression()?) };
        self.expect(&TokenKind::RParen, "')'")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For { init, test, update, body })
    }

    fn try_parse_for_each(&mut self, kind: DeclKind, pattern: Pattern) -> Result<Option<Stmt>> {
        let is_of = self.check_ident("of");
        if !is_of && !self.check_ident("in") {
            return Ok(None);
        }
        self.advance();
        let subject = self.parse_assignment()?;
        self.expect(&TokenKind::RParen, "')'")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Some(if is_of {
            Stmt::ForOf { kind, pattern, iter: subject, body }
        } else {
            Stmt::ForIn { kind, pattern, object: subject, body }
        }))
    }

    fn parse_try(&mut self) -> Result<Stmt> {
        self.advance();
        let block = self.parse_block()?;
        let mut param = None;
        let mut handler = None;
        let mut finalizer = None;
        if self.check_ident("catch") {
            self.advance();
            if self.eat(&TokenKind::LParen) {
                param = Some(self.parse_pattern()?);
                self.expect(&TokenKind::RParen, "')'")?;
            }
            handler = Some(self.parse_block()?);
        }
        if self.check_ident("finally") {
            self.advance();
            finalizer = Some(self.parse_block()?);
        }
        if handler.is_none() && finalizer.is_none() {
            return Err(ScriptError::syntax("missing catch or finally after try", self.current().span));
        }
        Ok(Stmt::Try { block, param, handler, finalizer })
    }

    // ---------------- patterns & functions ----------------

    fn parse_pattern(&mut self) -> Result<Pattern> {
        match self.current().kind {
            TokenKind::LBrace => {
                self.advance();
                let mut props = Vec::new();
                let mut rest = None;
                while !self.check(&TokenKind::RBrace) {
                    if self.eat(&TokenKind::Ellipsis) {
                        rest = Some(self.binding_name()?);
                        break;
                    }
                    let key = match &self.current().kind {
                        TokenKind::String(s) => {
                            let s: Rc<str> = Rc::from(s.as_str());
                            self.advance();
                            s
                        }
                        _ => self.property_name()?,
                    };
                    let target = if self.eat(&TokenKind::Colon) {
                        self.parse_pattern()?
                    } else {
                        if is_reserved(&key) {
                            return Err(ScriptError::syntax(format!("unexpected reserved word '{key}'"), self.current().span));
                        }
                        Pattern::Ident(key.clone())
                    };
                    let default = if self.eat(&TokenKind::Eq) { Some(self.parse_assignment()?) } else { None };
                    props.push((key, target, default));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace, "'}'")?;
                Ok(Pattern::Object { props, rest })
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                let mut rest = None;
                while !self.check(&TokenKind::RBracket) {
                    if self.check(&TokenKind::Comma) {
                        self.advance();
                        items.push(None);
                        continue;
                    }
                    if self.eat(&TokenKind::Ellipsis) {
                        rest = Some(self.binding_name()?);
                        break;
                    }
                    let p = self.parse_pattern()?;
                    let default = if self.eat(&TokenKind::Eq) { Some(self.parse_assignment()?) } else { None };
                    items.push(Some((p, default)));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(Pattern::Array { items, rest })
            }
            _ => Ok(Pattern::Ident(self.binding_name()?)),
        }
    }

    fn parse_params(&mut self) -> Result<Vec<Param>> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let rest = self.eat(&TokenKind::Ellipsis);
            let pattern = self.parse_pattern()?;
            let default = if !rest && self.eat(&TokenKind::Eq) { Some(self.parse_assignment()?) } else { None };
            params.push(Param { pattern, default, rest });
            if rest || !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(params)
    }

    /// After `function [name]`: parameters and block body.
    fn parse_function_rest(&mut self, name: Option<Rc<str>>, span: Span) -> Result<Rc<FunctionDef>> {
        let params = self.parse_params()?;
        let body = FunctionBody::Block(self.parse_block()?);
        Ok(Rc::new(FunctionDef { name, params, body, is_arrow: false, span }))
    }

    fn parse_arrow_body(&mut self, params: Vec<Param>, span: Span) -> Result<Expr> {
        self.expect(&TokenKind::Arrow, "'=>'")?;
        let body = if self.check(&TokenKind::LBrace) {
            FunctionBody::Block(self.parse_block()?)
        } else {
            FunctionBody::Expr(self.parse_assignment()?)
        };
        Ok(Expr::Function(Rc::new(FunctionDef { name: None, params, body, is_arrow: true, span })))
    }

    /// Index of the token closing the bracket at `self.pos`, if any.
    fn matching_close(&self) -> Option<usize> {
        let mut depth = 0usize;
        for (i, tok) in self.tokens.iter().enumerate().skip(self.pos) {
            match tok.kind {
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(i);
                    }
                }
                TokenKind::Eof => return None,
                _ => {}
            }
        }
        None
    }

    fn is_arrow_ahead(&self) -> bool {
        match &self.current().kind {
            TokenKind::Ident(name) if !is_reserved(name) => self.peek(1).kind == TokenKind::Arrow,
            TokenKind::LParen => self
                .matching_close()
                .and_then(|i| self.tokens.get(i + 1))
                .is_some_and(|t| t.kind == TokenKind::Arrow && !t.newline_before),
            _ => false,
        }
    }

    // ---------------- expressions ----------------

    /// Comma-separated sequence.
    pub fn parse_expression(&mut self) -> Result<Expr> {
        let first = self.parse_assignment()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let span = first.span();
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            items.push(self.parse_assignment()?);
        }
        Ok(Expr::Sequence(items, span))
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        self.enter()?;
        let out = self.parse_assignment_inner();
        self.leave();
        out
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr> {
        if self.is_arrow_ahead() {
            let span = self.current().span;
            let params = if self.check(&TokenKind::LParen) {
                self.parse_params()?
            } else {
                vec![Param { pattern: Pattern::Ident(self.binding_name()?), default: None, rest: false }]
            };
            return self.parse_arrow_body(params, span);
        }

        let target = self.parse_conditional()?;
        let op = match self.current().kind {
            TokenKind::Eq => AssignOp::Assign,
            TokenKind::PlusEq => AssignOp::Compound(BinaryOp::Add),
            TokenKind::MinusEq => AssignOp::Compound(BinaryOp::Sub),
            TokenKind::StarEq => AssignOp::Compound(BinaryOp::Mul),
            TokenKind::SlashEq => AssignOp::Compound(BinaryOp::Div),
            TokenKind::PercentEq => AssignOp::Compound(BinaryOp::Rem),
            TokenKind::AmpAmpEq => AssignOp::Logical(LogicalOp::And),
            TokenKind::PipePipeEq => AssignOp::Logical(LogicalOp::Or),
            TokenKind::QuestionQuestionEq => AssignOp::Logical(LogicalOp::Nullish),
            _ => return Ok(target),
        };
        if !matches!(target, Expr::Ident(..) | Expr::Member { .. }) {
            return Err(ScriptError::syntax("invalid assignment target", target.span()));
        }
        self.advance();
        let value = self.parse_assignment()?;
        let span = target.span();
        Ok(Expr::Assign { op, target: Box::new(target), value: Box::new(value), span })
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let test = self.parse_nullish()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(test);
        }
        let cons = self.parse_assignment()?;
        self.expect(&TokenKind::Colon, "':'")?;
        let alt = self.parse_assignment()?;
        let span = test.span();
        Ok(Expr::Conditional { test: Box::new(test), cons: Box::new(cons), alt: Box::new(alt), span })
    }

    fn parse_nullish(&mut self) -> Result<Expr> {
        let mut left = self.parse_or()?;
        let mut chain = 0;
        while self.eat(&TokenKind::QuestionQuestion) {
            self.extend_chain(&mut chain)?;
            let right = self.parse_or()?;
            let span = left.span();
            left = Expr::Logical { op: LogicalOp::Nullish, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        let mut chain = 0;
        while self.eat(&TokenKind::PipePipe) {
            self.extend_chain(&mut chain)?;
            let right = self.parse_and()?;
            let span = left.span();
            left = Expr::Logical { op: LogicalOp::Or, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality()?;
        let mut chain = 0;
        while self.eat(&TokenKind::AmpAmp) {
            self.extend_chain(&mut chain)?;
            let right = self.parse_equality()?;
            let span = left.span();
            left = Expr::Logical { op: LogicalOp::And, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn binary_level(&mut self, next: fn(&mut Self) -> Result<Expr>, table: &[(TokenKind, BinaryOp)]) -> Result<Expr> {
        let mut left = next(self)?;
        let mut chain = 0;
        'outer: loop {
            for (kind, op) in table {
                if self.check(kind) {
                    self.advance();
                    self.extend_chain(&mut chain)?;
                    let right = next(self)?;
                    let span = left.span();
                    left = Expr::Binary { op: *op, left: Box::new(left), right: Box::new(right), span };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        self.binary_level(
            Self::parse_relational,
            &[
                (TokenKind::EqEqEq, BinaryOp::StrictEq),
                (TokenKind::BangEqEq, BinaryOp::StrictNotEq),
                (TokenKind::EqEq, BinaryOp::Eq),
                (TokenKind::BangEq, BinaryOp::NotEq),
            ],
        )
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut left = self.binary_level(
            Self::parse_additive,
            &[
                (TokenKind::LtEq, BinaryOp::LtEq),
                (TokenKind::GtEq, BinaryOp::GtEq),
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Gt, BinaryOp::Gt),
            ],
        )?;
        let mut chain = 0;
        while self.check_ident("in") {
            self.advance();
            self.extend_chain(&mut chain)?;
            let right = self.parse_additive()?;
            let span = left.span();
            left = Expr::Binary { op: BinaryOp::In, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        self.binary_level(Self::parse_multiplicative, &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)])
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        self.binary_level(
            Self::parse_unary,
            &[(TokenKind::Star, BinaryOp::Mul), (TokenKind::Slash, BinaryOp::Div), (TokenKind::Percent, BinaryOp::Rem)],
        )
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.enter()?;
        let out = self.parse_unary_inner();
        self.leave();
        out
    }

    fn parse_unary_inner(&mut self) -> Result<Expr> {
        let tok = self.current().clone();
        let op = match &tok.kind {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Ident(w) if w == "typeof" => Some(UnaryOp::Typeof),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary { op, expr: Box::new(expr), span: tok.span });
        }
        if matches!(tok.kind, TokenKind::PlusPlus | TokenKind::MinusMinus) {
            self.advance();
            let target = self.parse_unary()?;
            if !matches!(target, Expr::Ident(..) | Expr::Member { .. }) {
                return Err(ScriptError::syntax("invalid update target", tok.span));
            }
            return Ok(Expr::Update { increment: tok.kind == TokenKind::PlusPlus, prefix: true, target: Box::new(target), span: tok.span });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let expr = self.parse_call_member()?;
        let tok = self.current().clone();
        if matches!(tok.kind, TokenKind::PlusPlus | TokenKind::MinusMinus) && !tok.newline_before {
            if !matches!(expr, Expr::Ident(..) | Expr::Member { .. }) {
                return Err(ScriptError::syntax("invalid update target", tok.span));
            }
            self.advance();
            let span = expr.span();
            return Ok(Expr::Update { increment: tok.kind == TokenKind::PlusPlus, prefix: false, target: Box::new(expr), span });
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Element>> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) {
            if self.eat(&TokenKind::Ellipsis) {
                args.push(Element::Spread(self.parse_assignment()?));
            } else {
                args.push(Element::Item(self.parse_assignment()?));
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(args)
    }

    fn parse_call_member(&mut self) -> Result<Expr> {
        let mut expr = if self.check_ident("new") {
            let span = self.advance().span;
            let callee = self.parse_primary()?;
            let args = if self.check(&TokenKind::LParen) { self.parse_arguments()? } else { Vec::new() };
            Expr::New { callee: Box::new(callee), args, span }
        } else {
            self.parse_primary()?
        };

        let mut chain = 0;
        loop {
            let tok = self.current().clone();
            if matches!(tok.kind, TokenKind::Dot | TokenKind::QuestionDot | TokenKind::LBracket | TokenKind::LParen) {
                self.extend_chain(&mut chain)?;
            }
            match tok.kind {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.property_name()?;
                    let span = expr.span();
                    expr = Expr::Member { object: Box::new(expr), property: Box::new(PropKey::Static(name)), optional: false, span };
                }
                TokenKind::QuestionDot => {
                    self.advance();
                    let span = expr.span();
                    match self.current().kind {
                        TokenKind::LParen => {
                            let args = self.parse_arguments()?;
                            expr = Expr::Call { callee: Box::new(expr), args, optional: true, span };
                        }
                        TokenKind::LBracket => {
                            self.advance();
                            let key = self.parse_expression()?;
                            self.expect(&TokenKind::RBracket, "']'")?;
                            expr = Expr::Member { object: Box::new(expr), property: Box::new(PropKey::Computed(key)), optional: true, span };
                        }
                        _ => {
                            let name = self.property_name()?;
                            expr = Expr::Member { object: Box::new(expr), property: Box::new(PropKey::Static(name)), optional: true, span };
                        }
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_expression()?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    let span = expr.span();
                    expr = Expr::Member { object: Box::new(expr), property: Box::new(PropKey::Computed(key)), optional: false, span };
                }
                TokenKind::LParen => {
                    let args = self.parse_arguments()?;
                    let span = expr.span();
                    expr = Expr::Call { callee: Box::new(expr), args, optional: false, span };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let tok = self.current().clone();
        let span = tok.span;
        match tok.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Number(n), span))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::String(Rc::from(s.as_str())), span))
            }
            TokenKind::Template(pieces) => {
                self.advance();
                let mut parts = Vec::with_capacity(pieces.len());
                for piece in pieces {
                    match piece {
                        TemplatePiece::Str(s) => parts.push(TemplatePart::Str(Rc::from(s.as_str()))),
                        TemplatePiece::Expr(tokens) => {
                            let mut sub = Parser::from_tokens(tokens);
                            sub.depth = self.depth;
                            sub.stack = self.stack;
                            let e = sub.parse_expression()?;
                            if !sub.at_eof() {
                                return Err(sub.unexpected());
                            }
                            parts.push(TemplatePart::Expr(e));
                        }
                    }
                }
                Ok(Expr::Template(parts, span))
            }
            TokenKind::Regex { pattern, flags } => {
                self.advance();
                Ok(Expr::Regex { pattern: Rc::from(pattern.as_str()), flags: Rc::from(flags.as_str()), span })
            }
            TokenKind::Ident(ref name) => match name.as_str() {
                "true" => { self.advance(); Ok(Expr::Literal(Literal::Bool(true), span)) }
                "false" => { self.advance(); Ok(Expr::Literal(Literal::Bool(false), span)) }
                "null" => { self.advance(); Ok(Expr::Literal(Literal::Null, span)) }
                "undefined" => { self.advance(); Ok(Expr::Literal(Literal::Undefined, span)) }
                "function" => {
                    self.advance();
                    let name = if matches!(self.current().kind, TokenKind::Ident(_)) { Some(self.binding_name()?) } else { None };
                    Ok(Expr::Function(self.parse_function_rest(name, span)?))
                }
                n if is_reserved(n) => Err(ScriptError::syntax(format!("unexpected keyword '{n}'"), span)),
                _ => {
                    self.advance();
                    Ok(Expr::Ident(Rc::from(name.as_str()), span))
                }
            },
            TokenKind::LParen => {
                self.advance();
                let e = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(e)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    if self.check(&TokenKind::Comma) {
                        self.advance();
                        items.push(Element::Item(Expr::Literal(Literal::Undefined, span)));
                        continue;
                    }
                    if self.eat(&TokenKind::Ellipsis) {
                        items.push(Element::Spread(self.parse_assignment()?));
                    } else {
                        items.push(Element::Item(self.parse_assignment()?));
                    }
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(Expr::Array(items, span))
            }
            TokenKind::LBrace => self.parse_object_literal(),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_object_literal(&mut self) -> Result<Expr> {
        let span = self.advance().span;
        let mut props = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.eat(&TokenKind::Ellipsis) {
                props.push(Property::Spread(self.parse_assignment()?));
            } else {
                let key_tok = self.current().clone();
                let key = match &key_tok.kind {
                    TokenKind::String(s) => { self.advance(); PropKey::Static(Rc::from(s.as_str())) }
                    TokenKind::Number(n) => { self.advance(); PropKey::Static(Rc::from(crate::value::number_to_string(*n).as_str())) }
                    TokenKind::LBracket => {
                        self.advance();
                        let e = self.parse_assignment()?;
                        self.expect(&TokenKind::RBracket, "']'")?;
                        PropKey::Computed(e)
                    }
                    _ => PropKey::Static(self.property_name()?),
                };
                if self.eat(&TokenKind::Colon) {
                    props.push(Property::KeyValue(key, self.parse_assignment()?));
                } else if self.check(&TokenKind::LParen) {
                    let name = match &key { PropKey::Static(n) => Some(n.clone()), PropKey::Computed(_) => None };
                    let def = self.parse_function_rest(name, key_tok.span)?;
                    props.push(Property::KeyValue(key, Expr::Function(def)));
                } else {
                    // shorthand `{ name }`
                    match key {
                        PropKey::Static(name) if matches!(key_tok.kind, TokenKind::Ident(_)) && !is_reserved(&name) => {
                            props.push(Property::KeyValue(PropKey::Static(name.clone()), Expr::Ident(name, key_tok.span)));
                        }
                        _ => return Err(self.unexpected()),
                    }
                }
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Expr::Object(props, span))
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::Ident(n) => format!("'{n}'"),
        TokenKind::Number(n) => format!("number {n}"),
        TokenKind::String(s) => format!("string '{s}'"),
        TokenKind::Template(_) => "template string".to_string(),
        TokenKind::Regex { .. } => "regular expression".to_string(),
        TokenKind::Error(e) => e.clone(),
        other => format!("token {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        Parser::new(src).unwrap().parse_standalone_expression().unwrap()
    }

    #[test]
    fn precedence_of_arithmetic() {
        match expr("1 + 2 * 3") {
            Expr::Binary { op: BinaryOp::Add, right, .. } => assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn arrow_functions_are_detected() {
        assert!(matches!(expr("x => x + 1"), Expr::Function(f) if f.is_arrow && f.params.len() == 1));
        assert!(matches!(expr("(a, b) => { return a }"), Expr::Function(f) if f.params.len() == 2));
        assert!(matches!(expr("(a + b)"), Expr::Binary { .. }));
    }

    #[test]
    fn fluent_builder_chain() {
        match expr("ApiVersion('apps/v1').Kind('Deployment')") {
            Expr::Call { callee, args, .. } => {
                assert_eq!(args.len(), 1);
                assert!(matches!(*callee, Expr::Member { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn statements_without_semicolons() {
        let prog = Parser::new("let a = 1\nif (a < 2) error('x')\nfor (const c of xs) { n++ }").unwrap().parse_program().unwrap();
        assert_eq!(prog.len(), 3);
        assert!(matches!(prog[2], Stmt::ForOf { .. }));
    }

    #[test]
    fn syntax_errors_carry_position() {
        let err = Parser::new("let = 5").unwrap().parse_program().unwrap_err();
        match err.kind {
            crate::error::ScriptErrorKind::Syntax { line, column, .. } => {
                assert_eq!(line, 1);
                assert_eq!(column, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let src = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(Parser::new(&src).unwrap().parse_standalone_expression().is_err());
    }

    #[test]
    fn long_operator_chains_are_rejected() {
        let sum = vec!["1"; 5000].join(" + ");
        let err = Parser::new(&sum).unwrap().parse_standalone_expression().unwrap_err();
        assert!(err.to_string().contains("chain too long"), "{err}");
        let members = format!("a{}", ".b".repeat(5000));
        assert!(Parser::new(&members).unwrap().parse_standalone_expression().is_err());
        let short = vec!["1"; 100].join(" + ");
        assert!(Parser::new(&short).unwrap().parse_standalone_expression().is_ok());
    }
}
