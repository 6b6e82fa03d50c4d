//! Lexer for rule scripts.
//!
//! Converts source text into tokens. Template strings are lexed eagerly: the
//! `${ ... }` parts become nested token vectors.

use crate::error::{Result, ScriptError};
use crate::span::Span;
use crate::token::{TemplatePiece, Token, TokenKind};

pub struct Lexer<'src> {
    source: &'src str,
    rest: &'src str,
    position: usize,
    line: u32,
    column: u32,
    /// Absolute offset of `source` within the outermost script (template parts).
    base: usize,
    newline_before: bool,
    /// Whether a `/` here starts a regex literal rather than a division.
    regex_allowed: bool,
}

impl<'src> Lexer<'src> {
    #[must_use]
    pub fn new(source: &'src str) -> Self {
        Self::with_origin(source, 0, 1, 1)
    }

    fn with_origin(source: &'src str, base: usize, line: u32, column: u32) -> Self {
        Self { source, rest: source, position: 0, line, column, base, newline_before: false, regex_allowed: true }
    }

    /// Tokenize everything, ending with `Eof`. The first lexical error aborts.
    pub fn tokenize(source: &str) -> Result<Vec<Token>> {
        Lexer::new(source).run()
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            if let TokenKind::Error(msg) = &token.kind {
                return Err(ScriptError::syntax(msg.clone(), token.span));
            }
            let is_eof = token.kind == TokenKind::Eof;
            self.regex_allowed = regex_may_follow(&token.kind);
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn span_from(&self, start: usize, line: u32, column: u32) -> Span {
        Span::new(self.base + start, self.base + self.position, line, column)
    }

    fn next_token(&mut self) -> Result<Token> {
        self.newline_before = false;
        self.skip_trivia()?;

        let start = self.position;
        let (line, column) = (self.line, self.column);
        let newline_before = self.newline_before;

        let Some(c) = self.peek_char() else {
            return Ok(Token::new(TokenKind::Eof, self.span_from(start, line, column), newline_before));
        };

        let kind = match c {
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            '{' => self.single(TokenKind::LBrace),
            '}' => self.single(TokenKind::RBrace),
            '[' => self.single(TokenKind::LBracket),
            ']' => self.single(TokenKind::RBracket),
            ',' => self.single(TokenKind::Comma),
            ';' => self.single(TokenKind::Semicolon),
            ':' => self.single(TokenKind::Colon),
            '.' => {
                if self.starts_with("...") {
                    self.advance_n(3);
                    TokenKind::Ellipsis
                } else if self.peek_char_n(1).is_some_and(|c| c.is_ascii_digit()) {
                    self.scan_number()
                } else {
                    self.single(TokenKind::Dot)
                }
            }
            '?' => {
                if self.starts_with("??=") {
                    self.advance_n(3);
                    TokenKind::QuestionQuestionEq
                } else if self.starts_with("??") {
                    self.advance_n(2);
                    TokenKind::QuestionQuestion
                } else if self.starts_with("?.") && !self.peek_char_n(2).is_some_and(|c| c.is_ascii_digit()) {
                    self.advance_n(2);
                    TokenKind::QuestionDot
                } else {
                    self.single(TokenKind::Question)
                }
            }
            '=' => self.operator(&[("===", TokenKind::EqEqEq), ("==", TokenKind::EqEq), ("=>", TokenKind::Arrow), ("=", TokenKind::Eq)]),
            '!' => self.operator(&[("!==", TokenKind::BangEqEq), ("!=", TokenKind::BangEq), ("!", TokenKind::Bang)]),
            '<' => self.operator(&[("<=", TokenKind::LtEq), ("<", TokenKind::Lt)]),
            '>' => self.operator(&[(">=", TokenKind::GtEq), (">", TokenKind::Gt)]),
            '+' => self.operator(&[("++", TokenKind::PlusPlus), ("+=", TokenKind::PlusEq), ("+", TokenKind::Plus)]),
            '-' => self.operator(&[("--", TokenKind::MinusMinus), ("-=", TokenKind::MinusEq), ("-", TokenKind::Minus)]),
            '*' => self.operator(&[("*=", TokenKind::StarEq), ("*", TokenKind::Star)]),
            '%' => self.operator(&[("%=", TokenKind::PercentEq), ("%", TokenKind::Percent)]),
            '&' => self.operator(&[("&&=", TokenKind::AmpAmpEq), ("&&", TokenKind::AmpAmp)]),
            '|' => self.operator(&[("||=", TokenKind::PipePipeEq), ("||", TokenKind::PipePipe)]),
            '/' => {
                if self.regex_allowed {
                    self.scan_regex()
                } else {
                    self.operator(&[("/=", TokenKind::SlashEq), ("/", TokenKind::Slash)])
                }
            }
            '"' | '\'' => self.scan_string(c),
            '`' => self.scan_template()?,
            c if c.is_ascii_digit() => self.scan_number(),
            c if is_ident_start(c) => self.scan_ident(),
            c => {
                self.advance();
                TokenKind::Error(format!("unexpected character: {c}"))
            }
        };

        Ok(Token::new(kind, self.span_from(start, line, column), newline_before))
    }

    fn peek_char(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn peek_char_n(&self, n: usize) -> Option<char> {
        self.rest.chars().nth(n)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest.starts_with(s)
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            let len = c.len_utf8();
            self.rest = &self.rest[len..];
            self.position += len;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
                self.newline_before = true;
            } else {
                self.column += 1;
            }
        }
    }

    fn advance_n(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    /// Longest match first.
    fn operator(&mut self, table: &[(&str, TokenKind)]) -> TokenKind {
        for (text, kind) in table {
            if self.starts_with(text) {
                self.advance_n(text.chars().count());
                return kind.clone();
            }
        }
        self.advance();
        TokenKind::Error("unexpected operator".to_string())
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => self.advance(),
                Some('/') if self.starts_with("//") => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.starts_with("/*") => {
                    let (line, column, start) = (self.line, self.column, self.position);
                    self.advance_n(2);
                    loop {
                        if self.rest.is_empty() {
                            return Err(ScriptError::syntax("unterminated comment", self.span_from(start, line, column)));
                        }
                        if self.starts_with("*/") {
                            self.advance_n(2);
                            break;
                        }
                        self.advance();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn scan_number(&mut self) -> TokenKind {
        let start = self.position;
        if self.starts_with("0x") || self.starts_with("0X") {
            self.advance_n(2);
            let digits_start = self.position;
            while self.peek_char().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
            let digits = &self.source[digits_start..self.position];
            return match i64::from_str_radix(digits, 16) {
                Ok(n) => TokenKind::Number(n as f64),
                Err(_) => TokenKind::Error(format!("invalid hex literal: 0x{digits}")),
            };
        }
        while self.peek_char().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.advance();
        }
        if self.peek_char() == Some('.') && self.peek_char_n(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek_char(), Some('e' | 'E')) {
            let save = (self.rest, self.position, self.column);
            self.advance();
            if matches!(self.peek_char(), Some('+' | '-')) {
                self.advance();
            }
            if self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                (self.rest, self.position, self.column) = save;
            }
        }
        let text: String = self.source[start..self.position].chars().filter(|c| *c != '_').collect();
        match text.parse::<f64>() {
            Ok(n) => TokenKind::Number(n),
            Err(_) => TokenKind::Error(format!("invalid number: {text}")),
        }
    }

    fn scan_ident(&mut self) -> TokenKind {
        let start = self.position;
        while self.peek_char().is_some_and(is_ident_continue) {
            self.advance();
        }
        TokenKind::Ident(self.source[start..self.position].to_string())
    }

    fn scan_escape(&mut self, out: &mut String) -> std::result::Result<(), String> {
        self.advance(); // backslash
        let Some(c) = self.peek_char() else { return Err("unterminated escape".into()) };
        self.advance();
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '\n' => {}
            'u' => {
                let hex: String = if self.peek_char() == Some('{') {
                    self.advance();
                    let mut h = String::new();
                    while let Some(c) = self.peek_char() {
                        self.advance();
                        if c == '}' {
                            break;
                        }
                        h.push(c);
                    }
                    h
                } else {
                    let mut h = String::new();
                    for _ in 0..4 {
                        if let Some(c) = self.peek_char() {
                            h.push(c);
                            self.advance();
                        }
                    }
                    h
                };
                let code = u32::from_str_radix(&hex, 16).map_err(|_| format!("invalid unicode escape: {hex}"))?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn scan_string(&mut self, quote: char) -> TokenKind {
        self.advance();
        let mut out = String::new();
        loop {
            match self.peek_char() {
                None | Some('\n') => return TokenKind::Error("unterminated string".to_string()),
                Some(c) if c == quote => {
                    self.advance();
                    return TokenKind::String(out);
                }
                Some('\\') => {
                    if let Err(e) = self.scan_escape(&mut out) {
                        return TokenKind::Error(e);
                    }
                }
                Some(c) => {
                    out.push(c);
                    self.advance();
                }
            }
        }
    }

    fn scan_template(&mut self) -> Result<TokenKind> {
        let (line, column, start) = (self.line, self.column, self.position);
        self.advance();
        let mut pieces = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek_char() {
                None => return Err(ScriptError::syntax("unterminated template string", self.span_from(start, line, column))),
                Some('`') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    if let Err(e) = self.scan_escape(&mut text) {
                        return Ok(TokenKind::Error(e));
                    }
                }
                Some('$') if self.starts_with("${") => {
                    self.advance_n(2);
                    if !text.is_empty() {
                        pieces.push(TemplatePiece::Str(std::mem::take(&mut text)));
                    }
                    let (expr_line, expr_column, expr_start) = (self.line, self.column, self.position);
                    let mut depth = 0usize;
                    loop {
                        match self.peek_char() {
                            None => return Err(ScriptError::syntax("unterminated template expression", self.span_from(start, line, column))),
                            Some('{') => depth += 1,
                            Some('}') if depth == 0 => break,
                            Some('}') => depth -= 1,
                            Some(q @ ('"' | '\'')) => {
                                // skip nested string so its braces do not count
                                if let TokenKind::Error(e) = self.scan_string(q) {
                                    return Ok(TokenKind::Error(e));
                                }
                                continue;
                            }
                            _ => {}
                        }
                        self.advance();
                    }
                    let inner = &self.source[expr_start..self.position];
                    let nested = Lexer::with_origin(inner, self.base + expr_start, expr_line, expr_column).run()?;
                    pieces.push(TemplatePiece::Expr(nested));
                    self.advance(); // closing brace
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
        if !text.is_empty() || pieces.is_empty() {
            pieces.push(TemplatePiece::Str(text));
        }
        Ok(TokenKind::Template(pieces))
    }

    fn scan_regex(&mut self) -> TokenKind {
        self.advance();
        let mut pattern = String::new();
        let mut in_class = false;
        loop {
            match self.peek_char() {
                None | Some('\n') => return TokenKind::Error("unterminated regex literal".to_string()),
                Some('\\') => {
                    pattern.push('\\');
                    self.advance();
                    if let Some(c) = self.peek_char() {
                        pattern.push(c);
                        self.advance();
                    }
                }
                Some('[') => { in_class = true; pattern.push('['); self.advance(); }
                Some(']') => { in_class = false; pattern.push(']'); self.advance(); }
                Some('/') if !in_class => {
                    self.advance();
                    break;
                }
                Some(c) => { pattern.push(c); self.advance(); }
            }
        }
        let mut flags = String::new();
        while self.peek_char().is_some_and(|c| c.is_ascii_alphabetic()) {
            if let Some(c) = self.peek_char() {
                flags.push(c);
            }
            self.advance();
        }
        TokenKind::Regex { pattern, flags }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// After a value-producing token a `/` is a division.
fn regex_may_follow(kind: &TokenKind) -> bool {
    match kind {
        TokenKind::Ident(name) => matches!(name.as_str(), "return" | "typeof" | "in" | "of" | "case" | "throw" | "else" | "do"),
        TokenKind::Number(_)
        | TokenKind::String(_)
        | TokenKind::Template(_)
        | TokenKind::Regex { .. }
        | TokenKind::RParen
        | TokenKind::RBracket
        | TokenKind::RBrace
        | TokenKind::PlusPlus
        | TokenKind::MinusMinus => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn punctuation_prefers_longest_match() {
        assert_eq!(
            kinds("a === b ?? c?.d => ..."),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::EqEqEq,
                TokenKind::Ident("b".into()),
                TokenKind::QuestionQuestion,
                TokenKind::Ident("c".into()),
                TokenKind::QuestionDot,
                TokenKind::Ident("d".into()),
                TokenKind::Arrow,
                TokenKind::Ellipsis,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn regex_versus_division() {
        assert_eq!(kinds("a / 2")[1], TokenKind::Slash);
        assert_eq!(kinds("x = /ab+c/i")[2], TokenKind::Regex { pattern: "ab+c".into(), flags: "i".into() });
    }

    #[test]
    fn template_parts_are_nested_tokens() {
        let toks = kinds("`hi ${name}!`");
        match &toks[0] {
            TokenKind::Template(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], TemplatePiece::Str("hi ".into()));
                assert!(matches!(&parts[1], TemplatePiece::Expr(t) if t[0].kind == TokenKind::Ident("name".into())));
            }
            other => panic!("expected template, got {other:?}"),
        }
    }

    #[test]
    fn comments_and_newlines() {
        let toks = Lexer::tokenize("a // note\n/* block */ b").unwrap();
        assert_eq!(toks.len(), 3);
        assert!(toks[1].newline_before);
        assert_eq!(toks[1].span.line, 2);
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        let err = Lexer::tokenize("'abc").unwrap_err();
        assert!(err.is_syntax());
    }
}
