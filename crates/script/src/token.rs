//! Token definitions for the rule script lexer.

use crate::span::Span;

/// One segment of a template string: literal text or an embedded expression.
#[derive(Clone, Debug, PartialEq)]
pub enum TemplatePiece {
    Str(String),
    Expr(Vec<Token>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Number(f64),
    String(String),
    Template(Vec<TemplatePiece>),
    Regex { pattern: String, flags: String },
    /// Identifiers and keywords; the parser decides which is which.
    Ident(String),

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
    Ellipsis,
    Question,
    QuestionDot,
    QuestionQuestion,
    QuestionQuestionEq,
    Arrow,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Bang,

    Eq,
    EqEq,
    EqEqEq,
    BangEq,
    BangEqEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AmpAmp,
    PipePipe,

    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpAmpEq,
    PipePipeEq,

    Eof,
    Error(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// A line break separates this token from the previous one.
    pub newline_before: bool,
}

impl Token {
    #[must_use]
    pub fn new(kind: TokenKind, span: Span, newline_before: bool) -> Self {
        Self { kind, span, newline_before }
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(n) if n == name)
    }
}

/// Words that cannot be used as binding names.
pub const RESERVED: &[&str] = &[
    "let", "const", "var", "if", "else", "for", "while", "do", "break", "continue", "return",
    "function", "true", "false", "null", "typeof", "new", "throw", "try", "catch", "finally",
    "in", "instanceof", "this", "class", "delete", "void", "switch", "case", "default",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name)
}
