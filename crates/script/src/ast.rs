//! Abstract syntax tree for rule scripts.

use std::rc::Rc;

use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    /// Compound arithmetic (`+=`, `-=`, ...).
    Compound(BinaryOp),
    /// Short-circuit (`&&=`, `||=`, `??=`).
    Logical(LogicalOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Const,
    Var,
}

#[derive(Debug, Clone)]
pub enum Literal {
    Number(f64),
    String(Rc<str>),
    Bool(bool),
    Null,
    Undefined,
}

#[derive(Debug, Clone)]
pub enum TemplatePart {
    Str(Rc<str>),
    Expr(Expr),
}

/// Element of an array literal or argument list.
#[derive(Debug, Clone)]
pub enum Element {
    Item(Expr),
    Spread(Expr),
}

#[derive(Debug, Clone)]
pub enum PropKey {
    Static(Rc<str>),
    Computed(Expr),
}

#[derive(Debug, Clone)]
pub enum Property {
    KeyValue(PropKey, Expr),
    Spread(Expr),
}

/// Binding target of declarations, parameters and `for` heads.
#[derive(Debug, Clone)]
pub enum Pattern {
    Ident(Rc<str>),
    Object { props: Vec<(Rc<str>, Pattern, Option<Expr>)>, rest: Option<Rc<str>> },
    Array { items: Vec<Option<(Pattern, Option<Expr>)>>, rest: Option<Rc<str>> },
}

#[derive(Debug, Clone)]
pub struct Param {
    pub pattern: Pattern,
    pub default: Option<Expr>,
    pub rest: bool,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Expr(Expr),
    Block(Vec<Stmt>),
}

#[derive(Debug)]
pub struct FunctionDef {
    pub name: Option<Rc<str>>,
    pub params: Vec<Param>,
    pub body: FunctionBody,
    pub is_arrow: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal, Span),
    Template(Vec<TemplatePart>, Span),
    Regex { pattern: Rc<str>, flags: Rc<str>, span: Span },
    Ident(Rc<str>, Span),
    Array(Vec<Element>, Span),
    Object(Vec<Property>, Span),
    Member { object: Box<Expr>, property: Box<PropKey>, optional: bool, span: Span },
    Call { callee: Box<Expr>, args: Vec<Element>, optional: bool, span: Span },
    New { callee: Box<Expr>, args: Vec<Element>, span: Span },
    Unary { op: UnaryOp, expr: Box<Expr>, span: Span },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr>, span: Span },
    Logical { op: LogicalOp, left: Box<Expr>, right: Box<Expr>, span: Span },
    Conditional { test: Box<Expr>, cons: Box<Expr>, alt: Box<Expr>, span: Span },
    Assign { op: AssignOp, target: Box<Expr>, value: Box<Expr>, span: Span },
    Update { increment: bool, prefix: bool, target: Box<Expr>, span: Span },
    Function(Rc<FunctionDef>),
    Sequence(Vec<Expr>, Span),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(_, s)
            | Expr::Template(_, s)
            | Expr::Ident(_, s)
            | Expr::Array(_, s)
            | Expr::Object(_, s)
            | Expr::Sequence(_, s) => *s,
            Expr::Regex { span, .. }
            | Expr::Member { span, .. }
            | Expr::Call { span, .. }
            | Expr::New { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Conditional { span, .. }
            | Expr::Assign { span, .. }
            | Expr::Update { span, .. } => *span,
            Expr::Function(f) => f.span,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ForInit {
    Decl(DeclKind, Vec<(Pattern, Option<Expr>)>),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Decl { kind: DeclKind, decls: Vec<(Pattern, Option<Expr>)>, span: Span },
    Function(Rc<FunctionDef>),
    If { test: Expr, cons: Box<Stmt>, alt: Option<Box<Stmt>> },
    For { init: Option<ForInit>, test: Option<Expr>, update: Option<Expr>, body: Box<Stmt> },
    ForOf { kind: DeclKind, pattern: Pattern, iter: Expr, body: Box<Stmt> },
    ForIn { kind: DeclKind, pattern: Pattern, object: Expr, body: Box<Stmt> },
    While { test: Expr, body: Box<Stmt> },
    DoWhile { body: Box<Stmt>, test: Expr },
    Block(Vec<Stmt>),
    Return(Option<Expr>, Span),
    Break(Span),
    Continue(Span),
    Throw(Expr, Span),
    Try { block: Vec<Stmt>, param: Option<Pattern>, handler: Option<Vec<Stmt>>, finalizer: Option<Vec<Stmt>> },
    Empty,
}
