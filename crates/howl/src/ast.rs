use crate::position::Span;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::rc::Rc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub body: Block,
}

impl Program {
    pub fn new(body: Block) -> Self {
        Self { body }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn new(statements: Vec<Stmt>, span: Span) -> Self {
        Self { statements, span }
    }

    /// Line of the last statement, following nested blocks down.
    pub fn last_line(&self) -> u32 {
        self.statements
            .last()
            .map(Stmt::last_line)
            .unwrap_or_else(|| self.span.line())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Expr(Expr, Span),
    Assign(AssignStmt),
    AugAssign(AugAssignStmt),
    Pass(Span),
    Break(Span),
    Continue(Span),
    Return(ReturnStmt),
    Raise(RaiseStmt),
    Global(Vec<SmolStr>, Span),
    Nonlocal(Vec<SmolStr>, Span),
    Delete(Vec<Expr>, Span),
    Assert(AssertStmt),
    Import(ImportStmt),
    FromImport(FromImportStmt),
    If(IfStmt),
    While(WhileStmt),
    For(ForStmt),
    FunctionDef(Rc<FunctionDef>),
    ClassDef(ClassDef),
    Try(TryStmt),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr(_, span)
            | Stmt::Pass(span)
            | Stmt::Break(span)
            | Stmt::Continue(span)
            | Stmt::Global(_, span)
            | Stmt::Nonlocal(_, span)
            | Stmt::Delete(_, span) => *span,
            Stmt::Assign(stmt) => stmt.span,
            Stmt::AugAssign(stmt) => stmt.span,
            Stmt::Return(stmt) => stmt.span,
            Stmt::Raise(stmt) => stmt.span,
            Stmt::Assert(stmt) => stmt.span,
            Stmt::Import(stmt) => stmt.span,
            Stmt::FromImport(stmt) => stmt.span,
            Stmt::If(stmt) => stmt.span,
            Stmt::While(stmt) => stmt.span,
            Stmt::For(stmt) => stmt.span,
            Stmt::FunctionDef(def) => def.span,
            Stmt::ClassDef(def) => def.span,
            Stmt::Try(stmt) => stmt.span,
        }
    }

    pub fn line(&self) -> u32 {
        self.span().line()
    }

    fn last_line(&self) -> u32 {
        let nested = match self {
            Stmt::If(stmt) => stmt
                .else_branch
                .as_ref()
                .unwrap_or(&stmt.then_branch)
                .last_line(),
            Stmt::While(stmt) => stmt.orelse.as_ref().unwrap_or(&stmt.body).last_line(),
            Stmt::For(stmt) => stmt.orelse.as_ref().unwrap_or(&stmt.body).last_line(),
            Stmt::FunctionDef(def) => def.body.last_line(),
            Stmt::ClassDef(def) => def.body.last_line(),
            Stmt::Try(stmt) => stmt
                .finally
                .as_ref()
                .or(stmt.orelse.as_ref())
                .or(stmt.handlers.last().map(|h| &h.body))
                .unwrap_or(&stmt.body)
                .last_line(),
            _ => self.line(),
        };
        nested.max(self.line())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignStmt {
    /// `a = b = value` has two targets.
    pub targets: Vec<Expr>,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugAssignStmt {
    pub target: Expr,
    pub op: BinaryOp,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaiseStmt {
    pub exception: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertStmt {
    pub test: Expr,
    pub message: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportStmt {
    pub names: Vec<ImportName>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportName {
    pub path: Vec<SmolStr>,
    pub alias: Option<SmolStr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FromImportStmt {
    pub module: Vec<SmolStr>,
    pub items: Vec<ImportItem>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ImportItem {
    Wildcard(Span),
    Item { name: SmolStr, alias: Option<SmolStr>, span: Span },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfStmt {
    pub condition: Expr,
    pub then_branch: Block,
    /// `elif` chains are nested `If` statements inside this block.
    pub else_branch: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhileStmt {
    pub condition: Expr,
    pub body: Block,
    pub orelse: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForStmt {
    pub target: Expr,
    pub iterable: Expr,
    pub body: Block,
    pub orelse: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: SmolStr,
    pub params: Vec<Parameter>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: SmolStr,
    pub bases: Vec<Expr>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryStmt {
    pub body: Block,
    pub handlers: Vec<ExceptHandler>,
    pub orelse: Option<Block>,
    pub finally: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptHandler {
    /// `None` for a bare `except:`.
    pub kind: Option<Expr>,
    pub name: Option<SmolStr>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Positional,
    KeywordOnly,
    VarArgs,
    KwArgs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: SmolStr,
    pub default: Option<Expr>,
    pub kind: ParamKind,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Literal {
    Int(i128),
    Float(f64),
    Bool(bool),
    String(String),
    None,
    Ellipsis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FormatPart {
    Text(String),
    Field {
        expr: Expr,
        conversion: Option<char>,
        spec: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal, Span),
    FormatString(Vec<FormatPart>, Span),
    Identifier(SmolStr, Span),
    Binary(Box<BinaryExpr>),
    Unary(Box<UnaryExpr>),
    Compare(Box<CompareExpr>),
    Call(Box<CallExpr>),
    Field(Box<FieldExpr>),
    Index(Box<IndexExpr>),
    Slice(Box<SliceExpr>),
    IfElse(Box<IfElseExpr>),
    List(ListExpr),
    Tuple(TupleExpr),
    Set(SetExpr),
    Dict(DictExpr),
    Starred(Box<Expr>, Span),
    Comprehension(Box<ComprehensionExpr>),
    Lambda(Rc<LambdaExpr>),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(_, span)
            | Expr::FormatString(_, span)
            | Expr::Identifier(_, span)
            | Expr::Starred(_, span) => *span,
            Expr::Binary(expr) => expr.span,
            Expr::Unary(expr) => expr.span,
            Expr::Compare(expr) => expr.span,
            Expr::Call(expr) => expr.span,
            Expr::Field(expr) => expr.span,
            Expr::Index(expr) => expr.span,
            Expr::Slice(expr) => expr.span,
            Expr::IfElse(expr) => expr.span,
            Expr::List(expr) => expr.span,
            Expr::Tuple(expr) => expr.span,
            Expr::Set(expr) => expr.span,
            Expr::Dict(expr) => expr.span,
            Expr::Comprehension(expr) => expr.span,
            Expr::Lambda(expr) => expr.span,
        }
    }

    /// Whether the expression may appear on the left of `=`.
    pub fn is_assignable(&self) -> bool {
        match self {
            Expr::Identifier(..) | Expr::Field(_) | Expr::Index(_) => true,
            Expr::Starred(inner, _) => inner.is_assignable(),
            Expr::Tuple(tuple) => tuple.elements.iter().all(Expr::is_assignable),
            Expr::List(list) => list.elements.iter().all(Expr::is_assignable),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub left: Expr,
    pub right: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub expr: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareExpr {
    pub left: Expr,
    pub comparisons: Vec<(CompareOp, Expr)>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Argument {
    Positional(Expr),
    Keyword(SmolStr, Expr),
    Unpack(Expr),
    UnpackDict(Expr),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallExpr {
    pub function: Expr,
    pub args: Vec<Argument>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldExpr {
    pub target: Expr,
    pub field: SmolStr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexExpr {
    pub target: Expr,
    pub index: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceExpr {
    pub lower: Option<Expr>,
    pub upper: Option<Expr>,
    pub step: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfElseExpr {
    pub condition: Expr,
    pub then_value: Expr,
    pub else_value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListExpr {
    pub elements: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TupleExpr {
    pub elements: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetExpr {
    pub elements: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DictEntry {
    Pair(Expr, Expr),
    Unpack(Expr),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictExpr {
    pub entries: Vec<DictEntry>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComprehensionClause {
    pub target: Expr,
    pub iterable: Expr,
    pub conditions: Vec<Expr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComprehensionExpr {
    pub kind: ComprehensionKind,
    /// The element, or the key for dict comprehensions.
    pub element: Expr,
    pub value: Option<Expr>,
    pub clauses: Vec<ComprehensionClause>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LambdaExpr {
    pub params: Vec<Parameter>,
    pub body: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    MatMul,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    And,
    Or,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::MatMul => "@",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    BitNot,
}
