//! Compiled instruction tree
//!
//! Tagged-variant statement and expression nodes with serde derives: frames
//! embed clones of the nodes they execute, which is what makes a suspended
//! process a plain serialization round-trip. Every node carries the source
//! span of the tokens it was compiled from, for diagnostics and the live
//! run-position API.

use serde::{Deserialize, Serialize};

use crate::classes::Param;
use crate::error::Span;
use crate::typesys::values::Ident;
use crate::typesys::{ClassId, TypeDesc};

/* ===================== Operators ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Power,
    Eq,
    Ne,
    Lo,
    Hi,
    Ls,
    Hs,
    Shl,
    Shr,
    Asr,
    BitAnd,
    BitOr,
    BitXor,
    LogAnd,
    LogOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

/// `x op= v` forms; `Set` is plain assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Asr,
}

/* ===================== Call targets ===================== */

/// Where a call site was resolved to at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum CallTarget {
    /// Index into the program's function table.
    User { index: usize },
    /// Host function, looked up by name at invocation so a missing
    /// registration after reload fails with UndefFunc.
    Extern { name: String },
}

/// Compile-time resolution of a method call; dispatch re-resolves against
/// the instance's actual class at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum MethodTarget {
    Compiled {
        class: ClassId,
        index: usize,
    },
    Extern {
        class: ClassId,
        name: String,
    },
}

/* ===================== Expressions ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    LitInt {
        v: i32,
        span: Span,
    },
    LitFloat {
        v: f32,
        span: Span,
    },
    LitBool {
        v: bool,
        span: Span,
    },
    LitStr {
        v: String,
        span: Span,
    },
    LitNull {
        span: Span,
    },
    LitNan {
        span: Span,
    },
    /// Variable read, resolved to its identity number at compile time.
    Var {
        ident: Ident,
        name: String,
        span: Span,
    },
    /// `this` inside a method body.
    This {
        class: ClassId,
        span: Span,
    },
    Field {
        base: Box<Expr>,
        name: String,
        span: Span,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
        span: Span,
    },
    /// `cond ? a : b`
    Ternary {
        cond: Box<Expr>,
        then_e: Box<Expr>,
        else_e: Box<Expr>,
        span: Span,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
        span: Span,
    },
    /// `++x`, `x--`, ...
    IncrDecr {
        target: Box<Expr>,
        decr: bool,
        prefix: bool,
        span: Span,
    },
    Call {
        target: CallTarget,
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    MethodCall {
        base: Box<Expr>,
        target: MethodTarget,
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    New {
        class: ClassId,
        /// Constructor method index on `class`, when one matched the
        /// argument list.
        ctor: Option<usize>,
        args: Vec<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        use Expr::*;
        match self {
            LitInt { span, .. }
            | LitFloat { span, .. }
            | LitBool { span, .. }
            | LitStr { span, .. }
            | LitNull { span }
            | LitNan { span }
            | Var { span, .. }
            | This { span, .. }
            | Field { span, .. }
            | Index { span, .. }
            | Binary { span, .. }
            | Unary { span, .. }
            | Ternary { span, .. }
            | Assign { span, .. }
            | IncrDecr { span, .. }
            | Call { span, .. }
            | MethodCall { span, .. }
            | New { span, .. } => *span,
        }
    }
}

/* ===================== Statements ===================== */

/// One declarator of a (possibly chained) declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decl {
    pub ident: Ident,
    pub name: String,
    pub typ: TypeDesc,
    /// Declared array dimension expressions, outermost first; `None` for an
    /// unbounded dimension (`int a[]`). Evaluated at execution time.
    pub dims: Vec<Option<Expr>>,
    pub init: Option<Expr>,
    pub span: Span,
}

/// One `catch (guard) { ... }` arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchArm {
    /// Guard expression: an int compares against the error code, a bool
    /// catches when true.
    pub guard: Expr,
    pub body: Box<Instr>,
}

/// One `case n:` (or `default:`) position inside a switch body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseLabel {
    /// `None` marks `default`.
    pub value: Option<i32>,
    /// Index into the switch body where this case starts.
    pub body_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Instr {
    Block {
        body: Vec<Instr>,
        span: Span,
    },
    VarDecl {
        decls: Vec<Decl>,
        span: Span,
    },
    ExprStmt {
        expr: Expr,
        span: Span,
    },
    If {
        cond: Expr,
        then_s: Box<Instr>,
        else_s: Option<Box<Instr>>,
        span: Span,
    },
    While {
        label: Option<String>,
        cond: Expr,
        body: Box<Instr>,
        span: Span,
    },
    DoWhile {
        label: Option<String>,
        body: Box<Instr>,
        cond: Expr,
        span: Span,
    },
    For {
        label: Option<String>,
        init: Option<Box<Instr>>,
        cond: Option<Expr>,
        incr: Option<Expr>,
        body: Box<Instr>,
        span: Span,
    },
    /// `repeat (n) { ... }` — run the body a precomputed number of times.
    Repeat {
        label: Option<String>,
        count: Expr,
        body: Box<Instr>,
        span: Span,
    },
    Switch {
        value: Expr,
        body: Vec<Instr>,
        cases: Vec<CaseLabel>,
        span: Span,
    },
    Break {
        label: Option<String>,
        span: Span,
    },
    Continue {
        label: Option<String>,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Throw {
        value: Expr,
        span: Span,
    },
    Try {
        body: Box<Instr>,
        catches: Vec<CatchArm>,
        finally: Option<Box<Instr>>,
        span: Span,
    },
}

impl Instr {
    pub fn span(&self) -> Span {
        use Instr::*;
        match self {
            Block { span, .. }
            | VarDecl { span, .. }
            | ExprStmt { span, .. }
            | If { span, .. }
            | While { span, .. }
            | DoWhile { span, .. }
            | For { span, .. }
            | Repeat { span, .. }
            | Switch { span, .. }
            | Break { span, .. }
            | Continue { span, .. }
            | Return { span, .. }
            | Throw { span, .. }
            | Try { span, .. } => *span,
        }
    }
}

/* ===================== Functions ===================== */

/// One compiled top-level function (each overload is its own entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnDef {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: TypeDesc,
    pub body: Instr,
    /// `extern` functions are entry points the host may `start()`.
    pub is_entry: bool,
    pub span: Span,
}
