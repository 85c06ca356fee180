//! Error types for the compiler and the execution engine
//!
//! Two independent channels mirror the two phases:
//! - compile errors: numeric code + source range, first-error-wins
//! - runtime errors: numeric code + source range, attached to a process,
//!   split into catchable and fatal kinds
//!
//! The numeric codes are part of the embedding contract (hosts key their
//! diagnostics UI on them), so they are stable and explicit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/* ===================== Source spans ===================== */

/// A half-open byte range into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Span { start, end }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/* ===================== Compile errors ===================== */

/// Compile-time error kinds with their stable numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CompileErrorKind {
    #[error("missing opening parenthesis")]
    OpenParen,
    #[error("missing closing parenthesis")]
    CloseParen,
    #[error("expression must be a boolean")]
    NotBoolean,
    #[error("undeclared variable")]
    UndefVar,
    #[error("assignment target is not assignable")]
    BadLeft,
    #[error("semicolon expected")]
    NoTerminator,
    #[error("case outside of a switch")]
    CaseOut,
    #[error("missing closing brace")]
    CloseBlock,
    #[error("else without matching if")]
    ElseWithoutIf,
    #[error("missing opening brace")]
    OpenBlock,
    #[error("wrong type for the assignment")]
    BadType1,
    #[error("redefinition of the variable")]
    RedefVar,
    #[error("two operands are of incompatible types")]
    BadType2,
    #[error("unknown function")]
    UndefCall,
    #[error("colon expected")]
    NoDoubleDots,
    #[error("break outside of a loop")]
    BreakOutside,
    #[error("label cannot be placed here")]
    BadLabel,
    #[error("undefined label")]
    UndefLabel,
    #[error("missing case")]
    NoCase,
    #[error("number expected")]
    BadNum,
    #[error("void not allowed here")]
    Void,
    #[error("type declaration expected")]
    NoType,
    #[error("variable name expected")]
    NoVar,
    #[error("function name expected")]
    NoFunc,
    #[error("too many parameters")]
    OverParam,
    #[error("function already exists")]
    RedefFunc,
    #[error("not enough parameters")]
    LowParam,
    #[error("wrong type of parameter")]
    BadParam,
    #[error("ambiguous call, wrong number of parameters")]
    NbParam,
    #[error("item does not exist in this class")]
    UndefItem,
    #[error("variable is not a class instance")]
    UndefClass,
    #[error("no appropriate constructor")]
    NoConstruct,
    #[error("class already exists")]
    RedefClass,
    #[error("closing bracket expected")]
    CloseIndex,
    #[error("reserved word")]
    Reserved,
    #[error("bad argument for new")]
    BadNew,
    #[error("opening bracket expected")]
    OpenIndex,
    #[error("string literal expected")]
    BadString,
    #[error("wrong index type")]
    BadIndex,
    #[error("item is not accessible here")]
    Private,
    #[error("public required")]
    NoPublic,
    #[error("illegal character")]
    BadChar,
}

impl CompileErrorKind {
    /// Stable numeric code for the host.
    pub fn code(self) -> u32 {
        use CompileErrorKind::*;
        match self {
            OpenParen => 5000,
            CloseParen => 5001,
            NotBoolean => 5002,
            UndefVar => 5003,
            BadLeft => 5004,
            NoTerminator => 5005,
            CaseOut => 5006,
            CloseBlock => 5008,
            ElseWithoutIf => 5009,
            OpenBlock => 5010,
            BadType1 => 5011,
            RedefVar => 5012,
            BadType2 => 5013,
            UndefCall => 5014,
            NoDoubleDots => 5015,
            BreakOutside => 5017,
            BadLabel => 5018,
            UndefLabel => 5019,
            NoCase => 5020,
            BadNum => 5021,
            Void => 5022,
            NoType => 5023,
            NoVar => 5024,
            NoFunc => 5025,
            OverParam => 5026,
            RedefFunc => 5027,
            LowParam => 5028,
            BadParam => 5029,
            NbParam => 5030,
            UndefItem => 5031,
            UndefClass => 5032,
            NoConstruct => 5033,
            RedefClass => 5034,
            CloseIndex => 5035,
            Reserved => 5036,
            BadNew => 5037,
            OpenIndex => 5038,
            BadString => 5039,
            BadIndex => 5040,
            Private => 5041,
            NoPublic => 5042,
            BadChar => 5043,
        }
    }

    /// Overload-resolution diagnostics may upgrade an earlier generic error;
    /// higher rank wins. See `CompileCtx::set_error`.
    pub fn overload_rank(self) -> u8 {
        use CompileErrorKind::*;
        match self {
            UndefCall => 1,
            OverParam | LowParam => 2,
            BadParam => 3,
            NbParam => 4,
            _ => 0,
        }
    }
}

/// A compile error with its source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("compile error {code}: {kind} at {}..{}", span.start, span.end)]
pub struct CompileFail {
    pub kind: CompileErrorKind,
    pub span: Span,
    pub code: u32,
}

impl CompileFail {
    pub fn new(kind: CompileErrorKind, span: Span) -> Self {
        CompileFail {
            kind,
            span,
            code: kind.code(),
        }
    }
}

/* ===================== Runtime errors ===================== */

/// Runtime error kinds with their stable numeric codes.
///
/// `User(n)` is an explicit `throw n` with a positive user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum RuntimeErrorKind {
    #[error("division by zero")]
    DivZero,
    #[error("uninitialized variable")]
    NotInit,
    #[error("value thrown is negative or zero")]
    BadThrow,
    #[error("function did not return a result")]
    NoRetVal,
    #[error("no active function to run")]
    NoRun,
    #[error("calling a function that no longer exists")]
    UndefFunc,
    #[error("class no longer exists")]
    NotClass,
    #[error("null pointer dereference")]
    NullPointer,
    #[error("arithmetic on a not-a-number value")]
    Nan,
    #[error("array index out of bounds")]
    OutArray,
    #[error("execution stack overflow")]
    StackOver,
    #[error("pointer to a destroyed object")]
    DeletedPtr,
    #[error("user exception {0}")]
    User(i32),
}

impl RuntimeErrorKind {
    pub fn code(self) -> i32 {
        use RuntimeErrorKind::*;
        match self {
            DivZero => 6000,
            NotInit => 6001,
            BadThrow => 6002,
            NoRetVal => 6003,
            NoRun => 6004,
            UndefFunc => 6005,
            NotClass => 6006,
            NullPointer => 6007,
            Nan => 6008,
            OutArray => 6009,
            StackOver => 6010,
            DeletedPtr => 6011,
            User(n) => n,
        }
    }

    /// Whether a `catch` guard is allowed to intercept this error.
    ///
    /// Fatal/environment errors unwind identically but are not meant to be
    /// caught by user code.
    pub fn catchable(self) -> bool {
        use RuntimeErrorKind::*;
        !matches!(self, NoRetVal | NoRun | UndefFunc | NotClass | StackOver)
    }

    /// Match a user guard value against this error's code.
    pub fn matches_code(self, guard: i32) -> bool {
        self.code() == guard
    }
}

/// A runtime error with the source range of the failing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("runtime error {}: {kind} at {}..{}", kind.code(), span.start, span.end)]
pub struct RuntimeFail {
    pub kind: RuntimeErrorKind,
    pub span: Span,
}

impl RuntimeFail {
    pub fn new(kind: RuntimeErrorKind, span: Span) -> Self {
        RuntimeFail { kind, span }
    }
}
