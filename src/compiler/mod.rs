//! Compiler: token stream to instruction tree
//!
//! Two passes. Pass 1 scans top-level declarations and registers class
//! shapes and function signatures while skipping bodies by brace depth, so
//! pass 2 sees every forward reference. Pass 2 compiles the recorded bodies
//! into the tagged-variant instruction tree.
//!
//! All compilation threads a [`CompileCtx`]: the block-scoped symbol table,
//! the first-error-wins error slot, the enclosing function's return type,
//! and the session's identity-number counter. Every compile function
//! returns `Option<..>` with the error recorded in the context — callers
//! never distinguish "syntax absent" from "syntax present but invalid"
//! through separate channels.

use tracing::debug;

use crate::classes::{ClassRegistry, Param};
use crate::error::{CompileErrorKind, CompileFail, Span};
use crate::host::ExternRegistry;
use crate::lexer::{Kw, Token, TokenKind};
use crate::typesys::values::Ident;
use crate::typesys::TypeDesc;

pub mod ast;
mod decl;
mod expr;
mod stmt;

#[cfg(test)]
mod tests;

pub use decl::{compile_unit, CompiledUnit};

/* ===================== Token cursor ===================== */

/// Read cursor over the lexed token stream. The stream always ends with the
/// Eof sentinel, so `peek` never runs off the end.
pub struct Toks<'a> {
    toks: &'a [Token],
    pos: usize,
}

impl<'a> Toks<'a> {
    pub fn new(toks: &'a [Token]) -> Toks<'a> {
        Toks { toks, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn peek(&self) -> &'a Token {
        &self.toks[self.pos.min(self.toks.len() - 1)]
    }

    pub fn peek_at(&self, off: usize) -> &'a Token {
        &self.toks[(self.pos + off).min(self.toks.len() - 1)]
    }

    pub fn bump(&mut self) -> &'a Token {
        let t = self.peek();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        t
    }

    pub fn at_kw(&self, k: Kw) -> bool {
        self.peek().is_kw(k)
    }

    /// Consume the keyword if present.
    pub fn eat_kw(&mut self, k: Kw) -> bool {
        if self.at_kw(k) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub fn span(&self) -> Span {
        self.peek().span
    }
}

/* ===================== Compile context ===================== */

/// Signature of a user function, available from pass 1 onward.
#[derive(Debug, Clone)]
pub struct FnSig {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: TypeDesc,
    pub is_entry: bool,
}

/// One entry of the loop/switch nesting stack, used to validate
/// `break`/`continue` targets before any code runs.
#[derive(Debug, Clone)]
struct LoopCtx {
    label: Option<String>,
    is_switch: bool,
}

/// One declared variable visible in the current scope.
#[derive(Debug, Clone)]
struct ScopeVar {
    name: String,
    ident: Ident,
    typ: TypeDesc,
}

/// The compile-time context threaded through both passes.
pub struct CompileCtx<'a> {
    pub classes: &'a mut ClassRegistry,
    pub externs: &'a ExternRegistry,
    pub funcs: Vec<FnSig>,
    /// Monotonic identity-number counter, owned by the session so identity
    /// numbers stay process-unique across recompilations.
    next_ident: &'a mut Ident,
    scopes: Vec<Vec<ScopeVar>>,
    err: Option<CompileFail>,
    /// Declared return type of the function being compiled.
    pub ret_type: TypeDesc,
    /// Class whose method body is being compiled, if any.
    pub current_class: Option<crate::typesys::ClassId>,
    loops: Vec<LoopCtx>,
}

impl<'a> CompileCtx<'a> {
    pub fn new(
        classes: &'a mut ClassRegistry,
        externs: &'a ExternRegistry,
        next_ident: &'a mut Ident,
    ) -> CompileCtx<'a> {
        CompileCtx {
            classes,
            externs,
            funcs: Vec::new(),
            next_ident,
            scopes: vec![Vec::new()],
            err: None,
            ret_type: TypeDesc::Void,
            current_class: None,
            loops: Vec::new(),
        }
    }

    /// Issue the next identity number.
    pub fn issue_ident(&mut self) -> Ident {
        *self.next_ident += 1;
        *self.next_ident
    }

    /// Record an error. First error wins, with one exception: a later,
    /// more specific overload-resolution diagnostic upgrades an earlier
    /// generic overload diagnostic.
    pub fn set_error(&mut self, kind: CompileErrorKind, span: Span) {
        match &self.err {
            None => self.err = Some(CompileFail::new(kind, span)),
            Some(prev)
                if prev.kind.overload_rank() > 0
                    && kind.overload_rank() > prev.kind.overload_rank() =>
            {
                debug!(from = ?prev.kind, to = ?kind, "upgrading overload diagnostic");
                self.err = Some(CompileFail::new(kind, span));
            }
            Some(_) => {}
        }
    }

    pub fn error(&self) -> Option<CompileFail> {
        self.err
    }

    pub fn has_error(&self) -> bool {
        self.err.is_some()
    }

    /* ----- scopes ----- */

    pub fn enter_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    pub fn exit_scope(&mut self) {
        self.scopes.pop();
    }

    /// Declare a variable in the innermost scope. Redeclaration within the
    /// same scope is an error; shadowing an outer scope is not.
    pub fn declare(&mut self, name: &str, typ: TypeDesc, span: Span) -> Option<Ident> {
        let scope = self.scopes.last_mut().expect("scope stack never empty");
        if scope.iter().any(|v| v.name == name) {
            self.set_error(CompileErrorKind::RedefVar, span);
            return None;
        }
        let ident = self.issue_ident();
        self.scopes.last_mut().unwrap().push(ScopeVar {
            name: name.to_string(),
            ident,
            typ,
        });
        Some(ident)
    }

    /// Innermost-first lookup.
    pub fn lookup(&self, name: &str) -> Option<(Ident, TypeDesc)> {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.iter().rev().find(|v| v.name == name) {
                return Some((v.ident, v.typ.clone()));
            }
        }
        None
    }

    /* ----- loop nesting ----- */

    fn enter_loop(&mut self, label: Option<String>, is_switch: bool) {
        self.loops.push(LoopCtx { label, is_switch });
    }

    fn exit_loop(&mut self) {
        self.loops.pop();
    }

    /// Validate a `break` (any loop or switch; labeled: that loop) or a
    /// `continue` (loops only).
    fn check_jump_target(&self, label: Option<&str>, is_continue: bool) -> bool {
        match label {
            None => self
                .loops
                .iter()
                .any(|l| !is_continue || !l.is_switch),
            Some(name) => self
                .loops
                .iter()
                .any(|l| l.label.as_deref() == Some(name) && !(is_continue && l.is_switch)),
        }
    }
}

/* ===================== Type parsing ===================== */

/// Parse a type name: a primitive keyword or a registered class name, with
/// optional trailing `[]` pairs making array types. Returns `None` without
/// recording an error when the cursor is not at a type at all.
pub fn try_parse_type(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<TypeDesc> {
    let base = match tk.peek().kind {
        TokenKind::Keyword(Kw::Int) => {
            tk.bump();
            TypeDesc::Int
        }
        TokenKind::Keyword(Kw::Float) => {
            tk.bump();
            TypeDesc::Float
        }
        TokenKind::Keyword(Kw::Boolean) => {
            tk.bump();
            TypeDesc::Bool
        }
        TokenKind::Keyword(Kw::Str) => {
            tk.bump();
            TypeDesc::Str
        }
        TokenKind::Keyword(Kw::VoidType) => {
            tk.bump();
            TypeDesc::Void
        }
        TokenKind::Ident => {
            let class = ctx.classes.find(&tk.peek().text)?;
            tk.bump();
            if ctx.classes.get(class).map(|c| c.intrinsic).unwrap_or(false) {
                TypeDesc::Intrinsic(class)
            } else {
                TypeDesc::Pointer(class)
            }
        }
        _ => return None,
    };

    let mut typ = base;
    while tk.at_kw(Kw::OpenIndex) && tk.peek_at(1).is_kw(Kw::CloseIndex) {
        tk.bump();
        tk.bump();
        typ = TypeDesc::Array {
            elem: Box::new(typ),
            bound: None,
        };
    }
    Some(typ)
}
