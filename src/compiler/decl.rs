//! Top-level declaration compilation, in two passes.
//!
//! Pass 1 walks the token stream and registers every class, field, method
//! signature and function signature, skipping bodies by brace depth. Pass 2
//! returns to the recorded body positions and compiles them. Because every
//! name is registered before any body compiles, functions and classes may
//! reference each other regardless of declaration order.

use tracing::debug;

use super::ast::{FnDef, Instr};
use super::expr::compile_expr;
use super::stmt::compile_block;
use super::{CompileCtx, FnSig, Toks};
use crate::classes::{same_signature, ClassRegistry, FieldDef, MethodDef, Param, Visibility};
use crate::error::{CompileErrorKind, CompileFail, Span};
use crate::host::ExternRegistry;
use crate::lexer::{Kw, Token, TokenKind};
use crate::typesys::{ClassId, Ident, TypeDesc};

/// Result of compiling one source unit. Classes are registered into the
/// session registry as a side effect; `class_ids` lists them so the caller
/// can purge on recompilation or on failure.
pub struct CompiledUnit {
    pub funcs: Vec<FnDef>,
    pub class_ids: Vec<ClassId>,
    pub error: Option<CompileFail>,
}

struct PendingFn {
    body_pos: usize,
    span: Span,
}

struct PendingMethod {
    class: ClassId,
    index: usize,
    body_pos: usize,
}

struct PendingDefault {
    class: ClassId,
    field: usize,
    expr_pos: usize,
}

/// Compile one source unit against the session's registries.
pub fn compile_unit(
    classes: &mut ClassRegistry,
    externs: &ExternRegistry,
    next_ident: &mut Ident,
    toks: &[Token],
) -> CompiledUnit {
    let mut ctx = CompileCtx::new(classes, externs, next_ident);
    let mut tk = Toks::new(toks);

    let mut class_ids = Vec::new();
    let mut pending_fns: Vec<PendingFn> = Vec::new();
    let mut pending_methods: Vec<PendingMethod> = Vec::new();
    let mut pending_defaults: Vec<PendingDefault> = Vec::new();

    /* ----- pass 1: signatures ----- */

    while !tk.peek().is_eof() && !ctx.has_error() {
        let public = tk.eat_kw(Kw::Public);
        if tk.at_kw(Kw::Class) {
            // Class declarations require the `public` marker.
            if !public {
                ctx.set_error(CompileErrorKind::NoPublic, tk.span());
                break;
            }
            pass1_class(
                &mut tk,
                &mut ctx,
                &mut class_ids,
                &mut pending_methods,
                &mut pending_defaults,
            );
        } else {
            pass1_function(&mut tk, &mut ctx, &mut pending_fns);
        }
    }

    if let Some(error) = ctx.error() {
        return CompiledUnit {
            funcs: Vec::new(),
            class_ids,
            error: Some(error),
        };
    }
    debug!(
        functions = pending_fns.len(),
        classes = class_ids.len(),
        "pass 1 complete"
    );

    /* ----- pass 2: bodies ----- */

    let mut funcs = Vec::new();

    for pending in &pending_defaults {
        if ctx.has_error() {
            break;
        }
        pass2_default(&mut tk, &mut ctx, pending);
    }

    for pending in &pending_methods {
        if ctx.has_error() {
            break;
        }
        pass2_method(&mut tk, &mut ctx, pending);
    }

    for (index, pending) in pending_fns.iter().enumerate() {
        if ctx.has_error() {
            break;
        }
        if let Some(def) = pass2_function(&mut tk, &mut ctx, index, pending) {
            funcs.push(def);
        }
    }

    CompiledUnit {
        funcs,
        class_ids,
        error: ctx.error(),
    }
}

/* ===================== Pass 1 ===================== */

/// Skip a balanced `{ ... }` block starting at the opening brace.
fn skip_block(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<()> {
    let mut depth = 0usize;
    loop {
        let t = tk.peek();
        if t.is_eof() {
            ctx.set_error(CompileErrorKind::CloseBlock, tk.span());
            return None;
        }
        match t.keyword() {
            Some(Kw::OpenBrace) => depth += 1,
            Some(Kw::CloseBrace) => {
                if depth == 1 {
                    tk.bump();
                    return Some(());
                }
                depth -= 1;
            }
            _ => {}
        }
        tk.bump();
    }
}

/// Skip the tokens of a field-default expression: everything up to the next
/// top-level `,` or `;`.
fn skip_default_expr(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<()> {
    let mut depth = 0usize;
    loop {
        let t = tk.peek();
        if t.is_eof() {
            ctx.set_error(CompileErrorKind::NoTerminator, tk.span());
            return None;
        }
        match t.keyword() {
            Some(Kw::OpenPar) | Some(Kw::OpenIndex) | Some(Kw::OpenBrace) => depth += 1,
            Some(Kw::ClosePar) | Some(Kw::CloseIndex) | Some(Kw::CloseBrace) => {
                depth = depth.saturating_sub(1)
            }
            Some(Kw::Comma) | Some(Kw::Semicolon) if depth == 0 => return Some(()),
            _ => {}
        }
        tk.bump();
    }
}

/// Parameter list after the already-consumed `(`. Identity numbers are
/// issued in pass 2 when the parameters enter scope.
fn parse_params(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Vec<Param>> {
    let mut params = Vec::new();
    if tk.eat_kw(Kw::ClosePar) {
        return Some(params);
    }
    loop {
        let Some(typ) = super::try_parse_type(tk, ctx) else {
            ctx.set_error(CompileErrorKind::NoType, tk.span());
            return None;
        };
        if typ == TypeDesc::Void {
            ctx.set_error(CompileErrorKind::Void, tk.span());
            return None;
        }
        if tk.peek().kind != TokenKind::Ident {
            ctx.set_error(CompileErrorKind::NoVar, tk.span());
            return None;
        }
        let name = tk.peek().text.clone();
        tk.bump();
        params.push(Param {
            ident: 0,
            name,
            typ,
        });
        if tk.eat_kw(Kw::Comma) {
            continue;
        }
        if tk.eat_kw(Kw::ClosePar) {
            return Some(params);
        }
        ctx.set_error(CompileErrorKind::CloseParen, tk.span());
        return None;
    }
}

fn pass1_function(tk: &mut Toks, ctx: &mut CompileCtx, pending: &mut Vec<PendingFn>) {
    let start = tk.span();
    let is_entry = tk.eat_kw(Kw::Extern);

    let Some(ret) = super::try_parse_type(tk, ctx) else {
        ctx.set_error(CompileErrorKind::NoType, tk.span());
        return;
    };
    if tk.peek().kind != TokenKind::Ident {
        ctx.set_error(CompileErrorKind::NoFunc, tk.span());
        return;
    }
    let name = tk.peek().text.clone();
    tk.bump();

    if !tk.eat_kw(Kw::OpenPar) {
        ctx.set_error(CompileErrorKind::OpenParen, tk.span());
        return;
    }
    let Some(params) = parse_params(tk, ctx) else {
        return;
    };

    // Two functions may share a name but not a full signature.
    let clash = ctx
        .funcs
        .iter()
        .any(|f| f.name == name && same_signature(&f.params, &params));
    if clash {
        ctx.set_error(CompileErrorKind::RedefFunc, start);
        return;
    }

    if !tk.at_kw(Kw::OpenBrace) {
        ctx.set_error(CompileErrorKind::OpenBlock, tk.span());
        return;
    }
    let body_pos = tk.pos();
    if skip_block(tk, ctx).is_none() {
        return;
    }

    ctx.funcs.push(FnSig {
        name,
        params,
        ret,
        is_entry,
    });
    pending.push(PendingFn {
        body_pos,
        span: start,
    });
}

fn parse_visibility(tk: &mut Toks) -> Visibility {
    if tk.eat_kw(Kw::Public) {
        Visibility::Public
    } else if tk.eat_kw(Kw::Private) {
        Visibility::Private
    } else if tk.eat_kw(Kw::Protected) {
        Visibility::Protected
    } else {
        // Unannotated members follow the owner-writable convention.
        Visibility::ReadOnly
    }
}

fn pass1_class(
    tk: &mut Toks,
    ctx: &mut CompileCtx,
    class_ids: &mut Vec<ClassId>,
    pending_methods: &mut Vec<PendingMethod>,
    pending_defaults: &mut Vec<PendingDefault>,
) {
    tk.bump(); // 'class'

    if tk.peek().kind != TokenKind::Ident {
        ctx.set_error(CompileErrorKind::NoVar, tk.span());
        return;
    }
    let name = tk.peek().text.clone();
    let name_span = tk.span();
    tk.bump();

    let parent = if tk.eat_kw(Kw::Extends) {
        if tk.peek().kind != TokenKind::Ident {
            ctx.set_error(CompileErrorKind::UndefClass, tk.span());
            return;
        }
        let Some(parent) = ctx.classes.find(&tk.peek().text) else {
            ctx.set_error(CompileErrorKind::UndefClass, tk.span());
            return;
        };
        tk.bump();
        Some(parent)
    } else {
        None
    };

    let class = match ctx.classes.register(&name, parent, false) {
        Ok(id) => id,
        Err(kind) => {
            ctx.set_error(kind, name_span);
            return;
        }
    };
    class_ids.push(class);

    if !tk.eat_kw(Kw::OpenBrace) {
        ctx.set_error(CompileErrorKind::OpenBlock, tk.span());
        return;
    }

    while !tk.at_kw(Kw::CloseBrace) {
        if tk.peek().is_eof() {
            ctx.set_error(CompileErrorKind::CloseBlock, tk.span());
            return;
        }
        if !pass1_member(tk, ctx, class, &name, pending_methods, pending_defaults) {
            return;
        }
    }
    tk.bump(); // '}'
}

/// One class member: a field chain, a method, a constructor, or a
/// destructor (`void ~Name()`).
fn pass1_member(
    tk: &mut Toks,
    ctx: &mut CompileCtx,
    class: ClassId,
    class_name: &str,
    pending_methods: &mut Vec<PendingMethod>,
    pending_defaults: &mut Vec<PendingDefault>,
) -> bool {
    let vis = parse_visibility(tk);
    let is_static = tk.eat_kw(Kw::Static);
    let is_synchronized = tk.eat_kw(Kw::Synchronized);

    let Some(typ) = super::try_parse_type(tk, ctx) else {
        ctx.set_error(CompileErrorKind::NoType, tk.span());
        return false;
    };

    // Destructor: the name is '~' followed by the class name.
    let destructor = tk.at_kw(Kw::BitNot);
    if destructor {
        tk.bump();
    }
    if tk.peek().kind != TokenKind::Ident {
        ctx.set_error(CompileErrorKind::NoVar, tk.span());
        return false;
    }
    let mut name = tk.peek().text.clone();
    let name_span = tk.span();
    tk.bump();
    if destructor {
        if name != class_name {
            ctx.set_error(CompileErrorKind::NoFunc, name_span);
            return false;
        }
        name = format!("~{name}");
    }

    if tk.at_kw(Kw::OpenPar) {
        tk.bump();
        let Some(params) = parse_params(tk, ctx) else {
            return false;
        };
        if destructor && !params.is_empty() {
            ctx.set_error(CompileErrorKind::OverParam, name_span);
            return false;
        }
        {
            let def = ctx.classes.get(class).unwrap();
            let clash = def
                .methods
                .iter()
                .any(|m| m.name == name && same_signature(&m.params, &params));
            if clash {
                ctx.set_error(CompileErrorKind::RedefFunc, name_span);
                return false;
            }
        }
        if !tk.at_kw(Kw::OpenBrace) {
            ctx.set_error(CompileErrorKind::OpenBlock, tk.span());
            return false;
        }
        let body_pos = tk.pos();
        if skip_block(tk, ctx).is_none() {
            return false;
        }

        let def = ctx.classes.get_mut(class).unwrap();
        def.methods.push(MethodDef {
            name,
            params,
            ret: typ,
            body: Instr::Block {
                body: Vec::new(),
                span: name_span,
            },
            is_synchronized,
        });
        pending_methods.push(PendingMethod {
            class,
            index: ctx.classes.get(class).unwrap().methods.len() - 1,
            body_pos,
        });
        return true;
    }

    // Field chain. Each declarator may add `[n]` dimensions; class-field
    // bounds must be integer constants.
    if destructor {
        ctx.set_error(CompileErrorKind::OpenParen, tk.span());
        return false;
    }
    if typ == TypeDesc::Void {
        ctx.set_error(CompileErrorKind::Void, name_span);
        return false;
    }
    let mut field_name = name;
    let mut field_span = name_span;
    loop {
        let mut field_typ = typ.clone();
        while tk.eat_kw(Kw::OpenIndex) {
            let bound = match tk.peek().kind {
                TokenKind::Keyword(Kw::CloseIndex) => None,
                TokenKind::IntLit(n) if n >= 0 => {
                    tk.bump();
                    Some(n as usize)
                }
                TokenKind::DefNum(n) if n >= 0 => {
                    tk.bump();
                    Some(n as usize)
                }
                _ => {
                    ctx.set_error(CompileErrorKind::BadIndex, tk.span());
                    return false;
                }
            };
            if !tk.eat_kw(Kw::CloseIndex) {
                ctx.set_error(CompileErrorKind::CloseIndex, tk.span());
                return false;
            }
            field_typ = TypeDesc::Array {
                elem: Box::new(field_typ),
                bound,
            };
        }

        {
            let def = ctx.classes.get(class).unwrap();
            if def.fields.iter().any(|f| f.name == field_name) {
                ctx.set_error(CompileErrorKind::RedefVar, field_span);
                return false;
            }
        }

        let expr_pos = if tk.at_kw(Kw::Assign) {
            tk.bump();
            let pos = tk.pos();
            if skip_default_expr(tk, ctx).is_none() {
                return false;
            }
            Some(pos)
        } else {
            None
        };

        let ident = ctx.issue_ident();
        let def = ctx.classes.get_mut(class).unwrap();
        def.fields.push(FieldDef {
            ident,
            name: field_name,
            typ: field_typ,
            vis,
            is_static,
            default: None,
            static_value: None,
        });
        if let Some(pos) = expr_pos {
            pending_defaults.push(PendingDefault {
                class,
                field: ctx.classes.get(class).unwrap().fields.len() - 1,
                expr_pos: pos,
            });
        }

        if tk.eat_kw(Kw::Comma) {
            if tk.peek().kind != TokenKind::Ident {
                ctx.set_error(CompileErrorKind::NoVar, tk.span());
                return false;
            }
            field_name = tk.peek().text.clone();
            field_span = tk.span();
            tk.bump();
            continue;
        }
        if tk.eat_kw(Kw::Semicolon) {
            return true;
        }
        ctx.set_error(CompileErrorKind::NoTerminator, tk.span());
        return false;
    }
}

/* ===================== Pass 2 ===================== */

fn pass2_default(tk: &mut Toks, ctx: &mut CompileCtx, pending: &PendingDefault) {
    tk.seek(pending.expr_pos);
    ctx.current_class = Some(pending.class);
    let compiled = compile_expr(tk, ctx);
    ctx.current_class = None;

    let Some(value) = compiled else { return };
    let field_typ = ctx.classes.get(pending.class).unwrap().fields[pending.field]
        .typ
        .clone();
    if !field_typ.accepts(&value.typ, ctx.classes) {
        ctx.set_error(CompileErrorKind::BadType1, value.expr.span());
        return;
    }
    let def = ctx.classes.get_mut(pending.class).unwrap();
    def.fields[pending.field].default = Some(value.expr);
}

/// Declare the parameters into a fresh scope and hand back the params with
/// their issued identity numbers.
fn declare_params(
    ctx: &mut CompileCtx,
    params: &[Param],
    span: Span,
) -> Option<Vec<Param>> {
    let mut out = Vec::with_capacity(params.len());
    for p in params {
        let ident = ctx.declare(&p.name, p.typ.clone(), span)?;
        out.push(Param {
            ident,
            name: p.name.clone(),
            typ: p.typ.clone(),
        });
    }
    Some(out)
}

fn pass2_method(tk: &mut Toks, ctx: &mut CompileCtx, pending: &PendingMethod) {
    let (params, ret) = {
        let m = &ctx.classes.get(pending.class).unwrap().methods[pending.index];
        (m.params.clone(), m.ret.clone())
    };

    tk.seek(pending.body_pos);
    ctx.current_class = Some(pending.class);
    ctx.ret_type = ret;
    ctx.enter_scope();
    let declared = declare_params(ctx, &params, tk.span());
    let body = declared.as_ref().and_then(|_| compile_block(tk, ctx));
    ctx.exit_scope();
    ctx.current_class = None;
    ctx.ret_type = TypeDesc::Void;

    let (Some(params), Some(body)) = (declared, body) else {
        return;
    };
    let m = &mut ctx.classes.get_mut(pending.class).unwrap().methods[pending.index];
    m.params = params;
    m.body = body;
}

fn pass2_function(
    tk: &mut Toks,
    ctx: &mut CompileCtx,
    index: usize,
    pending: &PendingFn,
) -> Option<FnDef> {
    let sig = ctx.funcs[index].clone();

    tk.seek(pending.body_pos);
    ctx.ret_type = sig.ret.clone();
    ctx.enter_scope();
    let declared = declare_params(ctx, &sig.params, pending.span);
    let body = declared.as_ref().and_then(|_| compile_block(tk, ctx));
    ctx.exit_scope();
    ctx.ret_type = TypeDesc::Void;

    let params = declared?;
    let body = body?;
    // Keep the resolvable signature's identity numbers in sync.
    ctx.funcs[index].params = params.clone();
    Some(FnDef {
        name: sig.name,
        params,
        ret: sig.ret,
        body,
        is_entry: sig.is_entry,
        span: pending.span,
    })
}
