//! Expression compilation: precedence climbing over an ordered level table
//!
//! Each operator level lists its token set and, per operator, the mask of
//! operand types it accepts — the compile-time half of the type model. The
//! climber recurses one level down for operands, so precedence is the table
//! order and every operator is left-associative (power is right-associative
//! by recursing at its own level).

use super::ast::{AssignOp, BinOp, CallTarget, Expr, MethodTarget, UnOp};
use super::{CompileCtx, Toks};
use crate::classes::{resolve_overload, Visibility};
use crate::error::{CompileErrorKind, Span};
use crate::lexer::{Kw, TokenKind};
use crate::typesys::mask;
use crate::typesys::TypeDesc;

/* ===================== Typed results ===================== */

/// Whether an expression can be assigned through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lval {
    No,
    Yes,
    /// Readable here, writable only inside the defining class.
    ReadOnly,
}

/// A compiled expression with its static type.
#[derive(Debug, Clone)]
pub struct Typed {
    pub expr: Expr,
    pub typ: TypeDesc,
    pub lval: Lval,
}

impl Typed {
    fn rval(expr: Expr, typ: TypeDesc) -> Typed {
        Typed {
            expr,
            typ,
            lval: Lval::No,
        }
    }
}

/* ===================== Operator level table ===================== */

/// Operator levels, loosest binding first. Each entry is
/// (token, operator, accepted-operand mask).
const LEVELS: &[&[(Kw, BinOp, u8)]] = &[
    &[
        (Kw::LogOr, BinOp::LogOr, mask::BOOL),
        (Kw::TxtOr, BinOp::LogOr, mask::BOOL),
    ],
    &[
        (Kw::LogAnd, BinOp::LogAnd, mask::BOOL),
        (Kw::TxtAnd, BinOp::LogAnd, mask::BOOL),
    ],
    &[(Kw::BitOr, BinOp::BitOr, mask::BOOL | mask::INT)],
    &[(Kw::BitXor, BinOp::BitXor, mask::BOOL | mask::INT)],
    &[(Kw::BitAnd, BinOp::BitAnd, mask::BOOL | mask::INT)],
    &[
        (
            Kw::Eq,
            BinOp::Eq,
            mask::BOOL | mask::INT | mask::FLOAT | mask::STR | mask::PTR | mask::INST,
        ),
        (
            Kw::Ne,
            BinOp::Ne,
            mask::BOOL | mask::INT | mask::FLOAT | mask::STR | mask::PTR | mask::INST,
        ),
    ],
    &[
        (Kw::Hi, BinOp::Hi, mask::INT | mask::FLOAT | mask::STR),
        (Kw::Lo, BinOp::Lo, mask::INT | mask::FLOAT | mask::STR),
        (Kw::Hs, BinOp::Hs, mask::INT | mask::FLOAT | mask::STR),
        (Kw::Ls, BinOp::Ls, mask::INT | mask::FLOAT | mask::STR),
    ],
    &[
        (Kw::Shr, BinOp::Shr, mask::INT),
        (Kw::Shl, BinOp::Shl, mask::INT),
        (Kw::Asr, BinOp::Asr, mask::INT),
    ],
    &[
        (Kw::Add, BinOp::Add, mask::INT | mask::FLOAT | mask::STR),
        (Kw::Sub, BinOp::Sub, mask::INT | mask::FLOAT),
    ],
    &[
        (Kw::Mul, BinOp::Mul, mask::INT | mask::FLOAT),
        (Kw::Div, BinOp::Div, mask::INT | mask::FLOAT),
        (Kw::Mod, BinOp::Mod, mask::INT | mask::FLOAT),
    ],
    &[(Kw::Power, BinOp::Power, mask::INT | mask::FLOAT)],
];

/* ===================== Entry points ===================== */

/// Compile a full expression (assignment level).
pub fn compile_expr(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Typed> {
    compile_assignment(tk, ctx)
}

fn assign_op_of(kw: Kw) -> Option<AssignOp> {
    match kw {
        Kw::Assign => Some(AssignOp::Set),
        Kw::AddAssign => Some(AssignOp::Add),
        Kw::SubAssign => Some(AssignOp::Sub),
        Kw::MulAssign => Some(AssignOp::Mul),
        Kw::DivAssign => Some(AssignOp::Div),
        Kw::ModAssign => Some(AssignOp::Mod),
        Kw::AndAssign => Some(AssignOp::And),
        Kw::OrAssign => Some(AssignOp::Or),
        Kw::XorAssign => Some(AssignOp::Xor),
        Kw::ShlAssign => Some(AssignOp::Shl),
        Kw::ShrAssign => Some(AssignOp::Shr),
        Kw::AsrAssign => Some(AssignOp::Asr),
        _ => None,
    }
}

/// Assignment is right-associative and loosest of all.
fn compile_assignment(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Typed> {
    let target = compile_ternary(tk, ctx)?;

    let Some(op) = tk.peek().keyword().and_then(assign_op_of) else {
        return Some(target);
    };
    let op_span = tk.span();
    tk.bump();

    match target.lval {
        Lval::Yes => {}
        Lval::ReadOnly => {
            ctx.set_error(CompileErrorKind::Private, target.expr.span());
            return None;
        }
        Lval::No => {
            ctx.set_error(CompileErrorKind::BadLeft, target.expr.span());
            return None;
        }
    }

    let value = compile_assignment(tk, ctx)?;

    let typ = match op {
        AssignOp::Set => {
            if !target.typ.accepts(&value.typ, ctx.classes) {
                ctx.set_error(CompileErrorKind::BadType1, value.expr.span());
                return None;
            }
            target.typ.clone()
        }
        _ => {
            // Compound assignment behaves like the underlying binary
            // operator followed by a plain assignment.
            let bin = compound_bin_op(op);
            let Some(t) = binary_result(bin, &target.typ, &value.typ, ctx, op_span) else {
                return None;
            };
            if !target.typ.accepts(&t, ctx.classes) {
                ctx.set_error(CompileErrorKind::BadType1, value.expr.span());
                return None;
            }
            target.typ.clone()
        }
    };

    let span = target.expr.span().merge(value.expr.span());
    Some(Typed::rval(
        Expr::Assign {
            op,
            target: Box::new(target.expr),
            value: Box::new(value.expr),
            span,
        },
        typ,
    ))
}

fn compound_bin_op(op: AssignOp) -> BinOp {
    match op {
        AssignOp::Add => BinOp::Add,
        AssignOp::Sub => BinOp::Sub,
        AssignOp::Mul => BinOp::Mul,
        AssignOp::Div => BinOp::Div,
        AssignOp::Mod => BinOp::Mod,
        AssignOp::And => BinOp::BitAnd,
        AssignOp::Or => BinOp::BitOr,
        AssignOp::Xor => BinOp::BitXor,
        AssignOp::Shl => BinOp::Shl,
        AssignOp::Shr => BinOp::Shr,
        AssignOp::Asr => BinOp::Asr,
        AssignOp::Set => unreachable!("Set has no underlying operator"),
    }
}

/// `cond ? a : b`. Both arms must agree in type.
fn compile_ternary(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Typed> {
    let cond = compile_binary(tk, ctx, 0)?;
    if !tk.at_kw(Kw::Question) {
        return Some(cond);
    }
    tk.bump();

    if cond.typ != TypeDesc::Bool {
        ctx.set_error(CompileErrorKind::NotBoolean, cond.expr.span());
        return None;
    }
    let then_e = compile_assignment(tk, ctx)?;
    if !tk.eat_kw(Kw::Colon) {
        ctx.set_error(CompileErrorKind::NoDoubleDots, tk.span());
        return None;
    }
    let else_e = compile_assignment(tk, ctx)?;
    if !then_e.typ.accepts(&else_e.typ, ctx.classes)
        && !else_e.typ.accepts(&then_e.typ, ctx.classes)
    {
        ctx.set_error(CompileErrorKind::BadType2, else_e.expr.span());
        return None;
    }

    // The wider arm decides the result type.
    let typ = if then_e.typ.accepts(&else_e.typ, ctx.classes) {
        then_e.typ.clone()
    } else {
        else_e.typ.clone()
    };
    let span = cond.expr.span().merge(else_e.expr.span());
    Some(Typed::rval(
        Expr::Ternary {
            cond: Box::new(cond.expr),
            then_e: Box::new(then_e.expr),
            else_e: Box::new(else_e.expr),
            span,
        },
        typ,
    ))
}

/// One level of the operator table; the innermost level falls through to
/// unary expressions.
fn compile_binary(tk: &mut Toks, ctx: &mut CompileCtx, level: usize) -> Option<Typed> {
    if level >= LEVELS.len() {
        return compile_unary(tk, ctx);
    }

    let mut lhs = compile_binary(tk, ctx, level + 1)?;

    loop {
        let Some(kw) = tk.peek().keyword() else {
            return Some(lhs);
        };
        let Some(&(_, op, opmask)) = LEVELS[level].iter().find(|(k, _, _)| *k == kw) else {
            return Some(lhs);
        };
        let op_span = tk.span();
        tk.bump();

        if lhs.typ.mask() & opmask == 0 {
            ctx.set_error(CompileErrorKind::BadType2, lhs.expr.span());
            return None;
        }

        // Power binds right-associatively; everything else climbs down.
        let rhs = if op == BinOp::Power {
            compile_binary(tk, ctx, level)?
        } else {
            compile_binary(tk, ctx, level + 1)?
        };
        if rhs.typ.mask() & opmask == 0 {
            ctx.set_error(CompileErrorKind::BadType2, rhs.expr.span());
            return None;
        }

        let typ = binary_result(op, &lhs.typ, &rhs.typ, ctx, op_span)?;
        let span = lhs.expr.span().merge(rhs.expr.span());
        lhs = Typed::rval(
            Expr::Binary {
                op,
                lhs: Box::new(lhs.expr),
                rhs: Box::new(rhs.expr),
                span,
            },
            typ,
        );
    }
}

/// Result type of a binary operation, or a recorded BadType2 when the
/// operand kinds cannot be combined.
fn binary_result(
    op: BinOp,
    lhs: &TypeDesc,
    rhs: &TypeDesc,
    ctx: &mut CompileCtx,
    span: Span,
) -> Option<TypeDesc> {
    use BinOp::*;

    let compatible = match (lhs, rhs) {
        _ if lhs.is_numeric() && rhs.is_numeric() => true,
        (TypeDesc::Bool, TypeDesc::Bool) => true,
        (TypeDesc::Str, TypeDesc::Str) => true,
        // String concatenation is total: any operand kind may meet a string.
        (TypeDesc::Str, _) | (_, TypeDesc::Str) if op == Add => true,
        (TypeDesc::Pointer(a), TypeDesc::Pointer(b)) => {
            ctx.classes.is_child_of(*a, *b) || ctx.classes.is_child_of(*b, *a)
        }
        (TypeDesc::Pointer(_), TypeDesc::NullPointer)
        | (TypeDesc::NullPointer, TypeDesc::Pointer(_))
        | (TypeDesc::NullPointer, TypeDesc::NullPointer) => true,
        (TypeDesc::Intrinsic(a), TypeDesc::Intrinsic(b)) => a == b,
        _ => false,
    };
    if !compatible {
        ctx.set_error(CompileErrorKind::BadType2, span);
        return None;
    }

    Some(match op {
        LogAnd | LogOr | Eq | Ne | Lo | Hi | Ls | Hs => TypeDesc::Bool,
        BitAnd | BitOr | BitXor => {
            if lhs == &TypeDesc::Bool {
                TypeDesc::Bool
            } else {
                TypeDesc::Int
            }
        }
        Shl | Shr | Asr => TypeDesc::Int,
        Add => {
            if lhs == &TypeDesc::Str || rhs == &TypeDesc::Str {
                TypeDesc::Str
            } else {
                TypeDesc::promote(lhs, rhs)
            }
        }
        Sub | Mul | Div | Mod | Power => TypeDesc::promote(lhs, rhs),
    })
}

/* ===================== Unary / postfix / primary ===================== */

fn compile_unary(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Typed> {
    let span = tk.span();
    let (op, accept) = match tk.peek().keyword() {
        Some(Kw::Sub) => (Some(UnOp::Neg), mask::INT | mask::FLOAT),
        Some(Kw::Not) | Some(Kw::TxtNot) => (Some(UnOp::Not), mask::BOOL),
        Some(Kw::BitNot) => (Some(UnOp::BitNot), mask::INT),
        Some(Kw::Incr) | Some(Kw::Decr) => {
            let decr = tk.at_kw(Kw::Decr);
            tk.bump();
            let target = compile_unary(tk, ctx)?;
            return compile_incr_decr(ctx, target, decr, true, span);
        }
        _ => (None, 0),
    };

    if let Some(op) = op {
        tk.bump();
        let inner = compile_unary(tk, ctx)?;
        if inner.typ.mask() & accept == 0 {
            ctx.set_error(CompileErrorKind::BadType2, inner.expr.span());
            return None;
        }
        let full = span.merge(inner.expr.span());
        return Some(Typed::rval(
            Expr::Unary {
                op,
                expr: Box::new(inner.expr),
                span: full,
            },
            inner.typ,
        ));
    }

    compile_postfix(tk, ctx)
}

fn compile_incr_decr(
    ctx: &mut CompileCtx,
    target: Typed,
    decr: bool,
    prefix: bool,
    span: Span,
) -> Option<Typed> {
    if target.lval != Lval::Yes {
        ctx.set_error(CompileErrorKind::BadLeft, target.expr.span());
        return None;
    }
    if !target.typ.is_numeric() {
        ctx.set_error(CompileErrorKind::BadType2, target.expr.span());
        return None;
    }
    let full = span.merge(target.expr.span());
    let typ = target.typ.clone();
    Some(Typed::rval(
        Expr::IncrDecr {
            target: Box::new(target.expr),
            decr,
            prefix,
            span: full,
        },
        typ,
    ))
}

/// Postfix chains: field access, indexing, method calls, `++`/`--`.
fn compile_postfix(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Typed> {
    let mut cur = compile_primary(tk, ctx)?;

    loop {
        if tk.at_kw(Kw::Dot) {
            tk.bump();
            let name_tok = tk.peek();
            if name_tok.kind != TokenKind::Ident {
                ctx.set_error(CompileErrorKind::NoVar, tk.span());
                return None;
            }
            let name = name_tok.text.clone();
            let name_span = name_tok.span;
            tk.bump();

            let Some(class) = cur.typ.class_id() else {
                ctx.set_error(CompileErrorKind::UndefClass, cur.expr.span());
                return None;
            };

            if tk.at_kw(Kw::OpenPar) {
                cur = compile_method_call(tk, ctx, cur, class, &name, name_span)?;
            } else {
                cur = compile_field_access(ctx, cur, class, &name, name_span)?;
            }
        } else if tk.at_kw(Kw::OpenIndex) {
            tk.bump();
            let TypeDesc::Array { elem, .. } = cur.typ.clone() else {
                ctx.set_error(CompileErrorKind::UndefClass, cur.expr.span());
                return None;
            };
            let index = compile_expr(tk, ctx)?;
            if index.typ != TypeDesc::Int {
                ctx.set_error(CompileErrorKind::BadIndex, index.expr.span());
                return None;
            }
            if !tk.eat_kw(Kw::CloseIndex) {
                ctx.set_error(CompileErrorKind::CloseIndex, tk.span());
                return None;
            }
            let span = cur.expr.span().merge(index.expr.span());
            cur = Typed {
                expr: Expr::Index {
                    base: Box::new(cur.expr),
                    index: Box::new(index.expr),
                    span,
                },
                typ: *elem,
                lval: cur.lval,
            };
        } else if tk.at_kw(Kw::Incr) || tk.at_kw(Kw::Decr) {
            let decr = tk.at_kw(Kw::Decr);
            let span = tk.span();
            tk.bump();
            cur = compile_incr_decr(ctx, cur, decr, false, span)?;
        } else {
            return Some(cur);
        }
    }
}

/// Field access with compile-time visibility enforcement.
fn compile_field_access(
    ctx: &mut CompileCtx,
    base: Typed,
    class: usize,
    name: &str,
    span: Span,
) -> Option<Typed> {
    let Some((owner, idx)) = ctx.classes.find_field(class, name) else {
        ctx.set_error(CompileErrorKind::UndefItem, span);
        return None;
    };
    let field = &ctx.classes.get(owner).unwrap().fields[idx];
    let typ = field.typ.clone();
    let vis = field.vis;

    let inside = ctx
        .current_class
        .map(|c| ctx.classes.is_child_of(c, owner))
        .unwrap_or(false);
    let lval = match vis {
        Visibility::Public => Lval::Yes,
        Visibility::ReadOnly => {
            if inside {
                Lval::Yes
            } else {
                Lval::ReadOnly
            }
        }
        Visibility::Protected | Visibility::Private => {
            let allowed = if vis == Visibility::Private {
                ctx.current_class == Some(owner)
            } else {
                inside
            };
            if !allowed {
                ctx.set_error(CompileErrorKind::Private, span);
                return None;
            }
            Lval::Yes
        }
    };

    let full = base.expr.span().merge(span);
    Some(Typed {
        expr: Expr::Field {
            base: Box::new(base.expr),
            name: name.to_string(),
            span: full,
        },
        typ,
        lval,
    })
}

/// Comma-separated argument list after the already-consumed `(`.
fn compile_args(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<(Vec<Expr>, Vec<TypeDesc>)> {
    let mut args = Vec::new();
    let mut types = Vec::new();
    if tk.eat_kw(Kw::ClosePar) {
        return Some((args, types));
    }
    loop {
        let arg = compile_expr(tk, ctx)?;
        types.push(arg.typ.clone());
        args.push(arg.expr);
        if tk.eat_kw(Kw::Comma) {
            continue;
        }
        if tk.eat_kw(Kw::ClosePar) {
            return Some((args, types));
        }
        ctx.set_error(CompileErrorKind::CloseParen, tk.span());
        return None;
    }
}

fn compile_method_call(
    tk: &mut Toks,
    ctx: &mut CompileCtx,
    base: Typed,
    class: usize,
    name: &str,
    name_span: Span,
) -> Option<Typed> {
    tk.bump(); // '('
    let (args, types) = compile_args(tk, ctx)?;

    let methods = ctx.classes.find_methods(class, name);
    if !methods.is_empty() {
        let candidates: Vec<Vec<TypeDesc>> = methods
            .iter()
            .map(|&(c, i)| {
                ctx.classes.get(c).unwrap().methods[i]
                    .params
                    .iter()
                    .map(|p| p.typ.clone())
                    .collect()
            })
            .collect();
        let picked = match resolve_overload(&candidates, &types, ctx.classes) {
            Ok(p) => p,
            Err(kind) => {
                ctx.set_error(kind, name_span);
                return None;
            }
        };
        let (mclass, midx) = methods[picked];
        let ret = ctx.classes.get(mclass).unwrap().methods[midx].ret.clone();
        let span = base.expr.span().merge(name_span);
        return Some(Typed::rval(
            Expr::MethodCall {
                base: Box::new(base.expr),
                target: MethodTarget::Compiled {
                    class: mclass,
                    index: midx,
                },
                name: name.to_string(),
                args,
                span,
            },
            ret,
        ));
    }

    if let Some((mclass, midx)) = ctx.classes.find_extern_method(class, name) {
        let check = ctx.classes.get(mclass).unwrap().extern_methods[midx].slot.check;
        match check(&types) {
            Ok(ret) => {
                let span = base.expr.span().merge(name_span);
                return Some(Typed::rval(
                    Expr::MethodCall {
                        base: Box::new(base.expr),
                        target: MethodTarget::Extern {
                            class: mclass,
                            name: name.to_string(),
                        },
                        name: name.to_string(),
                        args,
                        span,
                    },
                    ret,
                ));
            }
            Err(kind) => {
                ctx.set_error(kind, name_span);
                return None;
            }
        }
    }

    ctx.set_error(CompileErrorKind::UndefCall, name_span);
    None
}

/// Free-function call: user overloads first, then host functions, then —
/// inside a method body — the current class's methods on `this`.
fn compile_call(
    tk: &mut Toks,
    ctx: &mut CompileCtx,
    name: &str,
    name_span: Span,
) -> Option<Typed> {
    tk.bump(); // '('
    let (args, types) = compile_args(tk, ctx)?;

    let overloads: Vec<usize> = ctx
        .funcs
        .iter()
        .enumerate()
        .filter(|(_, f)| f.name == name)
        .map(|(i, _)| i)
        .collect();
    if !overloads.is_empty() {
        let candidates: Vec<Vec<TypeDesc>> = overloads
            .iter()
            .map(|&i| ctx.funcs[i].params.iter().map(|p| p.typ.clone()).collect())
            .collect();
        let picked = match resolve_overload(&candidates, &types, ctx.classes) {
            Ok(p) => p,
            Err(kind) => {
                ctx.set_error(kind, name_span);
                return None;
            }
        };
        let index = overloads[picked];
        let ret = ctx.funcs[index].ret.clone();
        return Some(Typed::rval(
            Expr::Call {
                target: CallTarget::User { index },
                name: name.to_string(),
                args,
                span: name_span,
            },
            ret,
        ));
    }

    if let Some(slot) = ctx.externs.find(name) {
        match (slot.check)(&types) {
            Ok(ret) => {
                return Some(Typed::rval(
                    Expr::Call {
                        target: CallTarget::Extern {
                            name: name.to_string(),
                        },
                        name: name.to_string(),
                        args,
                        span: name_span,
                    },
                    ret,
                ))
            }
            Err(kind) => {
                ctx.set_error(kind, name_span);
                return None;
            }
        }
    }

    // Unqualified method call inside a method body.
    if let Some(class) = ctx.current_class {
        let methods = ctx.classes.find_methods(class, name);
        if !methods.is_empty() {
            let candidates: Vec<Vec<TypeDesc>> = methods
                .iter()
                .map(|&(c, i)| {
                    ctx.classes.get(c).unwrap().methods[i]
                        .params
                        .iter()
                        .map(|p| p.typ.clone())
                        .collect()
                })
                .collect();
            let picked = match resolve_overload(&candidates, &types, ctx.classes) {
                Ok(p) => p,
                Err(kind) => {
                    ctx.set_error(kind, name_span);
                    return None;
                }
            };
            let (mclass, midx) = methods[picked];
            let ret = ctx.classes.get(mclass).unwrap().methods[midx].ret.clone();
            return Some(Typed::rval(
                Expr::MethodCall {
                    base: Box::new(Expr::This {
                        class,
                        span: name_span,
                    }),
                    target: MethodTarget::Compiled {
                        class: mclass,
                        index: midx,
                    },
                    name: name.to_string(),
                    args,
                    span: name_span,
                },
                ret,
            ));
        }
    }

    ctx.set_error(CompileErrorKind::UndefCall, name_span);
    None
}

fn compile_new(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Typed> {
    let new_span = tk.span();
    tk.bump(); // 'new'

    let tok = tk.peek();
    if tok.kind != TokenKind::Ident {
        ctx.set_error(CompileErrorKind::BadNew, tk.span());
        return None;
    }
    let Some(class) = ctx.classes.find(&tok.text) else {
        ctx.set_error(CompileErrorKind::BadNew, tok.span);
        return None;
    };
    tk.bump();

    let (args, types) = if tk.eat_kw(Kw::OpenPar) {
        compile_args(tk, ctx)?
    } else {
        (Vec::new(), Vec::new())
    };

    let class_name = ctx.classes.get(class).unwrap().name.clone();
    let ctors = ctx.classes.find_methods(class, &class_name);
    let ctor = if ctors.is_empty() {
        if !args.is_empty() {
            ctx.set_error(CompileErrorKind::NoConstruct, new_span);
            return None;
        }
        None
    } else {
        let candidates: Vec<Vec<TypeDesc>> = ctors
            .iter()
            .map(|&(c, i)| {
                ctx.classes.get(c).unwrap().methods[i]
                    .params
                    .iter()
                    .map(|p| p.typ.clone())
                    .collect()
            })
            .collect();
        match resolve_overload(&candidates, &types, ctx.classes) {
            Ok(p) => Some(ctors[p].1),
            Err(_) => {
                ctx.set_error(CompileErrorKind::NoConstruct, new_span);
                return None;
            }
        }
    };

    Some(Typed::rval(
        Expr::New {
            class,
            ctor,
            args,
            span: new_span,
        },
        TypeDesc::Pointer(class),
    ))
}

fn compile_primary(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Typed> {
    let tok = tk.peek();
    let span = tok.span;

    match &tok.kind {
        TokenKind::IntLit(v) => {
            let v = *v;
            tk.bump();
            Some(Typed::rval(Expr::LitInt { v, span }, TypeDesc::Int))
        }
        TokenKind::FloatLit(v) => {
            let v = *v;
            tk.bump();
            Some(Typed::rval(Expr::LitFloat { v, span }, TypeDesc::Float))
        }
        TokenKind::StrLit(v) => {
            let v = v.clone();
            tk.bump();
            Some(Typed::rval(Expr::LitStr { v, span }, TypeDesc::Str))
        }
        TokenKind::DefNum(v) => {
            let v = *v;
            tk.bump();
            Some(Typed::rval(Expr::LitInt { v, span }, TypeDesc::Int))
        }
        TokenKind::Keyword(Kw::True) => {
            tk.bump();
            Some(Typed::rval(Expr::LitBool { v: true, span }, TypeDesc::Bool))
        }
        TokenKind::Keyword(Kw::False) => {
            tk.bump();
            Some(Typed::rval(
                Expr::LitBool { v: false, span },
                TypeDesc::Bool,
            ))
        }
        TokenKind::Keyword(Kw::Null) => {
            tk.bump();
            Some(Typed::rval(Expr::LitNull { span }, TypeDesc::NullPointer))
        }
        TokenKind::Keyword(Kw::Nan) => {
            tk.bump();
            Some(Typed::rval(Expr::LitNan { span }, TypeDesc::Float))
        }
        TokenKind::Keyword(Kw::This) => {
            tk.bump();
            let Some(class) = ctx.current_class else {
                ctx.set_error(CompileErrorKind::UndefVar, span);
                return None;
            };
            Some(Typed::rval(
                Expr::This { class, span },
                TypeDesc::Pointer(class),
            ))
        }
        TokenKind::Keyword(Kw::OpenPar) => {
            tk.bump();
            let inner = compile_expr(tk, ctx)?;
            if !tk.eat_kw(Kw::ClosePar) {
                ctx.set_error(CompileErrorKind::CloseParen, tk.span());
                return None;
            }
            Some(inner)
        }
        TokenKind::Keyword(Kw::New) => compile_new(tk, ctx),
        TokenKind::Ident => {
            let name = tok.text.clone();
            tk.bump();

            if tk.at_kw(Kw::OpenPar) {
                return compile_call(tk, ctx, &name, span);
            }

            if let Some((ident, typ)) = ctx.lookup(&name) {
                return Some(Typed {
                    expr: Expr::Var { ident, name, span },
                    typ,
                    lval: Lval::Yes,
                });
            }

            // Unqualified field access inside a method body.
            if let Some(class) = ctx.current_class {
                if ctx.classes.find_field(class, &name).is_some() {
                    let this = Typed::rval(Expr::This { class, span }, TypeDesc::Pointer(class));
                    return compile_field_access(ctx, this, class, &name, span);
                }
            }

            ctx.set_error(CompileErrorKind::UndefVar, span);
            None
        }
        _ => {
            ctx.set_error(CompileErrorKind::BadNum, span);
            None
        }
    }
}
