//! Expression handlers
//!
//! Same phase-machine shape as the statement handlers. An expression frame
//! completes through `finish_value`, handing its result (and the heap
//! references the result owns) to the parent frame's value stack.
//!
//! Reference discipline: every `Value` sitting in a frame's `vals` or
//! `locals` owns one heap reference. Reads clone-and-retain, writes replace
//! the old value and release it, and consumed operands are released here.

use super::control::Control;
use super::exec_loop::{Cx, Step};
use super::frame::{FnInfo, Frame};
use crate::classes::{ClassRegistry, LockOutcome};
use crate::compiler::ast::{AssignOp, BinOp, CallTarget, Expr, MethodTarget, UnOp};
use crate::error::{RuntimeErrorKind, Span};
use crate::host::{ExternCtx, ExternStatus};
use crate::typesys::{ClassId, Data, Handle, Heap, HeapObj, InitState, TypeDesc, Value, Var};

pub(crate) fn exec_expr(cx: &mut Cx, expr: Expr, pc: u8) -> Step {
    match expr {
        Expr::LitInt { v, .. } => cx.finish_value(Value::int(v)),
        Expr::LitFloat { v, .. } => cx.finish_value(Value::float(v)),
        Expr::LitBool { v, .. } => cx.finish_value(Value::bool(v)),
        Expr::LitStr { v, .. } => cx.finish_value(Value::str(v)),
        Expr::LitNull { .. } => cx.finish_value(Value::null()),
        Expr::LitNan { .. } => cx.finish_value(Value::nan()),
        Expr::Var { ident, span, .. } => exec_var(cx, ident, span),
        Expr::This { class, span } => exec_this(cx, class, span),
        Expr::Field { base, name, span } => exec_field(cx, *base, name, span, pc),
        Expr::Index { base, index, span } => exec_index(cx, *base, *index, span, pc),
        Expr::Binary { op, lhs, rhs, span } => exec_binary(cx, op, *lhs, *rhs, span, pc),
        Expr::Unary { op, expr, span } => exec_unary(cx, op, *expr, span, pc),
        Expr::Ternary {
            cond,
            then_e,
            else_e,
            span,
        } => exec_ternary(cx, *cond, *then_e, *else_e, span, pc),
        Expr::Assign {
            op,
            target,
            value,
            span,
        } => exec_assign(cx, op, *target, *value, span, pc),
        Expr::IncrDecr {
            target,
            decr,
            prefix,
            span,
        } => exec_incr_decr(cx, *target, decr, prefix, span, pc),
        Expr::Call {
            target,
            name,
            args,
            span,
        } => exec_call(cx, target, name, args, span, pc),
        Expr::MethodCall {
            base,
            target,
            name,
            args,
            span,
        } => exec_method_call(cx, *base, target, name, args, span, pc),
        Expr::New {
            class,
            ctor,
            args,
            span,
        } => exec_new(cx, class, ctor, args, span, pc),
    }
}

/* ===================== Reads ===================== */

fn exec_var(cx: &mut Cx, ident: u32, span: Span) -> Step {
    let found = cx.lookup_var(ident).map(|v| v.value.clone());
    let Some(v) = found else {
        return cx.fail(RuntimeErrorKind::NoRun, span);
    };
    if v.state == InitState::Undef {
        return cx.fail(RuntimeErrorKind::NotInit, span);
    }
    cx.retain(&v);
    cx.finish_value(v)
}

fn exec_this(cx: &mut Cx, class: ClassId, span: Span) -> Step {
    let Some(h) = cx.this_handle() else {
        return cx.fail(RuntimeErrorKind::NoRun, span);
    };
    let v = Value {
        state: InitState::Def,
        data: Data::Pointer {
            class,
            target: Some(h),
        },
    };
    cx.retain(&v);
    cx.finish_value(v)
}

/// Where a field access landed: an instance slot or a static slot in the
/// class registry.
enum FieldSlot {
    Instance(Handle, usize),
    Static(ClassId, usize),
}

fn resolve_field(
    heap: &Heap,
    classes: &ClassRegistry,
    base: &Value,
    name: &str,
) -> Result<FieldSlot, RuntimeErrorKind> {
    if base.state == InitState::Undef {
        return Err(RuntimeErrorKind::NotInit);
    }
    let Data::Pointer { target, .. } = &base.data else {
        return Err(RuntimeErrorKind::NotInit);
    };
    let Some(h) = target else {
        return Err(RuntimeErrorKind::NullPointer);
    };
    let Some(HeapObj::Instance {
        class,
        fields,
        destroyed,
    }) = heap.get(*h)
    else {
        return Err(RuntimeErrorKind::DeletedPtr);
    };
    if *destroyed {
        return Err(RuntimeErrorKind::DeletedPtr);
    }
    if let Some(i) = fields.iter().position(|f| f.name == name) {
        return Ok(FieldSlot::Instance(*h, i));
    }
    if let Some((c, i)) = classes.find_field(*class, name) {
        let is_static = classes
            .get(c)
            .map(|d| d.fields[i].is_static)
            .unwrap_or(false);
        if is_static {
            return Ok(FieldSlot::Static(c, i));
        }
    }
    // The layout no longer matches the compiled program (host reloaded).
    Err(RuntimeErrorKind::NotClass)
}

fn exec_field(cx: &mut Cx, base: Expr, name: String, span: Span, pc: u8) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_expr(base)
        }
        _ => {
            let base_v = cx.top().vals.pop().expect("base value");
            let slot = match resolve_field(&cx.proc.heap, &cx.session.classes, &base_v, &name) {
                Ok(s) => s,
                Err(kind) => {
                    cx.release(&base_v);
                    return cx.fail(kind, span);
                }
            };
            let v = match slot {
                FieldSlot::Instance(h, i) => match cx.proc.heap.get(h) {
                    Some(HeapObj::Instance { fields, .. }) => fields[i].value.clone(),
                    _ => {
                        cx.release(&base_v);
                        return cx.fail(RuntimeErrorKind::DeletedPtr, span);
                    }
                },
                FieldSlot::Static(c, i) => {
                    let f = &cx.session.classes.get(c).expect("resolved class").fields[i];
                    f.static_value
                        .clone()
                        .unwrap_or_else(|| Value::undef(&f.typ))
                }
            };
            if v.state == InitState::Undef {
                cx.release(&base_v);
                return cx.fail(RuntimeErrorKind::NotInit, span);
            }
            cx.retain(&v);
            cx.release(&base_v);
            cx.finish_value(v)
        }
    }
}

fn exec_index(cx: &mut Cx, base: Expr, index: Expr, span: Span, pc: u8) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_expr(base)
        }
        1 => {
            cx.top().pc = 2;
            cx.push_expr(index)
        }
        _ => {
            let idx_v = cx.top().vals.pop().expect("index value");
            let base_v = cx.top().vals.pop().expect("base value");
            let step = (|| {
                let h = array_handle(&base_v)?;
                let i = idx_v.as_i32()?;
                let Some(HeapObj::Array { elems, .. }) = cx.proc.heap.get(h) else {
                    return Err(RuntimeErrorKind::DeletedPtr);
                };
                if i < 0 || i as usize >= elems.len() {
                    return Err(RuntimeErrorKind::OutArray);
                }
                Ok(elems[i as usize].clone())
            })();
            match step {
                // A gap element of a grown array reads as an undefined value;
                // the error, if any, happens where the value is used.
                Ok(v) => {
                    cx.retain(&v);
                    cx.release(&base_v);
                    cx.finish_value(v)
                }
                Err(kind) => {
                    cx.release(&base_v);
                    cx.fail(kind, span)
                }
            }
        }
    }
}

fn array_handle(v: &Value) -> Result<Handle, RuntimeErrorKind> {
    if v.state == InitState::Undef {
        return Err(RuntimeErrorKind::NotInit);
    }
    match &v.data {
        Data::Array(h) => Ok(*h),
        _ => Err(RuntimeErrorKind::NotInit),
    }
}

/* ===================== Operators ===================== */

fn exec_binary(cx: &mut Cx, op: BinOp, lhs: Expr, rhs: Expr, span: Span, pc: u8) -> Step {
    // Logical operators short-circuit; everything else is strict.
    if matches!(op, BinOp::LogAnd | BinOp::LogOr) {
        return match pc {
            0 => {
                cx.top().pc = 1;
                cx.push_expr(lhs)
            }
            1 => {
                let v = cx.top().vals.pop().expect("lhs value");
                let b = match v.as_bool() {
                    Ok(b) => b,
                    Err(kind) => return cx.fail(kind, span),
                };
                let decided = match op {
                    BinOp::LogAnd => !b,
                    _ => b,
                };
                if decided {
                    cx.finish_value(Value::bool(b))
                } else {
                    cx.top().pc = 2;
                    cx.push_expr(rhs)
                }
            }
            _ => {
                let v = cx.top().vals.pop().expect("rhs value");
                match v.as_bool() {
                    Ok(b) => cx.finish_value(Value::bool(b)),
                    Err(kind) => cx.fail(kind, span),
                }
            }
        };
    }

    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_expr(lhs)
        }
        1 => {
            cx.top().pc = 2;
            cx.push_expr(rhs)
        }
        _ => {
            let r = cx.top().vals.pop().expect("rhs value");
            let l = cx.top().vals.pop().expect("lhs value");
            match binary_values(cx, op, l, r) {
                Ok(v) => cx.finish_value(v),
                Err(kind) => cx.fail(kind, span),
            }
        }
    }
}

/// Apply a strict binary operator to two evaluated operands, consuming
/// both (pointer operands are released here).
pub(crate) fn binary_values(
    cx: &mut Cx,
    op: BinOp,
    lhs: Value,
    rhs: Value,
) -> Result<Value, RuntimeErrorKind> {
    use BinOp::*;

    // `+` with a string operand concatenates; defined operands of any
    // kind stringify.
    if op == Add && (matches!(lhs.data, Data::Str(_)) || matches!(rhs.data, Data::Str(_))) {
        if lhs.state == InitState::Undef || rhs.state == InitState::Undef {
            return Err(RuntimeErrorKind::NotInit);
        }
        let s = format!(
            "{}{}",
            lhs.stringify(&cx.proc.heap),
            rhs.stringify(&cx.proc.heap)
        );
        cx.release(&lhs);
        cx.release(&rhs);
        return Ok(Value::str(s));
    }

    if let (Data::Str(a), Data::Str(b)) = (&lhs.data, &rhs.data) {
        if lhs.state == InitState::Undef || rhs.state == InitState::Undef {
            return Err(RuntimeErrorKind::NotInit);
        }
        return Ok(Value::bool(match op {
            Eq => a == b,
            Ne => a != b,
            Lo => a < b,
            Hi => a > b,
            Ls => a <= b,
            Hs => a >= b,
            _ => unreachable!("string operator"),
        }));
    }

    // Pointer equality: destroyed targets compare as null.
    if matches!(lhs.data, Data::Pointer { .. }) && matches!(rhs.data, Data::Pointer { .. }) {
        if lhs.state == InitState::Undef || rhs.state == InitState::Undef {
            return Err(RuntimeErrorKind::NotInit);
        }
        let a = live_target(&cx.proc.heap, &lhs);
        let b = live_target(&cx.proc.heap, &rhs);
        let r = match op {
            Eq => a == b,
            Ne => a != b,
            _ => unreachable!("pointer operator"),
        };
        cx.release(&lhs);
        cx.release(&rhs);
        return Ok(Value::bool(r));
    }

    if let (Data::Bool(a), Data::Bool(b)) = (&lhs.data, &rhs.data) {
        if lhs.state == InitState::Undef || rhs.state == InitState::Undef {
            return Err(RuntimeErrorKind::NotInit);
        }
        let (a, b) = (*a, *b);
        return Ok(Value::bool(match op {
            Eq => a == b,
            Ne => a != b,
            BitAnd => a && b,
            BitOr => a || b,
            BitXor => a != b,
            _ => unreachable!("bool operator"),
        }));
    }

    if lhs.state == InitState::Undef || rhs.state == InitState::Undef {
        return Err(RuntimeErrorKind::NotInit);
    }
    // NaN poisons arithmetic and fails every comparison except `!=`.
    if lhs.state == InitState::Nan || rhs.state == InitState::Nan {
        return Ok(match op {
            Eq | Lo | Hi | Ls | Hs => Value::bool(false),
            Ne => Value::bool(true),
            _ => Value::nan(),
        });
    }

    let float = matches!(lhs.data, Data::Float(_)) || matches!(rhs.data, Data::Float(_));
    if float {
        let a = lhs.as_f32()?;
        let b = rhs.as_f32()?;
        let num = |r: f32| {
            if r.is_nan() {
                Value::nan()
            } else {
                Value::float(r)
            }
        };
        return Ok(match op {
            Add => num(a + b),
            Sub => num(a - b),
            Mul => num(a * b),
            Div => {
                if b == 0.0 {
                    return Err(RuntimeErrorKind::DivZero);
                }
                num(a / b)
            }
            Mod => {
                if b == 0.0 {
                    return Err(RuntimeErrorKind::DivZero);
                }
                num(a % b)
            }
            Power => num(a.powf(b)),
            Eq => Value::bool(a == b),
            Ne => Value::bool(a != b),
            Lo => Value::bool(a < b),
            Hi => Value::bool(a > b),
            Ls => Value::bool(a <= b),
            Hs => Value::bool(a >= b),
            _ => unreachable!("float operator"),
        });
    }

    let a = lhs.as_i32()?;
    let b = rhs.as_i32()?;
    Ok(match op {
        Add => Value::int(a.wrapping_add(b)),
        Sub => Value::int(a.wrapping_sub(b)),
        Mul => Value::int(a.wrapping_mul(b)),
        Div => {
            if b == 0 {
                return Err(RuntimeErrorKind::DivZero);
            }
            Value::int(a.wrapping_div(b))
        }
        Mod => {
            if b == 0 {
                return Err(RuntimeErrorKind::DivZero);
            }
            Value::int(a.wrapping_rem(b))
        }
        Power => {
            if b >= 0 {
                Value::int(a.wrapping_pow(b as u32))
            } else {
                let r = (a as f32).powf(b as f32);
                if r.is_nan() {
                    Value::nan()
                } else {
                    Value::float(r)
                }
            }
        }
        Shl => Value::int(a.wrapping_shl((b & 31) as u32)),
        Shr => Value::int(((a as u32) >> (b & 31) as u32) as i32),
        Asr => Value::int(a >> (b & 31)),
        BitAnd => Value::int(a & b),
        BitOr => Value::int(a | b),
        BitXor => Value::int(a ^ b),
        Eq => Value::bool(a == b),
        Ne => Value::bool(a != b),
        Lo => Value::bool(a < b),
        Hi => Value::bool(a > b),
        Ls => Value::bool(a <= b),
        Hs => Value::bool(a >= b),
        LogAnd | LogOr => unreachable!("short-circuit operator"),
    })
}

fn live_target(heap: &Heap, v: &Value) -> Option<Handle> {
    match &v.data {
        Data::Pointer {
            target: Some(h), ..
        } if heap.get(*h).is_some() && !heap.is_destroyed(*h) => Some(*h),
        _ => None,
    }
}

fn exec_unary(cx: &mut Cx, op: UnOp, expr: Expr, span: Span, pc: u8) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_expr(expr)
        }
        _ => {
            let v = cx.top().vals.pop().expect("operand value");
            let out = match op {
                UnOp::Neg => match v.state {
                    InitState::Undef => Err(RuntimeErrorKind::NotInit),
                    InitState::Nan => Ok(Value::nan()),
                    InitState::Def => match &v.data {
                        Data::Int(n) => Ok(Value::int(n.wrapping_neg())),
                        Data::Float(f) => Ok(Value::float(-f)),
                        _ => Err(RuntimeErrorKind::NotInit),
                    },
                },
                UnOp::Not => v.as_bool().map(|b| Value::bool(!b)),
                UnOp::BitNot => v.as_i32().map(|n| Value::int(!n)),
            };
            match out {
                Ok(v) => cx.finish_value(v),
                Err(kind) => cx.fail(kind, span),
            }
        }
    }
}

fn exec_ternary(cx: &mut Cx, cond: Expr, then_e: Expr, else_e: Expr, span: Span, pc: u8) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_expr(cond)
        }
        1 => {
            let v = cx.top().vals.pop().expect("condition value");
            let b = match v.as_bool() {
                Ok(b) => b,
                Err(kind) => return cx.fail(kind, span),
            };
            cx.top().pc = 2;
            cx.push_expr(if b { then_e } else { else_e })
        }
        _ => {
            let v = cx.top().vals.pop().expect("arm value");
            cx.finish_value(v)
        }
    }
}

/* ===================== Assignment ===================== */

fn compound_op(op: AssignOp) -> Option<BinOp> {
    match op {
        AssignOp::Set => None,
        AssignOp::Add => Some(BinOp::Add),
        AssignOp::Sub => Some(BinOp::Sub),
        AssignOp::Mul => Some(BinOp::Mul),
        AssignOp::Div => Some(BinOp::Div),
        AssignOp::Mod => Some(BinOp::Mod),
        AssignOp::And => Some(BinOp::BitAnd),
        AssignOp::Or => Some(BinOp::BitOr),
        AssignOp::Xor => Some(BinOp::BitXor),
        AssignOp::Shl => Some(BinOp::Shl),
        AssignOp::Shr => Some(BinOp::Shr),
        AssignOp::Asr => Some(BinOp::Asr),
    }
}

/// Adapt a value the script is about to store into a slot of `typ`:
/// numeric conversion, and a deep copy for intrinsic-class targets. The
/// input value's reference is consumed either way.
pub(crate) fn adopt_value(
    cx: &mut Cx,
    v: Value,
    typ: &TypeDesc,
) -> Result<Value, RuntimeErrorKind> {
    // Undef and nan states store as-is; the target slot takes the state.
    if v.state != InitState::Def {
        return Ok(v);
    }
    match (typ, &v.data) {
        (TypeDesc::Int, Data::Float(f)) => Ok(Value::int(*f as i32)),
        (TypeDesc::Float, Data::Int(n)) => Ok(Value::float(*n as f32)),
        (
            TypeDesc::Intrinsic(_),
            Data::Pointer {
                class,
                target: Some(h),
            },
        ) => {
            let class = *class;
            let Some(copy) = cx.proc.heap.deep_copy_instance(*h) else {
                cx.release(&v);
                return Err(RuntimeErrorKind::DeletedPtr);
            };
            cx.release(&v);
            Ok(Value {
                state: InitState::Def,
                data: Data::Pointer {
                    class,
                    target: Some(copy),
                },
            })
        }
        _ => Ok(v),
    }
}

fn exec_assign(cx: &mut Cx, op: AssignOp, target: Expr, value: Expr, span: Span, pc: u8) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_expr(value)
        }
        1 => match target {
            Expr::Var { ident, .. } => commit_var_assign(cx, op, ident, span),
            Expr::Field { base, .. } => {
                cx.top().pc = 2;
                cx.push_expr(*base)
            }
            Expr::Index { base, .. } => {
                cx.top().pc = 3;
                cx.push_expr(*base)
            }
            _ => unreachable!("assignable expression"),
        },
        2 => {
            let Expr::Field { name, .. } = target else {
                unreachable!("field assignment");
            };
            commit_field_assign(cx, op, &name, span)
        }
        3 => {
            let Expr::Index { index, .. } = target else {
                unreachable!("index assignment");
            };
            cx.top().pc = 4;
            cx.push_expr(*index)
        }
        _ => commit_index_assign(cx, op, span),
    }
}

fn commit_var_assign(cx: &mut Cx, op: AssignOp, ident: u32, span: Span) -> Step {
    let new = cx.top().vals.pop().expect("assigned value");
    let Some((typ, old)) = cx
        .lookup_var(ident)
        .map(|v| (v.typ.clone(), v.value.clone()))
    else {
        cx.release(&new);
        return cx.fail(RuntimeErrorKind::NoRun, span);
    };
    let merged = match compound_op(op) {
        Some(bop) => match binary_values(cx, bop, old, new) {
            Ok(v) => v,
            Err(kind) => return cx.fail(kind, span),
        },
        None => new,
    };
    let adopted = match adopt_value(cx, merged, &typ) {
        Ok(v) => v,
        Err(kind) => return cx.fail(kind, span),
    };
    let result = adopted.clone();
    cx.retain(&result);
    let prev = {
        let var = cx.lookup_var(ident).expect("assignment target");
        std::mem::replace(&mut var.value, adopted)
    };
    cx.release(&prev);
    cx.finish_value(result)
}

fn commit_field_assign(cx: &mut Cx, op: AssignOp, name: &str, span: Span) -> Step {
    let base_v = cx.top().vals.pop().expect("base value");
    let new = cx.top().vals.pop().expect("assigned value");
    let slot = match resolve_field(&cx.proc.heap, &cx.session.classes, &base_v, name) {
        Ok(s) => s,
        Err(kind) => {
            cx.release(&new);
            cx.release(&base_v);
            return cx.fail(kind, span);
        }
    };
    let (typ, old) = match &slot {
        FieldSlot::Instance(h, i) => match cx.proc.heap.get(*h) {
            Some(HeapObj::Instance { fields, .. }) => {
                (fields[*i].typ.clone(), fields[*i].value.clone())
            }
            _ => {
                cx.release(&new);
                cx.release(&base_v);
                return cx.fail(RuntimeErrorKind::DeletedPtr, span);
            }
        },
        FieldSlot::Static(c, i) => {
            let f = &cx.session.classes.get(*c).expect("resolved class").fields[*i];
            let old = f
                .static_value
                .clone()
                .unwrap_or_else(|| Value::undef(&f.typ));
            (f.typ.clone(), old)
        }
    };
    let merged = match compound_op(op) {
        Some(bop) => match binary_values(cx, bop, old, new) {
            Ok(v) => v,
            Err(kind) => {
                cx.release(&base_v);
                return cx.fail(kind, span);
            }
        },
        None => new,
    };
    let adopted = match adopt_value(cx, merged, &typ) {
        Ok(v) => v,
        Err(kind) => {
            cx.release(&base_v);
            return cx.fail(kind, span);
        }
    };
    let result = adopted.clone();
    cx.retain(&result);
    let prev = match slot {
        FieldSlot::Instance(h, i) => match cx.proc.heap.get_mut(h) {
            Some(HeapObj::Instance { fields, .. }) => {
                std::mem::replace(&mut fields[i].value, adopted)
            }
            _ => adopted,
        },
        FieldSlot::Static(c, i) => {
            let f = &mut cx
                .session
                .classes
                .get_mut(c)
                .expect("resolved class")
                .fields[i];
            let typ = f.typ.clone();
            f.static_value
                .replace(adopted)
                .unwrap_or_else(|| Value::undef(&typ))
        }
    };
    cx.release(&prev);
    cx.release(&base_v);
    cx.finish_value(result)
}

fn commit_index_assign(cx: &mut Cx, op: AssignOp, span: Span) -> Step {
    let idx_v = cx.top().vals.pop().expect("index value");
    let base_v = cx.top().vals.pop().expect("base value");
    let new = cx.top().vals.pop().expect("assigned value");

    let prepared = (|| {
        let h = array_handle(&base_v)?;
        let i = idx_v.as_i32()?;
        if i < 0 {
            return Err(RuntimeErrorKind::OutArray);
        }
        let i = i as usize;
        let Some(HeapObj::Array { elem, bound, elems }) = cx.proc.heap.get_mut(h) else {
            return Err(RuntimeErrorKind::DeletedPtr);
        };
        // Writes may grow an array up to its declared bound.
        if let Some(b) = bound {
            if i >= *b {
                return Err(RuntimeErrorKind::OutArray);
            }
        }
        let elem = elem.clone();
        while elems.len() <= i {
            elems.push(Value::undef(&elem));
        }
        Ok((h, i, elem, elems[i].clone()))
    })();
    let (h, i, typ, old) = match prepared {
        Ok(p) => p,
        Err(kind) => {
            cx.release(&new);
            cx.release(&base_v);
            return cx.fail(kind, span);
        }
    };

    let merged = match compound_op(op) {
        Some(bop) => match binary_values(cx, bop, old, new) {
            Ok(v) => v,
            Err(kind) => {
                cx.release(&base_v);
                return cx.fail(kind, span);
            }
        },
        None => new,
    };
    let adopted = match adopt_value(cx, merged, &typ) {
        Ok(v) => v,
        Err(kind) => {
            cx.release(&base_v);
            return cx.fail(kind, span);
        }
    };
    let result = adopted.clone();
    cx.retain(&result);
    let prev = match cx.proc.heap.get_mut(h) {
        Some(HeapObj::Array { elems, .. }) => std::mem::replace(&mut elems[i], adopted),
        _ => adopted,
    };
    cx.release(&prev);
    cx.release(&base_v);
    cx.finish_value(result)
}

/* ===================== Increment / decrement ===================== */

fn apply_step(old: &Value, decr: bool) -> Result<Value, RuntimeErrorKind> {
    match old.state {
        InitState::Undef => Err(RuntimeErrorKind::NotInit),
        InitState::Nan => Ok(Value::nan()),
        InitState::Def => match &old.data {
            Data::Int(n) => Ok(Value::int(if decr {
                n.wrapping_sub(1)
            } else {
                n.wrapping_add(1)
            })),
            Data::Float(f) => Ok(Value::float(if decr { f - 1.0 } else { f + 1.0 })),
            _ => Err(RuntimeErrorKind::NotInit),
        },
    }
}

fn exec_incr_decr(cx: &mut Cx, target: Expr, decr: bool, prefix: bool, span: Span, pc: u8) -> Step {
    match (&target, pc) {
        (Expr::Var { ident, .. }, _) => {
            let ident = *ident;
            let Some(old) = cx.lookup_var(ident).map(|v| v.value.clone()) else {
                return cx.fail(RuntimeErrorKind::NoRun, span);
            };
            let new = match apply_step(&old, decr) {
                Ok(v) => v,
                Err(kind) => return cx.fail(kind, span),
            };
            let result = if prefix { new.clone() } else { old };
            cx.lookup_var(ident).expect("step target").value = new;
            cx.finish_value(result)
        }
        (Expr::Field { base, .. }, 0) => {
            let base = (**base).clone();
            cx.top().pc = 1;
            cx.push_expr(base)
        }
        (Expr::Field { name, .. }, _) => {
            let name = name.clone();
            let base_v = cx.top().vals.pop().expect("base value");
            let stepped = (|cx: &mut Cx| {
                let slot = resolve_field(&cx.proc.heap, &cx.session.classes, &base_v, &name)?;
                let old = match &slot {
                    FieldSlot::Instance(h, i) => match cx.proc.heap.get(*h) {
                        Some(HeapObj::Instance { fields, .. }) => fields[*i].value.clone(),
                        _ => return Err(RuntimeErrorKind::DeletedPtr),
                    },
                    FieldSlot::Static(c, i) => {
                        let f = &cx.session.classes.get(*c).expect("resolved class").fields[*i];
                        f.static_value
                            .clone()
                            .unwrap_or_else(|| Value::undef(&f.typ))
                    }
                };
                let new = apply_step(&old, decr)?;
                match slot {
                    FieldSlot::Instance(h, i) => {
                        if let Some(HeapObj::Instance { fields, .. }) = cx.proc.heap.get_mut(h) {
                            fields[i].value = new.clone();
                        }
                    }
                    FieldSlot::Static(c, i) => {
                        if let Some(d) = cx.session.classes.get_mut(c) {
                            d.fields[i].static_value = Some(new.clone());
                        }
                    }
                }
                Ok(if prefix { new } else { old })
            })(cx);
            cx.release(&base_v);
            match stepped {
                Ok(v) => cx.finish_value(v),
                Err(kind) => cx.fail(kind, span),
            }
        }
        (Expr::Index { base, .. }, 0) => {
            let base = (**base).clone();
            cx.top().pc = 1;
            cx.push_expr(base)
        }
        (Expr::Index { index, .. }, 1) => {
            let index = (**index).clone();
            cx.top().pc = 2;
            cx.push_expr(index)
        }
        (Expr::Index { .. }, _) => {
            let idx_v = cx.top().vals.pop().expect("index value");
            let base_v = cx.top().vals.pop().expect("base value");
            let stepped = (|cx: &mut Cx| {
                let h = array_handle(&base_v)?;
                let i = idx_v.as_i32()?;
                let Some(HeapObj::Array { elems, .. }) = cx.proc.heap.get_mut(h) else {
                    return Err(RuntimeErrorKind::DeletedPtr);
                };
                if i < 0 || i as usize >= elems.len() {
                    return Err(RuntimeErrorKind::OutArray);
                }
                let old = elems[i as usize].clone();
                let new = apply_step(&old, decr)?;
                elems[i as usize] = new.clone();
                Ok(if prefix { new } else { old })
            })(cx);
            cx.release(&base_v);
            match stepped {
                Ok(v) => cx.finish_value(v),
                Err(kind) => cx.fail(kind, span),
            }
        }
        _ => unreachable!("steppable expression"),
    }
}

/* ===================== Calls ===================== */

fn bind_params(
    cx: &mut Cx,
    params: &[crate::classes::Param],
    argv: Vec<Value>,
) -> Result<Vec<Var>, RuntimeErrorKind> {
    let mut locals = Vec::with_capacity(params.len());
    for (p, v) in params.iter().zip(argv) {
        match adopt_value(cx, v, &p.typ) {
            Ok(v) => locals.push(Var {
                ident: p.ident,
                name: p.name.clone(),
                typ: p.typ.clone(),
                value: v,
            }),
            Err(kind) => {
                for var in &locals {
                    cx.release(&var.value);
                }
                return Err(kind);
            }
        }
    }
    Ok(locals)
}

fn exec_call(
    cx: &mut Cx,
    target: CallTarget,
    name: String,
    args: Vec<Expr>,
    span: Span,
    pc: u8,
) -> Step {
    match pc {
        0 => {
            let done = cx.top().vals.len();
            if done < args.len() {
                return cx.push_expr(args[done].clone());
            }
            match target {
                CallTarget::User { index } => {
                    let Some(func) = cx.program.funcs.get(index) else {
                        return cx.fail(RuntimeErrorKind::UndefFunc, span);
                    };
                    let (params, ret_void, body, fname) = (
                        func.params.clone(),
                        func.ret == TypeDesc::Void,
                        func.body.clone(),
                        func.name.clone(),
                    );
                    let argv: Vec<Value> = cx.top().vals.drain(..).collect();
                    let locals = match bind_params(cx, &params, argv) {
                        Ok(l) => l,
                        Err(kind) => return cx.fail(kind, span),
                    };
                    cx.top().pc = 1;
                    cx.push_frame(Frame::call(body, locals, FnInfo::call(fname, None, ret_void)))
                }
                CallTarget::Extern { .. } => {
                    cx.top().pc = 1;
                    invoke_extern(cx, &name, None, span)
                }
            }
        }
        _ => match target {
            CallTarget::User { .. } => {
                let v = cx.top().vals.pop().expect("call result");
                cx.finish_value(v)
            }
            // Re-entered after a pending host call suspended.
            CallTarget::Extern { .. } => invoke_extern(cx, &name, None, span),
        },
    }
}

/// Run a registered host function against the current frame's argument
/// values. `Pending` suspends the process with the frame (and its JSON
/// state slot) intact, so the next run re-invokes at the same spot.
fn invoke_extern(cx: &mut Cx, name: &str, this: Option<Handle>, span: Span) -> Step {
    let skip = if this.is_some() { 1 } else { 0 };
    let outcome = {
        let Some(slot) = cx.session.externals.find(name) else {
            return cx.fail(RuntimeErrorKind::UndefFunc, span);
        };
        let frame = cx.proc.frames.last_mut().expect("frame stack not empty");
        let mut result = Value::void();
        let mut ctx = ExternCtx {
            args: &mut frame.vals[skip..],
            result: &mut result,
            this,
            state: &mut frame.host_state,
            heap: &mut cx.proc.heap,
            host: &mut *cx.host,
        };
        (slot.exec)(&mut ctx).map(|s| (s, result))
    };
    match outcome {
        Ok((ExternStatus::Done, result)) => finish_call_value(cx, this.is_some(), result),
        Ok((ExternStatus::Pending, _)) => {
            cx.proc.control = Control::Suspend;
            Step::Continue
        }
        Err(code) => cx.fail(RuntimeErrorKind::User(code), span),
    }
}

/// Deliver a call result, releasing the receiver value a method call keeps
/// at the bottom of its stack.
fn finish_call_value(cx: &mut Cx, has_base: bool, v: Value) -> Step {
    if has_base {
        let base = cx.top().vals.remove(0);
        cx.release(&base);
    }
    cx.finish_value(v)
}

fn exec_method_call(
    cx: &mut Cx,
    base: Expr,
    target: MethodTarget,
    name: String,
    args: Vec<Expr>,
    span: Span,
    pc: u8,
) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_expr(base)
        }
        1 => {
            let done = cx.top().vals.len() - 1;
            if done < args.len() {
                return cx.push_expr(args[done].clone());
            }
            let recv = cx.top().vals[0].clone();
            let (h, actual) = match receiver(&cx.proc.heap, &recv) {
                Ok(p) => p,
                Err(kind) => return cx.fail(kind, span),
            };
            match target {
                MethodTarget::Compiled { class, index } => {
                    dispatch_compiled(cx, class, index, h, actual, span)
                }
                MethodTarget::Extern { .. } => {
                    let Some((owner, ei)) = cx.session.classes.find_extern_method(actual, &name)
                    else {
                        return cx.fail(RuntimeErrorKind::UndefFunc, span);
                    };
                    invoke_extern_method(cx, owner, ei, h, span)
                }
            }
        }
        _ => {
            let ret = cx.top().vals.pop().expect("method result");
            finish_call_value(cx, true, ret)
        }
    }
}

fn receiver(heap: &Heap, recv: &Value) -> Result<(Handle, ClassId), RuntimeErrorKind> {
    if recv.state == InitState::Undef {
        return Err(RuntimeErrorKind::NotInit);
    }
    let Data::Pointer { target, .. } = &recv.data else {
        return Err(RuntimeErrorKind::NotInit);
    };
    let Some(h) = target else {
        return Err(RuntimeErrorKind::NullPointer);
    };
    match heap.get(*h) {
        Some(HeapObj::Instance {
            class,
            destroyed: false,
            ..
        }) => Ok((*h, *class)),
        _ => Err(RuntimeErrorKind::DeletedPtr),
    }
}

fn dispatch_compiled(
    cx: &mut Cx,
    class: ClassId,
    index: usize,
    h: Handle,
    actual: ClassId,
    span: Span,
) -> Step {
    // Re-resolve against the instance's actual class for virtual dispatch.
    let (mname, params) = {
        let Some(m) = cx
            .session
            .classes
            .get(class)
            .and_then(|d| d.methods.get(index))
        else {
            return cx.fail(RuntimeErrorKind::UndefFunc, span);
        };
        (m.name.clone(), m.params.clone())
    };
    let Some((owner, midx)) = cx.session.classes.dispatch(actual, &mname, &params) else {
        return cx.fail(RuntimeErrorKind::UndefFunc, span);
    };
    let (body, ret_void, is_sync) = {
        let m = &cx.session.classes.get(owner).expect("dispatched class").methods[midx];
        (m.body.clone(), m.ret == TypeDesc::Void, m.is_synchronized)
    };
    if cx.proc.frames.len() >= cx.proc.max_frames {
        return cx.fail(RuntimeErrorKind::StackOver, span);
    }
    if is_sync {
        let pid = cx.proc.id;
        let lock = &mut cx.session.classes.get_mut(owner).expect("dispatched class").lock;
        match lock.try_lock(pid) {
            LockOutcome::Acquired => {}
            LockOutcome::Waiting => {
                cx.proc.control = Control::Suspend;
                return Step::Continue;
            }
            LockOutcome::QueueFull => return cx.fail(RuntimeErrorKind::StackOver, span),
        }
    }
    let argv: Vec<Value> = cx.top().vals.split_off(1);
    let locals = match bind_params(cx, &params, argv) {
        Ok(l) => l,
        Err(kind) => {
            if is_sync {
                let pid = cx.proc.id;
                if let Some(d) = cx.session.classes.get_mut(owner) {
                    d.lock.unlock(pid);
                }
            }
            return cx.fail(kind, span);
        }
    };
    let mut info = FnInfo::call(mname, Some(h), ret_void);
    if is_sync {
        info.sync_class = Some(owner);
    }
    cx.top().pc = 2;
    cx.push_frame(Frame::call(body, locals, info))
}

fn invoke_extern_method(cx: &mut Cx, owner: ClassId, ei: usize, h: Handle, span: Span) -> Step {
    let outcome = {
        let slot = &cx
            .session
            .classes
            .get(owner)
            .expect("resolved class")
            .extern_methods[ei]
            .slot;
        let frame = cx.proc.frames.last_mut().expect("frame stack not empty");
        let mut result = Value::void();
        let mut ctx = ExternCtx {
            args: &mut frame.vals[1..],
            result: &mut result,
            this: Some(h),
            state: &mut frame.host_state,
            heap: &mut cx.proc.heap,
            host: &mut *cx.host,
        };
        (slot.exec)(&mut ctx).map(|s| (s, result))
    };
    match outcome {
        Ok((ExternStatus::Done, result)) => finish_call_value(cx, true, result),
        Ok((ExternStatus::Pending, _)) => {
            cx.proc.control = Control::Suspend;
            Step::Continue
        }
        Err(code) => cx.fail(RuntimeErrorKind::User(code), span),
    }
}

/* ===================== Construction ===================== */

/// Instance field slots carrying a default expression, in instance layout
/// order.
fn instance_defaults(
    classes: &ClassRegistry,
    class: ClassId,
) -> Vec<(usize, Expr, TypeDesc)> {
    let mut chain = Vec::new();
    let mut cur = Some(class);
    while let Some(id) = cur {
        chain.push(id);
        cur = classes.get(id).and_then(|c| c.parent);
    }
    let mut out = Vec::new();
    let mut slot = 0;
    for id in chain.into_iter().rev() {
        let Some(def) = classes.get(id) else { continue };
        for f in def.fields.iter().filter(|f| !f.is_static) {
            if let Some(e) = &f.default {
                out.push((slot, e.clone(), f.typ.clone()));
            }
            slot += 1;
        }
    }
    out
}

/// A fresh instance with undefined fields, for intrinsic-class variable
/// declarations. Field defaults only run through `new`.
pub(crate) fn new_instance(heap: &mut Heap, classes: &ClassRegistry, class: ClassId) -> Value {
    let fields = classes.instance_fields(class);
    let h = heap.alloc(HeapObj::Instance {
        class,
        fields,
        destroyed: false,
    });
    Value {
        state: InitState::Def,
        data: Data::Pointer {
            class,
            target: Some(h),
        },
    }
}

fn exec_new(
    cx: &mut Cx,
    class: ClassId,
    ctor: Option<usize>,
    args: Vec<Expr>,
    span: Span,
    pc: u8,
) -> Step {
    match pc {
        0 => {
            if cx.session.classes.get(class).is_none() {
                return cx.fail(RuntimeErrorKind::NotClass, span);
            }
            let v = new_instance(&mut cx.proc.heap, &cx.session.classes, class);
            let frame = cx.top();
            frame.vals.push(v);
            frame.pc = 1;
            Step::Continue
        }
        // Field defaults evaluate one by one under a fenced frame, so
        // `this` resolves to the new instance and caller locals stay out
        // of scope.
        1 => {
            let defaults = instance_defaults(&cx.session.classes, class);
            if cx.top().vals.len() == 2 {
                let v = cx.top().vals.pop().expect("default value");
                let (slot, _, typ) = &defaults[cx.top().idx - 1];
                let (slot, typ) = (*slot, typ.clone());
                let adopted = match adopt_value(cx, v, &typ) {
                    Ok(v) => v,
                    Err(kind) => return cx.fail(kind, span),
                };
                let h = instance_handle(&cx.top().vals[0]);
                if let Some(HeapObj::Instance { fields, .. }) = cx.proc.heap.get_mut(h) {
                    fields[slot].value = adopted;
                }
            }
            let next = cx.top().idx;
            if next < defaults.len() {
                let h = instance_handle(&cx.top().vals[0]);
                cx.top().idx += 1;
                let mut f = Frame::expr(defaults[next].1.clone());
                let mut info = FnInfo::call("<init>", Some(h), false);
                info.deliver = false;
                f.fn_info = Some(info);
                return cx.push_frame(f);
            }
            let frame = cx.top();
            frame.idx = 0;
            frame.pc = 2;
            Step::Continue
        }
        2 => {
            let done = cx.top().vals.len() - 1;
            if done < args.len() {
                return cx.push_expr(args[done].clone());
            }
            let Some(mi) = ctor else {
                cx.top().pc = 3;
                return Step::Continue;
            };
            let h = instance_handle(&cx.top().vals[0]);
            let (mname, params, body, is_sync) = {
                let Some(m) = cx
                    .session
                    .classes
                    .get(class)
                    .and_then(|d| d.methods.get(mi))
                else {
                    return cx.fail(RuntimeErrorKind::UndefFunc, span);
                };
                (m.name.clone(), m.params.clone(), m.body.clone(), m.is_synchronized)
            };
            if cx.proc.frames.len() >= cx.proc.max_frames {
                return cx.fail(RuntimeErrorKind::StackOver, span);
            }
            if is_sync {
                let pid = cx.proc.id;
                let lock = &mut cx.session.classes.get_mut(class).expect("checked class").lock;
                match lock.try_lock(pid) {
                    LockOutcome::Acquired => {}
                    LockOutcome::Waiting => {
                        cx.proc.control = Control::Suspend;
                        return Step::Continue;
                    }
                    LockOutcome::QueueFull => return cx.fail(RuntimeErrorKind::StackOver, span),
                }
            }
            let argv: Vec<Value> = cx.top().vals.split_off(1);
            let locals = match bind_params(cx, &params, argv) {
                Ok(l) => l,
                Err(kind) => {
                    if is_sync {
                        let pid = cx.proc.id;
                        if let Some(d) = cx.session.classes.get_mut(class) {
                            d.lock.unlock(pid);
                        }
                    }
                    return cx.fail(kind, span);
                }
            };
            let mut info = FnInfo::call(mname, Some(h), true);
            info.deliver = false;
            if is_sync {
                info.sync_class = Some(class);
            }
            cx.top().pc = 3;
            cx.push_frame(Frame::call(body, locals, info))
        }
        _ => {
            let ptr = cx.top().vals.pop().expect("instance pointer");
            cx.finish_value(ptr)
        }
    }
}

fn instance_handle(v: &Value) -> Handle {
    match &v.data {
        Data::Pointer {
            target: Some(h), ..
        } => *h,
        _ => unreachable!("instance pointer"),
    }
}
