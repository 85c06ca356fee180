//! Statement handlers
//!
//! Each statement type is a small phase machine over its frame's `pc`.
//! Handlers mutate the top frame in place, push child frames for
//! subexpressions and substatements, and complete via `finish_stmt`.

use super::control::Control;
use super::exec_loop::{Cx, Step};
use super::expressions::{adopt_value, new_instance};
use crate::compiler::ast::{CaseLabel, CatchArm, Decl, Expr, Instr};
use crate::error::{RuntimeErrorKind, Span};
use crate::typesys::{Data, Heap, HeapObj, InitState, TypeDesc, Value, Var};

/// Phase a `continue` rewinds each loop kind to.
pub(crate) mod loop_reset_pc {
    pub const WHILE: u8 = 0;
    pub const DO_WHILE: u8 = 1;
    pub const FOR: u8 = 3;
    pub const REPEAT: u8 = 2;
}

pub(crate) fn exec_stmt(cx: &mut Cx, instr: Instr, pc: u8) -> Step {
    match instr {
        Instr::Block { body, .. } => exec_block(cx, body),
        Instr::VarDecl { decls, span } => exec_var_decl(cx, decls, span, pc),
        Instr::ExprStmt { expr, .. } => exec_expr_stmt(cx, expr, pc),
        Instr::If {
            cond,
            then_s,
            else_s,
            span,
        } => exec_if(cx, cond, *then_s, else_s.map(|b| *b), span, pc),
        Instr::While { cond, body, .. } => exec_while(cx, cond, *body, pc),
        Instr::DoWhile { body, cond, .. } => exec_do_while(cx, *body, cond, pc),
        Instr::For {
            init,
            cond,
            incr,
            body,
            ..
        } => exec_for(cx, init.map(|b| *b), cond, incr, *body, pc),
        Instr::Repeat { count, body, span, .. } => exec_repeat(cx, count, *body, span, pc),
        Instr::Switch {
            value,
            body,
            cases,
            span,
        } => exec_switch(cx, value, body, cases, span, pc),
        Instr::Break { label, .. } => {
            cx.proc.control = Control::Break(label);
            Step::Continue
        }
        Instr::Continue { label, .. } => {
            cx.proc.control = Control::Continue(label);
            Step::Continue
        }
        Instr::Return { value, span } => exec_return(cx, value, span, pc),
        Instr::Throw { value, span } => exec_throw(cx, value, span, pc),
        Instr::Try {
            body,
            catches,
            finally,
            ..
        } => exec_try(cx, *body, catches, finally.map(|b| *b), pc),
    }
}

/* ===================== Blocks and declarations ===================== */

fn exec_block(cx: &mut Cx, body: Vec<Instr>) -> Step {
    let frame = cx.top();
    if frame.idx < body.len() {
        let next = body[frame.idx].clone();
        frame.idx += 1;
        return cx.push_stmt(next);
    }
    cx.finish_stmt()
}

/// Declarations run declarator by declarator: dimension expressions, then
/// the initializer, then the commit that installs the variable into the
/// parent frame (the enclosing block, or the `for` header frame).
fn exec_var_decl(cx: &mut Cx, decls: Vec<Decl>, span: Span, pc: u8) -> Step {
    let decl_idx = cx.top().idx;
    let Some(decl) = decls.get(decl_idx) else {
        return cx.finish_stmt();
    };
    let decl = decl.clone();

    match pc {
        // Evaluate dimension expressions left to right; unbounded
        // dimensions contribute a placeholder.
        0 => {
            let done = cx.top().vals.len();
            if done < decl.dims.len() {
                return match &decl.dims[done] {
                    Some(e) => cx.push_expr(e.clone()),
                    None => {
                        cx.top().vals.push(Value::int(0));
                        Step::Continue
                    }
                };
            }
            cx.top().pc = 1;
            Step::Continue
        }
        1 => match &decl.init {
            Some(e) => {
                cx.top().pc = 2;
                cx.push_expr(e.clone())
            }
            None => {
                cx.top().pc = 3;
                Step::Continue
            }
        },
        // Commit, with (2) or without (3) an initializer value.
        2 | 3 => {
            let init = if pc == 2 { cx.top().vals.pop() } else { None };

            let value = if let Some(v) = init {
                match adopt_value(cx, v, &decl.typ) {
                    Ok(v) => v,
                    Err(kind) => return cx.fail(kind, span),
                }
            } else if !decl.dims.is_empty() {
                // Fixed bounds allocate eagerly so the declared shape exists.
                let mut bounds = Vec::with_capacity(decl.dims.len());
                for (dim, v) in decl.dims.iter().zip(&cx.top().vals.clone()) {
                    if dim.is_none() {
                        bounds.push(None);
                        continue;
                    }
                    match v.as_i32() {
                        Ok(n) if n >= 0 => bounds.push(Some(n as usize)),
                        Ok(_) => return cx.fail(RuntimeErrorKind::OutArray, span),
                        Err(kind) => return cx.fail(kind, span),
                    }
                }
                alloc_array(&mut cx.proc.heap, &decl.typ, &bounds)
            } else if let TypeDesc::Intrinsic(c) = decl.typ {
                // Value-semantics instances exist from the declaration on;
                // their fields start undefined.
                new_instance(&mut cx.proc.heap, &cx.session.classes, c)
            } else {
                Value::undef(&decl.typ)
            };

            let var = Var {
                ident: decl.ident,
                name: decl.name.clone(),
                typ: decl.typ.clone(),
                value,
            };
            let parent = cx.proc.frames.len() - 2;
            cx.proc.frames[parent].locals.push(var);

            let frame = cx.top();
            frame.idx += 1;
            frame.vals.clear();
            frame.pc = 0;
            Step::Continue
        }
        _ => unreachable!("declaration phase"),
    }
}

/// Build the declared array shape. Bounded dimensions preallocate
/// undefined elements; unbounded ones start empty and grow on write.
fn alloc_array(heap: &mut Heap, typ: &TypeDesc, bounds: &[Option<usize>]) -> Value {
    let TypeDesc::Array { elem, .. } = typ else {
        return Value::undef(typ);
    };
    let bound = bounds.first().copied().flatten();
    let elems = match bound {
        Some(n) => (0..n)
            .map(|_| {
                if bounds.len() > 1 {
                    alloc_array(heap, elem, &bounds[1..])
                } else {
                    Value::undef(elem)
                }
            })
            .collect(),
        None => Vec::new(),
    };
    let h = heap.alloc(HeapObj::Array {
        elem: (**elem).clone(),
        bound,
        elems,
    });
    Value {
        state: InitState::Def,
        data: Data::Array(h),
    }
}

fn exec_expr_stmt(cx: &mut Cx, expr: Expr, pc: u8) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_expr(expr)
        }
        _ => {
            if let Some(v) = cx.top().vals.pop() {
                cx.release(&v);
            }
            cx.finish_stmt()
        }
    }
}

/* ===================== Conditionals and loops ===================== */

fn exec_if(
    cx: &mut Cx,
    cond: Expr,
    then_s: Instr,
    else_s: Option<Instr>,
    span: Span,
    pc: u8,
) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_expr(cond)
        }
        1 => {
            let v = cx.top().vals.pop().expect("condition value");
            let taken = match v.as_bool() {
                Ok(b) => b,
                Err(kind) => return cx.fail(kind, span),
            };
            cx.top().pc = 2;
            if taken {
                cx.push_stmt(then_s)
            } else if let Some(e) = else_s {
                cx.push_stmt(e)
            } else {
                Step::Continue
            }
        }
        _ => cx.finish_stmt(),
    }
}

fn exec_while(cx: &mut Cx, cond: Expr, body: Instr, pc: u8) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_expr(cond.clone())
        }
        _ => {
            let span = cond.span();
            let v = cx.top().vals.pop().expect("condition value");
            let again = match v.as_bool() {
                Ok(b) => b,
                Err(kind) => return cx.fail(kind, span),
            };
            if again {
                cx.top().pc = 0;
                cx.push_stmt(body)
            } else {
                cx.finish_stmt()
            }
        }
    }
}

fn exec_do_while(cx: &mut Cx, body: Instr, cond: Expr, pc: u8) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_stmt(body)
        }
        1 => {
            cx.top().pc = 2;
            cx.push_expr(cond)
        }
        _ => {
            let span = cond.span();
            let v = cx.top().vals.pop().expect("condition value");
            let again = match v.as_bool() {
                Ok(b) => b,
                Err(kind) => return cx.fail(kind, span),
            };
            if again {
                cx.top().pc = 1;
                cx.push_stmt(body)
            } else {
                cx.finish_stmt()
            }
        }
    }
}

fn exec_for(
    cx: &mut Cx,
    init: Option<Instr>,
    cond: Option<Expr>,
    incr: Option<Expr>,
    body: Instr,
    pc: u8,
) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            match init {
                Some(i) => cx.push_stmt(i),
                None => Step::Continue,
            }
        }
        1 => {
            cx.top().pc = 2;
            match cond {
                Some(c) => cx.push_expr(c),
                None => {
                    cx.top().vals.push(Value::bool(true));
                    Step::Continue
                }
            }
        }
        2 => {
            let span = cond.as_ref().map(|c| c.span()).unwrap_or_else(|| body.span());
            let v = cx.top().vals.pop().expect("condition value");
            let again = match v.as_bool() {
                Ok(b) => b,
                Err(kind) => return cx.fail(kind, span),
            };
            if again {
                cx.top().pc = 3;
                cx.push_stmt(body)
            } else {
                cx.finish_stmt()
            }
        }
        3 => {
            cx.top().pc = 4;
            match incr {
                Some(e) => cx.push_expr(e),
                None => {
                    cx.top().pc = 1;
                    Step::Continue
                }
            }
        }
        _ => {
            if let Some(v) = cx.top().vals.pop() {
                cx.release(&v);
            }
            cx.top().pc = 1;
            Step::Continue
        }
    }
}

fn exec_repeat(cx: &mut Cx, count: Expr, body: Instr, span: Span, pc: u8) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_expr(count)
        }
        1 => {
            let v = cx.top().vals.pop().expect("count value");
            let n = match v.as_i32() {
                Ok(n) => n,
                Err(kind) => return cx.fail(kind, span),
            };
            if n <= 0 {
                return cx.finish_stmt();
            }
            let frame = cx.top();
            frame.idx = n as usize;
            frame.pc = 2;
            Step::Continue
        }
        _ => {
            let frame = cx.top();
            if frame.idx == 0 {
                return cx.finish_stmt();
            }
            frame.idx -= 1;
            cx.push_stmt(body)
        }
    }
}

fn exec_switch(
    cx: &mut Cx,
    value: Expr,
    body: Vec<Instr>,
    cases: Vec<CaseLabel>,
    span: Span,
    pc: u8,
) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_expr(value)
        }
        1 => {
            let v = cx.top().vals.pop().expect("switch value");
            let n = match v.as_i32() {
                Ok(n) => n,
                Err(kind) => return cx.fail(kind, span),
            };
            let hit = cases
                .iter()
                .find(|c| c.value == Some(n))
                .or_else(|| cases.iter().find(|c| c.value.is_none()));
            let Some(case) = hit else {
                return cx.finish_stmt();
            };
            let frame = cx.top();
            frame.idx = case.body_index;
            frame.pc = 2;
            Step::Continue
        }
        // Fall-through is a plain index walk; `break` unwinds to this frame.
        _ => {
            let frame = cx.top();
            if frame.idx >= body.len() {
                return cx.finish_stmt();
            }
            let next = body[frame.idx].clone();
            frame.idx += 1;
            cx.push_stmt(next)
        }
    }
}

/* ===================== Jumps ===================== */

fn exec_return(cx: &mut Cx, value: Option<Expr>, _span: Span, pc: u8) -> Step {
    match pc {
        0 => match value {
            Some(e) => {
                cx.top().pc = 1;
                cx.push_expr(e)
            }
            None => {
                cx.proc.control = Control::Return(Value::void());
                Step::Continue
            }
        },
        _ => {
            let v = cx.top().vals.pop().expect("return value");
            cx.proc.control = Control::Return(v);
            Step::Continue
        }
    }
}

fn exec_throw(cx: &mut Cx, value: Expr, span: Span, pc: u8) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_expr(value)
        }
        _ => {
            let v = cx.top().vals.pop().expect("thrown value");
            let code = match v.as_i32() {
                Ok(n) => n,
                Err(kind) => return cx.fail(kind, span),
            };
            if code <= 0 {
                return cx.fail(RuntimeErrorKind::BadThrow, span);
            }
            cx.fail(RuntimeErrorKind::User(code), span)
        }
    }
}

/* ===================== Try / catch / finally ===================== */

/// Phases: 0 start, 1 body running, 2 pick a catch arm, 3 guard evaluated,
/// 4 finally running, 5 catch body running. Unwind puts the frame into
/// phase 2 (caught throw) or 4 (finally before propagating).
fn exec_try(
    cx: &mut Cx,
    body: Instr,
    catches: Vec<CatchArm>,
    finally: Option<Instr>,
    pc: u8,
) -> Step {
    match pc {
        0 => {
            cx.top().pc = 1;
            cx.push_stmt(body)
        }
        // Body or catch arm completed without incident.
        1 | 5 => match finally {
            Some(f) => {
                let frame = cx.top();
                frame.pc = 4;
                frame.stash = None;
                cx.push_stmt(f)
            }
            None => cx.finish_stmt(),
        },
        2 => {
            let idx = cx.top().idx;
            let Some(arm) = catches.get(idx) else {
                // No arm claimed it; re-raise (unwind then runs finally).
                let stashed = cx.top().stash.take().unwrap_or(Control::None);
                cx.proc.control = stashed;
                return Step::Continue;
            };
            cx.top().pc = 3;
            cx.push_expr(arm.guard.clone())
        }
        3 => {
            let v = cx.top().vals.pop().expect("guard value");
            let thrown = match &cx.top().stash {
                Some(Control::Throw { kind, .. }) => *kind,
                _ => unreachable!("catch without a stashed throw"),
            };
            let span = catches[cx.top().idx].guard.span();
            let matched = match &v.data {
                Data::Bool(b) => *b,
                _ => match v.as_i32() {
                    Ok(code) => thrown.matches_code(code),
                    Err(kind) => return cx.fail(kind, span),
                },
            };
            if matched {
                let idx = cx.top().idx;
                let frame = cx.top();
                frame.stash = None;
                frame.pc = 5;
                let arm_body = (*catches[idx].body).clone();
                cx.push_stmt(arm_body)
            } else {
                let frame = cx.top();
                frame.idx += 1;
                frame.pc = 2;
                Step::Continue
            }
        }
        // Finally completed; resume whatever was pending.
        4 => {
            let frame = cx.top();
            match frame.stash.take() {
                Some(c) => {
                    frame.pc = 6;
                    cx.proc.control = c;
                    Step::Continue
                }
                None => cx.finish_stmt(),
            }
        }
        _ => unreachable!("try phase"),
    }
}
