//! Statement compilation.
//!
//! Statements dispatch on their leading token. Loop labels are validated
//! here so `break`/`continue` never have to search for a target at run
//! time, and `switch` bodies are flattened into a single instruction list
//! with case labels pointing into it, which keeps fall-through a plain
//! index walk.

use super::ast::{CaseLabel, CatchArm, Decl, Expr, Instr};
use super::expr::compile_expr;
use super::{try_parse_type, CompileCtx, Toks};
use crate::error::CompileErrorKind;
use crate::lexer::{Kw, TokenKind};
use crate::typesys::TypeDesc;

/// Compile one statement. `None` means an error was recorded in `ctx`.
pub fn compile_stmt(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Instr> {
    // A label may only precede a loop statement.
    if tk.peek().kind == TokenKind::Ident && tk.peek_at(1).is_kw(Kw::Colon) {
        let label = tk.peek().text.clone();
        let label_span = tk.span();
        tk.bump();
        tk.bump();
        return match tk.peek().keyword() {
            Some(Kw::While) => compile_while(tk, ctx, Some(label)),
            Some(Kw::Do) => compile_do_while(tk, ctx, Some(label)),
            Some(Kw::For) => compile_for(tk, ctx, Some(label)),
            Some(Kw::Repeat) => compile_repeat(tk, ctx, Some(label)),
            _ => {
                ctx.set_error(CompileErrorKind::BadLabel, label_span);
                None
            }
        };
    }

    match tk.peek().keyword() {
        Some(Kw::OpenBrace) => compile_block(tk, ctx),
        Some(Kw::If) => compile_if(tk, ctx),
        Some(Kw::While) => compile_while(tk, ctx, None),
        Some(Kw::Do) => compile_do_while(tk, ctx, None),
        Some(Kw::For) => compile_for(tk, ctx, None),
        Some(Kw::Repeat) => compile_repeat(tk, ctx, None),
        Some(Kw::Switch) => compile_switch(tk, ctx),
        Some(Kw::Break) => compile_break_continue(tk, ctx, false),
        Some(Kw::Continue) => compile_break_continue(tk, ctx, true),
        Some(Kw::Return) => compile_return(tk, ctx),
        Some(Kw::Throw) => compile_throw(tk, ctx),
        Some(Kw::Try) => compile_try(tk, ctx),
        Some(Kw::Else) => {
            ctx.set_error(CompileErrorKind::ElseWithoutIf, tk.span());
            None
        }
        Some(Kw::Case) | Some(Kw::Default) => {
            ctx.set_error(CompileErrorKind::CaseOut, tk.span());
            None
        }
        _ => {
            // A type name starts a declaration; anything else is an
            // expression statement.
            let mark = tk.pos();
            if let Some(base) = try_parse_type(tk, ctx) {
                if tk.peek().kind == TokenKind::Ident {
                    return compile_var_decl(tk, ctx, base);
                }
                tk.seek(mark);
            }
            compile_expr_stmt(tk, ctx)
        }
    }
}

fn require_semi(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<()> {
    if tk.eat_kw(Kw::Semicolon) {
        Some(())
    } else {
        ctx.set_error(CompileErrorKind::NoTerminator, tk.span());
        None
    }
}

fn require_open_par(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<()> {
    if tk.eat_kw(Kw::OpenPar) {
        Some(())
    } else {
        ctx.set_error(CompileErrorKind::OpenParen, tk.span());
        None
    }
}

fn require_close_par(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<()> {
    if tk.eat_kw(Kw::ClosePar) {
        Some(())
    } else {
        ctx.set_error(CompileErrorKind::CloseParen, tk.span());
        None
    }
}

fn bool_cond(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Expr> {
    let cond = compile_expr(tk, ctx)?;
    if cond.typ != TypeDesc::Bool {
        ctx.set_error(CompileErrorKind::NotBoolean, cond.expr.span());
        return None;
    }
    Some(cond.expr)
}

/* ===================== Blocks and declarations ===================== */

pub fn compile_block(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Instr> {
    let start = tk.span();
    if !tk.eat_kw(Kw::OpenBrace) {
        ctx.set_error(CompileErrorKind::OpenBlock, tk.span());
        return None;
    }
    ctx.enter_scope();
    let mut body = Vec::new();
    while !tk.at_kw(Kw::CloseBrace) {
        if tk.peek().is_eof() {
            ctx.set_error(CompileErrorKind::CloseBlock, tk.span());
            ctx.exit_scope();
            return None;
        }
        let Some(stmt) = compile_stmt(tk, ctx) else {
            ctx.exit_scope();
            return None;
        };
        body.push(stmt);
    }
    let end = tk.span();
    tk.bump();
    ctx.exit_scope();
    Some(Instr::Block {
        body,
        span: start.merge(end),
    })
}

/// Chained declarators after an already-parsed base type:
/// `int a, b[10] = x, c;`. Dimension expressions evaluate at run time.
fn compile_var_decl(tk: &mut Toks, ctx: &mut CompileCtx, base: TypeDesc) -> Option<Instr> {
    let start = tk.span();
    let mut decls = Vec::new();

    loop {
        let name_tok = tk.peek();
        if name_tok.kind != TokenKind::Ident {
            ctx.set_error(CompileErrorKind::NoVar, tk.span());
            return None;
        }
        let name = name_tok.text.clone();
        let name_span = name_tok.span;
        tk.bump();

        // Per-declarator array dimensions after the name.
        let mut typ = base.clone();
        let mut dims = Vec::new();
        while tk.eat_kw(Kw::OpenIndex) {
            if tk.eat_kw(Kw::CloseIndex) {
                dims.push(None);
            } else {
                let dim = compile_expr(tk, ctx)?;
                if dim.typ != TypeDesc::Int {
                    ctx.set_error(CompileErrorKind::BadIndex, dim.expr.span());
                    return None;
                }
                if !tk.eat_kw(Kw::CloseIndex) {
                    ctx.set_error(CompileErrorKind::CloseIndex, tk.span());
                    return None;
                }
                dims.push(Some(dim.expr));
            }
            typ = TypeDesc::Array {
                elem: Box::new(typ),
                bound: None,
            };
        }
        if typ == TypeDesc::Void {
            ctx.set_error(CompileErrorKind::Void, name_span);
            return None;
        }

        let ident = ctx.declare(&name, typ.clone(), name_span)?;

        let init = if tk.eat_kw(Kw::Assign) {
            let value = compile_expr(tk, ctx)?;
            if !typ.accepts(&value.typ, ctx.classes) {
                ctx.set_error(CompileErrorKind::BadType1, value.expr.span());
                return None;
            }
            Some(value.expr)
        } else {
            None
        };

        decls.push(Decl {
            ident,
            name,
            typ,
            dims,
            init,
            span: name_span,
        });

        if tk.eat_kw(Kw::Comma) {
            continue;
        }
        break;
    }

    let end = tk.span();
    require_semi(tk, ctx)?;
    Some(Instr::VarDecl {
        decls,
        span: start.merge(end),
    })
}

fn compile_expr_stmt(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Instr> {
    // An empty statement is a bare semicolon.
    if tk.at_kw(Kw::Semicolon) {
        let span = tk.span();
        tk.bump();
        return Some(Instr::Block {
            body: Vec::new(),
            span,
        });
    }
    let expr = compile_expr(tk, ctx)?;
    let span = expr.expr.span();
    require_semi(tk, ctx)?;
    Some(Instr::ExprStmt {
        expr: expr.expr,
        span,
    })
}

/* ===================== Conditionals and loops ===================== */

fn compile_if(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Instr> {
    let start = tk.span();
    tk.bump();
    require_open_par(tk, ctx)?;
    let cond = bool_cond(tk, ctx)?;
    require_close_par(tk, ctx)?;
    let then_s = compile_stmt(tk, ctx)?;
    let else_s = if tk.eat_kw(Kw::Else) {
        Some(Box::new(compile_stmt(tk, ctx)?))
    } else {
        None
    };
    let end = else_s
        .as_ref()
        .map(|s| s.span())
        .unwrap_or_else(|| then_s.span());
    Some(Instr::If {
        cond,
        then_s: Box::new(then_s),
        else_s,
        span: start.merge(end),
    })
}

fn compile_while(tk: &mut Toks, ctx: &mut CompileCtx, label: Option<String>) -> Option<Instr> {
    let start = tk.span();
    tk.bump();
    require_open_par(tk, ctx)?;
    let cond = bool_cond(tk, ctx)?;
    require_close_par(tk, ctx)?;

    ctx.enter_loop(label.clone(), false);
    let body = compile_stmt(tk, ctx);
    ctx.exit_loop();
    let body = body?;

    let span = start.merge(body.span());
    Some(Instr::While {
        label,
        cond,
        body: Box::new(body),
        span,
    })
}

fn compile_do_while(tk: &mut Toks, ctx: &mut CompileCtx, label: Option<String>) -> Option<Instr> {
    let start = tk.span();
    tk.bump();

    ctx.enter_loop(label.clone(), false);
    let body = compile_stmt(tk, ctx);
    ctx.exit_loop();
    let body = body?;

    if !tk.eat_kw(Kw::While) {
        ctx.set_error(CompileErrorKind::NoTerminator, tk.span());
        return None;
    }
    require_open_par(tk, ctx)?;
    let cond = bool_cond(tk, ctx)?;
    require_close_par(tk, ctx)?;
    let end = tk.span();
    require_semi(tk, ctx)?;

    Some(Instr::DoWhile {
        label,
        body: Box::new(body),
        cond,
        span: start.merge(end),
    })
}

fn compile_for(tk: &mut Toks, ctx: &mut CompileCtx, label: Option<String>) -> Option<Instr> {
    let start = tk.span();
    tk.bump();
    require_open_par(tk, ctx)?;

    // The header shares one scope with the body.
    ctx.enter_scope();

    let init = if tk.at_kw(Kw::Semicolon) {
        tk.bump();
        None
    } else {
        let mark = tk.pos();
        let stmt = if let Some(base) = try_parse_type(tk, ctx) {
            if tk.peek().kind == TokenKind::Ident {
                compile_var_decl(tk, ctx, base)
            } else {
                tk.seek(mark);
                compile_expr_stmt(tk, ctx)
            }
        } else {
            compile_expr_stmt(tk, ctx)
        };
        let Some(stmt) = stmt else {
            ctx.exit_scope();
            return None;
        };
        Some(Box::new(stmt))
    };

    let cond = if tk.at_kw(Kw::Semicolon) {
        None
    } else {
        let Some(cond) = bool_cond(tk, ctx) else {
            ctx.exit_scope();
            return None;
        };
        Some(cond)
    };
    if !tk.eat_kw(Kw::Semicolon) {
        ctx.set_error(CompileErrorKind::NoTerminator, tk.span());
        ctx.exit_scope();
        return None;
    }

    let incr = if tk.at_kw(Kw::ClosePar) {
        None
    } else {
        let Some(e) = compile_expr(tk, ctx) else {
            ctx.exit_scope();
            return None;
        };
        Some(e.expr)
    };
    if !tk.eat_kw(Kw::ClosePar) {
        ctx.set_error(CompileErrorKind::CloseParen, tk.span());
        ctx.exit_scope();
        return None;
    }

    ctx.enter_loop(label.clone(), false);
    let body = compile_stmt(tk, ctx);
    ctx.exit_loop();
    ctx.exit_scope();
    let body = body?;

    let span = start.merge(body.span());
    Some(Instr::For {
        label,
        init,
        cond,
        incr,
        body: Box::new(body),
        span,
    })
}

fn compile_repeat(tk: &mut Toks, ctx: &mut CompileCtx, label: Option<String>) -> Option<Instr> {
    let start = tk.span();
    tk.bump();
    require_open_par(tk, ctx)?;
    let count = compile_expr(tk, ctx)?;
    if count.typ != TypeDesc::Int {
        ctx.set_error(CompileErrorKind::BadNum, count.expr.span());
        return None;
    }
    require_close_par(tk, ctx)?;

    ctx.enter_loop(label.clone(), false);
    let body = compile_stmt(tk, ctx);
    ctx.exit_loop();
    let body = body?;

    let span = start.merge(body.span());
    Some(Instr::Repeat {
        label,
        count: count.expr,
        body: Box::new(body),
        span,
    })
}

/* ===================== Switch ===================== */

/// Case values must be integer constants, optionally negated.
fn case_value(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<i32> {
    let neg = tk.eat_kw(Kw::Sub);
    match tk.peek().kind {
        TokenKind::IntLit(v) | TokenKind::DefNum(v) => {
            tk.bump();
            Some(if neg { v.wrapping_neg() } else { v })
        }
        _ => {
            ctx.set_error(CompileErrorKind::BadNum, tk.span());
            None
        }
    }
}

fn compile_switch(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Instr> {
    let start = tk.span();
    tk.bump();
    require_open_par(tk, ctx)?;
    let value = compile_expr(tk, ctx)?;
    if value.typ != TypeDesc::Int {
        ctx.set_error(CompileErrorKind::BadNum, value.expr.span());
        return None;
    }
    require_close_par(tk, ctx)?;

    if !tk.eat_kw(Kw::OpenBrace) {
        ctx.set_error(CompileErrorKind::OpenBlock, tk.span());
        return None;
    }

    ctx.enter_scope();
    ctx.enter_loop(None, true);

    let mut body = Vec::new();
    let mut cases: Vec<CaseLabel> = Vec::new();
    let mut seen_case = false;
    let result = loop {
        if tk.at_kw(Kw::CloseBrace) {
            let end = tk.span();
            tk.bump();
            break Some(start.merge(end));
        }
        if tk.peek().is_eof() {
            ctx.set_error(CompileErrorKind::CloseBlock, tk.span());
            break None;
        }
        if tk.at_kw(Kw::Case) {
            tk.bump();
            let Some(v) = case_value(tk, ctx) else { break None };
            if !tk.eat_kw(Kw::Colon) {
                ctx.set_error(CompileErrorKind::NoDoubleDots, tk.span());
                break None;
            }
            if cases.iter().any(|c| c.value == Some(v)) {
                ctx.set_error(CompileErrorKind::RedefVar, tk.span());
                break None;
            }
            cases.push(CaseLabel {
                value: Some(v),
                body_index: body.len(),
            });
            seen_case = true;
            continue;
        }
        if tk.at_kw(Kw::Default) {
            tk.bump();
            if !tk.eat_kw(Kw::Colon) {
                ctx.set_error(CompileErrorKind::NoDoubleDots, tk.span());
                break None;
            }
            if cases.iter().any(|c| c.value.is_none()) {
                ctx.set_error(CompileErrorKind::RedefVar, tk.span());
                break None;
            }
            cases.push(CaseLabel {
                value: None,
                body_index: body.len(),
            });
            seen_case = true;
            continue;
        }
        // Statements before the first case label are unreachable.
        if !seen_case {
            ctx.set_error(CompileErrorKind::NoCase, tk.span());
            break None;
        }
        let Some(stmt) = compile_stmt(tk, ctx) else { break None };
        body.push(stmt);
    };

    ctx.exit_loop();
    ctx.exit_scope();

    let span = result?;
    Some(Instr::Switch {
        value: value.expr,
        body,
        cases,
        span,
    })
}

/* ===================== Jumps ===================== */

fn compile_break_continue(
    tk: &mut Toks,
    ctx: &mut CompileCtx,
    is_continue: bool,
) -> Option<Instr> {
    let start = tk.span();
    tk.bump();

    let label = if tk.peek().kind == TokenKind::Ident {
        let name = tk.peek().text.clone();
        tk.bump();
        Some(name)
    } else {
        None
    };

    if !ctx.check_jump_target(label.as_deref(), is_continue) {
        let kind = if label.is_some() {
            CompileErrorKind::UndefLabel
        } else {
            CompileErrorKind::BreakOutside
        };
        ctx.set_error(kind, start);
        return None;
    }

    let end = tk.span();
    require_semi(tk, ctx)?;
    let span = start.merge(end);
    Some(if is_continue {
        Instr::Continue { label, span }
    } else {
        Instr::Break { label, span }
    })
}

fn compile_return(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Instr> {
    let start = tk.span();
    tk.bump();

    let value = if tk.at_kw(Kw::Semicolon) {
        if ctx.ret_type != TypeDesc::Void {
            ctx.set_error(CompileErrorKind::BadType1, start);
            return None;
        }
        None
    } else {
        let value = compile_expr(tk, ctx)?;
        let expected = ctx.ret_type.clone();
        if expected == TypeDesc::Void || !expected.accepts(&value.typ, ctx.classes) {
            ctx.set_error(CompileErrorKind::BadType1, value.expr.span());
            return None;
        }
        Some(value.expr)
    };

    let end = tk.span();
    require_semi(tk, ctx)?;
    Some(Instr::Return {
        value,
        span: start.merge(end),
    })
}

fn compile_throw(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Instr> {
    let start = tk.span();
    tk.bump();
    let value = compile_expr(tk, ctx)?;
    if value.typ != TypeDesc::Int {
        ctx.set_error(CompileErrorKind::BadNum, value.expr.span());
        return None;
    }
    let end = tk.span();
    require_semi(tk, ctx)?;
    Some(Instr::Throw {
        value: value.expr,
        span: start.merge(end),
    })
}

/* ===================== Try / catch / finally ===================== */

fn compile_try(tk: &mut Toks, ctx: &mut CompileCtx) -> Option<Instr> {
    let start = tk.span();
    tk.bump();
    let body = compile_block(tk, ctx)?;

    let mut catches = Vec::new();
    while tk.at_kw(Kw::Catch) {
        tk.bump();
        require_open_par(tk, ctx)?;
        let guard = compile_expr(tk, ctx)?;
        if guard.typ != TypeDesc::Int && guard.typ != TypeDesc::Bool {
            ctx.set_error(CompileErrorKind::BadNum, guard.expr.span());
            return None;
        }
        require_close_par(tk, ctx)?;
        let arm = compile_block(tk, ctx)?;
        catches.push(CatchArm {
            guard: guard.expr,
            body: Box::new(arm),
        });
    }

    let finally = if tk.eat_kw(Kw::Finally) {
        Some(Box::new(compile_block(tk, ctx)?))
    } else {
        None
    };

    let end = finally
        .as_ref()
        .map(|f| f.span())
        .or_else(|| catches.last().map(|c| c.body.span()))
        .unwrap_or_else(|| body.span());
    Some(Instr::Try {
        body: Box::new(body),
        catches,
        finally,
        span: start.merge(end),
    })
}
