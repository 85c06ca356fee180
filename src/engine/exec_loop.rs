//! Core execution loop
//!
//! `step()` advances the top frame by one phase. When control flow is
//! active it unwinds instead, popping frames (and releasing the heap
//! references they own) until a frame claims the control value. Everything
//! else in the engine is a handler called from here.

use std::any::Any;

use tracing::trace;

use super::control::Control;
use super::expressions::exec_expr;
use super::frame::{Frame, Node};
use super::process::{ProcState, Process};
use super::statements::{exec_stmt, loop_reset_pc};
use crate::classes::ClassRegistry;
use crate::compiler::ast::{Expr, Instr};
use crate::error::{RuntimeErrorKind, RuntimeFail, Span};
use crate::program::{Program, Session};
use crate::typesys::{Data, Handle, Heap, HeapObj, Value};

/* ===================== Step result ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep stepping.
    Continue,
    /// The process reached a terminal state (done, error, stopped).
    Done,
    /// The process suspended and can be resumed or serialized.
    Suspended,
}

/* ===================== Execution context ===================== */

/// Everything one step may touch, bundled so handlers stay short.
pub(crate) struct Cx<'a> {
    pub proc: &'a mut Process,
    pub program: &'a Program,
    pub session: &'a mut Session,
    pub host: &'a mut dyn Any,
}

impl Cx<'_> {
    pub fn top(&mut self) -> &mut Frame {
        self.proc.frames.last_mut().expect("frame stack not empty")
    }

    /// Raise a runtime error at `span`; unwinding happens on the next step.
    pub fn fail(&mut self, kind: RuntimeErrorKind, span: Span) -> Step {
        self.proc.control = Control::Throw { kind, span };
        Step::Continue
    }

    pub fn push_stmt(&mut self, instr: Instr) -> Step {
        self.push_frame(Frame::stmt(instr))
    }

    pub fn push_expr(&mut self, expr: Expr) -> Step {
        self.push_frame(Frame::expr(expr))
    }

    pub fn push_frame(&mut self, frame: Frame) -> Step {
        if self.proc.frames.len() >= self.proc.max_frames {
            let span = frame.node.span();
            return self.fail(RuntimeErrorKind::StackOver, span);
        }
        self.proc.frames.push(frame);
        Step::Continue
    }

    /// Pop the top frame, releasing every heap reference it still owns and
    /// honoring its call bookkeeping (lock release, destructor finish).
    pub fn pop_frame(&mut self) -> Frame {
        let frame = self.proc.frames.pop().expect("frame stack not empty");
        for v in &frame.vals {
            release_value(
                &mut self.proc.heap,
                &mut self.proc.pending_dtors,
                &self.session.classes,
                v,
            );
        }
        for var in &frame.locals {
            release_value(
                &mut self.proc.heap,
                &mut self.proc.pending_dtors,
                &self.session.classes,
                &var.value,
            );
        }
        if let Some(Control::Return(v)) = &frame.stash {
            release_value(
                &mut self.proc.heap,
                &mut self.proc.pending_dtors,
                &self.session.classes,
                v,
            );
        }
        if let Some(info) = &frame.fn_info {
            if let Some(class) = info.sync_class {
                if let Some(def) = self.session.classes.get_mut(class) {
                    def.lock.unlock(self.proc.id);
                }
            }
            if let Some(h) = info.dtor_of {
                finish_destroyed(
                    &mut self.proc.heap,
                    &mut self.proc.pending_dtors,
                    &self.session.classes,
                    h,
                );
            }
        }
        frame
    }

    /// Complete the current expression frame with `v`, handing the value
    /// (and the references it owns) to the parent frame.
    pub fn finish_value(&mut self, v: Value) -> Step {
        self.pop_frame();
        match self.proc.frames.last_mut() {
            Some(parent) => parent.vals.push(v),
            None => {
                self.proc.result = Some(v);
                self.proc.state = ProcState::Done;
                return Step::Done;
            }
        }
        Step::Continue
    }

    /// Complete the current statement frame. A function-body frame that
    /// ends without `return` delivers void, or raises the missing-result
    /// error for a non-void function.
    pub fn finish_stmt(&mut self) -> Step {
        let span = self.top().node.span();
        let frame = self.pop_frame();
        if let Some(info) = frame.fn_info {
            if info.deliver {
                if !info.ret_void {
                    return self.fail(RuntimeErrorKind::NoRetVal, span);
                }
                return match self.proc.frames.last_mut() {
                    Some(parent) => {
                        parent.vals.push(Value::void());
                        Step::Continue
                    }
                    None => {
                        self.proc.result = Some(Value::void());
                        self.proc.state = ProcState::Done;
                        Step::Done
                    }
                };
            }
        }
        if self.proc.frames.is_empty() {
            self.proc.state = ProcState::Done;
            return Step::Done;
        }
        Step::Continue
    }

    pub fn retain(&mut self, v: &Value) {
        self.proc.heap.retain_value(v);
    }

    pub fn release(&mut self, v: &Value) {
        release_value(
            &mut self.proc.heap,
            &mut self.proc.pending_dtors,
            &self.session.classes,
            v,
        );
    }

    /// Instance handle for `this`, from the nearest call frame.
    pub fn this_handle(&self) -> Option<Handle> {
        for frame in self.proc.frames.iter().rev() {
            if let Some(info) = &frame.fn_info {
                return info.this;
            }
        }
        None
    }

    /// Find a declared variable by identity number, innermost first,
    /// stopping at the current function's frame.
    pub fn lookup_var(&mut self, ident: u32) -> Option<&mut crate::typesys::Var> {
        let mut at = None;
        'scan: for (i, frame) in self.proc.frames.iter().enumerate().rev() {
            for (j, var) in frame.locals.iter().enumerate().rev() {
                if var.ident == ident {
                    at = Some((i, j));
                    break 'scan;
                }
            }
            if frame.fn_info.is_some() {
                break;
            }
        }
        let (i, j) = at?;
        Some(&mut self.proc.frames[i].locals[j])
    }
}

/* ===================== Reference management ===================== */

/// Drop one reference held by `v`. An instance whose count hits zero and
/// whose class has a destructor is parked on the pending queue instead of
/// being freed; the queue's slot keeps the last reference until the
/// destructor body has run.
pub(crate) fn release_value(
    heap: &mut Heap,
    pending: &mut Vec<Handle>,
    classes: &ClassRegistry,
    v: &Value,
) {
    match &v.data {
        Data::Pointer {
            target: Some(h), ..
        } => {
            if heap.refs(*h) == 1 && has_destructor(heap, classes, *h) {
                pending.push(*h);
                return;
            }
            if let Some(obj) = heap.decref(*h) {
                release_contents(heap, pending, classes, obj);
            }
        }
        Data::Array(h) if v.is_defined() => {
            if let Some(obj) = heap.decref(*h) {
                release_contents(heap, pending, classes, obj);
            }
        }
        _ => {}
    }
}

fn release_contents(
    heap: &mut Heap,
    pending: &mut Vec<Handle>,
    classes: &ClassRegistry,
    obj: HeapObj,
) {
    match obj {
        HeapObj::Instance { fields, .. } => {
            for f in &fields {
                release_value(heap, pending, classes, &f.value);
            }
        }
        HeapObj::Array { elems, .. } => {
            for e in &elems {
                release_value(heap, pending, classes, e);
            }
        }
    }
}

fn has_destructor(heap: &Heap, classes: &ClassRegistry, h: Handle) -> bool {
    match heap.get(h) {
        Some(HeapObj::Instance {
            class,
            destroyed: false,
            ..
        }) => destructor_of(classes, *class).is_some(),
        _ => false,
    }
}

/// Most derived destructor reachable from `class`.
pub(crate) fn destructor_of(classes: &ClassRegistry, class: usize) -> Option<(usize, usize)> {
    let mut cur = Some(class);
    while let Some(id) = cur {
        let def = classes.get(id)?;
        let name = format!("~{}", def.name);
        if let Some(idx) = def.methods.iter().position(|m| m.name == name) {
            return Some((id, idx));
        }
        cur = def.parent;
    }
    None
}

/// Free an object whose destructor just finished: mark it destroyed, drop
/// the queue's reference, and release whatever its fields held.
fn finish_destroyed(
    heap: &mut Heap,
    pending: &mut Vec<Handle>,
    classes: &ClassRegistry,
    h: Handle,
) {
    if let Some(HeapObj::Instance { destroyed, .. }) = heap.get_mut(h) {
        *destroyed = true;
    }
    if let Some(obj) = heap.decref(h) {
        release_contents(heap, pending, classes, obj);
    }
}

/* ===================== Step ===================== */

/// Advance the process by one phase.
pub(crate) fn step(cx: &mut Cx) -> Step {
    if !cx.proc.control.is_none() {
        return unwind(cx);
    }

    // A parked destructor runs before anything else; its frame delivers
    // nothing, so it can sit on top of any evaluation in progress.
    if let Some(h) = cx.proc.pending_dtors.pop() {
        return start_destructor(cx, h);
    }

    let Some(frame) = cx.proc.frames.last() else {
        cx.proc.state = ProcState::Done;
        return Step::Done;
    };
    let node = frame.node.clone();
    let pc = frame.pc;
    trace!(pid = cx.proc.id, pc, depth = cx.proc.frames.len(), "step");

    match node {
        Node::I(instr) => exec_stmt(cx, instr, pc),
        Node::E(expr) => exec_expr(cx, expr, pc),
    }
}

fn start_destructor(cx: &mut Cx, h: Handle) -> Step {
    let Some(HeapObj::Instance {
        class,
        destroyed: false,
        ..
    }) = cx.proc.heap.get(h)
    else {
        // Already torn down while queued.
        if let Some(obj) = cx.proc.heap.decref(h) {
            let (heap, pending) = (&mut cx.proc.heap, &mut cx.proc.pending_dtors);
            release_contents(heap, pending, &cx.session.classes, obj);
        }
        return Step::Continue;
    };
    let class = *class;
    let Some((owner, idx)) = destructor_of(&cx.session.classes, class) else {
        let (heap, pending) = (&mut cx.proc.heap, &mut cx.proc.pending_dtors);
        finish_destroyed(heap, pending, &cx.session.classes, h);
        return Step::Continue;
    };
    let method = &cx.session.classes.get(owner).unwrap().methods[idx];
    let name = method.name.clone();
    let body = method.body.clone();
    cx.push_frame(Frame::call(body, Vec::new(), super::frame::FnInfo::destructor(name, h)))
}

/* ===================== Unwind ===================== */

/// Pop frames until something claims the active control value.
fn unwind(cx: &mut Cx) -> Step {
    let control = std::mem::replace(&mut cx.proc.control, Control::None);

    if control == Control::Suspend {
        cx.proc.state = ProcState::Suspended;
        return Step::Suspended;
    }

    loop {
        let Some(frame) = cx.proc.frames.last_mut() else {
            return unwound_out(cx, control);
        };

        // Try frames: catch entry for throws, finally for everything.
        // Phase 4 is the finally block itself, phase 6 a finally that has
        // already run; neither may start the finally again.
        if let Node::I(Instr::Try { catches, finally, .. }) = &frame.node {
            let finally_spent = frame.pc == 4 || frame.pc == 6;
            if let Control::Throw { kind, .. } = &control {
                if kind.catchable() && frame.pc <= 1 && !catches.is_empty() {
                    frame.pc = 2;
                    frame.idx = 0;
                    frame.vals.clear();
                    frame.stash = Some(control);
                    return Step::Continue;
                }
                if !kind.catchable() {
                    cx.pop_frame();
                    continue;
                }
            }
            if finally.is_some() && !finally_spent {
                let finally = finally.as_ref().map(|f| (**f).clone()).unwrap();
                frame.pc = 4;
                frame.vals.clear();
                frame.stash = Some(control);
                return cx.push_stmt(finally);
            }
            cx.pop_frame();
            continue;
        }

        // Loop and switch frames claim break/continue.
        match &control {
            Control::Break(label) => {
                if let Some(frame_label) = break_target(&frame.node) {
                    let matches = match label {
                        None => true,
                        Some(l) => frame_label == Some(l.as_str()),
                    };
                    if matches {
                        cx.pop_frame();
                        return Step::Continue;
                    }
                }
            }
            Control::Continue(label) => {
                if let Some((frame_label, reset)) = continue_target(&frame.node) {
                    let matches = match label {
                        None => true,
                        Some(l) => frame_label == Some(l.as_str()),
                    };
                    if matches {
                        for v in frame.vals.drain(..) {
                            release_value(
                                &mut cx.proc.heap,
                                &mut cx.proc.pending_dtors,
                                &cx.session.classes,
                                &v,
                            );
                        }
                        let frame = cx.top();
                        frame.pc = reset;
                        return Step::Continue;
                    }
                }
            }
            _ => {}
        }

        // Function frames claim return.
        if frame.fn_info.is_some() {
            if let Control::Return(v) = control {
                let frame = cx.pop_frame();
                let info = frame.fn_info.expect("call frame");
                if info.deliver {
                    match cx.proc.frames.last_mut() {
                        Some(parent) => parent.vals.push(v),
                        None => {
                            cx.proc.result = Some(v);
                            cx.proc.state = ProcState::Done;
                            return Step::Done;
                        }
                    }
                } else {
                    cx.release(&v);
                }
                return Step::Continue;
            }
        }

        cx.pop_frame();
    }
}

/// The stack ran out while unwinding.
fn unwound_out(cx: &mut Cx, control: Control) -> Step {
    match control {
        Control::Return(v) => {
            cx.proc.result = Some(v);
            cx.proc.state = ProcState::Done;
        }
        Control::Throw { kind, span } => {
            cx.proc.error = Some(RuntimeFail::new(kind, span));
            cx.proc.state = ProcState::Error;
        }
        // Compile-time loop validation keeps break/continue inside loops.
        _ => {
            cx.proc.state = ProcState::Done;
        }
    }
    Step::Done
}

/// Label of a frame that `break` may target, when the frame is a loop or a
/// switch.
fn break_target(node: &Node) -> Option<Option<&str>> {
    match node {
        Node::I(Instr::While { label, .. })
        | Node::I(Instr::DoWhile { label, .. })
        | Node::I(Instr::For { label, .. })
        | Node::I(Instr::Repeat { label, .. }) => Some(label.as_deref()),
        Node::I(Instr::Switch { .. }) => Some(None),
        _ => None,
    }
}

/// Label and re-entry phase of a frame that `continue` may target.
fn continue_target(node: &Node) -> Option<(Option<&str>, u8)> {
    match node {
        Node::I(Instr::While { label, .. }) => Some((label.as_deref(), loop_reset_pc::WHILE)),
        Node::I(Instr::DoWhile { label, .. }) => Some((label.as_deref(), loop_reset_pc::DO_WHILE)),
        Node::I(Instr::For { label, .. }) => Some((label.as_deref(), loop_reset_pc::FOR)),
        Node::I(Instr::Repeat { label, .. }) => Some((label.as_deref(), loop_reset_pc::REPEAT)),
        _ => None,
    }
}
