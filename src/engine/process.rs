//! Process lifecycle
//!
//! A `Process` is one independently running script invocation: its frame
//! stack, its private heap, and its terminal state. Several processes can
//! share one session and program; each `run` call advances one process by
//! a bounded number of phase steps, which is the cooperative-scheduling
//! contract the whole engine is built around.

use std::any::Any;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::control::Control;
use super::exec_loop::{step, Cx, Step};
use super::frame::{FnInfo, Frame};
use crate::error::{RuntimeErrorKind, RuntimeFail, Span};
use crate::program::{Program, Session};
use crate::typesys::{Handle, Heap, TypeDesc, Value};

/// Frame-depth ceiling applied to new processes.
pub const DEFAULT_MAX_FRAMES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum ProcState {
    /// Started, not yet run.
    Ready,
    /// Inside a `run` call.
    Running,
    /// Paused: a pending host call, a lock wait, or an exhausted budget.
    Suspended,
    Done,
    Error,
    /// Hard-stopped by the host; cannot be resumed.
    Stopped,
}

/// What a `run` call ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process reached a terminal state; see `state()` and `error()`.
    Finished,
    /// More work remains; call `run` again (or snapshot the session).
    Suspended,
}

#[derive(Serialize, Deserialize)]
pub struct Process {
    pub(crate) id: u64,
    pub(crate) frames: Vec<Frame>,
    pub(crate) heap: Heap,
    pub(crate) control: Control,
    pub(crate) state: ProcState,
    pub(crate) error: Option<RuntimeFail>,
    pub(crate) result: Option<Value>,
    /// Instances whose last reference dropped and whose destructor has
    /// not run yet; the queue slot holds that last reference.
    pub(crate) pending_dtors: Vec<Handle>,
    pub(crate) max_frames: usize,
}

impl Process {
    /// Start the named entry function. The entry must exist in the program
    /// and take no parameters; everything else reaches the script through
    /// registered host functions.
    pub fn start(session: &mut Session, program: &Program, entry: &str) -> Result<Process, RuntimeFail> {
        let func = program
            .funcs
            .iter()
            .find(|f| f.name == entry)
            .ok_or_else(|| RuntimeFail::new(RuntimeErrorKind::NoRun, Span::default()))?;
        if !func.params.is_empty() {
            return Err(RuntimeFail::new(RuntimeErrorKind::NoRun, func.span));
        }
        let info = FnInfo::call(func.name.clone(), None, func.ret == TypeDesc::Void);
        let id = session.issue_process_id();
        debug!(pid = id, entry, "process started");
        Ok(Process {
            id,
            frames: vec![Frame::call(func.body.clone(), Vec::new(), info)],
            heap: Heap::default(),
            control: Control::None,
            state: ProcState::Ready,
            error: None,
            result: None,
            pending_dtors: Vec::new(),
            max_frames: DEFAULT_MAX_FRAMES,
        })
    }

    /// Throwaway process evaluating a single expression, for static-field
    /// defaults.
    pub(crate) fn for_eval(session: &mut Session, expr: crate::compiler::ast::Expr) -> Process {
        Process {
            id: session.issue_process_id(),
            frames: vec![Frame::expr(expr)],
            heap: Heap::default(),
            control: Control::None,
            state: ProcState::Ready,
            error: None,
            result: None,
            pending_dtors: Vec::new(),
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }

    pub(crate) fn take_result(&mut self) -> Option<Value> {
        if self.state == ProcState::Done {
            self.result.take()
        } else {
            None
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ProcState {
        self.state
    }

    pub fn set_max_frames(&mut self, n: usize) {
        self.max_frames = n.max(2);
    }

    /// Advance by at most `budget` phase steps. Returns `Suspended` both
    /// when the process parked itself and when the budget ran out with
    /// work remaining.
    pub fn run(
        &mut self,
        program: &Program,
        session: &mut Session,
        host: &mut dyn Any,
        budget: usize,
    ) -> RunOutcome {
        match self.state {
            ProcState::Done | ProcState::Error | ProcState::Stopped => return RunOutcome::Finished,
            ProcState::Ready | ProcState::Suspended | ProcState::Running => {}
        }
        self.state = ProcState::Running;
        let mut cx = Cx {
            proc: self,
            program,
            session,
            host,
        };
        for _ in 0..budget {
            match step(&mut cx) {
                Step::Continue => {}
                Step::Done => return RunOutcome::Finished,
                Step::Suspended => return RunOutcome::Suspended,
            }
        }
        self.state = ProcState::Suspended;
        RunOutcome::Suspended
    }

    /// Hard stop: drop every frame without running catch, finally or
    /// destructor bodies, and forget any lock position this process holds.
    pub fn stop(&mut self, session: &mut Session) {
        self.frames.clear();
        self.pending_dtors.clear();
        self.control = Control::None;
        for (_, def) in session.classes.iter_mut() {
            def.lock.forget(self.id);
        }
        self.state = ProcState::Stopped;
        debug!(pid = self.id, "process stopped");
    }

    pub fn error(&self) -> Option<RuntimeFail> {
        self.error
    }

    /// Value produced by the entry function, once `Done`.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Human-readable form of the result, resolved against this process's
    /// heap.
    pub fn result_text(&self) -> Option<String> {
        self.result.as_ref().map(|v| v.stringify(&self.heap))
    }

    /// Where execution currently stands: innermost active function name
    /// and the source span of the node on top of the stack.
    pub fn run_position(&self) -> Option<(String, Span)> {
        let top = self.frames.last()?;
        let name = self
            .frames
            .iter()
            .rev()
            .find_map(|f| f.fn_info.as_ref())
            .map(|i| i.name.clone())?;
        Some((name, top.node.span()))
    }
}
