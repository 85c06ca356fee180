//! Resumable execution engine
//!
//! Execution state is an explicit stack of [`Frame`]s instead of the host
//! call stack, so a process can stop between any two steps and be serialized.
//! Each frame is one AST node plus a small phase counter; `step()` advances
//! exactly one phase of the top frame. Control flow (break, continue,
//! return, throw, suspend) travels through [`Control`], unwinding the stack
//! until a frame claims it.

mod control;
mod exec_loop;
mod expressions;
mod frame;
mod process;
mod snapshot;
mod statements;

#[cfg(test)]
mod tests;

pub use control::Control;
pub use exec_loop::Step;
pub use frame::{FnInfo, Frame, Node};
pub use process::{ProcState, Process, RunOutcome, DEFAULT_MAX_FRAMES};
pub use snapshot::Snapshot;
