//! Embeddable scripting engine with resumable, serializable execution.
//!
//! A host builds a [`Session`], registers its functions and constants,
//! compiles source into a [`Program`], and starts [`Process`]es from entry
//! functions. Each process runs cooperatively under a step budget; at any
//! suspension point it can be serialized with [`Snapshot`] and restored
//! later, on the same host or another one, as long as the same program is
//! compiled into the session.

pub mod classes;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod lexer;
pub mod program;
pub mod typesys;

pub use config::Config;
pub use engine::{ProcState, Process, RunOutcome, Snapshot};
pub use error::{CompileFail, RuntimeFail};
pub use host::{ExternCtx, ExternStatus};
pub use program::{Program, Session};
