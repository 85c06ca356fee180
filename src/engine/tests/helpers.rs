//! Shared helpers for the engine tests.
//!
//! `run_entry` round-trips the freshly started process through a snapshot
//! before running it, so serialization stays covered by every test that
//! goes through here.

use crate::engine::{ProcState, Process, RunOutcome, Snapshot};
use crate::error::RuntimeErrorKind;
use crate::program::{Program, Session};
use crate::typesys::{Data, Value};

pub fn build(source: &str) -> (Session, Program) {
    let mut session = Session::new();
    let program = Program::compile(&mut session, source).expect("compile failed");
    (session, program)
}

pub fn run_entry(source: &str, entry: &str) -> (Process, Session) {
    let (mut session, program) = build(source);
    let proc = Process::start(&mut session, &program, entry).expect("start failed");
    let bytes = Snapshot::capture(&proc, &session).expect("capture failed");
    let mut proc = Snapshot::restore(&mut session, &bytes).expect("restore failed");
    let mut host = ();
    match proc.run(&program, &mut session, &mut host, 200_000) {
        RunOutcome::Finished => {}
        RunOutcome::Suspended => panic!("process did not finish: {:?}", proc.state()),
    }
    (proc, session)
}

pub fn run_main(source: &str) -> (Process, Session) {
    run_entry(source, "main")
}

pub fn int_result(source: &str) -> i32 {
    let (proc, _session) = run_main(source);
    assert_eq!(proc.state(), ProcState::Done, "error: {:?}", proc.error());
    match proc.result() {
        Some(Value {
            data: Data::Int(n), ..
        }) => *n,
        other => panic!("expected int result, got {other:?}"),
    }
}

pub fn float_result(source: &str) -> f32 {
    let (proc, _session) = run_main(source);
    assert_eq!(proc.state(), ProcState::Done, "error: {:?}", proc.error());
    match proc.result() {
        Some(Value {
            data: Data::Float(f),
            ..
        }) => *f,
        other => panic!("expected float result, got {other:?}"),
    }
}

pub fn bool_result(source: &str) -> bool {
    let (proc, _session) = run_main(source);
    assert_eq!(proc.state(), ProcState::Done, "error: {:?}", proc.error());
    match proc.result() {
        Some(Value {
            data: Data::Bool(b),
            ..
        }) => *b,
        other => panic!("expected bool result, got {other:?}"),
    }
}

pub fn text_result(source: &str) -> String {
    let (proc, _session) = run_main(source);
    assert_eq!(proc.state(), ProcState::Done, "error: {:?}", proc.error());
    proc.result_text().expect("no result")
}

pub fn error_kind(source: &str) -> RuntimeErrorKind {
    let (proc, _session) = run_main(source);
    assert_eq!(
        proc.state(),
        ProcState::Error,
        "expected an error, got {:?}",
        proc.result()
    );
    proc.error().expect("error state").kind
}
