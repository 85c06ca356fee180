//! Host-registered functions, pending calls and extern methods.

use std::any::Any;

use maplit::hashmap;
use serde_json::json;

use crate::engine::{ProcState, Process, RunOutcome};
use crate::error::CompileErrorKind;
use crate::host::ExternStatus;
use crate::program::{Program, Session};
use crate::typesys::{Data, TypeDesc, Value};

fn check_int_to_int(args: &[TypeDesc]) -> Result<TypeDesc, CompileErrorKind> {
    match args {
        [TypeDesc::Int] => Ok(TypeDesc::Int),
        _ => Err(CompileErrorKind::BadParam),
    }
}

fn check_none_to_int(args: &[TypeDesc]) -> Result<TypeDesc, CompileErrorKind> {
    if args.is_empty() {
        Ok(TypeDesc::Int)
    } else {
        Err(CompileErrorKind::OverParam)
    }
}

fn check_str_to_void(args: &[TypeDesc]) -> Result<TypeDesc, CompileErrorKind> {
    match args {
        [TypeDesc::Str] => Ok(TypeDesc::Void),
        _ => Err(CompileErrorKind::BadParam),
    }
}

fn run_to_end(
    program: &Program,
    session: &mut Session,
    proc: &mut Process,
    host: &mut dyn Any,
) -> usize {
    let mut rounds = 0;
    loop {
        rounds += 1;
        assert!(rounds < 1_000, "process never finished");
        if proc.run(program, session, host, 10_000) == RunOutcome::Finished {
            return rounds;
        }
    }
}

#[test]
fn extern_function_computes_a_result() {
    let mut session = Session::new();
    session.register_function(
        "dbl",
        check_int_to_int,
        Box::new(|ctx| {
            let n = ctx.args[0].as_i32().map_err(|e| e.code())?;
            *ctx.result = Value::int(n * 2);
            Ok(ExternStatus::Done)
        }),
    );
    let program = Program::compile(&mut session, "int main() { return dbl(21); }")
        .expect("compile failed");
    let mut proc = Process::start(&mut session, &program, "main").expect("start failed");
    let mut host = ();
    run_to_end(&program, &mut session, &mut proc, &mut host);
    assert_eq!(proc.result().map(|v| &v.data), Some(&Data::Int(42)));
}

#[test]
fn pending_extern_suspends_until_done() {
    let mut session = Session::new();
    // Counts itself down across invocations through the frame state slot.
    session.register_function(
        "ticker",
        check_none_to_int,
        Box::new(|ctx| {
            let left = ctx.state.as_i64().unwrap_or(3);
            if left > 0 {
                *ctx.state = json!(left - 1);
                return Ok(ExternStatus::Pending);
            }
            *ctx.result = Value::int(99);
            Ok(ExternStatus::Done)
        }),
    );
    let program = Program::compile(&mut session, "int main() { return ticker(); }")
        .expect("compile failed");
    let mut proc = Process::start(&mut session, &program, "main").expect("start failed");
    let mut host = ();

    // Each pending invocation parks the process once.
    let rounds = run_to_end(&program, &mut session, &mut proc, &mut host);
    assert!(rounds >= 4, "expected four suspension rounds, got {rounds}");
    assert_eq!(proc.state(), ProcState::Done);
    assert_eq!(proc.result().map(|v| &v.data), Some(&Data::Int(99)));
}

#[test]
fn extern_error_codes_are_catchable() {
    let mut session = Session::new();
    session.register_function(
        "explode",
        check_none_to_int,
        Box::new(|_| Err(33)),
    );
    let src = r#"
        int main() {
            try { return explode(); } catch (33) { return 8; }
            return 0;
        }
    "#;
    let program = Program::compile(&mut session, src).expect("compile failed");
    let mut proc = Process::start(&mut session, &program, "main").expect("start failed");
    let mut host = ();
    run_to_end(&program, &mut session, &mut proc, &mut host);
    assert_eq!(proc.result().map(|v| &v.data), Some(&Data::Int(8)));
}

#[test]
fn extern_functions_reach_the_bound_host() {
    struct Journal {
        lines: Vec<String>,
    }

    let mut session = Session::new();
    session.register_function(
        "emit",
        check_str_to_void,
        Box::new(|ctx| {
            let Data::Str(s) = &ctx.args[0].data else {
                return Err(2);
            };
            let journal = ctx.host.downcast_mut::<Journal>().ok_or(1)?;
            journal.lines.push(s.clone());
            Ok(ExternStatus::Done)
        }),
    );
    let src = r#"
        int main() {
            emit("start");
            emit("finish");
            return 0;
        }
    "#;
    let program = Program::compile(&mut session, src).expect("compile failed");
    let mut proc = Process::start(&mut session, &program, "main").expect("start failed");
    let mut host = Journal { lines: Vec::new() };
    run_to_end(&program, &mut session, &mut proc, &mut host);
    assert_eq!(proc.state(), ProcState::Done);
    assert_eq!(host.lines, vec!["start".to_string(), "finish".to_string()]);
}

#[test]
fn extern_methods_attach_to_registered_classes() {
    let mut session = Session::new();
    session
        .classes
        .register("gauge", None, false)
        .expect("class registration");
    session
        .register_method(
            "gauge",
            "read",
            check_none_to_int,
            Box::new(|ctx| {
                assert!(ctx.this.is_some(), "method call without a receiver");
                *ctx.result = Value::int(451);
                Ok(ExternStatus::Done)
            }),
        )
        .expect("method registration");
    let src = r#"
        int main() {
            gauge g = new gauge();
            return g.read();
        }
    "#;
    let program = Program::compile(&mut session, src).expect("compile failed");
    let mut proc = Process::start(&mut session, &program, "main").expect("start failed");
    let mut host = ();
    run_to_end(&program, &mut session, &mut proc, &mut host);
    assert_eq!(proc.result().map(|v| &v.data), Some(&Data::Int(451)));
}

#[test]
fn registering_a_method_on_an_unknown_class_fails() {
    let mut session = Session::new();
    let err = session.register_method(
        "missing",
        "read",
        check_none_to_int,
        Box::new(|_| Ok(ExternStatus::Done)),
    );
    assert_eq!(err, Err(CompileErrorKind::UndefClass));
}

#[test]
fn defined_constants_fold_into_literals() {
    let mut session = Session::new();
    for (name, value) in hashmap! {
        "LIMIT" => 40,
        "STEP" => 2,
    } {
        session.define_constant(name, value);
    }
    let program = Program::compile(&mut session, "int main() { return LIMIT + STEP; }")
        .expect("compile failed");
    let mut proc = Process::start(&mut session, &program, "main").expect("start failed");
    let mut host = ();
    run_to_end(&program, &mut session, &mut proc, &mut host);
    assert_eq!(proc.result().map(|v| &v.data), Some(&Data::Int(42)));
}

#[test]
fn calls_to_unregistered_externs_fail_at_compile_time() {
    let mut session = Session::new();
    let err = Program::compile(&mut session, "int main() { return vanish(); }");
    assert!(err.is_err());
}
