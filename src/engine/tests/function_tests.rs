//! User function calls, overloads and recursion.

use super::helpers::*;
use crate::engine::ProcState;
use crate::error::RuntimeErrorKind;

#[test]
fn calls_pass_arguments_and_return() {
    let src = r#"
        int add(int a, int b) { return a + b; }
        int main() { return add(2, 40); }
    "#;
    assert_eq!(int_result(src), 42);
}

#[test]
fn declaration_order_does_not_matter() {
    let src = r#"
        int main() { return double(21); }
        int double(int n) { return n * 2; }
    "#;
    assert_eq!(int_result(src), 42);
}

#[test]
fn recursion() {
    let src = r#"
        int fact(int n) {
            if (n <= 1) return 1;
            return n * fact(n - 1);
        }
        int main() { return fact(6); }
    "#;
    assert_eq!(int_result(src), 720);
}

#[test]
fn overloads_dispatch_on_argument_types() {
    let src = r#"
        string kind(int n) { return "int"; }
        string kind(float f) { return "float"; }
        string main() { return kind(1) + "/" + kind(1.5); }
    "#;
    assert_eq!(text_result(src), "int/float");
}

#[test]
fn int_argument_promotes_to_float_parameter() {
    let src = r#"
        float half(float f) { return f / 2.0; }
        float main() { return half(7); }
    "#;
    assert_eq!(float_result(src), 3.5);
}

#[test]
fn parameters_are_local_copies() {
    let src = r#"
        void bump(int n) { n = n + 1; }
        int main() { int a = 1; bump(a); return a; }
    "#;
    assert_eq!(int_result(src), 1);
}

#[test]
fn void_function_completes_without_return() {
    let src = r#"
        void noop() { }
        int main() { noop(); return 1; }
    "#;
    assert_eq!(int_result(src), 1);
}

#[test]
fn missing_return_value_is_an_error() {
    let src = r#"
        int broken() { int a = 1; }
        int main() { return broken(); }
    "#;
    assert_eq!(error_kind(src), RuntimeErrorKind::NoRetVal);
}

#[test]
fn missing_return_is_not_catchable() {
    let src = r#"
        int broken() { int a = 1; }
        int main() {
            try {
                return broken();
            } catch (true) {
                return 0;
            }
        }
    "#;
    assert_eq!(error_kind(src), RuntimeErrorKind::NoRetVal);
}

#[test]
fn deep_recursion_overflows_the_frame_stack() {
    let src = r#"
        int down(int n) { return down(n - 1); }
        int main() { return down(1000000); }
    "#;
    let (proc, _session) = run_main(src);
    assert_eq!(proc.state(), ProcState::Error);
    assert_eq!(proc.error().expect("error").kind, RuntimeErrorKind::StackOver);
}

#[test]
fn entry_result_is_delivered() {
    let src = r#"
        extern int start() { return 5; }
    "#;
    let (proc, _session) = run_entry(src, "start");
    assert_eq!(proc.state(), ProcState::Done);
    assert_eq!(proc.result_text().as_deref(), Some("5"));
}

#[test]
fn run_position_names_the_active_function() {
    let (mut session, program) = build(
        r#"
        int spin() { int i = 0; while (true) i++; return i; }
        int main() { return spin(); }
    "#,
    );
    let mut proc =
        crate::engine::Process::start(&mut session, &program, "main").expect("start failed");
    let mut host = ();
    proc.run(&program, &mut session, &mut host, 100);
    let (name, _span) = proc.run_position().expect("position");
    assert_eq!(name, "spin");
}
