//! Throw, catch, finally and error unwinding.

use super::helpers::*;
use crate::engine::ProcState;
use crate::error::RuntimeErrorKind;
use crate::typesys::Data;

#[test]
fn throw_is_caught_by_a_matching_code() {
    let src = r#"
        int main() {
            try { throw 42; } catch (42) { return 1; } catch (true) { return 2; }
            return 0;
        }
    "#;
    assert_eq!(int_result(src), 1);
}

#[test]
fn mismatched_codes_fall_through_to_the_next_arm() {
    let src = r#"
        int main() {
            try { throw 7; } catch (42) { return 1; } catch (7) { return 2; }
            return 0;
        }
    "#;
    assert_eq!(int_result(src), 2);
}

#[test]
fn boolean_guards_catch_when_true() {
    let src = r#"
        int main() {
            try { throw 5; } catch (false) { return 1; } catch (true) { return 9; }
            return 0;
        }
    "#;
    assert_eq!(int_result(src), 9);
}

#[test]
fn uncaught_throw_fails_the_process() {
    let src = r#"
        int main() {
            throw 7;
            return 0;
        }
    "#;
    assert_eq!(error_kind(src), RuntimeErrorKind::User(7));
}

#[test]
fn thrown_codes_must_be_positive() {
    let src = r#"
        int main() {
            throw 0;
            return 0;
        }
    "#;
    assert_eq!(error_kind(src), RuntimeErrorKind::BadThrow);
}

#[test]
fn finally_runs_after_a_clean_body() {
    let src = r#"
        int main() {
            int n = 0;
            try { n = 1; } finally { n = n + 10; }
            return n;
        }
    "#;
    assert_eq!(int_result(src), 11);
}

#[test]
fn caught_body_runs_catch_then_finally() {
    let src = r#"
        string main() {
            string order = "";
            try {
                order = order + "t";
                throw 3;
            } catch (3) {
                order = order + "c";
            } finally {
                order = order + "f";
            }
            return order;
        }
    "#;
    assert_eq!(text_result(src), "tcf");
}

#[test]
fn finally_runs_while_an_uncaught_error_unwinds() {
    let src = r#"
        public class Log {
            static int mark = 0;
            void set(int v) { mark = v; }
        }
        int main() {
            Log log = new Log();
            try { throw 5; } finally { log.set(1); }
            return 0;
        }
    "#;
    let (proc, session) = run_main(src);
    assert_eq!(proc.state(), ProcState::Error);
    assert_eq!(proc.error().expect("error").kind, RuntimeErrorKind::User(5));
    let id = session.classes.find("Log").unwrap();
    let mark = &session.classes.get(id).unwrap().fields[0];
    assert_eq!(mark.static_value.as_ref().unwrap().data, Data::Int(1));
}

#[test]
fn unmatched_arms_still_run_finally_before_rethrow() {
    let src = r#"
        public class Log {
            static int mark = 0;
            void set(int v) { mark = v; }
        }
        int main() {
            Log log = new Log();
            try { throw 5; } catch (4) { return 1; } finally { log.set(2); }
            return 0;
        }
    "#;
    let (proc, session) = run_main(src);
    assert_eq!(proc.state(), ProcState::Error);
    assert_eq!(proc.error().expect("error").kind, RuntimeErrorKind::User(5));
    let id = session.classes.find("Log").unwrap();
    let mark = &session.classes.get(id).unwrap().fields[0];
    assert_eq!(mark.static_value.as_ref().unwrap().data, Data::Int(2));
}

#[test]
fn outer_try_catches_what_the_inner_one_misses() {
    let src = r#"
        int main() {
            try {
                try { throw 8; } catch (1) { return 0; }
            } catch (8) {
                return 5;
            }
            return 1;
        }
    "#;
    assert_eq!(int_result(src), 5);
}

#[test]
fn catch_body_errors_escape_the_same_try() {
    let src = r#"
        int main() {
            try { throw 1; } catch (1) { throw 2; } catch (2) { return 9; }
            return 0;
        }
    "#;
    assert_eq!(error_kind(src), RuntimeErrorKind::User(2));
}

#[test]
fn division_by_zero_is_catchable() {
    let src = r#"
        int main() {
            try { return 1 / 0; } catch (true) { return 77; }
            return 0;
        }
    "#;
    assert_eq!(int_result(src), 77);
}

#[test]
fn array_bounds_errors_are_catchable() {
    let src = r#"
        int main() {
            int t[];
            t[0] = 1;
            try { return t[5]; } catch (true) { return 66; }
            return 0;
        }
    "#;
    assert_eq!(int_result(src), 66);
}

#[test]
fn stack_overflow_ignores_catch_arms() {
    let src = r#"
        int down(int n) { return down(n + 1); }
        int main() {
            try { return down(0); } catch (true) { return 0; }
            return 0;
        }
    "#;
    assert_eq!(error_kind(src), RuntimeErrorKind::StackOver);
}

#[test]
fn break_through_a_try_runs_finally() {
    let src = r#"
        int main() {
            int n = 0;
            while (true) {
                try { break; } finally { n = n + 100; }
            }
            return n;
        }
    "#;
    assert_eq!(int_result(src), 100);
}

#[test]
fn return_through_a_try_runs_finally() {
    let src = r#"
        public class Log {
            static int mark = 0;
            void set(int v) { mark = v; }
        }
        int helper(Log log) {
            try { return 7; } finally { log.set(3); }
        }
        int main() {
            Log log = new Log();
            return helper(log);
        }
    "#;
    let (proc, session) = run_main(src);
    assert_eq!(proc.result().and_then(|v| v.as_i32().ok()), Some(7));
    let id = session.classes.find("Log").unwrap();
    let mark = &session.classes.get(id).unwrap().fields[0];
    assert_eq!(mark.static_value.as_ref().unwrap().data, Data::Int(3));
}
