//! Conditionals, loops, labels and switch.

use super::helpers::*;

#[test]
fn if_else_branches() {
    let src = "int main() { if (1 < 2) return 1; else return 2; }";
    assert_eq!(int_result(src), 1);
    let src = "int main() { if (1 > 2) return 1; else return 2; }";
    assert_eq!(int_result(src), 2);
}

#[test]
fn if_without_else_falls_through() {
    let src = "int main() { if (false) return 1; return 2; }";
    assert_eq!(int_result(src), 2);
}

#[test]
fn while_counts() {
    let src = "int main() { int i = 0; while (i < 5) i = i + 1; return i; }";
    assert_eq!(int_result(src), 5);
}

#[test]
fn while_zero_iterations() {
    let src = "int main() { while (false) return 1; return 2; }";
    assert_eq!(int_result(src), 2);
}

#[test]
fn while_with_break_and_continue() {
    let src = r#"
        int main() {
            int i = 0;
            int sum = 0;
            while (true) {
                i++;
                if (i > 6) break;
                if (i % 2 == 0) continue;
                sum += i;
            }
            return sum;
        }
    "#;
    // 1 + 3 + 5
    assert_eq!(int_result(src), 9);
}

#[test]
fn do_while_runs_at_least_once() {
    let src = "int main() { int i = 0; do { i++; } while (false); return i; }";
    assert_eq!(int_result(src), 1);
}

#[test]
fn do_while_continue_reaches_the_condition() {
    let src = r#"
        int main() {
            int i = 0;
            int n = 0;
            do {
                i++;
                if (i % 2 == 0) continue;
                n++;
            } while (i < 6);
            return n;
        }
    "#;
    assert_eq!(int_result(src), 3);
}

#[test]
fn for_loop_sums() {
    let src = r#"
        int main() {
            int sum = 0;
            for (int i = 1; i <= 4; i++) sum += i;
            return sum;
        }
    "#;
    assert_eq!(int_result(src), 10);
}

#[test]
fn for_continue_still_increments() {
    let src = r#"
        int main() {
            int sum = 0;
            for (int i = 0; i < 6; i++) {
                if (i % 2 == 1) continue;
                sum += i;
            }
            return sum;
        }
    "#;
    // 0 + 2 + 4
    assert_eq!(int_result(src), 6);
}

#[test]
fn for_header_variable_scopes_to_the_loop() {
    let src = r#"
        int main() {
            int sum = 0;
            for (int i = 0; i < 2; i++) sum += i;
            for (int i = 0; i < 3; i++) sum += i;
            return sum;
        }
    "#;
    assert_eq!(int_result(src), 4);
}

#[test]
fn repeat_runs_a_fixed_count() {
    let src = "int main() { int n = 0; repeat (4) n++; return n; }";
    assert_eq!(int_result(src), 4);
}

#[test]
fn repeat_non_positive_count_skips() {
    let src = "int main() { int n = 0; repeat (0) n++; repeat (-3) n++; return n; }";
    assert_eq!(int_result(src), 0);
}

#[test]
fn labeled_break_exits_the_outer_loop() {
    let src = r#"
        int main() {
            int n = 0;
            outer: while (true) {
                while (true) {
                    n++;
                    if (n == 3) break outer;
                }
            }
            return n;
        }
    "#;
    assert_eq!(int_result(src), 3);
}

#[test]
fn labeled_continue_restarts_the_outer_loop() {
    let src = r#"
        int main() {
            int n = 0;
            outer: for (int i = 0; i < 3; i++) {
                for (int j = 0; j < 10; j++) {
                    n++;
                    continue outer;
                }
            }
            return n;
        }
    "#;
    assert_eq!(int_result(src), 3);
}

#[test]
fn switch_selects_and_falls_through() {
    let src = r#"
        int main() {
            int n = 0;
            switch (2) {
                case 1: n += 1;
                case 2: n += 10;
                case 3: n += 100;
            }
            return n;
        }
    "#;
    assert_eq!(int_result(src), 110);
}

#[test]
fn switch_break_stops_fallthrough() {
    let src = r#"
        int main() {
            switch (1) {
                case 1: break;
                case 2: return 2;
            }
            return 7;
        }
    "#;
    assert_eq!(int_result(src), 7);
}

#[test]
fn switch_default_catches_everything_else() {
    let src = r#"
        int main() {
            switch (9) {
                case 1: return 1;
                default: return 5;
            }
        }
    "#;
    assert_eq!(int_result(src), 5);
}

#[test]
fn switch_without_match_or_default_skips() {
    let src = r#"
        int main() {
            switch (9) {
                case 1: return 1;
            }
            return 3;
        }
    "#;
    assert_eq!(int_result(src), 3);
}

#[test]
fn continue_inside_switch_targets_the_loop() {
    let src = r#"
        int main() {
            int n = 0;
            for (int i = 0; i < 4; i++) {
                switch (i) {
                    case 1:
                    case 2: continue;
                }
                n++;
            }
            return n;
        }
    "#;
    assert_eq!(int_result(src), 2);
}
