//! Literals, operators and variables.

use super::helpers::*;
use crate::error::RuntimeErrorKind;

#[test]
fn returns_a_literal() {
    assert_eq!(int_result("int main() { return 42; }"), 42);
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(int_result("int main() { return 2 + 3 * 4; }"), 14);
    assert_eq!(int_result("int main() { return (2 + 3) * 4; }"), 20);
    assert_eq!(int_result("int main() { return 7 % 3; }"), 1);
}

#[test]
fn float_arithmetic_and_promotion() {
    assert_eq!(float_result("float main() { return 1 + 0.5; }"), 1.5);
    assert_eq!(float_result("float main() { return 7 / 2.0; }"), 3.5);
}

#[test]
fn integer_division_truncates() {
    assert_eq!(int_result("int main() { return 7 / 2; }"), 3);
}

#[test]
fn division_by_zero_is_an_error() {
    assert_eq!(
        error_kind("int main() { int z = 0; return 1 / z; }"),
        RuntimeErrorKind::DivZero
    );
    assert_eq!(
        error_kind("float main() { float z = 0.0; return 1.0 / z; }"),
        RuntimeErrorKind::DivZero
    );
}

#[test]
fn power_operator() {
    assert_eq!(int_result("int main() { return 2 ** 10; }"), 1024);
}

#[test]
fn shift_operators() {
    assert_eq!(int_result("int main() { return 1 << 4; }"), 16);
    // `>>` keeps the sign, `>>>` shifts in zeros.
    assert_eq!(int_result("int main() { return -16 >> 2; }"), -4);
    assert_eq!(int_result("int main() { return -1 >>> 28; }"), 15);
    assert_eq!(
        int_result("int main() { int n = -16; n >>= 2; return n; }"),
        -4
    );
    assert_eq!(
        int_result("int main() { int n = -1; n >>>= 28; return n; }"),
        15
    );
}

#[test]
fn bitwise_operators() {
    assert_eq!(int_result("int main() { return 12 & 10; }"), 8);
    assert_eq!(int_result("int main() { return 12 | 10; }"), 14);
    assert_eq!(int_result("int main() { return 12 ^ 10; }"), 6);
    assert_eq!(int_result("int main() { return ~0; }"), -1);
}

#[test]
fn comparison_and_logic() {
    assert!(bool_result("bool main() { return 3 < 4 && 4 <= 4; }"));
    assert!(bool_result("bool main() { return 5 > 4 || false; }"));
    assert!(bool_result("bool main() { return not (1 == 2); }"));
    assert!(bool_result("bool main() { return 1.5 != 2.5; }"));
}

#[test]
fn logical_operators_short_circuit() {
    // The right side would divide by zero if evaluated.
    let src = "bool main() { int z = 0; return false && 1 / z == 0; }";
    assert!(!bool_result(src));
    let src = "bool main() { int z = 0; return true || 1 / z == 0; }";
    assert!(bool_result(src));
}

#[test]
fn string_concatenation() {
    assert_eq!(
        text_result(r#"string main() { return "a" + 1 + "," + true; }"#),
        "a1,true"
    );
    // Integral floats render with one decimal.
    assert_eq!(
        text_result(r#"string main() { return "x=" + 2.0; }"#),
        "x=2.0"
    );
}

#[test]
fn string_comparison() {
    assert!(bool_result(r#"bool main() { return "abc" < "abd"; }"#));
    assert!(bool_result(r#"bool main() { return "abc" == "abc"; }"#));
}

#[test]
fn assignment_yields_the_stored_value() {
    assert_eq!(int_result("int main() { int a; int b; a = b = 5; return a + b; }"), 10);
}

#[test]
fn compound_assignment() {
    assert_eq!(int_result("int main() { int a = 10; a += 5; a *= 2; a -= 6; return a; }"), 24);
    assert_eq!(int_result("int main() { int a = 12; a &= 10; a |= 1; return a; }"), 9);
}

#[test]
fn increment_decrement() {
    assert_eq!(int_result("int main() { int a = 5; return a++; }"), 5);
    assert_eq!(int_result("int main() { int a = 5; return ++a; }"), 6);
    assert_eq!(int_result("int main() { int a = 5; a--; --a; return a; }"), 3);
}

#[test]
fn ternary_selects_one_arm() {
    assert_eq!(int_result("int main() { return 2 > 1 ? 10 : 20; }"), 10);
    assert_eq!(int_result("int main() { return 2 < 1 ? 10 : 20; }"), 20);
}

#[test]
fn uninitialized_read_is_an_error() {
    assert_eq!(
        error_kind("int main() { int a; return a + 1; }"),
        RuntimeErrorKind::NotInit
    );
}

#[test]
fn nan_poisons_arithmetic() {
    let (proc, _s) = run_main("float main() { float f = nan; return f + 1.0; }");
    let v = proc.result().expect("result");
    assert_eq!(v.state, crate::typesys::InitState::Nan);
}

#[test]
fn float_to_int_assignment_truncates() {
    assert_eq!(int_result("int main() { int a = 3.9; return a; }"), 3);
}

#[test]
fn shadowing_inner_block() {
    let src = "int main() { int a = 1; { int a = 2; } return a; }";
    assert_eq!(int_result(src), 1);
}

#[test]
fn unary_negation() {
    assert_eq!(int_result("int main() { int a = 3; return -a; }"), -3);
    assert_eq!(float_result("float main() { return -2.5; }"), -2.5);
}
