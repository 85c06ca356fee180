//! Array declaration, growth and element access.

use super::helpers::*;
use crate::error::RuntimeErrorKind;

#[test]
fn declared_bound_preallocates_elements() {
    let src = r#"
        int main() {
            int t[5];
            t[4] = 7;
            return t[4];
        }
    "#;
    assert_eq!(int_result(src), 7);
}

#[test]
fn writes_grow_an_unbounded_array() {
    let src = r#"
        int main() {
            int t[];
            t[0] = 1;
            t[9] = 10;
            return t[0] + t[9];
        }
    "#;
    assert_eq!(int_result(src), 11);
}

#[test]
fn read_past_the_end_is_out_of_bounds() {
    let src = r#"
        int main() {
            int t[];
            t[0] = 1;
            t[1] = 2;
            return t[5];
        }
    "#;
    assert_eq!(error_kind(src), RuntimeErrorKind::OutArray);
}

#[test]
fn negative_index_is_out_of_bounds() {
    let src = r#"
        int main() {
            int t[];
            t[0] = 1;
            return t[-1];
        }
    "#;
    assert_eq!(error_kind(src), RuntimeErrorKind::OutArray);
}

#[test]
fn write_beyond_a_declared_bound_fails() {
    let src = r#"
        int main() {
            int t[2];
            t[2] = 1;
            return 0;
        }
    "#;
    assert_eq!(error_kind(src), RuntimeErrorKind::OutArray);
}

#[test]
fn gap_elements_read_as_undefined() {
    let src = r#"
        int main() {
            int t[];
            t[100] = 1;
            int c = t[50];
            return 7;
        }
    "#;
    assert_eq!(int_result(src), 7);
}

#[test]
fn using_an_undefined_element_fails() {
    let src = r#"
        int main() {
            int t[];
            t[3] = 9;
            return t[1] + 0;
        }
    "#;
    assert_eq!(error_kind(src), RuntimeErrorKind::NotInit);
}

#[test]
fn nested_arrays_with_declared_bounds() {
    let src = r#"
        int main() {
            int grid[2][3];
            grid[1][2] = 6;
            grid[0][0] = 1;
            return grid[1][2] + grid[0][0];
        }
    "#;
    assert_eq!(int_result(src), 7);
}

#[test]
fn arrays_are_shared_by_reference() {
    let src = r#"
        void fill(int[] t) { t[0] = 42; }
        int main() {
            int t[];
            t[0] = 0;
            fill(t);
            return t[0];
        }
    "#;
    assert_eq!(int_result(src), 42);
}

#[test]
fn compound_assignment_on_an_element() {
    let src = r#"
        int main() {
            int t[];
            t[0] = 10;
            t[0] += 5;
            t[0]++;
            return t[0];
        }
    "#;
    assert_eq!(int_result(src), 16);
}

#[test]
fn elements_follow_the_declared_type() {
    let src = r#"
        float main() {
            float t[];
            t[0] = 3;
            return t[0] + 0.5;
        }
    "#;
    assert_eq!(float_result(src), 3.5);
}

#[test]
fn element_index_may_be_an_expression() {
    let src = r#"
        int main() {
            int t[4];
            for (int k = 0; k < 4; k++) t[k] = (k + 1) * 2;
            int i = 1;
            return t[i + 2];
        }
    "#;
    assert_eq!(int_result(src), 8);
}
