use std::collections::HashMap;

use super::ast::{BinOp, CallTarget, Expr, Instr};
use super::{compile_unit, CompiledUnit};
use crate::classes::ClassRegistry;
use crate::error::CompileErrorKind;
use crate::host::ExternRegistry;
use crate::lexer::tokenize;
use crate::typesys::TypeDesc;

fn compile(src: &str) -> (CompiledUnit, ClassRegistry) {
    let toks = tokenize(src, &HashMap::new()).expect("lexes");
    let mut classes = ClassRegistry::new();
    let externs = ExternRegistry::new();
    let mut next_ident = 0;
    let unit = compile_unit(&mut classes, &externs, &mut next_ident, &toks);
    (unit, classes)
}

fn compile_ok(src: &str) -> CompiledUnit {
    let (unit, _) = compile(src);
    if let Some(err) = &unit.error {
        panic!("unexpected compile error {:?} ({})", err.kind, err.code);
    }
    unit
}

fn compile_err(src: &str) -> CompileErrorKind {
    let (unit, _) = compile(src);
    unit.error.expect("expected a compile error").kind
}

#[test]
fn empty_function_compiles() {
    let unit = compile_ok("extern void main() { }");
    assert_eq!(unit.funcs.len(), 1);
    assert!(unit.funcs[0].is_entry);
    assert_eq!(unit.funcs[0].ret, TypeDesc::Void);
}

#[test]
fn precedence_orders_add_before_mul() {
    let unit = compile_ok("int f() { return 1 + 2 * 3; }");
    let Instr::Block { body, .. } = &unit.funcs[0].body else {
        panic!("function body is a block");
    };
    let Instr::Return {
        value: Some(Expr::Binary { op, rhs, .. }),
        ..
    } = &body[0]
    else {
        panic!("expected return of a binary expression");
    };
    assert_eq!(*op, BinOp::Add);
    assert!(matches!(
        **rhs,
        Expr::Binary {
            op: BinOp::Mul,
            ..
        }
    ));
}

#[test]
fn string_concat_result_is_string() {
    compile_ok(r#"string f() { return "n = " + 42; }"#);
    compile_ok(r#"string f() { return 1.5 + "x"; }"#);
}

#[test]
fn arithmetic_on_strings_is_rejected() {
    assert_eq!(
        compile_err(r#"int f() { return "a" - "b"; }"#),
        CompileErrorKind::BadType2
    );
}

#[test]
fn condition_must_be_boolean() {
    assert_eq!(
        compile_err("void f() { if (1) { } }"),
        CompileErrorKind::NotBoolean
    );
}

#[test]
fn assignment_to_literal_is_rejected() {
    assert_eq!(
        compile_err("void f() { 3 = 4; }"),
        CompileErrorKind::BadLeft
    );
}

#[test]
fn undeclared_variable_is_reported() {
    assert_eq!(compile_err("void f() { x = 1; }"), CompileErrorKind::UndefVar);
}

#[test]
fn redeclaration_in_same_scope_is_rejected() {
    assert_eq!(
        compile_err("void f() { int a; int a; }"),
        CompileErrorKind::RedefVar
    );
}

#[test]
fn shadowing_in_nested_scope_is_allowed() {
    compile_ok("void f() { int a = 1; { int a = 2; } }");
}

#[test]
fn block_scope_ends_at_close_brace() {
    assert_eq!(
        compile_err("void f() { { int a; } a = 1; }"),
        CompileErrorKind::UndefVar
    );
}

#[test]
fn chained_declaration_with_dims_and_init() {
    let unit = compile_ok("void f() { int a, b[10], c = 3; }");
    let Instr::Block { body, .. } = &unit.funcs[0].body else {
        panic!("function body is a block");
    };
    let Instr::VarDecl { decls, .. } = &body[0] else {
        panic!("expected a declaration");
    };
    assert_eq!(decls.len(), 3);
    assert_eq!(decls[0].typ, TypeDesc::Int);
    assert!(matches!(decls[1].typ, TypeDesc::Array { .. }));
    assert_eq!(decls[1].dims.len(), 1);
    assert!(decls[2].init.is_some());
}

#[test]
fn break_outside_loop_is_rejected() {
    assert_eq!(
        compile_err("void f() { break; }"),
        CompileErrorKind::BreakOutside
    );
}

#[test]
fn labeled_break_targets_outer_loop() {
    compile_ok(
        "void f() {
            outer: while (true) {
                while (true) { break outer; }
            }
        }",
    );
}

#[test]
fn unknown_label_is_rejected() {
    assert_eq!(
        compile_err("void f() { while (true) { break missing; } }"),
        CompileErrorKind::UndefLabel
    );
}

#[test]
fn continue_does_not_target_switch() {
    assert_eq!(
        compile_err("void f() { switch (1) { case 1: continue; } }"),
        CompileErrorKind::BreakOutside
    );
}

#[test]
fn switch_records_case_positions() {
    let unit = compile_ok(
        "void f(int x) {
            switch (x) {
                case 1: x = 10;
                case 2: x = 20; break;
                default: x = 0;
            }
        }",
    );
    let Instr::Block { body, .. } = &unit.funcs[0].body else {
        panic!("function body is a block");
    };
    let Instr::Switch { cases, body: sb, .. } = &body[0] else {
        panic!("expected a switch");
    };
    assert_eq!(cases.len(), 3);
    assert_eq!(cases[0].value, Some(1));
    assert_eq!(cases[0].body_index, 0);
    assert_eq!(cases[1].value, Some(2));
    assert_eq!(cases[1].body_index, 1);
    assert_eq!(cases[2].value, None);
    assert_eq!(sb.len(), 4);
}

#[test]
fn statement_before_first_case_is_rejected() {
    assert_eq!(
        compile_err("void f(int x) { switch (x) { x = 1; case 1: break; } }"),
        CompileErrorKind::NoCase
    );
}

#[test]
fn return_type_is_checked() {
    assert_eq!(
        compile_err(r#"int f() { return "nope"; }"#),
        CompileErrorKind::BadType1
    );
    assert_eq!(
        compile_err("void f() { return 1; }"),
        CompileErrorKind::BadType1
    );
    compile_ok("float f() { return 2; }");
}

#[test]
fn functions_resolve_regardless_of_order() {
    let unit = compile_ok(
        "int first() { return second(); }
         int second() { return 1; }",
    );
    assert_eq!(unit.funcs.len(), 2);
    let Instr::Block { body, .. } = &unit.funcs[0].body else {
        panic!("function body is a block");
    };
    let Instr::Return {
        value: Some(Expr::Call { target, .. }),
        ..
    } = &body[0]
    else {
        panic!("expected return of a call");
    };
    assert_eq!(*target, CallTarget::User { index: 1 });
}

#[test]
fn overloads_pick_exact_match() {
    let unit = compile_ok(
        "int f(int a) { return 1; }
         int f(float a) { return 2; }
         int g() { return f(1.5); }",
    );
    let Instr::Block { body, .. } = &unit.funcs[2].body else {
        panic!("function body is a block");
    };
    let Instr::Return {
        value: Some(Expr::Call { target, .. }),
        ..
    } = &body[0]
    else {
        panic!("expected return of a call");
    };
    assert_eq!(*target, CallTarget::User { index: 1 });
}

#[test]
fn duplicate_signature_is_rejected() {
    assert_eq!(
        compile_err("int f(int a) { return 1; } int f(int b) { return 2; }"),
        CompileErrorKind::RedefFunc
    );
}

#[test]
fn wrong_argument_type_gets_specific_diagnostic() {
    assert_eq!(
        compile_err(r#"int f(int a) { return a; } int g() { return f("s"); }"#),
        CompileErrorKind::BadParam
    );
}

#[test]
fn class_without_public_is_rejected() {
    assert_eq!(
        compile_err("class Point { int x = 0; }"),
        CompileErrorKind::NoPublic
    );
}

#[test]
fn class_fields_and_methods_compile() {
    let (unit, classes) = compile(
        "public class Point {
            int x = 0;
            int y = 0;
            int sum() { return x + y; }
         }",
    );
    assert!(unit.error.is_none());
    let id = classes.find("Point").expect("registered");
    let def = classes.get(id).unwrap();
    assert_eq!(def.fields.len(), 2);
    assert_eq!(def.methods.len(), 1);
    assert!(def.fields[0].default.is_some());
}

#[test]
fn inherited_field_is_visible_in_child_method() {
    compile_ok(
        "public class Base { int v = 1; }
         public class Child extends Base {
            int get() { return v; }
         }",
    );
}

#[test]
fn private_field_is_fenced_off() {
    assert_eq!(
        compile_err(
            "public class Box { private int secret; }
             int peek(Box b) { return b.secret; }"
        ),
        CompileErrorKind::Private
    );
}

#[test]
fn unannotated_field_rejects_outside_write() {
    assert_eq!(
        compile_err(
            "public class Box { int v; }
             void poke(Box b) { b.v = 1; }"
        ),
        CompileErrorKind::Private
    );
    // Reading stays open.
    compile_ok(
        "public class Box { int v; }
         int peek(Box b) { return b.v; }",
    );
}

#[test]
fn constructor_is_found_by_new() {
    compile_ok(
        "public class P {
            int x;
            void P(int start) { x = start; }
         }
         P make() { return new P(5); }",
    );
}

#[test]
fn new_without_matching_constructor_is_rejected() {
    assert_eq!(
        compile_err(
            "public class P { void P(int a) { } }
             P make() { return new P(); }"
        ),
        CompileErrorKind::NoConstruct
    );
}

#[test]
fn null_assigns_to_any_pointer() {
    compile_ok(
        "public class P { int x; }
         void f() { P p = null; }",
    );
}

#[test]
fn method_call_through_pointer() {
    compile_ok(
        r#"public class Greeter {
            string hello() { return "hi"; }
         }
         string f(Greeter g) { return g.hello(); }"#,
    );
}

#[test]
fn destructor_takes_no_parameters() {
    compile_ok("public class R { void ~R() { } }");
    assert_eq!(
        compile_err("public class R { void ~R(int x) { } }"),
        CompileErrorKind::OverParam
    );
}

#[test]
fn try_catch_finally_compiles() {
    compile_ok(
        "void f() {
            try { throw 42; }
            catch (42) { }
            catch (true) { }
            finally { }
        }",
    );
}

#[test]
fn throw_requires_an_int() {
    assert_eq!(
        compile_err(r#"void f() { throw "boom"; }"#),
        CompileErrorKind::BadNum
    );
}

#[test]
fn repeat_count_must_be_int() {
    compile_ok("void f() { repeat (3) { } }");
    assert_eq!(
        compile_err("void f() { repeat (true) { } }"),
        CompileErrorKind::BadNum
    );
}

#[test]
fn for_header_scope_covers_body() {
    compile_ok("void f() { for (int i = 0; i < 3; i++) { int j = i; } }");
    assert_eq!(
        compile_err("void f() { for (int i = 0; i < 3; i++) { } i = 0; }"),
        CompileErrorKind::UndefVar
    );
}

#[test]
fn ternary_requires_boolean_condition() {
    compile_ok("int f(bool b) { return b ? 1 : 2; }");
    assert_eq!(
        compile_err("int f() { return 1 ? 2 : 3; }"),
        CompileErrorKind::NotBoolean
    );
}

#[test]
fn named_constants_fold_to_int_literals() {
    let mut constants = HashMap::new();
    constants.insert("LIMIT".to_string(), 99);
    let toks = tokenize("int f() { return LIMIT; }", &constants).unwrap();
    let mut classes = ClassRegistry::new();
    let externs = ExternRegistry::new();
    let mut next_ident = 0;
    let unit = compile_unit(&mut classes, &externs, &mut next_ident, &toks);
    assert!(unit.error.is_none());
    let Instr::Block { body, .. } = &unit.funcs[0].body else {
        panic!("function body is a block");
    };
    assert!(matches!(
        body[0],
        Instr::Return {
            value: Some(Expr::LitInt { v: 99, .. }),
            ..
        }
    ));
}

#[test]
fn error_carries_stable_code() {
    let (unit, _) = compile("void f() { break; }");
    assert_eq!(unit.error.unwrap().code, 5017);
}
