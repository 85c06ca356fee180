//! Class registry tests

use super::*;
use crate::typesys::TypeDesc;

#[test]
fn registration_and_lookup() {
    let mut reg = ClassRegistry::new();
    let a = reg.register("Robot", None, false).unwrap();
    assert_eq!(reg.find("Robot"), Some(a));
    assert_eq!(reg.register("Robot", None, false), Err(CompileErrorKind::RedefClass));
    reg.remove(a);
    assert_eq!(reg.find("Robot"), None);
    // Slot is reused by the next registration.
    let b = reg.register("Probe", None, false).unwrap();
    assert_eq!(a, b);
}

#[test]
fn inheritance_chain_and_distance() {
    let mut reg = ClassRegistry::new();
    let a = reg.register("A", None, false).unwrap();
    let b = reg.register("B", Some(a), false).unwrap();
    let c = reg.register("C", Some(b), false).unwrap();

    assert!(reg.is_child_of(c, a));
    assert!(reg.is_child_of(a, a));
    assert!(!reg.is_child_of(a, c));
    assert_eq!(reg.inheritance_distance(c, a), Some(2));
    assert_eq!(reg.inheritance_distance(c, b), Some(1));
    assert_eq!(reg.inheritance_distance(a, c), None);
}

#[test]
fn field_lookup_walks_ancestors() {
    let mut reg = ClassRegistry::new();
    let a = reg.register("A", None, false).unwrap();
    let b = reg.register("B", Some(a), false).unwrap();
    reg.get_mut(a).unwrap().fields.push(FieldDef {
        ident: 1,
        name: "hp".into(),
        typ: TypeDesc::Int,
        vis: Visibility::Public,
        is_static: false,
        default: None,
        static_value: None,
    });

    assert_eq!(reg.find_field(b, "hp"), Some((a, 0)));
    assert_eq!(reg.find_field(b, "missing"), None);
}

#[test]
fn overload_resolution_scores_promotions() {
    let reg = ClassRegistry::new();
    let candidates = vec![
        vec![TypeDesc::Int, TypeDesc::Int],
        vec![TypeDesc::Float, TypeDesc::Float],
    ];
    // Exact int/int match wins over the double-promotion candidate.
    let picked = resolve_overload(&candidates, &[TypeDesc::Int, TypeDesc::Int], &reg);
    assert_eq!(picked, Ok(0));
    let picked = resolve_overload(&candidates, &[TypeDesc::Float, TypeDesc::Float], &reg);
    assert_eq!(picked, Ok(1));
}

#[test]
fn overload_diagnostics_are_specific() {
    let reg = ClassRegistry::new();
    let candidates = vec![vec![TypeDesc::Int]];

    assert_eq!(
        resolve_overload(&candidates, &[TypeDesc::Int, TypeDesc::Int], &reg),
        Err(CompileErrorKind::OverParam)
    );
    assert_eq!(
        resolve_overload(&candidates, &[], &reg),
        Err(CompileErrorKind::LowParam)
    );
    assert_eq!(
        resolve_overload(&candidates, &[TypeDesc::Str], &reg),
        Err(CompileErrorKind::BadParam)
    );
}

#[test]
fn ambiguous_minimum_is_rejected() {
    let reg = ClassRegistry::new();
    // Both candidates cost exactly one int-to-float promotion.
    let candidates = vec![
        vec![TypeDesc::Float, TypeDesc::Int],
        vec![TypeDesc::Int, TypeDesc::Float],
    ];
    assert_eq!(
        resolve_overload(&candidates, &[TypeDesc::Int, TypeDesc::Int], &reg),
        Err(CompileErrorKind::NbParam)
    );
}

#[test]
fn class_lock_queues_up_to_five_waiters() {
    let mut lock = ClassLock::default();
    assert_eq!(lock.try_lock(1), LockOutcome::Acquired);
    assert_eq!(lock.try_lock(1), LockOutcome::Acquired); // reentrant
    for pid in 2..=6 {
        assert_eq!(lock.try_lock(pid), LockOutcome::Waiting);
    }
    assert_eq!(lock.try_lock(7), LockOutcome::QueueFull);

    // Two unlocks release the reentrant hold; first waiter becomes owner.
    lock.unlock(1);
    lock.unlock(1);
    assert_eq!(lock.owner(), Some(2));
    assert_eq!(lock.try_lock(2), LockOutcome::Acquired);
}

#[test]
fn stopping_a_process_forgets_its_lock_state() {
    let mut lock = ClassLock::default();
    lock.try_lock(1);
    lock.try_lock(2);
    lock.forget(1);
    assert_eq!(lock.owner(), Some(2));
    lock.forget(2);
    assert_eq!(lock.owner(), None);
}
