//! Host function and method registration
//!
//! This is the entire script-to-host boundary: a pair of callbacks per
//! capability. The compile-time checker validates argument types and
//! computes the call's static type once per call site; the runtime executor
//! is invoked during execution and may itself be long-running, returning
//! [`ExternStatus::Pending`] any number of ticks under the same suspend
//! contract as user code. Executors keep whatever progress they need in a
//! JSON `state` slot on the call frame, which travels through snapshots.

use std::any::Any;

use serde_json::Value as JsonValue;

use crate::error::CompileErrorKind;
use crate::typesys::values::{Handle, Heap, Value};
use crate::typesys::TypeDesc;

/// Result of one executor invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternStatus {
    Done,
    /// Still running; the engine suspends and re-invokes next cycle.
    Pending,
}

/// Everything an executor can see and touch during one invocation.
pub struct ExternCtx<'a> {
    /// Evaluated argument values, in call order.
    pub args: &'a mut [Value],
    /// Result slot; leave untouched for void calls.
    pub result: &'a mut Value,
    /// The receiver, for methods bound to a class.
    pub this: Option<Handle>,
    /// Executor-private progress state, serialized with the frame.
    pub state: &'a mut JsonValue,
    /// The process heap, for reading `this` fields or building arrays.
    pub heap: &'a mut Heap,
    /// The host context bound to this running process.
    pub host: &'a mut dyn Any,
}

/// Compile-time checker: argument types in, result type out. Errors become
/// ordinary compile diagnostics at the call site.
pub type CheckFn = fn(&[TypeDesc]) -> Result<TypeDesc, CompileErrorKind>;

/// Runtime executor. A returned `Err(code)` raises a runtime exception with
/// that user code at the call site.
pub type ExecFn = Box<dyn Fn(&mut ExternCtx) -> Result<ExternStatus, i32>>;

/// One registered host capability.
pub struct ExternSlot {
    pub check: CheckFn,
    pub exec: ExecFn,
}

/// A named host function (free functions; methods live on their class).
pub struct ExternDef {
    pub name: String,
    pub slot: ExternSlot,
}

/// Registry of host-provided functions, consumed by the compiler for call
/// typing and by the engine for invocation. Lookup is by name at run time,
/// so a call compiled against a host that later dropped the registration
/// fails with the unknown-external-call error rather than misbehaving.
#[derive(Default)]
pub struct ExternRegistry {
    funcs: Vec<ExternDef>,
}

impl ExternRegistry {
    pub fn new() -> ExternRegistry {
        ExternRegistry::default()
    }

    /// Register or replace a host function.
    pub fn register(&mut self, name: &str, check: CheckFn, exec: ExecFn) {
        let slot = ExternSlot { check, exec };
        if let Some(def) = self.funcs.iter_mut().find(|d| d.name == name) {
            def.slot = slot;
        } else {
            self.funcs.push(ExternDef {
                name: name.to_string(),
                slot,
            });
        }
    }

    pub fn find(&self, name: &str) -> Option<&ExternSlot> {
        self.funcs.iter().find(|d| d.name == name).map(|d| &d.slot)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typesys::values::InitState;

    fn check_one_int(args: &[TypeDesc]) -> Result<TypeDesc, CompileErrorKind> {
        match args {
            [TypeDesc::Int] => Ok(TypeDesc::Int),
            [_] => Err(CompileErrorKind::BadParam),
            [] => Err(CompileErrorKind::LowParam),
            _ => Err(CompileErrorKind::OverParam),
        }
    }

    #[test]
    fn registration_replaces_by_name() {
        let mut reg = ExternRegistry::new();
        reg.register("probe", check_one_int, Box::new(|_| Ok(ExternStatus::Done)));
        reg.register("probe", check_one_int, Box::new(|_| Ok(ExternStatus::Pending)));
        assert!(reg.contains("probe"));
        assert_eq!(reg.funcs.len(), 1);
    }

    #[test]
    fn executor_sees_args_and_writes_result() {
        let mut reg = ExternRegistry::new();
        reg.register(
            "double",
            check_one_int,
            Box::new(|ctx| {
                let v = ctx.args[0].as_i32().map_err(|e| e.code())?;
                *ctx.result = Value::int(v * 2);
                Ok(ExternStatus::Done)
            }),
        );

        let slot = reg.find("double").unwrap();
        let mut args = [Value::int(21)];
        let mut result = Value::void();
        let mut state = JsonValue::Null;
        let mut heap = Heap::new();
        let mut host = ();
        let mut ctx = ExternCtx {
            args: &mut args,
            result: &mut result,
            this: None,
            state: &mut state,
            heap: &mut heap,
            host: &mut host,
        };
        assert_eq!((slot.exec)(&mut ctx), Ok(ExternStatus::Done));
        assert_eq!(result, Value::int(42));
        assert_eq!(result.state, InitState::Def);
    }
}
