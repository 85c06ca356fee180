//! Execution frames
//!
//! One frame per active AST node. The `pc` is the node's phase counter,
//! `idx` is its iteration cursor (block position, argument index, remaining
//! repeat count), `vals` holds evaluated subexpression results, and
//! `locals` holds variables declared directly under this frame. Everything
//! serializes, which is what makes a mid-flight process a plain document.

use serde::{Deserialize, Serialize};

use super::control::Control;
use crate::compiler::ast::{Expr, Instr};
use crate::error::Span;
use crate::typesys::{ClassId, Handle, Value, Var};

/// The AST node a frame executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Node {
    I(Instr),
    E(Expr),
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::I(i) => i.span(),
            Node::E(e) => e.span(),
        }
    }
}

/// Function-call bookkeeping carried by the callee's body frame. A frame
/// with this set is a barrier: `return` stops here, and variable lookup
/// does not see past it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnInfo {
    pub name: String,
    /// Instance the body runs against, for `this` and field access.
    pub this: Option<Handle>,
    /// Class whose lock this call holds; released when the frame pops.
    pub sync_class: Option<ClassId>,
    pub ret_void: bool,
    /// Whether completing this frame pushes a value to the caller. False
    /// for destructor runs and instance-default evaluation.
    pub deliver: bool,
    /// Set on destructor frames: the object to free once the body is done.
    pub dtor_of: Option<Handle>,
}

impl FnInfo {
    pub fn call(name: impl Into<String>, this: Option<Handle>, ret_void: bool) -> FnInfo {
        FnInfo {
            name: name.into(),
            this,
            sync_class: None,
            ret_void,
            deliver: true,
            dtor_of: None,
        }
    }

    pub fn destructor(name: impl Into<String>, target: Handle) -> FnInfo {
        FnInfo {
            name: name.into(),
            this: Some(target),
            sync_class: None,
            ret_void: true,
            deliver: false,
            dtor_of: Some(target),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub node: Node,
    pub pc: u8,
    pub idx: usize,
    pub vals: Vec<Value>,
    pub locals: Vec<Var>,
    pub fn_info: Option<FnInfo>,
    /// Persistent state slot for a pending host call at this frame.
    pub host_state: serde_json::Value,
    /// Control stashed by a try frame while its finally block runs.
    pub stash: Option<Control>,
}

impl Frame {
    pub fn stmt(instr: Instr) -> Frame {
        Frame {
            node: Node::I(instr),
            pc: 0,
            idx: 0,
            vals: Vec::new(),
            locals: Vec::new(),
            fn_info: None,
            host_state: serde_json::Value::Null,
            stash: None,
        }
    }

    pub fn expr(expr: Expr) -> Frame {
        Frame {
            node: Node::E(expr),
            pc: 0,
            idx: 0,
            vals: Vec::new(),
            locals: Vec::new(),
            fn_info: None,
            host_state: serde_json::Value::Null,
            stash: None,
        }
    }

    /// Body frame for a function, method, constructor or destructor call,
    /// with the parameters already bound.
    pub fn call(body: Instr, locals: Vec<Var>, info: FnInfo) -> Frame {
        Frame {
            node: Node::I(body),
            pc: 0,
            idx: 0,
            vals: Vec::new(),
            locals,
            fn_info: Some(info),
            host_state: serde_json::Value::Null,
            stash: None,
        }
    }
}
