//! Type descriptors and compatibility rules
//!
//! `TypeDesc` is the tagged union the compiler reasons with. Pointer, class
//! and intrinsic variants always carry a valid class id; arrays always carry
//! an element type and an optional declared size bound.

use serde::{Deserialize, Serialize};

use crate::classes::ClassRegistry;

pub mod values;

pub use values::{Data, Handle, Heap, HeapObj, Ident, InitState, Value, Var};


/// Index into the class registry.
pub type ClassId = usize;

/// Static type of an expression or variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum TypeDesc {
    Void,
    Int,
    Float,
    Bool,
    Str,
    /// Reference to an instance of a class (or any derived class).
    Pointer(ClassId),
    /// The type of the `null` literal, assignable to any pointer.
    NullPointer,
    Array {
        elem: Box<TypeDesc>,
        bound: Option<usize>,
    },
    /// A class instance itself (the target of a pointer).
    Class(ClassId),
    /// A value-semantics class: assignment deep-copies the instance.
    Intrinsic(ClassId),
}

/* ===================== Operand masks ===================== */

/// Operand-type masks for the operator precedence table.
pub mod mask {
    pub const INT: u8 = 1;
    pub const FLOAT: u8 = 2;
    pub const BOOL: u8 = 4;
    pub const STR: u8 = 8;
    pub const PTR: u8 = 16;
    pub const INST: u8 = 32;
}

impl TypeDesc {
    /// Mask bit for operator operand checking.
    pub fn mask(&self) -> u8 {
        match self {
            TypeDesc::Int => mask::INT,
            TypeDesc::Float => mask::FLOAT,
            TypeDesc::Bool => mask::BOOL,
            TypeDesc::Str => mask::STR,
            TypeDesc::Pointer(_) | TypeDesc::NullPointer => mask::PTR,
            TypeDesc::Class(_) | TypeDesc::Intrinsic(_) => mask::INST,
            TypeDesc::Void | TypeDesc::Array { .. } => 0,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeDesc::Int | TypeDesc::Float)
    }

    pub fn class_id(&self) -> Option<ClassId> {
        match self {
            TypeDesc::Pointer(c) | TypeDesc::Class(c) | TypeDesc::Intrinsic(c) => Some(*c),
            _ => None,
        }
    }

    /// Wider of two numeric types; mixed int/float promotes to float.
    pub fn promote(a: &TypeDesc, b: &TypeDesc) -> TypeDesc {
        if a == &TypeDesc::Float || b == &TypeDesc::Float {
            TypeDesc::Float
        } else {
            TypeDesc::Int
        }
    }

    /// Whether a value of type `src` may be assigned to a slot of type
    /// `self` with at most an implicit promotion.
    pub fn accepts(&self, src: &TypeDesc, classes: &ClassRegistry) -> bool {
        match (self, src) {
            (a, b) if a == b => true,
            (TypeDesc::Float, TypeDesc::Int) => true,
            (TypeDesc::Int, TypeDesc::Float) => true,
            (TypeDesc::Pointer(_), TypeDesc::NullPointer) => true,
            (TypeDesc::Pointer(dst), TypeDesc::Pointer(src)) => classes.is_child_of(*src, *dst),
            (TypeDesc::Intrinsic(dst), TypeDesc::Intrinsic(src)) => {
                classes.is_child_of(*src, *dst)
            }
            (
                TypeDesc::Array { elem: d, bound: _ },
                TypeDesc::Array { elem: s, bound: _ },
            ) => d.accepts(s, classes),
            _ => false,
        }
    }

    /// Implicit-promotion cost for overload scoring. `None` means the
    /// argument does not fit the parameter at all.
    pub fn promotion_cost(&self, arg: &TypeDesc, classes: &ClassRegistry) -> Option<u32> {
        match (self, arg) {
            (a, b) if a == b => Some(0),
            (TypeDesc::Float, TypeDesc::Int) => Some(1),
            (TypeDesc::Int, TypeDesc::Float) => Some(2),
            (TypeDesc::Pointer(_), TypeDesc::NullPointer) => Some(0),
            (TypeDesc::Pointer(dst), TypeDesc::Pointer(src)) => {
                classes.inheritance_distance(*src, *dst)
            }
            (TypeDesc::Intrinsic(dst), TypeDesc::Intrinsic(src)) => {
                classes.inheritance_distance(*src, *dst)
            }
            (TypeDesc::Array { elem: d, .. }, TypeDesc::Array { elem: s, .. }) => {
                d.promotion_cost(s, classes)
            }
            _ => None,
        }
    }
}
