//! Runtime values, variables, and the handle-addressed heap
//!
//! Class instances and arrays live in a per-process heap addressed by
//! `(index, generation)` handles with explicit reference counts; everything
//! else copies by value. Every declared variable carries the compile-time
//! identity number it is looked up by at runtime — never its name — which is
//! what keeps resumed and shadowed execution correct.

use serde::{Deserialize, Serialize};

use super::{ClassId, TypeDesc};
use crate::error::RuntimeErrorKind;

/// Compile-time identity number of a declared variable.
pub type Ident = u32;

/* ===================== Values ===================== */

/// Initialization state of a value. `Nan` is distinct from `Undef`:
/// arithmetic on it raises the NaN-specific error, not the generic
/// uninitialized-variable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitState {
    Undef,
    Def,
    Nan,
}

/// Handle into the heap: slot index plus generation, so a stale handle to a
/// freed slot can never alias a new object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub index: u32,
    pub gen: u32,
}

/// The data part of a runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Data {
    Void,
    Int(i32),
    Float(f32),
    Bool(bool),
    Str(String),
    /// `target: None` is the null pointer.
    Pointer {
        class: ClassId,
        target: Option<Handle>,
    },
    Array(Handle),
}

/// A runtime value: data plus initialization state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub state: InitState,
    pub data: Data,
}

impl Value {
    /// A fresh value in the undefined state for the given type.
    pub fn undef(typ: &TypeDesc) -> Value {
        let data = match typ {
            TypeDesc::Void => Data::Void,
            TypeDesc::Int => Data::Int(0),
            TypeDesc::Float => Data::Float(0.0),
            TypeDesc::Bool => Data::Bool(false),
            TypeDesc::Str => Data::Str(String::new()),
            TypeDesc::Pointer(c) | TypeDesc::Class(c) | TypeDesc::Intrinsic(c) => Data::Pointer {
                class: *c,
                target: None,
            },
            TypeDesc::NullPointer => Data::Pointer {
                class: 0,
                target: None,
            },
            // Array values are created defined, pointing at a heap object;
            // before that the slot is a null-like undefined handle.
            TypeDesc::Array { .. } => Data::Array(Handle { index: 0, gen: 0 }),
        };
        Value {
            state: InitState::Undef,
            data,
        }
    }

    pub fn int(v: i32) -> Value {
        Value {
            state: InitState::Def,
            data: Data::Int(v),
        }
    }

    pub fn float(v: f32) -> Value {
        Value {
            state: InitState::Def,
            data: Data::Float(v),
        }
    }

    pub fn bool(v: bool) -> Value {
        Value {
            state: InitState::Def,
            data: Data::Bool(v),
        }
    }

    pub fn str(v: impl Into<String>) -> Value {
        Value {
            state: InitState::Def,
            data: Data::Str(v.into()),
        }
    }

    pub fn null() -> Value {
        Value {
            state: InitState::Def,
            data: Data::Pointer {
                class: 0,
                target: None,
            },
        }
    }

    pub fn nan() -> Value {
        Value {
            state: InitState::Nan,
            data: Data::Float(0.0),
        }
    }

    pub fn void() -> Value {
        Value {
            state: InitState::Def,
            data: Data::Void,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.state == InitState::Def
    }

    /// Numeric view for promotion; errors on undefined or NaN state.
    pub fn as_f32(&self) -> Result<f32, RuntimeErrorKind> {
        match self.state {
            InitState::Undef => Err(RuntimeErrorKind::NotInit),
            InitState::Nan => Err(RuntimeErrorKind::Nan),
            InitState::Def => match &self.data {
                Data::Int(v) => Ok(*v as f32),
                Data::Float(v) => Ok(*v),
                Data::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
                _ => Err(RuntimeErrorKind::NotInit),
            },
        }
    }

    pub fn as_i32(&self) -> Result<i32, RuntimeErrorKind> {
        match self.state {
            InitState::Undef => Err(RuntimeErrorKind::NotInit),
            InitState::Nan => Err(RuntimeErrorKind::Nan),
            InitState::Def => match &self.data {
                Data::Int(v) => Ok(*v),
                Data::Float(v) => Ok(*v as i32),
                Data::Bool(v) => Ok(*v as i32),
                _ => Err(RuntimeErrorKind::NotInit),
            },
        }
    }

    pub fn as_bool(&self) -> Result<bool, RuntimeErrorKind> {
        match self.state {
            InitState::Undef => Err(RuntimeErrorKind::NotInit),
            InitState::Nan => Err(RuntimeErrorKind::Nan),
            InitState::Def => match &self.data {
                Data::Bool(v) => Ok(*v),
                Data::Int(v) => Ok(*v != 0),
                _ => Err(RuntimeErrorKind::NotInit),
            },
        }
    }

    /// Stringify for `+` concatenation; total over every defined kind.
    pub fn stringify(&self, heap: &Heap) -> String {
        match self.state {
            InitState::Undef => String::new(),
            InitState::Nan => "nan".to_string(),
            InitState::Def => match &self.data {
                Data::Void => String::new(),
                Data::Int(v) => v.to_string(),
                Data::Float(v) => {
                    if v.fract() == 0.0 && v.is_finite() {
                        format!("{:.1}", v)
                    } else {
                        v.to_string()
                    }
                }
                Data::Bool(v) => v.to_string(),
                Data::Str(v) => v.clone(),
                Data::Pointer { target: None, .. } => "null".to_string(),
                Data::Pointer {
                    target: Some(h), ..
                } => format!("object:{}", h.index),
                Data::Array(h) => match heap.get(*h) {
                    Some(HeapObj::Array { elems, .. }) => {
                        let parts: Vec<String> =
                            elems.iter().map(|e| e.stringify(heap)).collect();
                        format!("[{}]", parts.join(", "))
                    }
                    _ => "[]".to_string(),
                },
            },
        }
    }
}

/// A declared variable: identity number, name (diagnostics and field
/// matching only), declared type, and current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Var {
    pub ident: Ident,
    pub name: String,
    pub typ: TypeDesc,
    pub value: Value,
}

impl Var {
    pub fn new(ident: Ident, name: impl Into<String>, typ: TypeDesc) -> Var {
        let value = Value::undef(&typ);
        Var {
            ident,
            name: name.into(),
            typ,
            value,
        }
    }
}

/* ===================== Heap ===================== */

/// A heap-allocated object: a class instance or a growable array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum HeapObj {
    Instance {
        class: ClassId,
        fields: Vec<Var>,
        /// Set when the host or a destructor tears the object down while
        /// pointers still alias it; such pointers compare equal to null and
        /// dereferencing them raises DeletedPtr.
        destroyed: bool,
    },
    Array {
        elem: TypeDesc,
        bound: Option<usize>,
        elems: Vec<Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Slot {
    gen: u32,
    refs: u32,
    obj: Option<HeapObj>,
}

/// Per-process object heap. Reference counts are explicit: every aliasing
/// copy of a pointer/array value must go through `retain_value`, every
/// discard through `release_value` (on the engine side, which also runs
/// destructors).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Heap {
    pub fn new() -> Heap {
        Heap::default()
    }

    pub fn alloc(&mut self, obj: HeapObj) -> Handle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.refs = 1;
            slot.obj = Some(obj);
            return Handle {
                index,
                gen: slot.gen,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            gen: 0,
            refs: 1,
            obj: Some(obj),
        });
        Handle { index, gen: 0 }
    }

    pub fn get(&self, h: Handle) -> Option<&HeapObj> {
        let slot = self.slots.get(h.index as usize)?;
        if slot.gen != h.gen {
            return None;
        }
        slot.obj.as_ref()
    }

    pub fn get_mut(&mut self, h: Handle) -> Option<&mut HeapObj> {
        let slot = self.slots.get_mut(h.index as usize)?;
        if slot.gen != h.gen {
            return None;
        }
        slot.obj.as_mut()
    }

    pub fn refs(&self, h: Handle) -> u32 {
        match self.slots.get(h.index as usize) {
            Some(slot) if slot.gen == h.gen => slot.refs,
            _ => 0,
        }
    }

    pub fn incref(&mut self, h: Handle) {
        if let Some(slot) = self.slots.get_mut(h.index as usize) {
            if slot.gen == h.gen && slot.obj.is_some() {
                slot.refs += 1;
            }
        }
    }

    /// Drop one reference; when the count reaches zero the object is removed
    /// from the heap and returned so the caller can run its destructor and
    /// release the values it held.
    pub fn decref(&mut self, h: Handle) -> Option<HeapObj> {
        let slot = self.slots.get_mut(h.index as usize)?;
        if slot.gen != h.gen || slot.obj.is_none() {
            return None;
        }
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs > 0 {
            return None;
        }
        let obj = slot.obj.take();
        slot.gen = slot.gen.wrapping_add(1);
        self.free.push(h.index);
        obj
    }

    /// Bump the count for any heap reference inside `v`.
    pub fn retain_value(&mut self, v: &Value) {
        match &v.data {
            Data::Pointer {
                target: Some(h), ..
            } => self.incref(*h),
            Data::Array(h) if v.is_defined() => self.incref(*h),
            _ => {}
        }
    }

    /// Deep-copy an instance (intrinsic-class assignment). Nested pointer
    /// fields stay shared and get their counts bumped.
    pub fn deep_copy_instance(&mut self, h: Handle) -> Option<Handle> {
        let obj = self.get(h)?.clone();
        let HeapObj::Instance { ref fields, .. } = obj else {
            return None;
        };
        let retained: Vec<Value> = fields.iter().map(|f| f.value.clone()).collect();
        let copy = self.alloc(obj);
        for val in &retained {
            self.retain_value(val);
        }
        Some(copy)
    }

    /// True when the handle points at an instance flagged destroyed.
    pub fn is_destroyed(&self, h: Handle) -> bool {
        matches!(
            self.get(h),
            Some(HeapObj::Instance {
                destroyed: true,
                ..
            })
        )
    }
}
