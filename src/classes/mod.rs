//! Class registry: named type definitions and method resolution
//!
//! Classes are registered name-first (visible immediately, so mutually
//! recursive classes resolve during the second compiler pass), then filled
//! in with fields and methods. Lookup is a linear scan — class counts are
//! small. `is_child_of` defines substitutability; overload resolution
//! scores candidates by total implicit-promotion cost.

use serde::{Deserialize, Serialize};

use crate::compiler::ast::{Expr, Instr};
use crate::error::CompileErrorKind;
use crate::host::ExternSlot;
use crate::typesys::values::{Ident, Value, Var};
use crate::typesys::{ClassId, TypeDesc};

#[cfg(test)]
mod tests;

/* ===================== Definitions ===================== */

/// Field visibility, checked at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    /// Readable anywhere, writable only inside the class.
    ReadOnly,
    Protected,
    Private,
}

/// One declared field of a class.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub ident: Ident,
    pub name: String,
    pub typ: TypeDesc,
    pub vis: Visibility,
    pub is_static: bool,
    /// Default-value expression, evaluated per instance at `new` time
    /// (at registration time for statics).
    pub default: Option<Expr>,
    /// Current value of a static field; lives here in the registry, shared
    /// by every instance and every process.
    pub static_value: Option<Value>,
}

/// One function parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub ident: Ident,
    pub name: String,
    pub typ: TypeDesc,
}

/// A compiled method. The body is a placeholder after pass 1 and is filled
/// in by pass 2.
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: TypeDesc,
    pub body: Instr,
    pub is_synchronized: bool,
}

/// A host-provided method bound to this class.
pub struct ExternMethod {
    pub name: String,
    pub slot: ExternSlot,
}

/// Cooperative class-level lock serializing `synchronized` methods across
/// frame chains. Not a blocking primitive: a caller that cannot take the
/// lock is queued (at most [`ClassLock::MAX_WAITERS`]) and retries on its
/// next scheduled run.
#[derive(Debug, Clone, Default)]
pub struct ClassLock {
    owner: Option<u64>,
    depth: u32,
    queue: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    Waiting,
    QueueFull,
}

impl ClassLock {
    pub const MAX_WAITERS: usize = 5;

    pub fn try_lock(&mut self, pid: u64) -> LockOutcome {
        match self.owner {
            None => {
                self.owner = Some(pid);
                self.depth = 1;
                self.queue.retain(|&p| p != pid);
                LockOutcome::Acquired
            }
            Some(o) if o == pid => {
                self.depth += 1;
                LockOutcome::Acquired
            }
            Some(_) => {
                if self.queue.contains(&pid) {
                    LockOutcome::Waiting
                } else if self.queue.len() < Self::MAX_WAITERS {
                    self.queue.push(pid);
                    LockOutcome::Waiting
                } else {
                    LockOutcome::QueueFull
                }
            }
        }
    }

    pub fn unlock(&mut self, pid: u64) {
        if self.owner != Some(pid) {
            return;
        }
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            // Hand the lock to the next waiter so scheduling stays fair.
            self.owner = if self.queue.is_empty() {
                None
            } else {
                Some(self.queue.remove(0))
            };
            if self.owner.is_some() {
                self.depth = 1;
            }
        }
    }

    /// Drop every trace of a stopped process.
    pub fn forget(&mut self, pid: u64) {
        self.queue.retain(|&p| p != pid);
        if self.owner == Some(pid) {
            self.depth = 0;
            self.owner = if self.queue.is_empty() {
                None
            } else {
                Some(self.queue.remove(0))
            };
            if self.owner.is_some() {
                self.depth = 1;
            }
        }
    }

    pub fn owner(&self) -> Option<u64> {
        self.owner
    }
}

/// A named class: fields, methods, single inheritance, intrinsic flag.
pub struct ClassDef {
    pub name: String,
    pub parent: Option<ClassId>,
    pub intrinsic: bool,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
    pub extern_methods: Vec<ExternMethod>,
    pub lock: ClassLock,
}

/* ===================== Registry ===================== */

/// Process-wide table of classes, owned by the `Session`. Mutated only by
/// (re)compilation and static-field writes; running processes otherwise
/// only read it.
#[derive(Default)]
pub struct ClassRegistry {
    classes: Vec<Option<ClassDef>>,
}

impl ClassRegistry {
    pub fn new() -> ClassRegistry {
        ClassRegistry::default()
    }

    /// Register a class, visible immediately. Redefinition is an error.
    pub fn register(
        &mut self,
        name: &str,
        parent: Option<ClassId>,
        intrinsic: bool,
    ) -> Result<ClassId, CompileErrorKind> {
        if self.find(name).is_some() {
            return Err(CompileErrorKind::RedefClass);
        }
        let def = ClassDef {
            name: name.to_string(),
            parent,
            intrinsic,
            fields: Vec::new(),
            methods: Vec::new(),
            extern_methods: Vec::new(),
            lock: ClassLock::default(),
        };
        if let Some(idx) = self.classes.iter().position(Option::is_none) {
            self.classes[idx] = Some(def);
            Ok(idx)
        } else {
            self.classes.push(Some(def));
            Ok(self.classes.len() - 1)
        }
    }

    /// Purge a class (recompilation path).
    pub fn remove(&mut self, id: ClassId) {
        if let Some(slot) = self.classes.get_mut(id) {
            *slot = None;
        }
    }

    pub fn find(&self, name: &str) -> Option<ClassId> {
        self.classes
            .iter()
            .position(|c| matches!(c, Some(def) if def.name == name))
    }

    pub fn get(&self, id: ClassId) -> Option<&ClassDef> {
        self.classes.get(id)?.as_ref()
    }

    pub fn get_mut(&mut self, id: ClassId) -> Option<&mut ClassDef> {
        self.classes.get_mut(id)?.as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &ClassDef)> {
        self.classes
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|d| (i, d)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ClassId, &mut ClassDef)> {
        self.classes
            .iter_mut()
            .enumerate()
            .filter_map(|(i, c)| c.as_mut().map(|d| (i, d)))
    }

    pub fn name_of(&self, id: ClassId) -> &str {
        self.get(id).map(|c| c.name.as_str()).unwrap_or("?")
    }

    /// Substitutability: a derived instance satisfies any ancestor type.
    /// Reflexive.
    pub fn is_child_of(&self, child: ClassId, ancestor: ClassId) -> bool {
        self.inheritance_distance(child, ancestor).is_some()
    }

    /// Number of inheritance steps from `child` up to `ancestor`, used as
    /// the promotion cost for pointer arguments.
    pub fn inheritance_distance(&self, child: ClassId, ancestor: ClassId) -> Option<u32> {
        let mut cur = child;
        let mut dist = 0;
        loop {
            if cur == ancestor {
                return Some(dist);
            }
            cur = self.get(cur)?.parent?;
            dist += 1;
        }
    }

    /// Find a field by name, walking up the inheritance chain.
    pub fn find_field(&self, class: ClassId, name: &str) -> Option<(ClassId, usize)> {
        let mut cur = class;
        loop {
            let def = self.get(cur)?;
            if let Some(idx) = def.fields.iter().position(|f| f.name == name) {
                return Some((cur, idx));
            }
            cur = def.parent?;
        }
    }

    /// All compiled methods with this name visible from `class`, most
    /// derived first (the overload candidate set).
    pub fn find_methods(&self, class: ClassId, name: &str) -> Vec<(ClassId, usize)> {
        let mut out = Vec::new();
        let mut cur = Some(class);
        while let Some(id) = cur {
            let Some(def) = self.get(id) else { break };
            for (idx, m) in def.methods.iter().enumerate() {
                if m.name == name {
                    out.push((id, idx));
                }
            }
            cur = def.parent;
        }
        out
    }

    pub fn find_extern_method(&self, class: ClassId, name: &str) -> Option<(ClassId, usize)> {
        let mut cur = Some(class);
        while let Some(id) = cur {
            let def = self.get(id)?;
            if let Some(idx) = def.extern_methods.iter().position(|m| m.name == name) {
                return Some((id, idx));
            }
            cur = def.parent;
        }
        None
    }

    /// Virtual dispatch: starting from the instance's actual class, find
    /// the most derived override whose signature matches the compile-time
    /// resolved method.
    pub fn dispatch(
        &self,
        actual: ClassId,
        name: &str,
        params: &[Param],
    ) -> Option<(ClassId, usize)> {
        let mut cur = Some(actual);
        while let Some(id) = cur {
            let def = self.get(id)?;
            for (idx, m) in def.methods.iter().enumerate() {
                if m.name == name && same_signature(&m.params, params) {
                    return Some((id, idx));
                }
            }
            cur = def.parent;
        }
        None
    }

    /// New undefined field variables for an instance of `class`, ancestors
    /// first so field order matches declaration order.
    pub fn instance_fields(&self, class: ClassId) -> Vec<Var> {
        let mut chain = Vec::new();
        let mut cur = Some(class);
        while let Some(id) = cur {
            chain.push(id);
            cur = self.get(id).and_then(|c| c.parent);
        }
        let mut out = Vec::new();
        for id in chain.into_iter().rev() {
            if let Some(def) = self.get(id) {
                for f in def.fields.iter().filter(|f| !f.is_static) {
                    out.push(Var::new(f.ident, f.name.clone(), f.typ.clone()));
                }
            }
        }
        out
    }
}

pub fn same_signature(a: &[Param], b: &[Param]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.typ == y.typ)
}

/* ===================== Overload resolution ===================== */

/// Pick the unique candidate with the lowest total implicit-promotion cost.
///
/// Keeps the most specific diagnostic across the scan: wrong-type beats
/// too-many/too-few beats unknown; two candidates at the same minimum cost
/// are ambiguous.
pub fn resolve_overload(
    candidates: &[Vec<TypeDesc>],
    args: &[TypeDesc],
    classes: &ClassRegistry,
) -> Result<usize, CompileErrorKind> {
    let mut best: Option<(usize, u32)> = None;
    let mut ambiguous = false;
    let mut diag = CompileErrorKind::UndefCall;

    for (idx, params) in candidates.iter().enumerate() {
        if args.len() > params.len() {
            bump_diag(&mut diag, CompileErrorKind::OverParam);
            continue;
        }
        if args.len() < params.len() {
            bump_diag(&mut diag, CompileErrorKind::LowParam);
            continue;
        }
        let mut cost = 0u32;
        let mut fits = true;
        for (param, arg) in params.iter().zip(args) {
            match param.promotion_cost(arg, classes) {
                Some(c) => cost += c,
                None => {
                    fits = false;
                    break;
                }
            }
        }
        if !fits {
            bump_diag(&mut diag, CompileErrorKind::BadParam);
            continue;
        }
        match best {
            None => best = Some((idx, cost)),
            Some((_, b)) if cost < b => {
                best = Some((idx, cost));
                ambiguous = false;
            }
            Some((_, b)) if cost == b => ambiguous = true,
            Some(_) => {}
        }
    }

    match best {
        Some(_) if ambiguous => Err(CompileErrorKind::NbParam),
        Some((idx, _)) => Ok(idx),
        None => Err(diag),
    }
}

fn bump_diag(slot: &mut CompileErrorKind, new: CompileErrorKind) {
    if new.overload_rank() > slot.overload_rank() {
        *slot = new;
    }
}
