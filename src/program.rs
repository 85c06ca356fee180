//! Session and compiled program
//!
//! The `Session` is the host-facing root object: the class registry, the
//! host-function registry, the named-constant table, and the counters that
//! keep identity numbers and process ids unique across compilations. A
//! `Program` is one compiled source unit; several programs can coexist in
//! a session (classes are registered session-wide), and processes always
//! run against the program they were started from.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::classes::{ClassRegistry, ExternMethod};
use crate::compiler::ast::FnDef;
use crate::compiler::compile_unit;
use crate::engine::Process;
use crate::error::{CompileErrorKind, CompileFail};
use crate::host::{CheckFn, ExecFn, ExternRegistry, ExternSlot};
use crate::lexer::tokenize;
use crate::typesys::values::Ident;
use crate::typesys::{ClassId, Data};

/* ===================== Session ===================== */

pub struct Session {
    pub classes: ClassRegistry,
    pub externals: ExternRegistry,
    pub(crate) next_ident: Ident,
    pub(crate) constants: HashMap<String, i32>,
    next_process_id: u64,
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Session {
    pub fn new() -> Session {
        Session {
            classes: ClassRegistry::new(),
            externals: ExternRegistry::new(),
            next_ident: 0,
            constants: HashMap::new(),
            next_process_id: 1,
        }
    }

    /// Register a host function callable from scripts.
    pub fn register_function(&mut self, name: &str, check: CheckFn, exec: ExecFn) {
        self.externals.register(name, check, exec);
    }

    /// Register a host method on an already-registered class.
    pub fn register_method(
        &mut self,
        class: &str,
        name: &str,
        check: CheckFn,
        exec: ExecFn,
    ) -> Result<(), CompileErrorKind> {
        let id = self
            .classes
            .find(class)
            .ok_or(CompileErrorKind::UndefClass)?;
        let def = self.classes.get_mut(id).ok_or(CompileErrorKind::UndefClass)?;
        let slot = ExternSlot { check, exec };
        if let Some(m) = def.extern_methods.iter_mut().find(|m| m.name == name) {
            m.slot = slot;
        } else {
            def.extern_methods.push(ExternMethod {
                name: name.to_string(),
                slot,
            });
        }
        Ok(())
    }

    /// Define a named integer constant, folded into literals at lexing.
    pub fn define_constant(&mut self, name: &str, value: i32) {
        self.constants.insert(name.to_string(), value);
    }

    pub(crate) fn issue_process_id(&mut self) -> u64 {
        let id = self.next_process_id;
        self.next_process_id += 1;
        id
    }

    pub(crate) fn bump_process_id(&mut self, seen: u64) {
        if seen >= self.next_process_id {
            self.next_process_id = seen + 1;
        }
    }
}

/* ===================== Program ===================== */

pub struct Program {
    pub funcs: Vec<FnDef>,
    /// Classes this compilation registered into the session.
    pub class_ids: Vec<ClassId>,
}

impl Program {
    /// Compile one source unit against the session. Classes land in the
    /// session registry; on a compile error everything this unit
    /// registered is purged again.
    pub fn compile(session: &mut Session, source: &str) -> Result<Program, CompileFail> {
        let toks = tokenize(source, &session.constants)?;
        let unit = compile_unit(
            &mut session.classes,
            &session.externals,
            &mut session.next_ident,
            &toks,
        );
        if let Some(err) = unit.error {
            for id in unit.class_ids {
                session.classes.remove(id);
            }
            return Err(err);
        }
        let program = Program {
            funcs: unit.funcs,
            class_ids: unit.class_ids,
        };
        debug!(
            funcs = program.funcs.len(),
            classes = program.class_ids.len(),
            "unit compiled"
        );
        program.init_statics(session);
        Ok(program)
    }

    /// Entry points the host may start.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.funcs
            .iter()
            .filter(|f| f.is_entry)
            .map(|f| f.name.as_str())
    }

    /// Unregister this program's classes, for recompilation. Processes
    /// started from the program must be finished or stopped first.
    pub fn retire(self, session: &mut Session) {
        for id in self.class_ids {
            session.classes.remove(id);
        }
    }

    /// Evaluate static-field default expressions with a bounded throwaway
    /// process. Only scalar results are stored: a pointer or array would
    /// live in the throwaway heap and cannot outlive it.
    fn init_statics(&self, session: &mut Session) {
        let mut work = Vec::new();
        for &id in &self.class_ids {
            let Some(def) = session.classes.get(id) else { continue };
            for (fi, f) in def.fields.iter().enumerate() {
                if f.is_static {
                    if let Some(e) = &f.default {
                        work.push((id, fi, e.clone()));
                    }
                }
            }
        }
        for (id, fi, expr) in work {
            let span = expr.span();
            let mut proc = Process::for_eval(session, expr);
            let mut host = ();
            proc.run(self, session, &mut host, 10_000);
            match proc.take_result() {
                Some(v) if matches!(v.data, Data::Pointer { .. } | Data::Array(_)) => {
                    warn!(class = id, field = fi, "static default is not a scalar; skipped");
                }
                Some(v) => {
                    if let Some(def) = session.classes.get_mut(id) {
                        def.fields[fi].static_value = Some(v);
                    }
                }
                None => {
                    warn!(
                        class = id,
                        field = fi,
                        start = span.start,
                        "static default failed to evaluate"
                    );
                }
            }
        }
    }
}
