//! Save and restore
//!
//! A suspended process serializes to a single JSON document: its frame
//! stack (each frame embeds the AST node it executes, its phase counter
//! and its value stack), its private heap, and the scalar static fields
//! its session currently holds. Restoring needs the same program compiled
//! into the session; nodes are self-contained, so the document survives a
//! host restart.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::process::{ProcState, Process};
use crate::program::Session;
use crate::typesys::{Data, Value};

#[derive(Serialize, Deserialize)]
pub struct Snapshot {
    process: Process,
    statics: Vec<StaticEntry>,
}

/// Statics travel by class and field name: registry ids are not stable
/// across recompilation.
#[derive(Serialize, Deserialize)]
struct StaticEntry {
    class: String,
    field: String,
    value: Value,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    process: &'a Process,
    statics: &'a [StaticEntry],
}

impl Snapshot {
    /// Serialize a suspended (or finished) process together with the
    /// session's scalar statics.
    pub fn capture(proc: &Process, session: &Session) -> Result<Vec<u8>, serde_json::Error> {
        let statics = collect_statics(session);
        let doc = SnapshotRef {
            process: proc,
            statics: &statics,
        };
        serde_json::to_vec(&doc)
    }

    /// Rebuild a process from a snapshot, writing its statics back into
    /// the session. When several snapshots restore into one session the
    /// last one wins on overlapping statics.
    pub fn restore(session: &mut Session, bytes: &[u8]) -> Result<Process, serde_json::Error> {
        let doc: Snapshot = serde_json::from_slice(bytes)?;
        for entry in &doc.statics {
            let Some(id) = session.classes.find(&entry.class) else {
                continue;
            };
            let Some(def) = session.classes.get_mut(id) else {
                continue;
            };
            if let Some(f) = def
                .fields
                .iter_mut()
                .find(|f| f.is_static && f.name == entry.field)
            {
                f.static_value = Some(entry.value.clone());
            }
        }
        let mut proc = doc.process;
        if proc.state == ProcState::Running {
            proc.state = ProcState::Suspended;
        }
        session.bump_process_id(proc.id);
        debug!(pid = proc.id, statics = doc.statics.len(), "process restored");
        Ok(proc)
    }
}

fn collect_statics(session: &Session) -> Vec<StaticEntry> {
    let mut out = Vec::new();
    for (_, def) in session.classes.iter() {
        for f in def.fields.iter().filter(|f| f.is_static) {
            let Some(v) = &f.static_value else { continue };
            // Heap-backed statics belong to some process's heap and are
            // not portable.
            if matches!(v.data, Data::Pointer { .. } | Data::Array(_)) {
                continue;
            }
            out.push(StaticEntry {
                class: def.name.clone(),
                field: f.name.clone(),
                value: v.clone(),
            });
        }
    }
    out
}
