// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Recovery by audit-log replay.
//!
//! A damaged database is rebuilt from the newest full dump at or
//! before a target audit id, plus a replay of the logged actions
//! between the dump and the target. The actions go through the same
//! verbs the live API uses, so a rebuilt database is the database
//! those actions would have produced the first time.
//!
//! The live audit log itself is never rewritten: replayed actions are
//! already in it, and the [`SilentAudit`] writer drops the duplicate
//! entries the verbs produce. Log entries missing from the live log
//! (the damage may extend to the log) are taken from the replay dumps
//! written alongside each export.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info};

use crate::ops::{self, SilentAudit};
use crate::store::dump;
use crate::store::tables::AuditLogEntry;
use crate::store::{self, Database, Store};

////////////////////////////////////////////////////////////////////////
// RECOVERY                                                           //
////////////////////////////////////////////////////////////////////////

/// How a recovery went.
#[derive(Clone, Copy, Debug)]
pub struct RecoveryOutcome {
    /// The audit id of the full dump the rebuild started from.
    pub dump_id: u64,

    /// The audit id recovered to.
    pub target: u64,

    /// How many logged actions were replayed on top of the dump.
    pub applied: usize,
}

/// Rebuilds the live database to its state as of `target`. The caller
/// holds the export lock for the whole call.
///
/// On a replay failure the database is still persisted in the state
/// reached so far, so the operator can inspect it; the error names
/// the entry that stopped the replay.
pub fn recover(store: &Store, backup_dir: &Path, target: u64) -> Result<RecoveryOutcome, Error> {
    let (dump_id, dump_path) = dump::find_latest_full_dump(backup_dir, Some(target))?
        .ok_or(Error::NoDump { target })?;
    info!(
        "recovering to audit id {} from {}",
        target,
        dump_path.display(),
    );
    let mut db = dump::read_full_dump(&dump_path)?;

    // The dump carries the log as of its own time; the live log is
    // longer and must survive the recovery unchanged.
    db.audit_log = store.database().audit_log;

    let entries = collect_entries(backup_dir, &db.audit_log, dump_id, target)?;
    let result = replay(&mut db, entries);
    store.with_database(|live| *live = db)?;
    let applied = result?;

    info!(
        "recovered: dump {} plus {} replayed actions",
        dump_id, applied,
    );
    Ok(RecoveryOutcome {
        dump_id,
        target,
        applied,
    })
}

fn replay(db: &mut Database, entries: Vec<AuditLogEntry>) -> Result<usize, Error> {
    let mut applied = 0;
    for entry in entries {
        if !entry.success {
            // A rejected action never changed the tables.
            debug!("skipping failed audit entry {}", entry.id);
            continue;
        }
        ops::apply(
            db,
            &entry.user,
            entry.timestamp,
            entry.action,
            &mut SilentAudit,
        )
        .map_err(|source| Error::Replay {
            audit_id: entry.id,
            source,
        })?;
        applied += 1;
    }
    Ok(applied)
}

/// Gathers the entries with ids in `dump_id+1 ..= target`, in order.
/// The live log is preferred; gaps are filled from the replay dumps.
/// Ids are dense, so a hole that no dump covers is an error.
fn collect_entries(
    backup_dir: &Path,
    live_log: &[AuditLogEntry],
    dump_id: u64,
    target: u64,
) -> Result<Vec<AuditLogEntry>, Error> {
    let in_range = |id: u64| id > dump_id && id <= target;

    let mut by_id: BTreeMap<u64, AuditLogEntry> = live_log
        .iter()
        .filter(|entry| in_range(entry.id))
        .map(|entry| (entry.id, entry.clone()))
        .collect();

    if by_id.len() as u64 != target - dump_id {
        for (replay_id, path) in dump::list_replay_dumps(backup_dir)? {
            debug!("filling log gaps from replay dump {}", replay_id);
            for entry in dump::read_replay_dump(&path)? {
                if in_range(entry.id) {
                    by_id.entry(entry.id).or_insert(entry);
                }
            }
        }
    }

    if let Some(audit_id) = (dump_id + 1..=target).find(|id| !by_id.contains_key(id)) {
        return Err(Error::MissingEntry { audit_id });
    }
    Ok(by_id.into_values().collect())
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors produced by a recovery.
#[derive(Debug)]
pub enum Error {
    Store(store::Error),
    NoDump { target: u64 },
    MissingEntry { audit_id: u64 },
    Replay { audit_id: u64, source: ops::Error },
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Self {
        Self::Store(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Store(err) => err.fmt(f),
            Self::NoDump { target } => {
                write!(f, "no full database dump at or before audit id {}", target)
            }
            Self::MissingEntry { audit_id } => write!(
                f,
                "audit entry {} is in neither the live log nor any replay dump",
                audit_id,
            ),
            Self::Replay { audit_id, source } => {
                write!(f, "replaying audit entry {} failed: {}", audit_id, source)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Replay { source, .. } => Some(source),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
