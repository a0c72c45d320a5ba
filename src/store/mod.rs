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

//! The management store.
//!
//! The whole database lives in one JSON file. Logical transactions
//! work on a copy of the in-memory state under a mutex; the copy is
//! persisted through a temporary file and an atomic rename before it
//! replaces the live state, so a crash or a failed write never leaves
//! a half-updated database on disk.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use self::tables::{AuditLogEntry, Tables};

pub mod dump;
pub mod tables;

////////////////////////////////////////////////////////////////////////
// DATABASE STATE                                                     //
////////////////////////////////////////////////////////////////////////

/// The persisted database: the management tables plus the append-only
/// audit log.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Database {
    pub tables: Tables,
    pub audit_log: Vec<AuditLogEntry>,
}

impl Database {
    /// The id of the most recent audit entry, or zero before the
    /// first write.
    pub fn high_water(&self) -> u64 {
        self.audit_log.last().map(|e| e.id).unwrap_or(0)
    }

    /// The id the next audit entry receives. Ids are dense: every
    /// attempted action, successful or not, takes exactly one.
    pub fn next_audit_id(&self) -> u64 {
        self.high_water() + 1
    }
}

/// A consistent read of the management tables, taken under the store
/// lock.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub tables: Tables,
    pub audit_high_water: u64,
}

////////////////////////////////////////////////////////////////////////
// THE STORE                                                          //
////////////////////////////////////////////////////////////////////////

/// The single-file management store.
pub struct Store {
    path: PathBuf,
    state: Mutex<Database>,
}

impl Store {
    /// Opens the store at `path`. A missing file is an empty
    /// database; it is created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let state = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Database::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes a snapshot of the tables and the audit high-water mark.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock().unwrap();
        Snapshot {
            tables: state.tables.clone(),
            audit_high_water: state.high_water(),
        }
    }

    /// A full copy of the current database, for dumps.
    pub fn database(&self) -> Database {
        self.state.lock().unwrap().clone()
    }

    /// Runs one logical transaction.
    ///
    /// The closure mutates a copy of the database; afterwards the copy
    /// is persisted and committed regardless of what the closure
    /// computed, since even rejected actions append audit entries. If
    /// persisting fails, the copy is discarded and the previous state
    /// stays in force.
    pub fn with_database<T>(&self, f: impl FnOnce(&mut Database) -> T) -> Result<T, Error> {
        let mut state = self.state.lock().unwrap();
        let mut copy = state.clone();
        let value = f(&mut copy);
        self.persist(&copy)?;
        *state = copy;
        Ok(value)
    }

    fn persist(&self, db: &Database) -> Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(db)?;
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors produced when loading or persisting the store.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Format(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Format(e) => write!(f, "malformed database: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Format(e) => Some(e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(e)
    }
}
