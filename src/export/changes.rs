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

//! Change detection against the newest full dump.
//!
//! An export only produces a new package when the management tables
//! differ from what the previous export saw. The comparison ignores
//! the audit log (it grows on every action, including rejected ones)
//! and the timestamps on named.conf options, which do not affect the
//! generated files.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::info;

use crate::store::dump;
use crate::store::tables::Tables;
use crate::store::{self, Database};

/// What change detection concluded.
#[derive(Debug)]
pub struct Change {
    /// Whether the tables differ from the newest full dump (or no dump
    /// exists yet).
    pub changed: bool,

    /// The newest full dump's audit id, if there is one.
    pub previous: Option<u64>,
}

/// Compares `database` against the newest full dump under
/// `backup_dir`.
pub fn detect(backup_dir: &Path, database: &Database) -> Result<Change, store::Error> {
    match dump::find_latest_full_dump(backup_dir, None)? {
        None => {
            info!("no previous full dump; treating everything as changed");
            Ok(Change {
                changed: true,
                previous: None,
            })
        }
        Some((id, path)) => {
            let previous = dump::read_full_dump(&path)?;
            let changed = comparable(&database.tables) != comparable(&previous.tables);
            info!(
                "compared against full dump {}: {}",
                id,
                if changed { "changed" } else { "no changes" }
            );
            Ok(Change {
                changed,
                previous: Some(id),
            })
        }
    }
}

/// Writes the full dump and the replay dump for this export: the full
/// dump captures the whole database at the current high-water mark,
/// and the replay dump holds just the audit entries after `previous`.
/// Returns the dump id.
pub fn write_dumps(
    backup_dir: &Path,
    database: &Database,
    previous: Option<u64>,
) -> Result<u64, store::Error> {
    let high = database.high_water();
    let full = dump::write_full_dump(backup_dir, high, database)?;
    info!("wrote {}", full.display());

    let entries: Vec<_> = database
        .audit_log
        .iter()
        .filter(|entry| previous.map_or(true, |p| entry.id > p) && entry.id <= high)
        .cloned()
        .collect();
    let replay = dump::write_replay_dump(backup_dir, high, &entries)?;
    info!("wrote {} ({} entries)", replay.display(), entries.len());
    Ok(high)
}

/// Strips the parts of the tables that change without changing the
/// export's output, so that equality means "the same files would be
/// generated".
fn comparable(tables: &Tables) -> Tables {
    let mut tables = tables.clone();
    for option in &mut tables.named_conf_options {
        option.created_at = DateTime::<Utc>::MIN_UTC;
    }
    tables
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
