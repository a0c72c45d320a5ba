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

//! Database dumps.
//!
//! Two kinds of bzip2-compressed JSON files accumulate in the backup
//! directory, both named after the audit high-water mark they capture:
//!
//! - `full_database_dump-<audit_id>.bz2` — the whole [`Database`],
//!   written whenever an export detects changes. Recovery restores the
//!   newest one at or below its target id.
//! - `audit_log_replay_dump-<audit_id>.bz2` — the audit entries
//!   between the previous dump and this one, kept so replay still
//!   works if the live audit log loses history.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::tables::AuditLogEntry;
use super::{Database, Error};

pub const FULL_DUMP_PREFIX: &str = "full_database_dump-";
pub const REPLAY_DUMP_PREFIX: &str = "audit_log_replay_dump-";
const DUMP_SUFFIX: &str = ".bz2";

////////////////////////////////////////////////////////////////////////
// WRITING                                                            //
////////////////////////////////////////////////////////////////////////

/// Writes `full_database_dump-<audit_id>.bz2` into the backup
/// directory and returns its path.
pub fn write_full_dump(backup_dir: &Path, audit_id: u64, db: &Database) -> Result<PathBuf, Error> {
    let name = format!("{}{}{}", FULL_DUMP_PREFIX, audit_id, DUMP_SUFFIX);
    write_compressed(backup_dir, &name, db)
}

/// Writes `audit_log_replay_dump-<audit_id>.bz2` into the backup
/// directory and returns its path.
pub fn write_replay_dump(
    backup_dir: &Path,
    audit_id: u64,
    entries: &[AuditLogEntry],
) -> Result<PathBuf, Error> {
    let name = format!("{}{}{}", REPLAY_DUMP_PREFIX, audit_id, DUMP_SUFFIX);
    write_compressed(backup_dir, &name, &entries)
}

fn write_compressed<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<PathBuf, Error> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let bytes = serde_json::to_vec(value)?;
    let mut encoder = BzEncoder::new(fs::File::create(&tmp)?, Compression::default());
    encoder.write_all(&bytes)?;
    encoder.finish()?;
    fs::rename(&tmp, &path)?;
    Ok(path)
}

////////////////////////////////////////////////////////////////////////
// READING                                                            //
////////////////////////////////////////////////////////////////////////

pub fn read_full_dump(path: &Path) -> Result<Database, Error> {
    read_compressed(path)
}

pub fn read_replay_dump(path: &Path) -> Result<Vec<AuditLogEntry>, Error> {
    read_compressed(path)
}

fn read_compressed<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let mut decoder = BzDecoder::new(fs::File::open(path)?);
    let mut bytes = Vec::new();
    decoder.read_to_end(&mut bytes)?;
    Ok(serde_json::from_slice(&bytes)?)
}

////////////////////////////////////////////////////////////////////////
// DISCOVERY                                                          //
////////////////////////////////////////////////////////////////////////

/// Finds the full dump with the greatest audit id, optionally bounded
/// by `max_id`. A missing backup directory means no dumps.
pub fn find_latest_full_dump(
    backup_dir: &Path,
    max_id: Option<u64>,
) -> Result<Option<(u64, PathBuf)>, Error> {
    let mut best: Option<(u64, PathBuf)> = None;
    for (id, path) in list_dumps(backup_dir, FULL_DUMP_PREFIX)? {
        if max_id.map_or(false, |m| id > m) {
            continue;
        }
        if best.as_ref().map_or(true, |(b, _)| id > *b) {
            best = Some((id, path));
        }
    }
    Ok(best)
}

/// All audit replay dumps in the backup directory, ascending by id.
pub fn list_replay_dumps(backup_dir: &Path) -> Result<Vec<(u64, PathBuf)>, Error> {
    list_dumps(backup_dir, REPLAY_DUMP_PREFIX)
}

fn list_dumps(backup_dir: &Path, prefix: &str) -> Result<Vec<(u64, PathBuf)>, Error> {
    let entries = match fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut dumps = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(name) => name,
            None => continue,
        };
        if let Some(id) = parse_dump_id(name, prefix) {
            dumps.push((id, entry.path()));
        }
    }
    dumps.sort_by_key(|(id, _)| *id);
    Ok(dumps)
}

fn parse_dump_id(name: &str, prefix: &str) -> Option<u64> {
    name.strip_prefix(prefix)?
        .strip_suffix(DUMP_SUFFIX)?
        .parse()
        .ok()
}
