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

//! The export lock.
//!
//! The configuration tree, the backup directory, and the database file
//! are shared between every conifer invocation on a host. A lock file
//! at a configured path serializes them: exports, recoveries, and
//! distribution runs all take the lock first and hold it until they
//! finish.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use log::debug;

/// A held lock file. The file is created exclusively on acquisition,
/// holds the owning process id, and is removed when this is dropped.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Acquires the lock at `path`, failing if another process holds
    /// it.
    pub fn acquire(path: &Path) -> Result<Self, Error> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                // Failing to record the pid does not unlock anything;
                // the file itself is the lock.
                let _ = write!(file, "{}", process::id());
                debug!("acquired lock file {}", path.display());
                Ok(Self {
                    path: path.to_owned(),
                })
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(Error::Held {
                path: path.to_owned(),
                holder: fs::read_to_string(path)
                    .ok()
                    .and_then(|pid| pid.trim().parse().ok()),
            }),
            Err(err) => Err(Error::Io(err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            debug!("failed to remove lock file {}: {}", self.path.display(), err);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error acquiring the export lock.
#[derive(Debug)]
pub enum Error {
    /// Another process holds the lock.
    Held {
        path: PathBuf,
        holder: Option<u32>,
    },

    /// The lock file could not be created.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Held { path, holder } => {
                write!(f, "another export holds the lock {}", path.display())?;
                if let Some(pid) = holder {
                    write!(f, " (pid {})", pid)?;
                }
                Ok(())
            }
            Self::Io(err) => write!(f, "failed to create lock file: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Held { .. } => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_lock_excludes_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.lock");

        let lock = LockFile::acquire(&path).unwrap();
        match LockFile::acquire(&path) {
            Err(Error::Held { holder, .. }) => assert_eq!(holder, Some(process::id())),
            other => panic!("expected the lock to be held: {:?}", other),
        }

        drop(lock);
        assert!(!path.exists());
        let _relock = LockFile::acquire(&path).unwrap();
    }
}
