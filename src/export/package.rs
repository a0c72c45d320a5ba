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

//! Packaging the written trees.
//!
//! Every server tree is archived as `<server>.tar.bz2`, and the run's
//! archives are collected into
//! `dns_tree_<DD_MM_YY>T<HH_MM>-<audit_id>.tar.bz2` in the backup
//! directory. Two properties matter here:
//!
//! - Archives are byte-for-byte reproducible for the same tree
//!   contents. Tar headers carry fixed ownership, mode, and mtime, and
//!   members are appended in sorted order, so re-running an unchanged
//!   export rewrites identical packages.
//! - Replacement is atomic. A new archive is staged under a `.new`
//!   name; the previous package for the same audit id (whatever it is
//!   named) is set aside as `.tmp`, removed only once the new file has
//!   landed, and restored if it has not.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use chrono::{DateTime, Utc};
use log::{info, warn};
use tar::{Archive, Builder, Header};

use super::tree::ServerTree;
use super::ExportContext;

const TREE_FILE_PREFIX: &str = "dns_tree_";
const TREE_FILE_SUFFIX: &str = ".tar.bz2";

/// Packages the written trees and lands the run archive in the backup
/// directory, replacing any previous package for `audit_id`.
pub(super) fn package_run(
    ctx: &ExportContext,
    trees: &[ServerTree],
    audit_id: u64,
    timestamp: DateTime<Utc>,
) -> io::Result<PathBuf> {
    let mut archives = Vec::new();
    for tree in trees {
        archives.push((tree.server.name.clone(), server_archive(ctx, tree)?));
    }
    archives.sort();

    fs::create_dir_all(&ctx.backup_dir)?;
    let target = ctx.backup_dir.join(run_archive_name(audit_id, timestamp));
    let staged = staged_name(&target);
    if let Err(err) = write_run_archive(&staged, &archives) {
        let _ = fs::remove_file(&staged);
        return Err(err);
    }

    let previous = find_tree_file(&ctx.backup_dir, audit_id)?;
    land(&staged, &target, previous.as_deref())?;
    info!(
        "packaged {} server archives into {}",
        archives.len(),
        target.display()
    );
    Ok(target)
}

/// Builds `<server>.tar.bz2` next to the server's tree, holding the
/// tree's whole file inventory with archive-relative paths.
fn server_archive(ctx: &ExportContext, tree: &ServerTree) -> io::Result<PathBuf> {
    let target = ctx
        .root_config_dir
        .join(format!("{}.tar.bz2", tree.server.name));
    let staged = staged_name(&target);

    let mut files = Vec::new();
    collect_files(&tree.directory, &tree.directory, &mut files)?;
    files.sort();
    if let Err(err) = write_file_archive(&staged, &files) {
        let _ = fs::remove_file(&staged);
        return Err(err);
    }

    let previous = target.exists().then(|| target.clone());
    land(&staged, &target, previous.as_deref())?;
    Ok(target)
}

fn write_file_archive(staged: &Path, files: &[(String, PathBuf)]) -> io::Result<()> {
    let file = File::create(staged)?;
    let mut builder = Builder::new(BzEncoder::new(file, Compression::default()));
    for (name, path) in files {
        let content = fs::read(path)?;
        append_member(&mut builder, name, &content)?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

fn write_run_archive(staged: &Path, archives: &[(String, PathBuf)]) -> io::Result<()> {
    let file = File::create(staged)?;
    let mut builder = Builder::new(BzEncoder::new(file, Compression::default()));
    for (server, path) in archives {
        let content = fs::read(path)?;
        append_member(&mut builder, &format!("{}.tar.bz2", server), &content)?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

/// Appends one member with fixed metadata, keeping the archive bytes a
/// function of the file contents alone.
fn append_member<W: io::Write>(
    builder: &mut Builder<W>,
    name: &str,
    content: &[u8],
) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    builder.append_data(&mut header, name, content)
}

fn collect_files(
    base: &Path,
    dir: &Path,
    files: &mut Vec<(String, PathBuf)>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(base, &path, files)?;
        } else {
            let relative = path
                .strip_prefix(base)
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "file outside tree"))?;
            files.push((relative.to_string_lossy().into_owned(), path));
        }
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// ATOMIC REPLACEMENT                                                 //
////////////////////////////////////////////////////////////////////////

fn staged_name(target: &Path) -> PathBuf {
    appended_name(target, ".new")
}

fn appended_name(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Moves `staged` over `target`. The `previous` package (possibly the
/// target itself, possibly an older name for the same audit id) is set
/// aside first and removed only once the new file is in place; on
/// failure it is put back.
fn land(staged: &Path, target: &Path, previous: Option<&Path>) -> io::Result<()> {
    let aside = previous.map(|p| appended_name(p, ".tmp"));
    if let (Some(previous), Some(aside)) = (previous, aside.as_ref()) {
        fs::rename(previous, aside)?;
    }
    match fs::rename(staged, target) {
        Ok(()) => {
            if let Some(aside) = aside {
                if let Err(err) = fs::remove_file(&aside) {
                    warn!("failed to remove {}: {}", aside.display(), err);
                }
            }
            Ok(())
        }
        Err(err) => {
            if let (Some(previous), Some(aside)) = (previous, aside.as_ref()) {
                let _ = fs::rename(aside, previous);
            }
            let _ = fs::remove_file(staged);
            Err(err)
        }
    }
}

////////////////////////////////////////////////////////////////////////
// LOOKUP AND UNPACKING                                               //
////////////////////////////////////////////////////////////////////////

/// The run archive name for an export committed at `timestamp` with
/// audit high-water mark `audit_id`.
pub fn run_archive_name(audit_id: u64, timestamp: DateTime<Utc>) -> String {
    format!(
        "{}{}-{}{}",
        TREE_FILE_PREFIX,
        timestamp.format("%d_%m_%yT%H_%M"),
        audit_id,
        TREE_FILE_SUFFIX
    )
}

/// Finds the run archive for `audit_id`, scanning names in sorted
/// order. Returns `None` when no package for that id exists.
pub fn find_tree_file(backup_dir: &Path, audit_id: u64) -> io::Result<Option<PathBuf>> {
    let entries = match fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut names = Vec::new();
    for entry in entries {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    for name in names {
        if parse_tree_file_id(&name) == Some(audit_id) {
            return Ok(Some(backup_dir.join(name)));
        }
    }
    Ok(None)
}

fn parse_tree_file_id(name: &str) -> Option<u64> {
    let rest = name.strip_prefix(TREE_FILE_PREFIX)?;
    let rest = rest.strip_suffix(TREE_FILE_SUFFIX)?;
    let (_, id) = rest.rsplit_once('-')?;
    id.parse().ok()
}

/// Unpacks a run archive into `dest`, one directory per server.
/// Returns the extracted `(server, directory)` pairs.
pub fn unpack_run(package: &Path, dest: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let file = File::open(package)?;
    let mut outer = Archive::new(BzDecoder::new(file));
    let mut servers = Vec::new();
    for entry in outer.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let server = match name.strip_suffix(TREE_FILE_SUFFIX) {
            Some(server) => server.to_owned(),
            None => continue,
        };
        let server_dir = dest.join(&server);
        fs::create_dir_all(&server_dir)?;
        let mut inner_bytes = Vec::new();
        entry.read_to_end(&mut inner_bytes)?;
        Archive::new(BzDecoder::new(&inner_bytes[..])).unpack(&server_dir)?;
        servers.push((server, server_dir));
    }
    servers.sort();
    Ok(servers)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
