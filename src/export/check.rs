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

//! Integrity checking of generated trees.
//!
//! The exporter's own validation is structural; whether BIND would
//! actually load the files is the business of `named-checkconf` and
//! `named-checkzone`. A server whose tree is rejected by either tool
//! is excluded from packaging and distribution.
//!
//! The tools report trouble inconsistently: some problems are a
//! non-zero exit, some are an `ERROR:` line, and zone errors show up
//! as `not loaded` with a zero exit in older releases. All three count
//! as rejection here.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use log::debug;

use super::exec;
use super::tree::ServerTree;
use super::ExportContext;

/// How long a single validator invocation may run. The validators are
/// local and fast; anything near this is already wedged.
const CHECK_TIMEOUT: Duration = Duration::from_secs(60);

/// One rejected file.
#[derive(Clone, Debug)]
pub struct CheckFailure {
    pub server: String,
    pub file: PathBuf,
    pub message: String,
}

/// Runs the configured validators over one server's freshly written
/// tree. An empty result means the server passed.
pub(super) fn check_tree(ctx: &ExportContext, tree: &ServerTree) -> Vec<CheckFailure> {
    let mut failures = Vec::new();
    if let Some(tool) = &ctx.checkconf_tool {
        for conf in &tree.conf_files {
            let mut command = Command::new(tool);
            command.arg(conf);
            validate(&tree.server.name, conf, command, &mut failures);
        }
    }
    if let Some(tool) = &ctx.checkzone_tool {
        for (origin, path) in &tree.zone_files {
            let mut command = Command::new(tool);
            command.arg("-q").arg(origin).arg(path);
            validate(&tree.server.name, path, command, &mut failures);
        }
    }
    failures
}

/// Checks one server directory extracted from a prior package. Zone
/// origins are recovered from the `$ORIGIN` line of each file.
pub fn check_unpacked(
    ctx: &ExportContext,
    server: &str,
    directory: &Path,
) -> Vec<CheckFailure> {
    let mut failures = Vec::new();

    if let Some(tool) = &ctx.checkconf_tool {
        for name in ["named.conf.a", "named.conf.b"] {
            let conf = directory.join(name);
            if !conf.is_file() {
                continue;
            }
            let mut command = Command::new(tool);
            command.arg(&conf);
            validate(server, &conf, command, &mut failures);
        }
    }

    if let Some(tool) = &ctx.checkzone_tool {
        let mut zone_files = Vec::new();
        if let Err(err) = collect_zone_files(&directory.join(&ctx.named_dir), &mut zone_files) {
            failures.push(CheckFailure {
                server: server.to_owned(),
                file: directory.to_owned(),
                message: format!("failed to scan extracted tree: {}", err),
            });
            return failures;
        }
        zone_files.sort();
        for path in zone_files {
            match origin_of(&path) {
                Ok(Some(origin)) => {
                    let mut command = Command::new(tool);
                    command.arg("-q").arg(&origin).arg(&path);
                    validate(server, &path, command, &mut failures);
                }
                Ok(None) => failures.push(CheckFailure {
                    server: server.to_owned(),
                    file: path,
                    message: "zone file has no $ORIGIN line".to_owned(),
                }),
                Err(err) => failures.push(CheckFailure {
                    server: server.to_owned(),
                    file: path,
                    message: format!("failed to read zone file: {}", err),
                }),
            }
        }
    }

    failures
}

fn validate(server: &str, file: &Path, command: Command, failures: &mut Vec<CheckFailure>) {
    debug!("validating {} for {}", file.display(), server);
    match exec::run(command, CHECK_TIMEOUT) {
        Ok(execution) => {
            if let Some(message) = rejection(&execution) {
                failures.push(CheckFailure {
                    server: server.to_owned(),
                    file: file.to_owned(),
                    message,
                });
            }
        }
        Err(err) => failures.push(CheckFailure {
            server: server.to_owned(),
            file: file.to_owned(),
            message: format!("failed to run validator: {}", err),
        }),
    }
}

/// Decides whether a validator run counts as a rejection, and if so
/// with what message.
fn rejection(execution: &exec::Execution) -> Option<String> {
    let flagged = execution
        .stdout
        .lines()
        .chain(execution.stderr.lines())
        .find(|line| line.contains("ERROR:") || line.contains("not loaded"))
        .map(str::to_owned);
    if execution.success() {
        flagged
    } else {
        Some(flagged.unwrap_or_else(|| execution.describe_failure()))
    }
}

fn collect_zone_files(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_zone_files(&path, files)?;
        } else if path.extension().map_or(false, |ext| ext == "db") {
            files.push(path);
        }
    }
    Ok(())
}

fn origin_of(path: &Path) -> io::Result<Option<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .find_map(|line| line.strip_prefix("$ORIGIN "))
        .map(|origin| origin.trim().to_owned()))
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tables::DnsServer;

    fn tree_with_validators(root: &Path, checkzone: &str) -> (ExportContext, ServerTree) {
        let mut ctx = ExportContext::new(root.join("trees"), root.join("backups"));
        ctx.checkzone_tool = Some(checkzone.to_owned());
        let directory = ctx.root_config_dir.join("ns1");
        let db = directory.join("named/internal/example.lcl.db");
        fs::create_dir_all(db.parent().unwrap()).unwrap();
        fs::write(&db, "$ORIGIN example.lcl.\n").unwrap();
        let tree = ServerTree {
            server_set: "internal_dns".to_owned(),
            server: DnsServer {
                name: "ns1".to_owned(),
                ssh_user: "dnsop".to_owned(),
                remote_bind_dir: "/etc/bind".to_owned(),
                remote_test_dir: "/etc/bind/test".to_owned(),
            },
            directory,
            conf_files: Vec::new(),
            zone_files: vec![("example.lcl.".to_owned(), db)],
        };
        (ctx, tree)
    }

    fn fake_tool(dir: &Path, name: &str, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn passing_validators_report_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "ok-checkzone", "exit 0");
        let (ctx, tree) = tree_with_validators(dir.path(), &tool);
        assert!(check_tree(&ctx, &tree).is_empty());
    }

    #[test]
    fn error_lines_count_even_with_a_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            "sly-checkzone",
            "echo 'zone example.lcl/IN: not loaded due to errors.'; exit 0",
        );
        let (ctx, tree) = tree_with_validators(dir.path(), &tool);
        let failures = check_tree(&ctx, &tree);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].server, "ns1");
        assert!(failures[0].message.contains("not loaded"));
    }

    #[test]
    fn nonzero_exits_count() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "bad-checkzone", "echo 'ERROR: bad serial' >&2; exit 1");
        let (ctx, tree) = tree_with_validators(dir.path(), &tool);
        let failures = check_tree(&ctx, &tree);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, "ERROR: bad serial");
    }

    #[test]
    fn unpacked_trees_recover_origins() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("args");
        let tool = fake_tool(
            dir.path(),
            "recording-checkzone",
            &format!("echo \"$@\" >> {}", record.display()),
        );
        let (ctx, tree) = tree_with_validators(dir.path(), &tool);
        let failures = check_unpacked(&ctx, "ns1", &tree.directory);
        assert!(failures.is_empty());
        let recorded = fs::read_to_string(&record).unwrap();
        assert!(recorded.contains("example.lcl."));
        assert!(recorded.contains("example.lcl.db"));
    }
}
