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

//! The export pipeline.
//!
//! An export turns the management database into installable BIND
//! configuration trees. It proceeds through a fixed sequence of
//! phases: snapshot the database, detect whether anything changed
//! since the last export, cook the snapshot into per-set
//! configurations, write one tree per server, validate the trees,
//! package everything into one archive per run, and finally (when
//! credentials are configured) distribute the trees to their servers.
//!
//! Failures are contained where the pipeline defines a skip: a
//! structurally broken server set is excluded while the others
//! continue, and a server whose tree fails validation is excluded
//! from packaging and distribution. Failures without a defined skip
//! (the database, the archive) abort the run, leaving the previous
//! package in place.

mod changes;
mod check;
mod exec;
mod package;
mod publish;
mod tree;

use std::fmt;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info};

use crate::cook;
use crate::report::Report;
use crate::store::{self, Store};
use crate::thread;

pub use check::{check_unpacked, CheckFailure};
pub use package::{find_tree_file, run_archive_name, unpack_run};
pub use publish::{distribute, PublishFailure, PublishOutcome, PublishParams};
pub use tree::ServerTree;

////////////////////////////////////////////////////////////////////////
// CONTEXT                                                            //
////////////////////////////////////////////////////////////////////////

/// Everything an export needs to know about its surroundings.
#[derive(Clone, Debug)]
pub struct ExportContext {
    /// Where the per-server trees and per-server archives are written.
    pub root_config_dir: PathBuf,

    /// Where run archives and database dumps are kept.
    pub backup_dir: PathBuf,

    /// The name of the zone-file subdirectory of each tree.
    pub named_dir: String,

    /// The distribution worker bound.
    pub max_threads: usize,

    /// The zone validator, usually named-checkzone. Validation is
    /// skipped if unset.
    pub checkzone_tool: Option<String>,

    /// The configuration validator, usually named-checkconf.
    pub checkconf_tool: Option<String>,

    /// Distribution credentials. Without them the run stops after
    /// packaging.
    pub publish: Option<PublishParams>,

    pub probe_timeout: Duration,
    pub rsync_timeout: Duration,
    pub reload_timeout: Duration,
}

impl ExportContext {
    pub fn new(root_config_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_config_dir: root_config_dir.into(),
            backup_dir: backup_dir.into(),
            named_dir: "named".to_owned(),
            max_threads: std::thread::available_parallelism().map_or(4, NonZeroUsize::get),
            checkzone_tool: None,
            checkconf_tool: None,
            publish: None,
            probe_timeout: Duration::from_secs(10),
            rsync_timeout: Duration::from_secs(60),
            reload_timeout: Duration::from_secs(30),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// PHASES AND OUTCOMES                                                //
////////////////////////////////////////////////////////////////////////

/// The phases of an export run, in order. Report sections and
/// cancellation errors are labelled with the phase they belong to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Init,
    LockAcquired,
    SnapshotRead,
    ChangeDetected,
    Cooked,
    Written,
    Checked,
    Packaged,
    Published,
    Done,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::LockAcquired => "lock-acquired",
            Self::SnapshotRead => "snapshot-read",
            Self::ChangeDetected => "change-detected",
            Self::Cooked => "cooked",
            Self::Written => "written",
            Self::Checked => "checked",
            Self::Packaged => "packaged",
            Self::Published => "published",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended, short of an error.
#[derive(Debug)]
pub enum Outcome {
    /// The database matches the last export and `force` was not given.
    NoChanges { audit_id: u64 },

    /// A package was produced. The report carries everything that was
    /// skipped along the way; a report with failures should surface
    /// as a non-zero exit.
    Exported {
        audit_id: u64,
        package: PathBuf,
        report: Report,
    },
}

////////////////////////////////////////////////////////////////////////
// THE RUN                                                            //
////////////////////////////////////////////////////////////////////////

/// Runs one export. The caller holds the export lock for the whole
/// call. `cancel` is polled between phases; once a phase has started
/// it runs to completion.
pub fn run(
    ctx: &ExportContext,
    store: &Store,
    force: bool,
    cancel: &AtomicBool,
) -> Result<Outcome, Error> {
    let mut report = Report::new();

    enter(cancel, Phase::SnapshotRead)?;
    let database = store.database();
    info!(
        "read a snapshot of the database at audit id {}",
        database.high_water(),
    );

    enter(cancel, Phase::ChangeDetected)?;
    let change = changes::detect(&ctx.backup_dir, &database)?;
    if !change.changed && !force {
        return Ok(Outcome::NoChanges {
            audit_id: database.high_water(),
        });
    }
    let audit_id = if change.changed {
        changes::write_dumps(&ctx.backup_dir, &database, change.previous)?
    } else {
        // A forced export of an unchanged database reuses the current
        // high-water mark and leaves the dumps alone.
        database.high_water()
    };

    enter(cancel, Phase::Cooked)?;
    let cooked = cook::cook(&database.tables);
    for failure in &cooked.failures {
        report.failure(
            Phase::Cooked.as_str(),
            Some(&failure.server_set),
            failure.error.to_string(),
        );
    }

    enter(cancel, Phase::Written)?;
    // Info files carry the audit entry's timestamp, not the wall
    // clock, so a forced re-export of the same state writes the same
    // bytes.
    let audit_timestamp = database
        .audit_log
        .last()
        .map_or_else(Utc::now, |entry| entry.timestamp);
    let mut trees = Vec::new();
    for set in cooked.sets.values() {
        match tree::write_set(ctx, set, audit_id, audit_timestamp) {
            Ok(mut set_trees) => trees.append(&mut set_trees),
            Err(tree::WriteSetError::Header(error)) => report.failure(
                Phase::Written.as_str(),
                Some(&set.name),
                format!("bad named.conf header: {}", error),
            ),
            Err(tree::WriteSetError::Io(error)) => {
                // The tree may be half written; take it out so it
                // cannot be mistaken for a complete one.
                for server in &set.dns_servers {
                    let _ = fs::remove_dir_all(ctx.root_config_dir.join(&server.name));
                }
                return Err(Error::WriteTree {
                    server_set: set.name.clone(),
                    error,
                });
            }
        }
    }

    enter(cancel, Phase::Checked)?;
    let mut healthy = Vec::new();
    for tree in trees {
        let failures = check::check_tree(ctx, &tree);
        if failures.is_empty() {
            healthy.push(tree);
        } else {
            info!(
                "excluding {} from packaging and distribution",
                tree.server.name,
            );
            for failure in failures {
                report.failure(
                    Phase::Checked.as_str(),
                    Some(&failure.server),
                    format!("{}: {}", failure.file.display(), failure.message),
                );
            }
        }
    }

    enter(cancel, Phase::Packaged)?;
    let package =
        package::package_run(ctx, &healthy, audit_id, Utc::now()).map_err(Error::Package)?;

    if let Some(params) = &ctx.publish {
        enter(cancel, Phase::Published)?;
        let targets = healthy
            .iter()
            .map(|tree| (tree.server.clone(), tree.directory.clone()))
            .collect();
        let outcomes = publish::distribute(ctx, params, targets).map_err(Error::Threads)?;
        for outcome in outcomes {
            if let Some(version) = &outcome.bind_version {
                report.note(
                    Phase::Published.as_str(),
                    Some(&outcome.server),
                    format!("running {}", version),
                );
            }
            if let Some(failure) = outcome.failure {
                report.failure(
                    Phase::Published.as_str(),
                    Some(&outcome.server),
                    format!("{} failed: {}", failure.step, failure.message),
                );
            }
        }
    } else {
        info!("no distribution credentials configured; stopping after packaging");
    }

    debug!("entering the {} phase", Phase::Done);
    Ok(Outcome::Exported {
        audit_id,
        package,
        report,
    })
}

fn enter(cancel: &AtomicBool, phase: Phase) -> Result<(), Error> {
    if cancel.load(Ordering::Relaxed) {
        Err(Error::Cancelled(phase))
    } else {
        debug!("entering the {} phase", phase);
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors that abort an export run.
#[derive(Debug)]
pub enum Error {
    Store(store::Error),
    WriteTree {
        server_set: String,
        error: io::Error,
    },
    Package(io::Error),
    Threads(thread::Error),
    Cancelled(Phase),
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Self {
        Self::Store(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Store(err) => err.fmt(f),
            Self::WriteTree { server_set, error } => write!(
                f,
                "failed to write the tree for server set {:?}: {}",
                server_set, error,
            ),
            Self::Package(err) => write!(f, "failed to package the export: {}", err),
            Self::Threads(err) => write!(f, "failed to run the distribution workers: {}", err),
            Self::Cancelled(phase) => write!(f, "cancelled during the {} phase", phase),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::WriteTree { error, .. } => Some(error),
            Self::Package(err) => Some(err),
            Self::Threads(err) => Some(err),
            Self::Cancelled(_) => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;

    use super::*;
    use crate::ops::{self, Action, LiveAudit};
    use crate::records::{RecordData, RecordType};
    use crate::replay;
    use crate::store::tables::{
        Acl, AclRangeEntry, AuditLogEntry, DnsServer, DnsServerSet, NamedConfGlobalOption,
        Record, ServerSetServerAssignment, ServerSetViewAssignment, Tables, View,
        ViewAclAssignment, Zone, ZoneType, ZoneViewAssignment,
    };

    fn fixture_tables() -> Tables {
        let mut tables = Tables::default();
        tables.dns_servers.push(DnsServer {
            name: "ns1".to_owned(),
            ssh_user: "dnsop".to_owned(),
            remote_bind_dir: "/etc/bind".to_owned(),
            remote_test_dir: "/etc/bind/test".to_owned(),
        });
        tables.dns_server_sets.push(DnsServerSet {
            name: "internal_dns".to_owned(),
        });
        tables.server_set_servers.push(ServerSetServerAssignment {
            server_set: "internal_dns".to_owned(),
            dns_server: "ns1".to_owned(),
        });
        tables.views.push(View {
            name: "internal".to_owned(),
            options: String::new(),
        });
        tables.server_set_views.push(ServerSetViewAssignment {
            server_set: "internal_dns".to_owned(),
            view: "internal".to_owned(),
        });
        tables.acls.push(Acl {
            name: "trusted".to_owned(),
            range_entries: vec![AclRangeEntry {
                cidr: "10.0.0.0/8".parse().unwrap(),
                allowed: true,
            }],
        });
        tables.view_acls.push(ViewAclAssignment {
            view: "internal".to_owned(),
            acl: "trusted".to_owned(),
            allowed: true,
            order: 1,
        });
        tables.zones.push(Zone {
            name: "example.lcl".to_owned(),
            origin: "example.lcl.".to_owned(),
            zone_type: ZoneType::Master,
            options: String::new(),
        });
        tables.zone_views.push(ZoneViewAssignment {
            zone: "example.lcl".to_owned(),
            view_dep: "any".to_owned(),
        });
        tables.records.push(Record {
            id: 1,
            target: "@".to_owned(),
            zone: "example.lcl".to_owned(),
            view_dep: "any".to_owned(),
            ttl: 3600,
            last_user: "admin".to_owned(),
            data: RecordData::Soa {
                name_server: "ns1.example.lcl.".to_owned(),
                admin_email: "hostmaster.example.lcl.".to_owned(),
                serial_number: 2024030101,
                refresh: 10800,
                retry: 3600,
                expiry: 604800,
                minimum: 3600,
            },
        });
        tables.records.push(Record {
            id: 2,
            target: "@".to_owned(),
            zone: "example.lcl".to_owned(),
            view_dep: "any".to_owned(),
            ttl: 3600,
            last_user: "admin".to_owned(),
            data: RecordData::Ns {
                name_server: "ns1.example.lcl.".to_owned(),
            },
        });
        tables.records.push(Record {
            id: 3,
            target: "host1".to_owned(),
            zone: "example.lcl".to_owned(),
            view_dep: "any".to_owned(),
            ttl: 3600,
            last_user: "admin".to_owned(),
            data: RecordData::A {
                ip: "10.0.0.10".parse().unwrap(),
            },
        });
        tables.named_conf_options.push(NamedConfGlobalOption {
            server_set: "internal_dns".to_owned(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            content: "options {\n    directory \"/var/named\";\n    recursion no;\n};\n"
                .to_owned(),
        });
        tables
    }

    fn fixture_store(dir: &std::path::Path) -> Store {
        let store = Store::open(dir.join("db.json")).unwrap();
        store
            .with_database(|db| {
                db.tables = fixture_tables();
                db.audit_log.push(AuditLogEntry {
                    id: 1,
                    timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
                    user: "admin".to_owned(),
                    action: Action::MakeDnsServer {
                        name: "ns1".to_owned(),
                        ssh_user: "dnsop".to_owned(),
                        remote_bind_dir: "/etc/bind".to_owned(),
                        remote_test_dir: "/etc/bind/test".to_owned(),
                    },
                    success: true,
                });
            })
            .unwrap();
        store
    }

    #[test]
    fn an_export_runs_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(dir.path());
        let ctx = ExportContext::new(dir.path().join("trees"), dir.path().join("backups"));
        let cancel = AtomicBool::new(false);

        match run(&ctx, &store, false, &cancel).unwrap() {
            Outcome::Exported {
                audit_id,
                package,
                report,
            } => {
                assert_eq!(audit_id, 1);
                assert!(package.is_file());
                assert!(!report.has_failures());
            }
            other => panic!("expected an export, got {:?}", other),
        }

        let tree = dir.path().join("trees/ns1");
        assert!(tree.join("named.conf.a").is_file());
        assert!(tree.join("named.conf.b").is_file());
        assert!(tree.join("ns1.info").is_file());
        assert!(tree.join("named/internal/example.lcl.db").is_file());
        assert!(dir
            .path()
            .join("backups/full_database_dump-1.bz2")
            .is_file());
        assert!(dir
            .path()
            .join("backups/audit_log_replay_dump-1.bz2")
            .is_file());
    }

    #[test]
    fn an_unchanged_database_exports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(dir.path());
        let ctx = ExportContext::new(dir.path().join("trees"), dir.path().join("backups"));
        let cancel = AtomicBool::new(false);

        let first = match run(&ctx, &store, false, &cancel).unwrap() {
            Outcome::Exported { package, .. } => fs::read(package).unwrap(),
            other => panic!("expected an export, got {:?}", other),
        };
        match run(&ctx, &store, false, &cancel).unwrap() {
            Outcome::NoChanges { audit_id } => assert_eq!(audit_id, 1),
            other => panic!("expected no changes, got {:?}", other),
        }

        // A forced run exports anyway, reusing the audit id and
        // producing the same bytes.
        match run(&ctx, &store, true, &cancel).unwrap() {
            Outcome::Exported { audit_id, package, .. } => {
                assert_eq!(audit_id, 1);
                assert_eq!(fs::read(package).unwrap(), first);
            }
            other => panic!("expected an export, got {:?}", other),
        }
    }

    #[test]
    fn recovery_restores_the_tree_an_earlier_export_produced() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(dir.path());
        let ctx = ExportContext::new(dir.path().join("trees"), dir.path().join("backups"));
        let cancel = AtomicBool::new(false);

        run(&ctx, &store, false, &cancel).unwrap();
        let tree = dir.path().join("trees/ns1");
        let conf = fs::read(tree.join("named.conf.a")).unwrap();
        let zone = fs::read(tree.join("named/internal/example.lcl.db")).unwrap();

        // Delete host1 and export the smaller database.
        store
            .with_database(|db| {
                ops::apply(
                    db,
                    "admin",
                    Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap(),
                    Action::RemoveRecord {
                        zone: "example.lcl".to_owned(),
                        view_dep: "any".to_owned(),
                        target: "host1".to_owned(),
                        record_type: RecordType::A,
                        arguments: BTreeMap::from([("ip".to_owned(), "10.0.0.10".to_owned())]),
                    },
                    &mut LiveAudit,
                )
                .unwrap();
            })
            .unwrap();
        run(&ctx, &store, false, &cancel).unwrap();
        let smaller = fs::read_to_string(tree.join("named/internal/example.lcl.db")).unwrap();
        assert!(!smaller.contains("host1"));

        // Recovering to the first export's audit id brings the record
        // back; the next export writes the original files again.
        replay::recover(&store, &ctx.backup_dir, 1).unwrap();
        match run(&ctx, &store, false, &cancel).unwrap() {
            Outcome::Exported { report, .. } => assert!(!report.has_failures()),
            other => panic!("expected an export, got {:?}", other),
        }
        assert_eq!(fs::read(tree.join("named.conf.a")).unwrap(), conf);
        assert_eq!(
            fs::read(tree.join("named/internal/example.lcl.db")).unwrap(),
            zone
        );
    }

    #[test]
    fn a_broken_set_is_reported_and_the_rest_exports() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(dir.path());
        store
            .with_database(|db| {
                db.tables.dns_servers.push(DnsServer {
                    name: "ns9".to_owned(),
                    ssh_user: "dnsop".to_owned(),
                    remote_bind_dir: "/etc/bind".to_owned(),
                    remote_test_dir: "/etc/bind/test".to_owned(),
                });
                db.tables.dns_server_sets.push(DnsServerSet {
                    name: "broken_dns".to_owned(),
                });
                db.tables.server_set_servers.push(ServerSetServerAssignment {
                    server_set: "broken_dns".to_owned(),
                    dns_server: "ns9".to_owned(),
                });
                db.tables.views.push(View {
                    name: "vacant".to_owned(),
                    options: String::new(),
                });
                db.tables.server_set_views.push(ServerSetViewAssignment {
                    server_set: "broken_dns".to_owned(),
                    view: "vacant".to_owned(),
                });
            })
            .unwrap();
        let ctx = ExportContext::new(dir.path().join("trees"), dir.path().join("backups"));
        let cancel = AtomicBool::new(false);

        match run(&ctx, &store, false, &cancel).unwrap() {
            Outcome::Exported { report, .. } => {
                assert!(report.has_failures());
                let entry = &report.entries()[0];
                assert_eq!(entry.phase, "cooked");
                assert_eq!(entry.subject.as_deref(), Some("broken_dns"));
            }
            other => panic!("expected an export, got {:?}", other),
        }
        assert!(dir.path().join("trees/ns1").is_dir());
        assert!(!dir.path().join("trees/ns9").exists());
    }

    #[test]
    fn cancellation_stops_the_run_before_the_next_phase() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(dir.path());
        let ctx = ExportContext::new(dir.path().join("trees"), dir.path().join("backups"));
        let cancel = AtomicBool::new(true);

        match run(&ctx, &store, false, &cancel) {
            Err(Error::Cancelled(phase)) => assert_eq!(phase, Phase::SnapshotRead),
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert!(!dir.path().join("trees").exists());
    }
}
