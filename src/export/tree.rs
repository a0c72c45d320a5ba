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

//! Writing the per-server configuration trees.
//!
//! Each server of a server set gets a directory under the root config
//! directory:
//!
//! ```text
//! <server>/
//!     named.conf.a
//!     named.conf.b
//!     <server>.info
//!     named/
//!         <view>/<zone>.db      (master zones)
//!         named.ca              (when a hint zone exists)
//! ```
//!
//! Everything is rendered before anything is written, so a server set
//! whose stored header does not parse is skipped without leaving a
//! half-written directory behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;

use crate::cook::ServerSetConfig;
use crate::emit;
use crate::isc;
use crate::store::tables::{DnsServer, ZoneType};

use super::ExportContext;

/// One server's written tree, with the file lists the checker and the
/// packager work from.
#[derive(Clone, Debug)]
pub struct ServerTree {
    pub server_set: String,
    pub server: DnsServer,
    /// `<root_config_dir>/<server>`.
    pub directory: PathBuf,
    /// The two named.conf variants.
    pub conf_files: Vec<PathBuf>,
    /// `(origin, path)` for every generated master file.
    pub zone_files: Vec<(String, PathBuf)>,
}

/// Why a server set could not be written.
#[derive(Debug)]
pub enum WriteSetError {
    /// The set's stored named.conf header does not parse. The set is
    /// skipped; other sets proceed.
    Header(isc::Error),

    /// Filesystem trouble. Fatal to the whole run.
    Io(io::Error),
}

impl From<io::Error> for WriteSetError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Writes the trees for every server of `set`. `audit_id` and
/// `timestamp` identify the exported state in the servers' info
/// files; both are stable across re-exports of the same state, which
/// keeps forced re-exports byte-identical.
pub(super) fn write_set(
    ctx: &ExportContext,
    set: &ServerSetConfig,
    audit_id: u64,
    timestamp: DateTime<Utc>,
) -> Result<Vec<ServerTree>, WriteSetError> {
    let mut confs = Vec::new();
    for server in &set.dns_servers {
        let conf_a = emit::named_conf(set, server, false).map_err(WriteSetError::Header)?;
        let conf_b = emit::named_conf(set, server, true).map_err(WriteSetError::Header)?;
        confs.push((server, conf_a, conf_b));
    }
    let zones = rendered_zones(set);
    let hints = root_hints(set);

    let mut trees = Vec::new();
    for (server, conf_a, conf_b) in confs {
        trees.push(write_server(
            ctx,
            set,
            server,
            audit_id,
            timestamp,
            &conf_a,
            &conf_b,
            &zones,
            hints.as_deref(),
        )?);
    }
    Ok(trees)
}

struct RenderedZone {
    view: String,
    name: String,
    origin: String,
    content: String,
}

/// Renders every master file of the set. The same zone may appear
/// under several views with different contents, since records are
/// scoped by view dependency.
fn rendered_zones(set: &ServerSetConfig) -> Vec<RenderedZone> {
    let mut zones = Vec::new();
    for view_name in &set.views {
        let view = &set.view_configs[view_name];
        for zone in &view.zones {
            if zone.zone_type != ZoneType::Master {
                continue;
            }
            zones.push(RenderedZone {
                view: view_name.clone(),
                name: zone.name.clone(),
                origin: zone.origin.clone(),
                content: emit::zone_file(zone),
            });
        }
    }
    zones
}

/// The root-hints file, rendered from the first hint zone any view
/// carries.
fn root_hints(set: &ServerSetConfig) -> Option<String> {
    for view_name in &set.views {
        let view = &set.view_configs[view_name];
        if let Some(zone) = view.zones.iter().find(|z| z.zone_type == ZoneType::Hint) {
            return Some(emit::zone_file(zone));
        }
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn write_server(
    ctx: &ExportContext,
    set: &ServerSetConfig,
    server: &DnsServer,
    audit_id: u64,
    timestamp: DateTime<Utc>,
    conf_a: &str,
    conf_b: &str,
    zones: &[RenderedZone],
    hints: Option<&str>,
) -> Result<ServerTree, WriteSetError> {
    let directory = ctx.root_config_dir.join(&server.name);
    // Start from scratch so files from earlier exports cannot survive
    // into this tree.
    match fs::remove_dir_all(&directory) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    let named_dir = directory.join(&ctx.named_dir);
    fs::create_dir_all(&named_dir)?;

    let conf_a_path = directory.join("named.conf.a");
    fs::write(&conf_a_path, conf_a)?;
    let conf_b_path = directory.join("named.conf.b");
    fs::write(&conf_b_path, conf_b)?;
    write_info(ctx, set, server, audit_id, timestamp, &directory)?;

    let mut zone_files = Vec::new();
    for zone in zones {
        let view_dir = named_dir.join(&zone.view);
        fs::create_dir_all(&view_dir)?;
        let path = view_dir.join(format!("{}.db", zone.name));
        fs::write(&path, &zone.content)?;
        zone_files.push((zone.origin.clone(), path));
    }
    if let Some(hints) = hints {
        fs::write(named_dir.join("named.ca"), hints)?;
    }

    info!(
        "wrote tree for {} ({} zone files)",
        server.name,
        zone_files.len()
    );
    Ok(ServerTree {
        server_set: set.name.clone(),
        server: server.clone(),
        directory,
        conf_files: vec![conf_a_path, conf_b_path],
        zone_files,
    })
}

/// Writes `<server>.info`, a small description of the server, the run
/// that produced the tree, and the tools it was validated with.
fn write_info(
    ctx: &ExportContext,
    set: &ServerSetConfig,
    server: &DnsServer,
    audit_id: u64,
    timestamp: DateTime<Utc>,
    directory: &Path,
) -> io::Result<()> {
    let mut info = String::new();
    info.push_str("[server_info]\n");
    info.push_str(&format!("name = {:?}\n", server.name));
    info.push_str(&format!("server_set = {:?}\n", set.name));
    info.push_str(&format!("ssh_user = {:?}\n", server.ssh_user));
    info.push_str(&format!("remote_bind_dir = {:?}\n", server.remote_bind_dir));
    info.push_str(&format!("remote_test_dir = {:?}\n", server.remote_test_dir));
    info.push_str(&format!("export_audit_id = {}\n", audit_id));
    info.push_str(&format!("audit_timestamp = {:?}\n", timestamp.to_rfc3339()));
    info.push_str("\n[tools]\n");
    if let Some(tool) = &ctx.checkzone_tool {
        info.push_str(&format!("checkzone = {:?}\n", tool));
    }
    if let Some(tool) = &ctx.checkconf_tool {
        info.push_str(&format!("checkconf = {:?}\n", tool));
    }
    fs::write(directory.join(format!("{}.info", server.name)), info)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::TimeZone;

    use super::*;
    use crate::cook::{CookedRecord, CookedZone, ViewConfig};
    use crate::records::RecordData;

    fn context(root: &Path) -> ExportContext {
        let mut ctx = ExportContext::new(root.join("trees"), root.join("backups"));
        ctx.checkzone_tool = Some("/usr/bin/named-checkzone".to_owned());
        ctx
    }

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    fn minimal_set() -> ServerSetConfig {
        let zone = CookedZone {
            name: "example.lcl".to_owned(),
            origin: "example.lcl.".to_owned(),
            zone_type: ZoneType::Master,
            options: String::new(),
            records: vec![CookedRecord {
                target: "@".to_owned(),
                ttl: 3600,
                data: RecordData::Soa {
                    name_server: "ns1.example.lcl.".to_owned(),
                    admin_email: "admin.example.lcl.".to_owned(),
                    serial_number: 1,
                    refresh: 10800,
                    retry: 3600,
                    expiry: 604800,
                    minimum: 3600,
                },
            }],
        };
        let view = ViewConfig {
            options: String::new(),
            acls: vec![("any".to_owned(), true)],
            zones: vec![zone],
        };
        ServerSetConfig {
            name: "internal_dns".to_owned(),
            dns_servers: vec![DnsServer {
                name: "ns1".to_owned(),
                ssh_user: "dnsop".to_owned(),
                remote_bind_dir: "/etc/bind".to_owned(),
                remote_test_dir: "/etc/bind/test".to_owned(),
            }],
            views: vec!["internal".to_owned()],
            view_configs: HashMap::from([(
                "internal".to_owned(),
                view,
            )]),
            acls: Vec::new(),
            named_conf: String::new(),
        }
    }

    #[test]
    fn trees_have_the_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let trees = write_set(&ctx, &minimal_set(), 7, stamp()).unwrap();
        assert_eq!(trees.len(), 1);

        let tree = &trees[0];
        assert_eq!(tree.directory, ctx.root_config_dir.join("ns1"));
        assert!(tree.directory.join("named.conf.a").is_file());
        assert!(tree.directory.join("named.conf.b").is_file());
        assert!(tree.directory.join("ns1.info").is_file());
        let db = tree.directory.join("named/internal/example.lcl.db");
        assert!(db.is_file());
        assert_eq!(tree.zone_files, vec![("example.lcl.".to_owned(), db)]);

        let conf = fs::read_to_string(&tree.conf_files[0]).unwrap();
        assert!(conf.contains("view \"internal\""));
        assert!(conf.contains("file \"internal/example.lcl.db\""));

        let info = fs::read_to_string(tree.directory.join("ns1.info")).unwrap();
        assert!(info.contains("[server_info]"));
        assert!(info.contains("name = \"ns1\""));
        assert!(info.contains("export_audit_id = 7"));
        assert!(info.contains("audit_timestamp = \"2024-03-01T12:30:00+00:00\""));
        assert!(info.contains("[tools]"));
        assert!(info.contains("checkzone = \"/usr/bin/named-checkzone\""));
    }

    #[test]
    fn stale_files_do_not_survive_a_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let set = minimal_set();

        write_set(&ctx, &set, 7, stamp()).unwrap();
        let stale = ctx.root_config_dir.join("ns1/named/internal/gone.lcl.db");
        fs::write(&stale, "leftover").unwrap();

        write_set(&ctx, &set, 7, stamp()).unwrap();
        assert!(!stale.exists());
        assert!(ctx
            .root_config_dir
            .join("ns1/named/internal/example.lcl.db")
            .is_file());
    }

    #[test]
    fn a_bad_header_skips_the_set_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let mut set = minimal_set();
        set.named_conf = "options { unterminated".to_owned();

        match write_set(&ctx, &set, 7, stamp()) {
            Err(WriteSetError::Header(_)) => {}
            other => panic!("expected a header error: {:?}", other),
        }
        assert!(!ctx.root_config_dir.join("ns1").exists());
    }
}
