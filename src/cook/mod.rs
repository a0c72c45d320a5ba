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

//! The cooker.
//!
//! Cooking reshapes the flat management tables into the tree the
//! writers consume: server set → view → zone → ordered records. This
//! is where the "any" pseudo-view and the view-subset dependencies are
//! resolved, where each view's match-clients list is put into
//! assignment order, and where the zone-file record order is fixed.
//!
//! A structural problem (a view with no zones, a master zone without
//! exactly one SOA, a dangling name in a hand-edited store file)
//! excludes only the server set it occurs in; the remaining sets cook
//! normally and the failure is reported alongside them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use log::warn;

use crate::records::{compare_zone_records, RecordData};
use crate::store::tables::{AclRangeEntry, DnsServer, DnsServerSet, Tables, View, Zone, ZoneType};

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// COOKED SHAPES                                                      //
////////////////////////////////////////////////////////////////////////

/// The result of cooking a snapshot: the server sets that built, and
/// the structural failures of those that did not.
#[derive(Clone, Debug)]
pub struct CookOutcome {
    pub sets: BTreeMap<String, ServerSetConfig>,
    pub failures: Vec<SetFailure>,
}

/// A server set excluded from the export, and why.
#[derive(Clone, Debug)]
pub struct SetFailure {
    pub server_set: String,
    pub error: Error,
}

/// Everything needed to write one server set's configuration tree.
#[derive(Clone, Debug)]
pub struct ServerSetConfig {
    pub name: String,
    /// Member servers, in assignment order.
    pub dns_servers: Vec<DnsServer>,
    /// View names, in assignment order. This is the order of the
    /// generated `view { … }` blocks.
    pub views: Vec<String>,
    pub view_configs: HashMap<String, ViewConfig>,
    /// ACLs referenced by this set's views, in first-reference order.
    /// The builtin "any" is never listed.
    pub acls: Vec<CookedAcl>,
    /// The newest global-options blob, empty if none was ever set.
    pub named_conf: String,
}

#[derive(Clone, Debug)]
pub struct ViewConfig {
    pub options: String,
    /// The match-clients composition: (ACL name, allowed), in
    /// assignment order.
    pub acls: Vec<(String, bool)>,
    /// Zones visible in this view, sorted by name.
    pub zones: Vec<CookedZone>,
}

#[derive(Clone, Debug)]
pub struct CookedAcl {
    pub name: String,
    pub entries: Vec<AclRangeEntry>,
}

#[derive(Clone, Debug)]
pub struct CookedZone {
    pub name: String,
    pub origin: String,
    pub zone_type: ZoneType,
    pub options: String,
    /// Records in zone-file order: the SOA first, then the fixed
    /// category order.
    pub records: Vec<CookedRecord>,
}

#[derive(Clone, Debug)]
pub struct CookedRecord {
    pub target: String,
    pub ttl: u32,
    pub data: RecordData,
}

////////////////////////////////////////////////////////////////////////
// COOKING                                                            //
////////////////////////////////////////////////////////////////////////

/// Cooks every server set in the tables.
pub fn cook(tables: &Tables) -> CookOutcome {
    let mut sets = BTreeMap::new();
    let mut failures = Vec::new();
    for set in &tables.dns_server_sets {
        match cook_set(tables, set) {
            Ok(config) => {
                sets.insert(set.name.clone(), config);
            }
            Err(error) => {
                warn!(
                    "excluding server set {:?} from the export: {}",
                    set.name, error,
                );
                failures.push(SetFailure {
                    server_set: set.name.clone(),
                    error,
                });
            }
        }
    }
    CookOutcome { sets, failures }
}

fn cook_set(tables: &Tables, set: &DnsServerSet) -> Result<ServerSetConfig> {
    let views: Vec<String> = tables
        .set_views(&set.name)
        .into_iter()
        .map(str::to_owned)
        .collect();

    let mut view_configs = HashMap::new();
    for view_name in &views {
        let view = tables
            .view(view_name)
            .ok_or_else(|| Error::UnknownView(view_name.clone()))?;
        view_configs.insert(view_name.clone(), cook_view(tables, view)?);
    }

    let mut dns_servers = Vec::new();
    for server_name in tables.set_servers(&set.name) {
        let server = tables
            .dns_server(server_name)
            .ok_or_else(|| Error::UnknownServer(server_name.to_owned()))?;
        dns_servers.push(server.clone());
    }

    let acls = referenced_acls(tables, &views, &view_configs)?;
    let named_conf = tables
        .latest_named_conf(&set.name)
        .map(|o| o.content.clone())
        .unwrap_or_default();

    Ok(ServerSetConfig {
        name: set.name.clone(),
        dns_servers,
        views,
        view_configs,
        acls,
        named_conf,
    })
}

fn cook_view(tables: &Tables, view: &View) -> Result<ViewConfig> {
    let deps = tables.dependencies_of(&view.name);

    let mut zones = Vec::new();
    for zone in &tables.zones {
        let assigned = tables
            .zone_views
            .iter()
            .any(|a| a.zone == zone.name && deps.contains(a.view_dep.as_str()));
        if assigned {
            zones.push(cook_zone(tables, zone, &deps)?);
        }
    }
    if zones.is_empty() {
        return Err(Error::EmptyView {
            view: view.name.clone(),
        });
    }
    zones.sort_by(|a, b| a.name.cmp(&b.name));

    let mut assignments: Vec<_> = tables
        .view_acls
        .iter()
        .filter(|a| a.view == view.name)
        .collect();
    assignments.sort_by_key(|a| a.order);
    let acls = assignments
        .into_iter()
        .map(|a| (a.acl.clone(), a.allowed))
        .collect();

    Ok(ViewConfig {
        options: view.options.clone(),
        acls,
        zones,
    })
}

fn cook_zone(tables: &Tables, zone: &Zone, deps: &BTreeSet<String>) -> Result<CookedZone> {
    let mut records: Vec<CookedRecord> = tables
        .records
        .iter()
        .filter(|r| r.zone == zone.name && deps.contains(r.view_dep.as_str()))
        .map(|r| CookedRecord {
            target: r.target.clone(),
            ttl: r.ttl,
            data: r.data.clone(),
        })
        .collect();

    // Master zones carry their own authority data, so they must hold
    // exactly one SOA. Hint, slave and forward zones get their data
    // elsewhere.
    if zone.zone_type == ZoneType::Master {
        let soa_count = records
            .iter()
            .filter(|r| matches!(r.data, RecordData::Soa { .. }))
            .count();
        if soa_count == 0 {
            return Err(Error::MissingSoa {
                zone: zone.name.clone(),
            });
        }
        if soa_count > 1 {
            return Err(Error::MultipleSoa {
                zone: zone.name.clone(),
            });
        }
    }

    records.sort_by(|a, b| compare_zone_records((&a.target, &a.data), (&b.target, &b.data)));

    Ok(CookedZone {
        name: zone.name.clone(),
        origin: zone.origin.clone(),
        zone_type: zone.zone_type,
        options: zone.options.clone(),
        records,
    })
}

fn referenced_acls(
    tables: &Tables,
    views: &[String],
    view_configs: &HashMap<String, ViewConfig>,
) -> Result<Vec<CookedAcl>> {
    let mut acls: Vec<CookedAcl> = Vec::new();
    for view in views {
        for (acl_name, _) in &view_configs[view].acls {
            if acl_name == crate::util::ANY_ACL {
                continue;
            }
            if acls.iter().any(|a| a.name == *acl_name) {
                continue;
            }
            let acl = tables
                .acl(acl_name)
                .ok_or_else(|| Error::UnknownAcl(acl_name.clone()))?;
            acls.push(CookedAcl {
                name: acl.name.clone(),
                entries: acl.range_entries.clone(),
            });
        }
    }
    Ok(acls)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Structural problems that exclude a server set from the export.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    UnknownView(String),
    UnknownServer(String),
    UnknownAcl(String),
    EmptyView { view: String },
    MissingSoa { zone: String },
    MultipleSoa { zone: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownView(name) => write!(f, "view {:?} is not defined", name),
            Self::UnknownServer(name) => write!(f, "DNS server {:?} is not defined", name),
            Self::UnknownAcl(name) => write!(f, "ACL {:?} is not defined", name),
            Self::EmptyView { view } => write!(f, "view {:?} has no zones", view),
            Self::MissingSoa { zone } => write!(f, "zone {:?} has no SOA record", zone),
            Self::MultipleSoa { zone } => {
                write!(f, "zone {:?} has more than one SOA record", zone)
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::ops::{self, Action, SilentAudit};
    use crate::records::RecordType;
    use crate::store::Database;

    fn apply_all(db: &mut Database, actions: Vec<Action>) {
        for action in actions {
            let timestamp = Utc.timestamp_opt(0, 0).unwrap();
            ops::apply(db, "admin", timestamp, action, &mut SilentAudit).unwrap();
        }
    }

    fn soa_arguments() -> BTreeMap<String, String> {
        [
            ("name_server", "ns1.example.lcl."),
            ("admin_email", "admin.example.lcl."),
            ("serial_number", "1"),
            ("refresh", "10800"),
            ("retry", "3600"),
            ("expiry", "3600000"),
            ("minimum", "86400"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn minimal() -> Database {
        let mut db = Database::default();
        apply_all(
            &mut db,
            vec![
                Action::MakeDnsServerSet {
                    name: "internal_dns".to_owned(),
                },
                Action::MakeDnsServer {
                    name: "ns1".to_owned(),
                    ssh_user: "bind".to_owned(),
                    remote_bind_dir: "/etc/bind".to_owned(),
                    remote_test_dir: "/etc/bind/test".to_owned(),
                },
                Action::MakeView {
                    name: "internal".to_owned(),
                    options: String::new(),
                },
                Action::MakeZone {
                    name: "example.lcl".to_owned(),
                    origin: "example.lcl.".to_owned(),
                    zone_type: crate::store::tables::ZoneType::Master,
                    options: String::new(),
                },
                Action::MakeZoneViewAssignment {
                    zone: "example.lcl".to_owned(),
                    view_dep: "any".to_owned(),
                },
                Action::MakeServerSetServerAssignment {
                    server_set: "internal_dns".to_owned(),
                    dns_server: "ns1".to_owned(),
                },
                Action::MakeServerSetViewAssignment {
                    server_set: "internal_dns".to_owned(),
                    view: "internal".to_owned(),
                },
                Action::MakeViewAclAssignment {
                    view: "internal".to_owned(),
                    acl: "any".to_owned(),
                    allowed: true,
                    order: 0,
                },
                Action::MakeRecord {
                    zone: "example.lcl".to_owned(),
                    view_dep: "any".to_owned(),
                    target: "@".to_owned(),
                    ttl: 3600,
                    record_type: RecordType::Soa,
                    arguments: soa_arguments(),
                },
                Action::MakeRecord {
                    zone: "example.lcl".to_owned(),
                    view_dep: "any".to_owned(),
                    target: "host1".to_owned(),
                    ttl: 3600,
                    record_type: RecordType::A,
                    arguments: [("ip".to_owned(), "192.168.0.1".to_owned())]
                        .into_iter()
                        .collect(),
                },
            ],
        );
        db
    }

    #[test]
    fn cooks_the_minimal_database() {
        let db = minimal();
        let outcome = cook(&db.tables);
        assert!(outcome.failures.is_empty());
        let set = &outcome.sets["internal_dns"];
        assert_eq!(set.views, ["internal"]);
        assert_eq!(set.dns_servers[0].name, "ns1");
        assert!(set.acls.is_empty());

        let view = &set.view_configs["internal"];
        assert_eq!(view.acls, [("any".to_owned(), true)]);
        assert_eq!(view.zones.len(), 1);
        let zone = &view.zones[0];
        assert_eq!(zone.name, "example.lcl");
        assert!(matches!(zone.records[0].data, RecordData::Soa { .. }));
        assert_eq!(zone.records[1].target, "host1");
    }

    #[test]
    fn view_dependencies_scope_records() {
        let mut db = minimal();
        apply_all(
            &mut db,
            vec![
                Action::MakeView {
                    name: "dmz".to_owned(),
                    options: String::new(),
                },
                Action::MakeServerSetViewAssignment {
                    server_set: "internal_dns".to_owned(),
                    view: "dmz".to_owned(),
                },
                Action::MakeViewDependencyAssignment {
                    view: "internal".to_owned(),
                    depends_on: "dmz".to_owned(),
                },
                Action::MakeRecord {
                    zone: "example.lcl".to_owned(),
                    view_dep: "dmz".to_owned(),
                    target: "dmz-host".to_owned(),
                    ttl: 3600,
                    record_type: RecordType::A,
                    arguments: [("ip".to_owned(), "10.9.9.9".to_owned())]
                        .into_iter()
                        .collect(),
                },
                Action::MakeRecord {
                    zone: "example.lcl".to_owned(),
                    view_dep: "internal".to_owned(),
                    target: "int-host".to_owned(),
                    ttl: 3600,
                    record_type: RecordType::A,
                    arguments: [("ip".to_owned(), "10.1.1.1".to_owned())]
                        .into_iter()
                        .collect(),
                },
            ],
        );
        let outcome = cook(&db.tables);
        let set = &outcome.sets["internal_dns"];

        let targets = |view: &str| -> Vec<String> {
            set.view_configs[view].zones[0]
                .records
                .iter()
                .map(|r| r.target.clone())
                .collect()
        };
        // internal sees its own records, the dmz records it depends
        // on, and everything tagged "any".
        assert_eq!(targets("internal"), ["@", "dmz-host", "host1", "int-host"]);
        // dmz sees only its own plus "any".
        assert_eq!(targets("dmz"), ["@", "dmz-host", "host1"]);
    }

    #[test]
    fn a_missing_soa_excludes_only_its_server_set() {
        let mut db = minimal();
        apply_all(
            &mut db,
            vec![
                Action::MakeDnsServerSet {
                    name: "broken_dns".to_owned(),
                },
                Action::MakeView {
                    name: "broken".to_owned(),
                    options: String::new(),
                },
                Action::MakeServerSetViewAssignment {
                    server_set: "broken_dns".to_owned(),
                    view: "broken".to_owned(),
                },
                Action::MakeZone {
                    name: "broken.lcl".to_owned(),
                    origin: "broken.lcl.".to_owned(),
                    zone_type: crate::store::tables::ZoneType::Master,
                    options: String::new(),
                },
                Action::MakeZoneViewAssignment {
                    zone: "broken.lcl".to_owned(),
                    view_dep: "broken".to_owned(),
                },
            ],
        );
        let outcome = cook(&db.tables);
        assert!(outcome.sets.contains_key("internal_dns"));
        assert!(!outcome.sets.contains_key("broken_dns"));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].server_set, "broken_dns");
        assert_eq!(
            outcome.failures[0].error,
            Error::MissingSoa {
                zone: "broken.lcl".to_owned()
            }
        );
        // The broken zone is visible in the healthy set's view too if
        // assigned there; it is not, so internal_dns is unaffected.
        assert_eq!(outcome.sets["internal_dns"].views, ["internal"]);
    }

    #[test]
    fn a_view_with_no_zones_is_structural() {
        let mut db = minimal();
        apply_all(
            &mut db,
            vec![
                Action::MakeView {
                    name: "empty".to_owned(),
                    options: String::new(),
                },
                Action::MakeServerSetViewAssignment {
                    server_set: "internal_dns".to_owned(),
                    view: "empty".to_owned(),
                },
            ],
        );
        let outcome = cook(&db.tables);
        assert!(outcome.sets.is_empty());
        assert_eq!(
            outcome.failures[0].error,
            Error::EmptyView {
                view: "empty".to_owned()
            }
        );
    }

    #[test]
    fn acl_lists_follow_the_order_field() {
        let mut db = minimal();
        apply_all(
            &mut db,
            vec![
                Action::MakeAcl {
                    name: "secret".to_owned(),
                },
                Action::MakeAclRange {
                    acl: "secret".to_owned(),
                    cidr: "10.0.0.0/8".parse().unwrap(),
                    allowed: true,
                },
                Action::MakeAcl {
                    name: "public".to_owned(),
                },
                Action::MakeAclRange {
                    acl: "public".to_owned(),
                    cidr: "0.0.0.0/0".parse().unwrap(),
                    allowed: true,
                },
                // Deliberately assigned in reverse of the intended
                // order.
                Action::MakeViewAclAssignment {
                    view: "internal".to_owned(),
                    acl: "public".to_owned(),
                    allowed: false,
                    order: 2,
                },
                Action::MakeViewAclAssignment {
                    view: "internal".to_owned(),
                    acl: "secret".to_owned(),
                    allowed: true,
                    order: 1,
                },
            ],
        );
        let outcome = cook(&db.tables);
        let view = &outcome.sets["internal_dns"].view_configs["internal"];
        assert_eq!(
            view.acls,
            [
                ("any".to_owned(), true),
                ("secret".to_owned(), true),
                ("public".to_owned(), false),
            ]
        );
        let acl_names: Vec<&str> = outcome.sets["internal_dns"]
            .acls
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        // First-reference order, without the builtin.
        assert_eq!(acl_names, ["secret", "public"]);
    }

    #[test]
    fn hint_zones_need_no_soa() {
        let mut db = minimal();
        apply_all(
            &mut db,
            vec![
                Action::MakeZone {
                    name: "root-hints".to_owned(),
                    origin: ".".to_owned(),
                    zone_type: crate::store::tables::ZoneType::Hint,
                    options: String::new(),
                },
                Action::MakeZoneViewAssignment {
                    zone: "root-hints".to_owned(),
                    view_dep: "any".to_owned(),
                },
                Action::MakeRecord {
                    zone: "root-hints".to_owned(),
                    view_dep: "any".to_owned(),
                    target: "@".to_owned(),
                    ttl: 3600000,
                    record_type: RecordType::Ns,
                    arguments: [("name_server".to_owned(), "a.root-servers.lcl.".to_owned())]
                        .into_iter()
                        .collect(),
                },
            ],
        );
        let outcome = cook(&db.tables);
        assert!(outcome.failures.is_empty());
        let view = &outcome.sets["internal_dns"].view_configs["internal"];
        assert_eq!(view.zones.len(), 2);
    }
}
