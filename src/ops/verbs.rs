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

//! Verb implementations.
//!
//! Each arm validates referential integrity against the current
//! tables before touching them, so a failed action leaves no partial
//! mutation behind. Removals are strict: nothing cascades, and a row
//! still referenced elsewhere refuses to go.

use chrono::{DateTime, Utc};

use super::{Action, EntityKind, Error, Result};
use crate::records::args;
use crate::store::tables::{
    Acl, AclRangeEntry, DnsServer, DnsServerSet, NamedConfGlobalOption, Record,
    ReverseRangeZoneAssignment, ServerSetServerAssignment, ServerSetViewAssignment, Tables, View,
    ViewAclAssignment, ViewDependencyAssignment, Zone, ZoneViewAssignment,
};
use crate::util::{is_fqdn, normalize_view_dep, ANY_ACL, ANY_VIEW};

pub(super) fn apply_action(
    tables: &mut Tables,
    action: &Action,
    user: &str,
    timestamp: DateTime<Utc>,
) -> Result<()> {
    match action {
        Action::MakeDnsServer {
            name,
            ssh_user,
            remote_bind_dir,
            remote_test_dir,
        } => {
            check_name(EntityKind::DnsServer, name)?;
            if tables.dns_server(name).is_some() {
                return Err(exists(EntityKind::DnsServer, name));
            }
            tables.dns_servers.push(DnsServer {
                name: name.clone(),
                ssh_user: ssh_user.clone(),
                remote_bind_dir: remote_bind_dir.clone(),
                remote_test_dir: remote_test_dir.clone(),
            });
            Ok(())
        }

        Action::RemoveDnsServer { name } => {
            if tables.dns_server(name).is_none() {
                return Err(not_found(EntityKind::DnsServer, name));
            }
            if let Some(a) = tables
                .server_set_servers
                .iter()
                .find(|a| a.dns_server == *name)
            {
                return Err(in_use(
                    EntityKind::DnsServer,
                    name,
                    format!("server set {:?}", a.server_set),
                ));
            }
            tables.dns_servers.retain(|s| s.name != *name);
            Ok(())
        }

        Action::MakeDnsServerSet { name } => {
            check_name(EntityKind::DnsServerSet, name)?;
            if tables.server_set(name).is_some() {
                return Err(exists(EntityKind::DnsServerSet, name));
            }
            tables.dns_server_sets.push(DnsServerSet { name: name.clone() });
            Ok(())
        }

        Action::RemoveDnsServerSet { name } => {
            if tables.server_set(name).is_none() {
                return Err(not_found(EntityKind::DnsServerSet, name));
            }
            if let Some(a) = tables
                .server_set_servers
                .iter()
                .find(|a| a.server_set == *name)
            {
                return Err(in_use(
                    EntityKind::DnsServerSet,
                    name,
                    format!("DNS server {:?}", a.dns_server),
                ));
            }
            if let Some(a) = tables
                .server_set_views
                .iter()
                .find(|a| a.server_set == *name)
            {
                return Err(in_use(
                    EntityKind::DnsServerSet,
                    name,
                    format!("view {:?}", a.view),
                ));
            }
            tables.dns_server_sets.retain(|s| s.name != *name);
            // Named-conf revisions are owned by the set, not linked to
            // it, so they leave with it.
            tables.named_conf_options.retain(|o| o.server_set != *name);
            Ok(())
        }

        Action::MakeView { name, options } => {
            check_name(EntityKind::View, name)?;
            if tables.view(name).is_some() {
                return Err(exists(EntityKind::View, name));
            }
            tables.views.push(View {
                name: name.clone(),
                options: options.clone(),
            });
            Ok(())
        }

        Action::RemoveView { name } => {
            if tables.view(name).is_none() {
                return Err(not_found(EntityKind::View, name));
            }
            if let Some(a) = tables.server_set_views.iter().find(|a| a.view == *name) {
                return Err(in_use(
                    EntityKind::View,
                    name,
                    format!("server set {:?}", a.server_set),
                ));
            }
            if tables
                .view_dependencies
                .iter()
                .any(|a| a.view == *name || a.depends_on == *name)
            {
                return Err(in_use(
                    EntityKind::View,
                    name,
                    "a view dependency assignment".to_owned(),
                ));
            }
            if tables.view_acls.iter().any(|a| a.view == *name) {
                return Err(in_use(EntityKind::View, name, "an ACL assignment".to_owned()));
            }
            if let Some(a) = tables.zone_views.iter().find(|a| a.view_dep == *name) {
                return Err(in_use(EntityKind::View, name, format!("zone {:?}", a.zone)));
            }
            if let Some(r) = tables.records.iter().find(|r| r.view_dep == *name) {
                return Err(in_use(EntityKind::View, name, format!("record {}", r.id)));
            }
            tables.views.retain(|v| v.name != *name);
            Ok(())
        }

        Action::MakeAcl { name } => {
            check_name(EntityKind::Acl, name)?;
            if tables.acl(name).is_some() {
                return Err(exists(EntityKind::Acl, name));
            }
            tables.acls.push(Acl {
                name: name.clone(),
                range_entries: Vec::new(),
            });
            Ok(())
        }

        Action::RemoveAcl { name } => {
            if tables.acl(name).is_none() {
                return Err(not_found(EntityKind::Acl, name));
            }
            if let Some(a) = tables.view_acls.iter().find(|a| a.acl == *name) {
                return Err(in_use(EntityKind::Acl, name, format!("view {:?}", a.view)));
            }
            tables.acls.retain(|a| a.name != *name);
            Ok(())
        }

        Action::MakeAclRange { acl, cidr, allowed } => {
            let row = match tables.acls.iter_mut().find(|a| a.name == *acl) {
                Some(row) => row,
                None => return Err(not_found(EntityKind::Acl, acl)),
            };
            if row.range_entries.iter().any(|e| e.cidr == *cidr) {
                return Err(Error::DuplicateAssignment(format!(
                    "{} is already an entry of ACL {:?}",
                    cidr, acl,
                )));
            }
            row.range_entries.push(AclRangeEntry {
                cidr: *cidr,
                allowed: *allowed,
            });
            Ok(())
        }

        Action::RemoveAclRange { acl, cidr } => {
            let row = match tables.acls.iter_mut().find(|a| a.name == *acl) {
                Some(row) => row,
                None => return Err(not_found(EntityKind::Acl, acl)),
            };
            match row.range_entries.iter().position(|e| e.cidr == *cidr) {
                Some(i) => {
                    row.range_entries.remove(i);
                    Ok(())
                }
                None => Err(Error::AssignmentNotFound(format!(
                    "{} is not an entry of ACL {:?}",
                    cidr, acl,
                ))),
            }
        }

        Action::MakeZone {
            name,
            origin,
            zone_type,
            options,
        } => {
            check_name(EntityKind::Zone, name)?;
            if tables.zone(name).is_some() {
                return Err(exists(EntityKind::Zone, name));
            }
            if !is_fqdn(origin) {
                return Err(Error::InvalidOrigin(origin.clone()));
            }
            tables.zones.push(Zone {
                name: name.clone(),
                origin: origin.clone(),
                zone_type: *zone_type,
                options: options.clone(),
            });
            Ok(())
        }

        Action::RemoveZone { name } => {
            if tables.zone(name).is_none() {
                return Err(not_found(EntityKind::Zone, name));
            }
            if let Some(r) = tables.records.iter().find(|r| r.zone == *name) {
                return Err(in_use(EntityKind::Zone, name, format!("record {}", r.id)));
            }
            if tables.zone_views.iter().any(|a| a.zone == *name) {
                return Err(in_use(EntityKind::Zone, name, "a view assignment".to_owned()));
            }
            if let Some(a) = tables.reverse_ranges.iter().find(|a| a.zone == *name) {
                return Err(in_use(
                    EntityKind::Zone,
                    name,
                    format!("reverse range {}", a.cidr),
                ));
            }
            tables.zones.retain(|z| z.name != *name);
            Ok(())
        }

        Action::MakeRecord {
            zone,
            view_dep,
            target,
            ttl,
            record_type,
            arguments,
        } => {
            if tables.zone(zone).is_none() {
                return Err(not_found(EntityKind::Zone, zone));
            }
            let dep = normalize_view_dep(view_dep);
            require_view_dep(tables, dep)?;
            if target.is_empty() {
                return Err(Error::InvalidName {
                    kind: EntityKind::Record,
                    name: target.clone(),
                });
            }
            let covered = tables
                .zone_views
                .iter()
                .any(|a| a.zone == *zone && (a.view_dep == dep || a.view_dep == ANY_VIEW));
            if !covered {
                return Err(Error::AssignmentNotFound(format!(
                    "zone {:?} is not assigned to view dependency {:?}",
                    zone, dep,
                )));
            }
            let data = args::decode(*record_type, arguments)?;
            let id = tables.next_record_id();
            tables.records.push(Record {
                id,
                target: target.clone(),
                zone: zone.clone(),
                view_dep: dep.to_owned(),
                ttl: *ttl,
                last_user: user.to_owned(),
                data,
            });
            Ok(())
        }

        Action::RemoveRecord {
            zone,
            view_dep,
            target,
            record_type,
            arguments,
        } => {
            let dep = normalize_view_dep(view_dep);
            let data = args::decode(*record_type, arguments)?;
            let position = tables.records.iter().position(|r| {
                r.zone == *zone && r.view_dep == dep && r.target == *target && r.data == data
            });
            match position {
                Some(i) => {
                    tables.records.remove(i);
                    Ok(())
                }
                None => Err(Error::RecordNotFound {
                    zone: zone.clone(),
                    target: target.clone(),
                }),
            }
        }

        Action::MakeServerSetServerAssignment {
            server_set,
            dns_server,
        } => {
            if tables.server_set(server_set).is_none() {
                return Err(not_found(EntityKind::DnsServerSet, server_set));
            }
            if tables.dns_server(dns_server).is_none() {
                return Err(not_found(EntityKind::DnsServer, dns_server));
            }
            let duplicate = tables
                .server_set_servers
                .iter()
                .any(|a| a.server_set == *server_set && a.dns_server == *dns_server);
            if duplicate {
                return Err(Error::DuplicateAssignment(format!(
                    "DNS server {:?} is already assigned to server set {:?}",
                    dns_server, server_set,
                )));
            }
            tables.server_set_servers.push(ServerSetServerAssignment {
                server_set: server_set.clone(),
                dns_server: dns_server.clone(),
            });
            Ok(())
        }

        Action::RemoveServerSetServerAssignment {
            server_set,
            dns_server,
        } => {
            let position = tables
                .server_set_servers
                .iter()
                .position(|a| a.server_set == *server_set && a.dns_server == *dns_server);
            match position {
                Some(i) => {
                    tables.server_set_servers.remove(i);
                    Ok(())
                }
                None => Err(Error::AssignmentNotFound(format!(
                    "DNS server {:?} is not assigned to server set {:?}",
                    dns_server, server_set,
                ))),
            }
        }

        Action::MakeServerSetViewAssignment { server_set, view } => {
            if tables.server_set(server_set).is_none() {
                return Err(not_found(EntityKind::DnsServerSet, server_set));
            }
            if tables.view(view).is_none() {
                return Err(not_found(EntityKind::View, view));
            }
            let duplicate = tables
                .server_set_views
                .iter()
                .any(|a| a.server_set == *server_set && a.view == *view);
            if duplicate {
                return Err(Error::DuplicateAssignment(format!(
                    "view {:?} is already assigned to server set {:?}",
                    view, server_set,
                )));
            }
            tables.server_set_views.push(ServerSetViewAssignment {
                server_set: server_set.clone(),
                view: view.clone(),
            });
            Ok(())
        }

        Action::RemoveServerSetViewAssignment { server_set, view } => {
            let position = tables
                .server_set_views
                .iter()
                .position(|a| a.server_set == *server_set && a.view == *view);
            match position {
                Some(i) => {
                    tables.server_set_views.remove(i);
                    Ok(())
                }
                None => Err(Error::AssignmentNotFound(format!(
                    "view {:?} is not assigned to server set {:?}",
                    view, server_set,
                ))),
            }
        }

        Action::MakeViewDependencyAssignment { view, depends_on } => {
            if tables.view(view).is_none() {
                return Err(not_found(EntityKind::View, view));
            }
            if depends_on != ANY_VIEW && tables.view(depends_on).is_none() {
                return Err(not_found(EntityKind::View, depends_on));
            }
            if depends_on == view {
                return Err(Error::DuplicateAssignment(format!(
                    "view {:?} implicitly depends on itself",
                    view,
                )));
            }
            let duplicate = tables
                .view_dependencies
                .iter()
                .any(|a| a.view == *view && a.depends_on == *depends_on);
            if duplicate {
                return Err(Error::DuplicateAssignment(format!(
                    "view {:?} already depends on {:?}",
                    view, depends_on,
                )));
            }
            tables.view_dependencies.push(ViewDependencyAssignment {
                view: view.clone(),
                depends_on: depends_on.clone(),
            });
            Ok(())
        }

        Action::RemoveViewDependencyAssignment { view, depends_on } => {
            let position = tables
                .view_dependencies
                .iter()
                .position(|a| a.view == *view && a.depends_on == *depends_on);
            match position {
                Some(i) => {
                    tables.view_dependencies.remove(i);
                    Ok(())
                }
                None => Err(Error::AssignmentNotFound(format!(
                    "view {:?} does not depend on {:?}",
                    view, depends_on,
                ))),
            }
        }

        Action::MakeViewAclAssignment {
            view,
            acl,
            allowed,
            order,
        } => {
            if tables.view(view).is_none() {
                return Err(not_found(EntityKind::View, view));
            }
            if acl != ANY_ACL && tables.acl(acl).is_none() {
                return Err(not_found(EntityKind::Acl, acl));
            }
            let duplicate = tables
                .view_acls
                .iter()
                .any(|a| a.view == *view && a.acl == *acl);
            if duplicate {
                return Err(Error::DuplicateAssignment(format!(
                    "ACL {:?} is already assigned to view {:?}",
                    acl, view,
                )));
            }
            tables.view_acls.push(ViewAclAssignment {
                view: view.clone(),
                acl: acl.clone(),
                allowed: *allowed,
                order: *order,
            });
            Ok(())
        }

        Action::RemoveViewAclAssignment { view, acl } => {
            let position = tables
                .view_acls
                .iter()
                .position(|a| a.view == *view && a.acl == *acl);
            match position {
                Some(i) => {
                    tables.view_acls.remove(i);
                    Ok(())
                }
                None => Err(Error::AssignmentNotFound(format!(
                    "ACL {:?} is not assigned to view {:?}",
                    acl, view,
                ))),
            }
        }

        Action::MakeZoneViewAssignment { zone, view_dep } => {
            if tables.zone(zone).is_none() {
                return Err(not_found(EntityKind::Zone, zone));
            }
            let dep = normalize_view_dep(view_dep);
            require_view_dep(tables, dep)?;
            let duplicate = tables
                .zone_views
                .iter()
                .any(|a| a.zone == *zone && a.view_dep == dep);
            if duplicate {
                return Err(Error::DuplicateAssignment(format!(
                    "zone {:?} is already assigned to view dependency {:?}",
                    zone, dep,
                )));
            }
            tables.zone_views.push(ZoneViewAssignment {
                zone: zone.clone(),
                view_dep: dep.to_owned(),
            });
            Ok(())
        }

        Action::RemoveZoneViewAssignment { zone, view_dep } => {
            let dep = normalize_view_dep(view_dep);
            let position = tables
                .zone_views
                .iter()
                .position(|a| a.zone == *zone && a.view_dep == dep);
            let removed = match position {
                Some(i) => i,
                None => {
                    return Err(Error::AssignmentNotFound(format!(
                        "zone {:?} is not assigned to view dependency {:?}",
                        zone, dep,
                    )))
                }
            };
            // Records scoped through this assignment must stay
            // covered by a remaining one.
            for record in tables.records.iter().filter(|r| r.zone == *zone) {
                let covered = tables.zone_views.iter().enumerate().any(|(i, a)| {
                    i != removed
                        && a.zone == *zone
                        && (a.view_dep == record.view_dep || a.view_dep == ANY_VIEW)
                });
                if !covered {
                    return Err(in_use(
                        EntityKind::Zone,
                        zone,
                        format!("record {} via view dependency {:?}", record.id, record.view_dep),
                    ));
                }
            }
            tables.zone_views.remove(removed);
            Ok(())
        }

        Action::MakeReverseRangeZoneAssignment { cidr, zone } => {
            if tables.zone(zone).is_none() {
                return Err(not_found(EntityKind::Zone, zone));
            }
            let duplicate = tables
                .reverse_ranges
                .iter()
                .any(|a| a.cidr == *cidr && a.zone == *zone);
            if duplicate {
                return Err(Error::DuplicateAssignment(format!(
                    "reverse range {} is already assigned to zone {:?}",
                    cidr, zone,
                )));
            }
            for existing in &tables.reverse_ranges {
                if existing.zone != *zone
                    && existing.cidr.overlaps(cidr)
                    && zones_share_a_view(tables, zone, &existing.zone)
                {
                    return Err(Error::OverlappingReverseRange {
                        cidr: *cidr,
                        existing: existing.cidr,
                        zone: existing.zone.clone(),
                    });
                }
            }
            tables.reverse_ranges.push(ReverseRangeZoneAssignment {
                cidr: *cidr,
                zone: zone.clone(),
            });
            Ok(())
        }

        Action::RemoveReverseRangeZoneAssignment { cidr, zone } => {
            let position = tables
                .reverse_ranges
                .iter()
                .position(|a| a.cidr == *cidr && a.zone == *zone);
            match position {
                Some(i) => {
                    tables.reverse_ranges.remove(i);
                    Ok(())
                }
                None => Err(Error::AssignmentNotFound(format!(
                    "reverse range {} is not assigned to zone {:?}",
                    cidr, zone,
                ))),
            }
        }

        Action::MakeNamedConfOption { server_set, content } => {
            if tables.server_set(server_set).is_none() {
                return Err(not_found(EntityKind::DnsServerSet, server_set));
            }
            tables.named_conf_options.push(NamedConfGlobalOption {
                server_set: server_set.clone(),
                created_at: timestamp,
                content: content.clone(),
            });
            Ok(())
        }
    }
}

fn exists(kind: EntityKind, name: &str) -> Error {
    Error::Exists {
        kind,
        name: name.to_owned(),
    }
}

fn not_found(kind: EntityKind, name: &str) -> Error {
    Error::NotFound {
        kind,
        name: name.to_owned(),
    }
}

fn in_use(kind: EntityKind, name: &str, detail: String) -> Error {
    Error::InUse {
        kind,
        name: name.to_owned(),
        detail,
    }
}

fn check_name(kind: EntityKind, name: &str) -> Result<()> {
    if name.is_empty() || name == ANY_VIEW {
        Err(Error::InvalidName {
            kind,
            name: name.to_owned(),
        })
    } else {
        Ok(())
    }
}

fn require_view_dep(tables: &Tables, dep: &str) -> Result<()> {
    if dep == ANY_VIEW || tables.view(dep).is_some() {
        Ok(())
    } else {
        Err(not_found(EntityKind::View, dep))
    }
}

fn zones_share_a_view(tables: &Tables, a: &str, b: &str) -> bool {
    !tables
        .zone_visible_views(a)
        .is_disjoint(&tables.zone_visible_views(b))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;

    use super::*;
    use crate::records::{RecordData, RecordType};
    use crate::store::tables::ZoneType;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn apply_all(tables: &mut Tables, actions: Vec<Action>) {
        for action in actions {
            apply_action(tables, &action, "admin", at(0)).unwrap();
        }
    }

    fn make_view(name: &str) -> Action {
        Action::MakeView {
            name: name.to_owned(),
            options: String::new(),
        }
    }

    fn make_zone(name: &str) -> Action {
        Action::MakeZone {
            name: name.to_owned(),
            origin: format!("{}.", name),
            zone_type: ZoneType::Master,
            options: String::new(),
        }
    }

    fn assign_zone(zone: &str, view_dep: &str) -> Action {
        Action::MakeZoneViewAssignment {
            zone: zone.to_owned(),
            view_dep: view_dep.to_owned(),
        }
    }

    fn make_a_record(zone: &str, view_dep: &str, target: &str, ip: &str) -> Action {
        let mut arguments = BTreeMap::new();
        arguments.insert("ip".to_owned(), ip.to_owned());
        Action::MakeRecord {
            zone: zone.to_owned(),
            view_dep: view_dep.to_owned(),
            target: target.to_owned(),
            ttl: 3600,
            record_type: RecordType::A,
            arguments,
        }
    }

    fn seeded() -> Tables {
        let mut tables = Tables::default();
        apply_all(
            &mut tables,
            vec![
                Action::MakeDnsServerSet {
                    name: "set1".to_owned(),
                },
                Action::MakeDnsServer {
                    name: "ns1".to_owned(),
                    ssh_user: "bind".to_owned(),
                    remote_bind_dir: "/etc/bind".to_owned(),
                    remote_test_dir: "/etc/bind/test".to_owned(),
                },
                make_view("internal"),
                make_view("external"),
                make_zone("example.lcl"),
                assign_zone("example.lcl", "any"),
                Action::MakeServerSetServerAssignment {
                    server_set: "set1".to_owned(),
                    dns_server: "ns1".to_owned(),
                },
                Action::MakeServerSetViewAssignment {
                    server_set: "set1".to_owned(),
                    view: "internal".to_owned(),
                },
            ],
        );
        tables
    }

    #[test]
    fn duplicate_entities_are_refused() {
        let mut tables = seeded();
        let err = apply_action(&mut tables, &make_view("internal"), "admin", at(0)).unwrap_err();
        assert_eq!(
            err,
            Error::Exists {
                kind: EntityKind::View,
                name: "internal".to_owned(),
            }
        );
        assert!(matches!(
            apply_action(&mut tables, &make_zone("example.lcl"), "admin", at(0)),
            Err(Error::Exists { .. })
        ));
    }

    #[test]
    fn reserved_and_empty_names_are_rejected() {
        let mut tables = Tables::default();
        assert!(matches!(
            apply_action(&mut tables, &make_view("any"), "admin", at(0)),
            Err(Error::InvalidName { .. })
        ));
        assert!(matches!(
            apply_action(
                &mut tables,
                &Action::MakeAcl {
                    name: String::new()
                },
                "admin",
                at(0),
            ),
            Err(Error::InvalidName { .. })
        ));
        let bad_origin = Action::MakeZone {
            name: "example.lcl".to_owned(),
            origin: "example.lcl".to_owned(),
            zone_type: ZoneType::Master,
            options: String::new(),
        };
        assert!(matches!(
            apply_action(&mut tables, &bad_origin, "admin", at(0)),
            Err(Error::InvalidOrigin(_))
        ));
    }

    #[test]
    fn records_require_a_zone_view_assignment() {
        let mut tables = seeded();
        apply_all(&mut tables, vec![make_zone("orphan.lcl")]);
        assert!(matches!(
            apply_action(
                &mut tables,
                &make_a_record("orphan.lcl", "any", "host1", "10.0.0.1"),
                "admin",
                at(0),
            ),
            Err(Error::AssignmentNotFound(_))
        ));
        apply_all(&mut tables, vec![assign_zone("orphan.lcl", "any")]);
        apply_action(
            &mut tables,
            &make_a_record("orphan.lcl", "any", "host1", "10.0.0.1"),
            "jones",
            at(0),
        )
        .unwrap();
        let record = &tables.records[0];
        assert_eq!(record.id, 1);
        assert_eq!(record.last_user, "jones");
    }

    #[test]
    fn record_view_dependencies_are_normalised() {
        let mut tables = seeded();
        apply_action(
            &mut tables,
            &make_a_record("example.lcl", "internal_dep", "host1", "10.0.0.1"),
            "admin",
            at(0),
        )
        .unwrap();
        assert_eq!(tables.records[0].view_dep, "internal");
    }

    #[test]
    fn remove_record_matches_on_typed_arguments() {
        let mut tables = seeded();
        apply_all(
            &mut tables,
            vec![
                make_a_record("example.lcl", "any", "host1", "10.0.0.1"),
                make_a_record("example.lcl", "any", "host1", "10.0.0.2"),
            ],
        );
        let mut arguments = BTreeMap::new();
        arguments.insert("ip".to_owned(), "10.0.0.1".to_owned());
        apply_action(
            &mut tables,
            &Action::RemoveRecord {
                zone: "example.lcl".to_owned(),
                view_dep: "any".to_owned(),
                target: "host1".to_owned(),
                record_type: RecordType::A,
                arguments: arguments.clone(),
            },
            "admin",
            at(0),
        )
        .unwrap();
        assert_eq!(tables.records.len(), 1);
        assert_eq!(
            tables.records[0].data,
            RecordData::A {
                ip: "10.0.0.2".parse().unwrap()
            }
        );
        // The matching record is gone, so a second removal fails.
        assert!(matches!(
            apply_action(
                &mut tables,
                &Action::RemoveRecord {
                    zone: "example.lcl".to_owned(),
                    view_dep: "any".to_owned(),
                    target: "host1".to_owned(),
                    record_type: RecordType::A,
                    arguments,
                },
                "admin",
                at(0),
            ),
            Err(Error::RecordNotFound { .. })
        ));
    }

    #[test]
    fn views_in_use_cannot_be_removed() {
        let mut tables = seeded();
        assert!(matches!(
            apply_action(
                &mut tables,
                &Action::RemoveView {
                    name: "internal".to_owned()
                },
                "admin",
                at(0),
            ),
            Err(Error::InUse { .. })
        ));
        apply_all(
            &mut tables,
            vec![
                Action::RemoveServerSetViewAssignment {
                    server_set: "set1".to_owned(),
                    view: "internal".to_owned(),
                },
                Action::RemoveView {
                    name: "internal".to_owned(),
                },
            ],
        );
        assert!(tables.view("internal").is_none());
    }

    #[test]
    fn acl_lifecycle_with_strict_removal() {
        let mut tables = seeded();
        let cidr = "10.0.0.0/8".parse().unwrap();
        apply_all(
            &mut tables,
            vec![
                Action::MakeAcl {
                    name: "secret".to_owned(),
                },
                Action::MakeAclRange {
                    acl: "secret".to_owned(),
                    cidr,
                    allowed: true,
                },
                Action::MakeViewAclAssignment {
                    view: "internal".to_owned(),
                    acl: "secret".to_owned(),
                    allowed: true,
                    order: 0,
                },
            ],
        );
        assert!(matches!(
            apply_action(
                &mut tables,
                &Action::MakeAclRange {
                    acl: "secret".to_owned(),
                    cidr,
                    allowed: false,
                },
                "admin",
                at(0),
            ),
            Err(Error::DuplicateAssignment(_))
        ));
        assert!(matches!(
            apply_action(
                &mut tables,
                &Action::RemoveAcl {
                    name: "secret".to_owned()
                },
                "admin",
                at(0),
            ),
            Err(Error::InUse { .. })
        ));
        apply_all(
            &mut tables,
            vec![
                Action::RemoveViewAclAssignment {
                    view: "internal".to_owned(),
                    acl: "secret".to_owned(),
                },
                Action::RemoveAclRange {
                    acl: "secret".to_owned(),
                    cidr,
                },
                Action::RemoveAcl {
                    name: "secret".to_owned(),
                },
            ],
        );
        assert!(tables.acls.is_empty());
    }

    #[test]
    fn the_any_acl_needs_no_row() {
        let mut tables = seeded();
        apply_action(
            &mut tables,
            &Action::MakeViewAclAssignment {
                view: "internal".to_owned(),
                acl: "any".to_owned(),
                allowed: true,
                order: 0,
            },
            "admin",
            at(0),
        )
        .unwrap();
        assert!(matches!(
            apply_action(
                &mut tables,
                &Action::MakeViewAclAssignment {
                    view: "internal".to_owned(),
                    acl: "nonexistent".to_owned(),
                    allowed: true,
                    order: 1,
                },
                "admin",
                at(0),
            ),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn reverse_ranges_must_not_overlap_within_a_view() {
        let mut tables = seeded();
        apply_all(
            &mut tables,
            vec![
                make_zone("1.10.in-addr.arpa"),
                make_zone("0.1.10.in-addr.arpa"),
                assign_zone("1.10.in-addr.arpa", "any"),
                assign_zone("0.1.10.in-addr.arpa", "any"),
                Action::MakeReverseRangeZoneAssignment {
                    cidr: "10.1.0.0/16".parse().unwrap(),
                    zone: "1.10.in-addr.arpa".to_owned(),
                },
            ],
        );
        assert!(matches!(
            apply_action(
                &mut tables,
                &Action::MakeReverseRangeZoneAssignment {
                    cidr: "10.1.0.0/24".parse().unwrap(),
                    zone: "0.1.10.in-addr.arpa".to_owned(),
                },
                "admin",
                at(0),
            ),
            Err(Error::OverlappingReverseRange { .. })
        ));
    }

    #[test]
    fn reverse_ranges_may_overlap_across_disjoint_views() {
        let mut tables = Tables::default();
        apply_all(
            &mut tables,
            vec![
                make_view("internal"),
                make_view("external"),
                make_zone("rev-a"),
                make_zone("rev-b"),
                assign_zone("rev-a", "internal"),
                assign_zone("rev-b", "external"),
                Action::MakeReverseRangeZoneAssignment {
                    cidr: "10.1.0.0/16".parse().unwrap(),
                    zone: "rev-a".to_owned(),
                },
                Action::MakeReverseRangeZoneAssignment {
                    cidr: "10.1.0.0/16".parse().unwrap(),
                    zone: "rev-b".to_owned(),
                },
            ],
        );
        assert_eq!(tables.reverse_ranges.len(), 2);
    }

    #[test]
    fn zone_view_removal_is_blocked_by_uncovered_records() {
        let mut tables = seeded();
        apply_all(
            &mut tables,
            vec![make_a_record("example.lcl", "internal", "host1", "10.0.0.1")],
        );
        assert!(matches!(
            apply_action(
                &mut tables,
                &Action::RemoveZoneViewAssignment {
                    zone: "example.lcl".to_owned(),
                    view_dep: "any".to_owned(),
                },
                "admin",
                at(0),
            ),
            Err(Error::InUse { .. })
        ));
        // With a direct assignment in place the "any" one can go.
        apply_all(
            &mut tables,
            vec![
                assign_zone("example.lcl", "internal"),
                Action::RemoveZoneViewAssignment {
                    zone: "example.lcl".to_owned(),
                    view_dep: "any".to_owned(),
                },
            ],
        );
        assert_eq!(tables.zone_views.len(), 1);
    }

    #[test]
    fn named_conf_options_stamp_the_action_timestamp() {
        let mut tables = seeded();
        apply_action(
            &mut tables,
            &Action::MakeNamedConfOption {
                server_set: "set1".to_owned(),
                content: "options { directory \"/var/named\"; };".to_owned(),
            },
            "admin",
            at(42),
        )
        .unwrap();
        assert_eq!(tables.named_conf_options[0].created_at, at(42));
    }

    #[test]
    fn dependency_assignments_require_real_views() {
        let mut tables = seeded();
        assert!(matches!(
            apply_action(
                &mut tables,
                &Action::MakeViewDependencyAssignment {
                    view: "internal".to_owned(),
                    depends_on: "missing".to_owned(),
                },
                "admin",
                at(0),
            ),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            apply_action(
                &mut tables,
                &Action::MakeViewDependencyAssignment {
                    view: "internal".to_owned(),
                    depends_on: "internal".to_owned(),
                },
                "admin",
                at(0),
            ),
            Err(Error::DuplicateAssignment(_))
        ));
        apply_action(
            &mut tables,
            &Action::MakeViewDependencyAssignment {
                view: "internal".to_owned(),
                depends_on: "external".to_owned(),
            },
            "admin",
            at(0),
        )
        .unwrap();
        assert!(tables
            .dependencies_of("internal")
            .contains("external"));
    }

    #[test]
    fn servers_in_use_cannot_be_removed() {
        let mut tables = seeded();
        assert!(matches!(
            apply_action(
                &mut tables,
                &Action::RemoveDnsServer {
                    name: "ns1".to_owned()
                },
                "admin",
                at(0),
            ),
            Err(Error::InUse { .. })
        ));
        apply_all(
            &mut tables,
            vec![
                Action::RemoveServerSetServerAssignment {
                    server_set: "set1".to_owned(),
                    dns_server: "ns1".to_owned(),
                },
                Action::RemoveDnsServer {
                    name: "ns1".to_owned(),
                },
            ],
        );
        assert!(tables.dns_servers.is_empty());
    }
}
