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

//! named.conf rendering.
//!
//! Each server gets two configurations: `named.conf.a`, which loads
//! the generated master files as text, and `named.conf.b`, which is
//! identical except for a `masterfile-format raw` setting for
//! operators who compile their zones after distribution. Both start
//! with the server set's stored header, rewritten so that `directory`
//! points at the target server's BIND directory, followed by the ACL
//! stanzas and one `view` block per view.

use std::cmp::Reverse;

use crate::cook::{CookedAcl, CookedZone, ServerSetConfig, ViewConfig};
use crate::isc::{self, Clause, Document};
use crate::store::tables::{AclRangeEntry, DnsServer, ZoneType};
use crate::util::trim_trailing_dot;

/// Renders the full named.conf for one server of a server set. With
/// `binary` set, the result is the `named.conf.b` variant.
///
/// Fails only if the stored header does not parse.
pub fn named_conf(
    set: &ServerSetConfig,
    server: &DnsServer,
    binary: bool,
) -> isc::Result<String> {
    let mut out = header(&set.named_conf, &server.remote_bind_dir, binary)?;
    for acl in &set.acls {
        out.push('\n');
        out.push_str(&acl_stanza(acl));
    }
    for name in &set.views {
        out.push('\n');
        out.push_str(&view_stanza(name, &set.view_configs[name]));
    }
    Ok(out)
}

fn header(stored: &str, directory: &str, binary: bool) -> isc::Result<String> {
    let mut document = Document::parse(stored)?;
    document.set_options_directory(directory);
    if binary {
        document.insert_options_clause_after_directory(Clause::of(vec![
            isc::word("masterfile-format"),
            isc::word("raw"),
        ]));
    }
    Ok(document.emit())
}

////////////////////////////////////////////////////////////////////////
// ACL STANZAS                                                        //
////////////////////////////////////////////////////////////////////////

fn acl_stanza(acl: &CookedAcl) -> String {
    let mut entries: Vec<&AclRangeEntry> = acl.entries.iter().collect();
    // Longest prefixes first, and denials before allows at equal
    // length, so a specific or negative entry is never shadowed by a
    // broader allow. The sort is stable; entries otherwise keep their
    // insertion order.
    entries.sort_by_key(|entry| (Reverse(entry.cidr.prefix_len()), entry.allowed));
    let mut out = format!("acl {} {{", acl.name);
    for entry in entries {
        out.push(' ');
        if !entry.allowed {
            out.push('!');
        }
        out.push_str(&entry.cidr.to_string());
        out.push(';');
    }
    out.push_str(" };\n");
    out
}

////////////////////////////////////////////////////////////////////////
// VIEW STANZAS                                                       //
////////////////////////////////////////////////////////////////////////

fn view_stanza(name: &str, view: &ViewConfig) -> String {
    let mut out = format!("view \"{name}\" {{\n");
    out.push_str("    match-clients {");
    for (acl, allowed) in &view.acls {
        out.push(' ');
        if !*allowed {
            out.push('!');
        }
        out.push_str(acl);
        out.push(';');
    }
    out.push_str(" };\n");
    out.push_str("    recursion no;\n");
    if let Some(options) = options_text(&view.options) {
        out.push_str("    ");
        out.push_str(&options);
        out.push('\n');
    }
    out.push_str("    zone \".\" { type hint; file \"named.ca\"; };\n");
    for zone in &view.zones {
        // Hint zones are covered by the fixed root-hint line above.
        if zone.zone_type == ZoneType::Hint {
            continue;
        }
        out.push_str(&zone_stanza(name, zone));
    }
    out.push_str("};\n");
    out
}

fn zone_stanza(view: &str, zone: &CookedZone) -> String {
    let origin = trim_trailing_dot(&zone.origin);
    let origin = if origin.is_empty() { "." } else { origin };
    let mut out = format!("    zone \"{origin}\" {{ type {};", zone.zone_type.as_str());
    // Forward zones carry no master file; BIND rejects one.
    if matches!(zone.zone_type, ZoneType::Master | ZoneType::Slave) {
        out.push_str(&format!(" file \"{view}/{}.db\";", zone.name));
    }
    if let Some(options) = options_text(&zone.options) {
        out.push(' ');
        out.push_str(&options);
    }
    out.push_str(" };\n");
    out
}

/// Prepares stored free-form options text for splicing, terminating it
/// if the operator left the final semicolon off.
fn options_text(options: &str) -> Option<String> {
    let options = options.trim();
    if options.is_empty() {
        return None;
    }
    let mut text = options.to_owned();
    if !text.ends_with(';') {
        text.push(';');
    }
    Some(text)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cook::CookedRecord;
    use crate::records::RecordData;
    use crate::store::tables::Cidr;

    fn server() -> DnsServer {
        DnsServer {
            name: "ns1".to_owned(),
            ssh_user: "dnsop".to_owned(),
            remote_bind_dir: "/etc/bind".to_owned(),
            remote_test_dir: "/etc/bind/test".to_owned(),
        }
    }

    fn set_with(views: Vec<(&str, ViewConfig)>) -> ServerSetConfig {
        ServerSetConfig {
            name: "set1".to_owned(),
            dns_servers: vec![server()],
            views: views.iter().map(|(name, _)| (*name).to_owned()).collect(),
            view_configs: views
                .into_iter()
                .map(|(name, view)| (name.to_owned(), view))
                .collect(),
            acls: Vec::new(),
            named_conf: String::new(),
        }
    }

    fn empty_view(acls: Vec<(&str, bool)>) -> ViewConfig {
        ViewConfig {
            options: String::new(),
            acls: acls
                .into_iter()
                .map(|(name, allowed)| (name.to_owned(), allowed))
                .collect(),
            zones: Vec::new(),
        }
    }

    fn master_zone(name: &str) -> CookedZone {
        CookedZone {
            name: name.to_owned(),
            origin: format!("{name}."),
            zone_type: ZoneType::Master,
            options: String::new(),
            records: vec![CookedRecord {
                target: "@".to_owned(),
                ttl: 3600,
                data: RecordData::Ns {
                    name_server: "ns1.example.lcl.".to_owned(),
                },
            }],
        }
    }

    #[test]
    fn the_directory_points_at_the_target_server() {
        let mut set = set_with(vec![("internal", empty_view(vec![("any", true)]))]);
        set.named_conf = "options { directory \"/placeholder\"; recursion no; };".to_owned();
        let conf = named_conf(&set, &server(), false).unwrap();
        assert!(conf.contains("directory \"/etc/bind\";"), "got:\n{conf}");
        assert!(!conf.contains("placeholder"));
        assert!(conf.contains("recursion no;"));
    }

    #[test]
    fn binary_configs_ask_for_raw_master_files() {
        let set = set_with(vec![("internal", empty_view(vec![("any", true)]))]);
        let text = named_conf(&set, &server(), false).unwrap();
        let binary = named_conf(&set, &server(), true).unwrap();
        assert!(!text.contains("masterfile-format"));
        assert!(binary.contains("    directory \"/etc/bind\";\n    masterfile-format raw;\n"));
    }

    #[test]
    fn match_clients_follows_assignment_order() {
        let set = set_with(vec![
            ("internal", empty_view(vec![("secret", true), ("public", false)])),
            ("external", empty_view(vec![("public", true)])),
        ]);
        let conf = named_conf(&set, &server(), false).unwrap();
        let internal = conf.find("view \"internal\"").unwrap();
        let external = conf.find("view \"external\"").unwrap();
        assert!(internal < external);
        assert!(conf.contains("match-clients { secret; !public; };"));
        assert!(conf.contains("match-clients { public; };"));
    }

    #[test]
    fn acl_entries_sort_specific_and_deny_first() {
        let mut set = set_with(vec![("internal", empty_view(vec![("filtered", true)]))]);
        let cidr = |s: &str| -> Cidr { s.parse().unwrap() };
        set.acls = vec![CookedAcl {
            name: "filtered".to_owned(),
            entries: vec![
                AclRangeEntry { cidr: cidr("10.0.0.0/8"), allowed: true },
                AclRangeEntry { cidr: cidr("10.1.2.0/24"), allowed: false },
                AclRangeEntry { cidr: cidr("192.0.2.0/24"), allowed: true },
                AclRangeEntry { cidr: cidr("0.0.0.0/0"), allowed: false },
            ],
        }];
        let conf = named_conf(&set, &server(), false).unwrap();
        assert!(
            conf.contains("acl filtered { !10.1.2.0/24; 192.0.2.0/24; 10.0.0.0/8; !0.0.0.0/0; };"),
            "got:\n{conf}"
        );
    }

    #[test]
    fn zone_stanzas_reference_view_scoped_files() {
        let mut view = empty_view(vec![("any", true)]);
        view.zones = vec![master_zone("example.lcl")];
        let set = set_with(vec![("internal", view)]);
        let conf = named_conf(&set, &server(), false).unwrap();
        assert!(conf.contains(
            "    zone \"example.lcl\" { type master; file \"internal/example.lcl.db\"; };\n"
        ));
    }

    #[test]
    fn forward_zones_carry_no_file() {
        let mut zone = master_zone("fwd.lcl");
        zone.zone_type = ZoneType::Forward;
        zone.options = "forwarders { 192.0.2.53; }".to_owned();
        let mut view = empty_view(vec![("any", true)]);
        view.zones = vec![zone];
        let set = set_with(vec![("internal", view)]);
        let conf = named_conf(&set, &server(), false).unwrap();
        assert!(conf.contains(
            "    zone \"fwd.lcl\" { type forward; forwarders { 192.0.2.53; }; };\n"
        ));
        assert!(!conf.contains("fwd.lcl.db"));
    }

    #[test]
    fn hint_zones_fold_into_the_fixed_root_line() {
        let mut zone = master_zone("root");
        zone.origin = ".".to_owned();
        zone.zone_type = ZoneType::Hint;
        let mut view = empty_view(vec![("any", true)]);
        view.zones = vec![zone];
        let set = set_with(vec![("internal", view)]);
        let conf = named_conf(&set, &server(), false).unwrap();
        assert_eq!(
            conf.matches("zone \".\" { type hint; file \"named.ca\"; };").count(),
            1
        );
        assert!(!conf.contains("type hint; file \"internal"));
    }
}
