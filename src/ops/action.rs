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

//! The administrative action vocabulary.
//!
//! Every write the management API performs is expressed as an
//! [`Action`] value. Actions are what the audit log records, so the
//! serialised form is a contract: the tag field `action` carries the
//! verb name and the remaining fields carry its arguments. Replay
//! deserialises these rows and dispatches them through the same
//! pipeline the live API uses.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::records::RecordType;
use crate::store::tables::{Cidr, ZoneType};

/// One administrative write, with its arguments.
///
/// Record arguments stay in the flat `name → value` form the API
/// receives; they are decoded against the per-type argument
/// definitions when the action is applied.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    MakeDnsServer {
        name: String,
        ssh_user: String,
        remote_bind_dir: String,
        remote_test_dir: String,
    },
    RemoveDnsServer {
        name: String,
    },
    MakeDnsServerSet {
        name: String,
    },
    RemoveDnsServerSet {
        name: String,
    },
    MakeView {
        name: String,
        options: String,
    },
    RemoveView {
        name: String,
    },
    MakeAcl {
        name: String,
    },
    RemoveAcl {
        name: String,
    },
    MakeAclRange {
        acl: String,
        cidr: Cidr,
        allowed: bool,
    },
    RemoveAclRange {
        acl: String,
        cidr: Cidr,
    },
    MakeZone {
        name: String,
        origin: String,
        zone_type: ZoneType,
        options: String,
    },
    RemoveZone {
        name: String,
    },
    MakeRecord {
        zone: String,
        view_dep: String,
        target: String,
        ttl: u32,
        record_type: RecordType,
        arguments: BTreeMap<String, String>,
    },
    RemoveRecord {
        zone: String,
        view_dep: String,
        target: String,
        record_type: RecordType,
        arguments: BTreeMap<String, String>,
    },
    MakeServerSetServerAssignment {
        server_set: String,
        dns_server: String,
    },
    RemoveServerSetServerAssignment {
        server_set: String,
        dns_server: String,
    },
    MakeServerSetViewAssignment {
        server_set: String,
        view: String,
    },
    RemoveServerSetViewAssignment {
        server_set: String,
        view: String,
    },
    MakeViewDependencyAssignment {
        view: String,
        depends_on: String,
    },
    RemoveViewDependencyAssignment {
        view: String,
        depends_on: String,
    },
    MakeViewAclAssignment {
        view: String,
        acl: String,
        allowed: bool,
        order: u32,
    },
    RemoveViewAclAssignment {
        view: String,
        acl: String,
    },
    MakeZoneViewAssignment {
        zone: String,
        view_dep: String,
    },
    RemoveZoneViewAssignment {
        zone: String,
        view_dep: String,
    },
    MakeReverseRangeZoneAssignment {
        cidr: Cidr,
        zone: String,
    },
    RemoveReverseRangeZoneAssignment {
        cidr: Cidr,
        zone: String,
    },
    MakeNamedConfOption {
        server_set: String,
        content: String,
    },
}

impl Action {
    /// The verb name, identical to the serialised `action` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MakeDnsServer { .. } => "make_dns_server",
            Self::RemoveDnsServer { .. } => "remove_dns_server",
            Self::MakeDnsServerSet { .. } => "make_dns_server_set",
            Self::RemoveDnsServerSet { .. } => "remove_dns_server_set",
            Self::MakeView { .. } => "make_view",
            Self::RemoveView { .. } => "remove_view",
            Self::MakeAcl { .. } => "make_acl",
            Self::RemoveAcl { .. } => "remove_acl",
            Self::MakeAclRange { .. } => "make_acl_range",
            Self::RemoveAclRange { .. } => "remove_acl_range",
            Self::MakeZone { .. } => "make_zone",
            Self::RemoveZone { .. } => "remove_zone",
            Self::MakeRecord { .. } => "make_record",
            Self::RemoveRecord { .. } => "remove_record",
            Self::MakeServerSetServerAssignment { .. } => "make_server_set_server_assignment",
            Self::RemoveServerSetServerAssignment { .. } => "remove_server_set_server_assignment",
            Self::MakeServerSetViewAssignment { .. } => "make_server_set_view_assignment",
            Self::RemoveServerSetViewAssignment { .. } => "remove_server_set_view_assignment",
            Self::MakeViewDependencyAssignment { .. } => "make_view_dependency_assignment",
            Self::RemoveViewDependencyAssignment { .. } => "remove_view_dependency_assignment",
            Self::MakeViewAclAssignment { .. } => "make_view_acl_assignment",
            Self::RemoveViewAclAssignment { .. } => "remove_view_acl_assignment",
            Self::MakeZoneViewAssignment { .. } => "make_zone_view_assignment",
            Self::RemoveZoneViewAssignment { .. } => "remove_zone_view_assignment",
            Self::MakeReverseRangeZoneAssignment { .. } => "make_reverse_range_zone_assignment",
            Self::RemoveReverseRangeZoneAssignment { .. } => "remove_reverse_range_zone_assignment",
            Self::MakeNamedConfOption { .. } => "make_named_conf_option",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_tag_field_matches_the_verb_name() {
        let action = Action::MakeZone {
            name: "example.lcl".to_owned(),
            origin: "example.lcl.".to_owned(),
            zone_type: ZoneType::Master,
            options: String::new(),
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["action"], action.name());
        assert_eq!(value["zone_type"], "master");
    }

    #[test]
    fn record_actions_round_trip_with_their_argument_maps() {
        let mut arguments = BTreeMap::new();
        arguments.insert("ip".to_owned(), "192.168.0.1".to_owned());
        let action = Action::MakeRecord {
            zone: "example.lcl".to_owned(),
            view_dep: "any".to_owned(),
            target: "host1".to_owned(),
            ttl: 3600,
            record_type: RecordType::A,
            arguments,
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"action\":\"make_record\""));
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }
}
