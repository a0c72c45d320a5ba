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

//! The management tables.
//!
//! [`Tables`] is the relational heart of the management store: plain
//! rows in plain vectors, serialised as JSON. Row order is significant
//! where noted (server-set view assignments and view ACL assignments
//! drive emission order) and incidental elsewhere.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ops::Action;
use crate::records::RecordData;
use crate::util::{Caseless, ANY_VIEW};

////////////////////////////////////////////////////////////////////////
// TABLE ROWS                                                         //
////////////////////////////////////////////////////////////////////////

/// A managed name server. `remote_bind_dir` is where its configuration
/// tree is installed; `remote_test_dir` is a scratch area probed for
/// writability before distribution.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DnsServer {
    pub name: String,
    pub ssh_user: String,
    pub remote_bind_dir: String,
    pub remote_test_dir: String,
}

/// A group of servers sharing one view/zone/record projection.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DnsServerSet {
    pub name: String,
}

/// Membership of a server in a server set.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServerSetServerAssignment {
    pub server_set: String,
    pub dns_server: String,
}

/// Membership of a view in a server set. Row order is the order of the
/// `view { … }` blocks in the generated named.conf.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServerSetViewAssignment {
    pub server_set: String,
    pub view: String,
}

/// A BIND view. The options blob is spliced verbatim into the view's
/// generated stanza.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct View {
    pub name: String,
    pub options: String,
}

/// An explicit view-subset declaration: records tagged `depends_on`
/// are also visible in `view`. The "any" dependency is implicit and
/// never stored.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ViewDependencyAssignment {
    pub view: String,
    pub depends_on: String,
}

/// One entry of a view's match-clients composition.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ViewAclAssignment {
    pub view: String,
    pub acl: String,
    pub allowed: bool,
    pub order: u32,
}

/// A named address list. The reserved name "any" matches
/// unconditionally and carries no entries.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Acl {
    pub name: String,
    pub range_entries: Vec<AclRangeEntry>,
}

/// One CIDR of an ACL, in allow or deny form.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AclRangeEntry {
    pub cidr: Cidr,
    pub allowed: bool,
}

/// A zone. `name` is the bare label used for file names; `origin` is
/// the fully qualified form with its trailing dot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Zone {
    pub name: String,
    pub origin: String,
    pub zone_type: ZoneType,
    pub options: String,
}

/// Presence of a zone under a view dependency. `view_dep` is a view
/// name or "any".
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ZoneViewAssignment {
    pub zone: String,
    pub view_dep: String,
}

/// The network a reverse zone answers for.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ReverseRangeZoneAssignment {
    pub cidr: Cidr,
    pub zone: String,
}

/// A DNS record row. The typed data is flattened into the row, so the
/// serialised form carries `record_type` and the arguments inline.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Record {
    pub id: u64,
    pub target: String,
    pub zone: String,
    pub view_dep: String,
    pub ttl: u32,
    pub last_user: String,
    #[serde(flatten)]
    pub data: RecordData,
}

/// One revision of a server set's global named.conf options. The
/// exporter uses the revision with the greatest `created_at`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NamedConfGlobalOption {
    pub server_set: String,
    pub created_at: DateTime<Utc>,
    pub content: String,
}

/// One row of the append-only audit log.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AuditLogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub action: Action,
    pub success: bool,
}

////////////////////////////////////////////////////////////////////////
// TABLES                                                             //
////////////////////////////////////////////////////////////////////////

/// Every management table except the audit log.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Tables {
    pub dns_servers: Vec<DnsServer>,
    pub dns_server_sets: Vec<DnsServerSet>,
    pub server_set_servers: Vec<ServerSetServerAssignment>,
    pub server_set_views: Vec<ServerSetViewAssignment>,
    pub views: Vec<View>,
    pub view_dependencies: Vec<ViewDependencyAssignment>,
    pub view_acls: Vec<ViewAclAssignment>,
    pub acls: Vec<Acl>,
    pub zones: Vec<Zone>,
    pub zone_views: Vec<ZoneViewAssignment>,
    pub reverse_ranges: Vec<ReverseRangeZoneAssignment>,
    pub records: Vec<Record>,
    pub named_conf_options: Vec<NamedConfGlobalOption>,
}

impl Tables {
    pub fn dns_server(&self, name: &str) -> Option<&DnsServer> {
        self.dns_servers.iter().find(|s| s.name == name)
    }

    pub fn server_set(&self, name: &str) -> Option<&DnsServerSet> {
        self.dns_server_sets.iter().find(|s| s.name == name)
    }

    pub fn view(&self, name: &str) -> Option<&View> {
        self.views.iter().find(|v| v.name == name)
    }

    pub fn acl(&self, name: &str) -> Option<&Acl> {
        self.acls.iter().find(|a| a.name == name)
    }

    pub fn zone(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.name == name)
    }

    /// The names of the views assigned to `server_set`, in assignment
    /// order.
    pub fn set_views(&self, server_set: &str) -> Vec<&str> {
        self.server_set_views
            .iter()
            .filter(|a| a.server_set == server_set)
            .map(|a| a.view.as_str())
            .collect()
    }

    /// The names of the servers assigned to `server_set`, in
    /// assignment order.
    pub fn set_servers(&self, server_set: &str) -> Vec<&str> {
        self.server_set_servers
            .iter()
            .filter(|a| a.server_set == server_set)
            .map(|a| a.dns_server.as_str())
            .collect()
    }

    /// The newest global-options revision for `server_set`. Later rows
    /// win ties on `created_at`.
    pub fn latest_named_conf(&self, server_set: &str) -> Option<&NamedConfGlobalOption> {
        let mut latest: Option<&NamedConfGlobalOption> = None;
        for option in &self.named_conf_options {
            if option.server_set != server_set {
                continue;
            }
            match latest {
                Some(best) if option.created_at < best.created_at => (),
                _ => latest = Some(option),
            }
        }
        latest
    }

    /// The id the next inserted record receives. Ids restart after
    /// removal of the highest row, which keeps id assignment a pure
    /// function of the verb sequence.
    pub fn next_record_id(&self) -> u64 {
        self.records.iter().map(|r| r.id).max().unwrap_or(0) + 1
    }

    /// The view-dependency tokens whose records and zones are visible
    /// in `view`: the view itself, "any", and every explicitly
    /// declared subset view. Subset declarations do not chain.
    pub fn dependencies_of(&self, view: &str) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        deps.insert(ANY_VIEW.to_owned());
        deps.insert(view.to_owned());
        for assignment in &self.view_dependencies {
            if assignment.view == view {
                deps.insert(assignment.depends_on.clone());
            }
        }
        deps
    }

    /// The real views in which `zone` appears, given its view
    /// assignments and the views' dependency declarations.
    pub fn zone_visible_views(&self, zone: &str) -> BTreeSet<String> {
        let mut visible = BTreeSet::new();
        for view in &self.views {
            let deps = self.dependencies_of(&view.name);
            let assigned = self
                .zone_views
                .iter()
                .any(|a| a.zone == zone && deps.contains(a.view_dep.as_str()));
            if assigned {
                visible.insert(view.name.clone());
            }
        }
        visible
    }
}

////////////////////////////////////////////////////////////////////////
// CIDR RANGES                                                        //
////////////////////////////////////////////////////////////////////////

/// An IPv4 or IPv6 network in `address/prefix` form.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Cidr {
    address: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, InvalidCidr> {
        if prefix_len > Self::family_bits(address) {
            Err(InvalidCidr(format!("{}/{}", address, prefix_len)))
        } else {
            Ok(Self {
                address,
                prefix_len,
            })
        }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    fn family_bits(address: IpAddr) -> u8 {
        match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    fn address_bits(&self) -> u128 {
        match self.address {
            IpAddr::V4(v4) => u32::from(v4) as u128,
            IpAddr::V6(v6) => u128::from(v6),
        }
    }

    /// Whether the two networks share any address. Networks of
    /// different families never overlap.
    pub fn overlaps(&self, other: &Cidr) -> bool {
        if Self::family_bits(self.address) != Self::family_bits(other.address) {
            return false;
        }
        let prefix_len = self.prefix_len.min(other.prefix_len);
        if prefix_len == 0 {
            return true;
        }
        let shift = Self::family_bits(self.address) - prefix_len;
        (self.address_bits() >> shift) == (other.address_bits() >> shift)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Cidr {
    type Err = InvalidCidr;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidCidr(text.to_owned());
        let (address, prefix_len) = text.split_once('/').ok_or_else(invalid)?;
        let address: IpAddr = address.parse().map_err(|_| invalid())?;
        let prefix_len: u8 = prefix_len.parse().map_err(|_| invalid())?;
        Self::new(address, prefix_len).map_err(|_| invalid())
    }
}

impl Serialize for Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CidrVisitor;

        impl Visitor<'_> for CidrVisitor {
            type Value = Cidr;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a network in address/prefix form")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Cidr, E> {
                value.parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(CidrVisitor)
    }
}

/// The error returned when parsing a malformed CIDR range.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidCidr(pub String);

impl fmt::Display for InvalidCidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid CIDR range {:?}", self.0)
    }
}

impl std::error::Error for InvalidCidr {}

////////////////////////////////////////////////////////////////////////
// ZONE TYPES                                                         //
////////////////////////////////////////////////////////////////////////

/// The BIND zone types the model accepts.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    Master,
    Slave,
    Forward,
    Hint,
}

impl ZoneType {
    pub const ALL: [ZoneType; 4] = [
        ZoneType::Master,
        ZoneType::Slave,
        ZoneType::Forward,
        ZoneType::Hint,
    ];

    /// The keyword written into `zone { type … }` stanzas.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Slave => "slave",
            Self::Forward => "forward",
            Self::Hint => "hint",
        }
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneType {
    type Err = UnknownZoneType;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        for zone_type in Self::ALL {
            if Caseless(text) == Caseless(zone_type.as_str()) {
                return Ok(zone_type);
            }
        }
        Err(UnknownZoneType(text.to_owned()))
    }
}

/// The error returned when parsing an unrecognised zone-type name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnknownZoneType(pub String);

impl fmt::Display for UnknownZoneType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown zone type {:?}", self.0)
    }
}

impl std::error::Error for UnknownZoneType {}
