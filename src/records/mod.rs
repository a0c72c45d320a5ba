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

//! Typed record data.
//!
//! The management model stores each DNS record as a tagged variant
//! carrying its typed arguments ([`RecordData`]), rather than as a map
//! of strings. The flat string form still exists at the edges: callers
//! of the write verbs submit `argument name → value` maps, which are
//! decoded against the per-type argument definitions in the [`args`]
//! module.
//!
//! This module also owns the ordering rules that make generated zone
//! files deterministic: records sort by a fixed category order (SOA
//! first, then NS, MX, A, AAAA, CNAME, PTR, then everything else), with
//! MX records ordered by priority and all remaining ties broken
//! lexically. See [`zone_sort_key`].

use std::cmp::Ordering;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::util::Caseless;

pub mod args;

////////////////////////////////////////////////////////////////////////
// RECORD TYPES                                                       //
////////////////////////////////////////////////////////////////////////

/// The record types the management model understands.
///
/// This is a closed set: the exporter refuses data it cannot render
/// deterministically, so new types must be added here together with
/// their argument definitions and presentation logic.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Soa,
    Ns,
    Mx,
    A,
    Aaaa,
    Cname,
    Ptr,
    Hinfo,
    Srv,
    Txt,
}

impl RecordType {
    /// All known record types, in no particular order.
    pub const ALL: [RecordType; 10] = [
        RecordType::Soa,
        RecordType::Ns,
        RecordType::Mx,
        RecordType::A,
        RecordType::Aaaa,
        RecordType::Cname,
        RecordType::Ptr,
        RecordType::Hinfo,
        RecordType::Srv,
        RecordType::Txt,
    ];

    /// The lower-case presentation name, as written in generated zone
    /// files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Soa => "soa",
            Self::Ns => "ns",
            Self::Mx => "mx",
            Self::A => "a",
            Self::Aaaa => "aaaa",
            Self::Cname => "cname",
            Self::Ptr => "ptr",
            Self::Hinfo => "hinfo",
            Self::Srv => "srv",
            Self::Txt => "txt",
        }
    }

    /// The rank of this type in the fixed zone-file category order.
    /// Lower ranks are emitted first.
    fn category_rank(self) -> u8 {
        match self {
            Self::Soa => 0,
            Self::Ns => 1,
            Self::Mx => 2,
            Self::A => 3,
            Self::Aaaa => 4,
            Self::Cname => 5,
            Self::Ptr => 6,
            Self::Hinfo | Self::Srv | Self::Txt => 7,
        }
    }
}

impl FromStr for RecordType {
    type Err = UnknownRecordType;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        for record_type in Self::ALL {
            if Caseless(text) == Caseless(record_type.as_str()) {
                return Ok(record_type);
            }
        }
        Err(UnknownRecordType(text.to_owned()))
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error returned when parsing an unrecognised record-type name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnknownRecordType(pub String);

impl fmt::Display for UnknownRecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown record type {:?}", self.0)
    }
}

impl std::error::Error for UnknownRecordType {}

////////////////////////////////////////////////////////////////////////
// RECORD DATA                                                        //
////////////////////////////////////////////////////////////////////////

/// The typed arguments of a record, one variant per record type.
///
/// Field order within each variant is the argument order declared in
/// [`args::definitions`], which is also the order in which arguments
/// are rendered into zone files.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "record_type", rename_all = "lowercase")]
pub enum RecordData {
    Soa {
        name_server: String,
        admin_email: String,
        serial_number: u32,
        refresh: u32,
        retry: u32,
        expiry: u32,
        minimum: u32,
    },
    Ns {
        name_server: String,
    },
    Mx {
        priority: u16,
        mail_server: String,
    },
    A {
        ip: Ipv4Addr,
    },
    Aaaa {
        ip: Ipv6Addr,
    },
    Cname {
        host: String,
    },
    Ptr {
        host: String,
    },
    Hinfo {
        hardware: String,
        os: String,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Txt {
        quoted_text: String,
    },
}

impl RecordData {
    /// Returns the record type of this data.
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Soa { .. } => RecordType::Soa,
            Self::Ns { .. } => RecordType::Ns,
            Self::Mx { .. } => RecordType::Mx,
            Self::A { .. } => RecordType::A,
            Self::Aaaa { .. } => RecordType::Aaaa,
            Self::Cname { .. } => RecordType::Cname,
            Self::Ptr { .. } => RecordType::Ptr,
            Self::Hinfo { .. } => RecordType::Hinfo,
            Self::Srv { .. } => RecordType::Srv,
            Self::Txt { .. } => RecordType::Txt,
        }
    }

    /// Returns the argument values in declared order, rendered in
    /// presentation form. Numbers carry no separators; TXT data keeps
    /// its surrounding quotes.
    pub fn argument_values(&self) -> Vec<String> {
        match self {
            Self::Soa {
                name_server,
                admin_email,
                serial_number,
                refresh,
                retry,
                expiry,
                minimum,
            } => vec![
                name_server.clone(),
                admin_email.clone(),
                serial_number.to_string(),
                refresh.to_string(),
                retry.to_string(),
                expiry.to_string(),
                minimum.to_string(),
            ],
            Self::Ns { name_server } => vec![name_server.clone()],
            Self::Mx {
                priority,
                mail_server,
            } => vec![priority.to_string(), mail_server.clone()],
            Self::A { ip } => vec![ip.to_string()],
            Self::Aaaa { ip } => vec![ip.to_string()],
            Self::Cname { host } => vec![host.clone()],
            Self::Ptr { host } => vec![host.clone()],
            Self::Hinfo { hardware, os } => vec![hardware.clone(), os.clone()],
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => vec![
                priority.to_string(),
                weight.to_string(),
                port.to_string(),
                target.clone(),
            ],
            Self::Txt { quoted_text } => vec![ensure_quoted(quoted_text)],
        }
    }

    /// Returns the MX priority, if this is an MX record.
    fn mx_priority(&self) -> Option<u16> {
        match self {
            Self::Mx { priority, .. } => Some(*priority),
            _ => None,
        }
    }
}

impl fmt::Display for RecordData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let values = self.argument_values();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(value)?;
        }
        Ok(())
    }
}

/// Wraps `text` in double quotes unless it is already quoted. TXT
/// values are stored as submitted, so both forms occur.
fn ensure_quoted(text: &str) -> String {
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        text.to_owned()
    } else {
        format!("{:?}", text)
    }
}

////////////////////////////////////////////////////////////////////////
// ZONE-FILE ORDERING                                                 //
////////////////////////////////////////////////////////////////////////

/// The sort key that fixes the order of records inside a generated
/// zone file.
///
/// The category rank puts the SOA first, then NS, MX, A, AAAA, CNAME
/// and PTR records, then everything else. MX records order by priority
/// within their category. The remaining components order records of
/// equal category lexically by target, then type name, then argument
/// values, which pins down a unique order for any record multiset.
#[derive(Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub struct ZoneSortKey {
    rank: u8,
    mx_priority: u16,
    target: String,
    type_name: &'static str,
    arguments: Vec<String>,
}

/// Computes the [`ZoneSortKey`] for a record with the given target.
pub fn zone_sort_key(target: &str, data: &RecordData) -> ZoneSortKey {
    ZoneSortKey {
        rank: data.record_type().category_rank(),
        mx_priority: data.mx_priority().unwrap_or(0),
        target: target.to_owned(),
        type_name: data.record_type().as_str(),
        arguments: data.argument_values(),
    }
}

/// Compares two records by their zone-file order.
pub fn compare_zone_records(a: (&str, &RecordData), b: (&str, &RecordData)) -> Ordering {
    zone_sort_key(a.0, a.1).cmp(&zone_sort_key(b.0, b.1))
}
