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

//! Per-type record argument definitions.
//!
//! Each record type declares an ordered list of named, typed arguments
//! ([`ArgumentDefinition`]). The table drives [`decode`], which turns
//! the flat `name → value` maps submitted through the write verbs into
//! typed [`RecordData`] values, and it fixes the serialisation order
//! used everywhere else.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use lazy_static::lazy_static;

use super::{RecordData, RecordType};

////////////////////////////////////////////////////////////////////////
// DEFINITIONS                                                        //
////////////////////////////////////////////////////////////////////////

/// The declared name and data type of one record argument.
#[derive(Clone, Copy, Debug)]
pub struct ArgumentDefinition {
    pub name: &'static str,
    pub kind: ArgumentKind,
}

/// The data types record arguments may take.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArgumentKind {
    /// A domain name in presentation form (relative or fully
    /// qualified).
    Hostname,
    /// Free-form text.
    Text,
    /// An unsigned 16-bit integer.
    U16,
    /// An unsigned 32-bit integer.
    U32,
    /// An IPv4 address in dotted-quad form.
    Ipv4,
    /// An IPv6 address.
    Ipv6,
}

const fn def(name: &'static str, kind: ArgumentKind) -> ArgumentDefinition {
    ArgumentDefinition { name, kind }
}

use ArgumentKind::{Hostname, Ipv4, Ipv6, Text, U16, U32};

const SOA_ARGS: &[ArgumentDefinition] = &[
    def("name_server", Hostname),
    def("admin_email", Hostname),
    def("serial_number", U32),
    def("refresh", U32),
    def("retry", U32),
    def("expiry", U32),
    def("minimum", U32),
];
const NS_ARGS: &[ArgumentDefinition] = &[def("name_server", Hostname)];
const MX_ARGS: &[ArgumentDefinition] = &[def("priority", U16), def("mail_server", Hostname)];
const A_ARGS: &[ArgumentDefinition] = &[def("ip", Ipv4)];
const AAAA_ARGS: &[ArgumentDefinition] = &[def("ip", Ipv6)];
const CNAME_ARGS: &[ArgumentDefinition] = &[def("host", Hostname)];
const PTR_ARGS: &[ArgumentDefinition] = &[def("host", Hostname)];
const HINFO_ARGS: &[ArgumentDefinition] = &[def("hardware", Text), def("os", Text)];
const SRV_ARGS: &[ArgumentDefinition] = &[
    def("priority", U16),
    def("weight", U16),
    def("port", U16),
    def("target", Hostname),
];
const TXT_ARGS: &[ArgumentDefinition] = &[def("quoted_text", Text)];

lazy_static! {
    /// The argument-definition table, keyed by record type.
    static ref DEFINITIONS: HashMap<RecordType, &'static [ArgumentDefinition]> = {
        let mut table = HashMap::new();
        table.insert(RecordType::Soa, SOA_ARGS);
        table.insert(RecordType::Ns, NS_ARGS);
        table.insert(RecordType::Mx, MX_ARGS);
        table.insert(RecordType::A, A_ARGS);
        table.insert(RecordType::Aaaa, AAAA_ARGS);
        table.insert(RecordType::Cname, CNAME_ARGS);
        table.insert(RecordType::Ptr, PTR_ARGS);
        table.insert(RecordType::Hinfo, HINFO_ARGS);
        table.insert(RecordType::Srv, SRV_ARGS);
        table.insert(RecordType::Txt, TXT_ARGS);
        table
    };
}

/// Returns the ordered argument definitions for `record_type`.
pub fn definitions(record_type: RecordType) -> &'static [ArgumentDefinition] {
    DEFINITIONS
        .get(&record_type)
        .copied()
        .unwrap_or_else(|| unreachable!("record type without argument definitions"))
}

////////////////////////////////////////////////////////////////////////
// DECODING                                                           //
////////////////////////////////////////////////////////////////////////

/// An argument value parsed according to its [`ArgumentKind`].
enum Parsed {
    Text(String),
    U16(u16),
    U32(u32),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
}

impl ArgumentKind {
    fn parse(self, name: &'static str, raw: &str) -> Result<Parsed, Error> {
        let invalid = |reason: &str| Error::InvalidArgument {
            name,
            reason: reason.to_owned(),
        };
        match self {
            Self::Hostname => {
                if raw.is_empty() {
                    Err(invalid("hostname is empty"))
                } else if raw.chars().any(|c| c.is_ascii_whitespace()) {
                    Err(invalid("hostname contains whitespace"))
                } else {
                    Ok(Parsed::Text(raw.to_owned()))
                }
            }
            Self::Text => {
                if raw.is_empty() {
                    Err(invalid("value is empty"))
                } else {
                    Ok(Parsed::Text(raw.to_owned()))
                }
            }
            Self::U16 => raw
                .parse()
                .map(Parsed::U16)
                .map_err(|_| invalid("expected an unsigned 16-bit integer")),
            Self::U32 => raw
                .parse()
                .map(Parsed::U32)
                .map_err(|_| invalid("expected an unsigned 32-bit integer")),
            Self::Ipv4 => raw
                .parse()
                .map(Parsed::Ipv4)
                .map_err(|_| invalid("expected an IPv4 address")),
            Self::Ipv6 => raw
                .parse()
                .map(Parsed::Ipv6)
                .map_err(|_| invalid("expected an IPv6 address")),
        }
    }
}

impl Parsed {
    fn text(self) -> String {
        match self {
            Self::Text(value) => value,
            _ => unreachable!("argument kind mismatch"),
        }
    }

    fn u16(self) -> u16 {
        match self {
            Self::U16(value) => value,
            _ => unreachable!("argument kind mismatch"),
        }
    }

    fn u32(self) -> u32 {
        match self {
            Self::U32(value) => value,
            _ => unreachable!("argument kind mismatch"),
        }
    }

    fn ipv4(self) -> Ipv4Addr {
        match self {
            Self::Ipv4(value) => value,
            _ => unreachable!("argument kind mismatch"),
        }
    }

    fn ipv6(self) -> Ipv6Addr {
        match self {
            Self::Ipv6(value) => value,
            _ => unreachable!("argument kind mismatch"),
        }
    }
}

/// Decodes a flat argument map into typed [`RecordData`], checking the
/// submitted names and values against the definitions for
/// `record_type`. Every declared argument is required; arguments not
/// declared for the type are rejected.
pub fn decode(
    record_type: RecordType,
    arguments: &BTreeMap<String, String>,
) -> Result<RecordData, Error> {
    let defs = definitions(record_type);
    for name in arguments.keys() {
        if !defs.iter().any(|d| d.name == name) {
            return Err(Error::UnexpectedArgument {
                record_type,
                name: name.clone(),
            });
        }
    }

    let mut parsed = Vec::with_capacity(defs.len());
    for def in defs {
        let raw = arguments.get(def.name).ok_or(Error::MissingArgument {
            record_type,
            name: def.name,
        })?;
        parsed.push(def.kind.parse(def.name, raw)?);
    }
    let mut values = parsed.into_iter();
    let mut next = || values.next().unwrap_or_else(|| unreachable!());

    Ok(match record_type {
        RecordType::Soa => RecordData::Soa {
            name_server: next().text(),
            admin_email: next().text(),
            serial_number: next().u32(),
            refresh: next().u32(),
            retry: next().u32(),
            expiry: next().u32(),
            minimum: next().u32(),
        },
        RecordType::Ns => RecordData::Ns {
            name_server: next().text(),
        },
        RecordType::Mx => RecordData::Mx {
            priority: next().u16(),
            mail_server: next().text(),
        },
        RecordType::A => RecordData::A { ip: next().ipv4() },
        RecordType::Aaaa => RecordData::Aaaa { ip: next().ipv6() },
        RecordType::Cname => RecordData::Cname { host: next().text() },
        RecordType::Ptr => RecordData::Ptr { host: next().text() },
        RecordType::Hinfo => RecordData::Hinfo {
            hardware: next().text(),
            os: next().text(),
        },
        RecordType::Srv => RecordData::Srv {
            priority: next().u16(),
            weight: next().u16(),
            port: next().u16(),
            target: next().text(),
        },
        RecordType::Txt => RecordData::Txt {
            quoted_text: next().text(),
        },
    })
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors produced when decoding a flat argument map.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    MissingArgument {
        record_type: RecordType,
        name: &'static str,
    },
    UnexpectedArgument {
        record_type: RecordType,
        name: String,
    },
    InvalidArgument {
        name: &'static str,
        reason: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MissingArgument { record_type, name } => {
                write!(f, "{} records require the argument {:?}", record_type, name)
            }
            Self::UnexpectedArgument { record_type, name } => {
                write!(f, "{} records have no argument {:?}", record_type, name)
            }
            Self::InvalidArgument { name, reason } => {
                write!(f, "invalid value for argument {:?}: {}", name, reason)
            }
        }
    }
}

impl std::error::Error for Error {}
