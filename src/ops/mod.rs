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

//! The administrative write pipeline.
//!
//! Every mutation of the management tables — live API call or replayed
//! audit entry — goes through [`apply`]: the action is validated
//! against the current tables, applied on success, and recorded
//! through an [`AuditWriter`]. Rejected actions are recorded too, with
//! `success = false`, so the audit log is a complete journal of what
//! was attempted, while replay re-applies only what succeeded.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::records::args;
use crate::store::tables::{AuditLogEntry, Cidr};
use crate::store::Database;

pub mod action;
mod verbs;

pub use action::Action;

////////////////////////////////////////////////////////////////////////
// AUDIT WRITERS                                                      //
////////////////////////////////////////////////////////////////////////

/// The audit-log seam of the write pipeline.
///
/// The live API appends every produced entry; replay discards them,
/// since the entries being replayed are already in the log.
pub trait AuditWriter {
    fn append(&mut self, log: &mut Vec<AuditLogEntry>, entry: AuditLogEntry);
}

/// Appends every entry to the audit log.
pub struct LiveAudit;

impl AuditWriter for LiveAudit {
    fn append(&mut self, log: &mut Vec<AuditLogEntry>, entry: AuditLogEntry) {
        log.push(entry);
    }
}

/// Discards entries; used while replaying recorded actions.
pub struct SilentAudit;

impl AuditWriter for SilentAudit {
    fn append(&mut self, _log: &mut Vec<AuditLogEntry>, _entry: AuditLogEntry) {}
}

////////////////////////////////////////////////////////////////////////
// THE PIPELINE                                                       //
////////////////////////////////////////////////////////////////////////

/// Applies one administrative action to the database.
///
/// The action is audited through `audit` whether it succeeds or not;
/// the entry's id is the next dense audit id and its `success` flag
/// records the outcome. The tables are modified only on success.
pub fn apply(
    db: &mut Database,
    user: &str,
    timestamp: DateTime<Utc>,
    action: Action,
    audit: &mut dyn AuditWriter,
) -> Result<()> {
    let outcome = verbs::apply_action(&mut db.tables, &action, user, timestamp);
    let entry = AuditLogEntry {
        id: db.next_audit_id(),
        timestamp,
        user: user.to_owned(),
        action,
        success: outcome.is_ok(),
    };
    audit.append(&mut db.audit_log, entry);
    outcome
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

pub type Result<T> = std::result::Result<T, Error>;

/// The kinds of named entities the verbs operate on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntityKind {
    DnsServer,
    DnsServerSet,
    View,
    Acl,
    Zone,
    Record,
}

impl EntityKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::DnsServer => "DNS server",
            Self::DnsServerSet => "DNS server set",
            Self::View => "view",
            Self::Acl => "ACL",
            Self::Zone => "zone",
            Self::Record => "record",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced when an action is rejected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    Exists {
        kind: EntityKind,
        name: String,
    },
    NotFound {
        kind: EntityKind,
        name: String,
    },
    InUse {
        kind: EntityKind,
        name: String,
        detail: String,
    },
    InvalidName {
        kind: EntityKind,
        name: String,
    },
    InvalidOrigin(String),
    DuplicateAssignment(String),
    AssignmentNotFound(String),
    OverlappingReverseRange {
        cidr: Cidr,
        existing: Cidr,
        zone: String,
    },
    InvalidRecord(args::Error),
    RecordNotFound {
        zone: String,
        target: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Exists { kind, name } => write!(f, "{} {:?} already exists", kind, name),
            Self::NotFound { kind, name } => write!(f, "{} {:?} does not exist", kind, name),
            Self::InUse { kind, name, detail } => {
                write!(f, "{} {:?} is still referenced by {}", kind, name, detail)
            }
            Self::InvalidName { kind, name } => {
                write!(f, "{:?} is not a valid {} name", name, kind)
            }
            Self::InvalidOrigin(origin) => write!(
                f,
                "invalid zone origin {:?} (expected a fully qualified name)",
                origin,
            ),
            Self::DuplicateAssignment(detail) => f.write_str(detail),
            Self::AssignmentNotFound(detail) => f.write_str(detail),
            Self::OverlappingReverseRange {
                cidr,
                existing,
                zone,
            } => write!(
                f,
                "reverse range {} overlaps {} claimed by zone {:?}",
                cidr, existing, zone,
            ),
            Self::InvalidRecord(err) => write!(f, "invalid record: {}", err),
            Self::RecordNotFound { zone, target } => {
                write!(f, "no matching record {:?} in zone {:?}", target, zone)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidRecord(err) => Some(err),
            _ => None,
        }
    }
}

impl From<args::Error> for Error {
    fn from(err: args::Error) -> Self {
        Self::InvalidRecord(err)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::store::tables::ZoneType;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn rejected_actions_are_audited_as_failures() {
        let mut db = Database::default();
        let good = Action::MakeZone {
            name: "example.lcl".to_owned(),
            origin: "example.lcl.".to_owned(),
            zone_type: ZoneType::Master,
            options: String::new(),
        };
        let bad = Action::RemoveZone {
            name: "missing.lcl".to_owned(),
        };
        apply(&mut db, "admin", at(1), good, &mut LiveAudit).unwrap();
        apply(&mut db, "admin", at(2), bad, &mut LiveAudit).unwrap_err();

        assert_eq!(db.audit_log.len(), 2);
        assert_eq!(db.audit_log[0].id, 1);
        assert!(db.audit_log[0].success);
        assert_eq!(db.audit_log[1].id, 2);
        assert!(!db.audit_log[1].success);
        assert_eq!(db.audit_log[1].user, "admin");
        // The failed removal left the tables untouched.
        assert_eq!(db.tables.zones.len(), 1);
    }

    #[test]
    fn silent_audit_leaves_the_log_alone() {
        let mut db = Database::default();
        let action = Action::MakeDnsServerSet {
            name: "set1".to_owned(),
        };
        apply(&mut db, "admin", at(1), action, &mut SilentAudit).unwrap();
        assert!(db.audit_log.is_empty());
        assert_eq!(db.tables.dns_server_sets.len(), 1);
    }
}
