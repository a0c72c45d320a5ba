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

//! The core of the Conifer DNS management system.
//!
//! Conifer keeps a relational model of name servers, views, zones,
//! ACLs, and records in a single-file store ([`store`]), changes it
//! only through audited administrative actions ([`ops`]), and exports
//! it as complete, installable BIND configuration trees ([`export`]):
//! snapshot, change detection, cooking, zone-file and named.conf
//! emission, validation, packaging, and distribution over SSH. The
//! audit log doubles as a recovery mechanism: a damaged database is
//! rebuilt from the newest dump plus a replay of the logged actions
//! ([`replay`]).

pub mod cook;
pub mod emit;
pub mod export;
pub mod isc;
pub mod lock;
pub mod ops;
pub mod records;
pub mod replay;
pub mod report;
pub mod store;
pub mod thread;
pub mod util;
