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

//! Zone-file rendering.

use crate::cook::CookedZone;

/// The first line of every generated file. Operators who edit past it
/// lose their work on the next export.
pub const GENERATED_HEADER: &str = "; autogenerated - do not edit";

/// Renders a cooked zone as master-file text: the generated-file
/// marker, the `$ORIGIN`, then one line per record.
///
/// Record lines are `<target> <ttl> in <type> <args>` with single
/// spaces throughout. The records are emitted in the order the cooker
/// left them in, which puts the SOA first.
pub fn zone_file(zone: &CookedZone) -> String {
    let mut out = String::new();
    out.push_str(GENERATED_HEADER);
    out.push('\n');
    out.push_str("$ORIGIN ");
    out.push_str(&zone.origin);
    out.push('\n');
    for record in &zone.records {
        let line = format!(
            "{} {} in {} {}",
            record.target,
            record.ttl,
            record.data.record_type(),
            record.data,
        );
        out.push_str(&line);
        out.push('\n');
    }
    out
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
