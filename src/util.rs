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

//! Crate-private utilities.

/// A wrapper around [`str`] references whose [`PartialEq`] and [`Eq`]
/// implementations are ASCII-case-insensitive.
pub struct Caseless<'a>(pub &'a str);

impl PartialEq for Caseless<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(other.0)
    }
}

impl Eq for Caseless<'_> {}

/// Strips a single trailing dot from a fully qualified domain name.
/// This is how zone origins become the quoted names used in `zone`
/// stanzas.
pub fn trim_trailing_dot(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

/// Returns whether `name` is a fully qualified domain name in
/// presentation form (ending with a dot). The root name "." counts.
pub fn is_fqdn(name: &str) -> bool {
    name.ends_with('.')
}

/// The reserved view name that stands for "every view".
pub const ANY_VIEW: &str = "any";

/// The reserved ACL name that matches unconditionally. It has no
/// stored entries; BIND provides the matching builtin.
pub const ANY_ACL: &str = "any";

/// The suffix that legacy callers attach to view names when tagging
/// records and zone assignments with a dependency scope. Stored values
/// never carry it; it is stripped on input.
const DEPENDENCY_SUFFIX: &str = "_dep";

/// Normalises a view-dependency token: the reserved name `any` and
/// plain view names pass through, and the legacy `<view>_dep` form
/// loses its suffix.
pub fn normalize_view_dep(token: &str) -> &str {
    if token == ANY_VIEW {
        token
    } else {
        token.strip_suffix(DEPENDENCY_SUFFIX).unwrap_or(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_trailing_dot_works() {
        assert_eq!(trim_trailing_dot("example.lcl."), "example.lcl");
        assert_eq!(trim_trailing_dot("example.lcl"), "example.lcl");
    }

    #[test]
    fn fqdns_end_with_a_dot() {
        assert!(is_fqdn("example.lcl."));
        assert!(is_fqdn("."));
        assert!(!is_fqdn("example.lcl"));
        assert!(!is_fqdn(""));
    }

    #[test]
    fn normalize_view_dep_strips_the_legacy_suffix() {
        assert_eq!(normalize_view_dep("internal_dep"), "internal");
        assert_eq!(normalize_view_dep("internal"), "internal");
        assert_eq!(normalize_view_dep("any"), "any");
    }
}
