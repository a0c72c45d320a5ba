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

//! The per-run report.
//!
//! Failures during an export are mostly not fatal: a server set with a
//! structural problem is skipped, a server that fails its checks or
//! its distribution is skipped, and the run carries on. Everything
//! skipped lands here as a structured entry (phase, subject, message)
//! and is printed as one report at the end of the run. A run with any
//! failed entry exits non-zero.

use std::fmt;

/// A structured record of everything a run had to report.
#[derive(Clone, Debug, Default)]
pub struct Report {
    entries: Vec<Entry>,
}

/// One report line.
#[derive(Clone, Debug)]
pub struct Entry {
    pub phase: &'static str,
    /// The server or server set concerned, if the problem is not
    /// run-wide.
    pub subject: Option<String>,
    pub message: String,
    pub failed: bool,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure entry.
    pub fn failure(&mut self, phase: &'static str, subject: Option<&str>, message: String) {
        self.entries.push(Entry {
            phase,
            subject: subject.map(str::to_owned),
            message,
            failed: true,
        });
    }

    /// Records an informational entry.
    pub fn note(&mut self, phase: &'static str, subject: Option<&str>, message: String) {
        self.entries.push(Entry {
            phase,
            subject: subject.map(str::to_owned),
            message,
            failed: false,
        });
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry is a failure. This drives the process exit
    /// status.
    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|entry| entry.failed)
    }
}

impl fmt::Display for Report {
    /// Renders the report with one section per phase, in the order the
    /// phases first reported something.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut phases: Vec<&'static str> = Vec::new();
        for entry in &self.entries {
            if !phases.contains(&entry.phase) {
                phases.push(entry.phase);
            }
        }
        for (i, phase) in phases.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", phase)?;
            for entry in self.entries.iter().filter(|e| e.phase == *phase) {
                let marker = if entry.failed { "failed" } else { "note" };
                match &entry.subject {
                    Some(subject) => {
                        writeln!(f, "  {}: {}: {}", marker, subject, entry.message)?
                    }
                    None => writeln!(f, "  {}: {}", marker, entry.message)?,
                }
            }
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_group_by_phase() {
        let mut report = Report::new();
        report.failure("cook", Some("set1"), "missing SOA for zone broken.lcl".to_owned());
        report.note("publish", Some("ns1"), "BIND 9.18.19".to_owned());
        report.failure("publish", Some("ns2"), "ssh probe timed out".to_owned());

        assert!(report.has_failures());
        let rendered = report.to_string();
        let cook = rendered.find("[cook]").unwrap();
        let publish = rendered.find("[publish]").unwrap();
        assert!(cook < publish);
        assert!(rendered.contains("  failed: set1: missing SOA for zone broken.lcl"));
        assert!(rendered.contains("  note: ns1: BIND 9.18.19"));
        assert_eq!(rendered.matches("[publish]").count(), 1);
    }

    #[test]
    fn notes_alone_are_not_failures() {
        let mut report = Report::new();
        assert!(!report.has_failures());
        report.note("check", None, "no validators configured".to_owned());
        assert!(!report.has_failures());
        assert!(!report.is_empty());
    }
}
