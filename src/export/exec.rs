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

//! Running external tools with a deadline.
//!
//! The export pipeline leans on external programs for everything it
//! does not want to reimplement: `named-checkzone` and
//! `named-checkconf` for validation, and `ssh`, `rsync`, and `rndc`
//! for distribution. The remote ones can hang indefinitely on a dead
//! host, so every invocation here carries an overall deadline; a
//! process still running at the deadline is killed.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

/// How often to poll a running child for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The collected result of one external command.
#[derive(Debug)]
pub struct Execution {
    /// The exit status, or `None` if the deadline expired and the
    /// process was killed.
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
}

impl Execution {
    pub fn success(&self) -> bool {
        matches!(self.status, Some(status) if status.success())
    }

    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }

    /// A one-line account of why the command did not succeed, with
    /// whatever the tool printed appended.
    pub fn describe_failure(&self) -> String {
        let reason = match self.status {
            None => "timed out".to_owned(),
            Some(status) => match status.code() {
                Some(code) => format!("exited with status {}", code),
                None => "was killed by a signal".to_owned(),
            },
        };
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        if detail.is_empty() {
            reason
        } else {
            format!("{}: {}", reason, detail)
        }
    }
}

/// Runs `command` to completion with an overall deadline, capturing
/// its output. Spawning failures (typically a missing binary) surface
/// as [`std::io::Error`].
pub fn run(mut command: Command, timeout: Duration) -> std::io::Result<Execution> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    debug!("running {:?} with a {:?} deadline", command, timeout);

    let mut child = command.spawn()?;
    let stdout = drain_in_background(child.stdout.take());
    let stderr = drain_in_background(child.stderr.take());
    let status = wait_with_deadline(&mut child, timeout)?;

    let execution = Execution {
        status,
        stdout: stdout.map_or_else(String::new, collect_drained),
        stderr: stderr.map_or_else(String::new, collect_drained),
    };
    if !execution.success() {
        debug!("{:?} {}", command, execution.describe_failure());
    }
    Ok(execution)
}

/// Polls the child until it exits or the deadline passes; in the
/// latter case the child is killed and reaped.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            // Kill errors mean the child exited in the meantime; the
            // wait below reaps it either way.
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Reads a captured pipe on its own thread. The pipes have to be
/// drained while we wait, or a chatty child blocks on a full pipe
/// buffer and never exits.
fn drain_in_background<S>(stream: Option<S>) -> Option<thread::JoinHandle<String>>
where
    S: Read + Send + 'static,
{
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut buffer = String::new();
            let _ = stream.read_to_string(&mut buffer);
            buffer
        })
    })
}

fn collect_drained(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
