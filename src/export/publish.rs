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

//! Distribution of generated trees to their servers.
//!
//! Each server is handled by one worker on a bounded [`ThreadPool`].
//! A worker probes the server over SSH, captures the running BIND
//! version, verifies the remote directories, rsyncs the tree, and
//! finally reloads BIND through rndc. The first step that fails stops
//! the worker; the failure is recorded against that server alone and
//! the remaining servers carry on.
//!
//! SSH, rsync, and rndc are external programs, not reimplemented
//! protocols. They are expected on the PATH.

use std::mem;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;

use crate::store::tables::DnsServer;
use crate::thread::{self, ThreadGroup, ThreadPool};

use super::exec;
use super::ExportContext;

////////////////////////////////////////////////////////////////////////
// PARAMETERS AND OUTCOMES                                            //
////////////////////////////////////////////////////////////////////////

/// Credential material for reaching the servers.
#[derive(Clone, Debug)]
pub struct PublishParams {
    /// The SSH identity (private key) file.
    pub ssh_id: PathBuf,

    /// The rndc shared-key file.
    pub rndc_key: PathBuf,

    /// The rndc configuration file.
    pub rndc_conf: PathBuf,
}

/// What one server's worker came back with.
#[derive(Clone, Debug)]
pub struct PublishOutcome {
    pub server: String,

    /// The version string reported by `named -v`, when the worker got
    /// far enough to ask.
    pub bind_version: Option<String>,

    pub failure: Option<PublishFailure>,
}

/// The step at which a worker gave up on its server, and why.
#[derive(Clone, Debug)]
pub struct PublishFailure {
    pub step: &'static str,
    pub message: String,
}

////////////////////////////////////////////////////////////////////////
// DISTRIBUTION                                                       //
////////////////////////////////////////////////////////////////////////

/// Publishes each tree to its server, in parallel up to
/// `ctx.max_threads` workers. The returned outcomes are sorted by
/// server name; each carries its own failure, if any, so one bad
/// server does not fail the call.
pub fn distribute(
    ctx: &ExportContext,
    params: &PublishParams,
    targets: Vec<(DnsServer, PathBuf)>,
) -> Result<Vec<PublishOutcome>, thread::Error> {
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let worker = Arc::new(Worker {
        params: params.clone(),
        named_dir: ctx.named_dir.clone(),
        probe_timeout: ctx.probe_timeout,
        rsync_timeout: ctx.rsync_timeout,
        reload_timeout: ctx.reload_timeout,
    });
    let outcomes = Arc::new(Mutex::new(Vec::with_capacity(targets.len())));

    let group = ThreadGroup::new();
    let pool = group.start_pool(
        Some("distribution pool".to_owned()),
        targets.len().min(ctx.max_threads).max(1),
    )?;
    let result = submit_all(&pool, &worker, &outcomes, targets);
    pool.shut_down();
    group.shut_down();
    group.await_shutdown();
    result?;

    let mut outcomes = mem::take(&mut *outcomes.lock().unwrap());
    outcomes.sort_by(|a, b| a.server.cmp(&b.server));
    Ok(outcomes)
}

fn submit_all(
    pool: &Arc<ThreadPool>,
    worker: &Arc<Worker>,
    outcomes: &Arc<Mutex<Vec<PublishOutcome>>>,
    targets: Vec<(DnsServer, PathBuf)>,
) -> Result<(), thread::Error> {
    for (server, directory) in targets {
        let worker = worker.clone();
        let outcomes = outcomes.clone();
        pool.submit(move || {
            let outcome = worker.publish(&server, &directory);
            outcomes.lock().unwrap().push(outcome);
        })?;
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// PER-SERVER WORK                                                    //
////////////////////////////////////////////////////////////////////////

struct Worker {
    params: PublishParams,
    named_dir: String,
    probe_timeout: Duration,
    rsync_timeout: Duration,
    reload_timeout: Duration,
}

impl Worker {
    fn publish(&self, server: &DnsServer, directory: &Path) -> PublishOutcome {
        let mut outcome = PublishOutcome {
            server: server.name.clone(),
            bind_version: None,
            failure: None,
        };
        outcome.failure = self
            .steps(server, directory, &mut outcome.bind_version)
            .err();
        if outcome.failure.is_none() {
            info!("published tree to {}", server.name);
        }
        outcome
    }

    fn steps(
        &self,
        server: &DnsServer,
        directory: &Path,
        bind_version: &mut Option<String>,
    ) -> Result<(), PublishFailure> {
        let probe = run_step("probe", self.ssh(server, &["echo", "test"]), self.probe_timeout)?;
        if probe.stdout.trim() != "test" {
            return Err(PublishFailure {
                step: "probe",
                message: format!("unexpected probe reply {:?}", probe.stdout.trim()),
            });
        }

        let named = run_step("version", self.ssh(server, &["named", "-v"]), self.probe_timeout)?;
        *bind_version = Some(named.stdout.trim().to_owned());

        run_step(
            "remote directories",
            self.ssh(server, &remote_dir_test(server)),
            self.probe_timeout,
        )
        .map_err(|mut failure| {
            if failure.message.starts_with("exited") {
                failure.message =
                    "remote BIND or test directory is missing or not writable".to_owned();
            }
            failure
        })?;

        run_step("rsync", self.rsync(server, directory), self.rsync_timeout)?;
        run_step("reload", self.rndc_reload(server), self.reload_timeout)?;
        Ok(())
    }

    fn ssh(&self, server: &DnsServer, remote_command: &[&str]) -> Command {
        let mut command = Command::new("ssh");
        command
            .arg("-i")
            .arg(&self.params.ssh_id)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(format!("{}@{}", server.ssh_user, server.name))
            .args(remote_command);
        command
    }

    fn rsync(&self, server: &DnsServer, directory: &Path) -> Command {
        let mut command = Command::new("rsync");
        command
            .current_dir(directory)
            .arg("-az")
            .arg("-e")
            .arg(format!("ssh -i {} -o BatchMode=yes", self.params.ssh_id.display()));
        for name in ["named.conf.a", "named.conf.b"] {
            if directory.join(name).is_file() {
                command.arg(name);
            }
        }
        let info = format!("{}.info", server.name);
        if directory.join(&info).is_file() {
            command.arg(info);
        }
        // The trailing slash makes rsync ship the directory's contents,
        // landing zone files where the conf's relative file clauses
        // expect them.
        command.arg(format!("{}/", self.named_dir));
        command.arg(format!(
            "{}@{}:{}/",
            server.ssh_user, server.name, server.remote_bind_dir
        ));
        command
    }

    fn rndc_reload(&self, server: &DnsServer) -> Command {
        let mut command = Command::new("rndc");
        command
            .arg("-c")
            .arg(&self.params.rndc_conf)
            .arg("-k")
            .arg(&self.params.rndc_key)
            .arg("-s")
            .arg(&server.name)
            .arg("reload");
        command
    }
}

/// The `test` expression run on the server to verify that both remote
/// directories exist and are writable by the SSH user.
fn remote_dir_test(server: &DnsServer) -> Vec<&str> {
    let mut words = vec!["test"];
    for dir in [&server.remote_bind_dir, &server.remote_test_dir] {
        if words.len() > 1 {
            words.push("-a");
        }
        words.push("-d");
        words.push(dir);
        words.push("-a");
        words.push("-w");
        words.push(dir);
    }
    words
}

fn run_step(
    step: &'static str,
    command: Command,
    timeout: Duration,
) -> Result<exec::Execution, PublishFailure> {
    match exec::run(command, timeout) {
        Ok(execution) if execution.success() => Ok(execution),
        Ok(execution) => Err(PublishFailure {
            step,
            message: execution.describe_failure(),
        }),
        Err(err) => Err(PublishFailure {
            step,
            message: format!("failed to run command: {}", err),
        }),
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
