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

//! Implements the tool's commands.

use std::env;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use env_logger::Env;
use log::{debug, error, info, warn};
use signal_hook::consts::signal::{SIGINT, SIGTERM};

use conifer::export::{self, ExportContext, Outcome, Phase, PublishParams};
use conifer::lock::LockFile;
use conifer::replay;
use conifer::store::Store;

use crate::args::{Args, CheckConfigArgs, Command, ConfigSyncArgs, RecoverArgs, TreeExportArgs};
use crate::config::{self, Config};

/// The exit code of a `tree-export` run that found nothing to export.
const EXIT_NO_CHANGES: i32 = 2;

/// Runs the selected command and exits the process.
pub fn run(args: Args) {
    env_logger::init_from_env(Env::new().default_filter_or("warn"));

    match try_running(args) {
        Ok(code) => {
            if code == 0 {
                info!("Exiting with success.");
            }
            process::exit(code);
        }
        Err(e) => {
            let mut message = String::from("Failed to run:");
            for (i, cause) in e.chain().enumerate() {
                write!(message, "\n[{}] {}", i + 1, cause).unwrap();
            }
            message.push_str("\nExiting with failure.");
            error!("{}", message);
            process::exit(1);
        }
    }
}

fn try_running(args: Args) -> Result<i32> {
    info!(
        "Conifer v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );
    match args.command {
        Command::TreeExport(args) => tree_export(args),
        Command::Recover(args) => recover(args),
        Command::CheckConfig(args) => check_config(args),
        Command::ConfigSync(args) => config_sync(args),
    }
}

////////////////////////////////////////////////////////////////////////
// THE TREE-EXPORT COMMAND                                            //
////////////////////////////////////////////////////////////////////////

fn tree_export(args: TreeExportArgs) -> Result<i32> {
    debug!("entering the {} phase", Phase::Init);
    let (config, store) = open(&args.config_file)?;

    debug!("entering the {} phase", Phase::LockAcquired);
    let _lock = LockFile::acquire(&config.server.lock_file)
        .context("failed to acquire the export lock")?;
    let cancel = set_up_cancellation().context("failed to set up signal handling")?;

    let ctx = config::export_context(&config, config::publish_params(&config.exporter));
    match export::run(&ctx, &store, args.force, &cancel) {
        Ok(Outcome::NoChanges { audit_id }) => {
            info!("No changes since audit id {}; nothing to export.", audit_id);
            Ok(EXIT_NO_CHANGES)
        }
        Ok(Outcome::Exported {
            audit_id,
            package,
            report,
        }) => {
            info!(
                "Exported audit id {}; the package is at {}.",
                audit_id,
                package.display(),
            );
            if report.has_failures() {
                error!("The export finished with failures:\n{}", report);
                Ok(1)
            } else {
                if !report.is_empty() {
                    info!("Export notes:\n{}", report);
                }
                Ok(0)
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Sets up SIGINT/SIGTERM handling for an export. The first signal
/// raises the cancellation flag, stopping the run at the next phase
/// boundary; a second one exits immediately.
fn set_up_cancellation() -> Result<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    for sig in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(sig, 1, cancel.clone())?;
        signal_hook::flag::register(sig, cancel.clone())?;
    }
    Ok(cancel)
}

////////////////////////////////////////////////////////////////////////
// THE RECOVER COMMAND                                                //
////////////////////////////////////////////////////////////////////////

fn recover(args: RecoverArgs) -> Result<i32> {
    let (config, store) = open(&args.config_file)?;
    let _lock = LockFile::acquire(&config.server.lock_file)
        .context("failed to acquire the export lock")?;

    let outcome = replay::recover(&store, &config.exporter.backup_dir, args.audit_id)
        .context("failed to recover the database")?;
    info!(
        "Recovered to audit id {}: started from the full dump at id {} and replayed {} entries.",
        outcome.target, outcome.dump_id, outcome.applied,
    );
    Ok(0)
}

////////////////////////////////////////////////////////////////////////
// THE CHECK-CONFIG COMMAND                                           //
////////////////////////////////////////////////////////////////////////

fn check_config(args: CheckConfigArgs) -> Result<i32> {
    info!(
        "Loading the configuration from {}.",
        args.config_file.display(),
    );
    let config = config::load_from_path(&args.config_file)
        .context("failed to load the configuration")?;
    let ctx = config::export_context(&config, None);
    if ctx.checkzone_tool.is_none() && ctx.checkconf_tool.is_none() {
        bail!("no validator tools are configured");
    }

    let package = find_package(&config, args.audit_id)?;
    let scratch = scratch_dir("conifer-check");
    let result = check_package(&ctx, &package, &scratch);
    remove_scratch(&scratch);
    result
}

fn check_package(ctx: &ExportContext, package: &Path, scratch: &Path) -> Result<i32> {
    let servers =
        export::unpack_run(package, scratch).context("failed to unpack the export package")?;
    info!(
        "Checking {} server trees from {}.",
        servers.len(),
        package.display(),
    );

    let mut failed = false;
    for (server, directory) in &servers {
        let failures = export::check_unpacked(ctx, server, directory);
        if failures.is_empty() {
            info!("{}: OK.", server);
        } else {
            failed = true;
            for failure in failures {
                error!(
                    "{}: {}: {}",
                    failure.server,
                    failure.file.display(),
                    failure.message,
                );
            }
        }
    }
    Ok(if failed { 1 } else { 0 })
}

////////////////////////////////////////////////////////////////////////
// THE CONFIG-SYNC COMMAND                                            //
////////////////////////////////////////////////////////////////////////

fn config_sync(args: ConfigSyncArgs) -> Result<i32> {
    let (config, store) = open(&args.config_file)?;
    let _lock = LockFile::acquire(&config.server.lock_file)
        .context("failed to acquire the export lock")?;

    let params = PublishParams {
        ssh_id: args.ssh_id,
        rndc_key: args.rndc_key,
        rndc_conf: args.rndc_conf,
    };
    let ctx = config::export_context(&config, None);
    let package = find_package(&config, args.audit_id)?;
    let scratch = scratch_dir("conifer-sync");
    let result = sync_package(&ctx, &params, &store, &package, &scratch);
    remove_scratch(&scratch);
    result
}

fn sync_package(
    ctx: &ExportContext,
    params: &PublishParams,
    store: &Store,
    package: &Path,
    scratch: &Path,
) -> Result<i32> {
    let unpacked =
        export::unpack_run(package, scratch).context("failed to unpack the export package")?;
    let database = store.database();
    let mut targets = Vec::new();
    for (server, directory) in unpacked {
        match database.tables.dns_server(&server) {
            Some(row) => targets.push((row.clone(), directory)),
            None => warn!("Server {} is no longer in the database; skipping it.", server),
        }
    }

    let outcomes = export::distribute(ctx, params, targets)
        .context("failed to run the distribution workers")?;
    let mut failed = false;
    for outcome in &outcomes {
        if let Some(version) = &outcome.bind_version {
            info!("{} is running {}.", outcome.server, version);
        }
        match &outcome.failure {
            Some(failure) => {
                failed = true;
                error!(
                    "{}: {} failed: {}",
                    outcome.server, failure.step, failure.message,
                );
            }
            None => info!("{}: synchronized.", outcome.server),
        }
    }
    Ok(if failed { 1 } else { 0 })
}

////////////////////////////////////////////////////////////////////////
// SHARED PLUMBING                                                    //
////////////////////////////////////////////////////////////////////////

fn open(config_file: &Path) -> Result<(Config, Store)> {
    info!("Loading the configuration from {}.", config_file.display());
    let config =
        config::load_from_path(config_file).context("failed to load the configuration")?;
    let store = Store::open(&config.database.path).context("failed to open the database")?;
    Ok((config, store))
}

fn find_package(config: &Config, audit_id: u64) -> Result<PathBuf> {
    export::find_tree_file(&config.exporter.backup_dir, audit_id)
        .context("failed to search the backup directory")?
        .ok_or_else(|| anyhow!("no export package for audit id {}", audit_id))
}

/// A per-process scratch directory under the system temporary
/// directory.
fn scratch_dir(prefix: &str) -> PathBuf {
    env::temp_dir().join(format!("{}-{}", prefix, process::id()))
}

fn remove_scratch(scratch: &Path) {
    if !scratch.exists() {
        return;
    }
    if let Err(err) = fs::remove_dir_all(scratch) {
        warn!(
            "Failed to remove the scratch directory {}: {}.",
            scratch.display(),
            err,
        );
    }
}
