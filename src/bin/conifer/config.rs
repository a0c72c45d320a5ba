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

//! Implements the configuration file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::Level::Debug;
use log::{debug, log_enabled};
use serde::Deserialize;

use conifer::export::{ExportContext, PublishParams};

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads the configuration from the file given by `path`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let raw_config = fs::read(path.as_ref()).context("failed to read the configuration file")?;
    let config: Config =
        toml::from_slice(&raw_config).context("failed to parse the configuration file")?;
    log_config_summary(&config);
    Ok(config)
}

/// Summarizes the configuration in the log, if the debug log level is
/// enabled.
fn log_config_summary(config: &Config) {
    if !log_enabled!(Debug) {
        // Don't compute the message if it will never be printed.
        return;
    }

    let validators = match (
        &config.exporter.checkzone_tool,
        &config.exporter.checkconf_tool,
    ) {
        (Some(_), Some(_)) => "zone and conf",
        (Some(_), None) => "zone only",
        (None, Some(_)) => "conf only",
        (None, None) => "none",
    };
    let distribution = if publish_params(&config.exporter).is_some() {
        "configured"
    } else {
        "disabled"
    };
    let tls = if config.server.ssl_cert_file.is_some() && config.server.ssl_key_file.is_some() {
        "configured"
    } else {
        "disabled"
    };

    debug!(
        "Configuration loaded:\n\
         Root config dir: {}\n\
         Backup dir:      {}\n\
         Database:        {}\n\
         Lock file:       {}\n\
         Validators:      {}\n\
         Distribution:    {}\n\
         API TLS:         {}",
        config.exporter.root_config_dir.display(),
        config.exporter.backup_dir.display(),
        config.database.path.display(),
        config.server.lock_file.display(),
        validators,
        distribution,
        tls,
    );
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub exporter: ExporterConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: EXPORTER                                    //
////////////////////////////////////////////////////////////////////////

/// The `[exporter]` section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    pub root_config_dir: PathBuf,
    pub backup_dir: PathBuf,

    /// The distribution worker bound; the number of CPUs if unset.
    pub max_threads: Option<usize>,

    #[serde(default = "default_named_dir")]
    pub named_dir: String,

    pub checkzone_tool: Option<String>,
    pub checkconf_tool: Option<String>,

    /// Distribution credentials. `tree-export` distributes only when
    /// all three are set.
    pub ssh_id: Option<PathBuf>,
    pub rndc_key: Option<PathBuf>,
    pub rndc_conf: Option<PathBuf>,

    /// Per-server timeouts, in seconds.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_rsync_timeout_secs")]
    pub rsync_timeout_secs: u64,
    #[serde(default = "default_reload_timeout_secs")]
    pub reload_timeout_secs: u64,
}

fn default_named_dir() -> String {
    "named".to_owned()
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_rsync_timeout_secs() -> u64 {
    60
}

fn default_reload_timeout_secs() -> u64 {
    30
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTIONS: DATABASE AND SERVER                        //
////////////////////////////////////////////////////////////////////////

/// The `[database]` section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

/// The `[server]` section. The TLS material is used by the management
/// API server and carried here so one file configures the whole
/// system; the command-line tools only use the lock file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub lock_file: PathBuf,
    pub ssl_cert_file: Option<PathBuf>,
    pub ssl_key_file: Option<PathBuf>,
}

////////////////////////////////////////////////////////////////////////
// EXPORT CONTEXT CONSTRUCTION                                        //
////////////////////////////////////////////////////////////////////////

/// The distribution credentials from the `[exporter]` section, if all
/// of them are present.
pub fn publish_params(exporter: &ExporterConfig) -> Option<PublishParams> {
    match (&exporter.ssh_id, &exporter.rndc_key, &exporter.rndc_conf) {
        (Some(ssh_id), Some(rndc_key), Some(rndc_conf)) => Some(PublishParams {
            ssh_id: ssh_id.clone(),
            rndc_key: rndc_key.clone(),
            rndc_conf: rndc_conf.clone(),
        }),
        _ => None,
    }
}

/// Builds an [`ExportContext`] from the configuration. Distribution
/// happens only if `publish` is given.
pub fn export_context(config: &Config, publish: Option<PublishParams>) -> ExportContext {
    let exporter = &config.exporter;
    let mut ctx = ExportContext::new(&exporter.root_config_dir, &exporter.backup_dir);
    ctx.named_dir = exporter.named_dir.clone();
    if let Some(max_threads) = exporter.max_threads {
        ctx.max_threads = max_threads.max(1);
    }
    ctx.checkzone_tool = exporter.checkzone_tool.clone();
    ctx.checkconf_tool = exporter.checkconf_tool.clone();
    ctx.publish = publish;
    ctx.probe_timeout = Duration::from_secs(exporter.probe_timeout_secs);
    ctx.rsync_timeout = Duration::from_secs(exporter.rsync_timeout_secs);
    ctx.reload_timeout = Duration::from_secs(exporter.reload_timeout_secs);
    ctx
}
