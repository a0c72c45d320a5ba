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

//! Implements command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// The default configuration file, used when `--config-file` is not
/// given.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/conifer/conifer.toml";

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The Conifer DNS management tool
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Export the BIND configuration trees
    TreeExport(TreeExportArgs),

    /// Rebuild the database from a dump plus the audit log
    Recover(RecoverArgs),

    /// Validate the trees of a prior export package
    CheckConfig(CheckConfigArgs),

    /// Distribute the trees of a prior export package
    ConfigSync(ConfigSyncArgs),
}

#[derive(Debug, Parser)]
pub struct TreeExportArgs {
    /// Set the configuration file to use
    #[clap(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,

    /// Export even if nothing changed since the last run
    #[clap(long)]
    pub force: bool,
}

#[derive(Debug, Parser)]
pub struct RecoverArgs {
    /// Set the configuration file to use
    #[clap(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,

    /// The audit id to recover the database to
    #[clap(long, value_name = "ID")]
    pub audit_id: u64,
}

#[derive(Debug, Parser)]
pub struct CheckConfigArgs {
    /// Set the configuration file to use
    #[clap(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,

    /// The audit id of the export package to check
    #[clap(long, value_name = "ID")]
    pub audit_id: u64,
}

#[derive(Debug, Parser)]
pub struct ConfigSyncArgs {
    /// Set the configuration file to use
    #[clap(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,

    /// The audit id of the export package to distribute
    #[clap(long, value_name = "ID")]
    pub audit_id: u64,

    /// The SSH identity file for reaching the servers
    #[clap(long, value_name = "FILE")]
    pub ssh_id: PathBuf,

    /// The rndc shared-key file
    #[clap(long, value_name = "FILE")]
    pub rndc_key: PathBuf,

    /// The rndc configuration file
    #[clap(long, value_name = "FILE")]
    pub rndc_conf: PathBuf,
}
