//! # stratum-cli
//!
//! Command-line interface for the Stratum package index dumper.
//!
//! ## Commands
//!
//! - `stratum dump [--force]` - Dump stale packages and republish the index
//! - `stratum gc` - Garbage-collect unreferenced shard files
//!
//! ## Configuration
//!
//! Settings come from flags or environment variables:
//!
//! - `STRATUM_INDEX_ROOT` - Directory of the published index
//! - `STRATUM_CATALOG` - Path of the catalog file
//! - `STRATUM_DEPLOY_GATE` - Deploy gate marker path
//!   (default: `<index root>/deploy.globallock`)

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod catalog_file;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use stratum_core::LogFormat;
use stratum_index::coordinator::RunMode;

/// Stratum - package repository index dumper.
#[derive(Debug, Parser)]
#[command(name = "stratum")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory of the published index.
    #[arg(long, env = "STRATUM_INDEX_ROOT")]
    pub index_root: PathBuf,

    /// Path of the catalog file.
    #[arg(long, env = "STRATUM_CATALOG")]
    pub catalog: PathBuf,

    /// Deploy gate marker path. Defaults to `deploy.globallock` inside the
    /// index root.
    #[arg(long, env = "STRATUM_DEPLOY_GATE")]
    pub deploy_gate: Option<PathBuf>,

    /// Retain the newest N generation manifests during collection.
    #[arg(long, default_value_t = 10)]
    pub keep_generations: u32,

    /// Minimum artifact age in hours before collection may delete it.
    #[arg(long, default_value_t = 24)]
    pub delay_hours: u32,

    /// Log output format.
    #[arg(long, default_value = "pretty")]
    pub log_format: LogFormatArg,

    /// Emit diagnostic output for skips and per-package progress.
    #[arg(short, long)]
    pub verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// The effective deploy gate marker path.
    #[must_use]
    pub fn deploy_gate_path(&self) -> PathBuf {
        self.deploy_gate
            .clone()
            .unwrap_or_else(|| self.index_root.join("deploy.globallock"))
    }

    /// The run mode requested by the subcommand.
    #[must_use]
    pub const fn run_mode(&self) -> RunMode {
        match self.command {
            Commands::Dump { force } => RunMode::Dump { force },
            Commands::Gc => RunMode::Gc,
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Dump stale packages into the index and republish.
    Dump {
        /// Force a dump of all active packages.
        #[arg(long)]
        force: bool,
    },
    /// Run garbage collection of old files.
    Gc,
}

/// Log format flag.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum LogFormatArg {
    /// Pretty-printed logs.
    #[default]
    Pretty,
    /// JSON structured logs.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}
