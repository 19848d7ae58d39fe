//! Command-line interface for alignscan
//!
//! With no subcommand the scan options are parsed at the top level, so
//! `alignscan -a disk.img` and `alignscan scan -a disk.img` are the same.

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use std::ffi::OsString;

pub mod commands;
mod output;

pub use output::Output;

use commands::config::ConfigArgs;
use commands::scan::ScanArgs;
use commands::version::VersionArgs;

/// Check alignment of virtual machine partitions
#[derive(Parser, Debug)]
#[command(
    name = "alignscan",
    version = env!("CARGO_PKG_VERSION"),
    about = "Check alignment of virtual machine partitions",
    long_about = "alignscan reads the partition tables of virtual machine disks and reports \
                  partitions whose start offset is not aligned to 4K or 64K. Without -a or -d \
                  every domain in the inventory is scanned, several at a time.\n\n\
                  Exit status: 0 all partitions 64K aligned, 1 error, \
                  2 some partition below 64K alignment, 3 some partition below 1K alignment.",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub scan: ScanArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan partitions for alignment (the default)
    Scan(ScanArgs),
    /// Configuration management
    Config(ConfigArgs),
    /// Show version information
    Version(VersionArgs),
}

impl Cli {
    /// Parse the process arguments, exiting with clap's message on error.
    ///
    /// Usage errors exit 1; 2 and 3 are reserved for alignment results.
    pub fn parse_args() -> Self {
        Self::try_parse_args_from(std::env::args_os()).unwrap_or_else(|e| {
            if e.use_stderr() {
                let _ = e.print();
                std::process::exit(1);
            }
            e.exit()
        })
    }

    /// Parse like [`Parser::try_parse_from`], also resolving which
    /// `--format`/`--blocksize` each `-a` image falls under.
    pub fn try_parse_args_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut command = Self::command();
        let matches = command.try_get_matches_from_mut(args)?;
        let mut cli = Self::from_arg_matches(&matches)?;

        let scoped = match (&mut cli.command, matches.subcommand()) {
            (Some(Commands::Scan(scan)), Some((_, sub))) => scan.scope_images(sub),
            (None, _) => cli.scan.scope_images(&matches),
            _ => Ok(()),
        };
        scoped.map_err(|message| command.error(ErrorKind::ArgumentConflict, message))?;
        Ok(cli)
    }

    /// Execute the CLI command, returning the process exit code
    pub fn run(self) -> Result<u8> {
        match self.command {
            Some(Commands::Scan(args)) => commands::scan::execute(args),
            Some(Commands::Config(args)) => commands::config::execute(args).map(|_| 0),
            Some(Commands::Version(args)) => commands::version::execute(args).map(|_| 0),
            None => commands::scan::execute(self.scan),
        }
    }
}

/// Install the tracing subscriber.
///
/// Logs go to stderr; stdout carries only the report. `RUST_LOG` takes
/// precedence over the flags.
pub(crate) fn setup_logging(verbose: u8, trace_calls: bool, quiet: bool) {
    let mut directives = match (quiet, verbose) {
        (true, _) => "error".to_string(),
        (false, 0) => "warn".to_string(),
        (false, 1) => "info".to_string(),
        (false, _) => "debug".to_string(),
    };
    if trace_calls {
        directives.push_str(",alignscan::inspect=trace");
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives));

    // A second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
