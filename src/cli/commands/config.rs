//! Configuration command implementations

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::AlignScanConfig;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the merged configuration from all layers
    Show {
        /// Use custom configuration file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = ShowFormat::Toml)]
        format: ShowFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShowFormat {
    Toml,
    Json,
}

/// Execute config commands
pub fn execute(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Show { config, format } => show(config, format),
    }
}

fn show(custom_config: Option<PathBuf>, format: ShowFormat) -> Result<()> {
    let config = AlignScanConfig::load(custom_config.as_deref(), None)?;
    let rendered = render(&config, format)?;
    print!("{rendered}");
    if !rendered.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn render(config: &AlignScanConfig, format: ShowFormat) -> Result<String> {
    match format {
        ShowFormat::Toml => config.to_toml(),
        ShowFormat::Json => config.to_json(),
    }
}
