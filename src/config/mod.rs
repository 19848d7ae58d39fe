//! Configuration management for alignscan
//!
//! Settings are layered with figment, lowest priority first:
//!
//! 1. Embedded `default-config.toml`
//! 2. User config: `~/.config/alignscan/config.{toml,json,yaml,yml}`
//! 3. Project config: `./alignscan.{toml,json,yaml,yml}`
//! 4. `--config FILE` (replaces 2 and 3 when given)
//! 5. Environment: `ALIGNSCAN_` prefix, `__` between sections
//!    (`ALIGNSCAN_PARALLEL__MAX_THREADS=4`)
//! 6. Command-line overrides

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

const ENV_PREFIX: &str = "ALIGNSCAN_";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignScanConfig {
    /// Domain inventory used when scanning every guest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect: Option<String>,

    pub parallel: ParallelConfig,

    pub exit: ExitConfig,

    pub report: ReportConfig,
}

/// Worker thread sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Maximum number of worker threads (0 = no limit)
    pub max_threads: usize,
    /// Percentage of CPU cores to use (1-100)
    pub thread_percentage: u8,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_threads: 0,
            thread_percentage: 100,
        }
    }
}

/// Exit status thresholds, on the worst alignment exponent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub severe_below: u32,
    pub severe_code: u8,
    pub mild_below: u32,
    pub mild_code: u8,
    pub failure_code: u8,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            severe_below: 10,
            severe_code: 3,
            mild_below: 16,
            mild_code: 2,
            failure_code: 1,
        }
    }
}

/// Order in which per-domain report blocks reach stdout
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ReportOrder {
    /// Inventory order, whatever order domains finish in
    #[default]
    Input,
    /// As soon as each domain finishes
    Completion,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub order: ReportOrder,
    /// Prefix lines with domain UUIDs instead of names
    pub uuid: bool,
}

impl AlignScanConfig {
    /// Load the layered configuration.
    ///
    /// `overrides` is merged last; only the keys it contains take effect.
    pub fn load(custom_config: Option<&Path>, overrides: Option<serde_json::Value>) -> Result<Self> {
        tracing::trace!("CONFIG LOAD: Starting");
        let mut figment = Figment::new().merge(Toml::string(DEFAULT_CONFIG));

        if let Some(path) = custom_config {
            if !path.is_file() {
                bail!("configuration file {} does not exist", path.display());
            }
            figment = merge_file(figment, path);
        } else {
            if let Some(dir) = user_config_dir() {
                figment = merge_candidates(figment, &dir.join("config"));
            }
            figment = merge_candidates(figment, Path::new("alignscan"));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            tracing::trace!("CONFIG LOAD: Applying CLI overrides");
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: Self = figment.extract().context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.parallel.thread_percentage) {
            bail!(
                "parallel.thread_percentage must be between 1 and 100, got {}",
                self.parallel.thread_percentage
            );
        }
        if self.exit.severe_below > self.exit.mild_below {
            bail!(
                "exit.severe_below ({}) must not exceed exit.mild_below ({})",
                self.exit.severe_below,
                self.exit.mild_below
            );
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Render as JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Merge whichever of `<stem>.toml`, `.json`, `.yaml`, `.yml` exist.
fn merge_candidates(figment: Figment, stem: &Path) -> Figment {
    figment
        .merge(Toml::file(stem.with_extension("toml")))
        .merge(Json::file(stem.with_extension("json")))
        .merge(Yaml::file(stem.with_extension("yaml")))
        .merge(Yaml::file(stem.with_extension("yml")))
}

/// Merge one explicitly named file, picking the format from its extension.
fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => figment.merge(Json::file(path)),
        Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}

fn user_config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join("alignscan"))
}
