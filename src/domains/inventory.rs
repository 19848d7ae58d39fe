use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{Domain, DomainSource, sort_domains};
use crate::inspect::DiskSpec;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InventoryFile {
    #[serde(default, rename = "domain")]
    domains: Vec<DomainEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DomainEntry {
    name: Option<String>,
    uuid: Option<Uuid>,
    #[serde(default, rename = "disk")]
    disks: Vec<DiskSpec>,
}

/// Domain list stored in a file
///
/// ```toml
/// [[domain]]
/// name = "web01"
/// uuid = "6b1d7e5e-0f4b-4c1e-9d6f-3a7c2b9e8d10"
///
/// [[domain.disk]]
/// path = "images/web01.img"
/// format = "raw"
/// ```
///
/// Relative disk paths are resolved against the inventory's directory. The
/// format follows the extension: `.json`, `.yaml`/`.yml`, otherwise TOML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    path: PathBuf,
}

impl Inventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Accept a plain path or a `file://` URI.
    pub fn from_uri(uri: &str) -> Result<Self> {
        if let Some(path) = uri.strip_prefix("file://") {
            if path.is_empty() {
                bail!("connection URI '{uri}' has no path");
            }
            return Ok(Self::new(path));
        }
        if let Some((scheme, _)) = uri.split_once("://") {
            bail!(
                "unsupported connection URI scheme '{scheme}': expected a path or file:// URI to a domain inventory"
            );
        }
        Ok(Self::new(uri))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, contents: &str) -> Result<InventoryFile> {
        let extension = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let parsed = match extension.as_deref() {
            Some("json") => serde_json::from_str(contents).map_err(anyhow::Error::from),
            Some("yaml") | Some("yml") => serde_yml::from_str(contents).map_err(anyhow::Error::from),
            _ => toml::from_str(contents).map_err(anyhow::Error::from),
        };
        parsed.with_context(|| format!("{}: invalid domain inventory", self.path.display()))
    }

    fn resolve(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            return path;
        }
        match self.path.parent() {
            Some(dir) => dir.join(path),
            None => path,
        }
    }
}

impl DomainSource for Inventory {
    fn domains(&self) -> Result<Vec<Domain>> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("{}: cannot read domain inventory", self.path.display()))?;
        let file = self.parse(&contents)?;

        let mut domains: Vec<Domain> = file
            .domains
            .into_iter()
            .map(|entry| Domain {
                name: entry.name,
                uuid: entry.uuid,
                disks: entry
                    .disks
                    .into_iter()
                    .map(|disk| DiskSpec {
                        path: self.resolve(disk.path),
                        ..disk
                    })
                    .collect(),
            })
            .collect();

        sort_domains(&mut domains);
        tracing::debug!(
            inventory = %self.path.display(),
            domains = domains.len(),
            "enumerated domains"
        );
        Ok(domains)
    }
}
