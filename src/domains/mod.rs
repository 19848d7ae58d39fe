//! Guest domains and where they come from
//!
//! A [`Domain`] is one unit of scan work: a guest's name, its UUID and the
//! disks that make up its storage. A [`DomainSource`] enumerates them;
//! [`Inventory`] reads them from a TOML, YAML or JSON file.

use anyhow::Result;
use uuid::Uuid;

use crate::inspect::DiskSpec;

pub mod inventory;

pub use inventory::Inventory;

/// Shown in diagnostics for guests without a name
pub const NO_NAME: &str = "(no name)";

/// One guest and the disks to inspect for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub name: Option<String>,
    pub uuid: Option<Uuid>,
    pub disks: Vec<DiskSpec>,
}

impl Domain {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(NO_NAME)
    }

    /// Prefix for report lines: the UUID when asked for and known, else the name.
    pub fn report_prefix(&self, use_uuid: bool) -> String {
        match (use_uuid, self.uuid) {
            (true, Some(uuid)) => uuid.to_string(),
            _ => self.display_name().to_string(),
        }
    }

    /// True when `key` is this domain's name or UUID
    pub fn matches(&self, key: &str) -> bool {
        self.name.as_deref() == Some(key)
            || self
                .uuid
                .is_some_and(|uuid| Uuid::parse_str(key).is_ok_and(|k| k == uuid))
    }
}

/// Something that can list every guest to scan
pub trait DomainSource {
    /// All guests, sorted by name. An error aborts the scan before it starts.
    fn domains(&self) -> Result<Vec<Domain>>;

    /// Look a single guest up by name or UUID.
    fn find(&self, key: &str) -> Result<Domain> {
        self.domains()?
            .into_iter()
            .find(|d| d.matches(key))
            .ok_or_else(|| anyhow::anyhow!("domain '{key}' not found"))
    }
}

/// Sort by name, nameless domains last.
pub(crate) fn sort_domains(domains: &mut [Domain]) {
    domains.sort_by(|a, b| match (&a.name, &b.name) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}
