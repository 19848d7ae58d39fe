//! Runs the alignment scan over one guest or over every guest in parallel

use anyhow::{Context, Result};
use std::io::Write;

use super::{NO_CONSTRAINT, scan_handle};
use crate::config::{ExitConfig, ReportOrder};
use crate::domains::{Domain, DomainSource};
use crate::inspect::{DiskSpec, Inspector};
use crate::parallel::{BatchResult, CompletionSink, OrderedSink, Reduction, WorkerPool};

/// Per-run switches that shape the report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Produce no report lines, only the exit status
    pub quiet: bool,
    /// Prefix lines with the domain UUID instead of its name
    pub use_uuid: bool,
    pub order: ReportOrder,
}

/// Maps the worst alignment and the batch status to a process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitTiers {
    pub severe_below: u32,
    pub severe_code: u8,
    pub mild_below: u32,
    pub mild_code: u8,
    pub failure_code: u8,
}

impl Default for ExitTiers {
    fn default() -> Self {
        Self::from(&ExitConfig::default())
    }
}

impl From<&ExitConfig> for ExitTiers {
    fn from(config: &ExitConfig) -> Self {
        Self {
            severe_below: config.severe_below,
            severe_code: config.severe_code,
            mild_below: config.mild_below,
            mild_code: config.mild_code,
            failure_code: config.failure_code,
        }
    }
}

impl ExitTiers {
    /// Any failed item wins over the alignment tiers.
    pub fn status(&self, batch: &BatchResult, worst_alignment: u32) -> u8 {
        if !batch.is_success() {
            self.failure_code
        } else if worst_alignment < self.severe_below {
            self.severe_code
        } else if worst_alignment < self.mild_below {
            self.mild_code
        } else {
            0
        }
    }
}

/// What a finished scan hands back to the CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub batch: BatchResult,
    /// Smallest alignment exponent seen, [`NO_CONSTRAINT`] if no partitions
    pub worst_alignment: u32,
    pub exit_code: u8,
}

/// Drives inspection of domains and turns the results into an exit status
pub struct Orchestrator<I> {
    inspector: I,
    options: ScanOptions,
    tiers: ExitTiers,
    default_workers: usize,
}

impl<I: Inspector> Orchestrator<I> {
    /// `default_workers` is used whenever a caller asks for limit 0.
    pub fn new(inspector: I, options: ScanOptions, tiers: ExitTiers, default_workers: usize) -> Self {
        Self {
            inspector,
            options,
            tiers,
            default_workers,
        }
    }

    /// Enumerate every domain from `source` and scan them in parallel.
    ///
    /// Enumeration errors abort before any worker starts. Per-domain errors
    /// are logged and only show up in the exit code.
    pub fn scan_all<S, W>(&self, source: &S, requested_limit: usize, out: W) -> Result<ScanOutcome>
    where
        S: DomainSource + ?Sized,
        W: Write + Send,
    {
        let domains = source.domains().context("enumerating domains")?;
        if domains.is_empty() {
            tracing::warn!("no domains to scan");
        }
        self.scan_domains(&domains, requested_limit, out)
    }

    /// Scan an already enumerated list of domains in parallel.
    pub fn scan_domains<W>(
        &self,
        domains: &[Domain],
        requested_limit: usize,
        out: W,
    ) -> Result<ScanOutcome>
    where
        W: Write + Send,
    {
        let worst = Reduction::minimum(NO_CONSTRAINT);
        let pool = WorkerPool::with_limit(requested_limit, domains.len(), self.default_workers);
        tracing::debug!(threads = pool.workers(), domains = domains.len(), "scanning domains");

        let work = |index: usize, domain: &Domain, block: &mut Vec<u8>| {
            self.scan_one(index, domain, &worst, block)
        };

        let batch = match self.options.order {
            ReportOrder::Input => pool.run(domains, &OrderedSink::new(out), work)?,
            ReportOrder::Completion => pool.run(domains, &CompletionSink::new(out), work)?,
        };

        for failure in &batch.failures {
            tracing::error!(
                domain = domains[failure.index].display_name(),
                "{}",
                failure.message
            );
        }

        Ok(self.outcome(batch, worst.into_inner()))
    }

    /// Treat `disks` as the disks of a single guest and scan them on this thread.
    ///
    /// Lines carry no prefix. Any error is returned directly.
    pub fn scan_single<W>(&self, disks: &[DiskSpec], out: &mut W) -> Result<ScanOutcome>
    where
        W: Write + ?Sized,
    {
        let worst = Reduction::minimum(NO_CONSTRAINT);
        let mut handle = self.inspector.open(disks)?;
        scan_handle(&mut handle, None, self.options.quiet, &worst, out)?;
        out.flush().context("flushing report")?;

        let batch = BatchResult {
            items: 1,
            failures: Vec::new(),
        };
        Ok(self.outcome(batch, worst.into_inner()))
    }

    fn scan_one(
        &self,
        index: usize,
        domain: &Domain,
        worst: &Reduction<u32>,
        block: &mut Vec<u8>,
    ) -> Result<()> {
        let name = domain.display_name();

        tracing::info!(index, domain = name, "opening connection");
        let mut handle = self
            .inspector
            .open(&domain.disks)
            .with_context(|| format!("{name}: cannot open disks"))?;

        tracing::info!(index, domain = name, "performing scan");
        let prefix = domain.report_prefix(self.options.use_uuid);
        let result = scan_handle(&mut handle, Some(&prefix), self.options.quiet, worst, block);

        tracing::info!(index, domain = name, ok = result.is_ok(), "finishing scan");
        result.with_context(|| format!("{name}: scan failed"))
    }

    fn outcome(&self, batch: BatchResult, worst_alignment: u32) -> ScanOutcome {
        let exit_code = self.tiers.status(&batch, worst_alignment);
        ScanOutcome {
            batch,
            worst_alignment,
            exit_code,
        }
    }
}
