use anyhow::{Result, bail};
use clap::{ArgMatches, Args};
use std::io;
use std::path::PathBuf;

use crate::align::{ExitTiers, Orchestrator, ScanOptions};
use crate::cli::{Output, setup_logging};
use crate::config::{AlignScanConfig, ReportOrder};
use crate::domains::{DomainSource, Inventory};
use crate::inspect::{DiskInspector, DiskSpec};
use crate::parallel::default_workers;

#[derive(Args, Debug, Clone, Default)]
pub struct ScanArgs {
    /// Add a disk image; all -a and -d disks are scanned as one guest
    #[arg(short = 'a', long = "add", value_name = "IMAGE")]
    pub add: Vec<PathBuf>,

    /// Disk format of the -a images that follow (only raw is supported; auto resets)
    #[arg(long, value_name = "FORMAT")]
    pub format: Vec<String>,

    /// Sector size of the -a images that follow
    #[arg(long, value_name = "512|4096", value_parser = parse_blocksize)]
    pub blocksize: Vec<u32>,

    /// `-a` images with the `--format`/`--blocksize` in effect where each appeared
    #[arg(skip)]
    pub images: Vec<DiskSpec>,

    /// Domain inventory: a path or file:// URI
    #[arg(short = 'c', long, value_name = "URI")]
    pub connect: Option<String>,

    /// Add the disks of a domain (by name or UUID) from the inventory
    #[arg(short = 'd', long = "domain", value_name = "GUEST")]
    pub domain: Vec<String>,

    /// Use at most N threads (0 = default)
    #[arg(short = 'P', value_name = "N")]
    pub threads: Option<usize>,

    /// No output, just the exit code
    #[arg(short, long)]
    pub quiet: bool,

    /// Print UUIDs instead of names
    #[arg(long)]
    pub uuid: bool,

    /// Order of per-domain output
    #[arg(long, value_enum, value_name = "ORDER")]
    pub order: Option<ReportOrder>,

    /// Verbose messages (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Trace disk inspection calls
    #[arg(short = 'x')]
    pub trace: bool,

    /// Use custom configuration file
    #[arg(long, value_name = "FILE", env = "ALIGNSCAN_CONFIG")]
    pub config: Option<PathBuf>,
}

fn parse_blocksize(value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(size @ (512 | 4096)) => Ok(size),
        _ => Err(format!("invalid blocksize '{value}' (expected 512 or 4096)")),
    }
}

impl ScanArgs {
    fn single_guest(&self) -> bool {
        !self.add.is_empty() || !self.domain.is_empty()
    }

    /// Command-line values that take part in configuration layering
    fn config_overrides(&self) -> serde_json::Value {
        let mut overrides = serde_json::json!({});
        if let Some(connect) = &self.connect {
            overrides["connect"] = serde_json::json!(connect);
        }
        if self.uuid {
            overrides["report"]["uuid"] = serde_json::json!(true);
        }
        if let Some(order) = self.order {
            overrides["report"]["order"] = serde_json::json!(order);
        }
        overrides
    }

    fn check(&self) -> Result<()> {
        if self.single_guest() && self.uuid {
            bail!("--uuid option cannot be used with -a or -d");
        }
        Ok(())
    }

    /// Fill [`ScanArgs::images`] from the command-line positions of the options.
    pub fn scope_images(&mut self, matches: &ArgMatches) -> Result<(), String> {
        self.images = scope_image_options(
            &indexed::<PathBuf>(matches, "add"),
            &indexed::<String>(matches, "format"),
            &indexed::<u32>(matches, "blocksize"),
        )?;
        Ok(())
    }
}

fn indexed<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Vec<(usize, T)> {
    match (matches.indices_of(id), matches.get_many::<T>(id)) {
        (Some(indices), Some(values)) => indices.zip(values.cloned()).collect(),
        _ => Vec::new(),
    }
}

/// Apply each `--format`/`--blocksize` to the `-a` images after it, up to the
/// next occurrence of the same option. An option with no image after it is
/// an error. `--format auto` goes back to probing.
fn scope_image_options(
    adds: &[(usize, PathBuf)],
    formats: &[(usize, String)],
    blocksizes: &[(usize, u32)],
) -> Result<Vec<DiskSpec>, String> {
    let last_add = adds.iter().map(|(index, _)| *index).max();
    let unused = |index: usize| last_add.is_none_or(|last| index > last);

    if let Some((_, format)) = formats.iter().find(|(index, _)| unused(*index)) {
        return Err(format!("--format {format} is not followed by any -a image"));
    }
    if let Some((_, size)) = blocksizes.iter().find(|(index, _)| unused(*index)) {
        return Err(format!("--blocksize {size} is not followed by any -a image"));
    }

    let in_effect = |at: usize| {
        let format = formats
            .iter()
            .filter(|(index, _)| *index < at)
            .max_by_key(|(index, _)| *index)
            .map(|(_, format)| format.clone())
            .filter(|format| format != "auto");
        let blocksize = blocksizes
            .iter()
            .filter(|(index, _)| *index < at)
            .max_by_key(|(index, _)| *index)
            .map(|(_, size)| *size);
        (format, blocksize)
    };

    Ok(adds
        .iter()
        .map(|(index, path)| {
            let (format, blocksize) = in_effect(*index);
            DiskSpec {
                path: path.clone(),
                format,
                blocksize,
            }
        })
        .collect())
}

pub fn execute(args: ScanArgs) -> Result<u8> {
    setup_logging(args.verbose, args.trace, args.quiet);
    args.check()?;

    let config = AlignScanConfig::load(args.config.as_deref(), Some(args.config_overrides()))?;
    tracing::debug!(?config, "loaded configuration");

    let options = ScanOptions {
        quiet: args.quiet,
        use_uuid: config.report.uuid,
        order: config.report.order,
    };
    let workers = default_workers(config.parallel.max_threads, config.parallel.thread_percentage);
    let orchestrator = Orchestrator::new(DiskInspector, options, ExitTiers::from(&config.exit), workers);

    let output = Output::new(args.verbose > 0, args.quiet);
    if args.single_guest() && args.threads.is_some() {
        output.warning("-P has no effect when scanning a single guest");
    }

    let outcome = if args.single_guest() {
        let disks = single_guest_disks(&args, &config)?;
        let stdout = io::stdout();
        let mut out = stdout.lock();
        orchestrator.scan_single(&disks, &mut out)?
    } else {
        let inventory = inventory(&config)?;
        orchestrator.scan_all(&inventory, args.threads.unwrap_or(0), io::stdout())?
    };

    if !outcome.batch.is_success() {
        output.error(&format!(
            "{} of {} domains could not be scanned",
            outcome.batch.failures.len(),
            outcome.batch.items
        ));
        for failure in &outcome.batch.failures {
            output.verbose(&failure.message);
        }
    }

    tracing::debug!(
        worst_alignment = outcome.worst_alignment,
        exit_code = outcome.exit_code,
        "scan finished"
    );
    Ok(outcome.exit_code)
}

fn inventory(config: &AlignScanConfig) -> Result<Inventory> {
    match config.connect.as_deref() {
        Some(uri) => Inventory::from_uri(uri),
        None => bail!(
            "no domain inventory configured: pass -c/--connect, set `connect` in the configuration, or use -a"
        ),
    }
}

/// Disks for single-guest mode: the `-a` images, then the disks of each `-d` domain.
fn single_guest_disks(args: &ScanArgs, config: &AlignScanConfig) -> Result<Vec<DiskSpec>> {
    // Args that never went through `Cli::try_parse_args_from` have no per-image options
    let mut disks: Vec<DiskSpec> = if args.images.len() == args.add.len() {
        args.images.clone()
    } else {
        args.add.iter().map(DiskSpec::new).collect()
    };

    if !args.domain.is_empty() {
        let inventory = inventory(config)?;
        for key in &args.domain {
            let domain = inventory.find(key)?;
            if domain.disks.is_empty() {
                bail!("domain '{}' has no disks", domain.display_name());
            }
            disks.extend(domain.disks);
        }
    }

    Ok(disks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_blocksize() {
        assert_eq!(parse_blocksize("512"), Ok(512));
        assert_eq!(parse_blocksize("4096"), Ok(4096));
        assert!(parse_blocksize("1024").is_err());
        assert!(parse_blocksize("big").is_err());
    }

    #[test]
    fn test_option_combinations() {
        let uuid_with_disk = ScanArgs {
            add: vec![PathBuf::from("a.img")],
            uuid: true,
            ..ScanArgs::default()
        };
        assert!(uuid_with_disk.check().is_err());

        let all_domains = ScanArgs {
            uuid: true,
            threads: Some(2),
            ..ScanArgs::default()
        };
        assert!(all_domains.check().is_ok());
    }

    #[test]
    fn test_config_overrides_only_include_given_flags() {
        assert_eq!(ScanArgs::default().config_overrides(), serde_json::json!({}));

        let args = ScanArgs {
            connect: Some("file:///tmp/d.toml".to_string()),
            uuid: true,
            order: Some(ReportOrder::Completion),
            ..ScanArgs::default()
        };
        assert_eq!(
            args.config_overrides(),
            serde_json::json!({
                "connect": "file:///tmp/d.toml",
                "report": { "uuid": true, "order": "completion" }
            })
        );
    }

    #[test]
    fn test_domain_without_inventory() {
        let args = ScanArgs {
            domain: vec!["web01".to_string()],
            ..ScanArgs::default()
        };
        let err = single_guest_disks(&args, &AlignScanConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no domain inventory"));
    }

    fn at<T: Clone>(pairs: &[(usize, T)]) -> Vec<(usize, T)> {
        pairs.to_vec()
    }

    #[test]
    fn test_image_options_apply_to_following_images_only() {
        // -a a.img --format raw --blocksize 4096 -a b.img --format auto -a c.img
        let adds = at(&[
            (1, PathBuf::from("a.img")),
            (7, PathBuf::from("b.img")),
            (11, PathBuf::from("c.img")),
        ]);
        let formats = at(&[(3, "raw".to_string()), (9, "auto".to_string())]);
        let blocksizes = at(&[(5, 4096u32)]);

        let disks = scope_image_options(&adds, &formats, &blocksizes).unwrap();
        assert_eq!(disks[0], DiskSpec::new("a.img"));
        assert_eq!(disks[1].format.as_deref(), Some("raw"));
        assert_eq!(disks[1].blocksize, Some(4096));
        assert_eq!(disks[2].format, None);
        assert_eq!(disks[2].blocksize, Some(4096));
    }

    #[test]
    fn test_trailing_image_option_rejected() {
        let adds = at(&[(1, PathBuf::from("a.img"))]);
        let err = scope_image_options(&adds, &at(&[(3, "raw".to_string())]), &[]).unwrap_err();
        assert!(err.contains("--format raw"));

        let err = scope_image_options(&adds, &[], &at(&[(3, 512u32)])).unwrap_err();
        assert!(err.contains("--blocksize 512"));

        assert!(scope_image_options(&[], &at(&[(1, "raw".to_string())]), &[]).is_err());
    }

    #[test]
    fn test_scoped_images_feed_single_guest_disks() {
        let args = ScanArgs {
            add: vec![PathBuf::from("a.img"), PathBuf::from("b.img")],
            images: vec![
                DiskSpec::new("a.img"),
                DiskSpec {
                    blocksize: Some(4096),
                    ..DiskSpec::new("b.img")
                },
            ],
            ..ScanArgs::default()
        };
        let disks = single_guest_disks(&args, &AlignScanConfig::default()).unwrap();
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].blocksize, None);
        assert_eq!(disks[1].blocksize, Some(4096));
    }
}
