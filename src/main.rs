//! Build tool for trinucleotide context indices
//!
//! Scans a FASTA genome and writes the context index directory, optionally
//! excluding the neighbourhoods of known driver mutations.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use ctxindex::genome::{decode_chromosome_name, GenomicPosition, GenomicRegion};
use ctxindex::progress::{LogProgress, NoProgress, Progress};
use ctxindex::sbs::{SbsContextIndex, SbsIndexOptions};

#[derive(Parser)]
#[command(name = "build-context-index")]
#[command(version)]
#[command(about = "Builds a trinucleotide context index from a genome", long_about = None)]
struct Cli {
    /// The genome in FASTA format
    genome_fasta: PathBuf,

    /// Index directory
    #[arg(short = 'o', long, default_value = "context_index")]
    index_directory: PathBuf,

    /// Cache size in Mbytes
    #[arg(short, long, default_value_t = 1000)]
    cache_size: usize,

    /// Driver mutations file; their loci are excluded from the index
    #[arg(short, long)]
    driver_mutations: Option<PathBuf>,

    /// Disable output messages
    #[arg(short, long)]
    quiet: bool,
}

/// Reads the regions to avoid from a driver-mutation TSV file
///
/// Expected columns: chromosome, 1-based position, reference allele,
/// alternate allele, and optionally a label. Lines starting with `#` are
/// skipped. Each mutation excludes the region its reference allele spans.
fn read_driver_regions(path: &PathBuf) -> anyhow::Result<BTreeSet<GenomicRegion>> {
    let mut regions = BTreeSet::new();
    let reader = BufReader::new(File::open(path)?);
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            anyhow::bail!(
                "{}:{}: expected at least 3 tab-separated fields",
                path.display(),
                line_number + 1
            );
        }
        let Some(chr_id) = decode_chromosome_name(fields[0]) else {
            anyhow::bail!(
                "{}:{}: unknown chromosome {:?}",
                path.display(),
                line_number + 1,
                fields[0]
            );
        };
        let position: u32 = fields[1].parse().map_err(|_| {
            anyhow::anyhow!(
                "{}:{}: invalid position {:?}",
                path.display(),
                line_number + 1,
                fields[1]
            )
        })?;
        let length = fields[2].len().max(1) as u32;
        regions.insert(GenomicRegion::new(
            GenomicPosition::new(chr_id, position),
            length,
        ));
    }
    Ok(regions)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.index_directory.exists() {
        anyhow::bail!(
            "the index directory {:?} already exists",
            cli.index_directory
        );
    }

    let regions_to_avoid = match &cli.driver_mutations {
        Some(path) => read_driver_regions(path)?,
        None => BTreeSet::new(),
    };
    if !regions_to_avoid.is_empty() {
        tracing::info!(regions = regions_to_avoid.len(), "excluding driver loci");
    }

    let options = SbsIndexOptions::default()
        .cache_size(cli.cache_size.saturating_mul(1_000_000))
        .regions_to_avoid(regions_to_avoid);

    let mut rng = SmallRng::seed_from_u64(0);
    let mut quiet_progress = NoProgress;
    let mut log_progress = LogProgress::new();
    let progress: &mut dyn Progress = if cli.quiet {
        &mut quiet_progress
    } else {
        &mut log_progress
    };

    let index: SbsContextIndex = SbsContextIndex::build(
        &mut rng,
        &cli.index_directory,
        &cli.genome_fasta,
        &options,
        progress,
    )?;

    tracing::info!(
        contexts = index.num_keys(),
        chromosomes = index.chromosome_lengths().len(),
        index = %cli.index_directory.display(),
        "context index built"
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return if error.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if !cli.quiet {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
