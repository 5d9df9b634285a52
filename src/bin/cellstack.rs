use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use cellstack::catalog::CatalogWalker;
use cellstack::config::ConfigLoader;
use cellstack::domain::QcThresholds;
use cellstack::doublet::NoopDetector;
use cellstack::error::CellstackError;
use cellstack::legacy::UnsupportedLegacyDecoder;
use cellstack::output::{JsonOutput, QcReport, WalkReport};
use cellstack::parse::{self, h5};
use cellstack::pipeline::QcPipeline;
use cellstack::sniff;
use cellstack::store::{S3HttpStore, StoreConfig};

#[derive(Parser)]
#[command(name = "cellstack")]
#[command(about = "Single-cell dataset ingestion and QC/normalization")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Walk a store prefix and print the assembled manifest")]
    Walk(WalkArgs),
    #[command(about = "Run the QC/normalization pipeline on a local file")]
    Qc(QcArgs),
}

#[derive(Args)]
struct WalkArgs {
    /// Study root prefix; omit to walk every study in the config file.
    prefix: Option<String>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    bucket: Option<String>,

    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    staging_dir: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct QcArgs {
    /// Local expression file (delimited text, h5ad-style, 10x h5, or gzip
    /// of any of those).
    file: PathBuf,

    #[arg(long, default_value_t = 500.0)]
    min_counts: f64,

    #[arg(long, default_value_t = 200)]
    min_genes: usize,

    #[arg(long, default_value_t = 6000)]
    max_genes: usize,

    #[arg(long, default_value_t = 10.0)]
    max_pct_mito: f64,

    /// Write the pipeline result as an annotated-matrix container.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<CellstackError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CellstackError) -> u8 {
    match error {
        CellstackError::MissingConfig
        | CellstackError::ConfigRead(_)
        | CellstackError::ConfigParse(_)
        | CellstackError::NotFound(_) => 2,
        CellstackError::Transport(_) | CellstackError::StoreStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Walk(args) => run_walk(args),
        Commands::Qc(args) => run_qc(args),
    }
}

fn run_walk(args: WalkArgs) -> miette::Result<()> {
    // Flags override the config file; a fully flag-specified store needs no
    // config at all.
    let config = match (&args.endpoint, &args.bucket) {
        (Some(_), Some(_)) if args.prefix.is_some() => None,
        _ => Some(ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?),
    };

    let store_config = StoreConfig {
        endpoint: args
            .endpoint
            .or_else(|| config.as_ref().map(|c| c.store.endpoint.clone()))
            .ok_or_else(|| miette::Report::msg("store endpoint required"))?,
        bucket: args
            .bucket
            .or_else(|| config.as_ref().map(|c| c.store.bucket.clone()))
            .ok_or_else(|| miette::Report::msg("store bucket required"))?,
        region: args
            .region
            .or_else(|| config.as_ref().and_then(|c| c.store.region.clone())),
    };
    let store = S3HttpStore::new(&store_config).into_diagnostic()?;

    let mut walker = CatalogWalker::new(store, UnsupportedLegacyDecoder);
    let staging = args
        .staging_dir
        .or_else(|| config.as_ref().and_then(|c| c.staging_dir.clone()));
    if let Some(root) = staging {
        walker = walker.with_staging_root(root);
    }

    let mut manifest = Vec::new();
    match args.prefix {
        Some(prefix) => manifest.extend(walker.walk_study(&prefix).into_diagnostic()?),
        None => {
            let config = config.ok_or_else(|| miette::Report::msg("config required"))?;
            for study in &config.studies {
                manifest.extend(walker.walk_study(study).into_diagnostic()?);
            }
        }
    }

    JsonOutput::print_walk(&WalkReport::from_manifest(&manifest)).into_diagnostic()?;
    Ok(())
}

fn run_qc(args: QcArgs) -> miette::Result<()> {
    let thresholds = QcThresholds {
        min_counts: args.min_counts,
        min_genes: args.min_genes,
        max_genes: args.max_genes,
        max_pct_mito: args.max_pct_mito,
    };
    thresholds.validate().into_diagnostic()?;

    let bytes = std::fs::read(&args.file)
        .map_err(|err| CellstackError::Filesystem(err.to_string()))
        .into_diagnostic()?;
    let name = args.file.to_string_lossy();
    let kind = sniff::sniff_object(&name, &bytes);
    let dataset = parse::parse_expression(&kind, &name, &bytes, &UnsupportedLegacyDecoder)
        .into_diagnostic()?;

    let cells_before = dataset.n_obs();
    let outcome = QcPipeline::run(dataset, &thresholds, &NoopDetector).into_diagnostic()?;

    if let Some(out) = &args.out {
        h5::write_h5ad(&outcome.dataset, out).into_diagnostic()?;
    }
    JsonOutput::print_qc(&QcReport::new(cells_before, &outcome)).into_diagnostic()?;
    Ok(())
}
