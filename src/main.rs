//! CLI entry point for the link flow post-processor.
//!
//! Provides subcommands for MSA-smoothing one iteration's assignment volumes
//! against the previous smoothed snapshot, and for reducing a loaded network
//! to VMT/VHT/delay/collision/emission summaries by time period and vehicle
//! class.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use linkflow::convergence::{self, ConvergenceState};
use linkflow::metrics::engine::{aggregate, aggregate_mapped};
use linkflow::metrics::mapping::LinkMapping;
use linkflow::metrics::rates::{CollisionRates, DelayRates, EmissionRates};
use linkflow::output;
use linkflow::parser::{read_flow_csv, read_loaded_network};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "linkflow")]
#[command(about = "Post-process travel model link assignment results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// MSA-smooth one iteration's link volumes against the previous snapshot
    Smooth {
        /// Current iteration's raw flow CSV
        #[arg(value_name = "CURRENT_CSV")]
        current: PathBuf,

        /// Stratum label recorded in the convergence log (e.g. a time period)
        #[arg(short, long)]
        label: String,

        /// Iteration index; 0 means no previous snapshot exists
        #[arg(short, long)]
        iteration: u32,

        /// Relative volume change below which the process has converged
        #[arg(short, long, default_value_t = 0.005)]
        threshold: f64,

        /// Previous iteration's smoothed snapshot (required when iteration > 0)
        #[arg(short, long)]
        previous: Option<PathBuf>,

        /// Smoothed snapshot to write for the next iteration
        #[arg(short, long, default_value = "flows_msa.csv")]
        output: PathBuf,

        /// Append-only convergence log
        #[arg(long, default_value = "convergence_log.csv")]
        log: PathBuf,

        /// Where to write per-edge link sums once converged
        #[arg(long)]
        linksum: Option<PathBuf>,
    },
    /// Reduce a loaded network to VMT/VHT/delay/collision/emission summaries
    Aggregate {
        /// Wide loaded-network export with per-class volumes
        #[arg(value_name = "NET_CSV")]
        net_csv: PathBuf,

        /// Scenario filter keyword for the lookup files
        #[arg(short, long)]
        filter: String,

        /// Scenario year for the lookup files
        #[arg(short, long)]
        year: i32,

        /// Directory containing the rate lookup CSVs
        #[arg(long, default_value = "INPUT/metrics")]
        lookup_dir: PathBuf,

        /// Summary CSV to write
        #[arg(short, long, default_value = "metrics/vmt_vht_metrics.csv")]
        output: PathBuf,

        /// Also write a share-weighted re-aggregation by an external link
        /// mapping (e.g. link to TAZ)
        #[arg(
            long,
            num_args = 4,
            value_names = ["MAPPING_CSV", "INDEX_COL", "SHARE_COL", "OUTPUT_SUFFIX"]
        )]
        link_mapping: Option<Vec<String>>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/linkflow.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("linkflow.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Smooth {
            current,
            label,
            iteration,
            threshold,
            previous,
            output: output_path,
            log,
            linksum,
        } => run_smooth(
            &current, &label, iteration, threshold, previous, &output_path, &log, linksum,
        ),
        Commands::Aggregate {
            net_csv,
            filter,
            year,
            lookup_dir,
            output: output_path,
            link_mapping,
        } => run_aggregate(&net_csv, &filter, year, &lookup_dir, &output_path, link_mapping),
    }
}

#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip_all, fields(label, iteration))]
fn run_smooth(
    current: &Path,
    label: &str,
    iteration: u32,
    threshold: f64,
    previous: Option<PathBuf>,
    output_path: &Path,
    log: &Path,
    linksum: Option<PathBuf>,
) -> Result<()> {
    let previous_path = previous.unwrap_or_else(|| PathBuf::from("flows_msa_prev.csv"));
    convergence::require_previous(iteration, &previous_path)?;

    let previous_flows = if iteration > 0 {
        Some(
            read_flow_csv(&previous_path)
                .with_context(|| format!("reading previous snapshot {}", previous_path.display()))?,
        )
    } else {
        None
    };
    let current_flows = read_flow_csv(current)
        .with_context(|| format!("reading current flows {}", current.display()))?;

    let state = ConvergenceState {
        iteration,
        previous: previous_flows,
        current: current_flows,
    };
    let outcome = convergence::smooth(&state, threshold)?;

    let record = outcome.log_record(iteration, label);
    output::print_json(&record)?;
    output::append_log_record(log, &record)?;
    output::write_snapshot(output_path, &outcome.smoothed)?;

    if outcome.converged {
        info!(
            iteration,
            delta_fraction = outcome.delta_fraction,
            "volumes converged"
        );
        if let Some(linksum_path) = linksum {
            let sums = convergence::link_sums(&outcome.smoothed);
            output::write_link_sums(&linksum_path, &sums)?;
        }
    } else {
        info!(
            iteration,
            delta_fraction = outcome.delta_fraction,
            threshold,
            "not converged; schedule another iteration"
        );
    }

    Ok(())
}

#[tracing::instrument(skip_all, fields(filter, year))]
fn run_aggregate(
    net_csv: &Path,
    filter: &str,
    year: i32,
    lookup_dir: &Path,
    output_path: &Path,
    link_mapping: Option<Vec<String>>,
) -> Result<()> {
    let flows = read_loaded_network(net_csv)
        .with_context(|| format!("reading loaded network {}", net_csv.display()))?;

    let delay = DelayRates::from_path(&lookup_dir.join("nonRecurringDelayLookup.csv"), filter, year)?;
    let collisions = CollisionRates::from_path(&lookup_dir.join("collisionLookup.csv"), filter, year)?;

    // the emissions lookup is optional; skip its columns when absent
    let emissions_path = lookup_dir.join("emissionsLookup.csv");
    let emissions = if emissions_path.exists() {
        Some(EmissionRates::from_path(&emissions_path, filter, year)?)
    } else {
        warn!(path = %emissions_path.display(), "emissions lookup not found; skipping");
        None
    };

    let summaries = aggregate(&flows, &delay, &collisions, emissions.as_ref())?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    output::write_summary(
        output_path,
        &summaries,
        collisions.types(),
        emissions.as_ref().map(|e| e.types()).unwrap_or(&[]),
    )?;

    if let Some(args) = &link_mapping {
        let [mapping_path, index_col, share_col, suffix] = args.as_slice() else {
            anyhow::bail!("--link-mapping takes MAPPING_CSV INDEX_COL SHARE_COL OUTPUT_SUFFIX");
        };
        let mapping = LinkMapping::from_path(Path::new(mapping_path), index_col, share_col)?;
        let mapped = aggregate_mapped(&flows, &mapping, &delay, &collisions, emissions.as_ref())?;
        output::write_mapped_summary(
            &suffixed_path(output_path, suffix),
            mapping.index_col(),
            &mapped,
            collisions.types(),
            emissions.as_ref().map(|e| e.types()).unwrap_or(&[]),
        )?;
    }

    Ok(())
}

/// `metrics.csv` with suffix `_by_taz` becomes `metrics_by_taz.csv`.
fn suffixed_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("metrics");
    let name = match path.extension().and_then(OsStr::to_str) {
        Some(ext) => format!("{stem}{suffix}.{ext}"),
        None => format!("{stem}{suffix}"),
    };
    path.with_file_name(name)
}
