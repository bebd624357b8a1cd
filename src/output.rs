//! Output persistence: the append-only convergence log, smoothed snapshots,
//! link sums, and the stratum summary table.
//!
//! The convergence log is only ever appended to (header written once, on
//! creation); downstream tooling reads the full history to diagnose
//! oscillation across iterations. Everything else is rewritten whole, in
//! deterministic order, so identical inputs produce byte-identical files.

use crate::convergence::{ConvergenceLogRecord, LinkSum};
use crate::error::EngineError;
use crate::metrics::types::{MappedSummary, StratumSummary};
use crate::model::FlowSet;
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{debug, info};

/// Appends one row to the append-only convergence log, creating the file
/// with headers if it does not already exist.
pub fn append_log_record(path: &Path, record: &ConvergenceLogRecord) -> Result<(), EngineError> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "appending convergence log record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

/// Writes the smoothed flow set as the snapshot the next iteration reads
/// back, in link key order.
pub fn write_snapshot(path: &Path, flows: &FlowSet) -> Result<(), EngineError> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in flows.sorted_records() {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!(path = %path.display(), links = flows.len(), "wrote smoothed snapshot");
    Ok(())
}

/// Writes per-edge totals collapsed across transit lines.
pub fn write_link_sums(path: &Path, sums: &[LinkSum]) -> Result<(), EngineError> {
    let mut writer = csv::Writer::from_path(path)?;
    for sum in sums {
        writer.serialize(sum)?;
    }
    writer.flush()?;
    info!(path = %path.display(), links = sums.len(), "wrote link sums");
    Ok(())
}

/// Writes the stratum summary table. Derived-quantity columns follow the
/// rate tables' column order, collisions first, then emissions.
pub fn write_summary(
    path: &Path,
    summaries: &[StratumSummary],
    collision_types: &[String],
    emission_types: &[String],
) -> Result<(), EngineError> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec![
        "timeperiod".to_string(),
        "vehicle class".to_string(),
        "VMT".to_string(),
        "VHT".to_string(),
        "Hypothetical Freeflow Time".to_string(),
        "Non-Recurring Freeway Delay".to_string(),
    ];
    header.extend(collision_types.iter().cloned());
    header.extend(emission_types.iter().cloned());
    writer.write_record(&header)?;

    for summary in summaries {
        let mut row = vec![
            summary.stratum.timeperiod.to_string(),
            summary.stratum.vclass.to_string(),
            summary.vmt.to_string(),
            summary.vht.to_string(),
            summary.hypothetical_fft.to_string(),
            summary.non_recurring_delay.to_string(),
        ];
        row.extend(summary.collisions.iter().map(|v| v.to_string()));
        row.extend(summary.emissions.iter().map(|v| v.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = summaries.len(), "wrote stratum summaries");
    Ok(())
}

/// Writes the mapped summary table: the mapping's index column and the
/// road/area classification come first, then the same columns as the plain
/// summary.
pub fn write_mapped_summary(
    path: &Path,
    index_col: &str,
    summaries: &[MappedSummary],
    collision_types: &[String],
    emission_types: &[String],
) -> Result<(), EngineError> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec![
        index_col.to_string(),
        "road_type".to_string(),
        "area_type".to_string(),
        "timeperiod".to_string(),
        "vehicle class".to_string(),
        "VMT".to_string(),
        "VHT".to_string(),
        "Hypothetical Freeflow Time".to_string(),
        "Non-Recurring Freeway Delay".to_string(),
    ];
    header.extend(collision_types.iter().cloned());
    header.extend(emission_types.iter().cloned());
    writer.write_record(&header)?;

    for summary in summaries {
        let mut row = vec![
            summary.stratum.index.to_string(),
            summary.stratum.road_type.label().to_string(),
            summary.stratum.area_type.label().to_string(),
            summary.stratum.timeperiod.to_string(),
            summary.stratum.vclass.to_string(),
            summary.vmt.to_string(),
            summary.vht.to_string(),
            summary.hypothetical_fft.to_string(),
            summary.non_recurring_delay.to_string(),
        ];
        row.extend(summary.collisions.iter().map(|v| v.to_string()));
        row.extend(summary.emissions.iter().map(|v| v.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = summaries.len(), "wrote mapped stratum summaries");
    Ok(())
}

/// Logs a value as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<(), EngineError> {
    info!(
        "{}",
        serde_json::to_string_pretty(value).map_err(|e| EngineError::validation(e.to_string()))?
    );
    Ok(())
}
