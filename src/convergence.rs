//! Method-of-Successive-Averages smoothing of per-link assignment volumes.
//!
//! Each invocation blends the current iteration's raw volumes into the
//! previous iteration's smoothed snapshot with weight `1/(iteration+1)` and
//! reports whether the volumes have stopped moving. State lives entirely in
//! the snapshot the caller round-trips through disk; the engine itself is
//! stateless between invocations.

use crate::error::EngineError;
use crate::model::{FlowRecord, FlowSet, LinkKey};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Input to one smoothing pass. `previous` is `None` only at iteration 0.
#[derive(Debug)]
pub struct ConvergenceState {
    pub iteration: u32,
    pub previous: Option<FlowSet>,
    pub current: FlowSet,
}

/// Result of one smoothing pass.
#[derive(Debug)]
pub struct SmoothOutcome {
    pub smoothed: FlowSet,
    pub converged: bool,
    /// Sum of |smoothed - previous| volume over the sum of current volume.
    pub delta_fraction: f64,
    pub total_volume: f64,
    /// Links present in `current` but absent from the previous snapshot,
    /// adopted at full weight.
    pub new_links: usize,
}

/// One row of the append-only convergence log.
#[derive(Debug, Serialize)]
pub struct ConvergenceLogRecord {
    pub iteration: u32,
    pub label: String,
    pub total_volume: f64,
    pub delta_fraction: f64,
    pub converged: bool,
}

impl SmoothOutcome {
    pub fn log_record(&self, iteration: u32, label: &str) -> ConvergenceLogRecord {
        ConvergenceLogRecord {
            iteration,
            label: label.to_string(),
            total_volume: self.total_volume,
            delta_fraction: self.delta_fraction,
            converged: self.converged,
        }
    }
}

/// Blends the current iteration's volumes into the previous smoothed set.
///
/// At iteration 0 (or for any link with no previous row) the current values
/// are adopted unchanged. A link missing from the previous snapshot is a
/// recoverable mismatch: it is counted and logged once, never fatal. The
/// pass converges when a previous snapshot exists, the network carries
/// volume, and the relative volume change falls below `threshold`.
pub fn smooth(state: &ConvergenceState, threshold: f64) -> Result<SmoothOutcome, EngineError> {
    if !(threshold > 0.0 && threshold < 1.0) {
        return Err(EngineError::validation(format!(
            "convergence threshold {threshold} outside (0, 1)"
        )));
    }
    if state.current.is_empty() {
        return Err(EngineError::validation(
            "current iteration flow set is empty",
        ));
    }

    let lambda = 1.0 / (state.iteration as f64 + 1.0);
    debug!(
        iteration = state.iteration,
        lambda,
        links = state.current.len(),
        "smoothing pass"
    );

    // the previous set only participates past the first iteration; at
    // iteration 0 the current values are adopted and the pass can never
    // report convergence, whatever the caller handed in
    let previous_set = if state.iteration == 0 {
        None
    } else {
        state.previous.as_ref()
    };

    let mut smoothed = Vec::with_capacity(state.current.len());
    let mut total_volume = 0.0;
    let mut total_delta = 0.0;
    let mut new_links = 0usize;

    // key order, so the logged delta is bit-identical across runs
    let mut entries: Vec<(&LinkKey, &FlowRecord)> = state.current.iter().collect();
    entries.sort_by_key(|&(key, _)| key);

    for (key, current) in entries {
        total_volume += current.volume;

        let previous = previous_set.and_then(|prev| prev.get(key));
        match previous {
            Some(prev) => {
                let record = blend(current, prev, lambda);
                total_delta += (record.volume - prev.volume).abs();
                smoothed.push(record);
            }
            None => {
                if previous_set.is_some() {
                    new_links += 1;
                }
                smoothed.push(current.clone());
            }
        }
    }

    if new_links > 0 {
        warn!(
            new_links,
            iteration = state.iteration,
            "links absent from previous snapshot; adopted current values at full weight"
        );
    }

    let delta_fraction = if total_volume > 0.0 {
        total_delta / total_volume
    } else {
        0.0
    };
    let converged = previous_set.is_some() && total_volume > 0.0 && delta_fraction < threshold;

    Ok(SmoothOutcome {
        smoothed: FlowSet::from_records(smoothed)?,
        converged,
        delta_fraction,
        total_volume,
        new_links,
    })
}

/// MSA blend of the smoothed numeric fields. Travel time is not averaged
/// across iterations; the current iteration's value carries through.
fn blend(current: &FlowRecord, previous: &FlowRecord, lambda: f64) -> FlowRecord {
    FlowRecord {
        a: current.a,
        b: current.b,
        line: current.line.clone(),
        seq: current.seq,
        volume: lambda * current.volume + (1.0 - lambda) * previous.volume,
        travel_time: current.travel_time,
        boardings: lambda * current.boardings + (1.0 - lambda) * previous.boardings,
        alightings: lambda * current.alightings + (1.0 - lambda) * previous.alightings,
    }
}

/// Per-edge totals of a smoothed flow set, collapsed across transit lines.
/// Written alongside the snapshot once the process has converged.
#[derive(Debug, Clone, Serialize)]
pub struct LinkSum {
    pub a: u32,
    pub b: u32,
    pub volume: f64,
    pub boardings: f64,
    pub alightings: f64,
}

pub fn link_sums(flows: &FlowSet) -> Vec<LinkSum> {
    let mut sums: BTreeMap<(u32, u32), LinkSum> = BTreeMap::new();
    for (key, record) in flows.iter() {
        let entry = sums.entry((key.a, key.b)).or_insert_with(|| LinkSum {
            a: key.a,
            b: key.b,
            volume: 0.0,
            boardings: 0.0,
            alightings: 0.0,
        });
        entry.volume += record.volume;
        entry.boardings += record.boardings;
        entry.alightings += record.alightings;
    }
    sums.into_values().collect()
}

/// Guard used by the caller before loading the previous snapshot: past the
/// first iteration a missing snapshot must never be mistaken for a fresh
/// start.
pub fn require_previous(iteration: u32, path: &std::path::Path) -> Result<(), EngineError> {
    if iteration > 0 && !path.exists() {
        return Err(EngineError::MissingPreviousState {
            iteration,
            path: path.display().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(a: u32, b: u32, volume: f64) -> FlowRecord {
        FlowRecord {
            a,
            b,
            line: Some("30_IB".to_string()),
            seq: Some(1),
            volume,
            travel_time: 12.0,
            boardings: volume / 2.0,
            alightings: volume / 2.0,
        }
    }

    fn set(records: Vec<FlowRecord>) -> FlowSet {
        FlowSet::from_records(records).unwrap()
    }

    #[test]
    fn test_first_iteration_adopts_current_unchanged() {
        let current = set(vec![record(1, 2, 100.0), record(2, 3, 40.0)]);
        let state = ConvergenceState {
            iteration: 0,
            previous: None,
            current,
        };
        let outcome = smooth(&state, 0.01).unwrap();

        assert!(!outcome.converged);
        assert_eq!(outcome.delta_fraction, 0.0);
        assert_eq!(outcome.total_volume, 140.0);
        let smoothed = outcome.smoothed.get(&record(1, 2, 0.0).key()).unwrap();
        assert_eq!(smoothed.volume, 100.0);
    }

    #[test]
    fn test_iteration_zero_ignores_stray_previous_set() {
        // even with a previous set equal to the current one, iteration 0
        // adopts the current values and never reports convergence
        let previous = set(vec![record(1, 2, 100.0)]);
        let current = set(vec![record(1, 2, 100.0)]);
        let state = ConvergenceState {
            iteration: 0,
            previous: Some(previous),
            current,
        };
        let outcome = smooth(&state, 0.5).unwrap();

        assert!(!outcome.converged);
        assert_eq!(outcome.delta_fraction, 0.0);
        assert_eq!(outcome.new_links, 0);
        let smoothed = outcome.smoothed.get(&record(1, 2, 0.0).key()).unwrap();
        assert_eq!(smoothed.volume, 100.0);
    }

    #[test]
    fn test_delta_fraction_independent_of_insertion_order() {
        let forward = vec![record(1, 2, 300.0), record(2, 3, 100.0), record(5, 6, 7.5)];
        let mut reversed = forward.clone();
        reversed.reverse();
        let prev = vec![record(1, 2, 100.0), record(2, 3, 20.0), record(5, 6, 3.25)];

        let run = |current: Vec<FlowRecord>| {
            let state = ConvergenceState {
                iteration: 2,
                previous: Some(set(prev.clone())),
                current: set(current),
            };
            smooth(&state, 0.01).unwrap()
        };

        let a = run(forward);
        let b = run(reversed);
        assert_eq!(a.delta_fraction, b.delta_fraction);
        assert_eq!(a.total_volume, b.total_volume);
    }

    #[test]
    fn test_second_iteration_blends_half_and_half() {
        // iteration 0 volume 100, iteration 1 volume 200: lambda = 0.5,
        // smoothed = 150, delta fraction = |150 - 100| / 200 = 0.25
        let previous = set(vec![record(1, 2, 100.0)]);
        let current = set(vec![record(1, 2, 200.0)]);
        let state = ConvergenceState {
            iteration: 1,
            previous: Some(previous),
            current,
        };
        let outcome = smooth(&state, 0.3).unwrap();

        let smoothed = outcome.smoothed.get(&record(1, 2, 0.0).key()).unwrap();
        assert!((smoothed.volume - 150.0).abs() < 1e-9);
        assert!((outcome.delta_fraction - 0.25).abs() < 1e-9);
        assert!(outcome.converged);
    }

    #[test]
    fn test_boardings_blend_with_volume() {
        let previous = set(vec![record(1, 2, 100.0)]); // boardings 50
        let current = set(vec![record(1, 2, 200.0)]); // boardings 100
        let state = ConvergenceState {
            iteration: 1,
            previous: Some(previous),
            current,
        };
        let outcome = smooth(&state, 0.5).unwrap();
        let smoothed = outcome.smoothed.get(&record(1, 2, 0.0).key()).unwrap();
        assert!((smoothed.boardings - 75.0).abs() < 1e-9);
        assert!((smoothed.alightings - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_delta_fraction_shrinks_under_constant_input() {
        // Holding current constant, each pass moves the average closer and
        // the relative change strictly shrinks.
        let constant = vec![record(1, 2, 300.0), record(2, 3, 100.0)];
        let mut previous = set(vec![record(1, 2, 100.0), record(2, 3, 20.0)]);
        let mut last_delta = f64::INFINITY;

        for iteration in 1..6 {
            let state = ConvergenceState {
                iteration,
                previous: Some(previous),
                current: set(constant.clone()),
            };
            let outcome = smooth(&state, 0.0001).unwrap();
            assert!(outcome.delta_fraction < last_delta);
            last_delta = outcome.delta_fraction;
            previous = outcome.smoothed;
        }

        // converging toward the constant input from below
        let final_vol = previous.get(&record(1, 2, 0.0).key()).unwrap().volume;
        assert!(final_vol > 100.0 && final_vol < 300.0);
        assert!(last_delta < 0.2);
    }

    #[test]
    fn test_zero_volume_never_converges() {
        let previous = set(vec![record(1, 2, 0.0)]);
        let current = set(vec![record(1, 2, 0.0)]);
        let state = ConvergenceState {
            iteration: 3,
            previous: Some(previous),
            current,
        };
        let outcome = smooth(&state, 0.99).unwrap();
        assert_eq!(outcome.delta_fraction, 0.0);
        assert!(!outcome.converged);
    }

    #[test]
    fn test_new_link_adopted_not_fatal() {
        let previous = set(vec![record(1, 2, 100.0)]);
        let current = set(vec![record(1, 2, 100.0), record(9, 10, 60.0)]);
        let state = ConvergenceState {
            iteration: 2,
            previous: Some(previous),
            current,
        };
        let outcome = smooth(&state, 0.01).unwrap();
        assert_eq!(outcome.new_links, 1);
        let adopted = outcome.smoothed.get(&record(9, 10, 0.0).key()).unwrap();
        assert_eq!(adopted.volume, 60.0);
    }

    #[test]
    fn test_threshold_out_of_range_is_fatal() {
        let state = ConvergenceState {
            iteration: 0,
            previous: None,
            current: set(vec![record(1, 2, 10.0)]),
        };
        assert!(smooth(&state, 0.0).is_err());
        assert!(smooth(&state, 1.0).is_err());
        assert!(smooth(&state, -0.5).is_err());
    }

    #[test]
    fn test_empty_current_is_fatal() {
        let state = ConvergenceState {
            iteration: 0,
            previous: None,
            current: FlowSet::default(),
        };
        assert!(smooth(&state, 0.01).is_err());
    }

    #[test]
    fn test_require_previous_missing_is_fatal() {
        let path = std::path::Path::new("/nonexistent/snapshot.csv");
        assert!(require_previous(0, path).is_ok());
        let err = require_previous(3, path).unwrap_err();
        assert!(matches!(err, EngineError::MissingPreviousState { .. }));
    }

    #[test]
    fn test_link_sums_collapse_lines() {
        let mut r1 = record(1, 2, 100.0);
        let mut r2 = record(1, 2, 50.0);
        r2.line = Some("14_OB".to_string());
        r1.boardings = 10.0;
        r2.boardings = 5.0;
        let sums = link_sums(&set(vec![r1, r2, record(3, 4, 7.0)]));

        assert_eq!(sums.len(), 2);
        assert_eq!((sums[0].a, sums[0].b), (1, 2));
        assert_eq!(sums[0].volume, 150.0);
        assert_eq!(sums[0].boardings, 15.0);
        assert_eq!((sums[1].a, sums[1].b), (3, 4));
    }
}
