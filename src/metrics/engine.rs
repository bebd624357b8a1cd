//! The aggregation pass: link flows in, one dense summary row per stratum out.

use crate::error::EngineError;
use crate::metrics::buckets::{
    CollisionBucket, LaneBucket, RATE_DENOMINATOR, SpeedBucket, VcRatioBucket, is_freeway,
};
use crate::metrics::mapping::{AreaType, LinkMapping, RoadType};
use crate::metrics::rates::{CollisionRates, DelayRates, EmissionRates};
use crate::metrics::types::{Accumulator, LinkFlow, MappedStratum, MappedSummary, Stratum, StratumSummary};
use itertools::iproduct;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::model::{TimePeriod, VehicleClass};

/// Reduces a link flow table to one [`StratumSummary`] per time period x
/// vehicle class.
///
/// Every stratum in the cartesian space gets a zero-initialized accumulator
/// before any record is read, so the output is always dense: exactly
/// `TimePeriod::ALL.len() * VehicleClass::ALL.len()` rows in a fixed order,
/// regardless of which combinations carry volume.
///
/// Minutes-denominated travel times are normalized to hours; collision and
/// emission quantities are divided through by the tables' fixed 1,000,000
/// VMT denominator.
pub fn aggregate(
    flows: &[LinkFlow],
    delay: &DelayRates,
    collisions: &CollisionRates,
    emissions: Option<&EmissionRates>,
) -> Result<Vec<StratumSummary>, EngineError> {
    // dense pre-initialization, before any record is tallied
    let mut accumulators: BTreeMap<Stratum, Accumulator> =
        iproduct!(TimePeriod::ALL, VehicleClass::ALL)
            .map(|(timeperiod, vclass)| {
                (
                    Stratum {
                        timeperiod,
                        vclass,
                    },
                    Accumulator::default(),
                )
            })
            .collect();

    for flow in flows {
        validate_flow(flow)?;
        let stratum = Stratum {
            timeperiod: flow.timeperiod,
            vclass: flow.vclass,
        };
        let acc = accumulators.entry(stratum).or_default();

        let vmt = flow.volume * flow.distance;
        acc.vmt += vmt;
        acc.vht += flow.volume * flow.congested_time / 60.0;
        acc.hypothetical_fft += flow.volume * flow.free_flow_time / 60.0;

        // zero-VMT rows contribute nothing to the rate joins; skip them so
        // they cannot force lookups outside the tables' populated domain
        if vmt == 0.0 {
            continue;
        }

        // non-recurring delay applies to freeway links only
        if is_freeway(flow.facility_type) {
            let bucket = (
                VcRatioBucket::from_ratio(flow.vc_ratio),
                LaneBucket::from_lanes(flow.lanes),
            );
            *acc.delay_vmt.entry(bucket).or_default() += vmt;
        }

        // dummy links and zero-lane links skip the collision join but still
        // count toward VMT/VHT above
        if let Some(bucket) = CollisionBucket::from_link(flow.facility_type, flow.area_type, flow.lanes)
        {
            *acc.collision_vmt.entry(bucket).or_default() += vmt;
        }

        if emissions.is_some() {
            let bucket = SpeedBucket::from_speed(flow.congested_speed);
            *acc.emission_vmt.entry(bucket).or_default() += vmt;
        }
    }

    debug!(flows = flows.len(), strata = accumulators.len(), "accumulation complete");

    let mut summaries = Vec::with_capacity(accumulators.len());
    for (stratum, acc) in accumulators {
        summaries.push(finalize(stratum, acc, delay, collisions, emissions)?);
    }

    info!(rows = summaries.len(), "aggregated stratum summaries");
    Ok(summaries)
}

/// Applies the rate joins to one stratum's bucketed VMT totals.
fn finalize(
    stratum: Stratum,
    acc: Accumulator,
    delay: &DelayRates,
    collisions: &CollisionRates,
    emissions: Option<&EmissionRates>,
) -> Result<StratumSummary, EngineError> {
    let mut non_recurring_delay = 0.0;
    // BTreeMap-style determinism: stable order over float sums
    let mut delay_buckets: Vec<_> = acc.delay_vmt.into_iter().collect();
    delay_buckets.sort_by_key(|(bucket, _)| *bucket);
    for ((vc, lanes), vmt) in delay_buckets {
        non_recurring_delay += vmt * delay.lookup(vc, lanes)?;
    }

    let mut collision_totals = vec![0.0; collisions.types().len()];
    let mut collision_buckets: Vec<_> = acc.collision_vmt.into_iter().collect();
    collision_buckets.sort_by_key(|(bucket, _)| *bucket);
    for (bucket, vmt) in collision_buckets {
        let rates = collisions.lookup(bucket)?;
        for (total, rate) in collision_totals.iter_mut().zip(rates) {
            *total += vmt * rate / RATE_DENOMINATOR;
        }
    }

    let mut emission_totals = Vec::new();
    if let Some(emissions) = emissions {
        emission_totals = vec![0.0; emissions.types().len()];
        let mut emission_buckets: Vec<_> = acc.emission_vmt.into_iter().collect();
        emission_buckets.sort_by_key(|(bucket, _)| *bucket);
        for (speed, vmt) in emission_buckets {
            let rates = emissions.lookup(stratum.timeperiod, stratum.vclass.group(), speed)?;
            for (total, rate) in emission_totals.iter_mut().zip(rates) {
                *total += vmt * rate / RATE_DENOMINATOR;
            }
        }
    }

    Ok(StratumSummary {
        stratum,
        vmt: acc.vmt,
        vht: acc.vht,
        hypothetical_fft: acc.hypothetical_fft,
        non_recurring_delay,
        collisions: collision_totals,
        emissions: emission_totals,
    })
}

/// Share-weighted re-aggregation of per-link metrics by an external link
/// mapping, grouped by stratum x road type x area type x mapping index.
///
/// Unlike [`aggregate`], the output is sparse (only groups that appear in
/// the input are emitted) and the rate quantities are applied per link row
/// before the share split, so a link mapped 0.5/0.5 contributes half of its
/// delay, collisions, and emissions to each group.
pub fn aggregate_mapped(
    flows: &[LinkFlow],
    mapping: &LinkMapping,
    delay: &DelayRates,
    collisions: &CollisionRates,
    emissions: Option<&EmissionRates>,
) -> Result<Vec<MappedSummary>, EngineError> {
    let collision_len = collisions.types().len();
    let emission_len = emissions.map(|e| e.types().len()).unwrap_or(0);

    let mut groups: BTreeMap<MappedStratum, MappedTotals> = BTreeMap::new();

    for flow in flows {
        validate_flow(flow)?;

        let vmt = flow.volume * flow.distance;
        let vht = flow.volume * flow.congested_time / 60.0;
        let hypothetical_fft = flow.volume * flow.free_flow_time / 60.0;

        let mut non_recurring_delay = 0.0;
        let mut collision_row = vec![0.0; collision_len];
        let mut emission_row = vec![0.0; emission_len];
        if vmt > 0.0 {
            if is_freeway(flow.facility_type) {
                let rate = delay.lookup(
                    VcRatioBucket::from_ratio(flow.vc_ratio),
                    LaneBucket::from_lanes(flow.lanes),
                )?;
                non_recurring_delay = vmt * rate;
            }
            if let Some(bucket) =
                CollisionBucket::from_link(flow.facility_type, flow.area_type, flow.lanes)
            {
                for (slot, rate) in collision_row.iter_mut().zip(collisions.lookup(bucket)?) {
                    *slot = vmt * rate / RATE_DENOMINATOR;
                }
            }
            if let Some(emissions) = emissions {
                let rates = emissions.lookup(
                    flow.timeperiod,
                    flow.vclass.group(),
                    SpeedBucket::from_speed(flow.congested_speed),
                )?;
                for (slot, rate) in emission_row.iter_mut().zip(rates) {
                    *slot = vmt * rate / RATE_DENOMINATOR;
                }
            }
        }

        for &(index, share) in mapping.shares(flow.a, flow.b) {
            let stratum = MappedStratum {
                timeperiod: flow.timeperiod,
                vclass: flow.vclass,
                road_type: RoadType::from_facility_type(flow.facility_type),
                area_type: AreaType::from_area_type(flow.area_type),
                index,
            };
            let totals = groups
                .entry(stratum)
                .or_insert_with(|| MappedTotals::new(collision_len, emission_len));
            totals.vmt += share * vmt;
            totals.vht += share * vht;
            totals.hypothetical_fft += share * hypothetical_fft;
            totals.non_recurring_delay += share * non_recurring_delay;
            for (total, value) in totals.collisions.iter_mut().zip(&collision_row) {
                *total += share * value;
            }
            for (total, value) in totals.emissions.iter_mut().zip(&emission_row) {
                *total += share * value;
            }
        }
    }

    let summaries: Vec<MappedSummary> = groups
        .into_iter()
        .map(|(stratum, totals)| MappedSummary {
            stratum,
            vmt: totals.vmt,
            vht: totals.vht,
            hypothetical_fft: totals.hypothetical_fft,
            non_recurring_delay: totals.non_recurring_delay,
            collisions: totals.collisions,
            emissions: totals.emissions,
        })
        .collect();

    info!(rows = summaries.len(), "aggregated mapped summaries");
    Ok(summaries)
}

struct MappedTotals {
    vmt: f64,
    vht: f64,
    hypothetical_fft: f64,
    non_recurring_delay: f64,
    collisions: Vec<f64>,
    emissions: Vec<f64>,
}

impl MappedTotals {
    fn new(collision_len: usize, emission_len: usize) -> MappedTotals {
        MappedTotals {
            vmt: 0.0,
            vht: 0.0,
            hypothetical_fft: 0.0,
            non_recurring_delay: 0.0,
            collisions: vec![0.0; collision_len],
            emissions: vec![0.0; emission_len],
        }
    }
}

fn validate_flow(flow: &LinkFlow) -> Result<(), EngineError> {
    for (name, value) in [
        ("volume", flow.volume),
        ("distance", flow.distance),
        ("congested_time", flow.congested_time),
        ("free_flow_time", flow.free_flow_time),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::validation(format!(
                "link {}-{} {} {}: {} = {} (must be finite and non-negative)",
                flow.a, flow.b, flow.timeperiod, flow.vclass, name, value
            )));
        }
    }
    Ok(())
}
