//! Types for the stratum-level aggregation: the reporting stratum itself,
//! the per-stratum accumulator, and the finished summary row.

use crate::model::{TimePeriod, VehicleClass};
use serde::Serialize;
use std::collections::HashMap;

use crate::metrics::buckets::{CollisionBucket, LaneBucket, SpeedBucket, VcRatioBucket};
use crate::metrics::mapping::{AreaType, RoadType};

/// One reporting stratum: time period x vehicle class. Orders by period
/// first, then class, in their declared `ALL` orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Stratum {
    pub timeperiod: TimePeriod,
    pub vclass: VehicleClass,
}

/// Fully joined input row for the aggregation engine: one link's volume for
/// one stratum, with the static link attributes already attached.
#[derive(Debug, Clone)]
pub struct LinkFlow {
    pub a: u32,
    pub b: u32,
    pub timeperiod: TimePeriod,
    pub vclass: VehicleClass,
    pub volume: f64,
    /// Link length in miles.
    pub distance: f64,
    pub lanes: u32,
    pub area_type: u32,
    pub facility_type: u32,
    /// Congested travel time, minutes.
    pub congested_time: f64,
    /// Free-flow travel time, minutes.
    pub free_flow_time: f64,
    /// Congested speed, mph.
    pub congested_speed: f64,
    pub vc_ratio: f64,
}

/// Running totals for one stratum. VMT destined for a rate join is tallied
/// per bucket so the rates are applied once in the post-step.
#[derive(Debug, Default)]
pub struct Accumulator {
    pub vmt: f64,
    pub vht: f64,
    pub hypothetical_fft: f64,
    pub delay_vmt: HashMap<(VcRatioBucket, LaneBucket), f64>,
    pub collision_vmt: HashMap<CollisionBucket, f64>,
    pub emission_vmt: HashMap<SpeedBucket, f64>,
}

/// Finished output row for one stratum. `collisions` and `emissions` are
/// ordered exactly as the corresponding rate table's columns.
#[derive(Debug, Clone)]
pub struct StratumSummary {
    pub stratum: Stratum,
    pub vmt: f64,
    pub vht: f64,
    pub hypothetical_fft: f64,
    pub non_recurring_delay: f64,
    pub collisions: Vec<f64>,
    pub emissions: Vec<f64>,
}

/// Grouping key for the mapped re-aggregation: the stratum extended with the
/// road/area classification and the external mapping index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MappedStratum {
    pub timeperiod: TimePeriod,
    pub vclass: VehicleClass,
    pub road_type: RoadType,
    pub area_type: AreaType,
    pub index: i64,
}

/// Finished share-weighted output row for one mapped group.
#[derive(Debug, Clone)]
pub struct MappedSummary {
    pub stratum: MappedStratum,
    pub vmt: f64,
    pub vht: f64,
    pub hypothetical_fft: f64,
    pub non_recurring_delay: f64,
    pub collisions: Vec<f64>,
    pub emissions: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stratum_orders_by_period_then_class() {
        let am_da = Stratum {
            timeperiod: TimePeriod::AM,
            vclass: VehicleClass::DA,
        };
        let ea_hv = Stratum {
            timeperiod: TimePeriod::EA,
            vclass: VehicleClass::HV,
        };
        let am_s2 = Stratum {
            timeperiod: TimePeriod::AM,
            vclass: VehicleClass::S2,
        };
        assert!(ea_hv < am_da);
        assert!(am_da < am_s2);
    }
}
