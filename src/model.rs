//! Core data model: link keys, flow records, and the categorical dimensions
//! (time period, vehicle class) that reports are broken out by.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Assignment time periods, in report output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimePeriod {
    EA,
    AM,
    MD,
    PM,
    EV,
}

impl TimePeriod {
    pub const ALL: [TimePeriod; 5] = [
        TimePeriod::EA,
        TimePeriod::AM,
        TimePeriod::MD,
        TimePeriod::PM,
        TimePeriod::EV,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            TimePeriod::EA => "EA",
            TimePeriod::AM => "AM",
            TimePeriod::MD => "MD",
            TimePeriod::PM => "PM",
            TimePeriod::EV => "EV",
        }
    }

    pub fn from_code(code: &str) -> Option<TimePeriod> {
        TimePeriod::ALL.iter().copied().find(|tp| tp.code() == code)
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The thirteen assigned vehicle classes, in report output order.
///
/// The suffixes follow the loaded-network volume columns: plain (free),
/// `t` (tolled), `av` (autonomous).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum VehicleClass {
    DA,
    S2,
    S3,
    SM,
    HV,
    DAT,
    S2T,
    S3T,
    SMT,
    HVT,
    DAAV,
    S2AV,
    S3AV,
}

/// Vehicle class groups used by the emissions rate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VClassGroup {
    Auto,
    SM,
    HV,
}

impl VClassGroup {
    /// Column value in the emissions lookup file.
    pub fn code(&self) -> &'static str {
        match self {
            VClassGroup::Auto => "auto",
            VClassGroup::SM => "SM",
            VClassGroup::HV => "HV",
        }
    }
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 13] = [
        VehicleClass::DA,
        VehicleClass::S2,
        VehicleClass::S3,
        VehicleClass::SM,
        VehicleClass::HV,
        VehicleClass::DAT,
        VehicleClass::S2T,
        VehicleClass::S3T,
        VehicleClass::SMT,
        VehicleClass::HVT,
        VehicleClass::DAAV,
        VehicleClass::S2AV,
        VehicleClass::S3AV,
    ];

    /// Lowercase code as it appears in volume column names (e.g. `volAM_da`).
    pub fn code(&self) -> &'static str {
        match self {
            VehicleClass::DA => "da",
            VehicleClass::S2 => "s2",
            VehicleClass::S3 => "s3",
            VehicleClass::SM => "sm",
            VehicleClass::HV => "hv",
            VehicleClass::DAT => "dat",
            VehicleClass::S2T => "s2t",
            VehicleClass::S3T => "s3t",
            VehicleClass::SMT => "smt",
            VehicleClass::HVT => "hvt",
            VehicleClass::DAAV => "daav",
            VehicleClass::S2AV => "s2av",
            VehicleClass::S3AV => "s3av",
        }
    }

    pub fn group(&self) -> VClassGroup {
        match self {
            VehicleClass::DA
            | VehicleClass::S2
            | VehicleClass::S3
            | VehicleClass::DAT
            | VehicleClass::S2T
            | VehicleClass::S3T
            | VehicleClass::DAAV
            | VehicleClass::S2AV
            | VehicleClass::S3AV => VClassGroup::Auto,
            VehicleClass::SM | VehicleClass::SMT => VClassGroup::SM,
            VehicleClass::HV | VehicleClass::HVT => VClassGroup::HV,
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Identifier of one directed network edge. Transit flows additionally carry
/// the serving line name and the link's sequence position along that line,
/// since several services may traverse the same physical edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkKey {
    pub a: u32,
    pub b: u32,
    pub line: Option<String>,
    pub seq: Option<u32>,
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.line, self.seq) {
            (Some(line), Some(seq)) => write!(f, "{}_{}_{}_{}", self.a, self.b, line, seq),
            (Some(line), None) => write!(f, "{}_{}_{}", self.a, self.b, line),
            _ => write!(f, "{}_{}", self.a, self.b),
        }
    }
}

/// One link's flow state for one iteration. Serialized directly as a row of
/// the smoothed-snapshot CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    pub a: u32,
    pub b: u32,
    pub line: Option<String>,
    pub seq: Option<u32>,
    pub volume: f64,
    pub travel_time: f64,
    pub boardings: f64,
    pub alightings: f64,
}

impl FlowRecord {
    pub fn key(&self) -> LinkKey {
        LinkKey {
            a: self.a,
            b: self.b,
            line: self.line.clone(),
            seq: self.seq,
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        for (name, value) in [
            ("volume", self.volume),
            ("travel_time", self.travel_time),
            ("boardings", self.boardings),
            ("alightings", self.alightings),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::validation(format!(
                    "link {}: {} = {} (must be finite and non-negative)",
                    self.key(),
                    name,
                    value
                )));
            }
        }
        Ok(())
    }
}

/// A set of flow records with unique link keys.
#[derive(Debug, Clone, Default)]
pub struct FlowSet {
    records: HashMap<LinkKey, FlowRecord>,
}

impl FlowSet {
    /// Builds a set from raw records, rejecting negative values and
    /// duplicate keys.
    pub fn from_records(records: Vec<FlowRecord>) -> Result<FlowSet, EngineError> {
        let mut map = HashMap::with_capacity(records.len());
        for record in records {
            record.validate()?;
            let key = record.key();
            if map.insert(key.clone(), record).is_some() {
                return Err(EngineError::validation(format!(
                    "duplicate link key {key} in flow set"
                )));
            }
        }
        Ok(FlowSet { records: map })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &LinkKey) -> Option<&FlowRecord> {
        self.records.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LinkKey, &FlowRecord)> {
        self.records.iter()
    }

    /// Records in key order, for deterministic serialization.
    pub fn sorted_records(&self) -> Vec<&FlowRecord> {
        let mut keys: Vec<&LinkKey> = self.records.keys().collect();
        keys.sort();
        keys.into_iter().map(|k| &self.records[k]).collect()
    }

    pub fn total_volume(&self) -> f64 {
        self.records.values().map(|r| r.volume).sum()
    }
}
