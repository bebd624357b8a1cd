//! Immutable rate table indexes, loaded once per run from the reference
//! lookup CSVs and filtered to a single scenario (`filter` keyword + year).
//!
//! A lookup miss after bucketing means either a malformed reference table or
//! a bucketing bug, so it is fatal rather than silently contributing zero.

use crate::error::EngineError;
use crate::metrics::buckets::{CollisionBucket, LaneBucket, SpeedBucket, VcRatioBucket};
use crate::model::{TimePeriod, VClassGroup};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

const FILTER_COL: &str = "filter";
const YEAR_COL: &str = "year";

/// Hours of non-recurring freeway delay per VMT, keyed by volume/capacity
/// ratio bucket and lane bucket. Source columns: `vcratio,2lanes,3lanes,4lanes`.
#[derive(Debug)]
pub struct DelayRates {
    rates: HashMap<(VcRatioBucket, LaneBucket), f64>,
}

impl DelayRates {
    pub fn from_path(path: &Path, filter: &str, year: i32) -> Result<DelayRates, EngineError> {
        let rates = Self::from_reader(File::open(path)?, filter, year)?;
        info!(path = %path.display(), rows = rates.rates.len(), "read non-recurring delay lookup");
        Ok(rates)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        filter: &str,
        year: i32,
    ) -> Result<DelayRates, EngineError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let header = Columns::from_headers(rdr.headers()?, "nonRecurringDelayLookup")?;
        let vcratio_idx = header.require("vcratio")?;
        let lane_cols: Vec<(LaneBucket, usize)> = [(2u32, "2lanes"), (3, "3lanes"), (4, "4lanes")]
            .iter()
            .map(|(lanes, col)| Ok((LaneBucket::from_lanes(*lanes), header.require(col)?)))
            .collect::<Result<_, EngineError>>()?;

        let mut rates = HashMap::new();
        for row in rdr.records() {
            let row = row?;
            if !header.matches_scenario(&row, filter, year) {
                continue;
            }
            let ratio: f64 = parse_field(&row, vcratio_idx, "vcratio")?;
            let vc = VcRatioBucket::from_ratio(ratio);
            for (lanes, idx) in &lane_cols {
                let rate: f64 = parse_field(&row, *idx, "delay rate")?;
                rates.insert((vc, *lanes), rate);
            }
        }
        if rates.is_empty() {
            return Err(EngineError::EmptyLookup {
                table: "nonRecurringDelayLookup",
                filter: filter.to_string(),
                year,
            });
        }
        Ok(DelayRates { rates })
    }

    pub fn lookup(&self, vc: VcRatioBucket, lanes: LaneBucket) -> Result<f64, EngineError> {
        self.rates
            .get(&(vc, lanes))
            .copied()
            .ok_or_else(|| EngineError::RateLookupMiss {
                table: "nonRecurringDelayLookup",
                key: format!("vcratio={} lanes={}", vc, lanes.lanes()),
            })
    }
}

/// Collision rates per 1,000,000 VMT, keyed by (facility, area) bucket, with
/// one named column per collision type (fatality/injury/property, by mode).
#[derive(Debug)]
pub struct CollisionRates {
    types: Vec<String>,
    rates: HashMap<CollisionBucket, Vec<f64>>,
}

impl CollisionRates {
    pub fn from_path(path: &Path, filter: &str, year: i32) -> Result<CollisionRates, EngineError> {
        let rates = Self::from_reader(File::open(path)?, filter, year)?;
        info!(path = %path.display(), rows = rates.rates.len(), types = rates.types.len(),
            "read collision lookup");
        Ok(rates)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        filter: &str,
        year: i32,
    ) -> Result<CollisionRates, EngineError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let header = Columns::from_headers(rdr.headers()?, "collisionLookup")?;
        let ft_idx = header.require("ft")?;
        let at_idx = header.require("at")?;
        let type_cols = header.value_columns(&["ft", "at"]);

        let mut rates = HashMap::new();
        for row in rdr.records() {
            let row = row?;
            if !header.matches_scenario(&row, filter, year) {
                continue;
            }
            // parsed at bucket width, so an out-of-range table value fails
            // instead of aliasing into another bucket
            let ft: u8 = parse_field(&row, ft_idx, "ft")?;
            let at: u8 = parse_field(&row, at_idx, "at")?;
            let values = parse_value_columns(&row, &type_cols)?;
            rates.insert(CollisionBucket { ft, at }, values);
        }
        if rates.is_empty() {
            return Err(EngineError::EmptyLookup {
                table: "collisionLookup",
                filter: filter.to_string(),
                year,
            });
        }
        Ok(CollisionRates {
            types: type_cols.into_iter().map(|(name, _)| name).collect(),
            rates,
        })
    }

    /// Column names in file order; summary output preserves this order.
    pub fn types(&self) -> &[String] {
        &self.types
    }

    pub fn lookup(&self, bucket: CollisionBucket) -> Result<&[f64], EngineError> {
        self.rates
            .get(&bucket)
            .map(|v| v.as_slice())
            .ok_or_else(|| EngineError::RateLookupMiss {
                table: "collisionLookup",
                key: format!("ft={} at={}", bucket.ft, bucket.at),
            })
    }
}

/// Emission rates in grams per mile (equivalently metric tons per 1,000,000
/// VMT), keyed by (period, vehicle class group, speed bucket).
#[derive(Debug)]
pub struct EmissionRates {
    types: Vec<String>,
    rates: HashMap<(TimePeriod, VClassGroup, SpeedBucket), Vec<f64>>,
}

impl EmissionRates {
    pub fn from_path(path: &Path, filter: &str, year: i32) -> Result<EmissionRates, EngineError> {
        let rates = Self::from_reader(File::open(path)?, filter, year)?;
        info!(path = %path.display(), rows = rates.rates.len(), types = rates.types.len(),
            "read emissions lookup");
        Ok(rates)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        filter: &str,
        year: i32,
    ) -> Result<EmissionRates, EngineError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let header = Columns::from_headers(rdr.headers()?, "emissionsLookup")?;
        let period_idx = header.require("period")?;
        let group_idx = header.require("vclassgroup")?;
        let speed_idx = header.require("speed")?;
        let type_cols = header.value_columns(&["period", "vclassgroup", "speed"]);

        let mut rates = HashMap::new();
        for row in rdr.records() {
            let row = row?;
            if !header.matches_scenario(&row, filter, year) {
                continue;
            }
            let period_code = row.get(period_idx).unwrap_or("");
            let period = TimePeriod::from_code(period_code).ok_or_else(|| {
                EngineError::validation(format!("unknown period {period_code:?} in emissionsLookup"))
            })?;
            let group = match row.get(group_idx).unwrap_or("") {
                "auto" => VClassGroup::Auto,
                "SM" => VClassGroup::SM,
                "HV" => VClassGroup::HV,
                other => {
                    return Err(EngineError::validation(format!(
                        "unknown vclassgroup {other:?} in emissionsLookup"
                    )));
                }
            };
            let speed: f64 = parse_field(&row, speed_idx, "speed")?;
            let values = parse_value_columns(&row, &type_cols)?;
            rates.insert((period, group, SpeedBucket::from_speed(speed)), values);
        }
        if rates.is_empty() {
            return Err(EngineError::EmptyLookup {
                table: "emissionsLookup",
                filter: filter.to_string(),
                year,
            });
        }
        Ok(EmissionRates {
            types: type_cols.into_iter().map(|(name, _)| name).collect(),
            rates,
        })
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }

    pub fn lookup(
        &self,
        period: TimePeriod,
        group: VClassGroup,
        speed: SpeedBucket,
    ) -> Result<&[f64], EngineError> {
        self.rates
            .get(&(period, group, speed))
            .map(|v| v.as_slice())
            .ok_or_else(|| EngineError::RateLookupMiss {
                table: "emissionsLookup",
                key: format!("period={} group={} speed={}", period, group.code(), speed.mph()),
            })
    }
}

/// Header bookkeeping shared by the three loaders: column indexes, the
/// scenario filter, and the residual named value columns.
struct Columns {
    table: &'static str,
    by_name: Vec<(String, usize)>,
    filter_idx: usize,
    year_idx: usize,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord, table: &'static str) -> Result<Columns, EngineError> {
        let by_name: Vec<(String, usize)> = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();
        let mut columns = Columns {
            table,
            by_name,
            filter_idx: 0,
            year_idx: 0,
        };
        columns.filter_idx = columns.require(FILTER_COL)?;
        columns.year_idx = columns.require(YEAR_COL)?;
        Ok(columns)
    }

    fn require(&self, name: &str) -> Result<usize, EngineError> {
        self.by_name
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, i)| *i)
            .ok_or_else(|| {
                EngineError::join(format!("{} is missing required column {name:?}", self.table))
            })
    }

    /// Named rate columns: everything except the key columns and the
    /// filter/year scenario columns, in file order.
    fn value_columns(&self, key_cols: &[&str]) -> Vec<(String, usize)> {
        self.by_name
            .iter()
            .filter(|(name, _)| {
                name != FILTER_COL && name != YEAR_COL && !key_cols.contains(&name.as_str())
            })
            .cloned()
            .collect()
    }

    fn matches_scenario(&self, row: &csv::StringRecord, filter: &str, year: i32) -> bool {
        row.get(self.filter_idx).map(str::trim) == Some(filter)
            && row
                .get(self.year_idx)
                .and_then(|y| y.trim().parse::<i32>().ok())
                == Some(year)
    }
}

fn parse_field<T: std::str::FromStr>(
    row: &csv::StringRecord,
    idx: usize,
    what: &str,
) -> Result<T, EngineError> {
    let raw = row.get(idx).unwrap_or("").trim();
    raw.parse()
        .map_err(|_| EngineError::validation(format!("unparseable {what} value {raw:?}")))
}

fn parse_value_columns(
    row: &csv::StringRecord,
    cols: &[(String, usize)],
) -> Result<Vec<f64>, EngineError> {
    cols.iter()
        .map(|(name, idx)| parse_field(row, *idx, name))
        .collect()
}
