//! Readers that normalize the model's tabular exports into the engine's data
//! model.
//!
//! The loaded-network export is wide: one row per link, with one column per
//! (measure, time period) and per (volume, time period, vehicle class),
//! e.g. `cspdAM`, `vcAM`, `ctimAM`, `volAM_da`. It is melted here into one
//! [`LinkFlow`] row per link x period x class, with the static link
//! attributes (`distance,lanes,at,ft,fft`) attached to every row.

use crate::error::EngineError;
use crate::metrics::types::LinkFlow;
use crate::model::{FlowRecord, FlowSet, TimePeriod, VehicleClass};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// Reads a long-form flow CSV (transit link volumes or a smoothed snapshot).
pub fn read_flow_csv(path: &Path) -> Result<FlowSet, EngineError> {
    let mut rdr = csv::Reader::from_reader(File::open(path)?);
    let mut records = Vec::new();
    for row in rdr.deserialize() {
        let record: FlowRecord = row?;
        records.push(record);
    }
    let set = FlowSet::from_records(records)?;
    info!(path = %path.display(), links = set.len(), "read flow records");
    Ok(set)
}

/// Reads and melts the wide loaded-network export.
pub fn read_loaded_network(path: &Path) -> Result<Vec<LinkFlow>, EngineError> {
    let flows = melt_loaded_network(File::open(path)?)?;
    info!(path = %path.display(), rows = flows.len(), "melted loaded network");
    Ok(flows)
}

pub fn melt_loaded_network<R: Read>(reader: R) -> Result<Vec<LinkFlow>, EngineError> {
    let mut rdr = csv::Reader::from_reader(reader);

    let columns: HashMap<String, usize> = rdr
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim().to_string(), i))
        .collect();
    let require = |name: &str| -> Result<usize, EngineError> {
        columns.get(name).copied().ok_or_else(|| {
            EngineError::join(format!("loaded network is missing column {name:?}"))
        })
    };

    let a_idx = require("a")?;
    let b_idx = require("b")?;
    let distance_idx = require("distance")?;
    let lanes_idx = require("lanes")?;
    let at_idx = require("at")?;
    let ft_idx = require("ft")?;
    let fft_idx = require("fft")?;

    // per-period condition columns and per-period x class volume columns
    let mut period_cols = Vec::new();
    for tp in TimePeriod::ALL {
        let cspd = require(&format!("cspd{}", tp.code()))?;
        let vc = require(&format!("vc{}", tp.code()))?;
        let ctim = require(&format!("ctim{}", tp.code()))?;
        let mut vol_cols = Vec::new();
        for vclass in VehicleClass::ALL {
            vol_cols.push((vclass, require(&format!("vol{}_{}", tp.code(), vclass.code()))?));
        }
        period_cols.push((tp, cspd, vc, ctim, vol_cols));
    }

    let mut flows = Vec::new();
    for row in rdr.records() {
        let row = row?;
        let get = |idx: usize, what: &str| -> Result<f64, EngineError> {
            let raw = row.get(idx).unwrap_or("").trim();
            raw.parse().map_err(|_| {
                EngineError::validation(format!("unparseable {what} value {raw:?}"))
            })
        };

        let a = get(a_idx, "a")? as u32;
        let b = get(b_idx, "b")? as u32;
        let distance = get(distance_idx, "distance")?;
        let lanes = get(lanes_idx, "lanes")?.max(0.0) as u32;
        let area_type = get(at_idx, "at")?.max(0.0) as u32;
        let facility_type = get(ft_idx, "ft")?.max(0.0) as u32;
        let free_flow_time = get(fft_idx, "fft")?;

        for (tp, cspd_idx, vc_idx, ctim_idx, vol_cols) in &period_cols {
            let congested_speed = get(*cspd_idx, "cspd")?;
            let vc_ratio = get(*vc_idx, "vc")?;
            let congested_time = get(*ctim_idx, "ctim")?;
            for (vclass, vol_idx) in vol_cols {
                flows.push(LinkFlow {
                    a,
                    b,
                    timeperiod: *tp,
                    vclass: *vclass,
                    volume: get(*vol_idx, "vol")?,
                    distance,
                    lanes,
                    area_type,
                    facility_type,
                    congested_time,
                    free_flow_time,
                    congested_speed,
                    vc_ratio,
                });
            }
        }
    }

    Ok(flows)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Wide header for one link with every period x class column present.
    fn wide_csv(volumes: &str) -> String {
        let mut header = String::from("a,b,distance,lanes,at,ft,fft");
        for tp in TimePeriod::ALL {
            header.push_str(&format!(",cspd{0},vc{0},ctim{0}", tp.code()));
            for vclass in VehicleClass::ALL {
                header.push_str(&format!(",vol{}_{}", tp.code(), vclass.code()));
            }
        }
        format!("{header}\n{volumes}\n")
    }

    fn one_link_row() -> String {
        // link 1->2, 0.5 mi, 3 lanes, at 4, ft 2, fft 1.0 min
        let mut row = String::from("1,2,0.5,3,4,2,1.0");
        for (i, _tp) in TimePeriod::ALL.iter().enumerate() {
            row.push_str(&format!(",{},0.9,1.5", 30 + i));
            for (j, _vclass) in VehicleClass::ALL.iter().enumerate() {
                row.push_str(&format!(",{}", (i * 13 + j) as f64));
            }
        }
        row
    }

    #[test]
    fn test_melt_produces_period_by_class_rows() {
        let csv = wide_csv(&one_link_row());
        let flows = melt_loaded_network(csv.as_bytes()).unwrap();
        assert_eq!(flows.len(), TimePeriod::ALL.len() * VehicleClass::ALL.len());

        let ea_da = &flows[0];
        assert_eq!(ea_da.timeperiod, TimePeriod::EA);
        assert_eq!(ea_da.vclass, VehicleClass::DA);
        assert_eq!(ea_da.volume, 0.0);
        assert_eq!(ea_da.distance, 0.5);
        assert_eq!(ea_da.congested_speed, 30.0);

        let am_s2 = flows
            .iter()
            .find(|f| f.timeperiod == TimePeriod::AM && f.vclass == VehicleClass::S2)
            .unwrap();
        assert_eq!(am_s2.volume, 14.0); // period index 1, class index 1
        assert_eq!(am_s2.congested_speed, 31.0);
    }

    #[test]
    fn test_static_attributes_attached_to_every_row() {
        let csv = wide_csv(&one_link_row());
        let flows = melt_loaded_network(csv.as_bytes()).unwrap();
        assert!(flows.iter().all(|f| f.a == 1
            && f.b == 2
            && f.lanes == 3
            && f.area_type == 4
            && f.facility_type == 2
            && f.free_flow_time == 1.0));
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let csv = "a,b,distance\n1,2,0.5\n";
        let result = melt_loaded_network(csv.as_bytes());
        assert!(matches!(result, Err(EngineError::StructuralJoin(_))));
    }

    #[test]
    fn test_unparseable_cell_is_fatal() {
        let csv = wide_csv(&one_link_row().replace("0.5", "abc"));
        let result = melt_loaded_network(csv.as_bytes());
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }
}
