//! Optional link mapping for re-aggregating metrics by an external index
//! (e.g. a link-to-TAZ correspondence), with road and area classification.
//!
//! A link may map to several index values with fractional shares; every
//! metric is multiplied by the share before grouping, so a link split
//! 0.5/0.5 across two zones contributes half its totals to each. Links
//! absent from the mapping are grouped under index -1 at full weight.

use crate::error::EngineError;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// Index assigned to links the mapping does not cover.
pub const UNMAPPED_INDEX: i64 = -1;

const UNMAPPED: &[(i64, f64)] = &[(UNMAPPED_INDEX, 1.0)];

/// Freeway/non-freeway split used by the mapped output. Broader than the
/// non-recurring delay predicate: expressways (ft 3) count as freeway here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoadType {
    Freeway,
    NonFreeway,
}

impl RoadType {
    pub fn from_facility_type(ft: u32) -> RoadType {
        if matches!(ft, 1 | 2 | 3 | 8) {
            RoadType::Freeway
        } else {
            RoadType::NonFreeway
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RoadType::Freeway => "freeway",
            RoadType::NonFreeway => "non-freeway",
        }
    }
}

/// Urban/suburban/rural split by area type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AreaType {
    Urban,
    Suburban,
    Rural,
    Unset,
}

impl AreaType {
    pub fn from_area_type(at: u32) -> AreaType {
        match at {
            0..=3 => AreaType::Urban,
            4 => AreaType::Suburban,
            5 => AreaType::Rural,
            _ => AreaType::Unset,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AreaType::Urban => "urban",
            AreaType::Suburban => "suburban",
            AreaType::Rural => "rural",
            AreaType::Unset => "unset",
        }
    }
}

/// Index shares per directed link. Loaded from a CSV with `A,B` link
/// columns plus caller-named index and share columns.
#[derive(Debug)]
pub struct LinkMapping {
    index_col: String,
    shares: HashMap<(u32, u32), Vec<(i64, f64)>>,
}

impl LinkMapping {
    pub fn from_path(path: &Path, index_col: &str, share_col: &str) -> Result<LinkMapping, EngineError> {
        let mapping = Self::from_reader(File::open(path)?, index_col, share_col)?;
        info!(path = %path.display(), links = mapping.shares.len(), index_col, "read link mapping");
        Ok(mapping)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        index_col: &str,
        share_col: &str,
    ) -> Result<LinkMapping, EngineError> {
        let mut rdr = csv::Reader::from_reader(reader);

        let columns: HashMap<String, usize> = rdr
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();
        let require = |name: &str| -> Result<usize, EngineError> {
            columns.get(name).copied().ok_or_else(|| {
                EngineError::join(format!("link mapping is missing column {name:?}"))
            })
        };

        let a_idx = require("A")?;
        let b_idx = require("B")?;
        let index_idx = require(index_col)?;
        let share_idx = require(share_col)?;

        let mut shares: HashMap<(u32, u32), Vec<(i64, f64)>> = HashMap::new();
        for row in rdr.records() {
            let row = row?;
            let get = |idx: usize, what: &str| -> Result<f64, EngineError> {
                let raw = row.get(idx).unwrap_or("").trim();
                raw.parse().map_err(|_| {
                    EngineError::validation(format!("unparseable {what} value {raw:?} in link mapping"))
                })
            };

            let a = get(a_idx, "A")? as u32;
            let b = get(b_idx, "B")? as u32;
            let index = get(index_idx, index_col)? as i64;
            let share = get(share_idx, share_col)?;
            if !share.is_finite() || share < 0.0 {
                return Err(EngineError::validation(format!(
                    "link mapping share for {a}-{b}: {share} (must be finite and non-negative)"
                )));
            }
            shares.entry((a, b)).or_default().push((index, share));
        }

        Ok(LinkMapping {
            index_col: index_col.to_string(),
            shares,
        })
    }

    /// Header name of the index column, echoed into the mapped output.
    pub fn index_col(&self) -> &str {
        &self.index_col
    }

    /// Shares for one directed link; unmapped links get the -1 sentinel at
    /// full weight.
    pub fn shares(&self, a: u32, b: u32) -> &[(i64, f64)] {
        self.shares
            .get(&(a, b))
            .map(Vec::as_slice)
            .unwrap_or(UNMAPPED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPPING_CSV: &str = "\
A,B,TAZ,share
1,2,10,0.25
1,2,20,0.75
3,4,10,1.0
";

    #[test]
    fn test_shares_split_across_indices() {
        let mapping = LinkMapping::from_reader(MAPPING_CSV.as_bytes(), "TAZ", "share").unwrap();
        assert_eq!(mapping.shares(1, 2), &[(10, 0.25), (20, 0.75)]);
        assert_eq!(mapping.shares(3, 4), &[(10, 1.0)]);
        assert_eq!(mapping.index_col(), "TAZ");
    }

    #[test]
    fn test_unmapped_link_falls_back_to_sentinel() {
        let mapping = LinkMapping::from_reader(MAPPING_CSV.as_bytes(), "TAZ", "share").unwrap();
        assert_eq!(mapping.shares(9, 9), &[(UNMAPPED_INDEX, 1.0)]);
    }

    #[test]
    fn test_negative_share_is_fatal() {
        let bad = "A,B,TAZ,share\n1,2,10,-0.5\n";
        let result = LinkMapping::from_reader(bad.as_bytes(), "TAZ", "share");
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_missing_index_column_is_fatal() {
        let result = LinkMapping::from_reader(MAPPING_CSV.as_bytes(), "ZONE", "share");
        assert!(matches!(result, Err(EngineError::StructuralJoin(_))));
    }

    #[test]
    fn test_road_type_counts_expressways_as_freeway() {
        assert_eq!(RoadType::from_facility_type(1), RoadType::Freeway);
        assert_eq!(RoadType::from_facility_type(2), RoadType::Freeway);
        assert_eq!(RoadType::from_facility_type(3), RoadType::Freeway);
        assert_eq!(RoadType::from_facility_type(8), RoadType::Freeway);
        assert_eq!(RoadType::from_facility_type(4), RoadType::NonFreeway);
        assert_eq!(RoadType::from_facility_type(6), RoadType::NonFreeway);
    }

    #[test]
    fn test_area_type_classification() {
        assert_eq!(AreaType::from_area_type(0), AreaType::Urban);
        assert_eq!(AreaType::from_area_type(3), AreaType::Urban);
        assert_eq!(AreaType::from_area_type(4), AreaType::Suburban);
        assert_eq!(AreaType::from_area_type(5), AreaType::Rural);
        assert_eq!(AreaType::from_area_type(9), AreaType::Unset);
    }
}
