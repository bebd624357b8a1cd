//! Typed buckets mapping continuous link attributes onto the finite domains
//! of the reference rate tables.
//!
//! The rate tables are only populated over a bounded range, so out-of-range
//! values are clamped to the nearest boundary bucket rather than failing the
//! lookup. Links the tables deliberately do not cover (dummy links, links
//! with no lanes) are excluded from that join entirely while still counting
//! toward plain VMT/VHT.

use std::fmt;

/// Reference rates are expressed per this many VMT.
pub const RATE_DENOMINATOR: f64 = 1_000_000.0;

const LANES_MIN: u32 = 2;
const LANES_MAX: u32 = 4;
const SPEED_MAX: f64 = 65.0;
const COLLISION_FT_MAX: u32 = 4;
const COLLISION_AT_MIN: u32 = 4;
/// Facility type of dummy/centroid-connector links.
const FT_DUMMY: u32 = 6;

/// Volume/capacity ratio clamped to [0, 1], stored in hundredths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VcRatioBucket(u8);

impl VcRatioBucket {
    pub fn from_ratio(ratio: f64) -> VcRatioBucket {
        let clamped = ratio.clamp(0.0, 1.0);
        VcRatioBucket((clamped * 100.0).round() as u8)
    }

    /// The two-decimal label used in the delay lookup file, e.g. "0.85".
    pub fn label(&self) -> String {
        format!("{:.2}", self.0 as f64 / 100.0)
    }
}

impl fmt::Display for VcRatioBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Lane count clamped to the [2, 4] domain of the delay lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LaneBucket(u8);

impl LaneBucket {
    pub fn from_lanes(lanes: u32) -> LaneBucket {
        LaneBucket(lanes.clamp(LANES_MIN, LANES_MAX) as u8)
    }

    pub fn lanes(&self) -> u32 {
        self.0 as u32
    }
}

/// Congested speed truncated to whole mph and capped at 65, the top of the
/// emissions lookup domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpeedBucket(u8);

impl SpeedBucket {
    pub fn from_speed(speed: f64) -> SpeedBucket {
        SpeedBucket(speed.clamp(0.0, SPEED_MAX).trunc() as u8)
    }

    pub fn mph(&self) -> u32 {
        self.0 as u32
    }
}

/// Collision lookup key: facility type folded into [2, 4] with freeway
/// connectors (ft 1) and managed freeways (ft 8) treated as freeway (ft 2),
/// and area type floored at 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollisionBucket {
    pub ft: u8,
    pub at: u8,
}

impl CollisionBucket {
    /// Returns `None` for links the collision tables deliberately exclude:
    /// dummy links and links with no travel lanes.
    pub fn from_link(ft: u32, at: u32, lanes: u32) -> Option<CollisionBucket> {
        if ft == FT_DUMMY || lanes == 0 {
            return None;
        }
        let ft = match ft {
            1 | 8 => 2,
            other => other.min(COLLISION_FT_MAX),
        };
        let at = at.max(COLLISION_AT_MIN);
        Some(CollisionBucket {
            ft: ft as u8,
            at: at as u8,
        })
    }
}

/// Non-recurring delay applies only to freeway facility types.
pub fn is_freeway(ft: u32) -> bool {
    matches!(ft, 1 | 2 | 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vc_ratio_clamped_to_unit_interval() {
        assert_eq!(VcRatioBucket::from_ratio(1.37), VcRatioBucket::from_ratio(1.0));
        assert_eq!(VcRatioBucket::from_ratio(-0.2), VcRatioBucket::from_ratio(0.0));
        assert_eq!(VcRatioBucket::from_ratio(1.0).label(), "1.00");
    }

    #[test]
    fn test_vc_ratio_rounds_to_hundredths() {
        assert_eq!(VcRatioBucket::from_ratio(0.854).label(), "0.85");
        assert_eq!(VcRatioBucket::from_ratio(0.856).label(), "0.86");
        assert_eq!(VcRatioBucket::from_ratio(0.0).label(), "0.00");
    }

    #[test]
    fn test_lane_bucket_clamped() {
        assert_eq!(LaneBucket::from_lanes(1).lanes(), 2);
        assert_eq!(LaneBucket::from_lanes(3).lanes(), 3);
        assert_eq!(LaneBucket::from_lanes(9).lanes(), 4);
    }

    #[test]
    fn test_speed_bucket_truncates_and_caps() {
        assert_eq!(SpeedBucket::from_speed(34.9).mph(), 34);
        assert_eq!(SpeedBucket::from_speed(72.0).mph(), 65);
        assert_eq!(SpeedBucket::from_speed(-3.0).mph(), 0);
    }

    #[test]
    fn test_collision_bucket_freeway_folding() {
        // freeway-to-freeway connector and managed freeway count as freeway
        assert_eq!(
            CollisionBucket::from_link(1, 4, 2),
            Some(CollisionBucket { ft: 2, at: 4 })
        );
        assert_eq!(
            CollisionBucket::from_link(8, 5, 2),
            Some(CollisionBucket { ft: 2, at: 5 })
        );
    }

    #[test]
    fn test_collision_bucket_caps() {
        assert_eq!(
            CollisionBucket::from_link(7, 2, 2),
            Some(CollisionBucket { ft: 4, at: 4 })
        );
    }

    #[test]
    fn test_collision_bucket_excludes_dummy_and_zero_lane_links() {
        assert_eq!(CollisionBucket::from_link(6, 4, 2), None);
        assert_eq!(CollisionBucket::from_link(3, 4, 0), None);
    }

    #[test]
    fn test_is_freeway() {
        assert!(is_freeway(1));
        assert!(is_freeway(2));
        assert!(is_freeway(8));
        assert!(!is_freeway(3));
        assert!(!is_freeway(6));
    }
}
