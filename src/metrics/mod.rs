//! Reduction of a loaded link flow table to stratum-level metrics.
//!
//! Per-link volumes are bucketed into the finite domains of the reference
//! rate tables (non-recurring delay, collisions, emissions) and summed as
//! volume-weighted contributions, one output row per time period x vehicle
//! class.

pub mod buckets;
pub mod engine;
pub mod mapping;
pub mod rates;
pub mod types;
