pub mod convergence;
pub mod error;
pub mod metrics;
pub mod model;
pub mod output;
pub mod parser;
