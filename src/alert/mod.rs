pub mod classify;
pub mod risk;
pub mod sink;
pub mod thresholds;
