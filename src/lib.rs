pub mod alert;
pub mod analysis;
pub mod config;
pub mod hazards;
pub mod inference;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod scheduler;
pub mod training;
pub mod verify;
