// Batch pipeline: trial workers, audit writer and run artifacts

pub mod audit;
pub mod finalize;
pub mod orchestrator;
pub mod types;
pub mod worker;
