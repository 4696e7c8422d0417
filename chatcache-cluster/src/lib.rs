pub mod error;
pub mod maintenance;
pub mod state;

pub use error::{Error, Result};
pub use maintenance::{
    emergency_flush, Benchmark, BenchmarkReport, HealthJob, HealthReport, MaintenanceScheduler,
    ScrubReport, Scrubber,
};
pub use state::ConnectionStateStore;
