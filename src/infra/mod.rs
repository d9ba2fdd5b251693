//! Infrastructure adapters: task stores, host metrics and liveness probes.

pub mod metrics;
pub mod probe;
pub mod store;

pub use metrics::SysinfoMetrics;
pub use probe::HttpProbe;
pub use store::{FileTaskStore, InMemoryTaskStore};
