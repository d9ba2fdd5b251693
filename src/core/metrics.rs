//! System load source consumed by admission control and dynamic concurrency.

/// Current CPU and memory readings.
///
/// Implementations refresh on every call; readers never cache values.
pub trait SystemMetrics: Send + Sync {
    /// CPU load normalized to the core count (1.0 means every core busy).
    fn cpu_load(&self) -> f64;

    /// Memory in use, in bytes.
    fn memory_used_bytes(&self) -> u64;

    /// Total physical memory, in bytes.
    fn memory_total_bytes(&self) -> u64;

    /// Fraction of memory in use, 0.0 when the total is unknown.
    #[allow(clippy::cast_precision_loss)]
    fn memory_utilization(&self) -> f64 {
        let total = self.memory_total_bytes();
        if total == 0 {
            return 0.0;
        }
        self.memory_used_bytes() as f64 / total as f64
    }
}
