//! Host metrics from `sysinfo`.

use parking_lot::Mutex;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

use crate::core::metrics::SystemMetrics;

/// Reads CPU load average and memory usage of the local host.
///
/// CPU load is the one-minute load average divided by the logical core count.
/// On platforms without a load average (Windows) it reads as 0.
pub struct SysinfoMetrics {
    system: Mutex<System>,
    cores: usize,
}

impl Default for SysinfoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoMetrics {
    /// Metrics source refreshing memory only.
    #[must_use]
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            system: Mutex::new(system),
            cores: num_cpus::get().max(1),
        }
    }
}

impl SystemMetrics for SysinfoMetrics {
    #[allow(clippy::cast_precision_loss)]
    fn cpu_load(&self) -> f64 {
        System::load_average().one / self.cores as f64
    }

    fn memory_used_bytes(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.used_memory()
    }

    fn memory_total_bytes(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.total_memory()
    }

    #[allow(clippy::cast_precision_loss)]
    fn memory_utilization(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        system.used_memory() as f64 / total as f64
    }
}
