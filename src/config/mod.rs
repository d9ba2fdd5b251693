//! Configuration models for capabilities, pools, queues and the scheduler.

pub mod dispatch;
pub mod env;

pub use dispatch::{
    CapabilityConfig, DispatchConfig, DynamicConcurrencyConfig, EndpointConfig, MemoryConfig,
    PoolConfig, QueueConfig, SchedulerConfig,
};
pub use env::{apply_env_overrides, CONFIG_PATH_VAR};
