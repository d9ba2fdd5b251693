//! # Adaptive Dispatch
//!
//! An adaptive multi-backend dispatch layer for inference and transcription
//! workloads.
//!
//! Bursts of work (LLM completions, speech-to-text jobs, scheduled reminder
//! deliveries) are routed across several remote backend instances per
//! capability while respecting concurrency and memory limits, and failed or
//! delayed work is retried without operator intervention.
//!
//! ## Components
//!
//! - **`EndpointPool`**: one per capability. Selects a healthy endpoint by
//!   strategy (`priority`, `round_robin`, `queue_length`), runs each call
//!   under a timeout, retries the same endpoint up to its `max_retries` and
//!   then fails over. Three consecutive failures mark an endpoint unhealthy.
//! - **`HealthChecker`**: probes enabled endpoints on an interval and restores
//!   or retires them. Probe failures never reach callers.
//! - **`ConcurrencyQueue`**: per-capability FIFO lanes bounded by a
//!   `ConcurrencyBudget`. Under memory pressure new work is refused with
//!   `QueueSaturated` while running work completes.
//! - **`DynamicConcurrencyController`**: steps a lane's budget down when CPU
//!   or memory is over threshold and up when both are comfortably below.
//! - **`TaskScheduler`**: polls a durable `TaskStore` for due tasks, delivers
//!   them through the queue and the pool, and retries failures across polls
//!   until `max_attempts` is spent.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use adaptive_dispatch::builders::DispatcherBuilder;
//! use adaptive_dispatch::config::DispatchConfig;
//! use adaptive_dispatch::core::NewTask;
//! use adaptive_dispatch::infra::{FileTaskStore, SysinfoMetrics};
//! use adaptive_dispatch::util::{Capability, OwnerKey, now_ms};
//!
//! adaptive_dispatch::util::init_tracing();
//! let config = DispatchConfig::from_env()?;
//! let dispatcher = DispatcherBuilder::new(config)
//!     .with_store(Arc::new(FileTaskStore::open("./data", "tasks")?))
//!     .with_metrics(Arc::new(SysinfoMetrics::new()))
//!     .with_delivery(Arc::new(ReminderDelivery::default()))
//!     .build()?;
//! let background = dispatcher.start()?;
//!
//! let owner = OwnerKey::new("acme", "chat-42");
//! dispatcher
//!     .create_task(NewTask::new(owner, Capability::inference(), "standup", now_ms() + 60_000))
//!     .await?;
//!
//! let answer = dispatcher
//!     .submit_work(&Capability::inference(), &Completion, &prompt)
//!     .await?;
//!
//! background.shutdown().await;
//! ```
//!
//! For complete scenarios, see the integration tests under `tests/`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Endpoint pools, queue lanes, budgets and the scheduled task state machine.
pub mod core;
/// Configuration models and environment overrides.
pub mod config;
/// Builders to construct dispatch components from configuration.
pub mod builders;
/// Infrastructure adapters for task stores, metrics and probes.
pub mod infra;
/// Dispatcher facade, background loops and API models.
pub mod runtime;
/// Shared utilities.
pub mod util;
