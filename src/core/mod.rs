//! Core dispatch abstractions: endpoint pools, queue lanes, budgets and the
//! scheduled task state machine.

pub mod audit;
pub mod concurrency_queue;
pub mod dynamic_concurrency;
pub mod endpoint;
pub mod endpoint_pool;
pub mod error;
pub mod executor;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod scheduler;
pub mod task;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use concurrency_queue::{ConcurrencyQueue, LaneLimits, QueueStats, QueueTask};
pub use dynamic_concurrency::{Adjustment, BudgetSnapshot, ConcurrencyBudget, DynamicConcurrencyController};
pub use endpoint::{Endpoint, Strategy, FAILURE_THRESHOLD};
pub use endpoint_pool::{EndpointPool, EndpointStatus, HealthSummary, PoolStatus};
pub use error::DispatchError;
pub use executor::BackendExecutor;
pub use health::{HealthChecker, HealthProbe, HealthReport};
pub use metrics::SystemMetrics;
pub use registry::EndpointRegistry;
pub use scheduler::{DispatchOutcome, PollReport, TaskDelivery, TaskScheduler};
pub use task::{DueQuery, NewTask, ScheduledTask, TaskPatch, TaskStatus, TaskStore};
