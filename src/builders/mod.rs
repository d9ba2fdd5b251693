//! Builders wiring configuration into runnable components.

pub mod dispatcher_builder;

pub use dispatcher_builder::{build_budget, build_pool, build_queue, build_registry, DispatcherBuilder};
