//! Runtime wiring: dispatcher facade, background loops and API models.

pub mod api;
pub mod background;
pub mod dispatcher;

pub use api::{list_pools, CapabilityHealth, DispatchHealth, PoolSnapshot, TaskStatusResponse};
pub use background::BackgroundTasks;
pub use dispatcher::Dispatcher;
