//! Capability to pool registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::core::endpoint_pool::EndpointPool;
use crate::core::error::DispatchError;
use crate::util::serde::Capability;

/// Holds at most one [`EndpointPool`] per capability.
///
/// Pools are never reconfigured in place: a configuration change builds a new
/// pool and [`replace`](Self::replace)s the old one.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    pools: RwLock<HashMap<Capability, Arc<EndpointPool>>>,
}

impl EndpointRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool for a capability that has none yet.
    pub fn insert(&self, pool: EndpointPool) -> Result<Arc<EndpointPool>, DispatchError> {
        let capability = pool.capability().clone();
        let mut pools = self.pools.write();
        if pools.contains_key(&capability) {
            return Err(DispatchError::InvalidConfig(format!(
                "pool for capability `{capability}` already registered"
            )));
        }
        let pool = Arc::new(pool);
        pools.insert(capability, Arc::clone(&pool));
        Ok(pool)
    }

    /// Install `pool`, returning the pool it replaced, if any.
    pub fn replace(&self, pool: EndpointPool) -> Option<Arc<EndpointPool>> {
        let capability = pool.capability().clone();
        info!(capability = %capability, strategy = %pool.strategy(), "pool installed");
        self.pools.write().insert(capability, Arc::new(pool))
    }

    /// Pool for `capability`.
    pub fn get(&self, capability: &Capability) -> Result<Arc<EndpointPool>, DispatchError> {
        self.pools
            .read()
            .get(capability)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownCapability(capability.clone()))
    }

    /// Registered capabilities, sorted.
    #[must_use]
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps: Vec<Capability> = self.pools.read().keys().cloned().collect();
        caps.sort();
        caps
    }

    /// All registered pools, sorted by capability.
    #[must_use]
    pub fn pools(&self) -> Vec<Arc<EndpointPool>> {
        let mut pools: Vec<Arc<EndpointPool>> = self.pools.read().values().cloned().collect();
        pools.sort_by(|a, b| a.capability().cmp(b.capability()));
        pools
    }
}
