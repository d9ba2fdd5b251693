//! Tests for builder modules

use std::sync::Arc;

use adaptive_dispatch::builders::{build_budget, build_pool, build_queue, build_registry};
use adaptive_dispatch::config::{
    CapabilityConfig, DispatchConfig, DynamicConcurrencyConfig, EndpointConfig, PoolConfig,
    QueueConfig,
};
use adaptive_dispatch::core::{DispatchError, Strategy, SystemMetrics};
use adaptive_dispatch::util::Capability;

struct FullMemory;

impl SystemMetrics for FullMemory {
    fn cpu_load(&self) -> f64 {
        0.1
    }

    fn memory_used_bytes(&self) -> u64 {
        u64::MAX / 2
    }

    fn memory_total_bytes(&self) -> u64 {
        u64::MAX
    }
}

fn capability(strategy: Strategy, dynamic: Option<DynamicConcurrencyConfig>) -> CapabilityConfig {
    CapabilityConfig {
        pool: PoolConfig {
            strategy,
            ..PoolConfig::default()
        },
        endpoints: vec![
            EndpointConfig::new("http://a").with_id("a"),
            EndpointConfig::new("http://b").with_id("b").with_priority(2),
        ],
        queue: QueueConfig {
            concurrency: 3,
            dynamic,
            ..QueueConfig::default()
        },
    }
}

fn dispatch_config() -> DispatchConfig {
    let mut cfg: DispatchConfig = serde_json::from_value(serde_json::json!({
        "capabilities": {}
    }))
    .unwrap();
    cfg.capabilities
        .insert("inference".into(), capability(Strategy::QueueLength, None));
    cfg.capabilities.insert(
        "transcription".into(),
        capability(
            Strategy::RoundRobin,
            Some(DynamicConcurrencyConfig {
                min: 1,
                max: 2,
                ..DynamicConcurrencyConfig::default()
            }),
        ),
    );
    cfg
}

#[test]
fn test_build_pool_keeps_order_and_strategy() {
    let pool = build_pool("inference", &capability(Strategy::QueueLength, None)).unwrap();
    assert_eq!(pool.capability(), &Capability::inference());
    assert_eq!(pool.strategy(), Strategy::QueueLength);
    let ids: Vec<String> = pool.endpoints().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn test_build_budget_fixed_and_dynamic() {
    let fixed = build_budget("inference", &capability(Strategy::Priority, None)).unwrap();
    assert!(!fixed.is_dynamic());
    assert_eq!(fixed.current(), 3);

    let dynamic = build_budget(
        "inference",
        &capability(Strategy::Priority, Some(DynamicConcurrencyConfig::default())),
    )
    .unwrap();
    assert!(dynamic.is_dynamic());
    assert_eq!((dynamic.min(), dynamic.max(), dynamic.current()), (1, 10, 3));
}

#[test]
fn test_build_registry_and_queue() {
    let cfg = dispatch_config();
    let registry = build_registry(&cfg).unwrap();
    assert_eq!(
        registry.capabilities(),
        vec![Capability::inference(), Capability::transcription()]
    );

    let queue = build_queue(&cfg, None).unwrap();
    assert_eq!(queue.capabilities(), registry.capabilities());
    // Initial concurrency is clamped into the dynamic bounds.
    assert_eq!(queue.budget(&Capability::transcription()).unwrap().current(), 2);
    assert!(!queue.check_memory());
}

#[test]
fn test_build_queue_with_metrics() {
    let queue = build_queue(&dispatch_config(), Some(Arc::new(FullMemory))).unwrap();
    assert!(queue.check_memory());
}

#[test]
fn test_builders_validate_config() {
    let mut cfg = dispatch_config();
    cfg.scheduler.max_attempts = 0;
    assert!(matches!(build_registry(&cfg), Err(DispatchError::InvalidConfig(_))));
    assert!(matches!(build_queue(&cfg, None), Err(DispatchError::InvalidConfig(_))));
}
