//! Tests for configuration parsing, validation and environment overrides

use std::collections::HashMap;
use std::io::Write;

use adaptive_dispatch::config::{
    apply_env_overrides, CapabilityConfig, DispatchConfig, DynamicConcurrencyConfig,
    EndpointConfig, MemoryConfig, PoolConfig, QueueConfig, SchedulerConfig,
};
use adaptive_dispatch::core::Strategy;

const MINIMAL: &str = r#"{
    "capabilities": {
        "inference": { "endpoints": [ { "url": "http://llm:8000" } ] }
    }
}"#;

fn minimal() -> DispatchConfig {
    DispatchConfig::from_json_str(MINIMAL).unwrap()
}

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults_applied_when_omitted() {
    let cfg = minimal();
    let inference = &cfg.capabilities["inference"];

    assert_eq!(inference.pool, PoolConfig::default());
    assert_eq!(inference.pool.strategy, Strategy::Priority);
    assert_eq!(inference.pool.timeout_ms, 600_000);
    assert_eq!(inference.pool.health_check_interval_ms, 30_000);
    assert_eq!(inference.queue, QueueConfig::default());
    assert_eq!(inference.queue.concurrency, 1);

    let endpoint = &inference.endpoints[0];
    assert!(endpoint.enabled);
    assert_eq!(endpoint.effective_id(), "http://llm:8000");

    assert_eq!(cfg.memory, MemoryConfig::default());
    assert_eq!(cfg.memory.threshold_bytes(), 4 * 1024 * 1024 * 1024);
    assert_eq!(cfg.scheduler, SchedulerConfig::default());
    assert_eq!(cfg.scheduler.max_attempts, 3);
    assert_eq!(cfg.scheduler.retry_delay_ms, 7_200_000);
}

#[test]
fn test_rejects_empty_configuration() {
    let err = DispatchConfig::from_json_str(r#"{ "capabilities": {} }"#).unwrap_err();
    assert!(err.contains("at least one capability"));
}

#[test]
fn test_rejects_malformed_json() {
    let err = DispatchConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_rejects_unknown_strategy() {
    let input = r#"{
        "capabilities": {
            "inference": {
                "pool": { "strategy": "random" },
                "endpoints": [ { "url": "http://llm:8000" } ]
            }
        }
    }"#;
    assert!(DispatchConfig::from_json_str(input).is_err());
}

#[test]
fn test_dynamic_bounds_validated() {
    let inverted = DynamicConcurrencyConfig {
        min: 5,
        max: 2,
        ..DynamicConcurrencyConfig::default()
    };
    assert!(inverted.validate().is_err());

    let zero_min = DynamicConcurrencyConfig {
        min: 0,
        ..DynamicConcurrencyConfig::default()
    };
    assert!(zero_min.validate().is_err());

    let bad_threshold = DynamicConcurrencyConfig {
        cpu_threshold: 1.5,
        ..DynamicConcurrencyConfig::default()
    };
    assert!(bad_threshold.validate().is_err());

    assert!(DynamicConcurrencyConfig::default().validate().is_ok());
}

#[test]
fn test_capability_validation() {
    let mut capability = CapabilityConfig {
        pool: PoolConfig::default(),
        endpoints: vec![EndpointConfig::new("http://a")],
        queue: QueueConfig::default(),
    };
    assert!(capability.validate().is_ok());

    capability.queue.concurrency = 0;
    assert!(capability.validate().is_err());

    capability.queue.concurrency = 1;
    capability.queue.max_pending = Some(0);
    assert!(capability.validate().is_err());

    capability.queue.max_pending = None;
    capability.endpoints.push(EndpointConfig::new(" "));
    let err = capability.validate().unwrap_err();
    assert!(err.contains("endpoint #1"));
}

#[test]
fn test_from_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(MINIMAL.as_bytes()).unwrap();

    let cfg = DispatchConfig::from_json_file(file.path()).unwrap();
    assert!(cfg.capabilities.contains_key("inference"));

    let err = DispatchConfig::from_json_file("/nonexistent/dispatch.json").unwrap_err();
    assert!(err.starts_with("cannot read"));
}

#[test]
fn test_env_overrides_global_keys() {
    let mut cfg = minimal();
    apply_env_overrides(
        &mut cfg,
        env(&[
            ("SCHED_INTERVAL", "5000"),
            ("SCHED_MAX_ATTEMPTS", "5"),
            ("SCHED_RETRY_DELAY", "60000"),
            ("QUEUE_MEM_THRESHOLD_GB", "2.5"),
            ("MEM_CHECK_INTERVAL", "250"),
        ]),
    )
    .unwrap();

    assert_eq!(cfg.scheduler.poll_interval_ms, 5_000);
    assert_eq!(cfg.scheduler.max_attempts, 5);
    assert_eq!(cfg.scheduler.retry_delay_ms, 60_000);
    assert!((cfg.memory.threshold_gb - 2.5).abs() < f64::EPSILON);
    assert_eq!(cfg.memory.check_interval_ms, 250);
}

#[test]
fn test_env_overrides_per_capability() {
    let mut cfg = minimal();
    apply_env_overrides(
        &mut cfg,
        env(&[
            ("INFERENCE_CONCURRENCY", "4"),
            ("INFERENCE_STRATEGY", "queue_length"),
            ("INFERENCE_TIMEOUT_MS", "30000"),
            ("INFERENCE_DYNAMIC", "true"),
        ]),
    )
    .unwrap();

    let inference = &cfg.capabilities["inference"];
    assert_eq!(inference.queue.concurrency, 4);
    assert_eq!(inference.pool.strategy, Strategy::QueueLength);
    assert_eq!(inference.pool.timeout_ms, 30_000);
    assert!(inference.queue.dynamic.is_some());

    apply_env_overrides(&mut cfg, env(&[("INFERENCE_DYNAMIC", "off")])).unwrap();
    assert!(cfg.capabilities["inference"].queue.dynamic.is_none());
}

#[test]
fn test_env_overrides_reject_bad_values() {
    let mut cfg = minimal();
    let err = apply_env_overrides(&mut cfg, env(&[("SCHED_MAX_ATTEMPTS", "many")])).unwrap_err();
    assert!(err.contains("SCHED_MAX_ATTEMPTS"));

    let err = apply_env_overrides(&mut cfg, env(&[("INFERENCE_CONCURRENCY", "0")])).unwrap_err();
    assert!(err.contains("concurrency"));

    let err = apply_env_overrides(&mut cfg, env(&[("INFERENCE_DYNAMIC", "maybe")])).unwrap_err();
    assert!(err.contains("boolean"));
}

#[test]
fn test_env_blank_values_are_ignored() {
    let mut cfg = minimal();
    apply_env_overrides(&mut cfg, env(&[("SCHED_INTERVAL", "  ")])).unwrap();
    assert_eq!(cfg.scheduler.poll_interval_ms, 30_000);
}
