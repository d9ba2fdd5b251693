//! Environment overrides for [`DispatchConfig`].
//!
//! Global keys: `SCHED_INTERVAL`, `SCHED_MAX_ATTEMPTS`, `SCHED_RETRY_DELAY`,
//! `SCHED_RETENTION`, `QUEUE_MEM_THRESHOLD_GB`, `MEM_CHECK_INTERVAL`.
//! Per capability (name uppercased): `<CAP>_CONCURRENCY`, `<CAP>_STRATEGY`,
//! `<CAP>_TIMEOUT_MS`, `<CAP>_DYNAMIC`.

use std::str::FromStr;

use super::dispatch::{DispatchConfig, DynamicConcurrencyConfig};

/// Environment variable naming the JSON configuration file.
pub const CONFIG_PATH_VAR: &str = "DISPATCH_CONFIG";

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("invalid value for {key} (`{raw}`): {e}"))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!("invalid value for {key} (`{raw}`): expected a boolean")),
    }
}

fn env_key(capability: &str, suffix: &str) -> String {
    let cap: String = capability
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{cap}_{suffix}")
}

/// Apply overrides read through `lookup` (usually `std::env::var(..).ok()`)
/// and re-validate. Invalid values are errors, never ignored.
pub fn apply_env_overrides<F>(config: &mut DispatchConfig, lookup: F) -> Result<(), String>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(raw) = get("SCHED_INTERVAL") {
        config.scheduler.poll_interval_ms = parse("SCHED_INTERVAL", &raw)?;
    }
    if let Some(raw) = get("SCHED_MAX_ATTEMPTS") {
        config.scheduler.max_attempts = parse("SCHED_MAX_ATTEMPTS", &raw)?;
    }
    if let Some(raw) = get("SCHED_RETRY_DELAY") {
        config.scheduler.retry_delay_ms = parse("SCHED_RETRY_DELAY", &raw)?;
    }
    if let Some(raw) = get("SCHED_RETENTION") {
        config.scheduler.retention_ms = Some(parse("SCHED_RETENTION", &raw)?);
    }
    if let Some(raw) = get("QUEUE_MEM_THRESHOLD_GB") {
        config.memory.threshold_gb = parse("QUEUE_MEM_THRESHOLD_GB", &raw)?;
    }
    if let Some(raw) = get("MEM_CHECK_INTERVAL") {
        config.memory.check_interval_ms = parse("MEM_CHECK_INTERVAL", &raw)?;
    }

    for (name, capability) in &mut config.capabilities {
        let key = env_key(name, "CONCURRENCY");
        if let Some(raw) = get(&key) {
            capability.queue.concurrency = parse(&key, &raw)?;
        }
        let key = env_key(name, "STRATEGY");
        if let Some(raw) = get(&key) {
            capability.pool.strategy = parse(&key, &raw)?;
        }
        let key = env_key(name, "TIMEOUT_MS");
        if let Some(raw) = get(&key) {
            capability.pool.timeout_ms = parse(&key, &raw)?;
        }
        let key = env_key(name, "DYNAMIC");
        if let Some(raw) = get(&key) {
            if parse_bool(&key, &raw)? {
                capability
                    .queue
                    .dynamic
                    .get_or_insert_with(DynamicConcurrencyConfig::default);
            } else {
                capability.queue.dynamic = None;
            }
        }
    }

    config.validate()
}

impl DispatchConfig {
    /// Load `.env`, read the JSON file named by `DISPATCH_CONFIG` and apply
    /// environment overrides.
    pub fn from_env() -> Result<Self, String> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        let path = std::env::var(CONFIG_PATH_VAR)
            .map_err(|_| format!("{CONFIG_PATH_VAR} is not set"))?;
        let mut config = Self::from_json_file(&path)?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }
}
