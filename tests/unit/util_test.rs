//! Tests for utility functions

use std::time::Duration;

use adaptive_dispatch::util::{duration_ms, now_ms, Capability, OwnerKey};

#[test]
fn test_capability_names() {
    assert_eq!(Capability::inference().as_str(), "inference");
    assert_eq!(Capability::transcription().to_string(), "transcription");
    assert_eq!(Capability::from("ocr"), Capability::new("ocr"));
    assert!(Capability::inference() < Capability::transcription());
}

#[test]
fn test_capability_serializes_as_string() {
    let json = serde_json::to_string(&Capability::inference()).unwrap();
    assert_eq!(json, "\"inference\"");
    let back: Capability = serde_json::from_str("\"transcription\"").unwrap();
    assert_eq!(back, Capability::transcription());
}

#[test]
fn test_owner_key() {
    let key = OwnerKey::new("tenant1", "chat-42");
    assert_eq!(key.tenant, "tenant1");
    assert_eq!(key.recipient, "chat-42");
    assert_eq!(key.to_string(), "tenant1:chat-42");
}

#[test]
fn test_clock_helpers() {
    assert!(now_ms() > 1_600_000_000_000);
    assert_eq!(duration_ms(Duration::from_millis(1_250)), 1_250);
    assert_eq!(duration_ms(Duration::from_micros(999)), 0);
}
