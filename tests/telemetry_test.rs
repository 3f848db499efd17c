//! Integration tests for telemetry initialization and span helpers.

use uuid::Uuid;

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber may already be set by another test in this
    // process; try_init() makes that an Err rather than a panic.
    let config = outbox_rs::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "outbox-test".to_string(),
        log_level: "debug".to_string(),
    };
    let _guard = outbox_rs::telemetry::init_telemetry(config);
}

#[test]
fn relay_span_creates_and_records_transition() {
    let id = Uuid::new_v4();
    let span = outbox_rs::telemetry::relay::start_relay_span("NotificationService", "send", &id);
    outbox_rs::telemetry::relay::record_state_transition(&span, "pending", "locked");
    outbox_rs::telemetry::relay::record_state_transition(&span, "locked", "success");
}

#[test]
fn metric_instruments_build_without_a_provider() {
    use opentelemetry::KeyValue;

    outbox_rs::telemetry::metrics::claims().add(1, &[KeyValue::new("result", "lost")]);
    outbox_rs::telemetry::metrics::invocation_duration_ms()
        .record(1.0, &[KeyValue::new("target", "NotificationService")]);
}
