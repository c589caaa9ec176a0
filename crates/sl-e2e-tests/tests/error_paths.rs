//! End-to-end tests for rejected, lost and throttled updates.

mod helpers;

use std::time::Duration;

use helpers::{Harness, SENSOR_SHADOW};
use serde_json::json;
use sl_agent::SyncError;
use sl_agent::shadow_sync::SyncConfig;
use sl_protocol::shadows::StateMap;

fn reading() -> StateMap {
    json!({"humidity": 30.1, "temperature": 27.2})
        .as_object()
        .cloned()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn e2e_throttled_update_is_retried() {
    let harness = Harness::new();
    harness.service.reject_next(429);
    harness.service.reject_next(503);

    let accepted = harness
        .sync
        .update(SENSOR_SHADOW, reading(), false)
        .await
        .unwrap();

    let attempts = harness.updates_to(SENSOR_SHADOW);
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|r| r.client_token == attempts[0].client_token));
    assert_eq!(accepted.client_token, Some(attempts[0].client_token.clone()));
}

#[tokio::test(start_paused = true)]
async fn e2e_malformed_update_is_not_retried() {
    let harness = Harness::new();
    harness.service.reject_next(400);

    let err = harness
        .sync
        .update(SENSOR_SHADOW, reading(), false)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::ShadowRejected { code: 400, .. }));
    assert_eq!(harness.updates_to(SENSOR_SHADOW).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn e2e_silent_service_times_out() {
    let harness = Harness::with_config(SyncConfig {
        max_attempts: 2,
        ..SyncConfig::default()
    });
    harness.service.set_silent(true);

    let err = harness
        .sync
        .update(SENSOR_SHADOW, reading(), false)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "response_timeout");
    assert_eq!(harness.updates_to(SENSOR_SHADOW).len(), 2);
    assert!(harness.sync.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn e2e_service_recovers_after_timeout() {
    let harness = Harness::new();
    harness.service.set_silent(true);

    let update = harness.sync.update(SENSOR_SHADOW, reading(), false);
    let recover = async {
        // First attempt times out at 10 s, the retry goes out 400-600 ms later.
        tokio::time::sleep(Duration::from_millis(10_200)).await;
        harness.service.set_silent(false);
    };
    let (result, ()) = tokio::join!(update, recover);

    assert!(result.is_ok());
    assert_eq!(harness.updates_to(SENSOR_SHADOW).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn e2e_transport_failure_is_retried() {
    let harness = Harness::new();
    harness.mqtt.fail_next_publishes(2);

    harness
        .sync
        .update(SENSOR_SHADOW, reading(), false)
        .await
        .unwrap();
    assert_eq!(harness.updates_to(SENSOR_SHADOW).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn e2e_in_flight_updates_are_bounded() {
    let harness = Harness::with_config(SyncConfig {
        max_in_flight: 2,
        ..SyncConfig::default()
    });
    harness.service.set_silent(true);

    let first = harness
        .sync
        .submit(SENSOR_SHADOW, reading(), false)
        .await
        .unwrap();
    let second = harness
        .sync
        .submit(SENSOR_SHADOW, reading(), false)
        .await
        .unwrap();

    let third = tokio::time::timeout(
        Duration::from_secs(1),
        harness.sync.submit(SENSOR_SHADOW, reading(), false),
    )
    .await;
    assert!(third.is_err());

    harness.service.set_silent(false);
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(harness.sync.available_slots(), 2);
}
