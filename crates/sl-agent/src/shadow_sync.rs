//! Shadow synchronizer: correlated, retried shadow updates.
//!
//! Every update carries a client token. The token is registered in the
//! pending table before the request is published, and the event loop
//! completes the entry when `update/accepted` or `update/rejected` echoes
//! it back. Each registered entry holds an in-flight permit, so the number
//! of outstanding updates is bounded by `max_in_flight`.
//!
//! Deltas reach the synchronizer through [`run_delta_worker`], never on the
//! event loop itself: applying a delta waits for an accept response that
//! only the event loop can deliver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use sl_device::{Actuator, DeviceError};
use sl_mqtt_channel::{Channel, ShadowClient};
use sl_protocol::shadows::{
    DeltaEvent, ErrorResponse, ShadowState, StateMap, UpdateAccepted, UpdateRequest,
    new_client_token,
};
use sl_protocol::{SensorReading, WarningPayload};

use crate::error::{SyncError, SyncResult};

/// `[sync]` section of the agent configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncConfig {
    /// How long an update waits for `accepted` / `rejected`.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
    /// Upper bound on updates awaiting a response.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Attempts per update, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    /// Deltas buffered between the event loop and the delta worker.
    #[serde(default = "default_delta_queue")]
    pub delta_queue_capacity: usize,
}

fn default_response_timeout() -> u64 {
    10
}

fn default_max_in_flight() -> usize {
    8
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_delta_queue() -> usize {
    32
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_response_timeout(),
            max_in_flight: default_max_in_flight(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            delta_queue_capacity: default_delta_queue(),
        }
    }
}

impl SyncConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

// ── Retry policy ──────────────────────────────────────────────

/// Exponential backoff between update attempts: the delay doubles after
/// each failure up to `max`, with `±jitter` randomization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            max_attempts: config.max_attempts,
            jitter: 0.2,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based), before jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exponent).min(self.max)
    }

    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        delay.mul_f64(factor)
    }
}

// ── Pending table ─────────────────────────────────────────────

type Completion = SyncResult<UpdateAccepted>;

struct Pending {
    shadow: String,
    sent_at: Instant,
    tx: oneshot::Sender<Completion>,
    _permit: OwnedSemaphorePermit,
}

/// Updates awaiting a response, keyed by client token.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, Pending>>,
}

impl PendingTable {
    fn insert(
        &self,
        token: &str,
        shadow: &str,
        permit: OwnedSemaphorePermit,
    ) -> oneshot::Receiver<Completion> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(
            token.to_string(),
            Pending {
                shadow: shadow.to_string(),
                sent_at: Instant::now(),
                tx,
                _permit: permit,
            },
        );
        rx
    }

    /// Resolve the update registered under `token`. Returns `false` when
    /// no such update is outstanding.
    pub fn complete(&self, token: &str, outcome: Completion) -> bool {
        let Some(pending) = self.lock().remove(token) else {
            return false;
        };
        tracing::debug!(
            client_token = token,
            shadow = %pending.shadow,
            latency_ms = pending.sent_at.elapsed().as_millis() as u64,
            accepted = outcome.is_ok(),
            "update response received"
        );
        let _ = pending.tx.send(outcome);
        true
    }

    fn remove(&self, token: &str) {
        self.lock().remove(token);
    }

    pub fn contains(&self, token: &str) -> bool {
        self.lock().contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Synchronizer ──────────────────────────────────────────────

/// Keeps the sensor and controller shadows in sync with the device.
pub struct ShadowSynchronizer<C: Channel> {
    shadows: ShadowClient<C>,
    actuator: Arc<dyn Actuator>,
    sensor_shadow: String,
    controller_shadow: String,
    pending: PendingTable,
    in_flight: Arc<Semaphore>,
    response_timeout: Duration,
    retry: RetryPolicy,
}

impl<C: Channel + 'static> ShadowSynchronizer<C> {
    pub fn new(
        shadows: ShadowClient<C>,
        actuator: Arc<dyn Actuator>,
        sensor_shadow: impl Into<String>,
        controller_shadow: impl Into<String>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            shadows,
            actuator,
            sensor_shadow: sensor_shadow.into(),
            controller_shadow: controller_shadow.into(),
            pending: PendingTable::default(),
            in_flight: Arc::new(Semaphore::new(config.max_in_flight)),
            response_timeout: config.response_timeout(),
            retry: RetryPolicy::from_config(config),
        }
    }

    pub fn sensor_shadow(&self) -> &str {
        &self.sensor_shadow
    }

    pub fn controller_shadow(&self) -> &str {
        &self.controller_shadow
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// In-flight slots currently free.
    pub fn available_slots(&self) -> usize {
        self.in_flight.available_permits()
    }

    /// Subscribe to `accepted`/`rejected` on both shadows and to `delta` on
    /// the controller shadow, waiting for every SUBACK. Must complete
    /// before the first update is published, or responses are lost.
    pub async fn subscribe_all(&self) -> SyncResult<()> {
        let mut shadows = vec![self.sensor_shadow.as_str()];
        if self.controller_shadow != self.sensor_shadow {
            shadows.push(self.controller_shadow.as_str());
        }
        for shadow in shadows {
            self.shadows
                .subscribe_update_responses(Some(shadow))
                .await
                .map_err(|e| SyncError::Subscription(format!("{shadow} update responses: {e}")))?;
        }
        self.shadows
            .subscribe_delta(Some(&self.controller_shadow))
            .await
            .map_err(|e| {
                SyncError::Subscription(format!("{} delta: {e}", self.controller_shadow))
            })?;

        tracing::info!(
            thing = self.shadows.thing_name(),
            sensor_shadow = %self.sensor_shadow,
            controller_shadow = %self.controller_shadow,
            "shadow subscriptions active"
        );
        Ok(())
    }

    /// Publish one update request with a fresh client token.
    ///
    /// Returns the token and a receiver completed by
    /// [`on_update_accepted`](Self::on_update_accepted) or
    /// [`on_update_rejected`](Self::on_update_rejected). No retry.
    pub async fn publish_reported(
        &self,
        shadow: &str,
        state: StateMap,
        echo_desired: bool,
    ) -> SyncResult<(String, oneshot::Receiver<Completion>)> {
        let permit = self.acquire_slot().await?;
        self.publish_with(shadow, new_client_token(), state, echo_desired, permit)
            .await
    }

    /// Publish an update and wait for the service to accept it, retrying
    /// retryable failures with backoff. All attempts share one client token.
    pub async fn update(
        &self,
        shadow: &str,
        state: StateMap,
        echo_desired: bool,
    ) -> SyncResult<UpdateAccepted> {
        self.update_with_slot(shadow, state, echo_desired, None).await
    }

    /// Wait for an in-flight slot, then run [`update`](Self::update) on a
    /// spawned task.
    pub async fn submit(
        self: &Arc<Self>,
        shadow: &str,
        state: StateMap,
        echo_desired: bool,
    ) -> SyncResult<JoinHandle<SyncResult<UpdateAccepted>>> {
        let permit = self.acquire_slot().await?;
        let this = Arc::clone(self);
        let shadow = shadow.to_string();
        Ok(tokio::spawn(async move {
            this.update_with_slot(&shadow, state, echo_desired, Some(permit))
                .await
        }))
    }

    /// Report a sensor reading to the sensor shadow.
    pub async fn submit_reading(
        self: &Arc<Self>,
        reading: &SensorReading,
    ) -> SyncResult<JoinHandle<SyncResult<UpdateAccepted>>> {
        let shadow = self.sensor_shadow.clone();
        self.submit(&shadow, reading.to_state(), false).await
    }

    /// Complete the pending update named by the response's client token.
    pub fn on_update_accepted(&self, response: &UpdateAccepted) -> bool {
        let Some(token) = response.client_token.as_deref() else {
            tracing::debug!(version = ?response.version, "accepted response without client token");
            return false;
        };
        let matched = self.pending.complete(token, Ok(response.clone()));
        if !matched {
            tracing::debug!(client_token = token, "accepted response for unknown token");
        }
        matched
    }

    /// Fail the pending update named by the error's client token.
    pub fn on_update_rejected(&self, error: &ErrorResponse) -> bool {
        let Some(token) = error.client_token.as_deref() else {
            tracing::warn!(
                code = error.code,
                message = %error.message,
                "update rejected without client token"
            );
            return false;
        };
        let matched = self.pending.complete(
            token,
            Err(SyncError::ShadowRejected {
                code: error.code,
                message: error.message.clone(),
                token: token.to_string(),
            }),
        );
        if !matched {
            tracing::debug!(
                client_token = token,
                code = error.code,
                "rejection for unknown token"
            );
        }
        matched
    }

    /// Apply a delta to the actuator and echo the applied values into
    /// `reported` and `desired` of the controller shadow.
    ///
    /// Returns `Ok(None)` for an empty delta.
    pub async fn on_delta(&self, event: &DeltaEvent) -> SyncResult<Option<UpdateAccepted>> {
        if event.is_empty() {
            tracing::debug!(version = ?event.version, "empty delta, nothing to apply");
            return Ok(None);
        }
        tracing::info!(
            version = ?event.version,
            issued_at = ?event.timestamp_utc(),
            properties = ?event.state.keys().collect::<Vec<_>>(),
            "received shadow delta"
        );
        self.apply_and_report(event.state.clone()).await
    }

    /// Set actuator properties, then echo the ones that took effect.
    ///
    /// A property the actuator refuses is logged and left out of the
    /// report. Fails only when nothing could be applied.
    pub async fn apply_and_report(&self, state: StateMap) -> SyncResult<Option<UpdateAccepted>> {
        let (applied, failure) = self.apply_properties(&state).await;
        if applied.is_empty() {
            return match failure {
                Some(e) => Err(e.into()),
                None => Ok(None),
            };
        }
        let shadow = self.controller_shadow.clone();
        self.update(&shadow, applied, true).await.map(Some)
    }

    /// Report the actuator's current properties to the controller shadow.
    pub async fn report_initial_state(&self) -> SyncResult<UpdateAccepted> {
        let state = self.actuator.properties().await;
        tracing::info!(shadow = %self.controller_shadow, "reporting current controller state");
        let shadow = self.controller_shadow.clone();
        self.update(&shadow, state, false).await
    }

    pub async fn publish_alert(&self, topic: &str, warning: &WarningPayload) -> SyncResult<()> {
        self.shadows
            .publish_alert(topic, warning)
            .await
            .map_err(SyncError::from)
    }

    async fn apply_properties(&self, state: &StateMap) -> (StateMap, Option<DeviceError>) {
        let mut applied = StateMap::new();
        let mut failure = None;
        for (property, value) in state {
            match self.actuator.apply(property, value).await {
                Ok(()) => {
                    applied.insert(property.clone(), value.clone());
                }
                Err(e) => {
                    tracing::error!(
                        property = %property,
                        error = %e,
                        "actuator failed, property left out of report"
                    );
                    failure = Some(e);
                }
            }
        }
        (applied, failure)
    }

    async fn update_with_slot(
        &self,
        shadow: &str,
        state: StateMap,
        echo_desired: bool,
        mut slot: Option<OwnedSemaphorePermit>,
    ) -> SyncResult<UpdateAccepted> {
        let token = new_client_token();
        let mut attempt = 1;
        loop {
            let permit = match slot.take() {
                Some(permit) => permit,
                None => self.acquire_slot().await?,
            };
            match self
                .attempt(shadow, &token, state.clone(), echo_desired, permit)
                .await
            {
                Ok(accepted) => {
                    tracing::info!(
                        shadow,
                        client_token = %token,
                        version = ?accepted.version,
                        accepted_at = ?accepted.timestamp_utc(),
                        attempt,
                        "shadow update accepted"
                    );
                    return Ok(accepted);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.jittered_delay(attempt);
                    tracing::warn!(
                        shadow,
                        kind = e.kind(),
                        error = %e,
                        client_token = %token,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "shadow update failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        shadow,
                        kind = e.kind(),
                        error = %e,
                        client_token = %token,
                        attempt,
                        "shadow update dropped"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(
        &self,
        shadow: &str,
        token: &str,
        state: StateMap,
        echo_desired: bool,
        permit: OwnedSemaphorePermit,
    ) -> SyncResult<UpdateAccepted> {
        let (token, rx) = self
            .publish_with(shadow, token.to_string(), state, echo_desired, permit)
            .await?;
        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SyncError::Publish(format!(
                "update {token} dropped before a response"
            ))),
            Err(_) => {
                self.pending.remove(&token);
                Err(SyncError::ResponseTimeout {
                    token,
                    timeout_ms: self.response_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn publish_with(
        &self,
        shadow: &str,
        token: String,
        state: StateMap,
        echo_desired: bool,
        permit: OwnedSemaphorePermit,
    ) -> SyncResult<(String, oneshot::Receiver<Completion>)> {
        let patch = if echo_desired {
            ShadowState::echo(state)
        } else {
            ShadowState::reported(state)
        };
        let request = UpdateRequest::with_token(patch, token.clone());

        let rx = self.pending.insert(&token, shadow, permit);
        if let Err(e) = self.shadows.publish_update(Some(shadow), &request).await {
            self.pending.remove(&token);
            return Err(e.into());
        }
        tracing::debug!(shadow, client_token = %token, "update request published");
        Ok((token, rx))
    }

    async fn acquire_slot(&self) -> SyncResult<OwnedSemaphorePermit> {
        Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .map_err(|_| SyncError::Publish("synchronizer closed".into()))
    }
}

/// Apply deltas one at a time, in arrival order, until the sender closes.
pub async fn run_delta_worker<C: Channel + 'static>(
    sync: Arc<ShadowSynchronizer<C>>,
    mut deltas: mpsc::Receiver<DeltaEvent>,
) {
    while let Some(event) = deltas.recv().await {
        if let Err(e) = sync.on_delta(&event).await {
            tracing::warn!(
                kind = e.kind(),
                error = %e,
                client_token = ?e.client_token(),
                version = ?event.version,
                "delta not applied"
            );
        }
    }
    tracing::debug!("delta channel closed");
}
