//! Shared test harness for E2E integration tests.
//!
//! Wires the agent's synchronizer, delta worker and dispatcher to a
//! `MockChannel`, with an in-memory shadow service answering every update
//! request the way AWS IoT does: through `update/accepted`,
//! `update/rejected` and `update/delta` publishes.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{Publish, QoS};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use sl_agent::driver::Driver;
use sl_agent::mqtt_loop;
use sl_agent::shadow_sync::{self, ShadowSynchronizer, SyncConfig};
use sl_agent::threshold::{ThresholdConfig, ThresholdMonitor};
use sl_device::{Actuator, MockController, MockSensor, Sensor};
use sl_mqtt_channel::{MockChannel, ShadowClient, classify};
use sl_protocol::SensorReading;
use sl_protocol::shadows::{DeltaEvent, ShadowDocument, StateMap, UpdateRequest};
use sl_protocol::topics::{self, ShadowOperation};

pub const THING: &str = "named_test";
pub const SENSOR_SHADOW: &str = "dht_sensor";
pub const CONTROLLER_SHADOW: &str = "controller";

const EPOCH: i64 = 1_700_000_000;

/// In-memory device shadow service.
#[derive(Default)]
pub struct ShadowService {
    documents: Mutex<HashMap<String, ShadowDocument>>,
    rejections: Mutex<VecDeque<u16>>,
    silent: AtomicBool,
    handled: AtomicUsize,
}

impl ShadowService {
    /// Current document of a named shadow.
    pub fn document(&self, shadow: &str) -> ShadowDocument {
        self.documents
            .lock()
            .unwrap()
            .get(shadow)
            .cloned()
            .unwrap_or_default()
    }

    /// Reject the next update request with `code`.
    pub fn reject_next(&self, code: u16) {
        self.rejections.lock().unwrap().push_back(code);
    }

    /// Stop (or resume) answering update requests.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Answer every update request published since the last call.
    fn pump(&self, mqtt: &MockChannel, deliver: impl Fn(&str, Value)) {
        let published = mqtt.published();
        let start = self.handled.swap(published.len(), Ordering::SeqCst);
        for msg in published.iter().skip(start) {
            let Some(parsed) = topics::parse_shadow_topic(&msg.topic) else {
                continue;
            };
            if parsed.operation != ShadowOperation::Update || self.silent.load(Ordering::SeqCst)
            {
                continue;
            }
            let request: UpdateRequest = serde_json::from_slice(&msg.payload).unwrap();
            let shadow = parsed.shadow_name.as_deref();
            let key = shadow.unwrap_or_default().to_string();

            if let Some(code) = self.rejections.lock().unwrap().pop_front() {
                deliver(
                    &topics::update_rejected(&parsed.thing_name, shadow),
                    json!({
                        "code": code,
                        "message": "rejected by test service",
                        "timestamp": EPOCH,
                        "clientToken": request.client_token,
                    }),
                );
                continue;
            }

            let version = {
                let mut documents = self.documents.lock().unwrap();
                let document = documents.entry(key).or_default();
                document.apply(&request.state);
                document.version
            };
            deliver(
                &topics::update_accepted(&parsed.thing_name, shadow),
                json!({
                    "state": request.state,
                    "version": version,
                    "timestamp": EPOCH,
                    "clientToken": request.client_token,
                }),
            );
        }
    }

    /// Merge `desired` and return the resulting delta event payload, if any.
    fn set_desired(&self, shadow: &str, desired: StateMap) -> Option<Value> {
        let mut documents = self.documents.lock().unwrap();
        let document = documents.entry(shadow.to_string()).or_default();
        document.apply(&sl_protocol::shadows::ShadowState {
            reported: None,
            desired: Some(desired),
        });
        let delta = document.delta();
        if delta.is_empty() {
            return None;
        }
        Some(json!({"state": delta, "version": document.version, "timestamp": EPOCH}))
    }
}

/// End-to-end harness: agent side wired to the shadow service.
pub struct Harness {
    pub mqtt: Arc<MockChannel>,
    pub controller: Arc<MockController>,
    pub sync: Arc<ShadowSynchronizer<MockChannel>>,
    pub service: Arc<ShadowService>,
    deltas: mpsc::Sender<DeltaEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let mqtt = Arc::new(MockChannel::new());
        let controller = Arc::new(MockController::new());
        let sync = Arc::new(ShadowSynchronizer::new(
            ShadowClient::new(Arc::clone(&mqtt), THING),
            Arc::clone(&controller) as Arc<dyn Actuator>,
            SENSOR_SHADOW,
            CONTROLLER_SHADOW,
            &config,
        ));
        let service = Arc::new(ShadowService::default());
        let (deltas, delta_rx) = mpsc::channel(config.delta_queue_capacity);

        let worker = tokio::spawn(shadow_sync::run_delta_worker(Arc::clone(&sync), delta_rx));
        let responder = {
            let mqtt = Arc::clone(&mqtt);
            let sync = Arc::clone(&sync);
            let service = Arc::clone(&service);
            let deltas = deltas.clone();
            tokio::spawn(async move {
                loop {
                    service.pump(&mqtt, |topic, payload| {
                        deliver(&sync, &deltas, topic, payload)
                    });
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        };

        Self {
            mqtt,
            controller,
            sync,
            service,
            deltas,
            tasks: vec![worker, responder],
        }
    }

    /// Inbound publish through the agent's classifier and dispatcher.
    pub fn deliver(&self, topic: &str, payload: Value) {
        deliver(&self.sync, &self.deltas, topic, payload);
    }

    /// Set desired state in the cloud; the resulting delta reaches the agent.
    pub fn desire(&self, shadow: &str, desired: Value) {
        let desired = desired.as_object().cloned().unwrap();
        if let Some(delta) = self.service.set_desired(shadow, desired) {
            self.deliver(&topics::update_delta(THING, Some(shadow)), delta);
        }
    }

    /// Update requests the agent published to a named shadow, oldest first.
    pub fn updates_to(&self, shadow: &str) -> Vec<UpdateRequest> {
        self.mqtt
            .published_to(&topics::update(THING, Some(shadow)))
            .iter()
            .map(|m| serde_json::from_slice(&m.payload).unwrap())
            .collect()
    }

    /// Driver over a scripted sensor with default thresholds.
    pub fn driver(&self, readings: Vec<SensorReading>) -> Driver<MockChannel> {
        let config = ThresholdConfig::default();
        Driver::new(
            Arc::clone(&self.sync),
            Arc::new(MockSensor::with_readings(readings)) as Arc<dyn Sensor>,
            ThresholdMonitor::new(&config),
            config.warning_topic,
            Duration::from_secs(2),
        )
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn deliver(
    sync: &ShadowSynchronizer<MockChannel>,
    deltas: &mpsc::Sender<DeltaEvent>,
    topic: &str,
    payload: Value,
) {
    let publish = Publish::new(topic, QoS::AtLeastOnce, serde_json::to_vec(&payload).unwrap());
    mqtt_loop::dispatch(classify(&publish), sync, deltas);
}

/// Poll `condition` until it holds. Panics after two minutes of test time.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(120), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached");
}
