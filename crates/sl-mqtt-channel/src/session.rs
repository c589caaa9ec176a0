//! Acknowledgment tracking for one MQTT session.
//!
//! rumqttc assigns packet ids inside the event loop, so a caller never
//! learns the pkid of its own publish. `Session` bridges the gap: callers
//! register a waiter before enqueueing a request, the event loop maps each
//! `Outgoing::Publish(pkid)` / `Outgoing::Subscribe(pkid)` to the oldest
//! registered waiter, and the matching PUBACK / SUBACK resolves it.
//!
//! Registration and enqueueing happen under one async lock so the FIFO
//! order of waiters matches the order of requests in the client channel.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, QoS, SubscribeReasonCode};
use tokio::sync::{oneshot, watch};

use crate::error::{MqttError, MqttResult};

type AckSender = oneshot::Sender<MqttResult<()>>;
type AckReceiver = oneshot::Receiver<MqttResult<()>>;

/// Connection state as observed by the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No CONNACK seen yet.
    Connecting,
    /// Broker accepted the connection.
    Connected { session_present: bool },
    /// Connection refused or lost.
    Disconnected(String),
}

#[derive(Default)]
struct Waiters {
    /// Registered publishes whose packet has not been written yet.
    queued_publishes: VecDeque<(QoS, AckSender)>,
    queued_subscribes: VecDeque<AckSender>,
    inflight_publishes: HashMap<u16, AckSender>,
    inflight_subscribes: HashMap<u16, AckSender>,
    /// Pkids rumqttc will retransmit after a reconnect. Their outgoing
    /// events must not consume a fresh waiter.
    replayed: HashSet<u16>,
    disconnect: Option<AckSender>,
}

#[derive(Clone, Copy)]
enum WaiterKind {
    Publish,
    Subscribe,
}

/// Unregisters the newest queued waiter unless its request reached the
/// client channel. Covers both a failed enqueue and a caller dropping the
/// future mid-enqueue; the enqueue lock guarantees the newest waiter is ours.
struct QueuedWaiter<'a> {
    session: &'a Session,
    kind: WaiterKind,
    armed: bool,
}

impl<'a> QueuedWaiter<'a> {
    fn new(session: &'a Session, kind: WaiterKind) -> Self {
        Self {
            session,
            kind,
            armed: true,
        }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut waiters = self.session.lock();
        match self.kind {
            WaiterKind::Publish => {
                waiters.queued_publishes.pop_back();
            }
            WaiterKind::Subscribe => {
                waiters.queued_subscribes.pop_back();
            }
        }
    }
}

/// Correlates MQTT requests with broker acknowledgments.
pub struct Session {
    waiters: Mutex<Waiters>,
    enqueue: tokio::sync::Mutex<()>,
    state_tx: watch::Sender<ConnectionState>,
    ack_timeout: Duration,
}

impl Session {
    pub fn new(ack_timeout: Duration) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            waiters: Mutex::new(Waiters::default()),
            enqueue: tokio::sync::Mutex::new(()),
            state_tx,
            ack_timeout,
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Wait for the first CONNACK. Fails if the broker refuses the
    /// connection, the transport errors first, or `timeout` elapses.
    pub async fn wait_connected(&self, timeout: Duration) -> MqttResult<()> {
        let mut rx = self.state_tx.subscribe();
        let outcome = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| !matches!(s, ConnectionState::Connecting)),
        )
        .await;

        match outcome {
            Ok(Ok(state)) => match &*state {
                ConnectionState::Connected { .. } => Ok(()),
                ConnectionState::Disconnected(reason) => {
                    Err(MqttError::Connection(reason.clone()))
                }
                ConnectionState::Connecting => {
                    Err(MqttError::Connection("still connecting".into()))
                }
            },
            Ok(Err(_)) => Err(MqttError::Connection("session dropped".into())),
            Err(_) => Err(MqttError::Connection(format!(
                "no CONNACK within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Register a publish waiter, run `send` to enqueue the packet, then wait
    /// for the acknowledgment.
    pub async fn track_publish<F>(&self, qos: QoS, send: F) -> MqttResult<()>
    where
        F: Future<Output = MqttResult<()>>,
    {
        let rx = {
            let _guard = self.enqueue.lock().await;
            let (tx, rx) = oneshot::channel();
            self.lock().queued_publishes.push_back((qos, tx));
            let queued = QueuedWaiter::new(self, WaiterKind::Publish);
            send.await?;
            queued.keep();
            rx
        };
        self.await_ack(rx, "publish").await
    }

    /// Register a subscribe waiter, run `send` to enqueue the packet, then
    /// wait for the SUBACK.
    pub async fn track_subscribe<F>(&self, send: F) -> MqttResult<()>
    where
        F: Future<Output = MqttResult<()>>,
    {
        let rx = {
            let _guard = self.enqueue.lock().await;
            let (tx, rx) = oneshot::channel();
            self.lock().queued_subscribes.push_back(tx);
            let queued = QueuedWaiter::new(self, WaiterKind::Subscribe);
            send.await?;
            queued.keep();
            rx
        };
        self.await_ack(rx, "subscribe").await
    }

    /// Register a disconnect waiter, run `send`, then wait until the
    /// DISCONNECT packet has been written.
    pub async fn track_disconnect<F>(&self, send: F) -> MqttResult<()>
    where
        F: Future<Output = MqttResult<()>>,
    {
        let (tx, rx) = oneshot::channel();
        self.lock().disconnect = Some(tx);
        if let Err(e) = send.await {
            self.lock().disconnect = None;
            return Err(e);
        }
        self.await_ack(rx, "disconnect").await
    }

    async fn await_ack(&self, rx: AckReceiver, operation: &'static str) -> MqttResult<()> {
        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MqttError::Connection(format!(
                "{operation} waiter dropped before acknowledgment"
            ))),
            Err(_) => Err(MqttError::Timeout {
                operation,
                timeout_ms: self.ack_timeout.as_millis() as u64,
            }),
        }
    }

    /// Feed one event from `EventLoop::poll`.
    pub fn on_event(&self, event: &Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                let state = if ack.code == ConnectReturnCode::Success {
                    ConnectionState::Connected {
                        session_present: ack.session_present,
                    }
                } else {
                    ConnectionState::Disconnected(format!("connection refused: {:?}", ack.code))
                };
                self.state_tx.send_replace(state);
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                if let Some(tx) = self.lock().inflight_publishes.remove(&ack.pkid) {
                    let _ = tx.send(Ok(()));
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                if let Some(tx) = self.lock().inflight_subscribes.remove(&ack.pkid) {
                    let refused = ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure));
                    let result = if refused {
                        Err(MqttError::Subscribe(format!(
                            "broker refused subscription (pkid {})",
                            ack.pkid
                        )))
                    } else {
                        Ok(())
                    };
                    let _ = tx.send(result);
                }
            }
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                let mut waiters = self.lock();
                if waiters.replayed.remove(pkid) {
                    return;
                }
                if let Some((qos, tx)) = waiters.queued_publishes.pop_front() {
                    if qos == QoS::AtMostOnce {
                        let _ = tx.send(Ok(()));
                    } else {
                        waiters.inflight_publishes.insert(*pkid, tx);
                    }
                }
            }
            Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                let mut waiters = self.lock();
                if let Some(tx) = waiters.queued_subscribes.pop_front() {
                    waiters.inflight_subscribes.insert(*pkid, tx);
                }
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                if let Some(tx) = self.lock().disconnect.take() {
                    let _ = tx.send(Ok(()));
                }
                self.state_tx
                    .send_replace(ConnectionState::Disconnected("client disconnect".into()));
            }
            _ => {}
        }
    }

    /// Record a transport failure reported by `EventLoop::poll`.
    ///
    /// Waiters for packets already on the wire fail with a retryable
    /// connection error. Waiters still queued keep their place: rumqttc
    /// sends those requests once the connection is back.
    pub fn on_connection_lost(&self, reason: &str) {
        {
            let mut waiters = self.lock();
            let inflight: Vec<(u16, AckSender)> = waiters.inflight_publishes.drain().collect();
            for (pkid, tx) in inflight {
                waiters.replayed.insert(pkid);
                let _ = tx.send(Err(MqttError::Connection(reason.to_string())));
            }
            for (_, tx) in waiters.inflight_subscribes.drain() {
                let _ = tx.send(Err(MqttError::Connection(reason.to_string())));
            }
        }
        self.state_tx
            .send_replace(ConnectionState::Disconnected(reason.to_string()));
    }

    /// Number of requests still waiting for an acknowledgment.
    pub fn pending_acks(&self) -> usize {
        let waiters = self.lock();
        waiters.queued_publishes.len()
            + waiters.queued_subscribes.len()
            + waiters.inflight_publishes.len()
            + waiters.inflight_subscribes.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rumqttc::{ConnAck, PubAck, SubAck};
    use tokio::task::JoinHandle;

    fn session() -> Arc<Session> {
        Arc::new(Session::new(Duration::from_secs(5)))
    }

    fn spawn_publish(session: &Arc<Session>, qos: QoS) -> JoinHandle<MqttResult<()>> {
        let session = Arc::clone(session);
        tokio::spawn(async move { session.track_publish(qos, async { Ok(()) }).await })
    }

    fn spawn_subscribe(session: &Arc<Session>) -> JoinHandle<MqttResult<()>> {
        let session = Arc::clone(session);
        tokio::spawn(async move { session.track_subscribe(async { Ok(()) }).await })
    }

    async fn wait_registered(session: &Session, count: usize) {
        while session.pending_acks() < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn publish_resolves_on_puback() {
        let session = session();
        let task = spawn_publish(&session, QoS::AtLeastOnce);
        wait_registered(&session, 1).await;

        session.on_event(&Event::Outgoing(Outgoing::Publish(7)));
        assert!(!task.is_finished());
        session.on_event(&Event::Incoming(Packet::PubAck(PubAck::new(7))));

        assert!(task.await.unwrap().is_ok());
        assert_eq!(session.pending_acks(), 0);
    }

    #[tokio::test]
    async fn qos0_publish_resolves_when_written() {
        let session = session();
        let task = spawn_publish(&session, QoS::AtMostOnce);
        wait_registered(&session, 1).await;

        session.on_event(&Event::Outgoing(Outgoing::Publish(0)));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn waiters_map_in_fifo_order() {
        let session = session();
        let first = spawn_publish(&session, QoS::AtLeastOnce);
        wait_registered(&session, 1).await;
        let second = spawn_publish(&session, QoS::AtLeastOnce);
        wait_registered(&session, 2).await;

        session.on_event(&Event::Outgoing(Outgoing::Publish(1)));
        session.on_event(&Event::Outgoing(Outgoing::Publish(2)));
        session.on_event(&Event::Incoming(Packet::PubAck(PubAck::new(1))));

        assert!(first.await.unwrap().is_ok());
        assert!(!second.is_finished());

        session.on_event(&Event::Incoming(Packet::PubAck(PubAck::new(2))));
        assert!(second.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn failed_enqueue_unregisters_waiter() {
        let session = session();
        let result = session
            .track_publish(QoS::AtLeastOnce, async {
                Err(MqttError::Publish("request channel closed".into()))
            })
            .await;
        assert!(matches!(result, Err(MqttError::Publish(_))));
        assert_eq!(session.pending_acks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_enqueue_unregisters_waiter() {
        let session = session();
        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            session.track_publish(QoS::AtLeastOnce, std::future::pending()),
        )
        .await;
        assert!(cancelled.is_err());
        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            session.track_subscribe(std::future::pending()),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(session.pending_acks(), 0);

        // The next request must get the next packet id.
        let task = spawn_publish(&session, QoS::AtLeastOnce);
        wait_registered(&session, 1).await;
        session.on_event(&Event::Outgoing(Outgoing::Publish(4)));
        session.on_event(&Event::Incoming(Packet::PubAck(PubAck::new(4))));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn subscribe_resolves_on_suback() {
        let session = session();
        let task = spawn_subscribe(&session);
        wait_registered(&session, 1).await;

        session.on_event(&Event::Outgoing(Outgoing::Subscribe(3)));
        session.on_event(&Event::Incoming(Packet::SubAck(SubAck::new(
            3,
            vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
        ))));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn refused_subscription_is_error() {
        let session = session();
        let task = spawn_subscribe(&session);
        wait_registered(&session, 1).await;

        session.on_event(&Event::Outgoing(Outgoing::Subscribe(4)));
        session.on_event(&Event::Incoming(Packet::SubAck(SubAck::new(
            4,
            vec![SubscribeReasonCode::Failure],
        ))));
        assert!(matches!(task.await.unwrap(), Err(MqttError::Subscribe(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_times_out() {
        let session = Session::new(Duration::from_secs(2));
        let result = session
            .track_publish(QoS::AtLeastOnce, async { Ok(()) })
            .await;
        assert!(matches!(
            result,
            Err(MqttError::Timeout {
                operation: "publish",
                timeout_ms: 2000
            })
        ));
    }

    #[tokio::test]
    async fn connection_loss_fails_inflight_and_skips_replay() {
        let session = session();
        let inflight = spawn_publish(&session, QoS::AtLeastOnce);
        wait_registered(&session, 1).await;
        session.on_event(&Event::Outgoing(Outgoing::Publish(9)));

        session.on_connection_lost("connection reset");
        let err = inflight.await.unwrap().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            session.state(),
            ConnectionState::Disconnected("connection reset".into())
        );

        // A new publish registered after the loss must not be matched to
        // rumqttc's retransmission of pkid 9.
        let fresh = spawn_publish(&session, QoS::AtLeastOnce);
        wait_registered(&session, 1).await;
        session.on_event(&Event::Outgoing(Outgoing::Publish(9)));
        session.on_event(&Event::Incoming(Packet::PubAck(PubAck::new(9))));
        assert!(!fresh.is_finished());

        session.on_event(&Event::Outgoing(Outgoing::Publish(10)));
        session.on_event(&Event::Incoming(Packet::PubAck(PubAck::new(10))));
        assert!(fresh.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn wait_connected_on_connack() {
        let session = session();
        session.on_event(&Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        })));
        assert!(session.wait_connected(Duration::from_secs(1)).await.is_ok());
        assert_eq!(
            session.state(),
            ConnectionState::Connected {
                session_present: false
            }
        );
    }

    #[tokio::test]
    async fn wait_connected_fails_on_refusal() {
        let session = session();
        session.on_event(&Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::NotAuthorized,
        })));
        let err = session
            .wait_connected(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_connected_times_out() {
        let session = session();
        let err = session
            .wait_connected(Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CONNACK"));
    }

    #[tokio::test]
    async fn disconnect_resolves_when_written() {
        let session = session();
        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.track_disconnect(async { Ok(()) }).await })
        };
        while session.lock().disconnect.is_none() {
            tokio::task::yield_now().await;
        }
        session.on_event(&Event::Outgoing(Outgoing::Disconnect));
        assert!(task.await.unwrap().is_ok());
    }
}
