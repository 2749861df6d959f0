use crate::bridge::RegisterWriter;
use crate::config::DeviceId;
use crate::protocol::{ClientMessage, RegisterKind, ServerMessage};
use crate::state::SharedState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Monotonic connection identifier, unique per pool.
pub type ConnectionId = u64;

/// The two push channels subscribers can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Device,
    System,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection pool full")]
    PoolFull,
}

/// Produces the greeting message sent to every newly accepted connection.
/// Returning None skips the greeting (nothing to report yet).
pub type Greeting = Box<dyn Fn() -> Option<String> + Send + Sync>;

struct PoolEntry {
    tx: mpsc::UnboundedSender<String>,
    last_heartbeat: Instant,
}

/// One channel's subscriber set. Admission control, heartbeat bookkeeping
/// and fan-out all live here; the pool never blocks on a slow subscriber
/// because every entry sends through an unbounded per-connection queue whose
/// backpressure is the socket writer task.
pub struct ConnectionPool {
    channel: Channel,
    max_connections: usize,
    heartbeat_timeout: Duration,
    greeting: Greeting,
    next_id: AtomicU64,
    inner: Mutex<HashMap<ConnectionId, PoolEntry>>,
}

impl ConnectionPool {
    pub fn new(channel: Channel, max_connections: usize, heartbeat_timeout: Duration, greeting: Greeting) -> Self {
        Self {
            channel,
            max_connections,
            heartbeat_timeout,
            greeting,
            next_id: AtomicU64::new(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, PoolEntry>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a new subscriber. Rejected outright when the pool is at
    /// capacity; existing subscribers are never evicted to make room.
    pub fn connect(&self, tx: mpsc::UnboundedSender<String>) -> Result<ConnectionId, PoolError> {
        let mut entries = self.lock();
        if entries.len() >= self.max_connections {
            warn!(channel = ?self.channel, "connection rejected, pool full");
            return Err(PoolError::PoolFull);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Some(greeting) = (self.greeting)() {
            // A greeting that fails to queue means the peer is already gone;
            // liveness or the writer task will reap the entry shortly.
            let _ = tx.send(greeting);
        }
        entries.insert(
            id,
            PoolEntry {
                tx,
                last_heartbeat: Instant::now(),
            },
        );
        info!(channel = ?self.channel, conn = id, total = entries.len(), "subscriber connected");
        Ok(id)
    }

    /// Remove a subscriber. Safe to call twice; the second call is a no-op.
    pub fn disconnect(&self, id: ConnectionId) {
        let mut entries = self.lock();
        if entries.remove(&id).is_some() {
            info!(channel = ?self.channel, conn = id, total = entries.len(), "subscriber disconnected");
        } else {
            warn!(channel = ?self.channel, conn = id, "disconnect for unknown subscriber");
        }
    }

    pub fn heartbeat(&self, id: ConnectionId, now: Instant) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.last_heartbeat = now;
        }
    }

    /// Drop every subscriber whose silence strictly exceeds the heartbeat
    /// timeout. A connection exactly at the timeout survives this check and
    /// falls on the next one.
    pub fn check_liveness(&self, now: Instant) -> Vec<ConnectionId> {
        let mut entries = self.lock();
        let stale: Vec<ConnectionId> = entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_heartbeat) > self.heartbeat_timeout)
            .map(|(&id, _)| id)
            .collect();
        for id in &stale {
            entries.remove(id);
            info!(channel = ?self.channel, conn = id, "subscriber timed out");
        }
        stale
    }

    /// Fan a message out to every subscriber. Entries whose queue has closed
    /// (peer task gone) are reaped in the same pass.
    pub fn broadcast(&self, message: &str) {
        let mut entries = self.lock();
        let dead: Vec<ConnectionId> = entries
            .iter()
            .filter(|(_, e)| e.tx.send(message.to_owned()).is_err())
            .map(|(&id, _)| id)
            .collect();
        for id in dead {
            entries.remove(&id);
            debug!(channel = ?self.channel, conn = id, "reaped closed subscriber during broadcast");
        }
    }

    /// Direct reply to one subscriber.
    pub fn send_to(&self, id: ConnectionId, message: String) {
        if let Some(entry) = self.lock().get(&id) {
            let _ = entry.tx.send(message);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parameters the hub needs from the deployment configuration.
pub struct HubConfig {
    pub max_connections: usize,
    pub heartbeat_timeout: Duration,
    pub liveness_period: Duration,
    pub system_queue_depth: usize,
}

/// The pub/sub core: owns both connection pools, routes inbound subscriber
/// messages and drains the bounded system status queue out to the system
/// channel.
pub struct SubscriptionHub {
    device_pool: Arc<ConnectionPool>,
    system_pool: Arc<ConnectionPool>,
    system_tx: mpsc::Sender<String>,
    system_rx: Mutex<Option<mpsc::Receiver<String>>>,
    state: Arc<SharedState>,
    writer: Arc<dyn RegisterWriter>,
    liveness_period: Duration,
}

impl SubscriptionHub {
    pub fn new(state: Arc<SharedState>, writer: Arc<dyn RegisterWriter>, config: HubConfig) -> Self {
        let (system_tx, system_rx) = mpsc::channel(config.system_queue_depth);

        let device_greeting: Greeting = {
            let state = state.clone();
            Box::new(move || ServerMessage::device_snapshot(&state).to_json().ok())
        };
        let system_greeting: Greeting = {
            let state = state.clone();
            Box::new(move || ServerMessage::system_snapshot(&state).to_json().ok())
        };

        Self {
            device_pool: Arc::new(ConnectionPool::new(
                Channel::Device,
                config.max_connections,
                config.heartbeat_timeout,
                device_greeting,
            )),
            system_pool: Arc::new(ConnectionPool::new(
                Channel::System,
                config.max_connections,
                config.heartbeat_timeout,
                system_greeting,
            )),
            system_tx,
            system_rx: Mutex::new(Some(system_rx)),
            state,
            writer,
            liveness_period: config.liveness_period,
        }
    }

    pub fn pool(&self, channel: Channel) -> &Arc<ConnectionPool> {
        match channel {
            Channel::Device => &self.device_pool,
            Channel::System => &self.system_pool,
        }
    }

    pub fn device_pool(&self) -> &Arc<ConnectionPool> {
        &self.device_pool
    }

    pub fn system_pool(&self) -> &Arc<ConnectionPool> {
        &self.system_pool
    }

    /// Route one raw inbound frame from a subscriber. Malformed frames and
    /// incomplete commands are logged and dropped; the connection stays up.
    pub fn dispatch(&self, channel: Channel, conn: ConnectionId, raw: &str) {
        let message: ClientMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(err) => {
                debug!(?channel, conn, %err, "dropping malformed frame");
                return;
            }
        };

        match message {
            ClientMessage::Heartbeat => {
                self.pool(channel).heartbeat(conn, Instant::now());
            }
            ClientMessage::RequestData { device_id, .. } => {
                self.handle_request_data(channel, conn, device_id);
            }
            ClientMessage::Control {
                device_id,
                register_type,
                address,
                value,
            } => {
                self.handle_control(conn, device_id, register_type, address, value);
            }
        }
    }

    fn handle_request_data(&self, channel: Channel, conn: ConnectionId, device_id: Option<String>) {
        let reply = match device_id.as_deref().and_then(|s| s.parse::<DeviceId>().ok()) {
            Some(id) => match self.state.get_device_status(id) {
                Some(status) => ServerMessage::device_update(id.to_string(), status, crate::now_ms()),
                None => ServerMessage::device_snapshot(&self.state),
            },
            None => ServerMessage::device_snapshot(&self.state),
        };
        if let Ok(json) = reply.to_json() {
            self.pool(channel).send_to(conn, json);
        }
        // Data requests also get a fresh availability snapshot.
        if let Ok(json) = ServerMessage::system_snapshot(&self.state).to_json() {
            self.pool(channel).send_to(conn, json);
        }
    }

    fn handle_control(
        &self,
        conn: ConnectionId,
        device_id: Option<String>,
        register_type: Option<RegisterKind>,
        address: Option<u16>,
        value: Option<u16>,
    ) {
        let (Some(device_id), Some(register_type), Some(address), Some(value)) =
            (device_id, register_type, address, value)
        else {
            debug!(conn, "dropping incomplete control command");
            return;
        };
        let Ok(device) = device_id.parse::<DeviceId>() else {
            debug!(conn, device_id, "dropping control with unparseable device id");
            return;
        };

        let result = match register_type {
            RegisterKind::Coil => self.writer.write_coil(device, address, value != 0),
            RegisterKind::HoldingRegister => self.writer.write_holding(device, address, value),
        };
        if let Err(err) = result {
            // The command failed but the subscriber keeps its connection.
            warn!(conn, device, address, value, %err, "control write rejected");
        }
    }

    /// Queue a system status frame for the drain task. Applies backpressure:
    /// a full queue makes the producer wait rather than dropping frames.
    pub async fn publish_system_status(&self, message: String) {
        if self.system_tx.send(message).await.is_err() {
            debug!("system status queue closed, frame dropped");
        }
    }

    /// Spawn the hub's background tasks: the system queue drain and the
    /// periodic liveness check over both pools. Call once.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        if let Some(mut rx) = self
            .system_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let pool = self.system_pool.clone();
            let mut shutdown_rx = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        frame = rx.recv() => match frame {
                            Some(frame) => pool.broadcast(&frame),
                            None => break,
                        },
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            });
        } else {
            warn!("hub already started, ignoring");
            return;
        }

        let hub = self.clone();
        let mut shutdown_rx = shutdown;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(hub.liveness_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        hub.run_liveness_check(Instant::now());
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    pub fn run_liveness_check(&self, now: Instant) {
        let dropped = self.device_pool.check_liveness(now).len()
            + self.system_pool.check_liveness(now).len();
        if dropped > 0 {
            info!(dropped, "liveness check dropped silent subscribers");
        }
    }
}
