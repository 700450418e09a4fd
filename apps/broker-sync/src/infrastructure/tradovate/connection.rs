//! Broker Account Connection
//!
//! One authenticated Tradovate user-data socket for one broker account.
//! The connection owns its transport, three timers (heartbeat, settle,
//! reconnect) and an [`EntityReconciler`], and drives the lifecycle:
//!
//! ```text
//! connect ─► open ─► authorize ─► (settle) ─► user/syncrequest ─► live
//!                 ▲                                               │
//!                 └────── reconnect timer ◄── error / abnormal close
//! ```
//!
//! # Locking
//!
//! Control state sits behind one mutex, the reconciler behind its own
//! `RwLock`. The control lock is always taken first. No lock is held while
//! the update callback runs.
//!
//! Every socket attempt gets a new epoch. Transport events and timers carry
//! the epoch they were created under and are dropped once it is stale.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use super::auth::{AuthDecision, AuthHandler, numeric_user_id};
use super::codec::FrameCodec;
use super::heartbeat::{Heartbeat, HeartbeatConfig};
use super::messages::{Command, CommandAck, Frame, HEARTBEAT_ACK, MessageIds, ServerItem};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    ConnectionFactory, NORMAL_CLOSE, Scheduler, SyncConnection, TimerHandle, TimerSlot,
    TransportConnector, TransportEvent, TransportEventSink, TransportHandle, UpdateCallback,
};
use crate::domain::connection::{ConnectionCredentials, ConnectionState, ConnectionStatus};
use crate::domain::entities::MergedSnapshot;
use crate::domain::reconciler::{EntityReconciler, ReconcileOutcome, SyncEvent};
use crate::infrastructure::config::ConnectionSettings;
use crate::infrastructure::metrics;

/// Close reason sent on an explicit disconnect.
const CLIENT_DISCONNECT: &str = "client disconnect";

/// Close reason sent when a socket is abandoned for a reconnect.
const CLIENT_RECONNECT: &str = "client reconnect";

// =============================================================================
// Control State
// =============================================================================

struct Control {
    state: ConnectionState,
    epoch: u64,
    transport: Option<Arc<dyn TransportHandle>>,
    heartbeat: Heartbeat,
    settle: TimerSlot,
    reconnect: TimerSlot,
    policy: ReconnectPolicy,
    auth: AuthHandler,
    ids: MessageIds,
    sync_request_id: Option<u64>,
    numeric_user_id: Option<u64>,
    last_error: Option<String>,
}

impl Control {
    fn transport_open(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    fn send(&self, text: &str) -> bool {
        match &self.transport {
            Some(transport) => match transport.send(text) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping outbound message");
                    false
                }
            },
            None => false,
        }
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            reconnect_attempts: self.policy.attempt_count(),
            auth_failures: self.auth.failures(),
            last_error: self.last_error.clone(),
        }
    }
}

struct ConnectionInner {
    credentials: ConnectionCredentials,
    url: String,
    settle_delay: Duration,
    connector: Arc<dyn TransportConnector>,
    scheduler: Arc<dyn Scheduler>,
    codec: FrameCodec,
    self_ref: Weak<Self>,
    control: Mutex<Control>,
    reconciler: RwLock<EntityReconciler>,
    on_update: RwLock<Option<UpdateCallback>>,
    status_tx: watch::Sender<ConnectionStatus>,
}

// =============================================================================
// Connection
// =============================================================================

/// Connection to one Tradovate broker account.
///
/// Dropping the connection disconnects it.
pub struct BrokerConnection {
    inner: Arc<ConnectionInner>,
}

impl BrokerConnection {
    /// Create a disconnected connection.
    #[must_use]
    pub fn new(
        credentials: ConnectionCredentials,
        settings: &ConnectionSettings,
        connector: Arc<dyn TransportConnector>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let url = settings.ws_url(credentials.is_demo).to_string();
        let (status_tx, _) = watch::channel(ConnectionStatus::default());

        let inner = Arc::new_cyclic(|self_ref| ConnectionInner {
            credentials,
            url,
            settle_delay: settings.subscribe_settle,
            connector,
            scheduler,
            codec: FrameCodec::new(),
            self_ref: self_ref.clone(),
            control: Mutex::new(Control {
                state: ConnectionState::Disconnected,
                epoch: 0,
                transport: None,
                heartbeat: Heartbeat::new(HeartbeatConfig::from_settings(settings)),
                settle: TimerSlot::new(),
                reconnect: TimerSlot::new(),
                policy: ReconnectPolicy::new(ReconnectConfig::from_settings(settings)),
                auth: AuthHandler::new(settings.max_auth_failures),
                ids: MessageIds::new(),
                sync_request_id: None,
                numeric_user_id: None,
                last_error: None,
            }),
            reconciler: RwLock::new(EntityReconciler::new()),
            on_update: RwLock::new(None),
            status_tx,
        });

        Self { inner }
    }

    /// Endpoint this connection opens.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.control.lock().state
    }

    /// Heartbeats sent over the lifetime of this connection.
    #[must_use]
    pub fn heartbeats_sent(&self) -> u64 {
        self.inner.control.lock().heartbeat.sent_count()
    }

    /// Whether a reconnect is scheduled.
    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.inner.control.lock().reconnect.is_armed()
    }
}

impl SyncConnection for BrokerConnection {
    fn broker_account_id(&self) -> &str {
        &self.inner.credentials.broker_account_id
    }

    fn connect(&self) {
        let mut control = self.inner.control.lock();
        self.inner.connect_locked(&mut control);
    }

    fn disconnect(&self) {
        self.inner.disconnect();
    }

    fn set_update_callback(&self, callback: UpdateCallback) {
        *self.inner.on_update.write() = Some(callback);
    }

    fn snapshot(&self) -> MergedSnapshot {
        self.inner.reconciler.read().snapshot()
    }

    fn status(&self) -> ConnectionStatus {
        self.inner.status_tx.borrow().clone()
    }

    fn status_rx(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }
}

impl Drop for BrokerConnection {
    fn drop(&mut self) {
        self.inner.disconnect();
    }
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("broker_account_id", &self.inner.credentials.broker_account_id)
            .field("url", &self.inner.url)
            .field("status", &*self.inner.status_tx.borrow())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

impl ConnectionInner {
    fn account(&self) -> &str {
        &self.credentials.broker_account_id
    }

    fn publish_status(&self, control: &Control) {
        self.status_tx.send_replace(control.status());
    }

    fn transition(&self, control: &mut Control, next: ConnectionState) -> bool {
        let previous = control.state;
        if !previous.can_transition_to(next) {
            tracing::warn!(
                broker_account_id = %self.account(),
                from = %previous,
                to = %next,
                "Ignoring illegal state transition"
            );
            return false;
        }

        control.state = next;
        if next == ConnectionState::Live && previous != ConnectionState::Live {
            control.policy.reset();
            control.last_error = None;
            metrics::increment_live_connections();
        } else if previous == ConnectionState::Live && next != ConnectionState::Live {
            metrics::decrement_live_connections();
        }

        if previous != next {
            tracing::info!(
                broker_account_id = %self.account(),
                epoch = control.epoch,
                from = %previous,
                to = %next,
                "Connection state changed"
            );
        }
        self.publish_status(control);
        true
    }

    fn event_sink(&self, epoch: u64) -> TransportEventSink {
        let weak = self.self_ref.clone();
        Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(epoch, event);
            }
        })
    }

    fn schedule<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let weak = self.self_ref.clone();
        self.scheduler.after(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    task(&inner);
                }
            }),
        )
    }

    fn notify_update(&self) {
        let callback = self.on_update.read().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn connect_locked(&self, control: &mut Control) {
        if control.state.is_active() {
            tracing::debug!(
                broker_account_id = %self.account(),
                state = %control.state,
                "Connect ignored, already connecting or connected"
            );
            return;
        }

        control.reconnect.cancel();
        control.epoch += 1;
        let epoch = control.epoch;
        if !self.transition(control, ConnectionState::Connecting) {
            return;
        }

        control.numeric_user_id = match numeric_user_id(&self.credentials.access_token) {
            Ok(user_id) => Some(user_id),
            Err(e) => {
                tracing::warn!(
                    broker_account_id = %self.account(),
                    error = %e,
                    "Access token has no numeric user id"
                );
                None
            }
        };
        control.ids = MessageIds::new();
        control.sync_request_id = None;
        control.auth.on_socket_closed();

        tracing::debug!(broker_account_id = %self.account(), epoch, url = %self.url, "Opening transport");
        control.transport = Some(self.connector.open(&self.url, self.event_sink(epoch)));
    }

    fn disconnect(&self) {
        let mut control = self.control.lock();
        control.heartbeat.stop();
        control.settle.cancel();
        control.reconnect.cancel();
        control.epoch += 1;
        if let Some(transport) = control.transport.take() {
            transport.close(NORMAL_CLOSE, CLIENT_DISCONNECT);
        }
        self.reconciler.write().clear();
        control.sync_request_id = None;
        control.policy.reset();
        control.auth.reset();
        control.last_error = None;
        self.transition(&mut control, ConnectionState::Disconnected);
    }

    /// Stop timers, drop the socket and the entity sets. The epoch moves on
    /// so anything still in flight for the old socket is ignored.
    fn teardown(&self, control: &mut Control) {
        control.heartbeat.stop();
        control.settle.cancel();
        control.epoch += 1;
        if let Some(transport) = control.transport.take() {
            transport.close(NORMAL_CLOSE, CLIENT_RECONNECT);
        }
        control.sync_request_id = None;
        control.auth.on_socket_closed();
        self.reconciler.write().clear();
    }

    fn schedule_reconnect(&self, control: &mut Control, reason: String) {
        control.last_error = Some(reason);

        let Some(delay) = control.policy.next_delay() else {
            tracing::error!(
                broker_account_id = %self.account(),
                attempts = control.policy.attempt_count(),
                "Reconnect attempts exhausted"
            );
            self.transition(control, ConnectionState::Disconnected);
            return;
        };

        if !self.transition(control, ConnectionState::Reconnecting) {
            return;
        }
        metrics::record_reconnect();
        tracing::info!(
            broker_account_id = %self.account(),
            attempt = control.policy.attempt_count(),
            delay_ms = delay.as_millis(),
            "Reconnect scheduled"
        );

        let epoch = control.epoch;
        let handle = self.schedule(delay, move |inner| inner.on_reconnect_timer(epoch));
        control.reconnect.arm(handle);
    }

    fn on_reconnect_timer(&self, epoch: u64) {
        let mut control = self.control.lock();
        control.reconnect.release();
        if control.epoch != epoch || control.state != ConnectionState::Reconnecting {
            return;
        }
        self.connect_locked(&mut control);
    }

    // =========================================================================
    // Transport Events
    // =========================================================================

    fn handle_event(&self, epoch: u64, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_opened(epoch),
            TransportEvent::Message(text) => self.on_message(epoch, &text),
            TransportEvent::Error(reason) => {
                self.on_failure(epoch, format!("transport error: {reason}"));
            }
            TransportEvent::Closed { code, reason } if code == NORMAL_CLOSE => {
                self.on_normal_close(epoch, &reason);
            }
            TransportEvent::Closed { code, reason } => {
                self.on_failure(epoch, format!("closed with code {code}: {reason}"));
            }
        }
    }

    fn on_opened(&self, epoch: u64) {
        let mut control = self.control.lock();
        if control.epoch != epoch || control.state != ConnectionState::Connecting {
            return;
        }
        self.transition(&mut control, ConnectionState::Authenticating);

        let authorize = self.codec.encode(&Command::Authorize {
            token: self.credentials.access_token.clone(),
        });
        if control.send(&authorize) {
            control.auth.on_authorize_sent();
        }

        self.arm_heartbeat(&mut control, epoch);
        let handle = self.schedule(self.settle_delay, move |inner| inner.on_settle(epoch));
        control.settle.arm(handle);
    }

    fn arm_heartbeat(&self, control: &mut Control, epoch: u64) {
        let handle = self.schedule(control.heartbeat.interval(), move |inner| {
            inner.on_heartbeat(epoch);
        });
        control.heartbeat.arm(handle);
    }

    fn on_heartbeat(&self, epoch: u64) {
        let mut control = self.control.lock();
        if control.epoch != epoch {
            return;
        }
        if control.transport_open() && control.send(HEARTBEAT_ACK) {
            control.heartbeat.record_sent();
            metrics::record_heartbeat_sent();
        }
        self.arm_heartbeat(&mut control, epoch);
    }

    fn on_settle(&self, epoch: u64) {
        let mut control = self.control.lock();
        control.settle.release();
        if control.epoch != epoch
            || control.state != ConnectionState::Authenticating
            || !control.transport_open()
        {
            return;
        }

        let Some(user_id) = control.numeric_user_id else {
            tracing::error!(
                broker_account_id = %self.account(),
                "Cannot send sync request without a numeric user id"
            );
            control.last_error = Some("access token carries no numeric user id".to_string());
            self.publish_status(&control);
            return;
        };

        let id = control.ids.next_id();
        let request = self.codec.encode(&Command::sync_request(id, user_id));
        if control.send(&request) {
            control.sync_request_id = Some(id);
            tracing::debug!(broker_account_id = %self.account(), id, user_id, "Sync request sent");
            self.transition(&mut control, ConnectionState::Syncing);
        }
    }

    fn on_normal_close(&self, epoch: u64, reason: &str) {
        let mut control = self.control.lock();
        if control.epoch != epoch || control.state == ConnectionState::Disconnected {
            return;
        }
        tracing::info!(broker_account_id = %self.account(), reason, "Server closed connection");
        self.teardown(&mut control);
        control.policy.reset();
        control.last_error = None;
        self.transition(&mut control, ConnectionState::Disconnected);
        drop(control);
        self.notify_update();
    }

    fn on_failure(&self, epoch: u64, reason: String) {
        let mut control = self.control.lock();
        if control.epoch != epoch
            || control.reconnect.is_armed()
            || matches!(
                control.state,
                ConnectionState::Disconnected | ConnectionState::Reconnecting
            )
        {
            tracing::debug!(
                broker_account_id = %self.account(),
                reason = %reason,
                "Ignoring failure for inactive socket"
            );
            return;
        }

        tracing::warn!(broker_account_id = %self.account(), reason = %reason, "Connection failed");
        self.teardown(&mut control);
        self.schedule_reconnect(&mut control, reason);
        drop(control);
        self.notify_update();
    }

    // =========================================================================
    // Inbound Frames
    // =========================================================================

    fn on_message(&self, epoch: u64, text: &str) {
        if self.control.lock().epoch != epoch {
            return;
        }

        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    broker_account_id = %self.account(),
                    error = %e,
                    "Skipping undecodable frame"
                );
                metrics::record_decode_error(e.kind());
                return;
            }
        };
        metrics::record_frame_received(&frame);

        match frame {
            Frame::Open => {
                tracing::debug!(broker_account_id = %self.account(), "Server open frame");
            }
            Frame::Close { code, reason } => {
                tracing::info!(
                    broker_account_id = %self.account(),
                    code = ?code,
                    reason = %reason,
                    "Server close frame"
                );
            }
            Frame::Heartbeat => {
                let control = self.control.lock();
                if control.epoch == epoch && control.transport_open() {
                    control.send(HEARTBEAT_ACK);
                }
            }
            Frame::Array(items) => {
                for item in items {
                    match self.codec.classify(item) {
                        Ok(item) => self.dispatch(epoch, item),
                        Err(e) => {
                            tracing::warn!(
                                broker_account_id = %self.account(),
                                error = %e,
                                "Skipping undecodable item"
                            );
                            metrics::record_decode_error(e.kind());
                        }
                    }
                }
            }
        }
    }

    fn dispatch(&self, epoch: u64, item: ServerItem) {
        match item {
            ServerItem::Ack(ack) if ack.is_authorize() => self.on_authorize_ack(epoch, &ack),
            ServerItem::Ack(ack) => self.on_command_ack(epoch, ack),
            ServerItem::Event(event) => self.apply_events(epoch, vec![event]),
            ServerItem::InitialList(events) => self.apply_events(epoch, events),
            ServerItem::Unrecognized(value) => {
                tracing::debug!(broker_account_id = %self.account(), item = %value, "Unrecognized item");
                metrics::record_unrecognized_item();
            }
        }
    }

    fn on_authorize_ack(&self, epoch: u64, ack: &CommandAck) {
        let mut control = self.control.lock();
        if control.epoch != epoch {
            return;
        }

        let (error, decision) = match control.auth.on_ack(ack) {
            Ok(()) => {
                tracing::info!(broker_account_id = %self.account(), "Authorized");
                self.publish_status(&control);
                return;
            }
            Err(rejection) => rejection,
        };

        metrics::record_auth_rejection();
        tracing::warn!(
            broker_account_id = %self.account(),
            error = %error,
            failures = control.auth.failures(),
            "Authorization rejected"
        );

        self.teardown(&mut control);
        match decision {
            AuthDecision::Retry => self.schedule_reconnect(&mut control, error.to_string()),
            AuthDecision::GiveUp => {
                tracing::error!(
                    broker_account_id = %self.account(),
                    failures = control.auth.failures(),
                    "Giving up after repeated authorization rejections"
                );
                control.last_error = Some(error.to_string());
                self.transition(&mut control, ConnectionState::Disconnected);
            }
        }
        drop(control);
        self.notify_update();
    }

    fn on_command_ack(&self, epoch: u64, ack: CommandAck) {
        let mut control = self.control.lock();
        if control.epoch != epoch {
            return;
        }
        if control.sync_request_id != Some(ack.id) {
            tracing::debug!(
                broker_account_id = %self.account(),
                id = ack.id,
                status = ack.status,
                "Acknowledgment for unknown request"
            );
            return;
        }

        if !ack.is_ok() {
            let message = ack.error_text().unwrap_or_default();
            tracing::warn!(
                broker_account_id = %self.account(),
                status = ack.status,
                message = %message,
                "Sync request rejected"
            );
            control.last_error = Some(format!("sync request rejected ({}): {message}", ack.status));
            self.publish_status(&control);
            return;
        }

        if control.state == ConnectionState::Syncing {
            self.transition(&mut control, ConnectionState::Live);
        }
        drop(control);

        let events = ack
            .body
            .as_ref()
            .map(|body| self.codec.sync_ack_events(body))
            .unwrap_or_default();
        if events.is_empty() {
            self.notify_update();
        } else {
            self.apply_events(epoch, events);
        }
    }

    fn apply_events(&self, epoch: u64, events: Vec<SyncEvent>) {
        for event in events {
            let entity_type = event.entity_type;
            let outcome = {
                let mut control = self.control.lock();
                if control.epoch != epoch {
                    return;
                }
                if control.state == ConnectionState::Syncing {
                    self.transition(&mut control, ConnectionState::Live);
                }
                self.reconciler.write().apply(event)
            };

            if let ReconcileOutcome::Rejected { reason, .. } = &outcome {
                tracing::warn!(
                    broker_account_id = %self.account(),
                    entity_type = %entity_type,
                    reason = %reason,
                    "Skipping entity event"
                );
            } else {
                tracing::trace!(
                    broker_account_id = %self.account(),
                    entity_type = %entity_type,
                    outcome = ?outcome,
                    "Entity event applied"
                );
            }
            metrics::record_entity_event(entity_type, &outcome);
            self.notify_update();
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builds [`BrokerConnection`]s sharing one connector and scheduler.
#[derive(Clone)]
pub struct TradovateConnectionFactory {
    settings: ConnectionSettings,
    connector: Arc<dyn TransportConnector>,
    scheduler: Arc<dyn Scheduler>,
}

impl TradovateConnectionFactory {
    /// Create a factory.
    #[must_use]
    pub fn new(
        settings: ConnectionSettings,
        connector: Arc<dyn TransportConnector>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            settings,
            connector,
            scheduler,
        }
    }
}

impl ConnectionFactory for TradovateConnectionFactory {
    fn create(&self, credentials: ConnectionCredentials) -> Arc<dyn SyncConnection> {
        Arc::new(BrokerConnection::new(
            credentials,
            &self.settings,
            Arc::clone(&self.connector),
            Arc::clone(&self.scheduler),
        ))
    }
}

impl std::fmt::Debug for TradovateConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradovateConnectionFactory")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
