//! Connection-lifecycle controller for the device link.
//!
//! [`LinkController`] owns the two coupled statuses of a device link — the
//! signaling-service connection and the direct peer connection — and every
//! action that transitions them: registering with the signaling service,
//! reconnecting after a drop, polling until the remote peer can be dialed,
//! supervising dial attempts with a watchdog, and restarting the whole
//! sequence after fatal errors.
//!
//! # Execution model
//!
//! All state lives in the controller and is mutated from a single
//! [`run`](LinkController::run) loop that drains three channels: commands
//! from the consumer, lifecycle events from the signaling client, and
//! timer expiries. One event is handled at a time, so a handler's state
//! mutations and transport calls never interleave with another handler's.
//!
//! Timers are never cancelled. Each armed timer carries a per-kind
//! generation token and its expiry handler re-checks both the token and
//! the current status, so a timer from a superseded attempt fires as a
//! no-op instead of acting on stale state.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::identity::{self, IdentityStore};
use crate::signaling::{
    DirectChannel, EventSink, SignalingClient, SignalingConnector, SignalingEvent,
    SignalingOptions,
};
use crate::timer::{self, Timer, TimerKind};

/// Status of the connection to the signaling service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignalingStatus {
    /// No usable signaling connection.
    #[default]
    Disconnected,
    /// Registration with the service is underway.
    Connecting,
    /// Registered; dials can be brokered.
    Connected,
}

impl fmt::Display for SignalingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Status of the direct connection to the remote peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PeerStatus {
    /// No direct channel and no attempt underway.
    #[default]
    Disconnected,
    /// Waiting for a remote identity and a signaling connection.
    Discovering,
    /// A dial has been issued and awaits confirmation.
    Connecting,
    /// Post-connect credential verification. No current transition
    /// reaches this state; it is reserved for a future identity check.
    Authenticating,
    /// The direct channel is up.
    Connected,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Discovering => write!(f, "discovering"),
            Self::Connecting => write!(f, "connecting"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Actions a consumer can ask the controller to take.
#[derive(Debug, Clone)]
pub enum Command {
    /// Load persisted identities and start connecting to the signaling
    /// service. Safe to call again after a teardown.
    Initialize,
    /// Build a fresh signaling connection.
    ConnectService,
    /// Revive the existing signaling connection after a drop.
    ReconnectService,
    /// Start the discovery loop that dials the remote peer once both the
    /// remote identity and the signaling connection are available.
    Discover,
    /// Dial the named remote peer now.
    ConnectPeer(String),
    /// Run the fatal-error recovery path. Normally triggered internally
    /// by signaling errors; exposed for manual recovery.
    HandleConnectionError(String),
    /// Set and persist a new remote peer identity. Picked up by the
    /// discovery loop on its next tick.
    ChangeRemotePeer(String),
    /// Clear the persisted remote peer identity.
    RemoveRemotePeer,
    /// Stop the controller loop and release the connection handles.
    Shutdown,
}

/// Snapshot of the controller state observable by consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatus {
    /// Signaling-service connection status.
    pub signaling: SignalingStatus,
    /// Direct peer connection status.
    pub peer: PeerStatus,
    /// Identity the signaling service knows us under.
    pub local_id: Option<String>,
    /// Identity of the remote peer we dial.
    pub remote_id: Option<String>,
    /// Human-readable description of the most recent failure.
    pub last_error: Option<String>,
}

/// Timing and transport parameters for a [`LinkController`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Options for reaching the signaling service.
    pub signaling: SignalingOptions,
    /// Pause between discovery-loop ticks.
    pub discovery_pause: Duration,
    /// How long a dial may stay unconfirmed before the watchdog rebuilds
    /// the signaling connection.
    pub dial_timeout: Duration,
    /// Pause before restarting the sequence after a fatal error. The
    /// delay is constant; there is no attempt cap.
    pub error_backoff: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            signaling: SignalingOptions::default(),
            discovery_pause: Duration::from_secs(3),
            dial_timeout: Duration::from_secs(30),
            error_backoff: Duration::from_secs(3),
        }
    }
}

/// The controller task has exited; no more commands can be delivered.
#[derive(Debug, thiserror::Error)]
#[error("link controller has stopped")]
pub struct ControllerStopped;

/// Consumer-side handle to a running [`LinkController`].
#[derive(Debug, Clone)]
pub struct LinkHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<LinkStatus>,
}

impl LinkHandle {
    /// Queue a command for the controller loop.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerStopped`] when the controller has exited.
    pub fn dispatch(&self, command: Command) -> Result<(), ControllerStopped> {
        self.commands.send(command).map_err(|_| ControllerStopped)
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// A watch receiver for awaiting status changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }
}

/// The connection-lifecycle state machine.
///
/// Construct with [`new`](Self::new), hand the returned [`LinkHandle`] to
/// the consumer, and spawn [`run`](Self::run) on the runtime.
pub struct LinkController<C, S>
where
    C: SignalingConnector,
    S: IdentityStore,
{
    config: LinkConfig,
    connector: C,
    store: S,

    commands: mpsc::UnboundedReceiver<Command>,
    signaling_rx: mpsc::UnboundedReceiver<SignalingEvent<C::Channel>>,
    sink: EventSink<C::Channel>,
    timer_tx: mpsc::UnboundedSender<Timer>,
    timer_rx: mpsc::UnboundedReceiver<Timer>,
    status_tx: watch::Sender<LinkStatus>,

    client: Option<C::Client>,
    channel: Option<C::Channel>,
    local_id: Option<String>,
    remote_id: Option<String>,
    signaling_status: SignalingStatus,
    peer_status: PeerStatus,
    last_error: Option<String>,

    discovery_generation: u64,
    dial_generation: u64,
    backoff_generation: u64,
}

impl<C, S> LinkController<C, S>
where
    C: SignalingConnector,
    S: IdentityStore,
{
    /// Create a controller and the handle consumers drive it with.
    #[must_use]
    pub fn new(connector: C, store: S, config: LinkConfig) -> (Self, LinkHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (sink, signaling_rx) = EventSink::channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());

        let controller = Self {
            config,
            connector,
            store,
            commands: command_rx,
            signaling_rx,
            sink,
            timer_tx,
            timer_rx,
            status_tx,
            client: None,
            channel: None,
            local_id: None,
            remote_id: None,
            signaling_status: SignalingStatus::default(),
            peer_status: PeerStatus::default(),
            last_error: None,
            discovery_generation: 0,
            dial_generation: 0,
            backoff_generation: 0,
        };
        let handle = LinkHandle {
            commands: command_tx,
            status: status_rx,
        };
        (controller, handle)
    }

    /// Drive the controller until [`Command::Shutdown`] arrives or every
    /// handle is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.signaling_rx.recv() => self.handle_signaling(event),
                Some(expired) = self.timer_rx.recv() => self.handle_timer(expired),
            }
            self.publish();
        }
        self.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Initialize => self.initialize(),
            Command::ConnectService => self.connect_service(),
            Command::ReconnectService => self.reconnect_service(),
            Command::Discover => self.discover(),
            Command::ConnectPeer(remote_id) => self.connect_peer(&remote_id),
            Command::HandleConnectionError(reason) => self.handle_connection_error(reason),
            Command::ChangeRemotePeer(new_id) => self.change_remote_peer(new_id),
            Command::RemoveRemotePeer => self.remove_remote_peer(),
            // Handled by run() before dispatch.
            Command::Shutdown => {}
        }
    }

    fn handle_signaling(&mut self, event: SignalingEvent<C::Channel>) {
        match event {
            SignalingEvent::Open(id) => self.on_open(id),
            SignalingEvent::Disconnected => {
                tracing::info!("signaling connection dropped");
                self.signaling_status = SignalingStatus::Disconnected;
            }
            SignalingEvent::Closed => {
                tracing::info!("signaling connection closed");
                self.signaling_status = SignalingStatus::Disconnected;
            }
            SignalingEvent::Error(error) => self.handle_connection_error(error.to_string()),
            SignalingEvent::Connection(channel) => self.on_connection(channel),
        }
    }

    fn handle_timer(&mut self, expired: Timer) {
        match expired.kind {
            TimerKind::DiscoveryTick => self.on_discovery_tick(expired.generation),
            TimerKind::DialWatchdog => self.on_dial_watchdog(expired.generation),
            TimerKind::ErrorBackoff => self.on_error_backoff(expired.generation),
        }
    }

    // -- signaling connection management --

    fn initialize(&mut self) {
        if self.local_id.is_none() {
            self.local_id = self.store.get(identity::LOCAL_PEER_ID);
        }
        if self.remote_id.is_none() {
            self.remote_id = self.store.get(identity::REMOTE_PEER_ID);
        }
        tracing::info!(
            local_id = ?self.local_id,
            remote_id = ?self.remote_id,
            "initializing device link"
        );
        self.connect_service();
    }

    fn connect_service(&mut self) {
        // Only one signaling connection may be live at a time.
        if let Some(mut old) = self.client.take() {
            old.destroy();
        }
        self.signaling_status = SignalingStatus::Connecting;
        match self
            .connector
            .connect(self.local_id.as_deref(), &self.config.signaling, self.sink.clone())
        {
            Ok(client) => self.client = Some(client),
            Err(error) => {
                tracing::warn!(%error, "signaling client construction failed");
                self.handle_connection_error(error.to_string());
            }
        }
    }

    fn reconnect_service(&mut self) {
        let Some(client) = self.client.as_mut() else {
            // Nothing to revive; fall back to a fresh connection.
            self.connect_service();
            return;
        };
        if client.id().is_none() {
            // The handle lost its identity during the outage. Restore the
            // persisted one so the service re-registers us under it.
            if let Some(saved) = self.local_id.clone() {
                tracing::info!(peer_id = %saved, "restoring persisted identity for reconnect");
                client.adopt_identity(&saved);
            }
        }
        self.signaling_status = SignalingStatus::Connecting;
        if let Err(error) = client.reconnect() {
            tracing::warn!(%error, "signaling reconnect failed");
            self.handle_connection_error(error.to_string());
        }
    }

    fn on_open(&mut self, id: String) {
        tracing::info!(peer_id = %id, "registered with signaling service");
        if self.local_id.as_deref() != Some(id.as_str())
            && let Err(error) = self.store.put(identity::LOCAL_PEER_ID, &id)
        {
            tracing::warn!(%error, "failed to persist local peer identity");
        }
        self.local_id = Some(id);
        self.signaling_status = SignalingStatus::Connected;
    }

    fn on_connection(&mut self, channel: C::Channel) {
        tracing::info!("direct channel to remote peer established");
        // Replacing the handle drops any pending handle from the same
        // dial; an explicit close here would tear down the link the two
        // handles share.
        self.channel = Some(channel);
        self.peer_status = PeerStatus::Connected;
    }

    // -- discovery loop --

    fn discover(&mut self) {
        if self.peer_status == PeerStatus::Connected {
            tracing::debug!("discovery skipped, peer already connected");
            return;
        }
        self.peer_status = PeerStatus::Discovering;
        self.arm_discovery_tick();
    }

    fn arm_discovery_tick(&mut self) {
        self.discovery_generation += 1;
        timer::schedule(
            &self.timer_tx,
            self.config.discovery_pause,
            Timer {
                kind: TimerKind::DiscoveryTick,
                generation: self.discovery_generation,
            },
        );
    }

    fn on_discovery_tick(&mut self, generation: u64) {
        if generation != self.discovery_generation {
            return;
        }
        if self.peer_status == PeerStatus::Connected {
            return;
        }
        let signaling_ready = self.signaling_status == SignalingStatus::Connected;
        match self.remote_id.clone() {
            Some(remote_id) if signaling_ready => {
                tracing::debug!(%remote_id, "discovery conditions met");
                self.connect_peer(&remote_id);
            }
            // Keep waiting. Re-arming here, and only here, guarantees a
            // single pending tick per loop.
            _ => self.arm_discovery_tick(),
        }
    }

    // -- direct connection establishment --

    fn connect_peer(&mut self, remote_id: &str) {
        if self.signaling_status != SignalingStatus::Connected || self.local_id.is_none() {
            tracing::warn!(%remote_id, "dial attempted before signaling is ready");
            return;
        }
        let Some(client) = self.client.as_mut() else {
            tracing::warn!(%remote_id, "dial attempted without a signaling client");
            return;
        };
        if let Some(mut dangling) = self.channel.take() {
            tracing::debug!("closing dangling direct channel before redial");
            dangling.close();
        }
        self.peer_status = PeerStatus::Connecting;
        tracing::info!(%remote_id, "dialing remote peer");
        match client.connect(remote_id) {
            Ok(pending) => self.channel = Some(pending),
            Err(error) => {
                tracing::warn!(%error, %remote_id, "dial failed");
                self.handle_connection_error(error.to_string());
                return;
            }
        }
        self.dial_generation += 1;
        timer::schedule(
            &self.timer_tx,
            self.config.dial_timeout,
            Timer {
                kind: TimerKind::DialWatchdog,
                generation: self.dial_generation,
            },
        );
    }

    fn on_dial_watchdog(&mut self, generation: u64) {
        if generation != self.dial_generation {
            return;
        }
        // The attempt may have resolved while this timer was pending.
        if self.peer_status != PeerStatus::Connecting {
            return;
        }
        // A dial stuck this long means the signaling connection itself is
        // poisoned, not just the peer unreachable. Rebuild from scratch.
        tracing::warn!("dial unconfirmed within timeout, rebuilding signaling connection");
        self.last_error = Some("dial attempt timed out".to_string());
        self.peer_status = PeerStatus::Disconnected;
        self.connect_service();
    }

    // -- error recovery --

    fn handle_connection_error(&mut self, reason: String) {
        tracing::warn!(%reason, "connection error, scheduling restart");
        self.last_error = Some(reason);
        self.signaling_status = SignalingStatus::Disconnected;
        self.peer_status = PeerStatus::Disconnected;
        self.backoff_generation += 1;
        timer::schedule(
            &self.timer_tx,
            self.config.error_backoff,
            Timer {
                kind: TimerKind::ErrorBackoff,
                generation: self.backoff_generation,
            },
        );
    }

    fn on_error_backoff(&mut self, generation: u64) {
        if generation != self.backoff_generation {
            return;
        }
        // Something else may have revived the connection during the pause.
        if self.signaling_status != SignalingStatus::Disconnected {
            return;
        }
        tracing::info!("restarting connection sequence after error backoff");
        self.initialize();
    }

    // -- remote identity management --

    fn change_remote_peer(&mut self, new_id: String) {
        tracing::info!(remote_id = %new_id, "remote peer identity changed");
        if let Err(error) = self.store.put(identity::REMOTE_PEER_ID, &new_id) {
            tracing::warn!(%error, "failed to persist remote peer identity");
        }
        // No dial from here; the discovery loop picks the new identity up
        // on its next tick.
        self.remote_id = Some(new_id);
    }

    fn remove_remote_peer(&mut self) {
        tracing::info!("remote peer identity removed");
        if let Err(error) = self.store.remove(identity::REMOTE_PEER_ID) {
            tracing::warn!(%error, "failed to clear remote peer identity");
        }
        // An in-flight dial is left to fail on its own.
        self.remote_id = None;
    }

    // -- teardown and observability --

    fn shutdown(&mut self) {
        tracing::info!("link controller shutting down");
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if let Some(mut client) = self.client.take() {
            client.destroy();
        }
        self.signaling_status = SignalingStatus::Disconnected;
        self.peer_status = PeerStatus::Disconnected;
        self.publish();
    }

    fn publish(&self) {
        let snapshot = LinkStatus {
            signaling: self.signaling_status,
            peer: self.peer_status,
            local_id: self.local_id.clone(),
            remote_id: self.remote_id.clone(),
            last_error: self.last_error.clone(),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
