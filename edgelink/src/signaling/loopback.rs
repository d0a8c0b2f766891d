//! In-process signaling network for tests and demos.
//!
//! [`LoopbackSignaling`] keeps a registry of peers inside one process and
//! brokers channel pairs over [`tokio::sync::mpsc`] channels, standing in
//! for a real cloud signaling service. Fault-injection hooks
//! ([`disconnect`](LoopbackSignaling::disconnect),
//! [`inject_error`](LoopbackSignaling::inject_error)) simulate the outages
//! a deployed service produces.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    DirectChannel, EventSink, SignalingClient, SignalingConnector, SignalingError, SignalingEvent,
    SignalingOptions,
};

/// Registry shared by every connector and client of one network.
#[derive(Default)]
struct Registry {
    /// Event sinks of currently registered peers, keyed by identity.
    peers: HashMap<String, EventSink<LoopbackChannel>>,
    /// Total number of client handles ever constructed on this network.
    clients_opened: usize,
}

/// An in-process signaling service.
///
/// Clone-cheap handle: [`connector`](Self::connector) hands out factories
/// that register peers on the shared registry.
#[derive(Clone, Default)]
pub struct LoopbackSignaling {
    inner: Arc<Mutex<Registry>>,
}

impl LoopbackSignaling {
    /// Create an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector that registers clients on this network.
    #[must_use]
    pub fn connector(&self) -> LoopbackConnector {
        LoopbackConnector {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Whether a peer is currently registered under `id`.
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.inner.lock().peers.contains_key(id)
    }

    /// Number of client handles constructed on this network so far.
    #[must_use]
    pub fn clients_opened(&self) -> usize {
        self.inner.lock().clients_opened
    }

    /// Drop a peer's signaling connection: it is unregistered and told
    /// `Disconnected`. Returns `false` when no such peer is registered.
    pub fn disconnect(&self, id: &str) -> bool {
        let Some(sink) = self.inner.lock().peers.remove(id) else {
            return false;
        };
        sink.emit(SignalingEvent::Disconnected);
        true
    }

    /// Deliver a fatal transport error to a registered peer and drop its
    /// registration. Returns `false` when no such peer is registered.
    pub fn inject_error(&self, id: &str, error: SignalingError) -> bool {
        let Some(sink) = self.inner.lock().peers.remove(id) else {
            return false;
        };
        sink.emit(SignalingEvent::Error(error));
        true
    }
}

/// Connector producing [`LoopbackClient`] handles.
pub struct LoopbackConnector {
    inner: Arc<Mutex<Registry>>,
}

impl SignalingConnector for LoopbackConnector {
    type Channel = LoopbackChannel;
    type Client = LoopbackClient;

    fn connect(
        &mut self,
        local_id: Option<&str>,
        _options: &SignalingOptions,
        events: EventSink<LoopbackChannel>,
    ) -> Result<LoopbackClient, SignalingError> {
        let id = local_id
            .filter(|requested| !requested.is_empty())
            .map_or_else(|| Uuid::now_v7().to_string(), str::to_string);

        {
            let mut registry = self.inner.lock();
            registry.peers.insert(id.clone(), events.clone());
            registry.clients_opened += 1;
        }
        events.emit(SignalingEvent::Open(id.clone()));

        Ok(LoopbackClient {
            id: Some(id.clone()),
            last_known_id: Some(id.clone()),
            registered_as: Some(id),
            inner: Arc::clone(&self.inner),
            events,
            destroyed: false,
        })
    }
}

/// Client handle on a [`LoopbackSignaling`] network.
pub struct LoopbackClient {
    id: Option<String>,
    last_known_id: Option<String>,
    /// Key the event sink is registered under, for cleanup on destroy.
    registered_as: Option<String>,
    inner: Arc<Mutex<Registry>>,
    events: EventSink<LoopbackChannel>,
    destroyed: bool,
}

impl SignalingClient for LoopbackClient {
    type Channel = LoopbackChannel;

    fn id(&self) -> Option<String> {
        self.id.clone()
    }

    fn adopt_identity(&mut self, id: &str) {
        self.id = Some(id.to_string());
        self.last_known_id = Some(id.to_string());
    }

    fn connect(&mut self, remote_id: &str) -> Result<LoopbackChannel, SignalingError> {
        if self.destroyed {
            return Err(SignalingError::ConnectionClosed);
        }
        let local_id = self.id.clone().ok_or(SignalingError::MissingIdentity)?;

        let (caller_end, callee_end) = LoopbackChannel::pair(&local_id, remote_id);
        let callee_sink = self.inner.lock().peers.get(remote_id).cloned();
        if let Some(sink) = callee_sink {
            // Confirm both ends. The caller's confirmation shares its
            // endpoint with the pending handle returned below.
            let confirmed = caller_end.duplicate();
            sink.emit(SignalingEvent::Connection(callee_end));
            self.events.emit(SignalingEvent::Connection(confirmed));
        }
        // An unregistered callee leaves the dial pending forever; giving
        // up is the caller's watchdog's job.
        Ok(caller_end)
    }

    fn reconnect(&mut self) -> Result<(), SignalingError> {
        if self.destroyed {
            return Err(SignalingError::ConnectionClosed);
        }
        let id = self
            .id
            .clone()
            .or_else(|| self.last_known_id.clone())
            .ok_or(SignalingError::MissingIdentity)?;
        self.id = Some(id.clone());
        self.registered_as = Some(id.clone());
        self.inner
            .lock()
            .peers
            .insert(id.clone(), self.events.clone());
        self.events.emit(SignalingEvent::Open(id));
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Some(id) = self.registered_as.take() {
            self.inner.lock().peers.remove(&id);
        }
    }
}

/// One end of an in-process direct channel.
///
/// Both ends share an open flag: closing either side stops traffic in
/// both directions.
pub struct LoopbackChannel {
    remote_id: String,
    open: Arc<AtomicBool>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    incoming: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl LoopbackChannel {
    /// Build a connected pair of endpoints: `(caller end, callee end)`.
    fn pair(caller_id: &str, callee_id: &str) -> (Self, Self) {
        let (to_callee, from_caller) = mpsc::unbounded_channel();
        let (to_caller, from_callee) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let caller_end = Self {
            remote_id: callee_id.to_string(),
            open: Arc::clone(&open),
            outgoing: to_callee,
            incoming: Arc::new(tokio::sync::Mutex::new(from_callee)),
        };
        let callee_end = Self {
            remote_id: caller_id.to_string(),
            open,
            outgoing: to_caller,
            incoming: Arc::new(tokio::sync::Mutex::new(from_caller)),
        };
        (caller_end, callee_end)
    }

    /// Another handle to the same endpoint.
    fn duplicate(&self) -> Self {
        Self {
            remote_id: self.remote_id.clone(),
            open: Arc::clone(&self.open),
            outgoing: self.outgoing.clone(),
            incoming: Arc::clone(&self.incoming),
        }
    }

    /// Identity of the peer on the other end.
    #[must_use]
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Receive the next payload from the remote end. Returns `None` once
    /// the remote endpoint is gone and the queue is drained.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        let mut incoming = self.incoming.lock().await;
        incoming.recv().await
    }
}

impl DirectChannel for LoopbackChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    fn send(&self, payload: &[u8]) -> Result<(), SignalingError> {
        if !self.is_open() {
            return Err(SignalingError::ConnectionClosed);
        }
        self.outgoing
            .send(payload.to_vec())
            .map_err(|_| SignalingError::ConnectionClosed)
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::Relaxed);
    }
}
