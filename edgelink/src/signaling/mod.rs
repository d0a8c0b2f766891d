//! Signaling capability contract.
//!
//! Defines the traits the [`controller`](crate::controller) depends on to
//! reach a signaling service and the direct channels it brokers. Concrete
//! implementations are external; [`loopback::LoopbackSignaling`] provides
//! an in-process one for tests and demos.
//!
//! Lifecycle notifications from a client are delivered as [`SignalingEvent`]
//! values through an [`EventSink`], so all state mutation stays in one
//! handler instead of being scattered across per-event callbacks.

pub mod loopback;

use tokio::sync::mpsc;

/// Options for reaching the signaling service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingOptions {
    /// Hostname of the signaling service.
    pub host: String,
    /// TCP port of the signaling service.
    pub port: u16,
    /// Whether to use a TLS-protected connection.
    pub secure: bool,
    /// Client-side verbosity knob passed through to the implementation.
    pub debug_level: u8,
}

impl Default for SignalingOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            secure: false,
            debug_level: 0,
        }
    }
}

/// Errors surfaced by signaling clients and direct channels.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    /// The connection to the signaling service or peer has been closed.
    #[error("signaling connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("signaling operation timed out")]
    Timeout,

    /// The named peer cannot be reached through this service.
    #[error("peer {0} is unreachable")]
    Unreachable(String),

    /// No identity is available for an operation that requires one.
    #[error("no local identity available")]
    MissingIdentity,

    /// The service rejected or garbled an exchange.
    #[error("signaling protocol error: {0}")]
    Protocol(String),
}

/// Lifecycle notifications emitted by a [`SignalingClient`].
///
/// `Ch` is the direct-channel handle type of the client that emitted the
/// event.
#[derive(Debug)]
pub enum SignalingEvent<Ch> {
    /// Registration confirmed; carries the identity the service assigned.
    Open(String),
    /// The signaling connection dropped without an error. The client
    /// object is still usable and can be asked to reconnect.
    Disconnected,
    /// The signaling connection closed for good.
    Closed,
    /// A transport-level failure on the signaling channel.
    Error(SignalingError),
    /// A direct channel is up — either an inbound offer from a remote
    /// peer or the confirmation of an outbound dial.
    Connection(Ch),
}

/// Delivery handle for [`SignalingEvent`]s.
///
/// A sink is handed to the connector when a client is constructed; every
/// clone delivers into the same receiver.
#[derive(Debug)]
pub struct EventSink<Ch> {
    tx: mpsc::UnboundedSender<SignalingEvent<Ch>>,
}

impl<Ch> EventSink<Ch> {
    /// Create a sink together with the receiver its events arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SignalingEvent<Ch>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver an event. Returns `false` when the receiving side is gone.
    pub fn emit(&self, event: SignalingEvent<Ch>) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl<Ch> Clone for EventSink<Ch> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// A live peer-to-peer data channel.
pub trait DirectChannel: Send {
    /// Whether the channel is currently open for traffic.
    fn is_open(&self) -> bool;

    /// Send an opaque payload to the remote end.
    ///
    /// # Errors
    ///
    /// Returns [`SignalingError::ConnectionClosed`] when the channel is no
    /// longer open.
    fn send(&self, payload: &[u8]) -> Result<(), SignalingError>;

    /// Close the channel. Idempotent.
    fn close(&mut self);
}

/// A live handle to the signaling service.
///
/// Implementations emit [`SignalingEvent`]s on the sink supplied at
/// construction; no failure surfaces any other way once the handle exists.
pub trait SignalingClient: Send {
    /// Direct-channel handle type produced by dials on this client.
    type Channel: DirectChannel;

    /// The identity this handle is currently registered under, if any.
    fn id(&self) -> Option<String>;

    /// Write `id` onto the handle as both its primary and last-known
    /// identity, so the next [`reconnect`](Self::reconnect) re-registers
    /// under it.
    fn adopt_identity(&mut self, id: &str);

    /// Dial a remote peer. The returned handle is pending until the
    /// service confirms it with a [`SignalingEvent::Connection`]; a dial
    /// to an unknown peer may never confirm.
    ///
    /// # Errors
    ///
    /// Fails only on unexpected local conditions (destroyed handle,
    /// missing identity); an unreachable remote is not an error here.
    fn connect(&mut self, remote_id: &str) -> Result<Self::Channel, SignalingError>;

    /// Re-establish the signaling connection under the identity currently
    /// set on the handle.
    ///
    /// # Errors
    ///
    /// Fails when the handle is destroyed or has no identity to offer.
    fn reconnect(&mut self) -> Result<(), SignalingError>;

    /// Release the handle permanently. Idempotent.
    fn destroy(&mut self);
}

/// Factory for [`SignalingClient`] handles.
///
/// Kept separate from the client so the controller can rebuild a poisoned
/// connection from scratch without holding implementation details.
pub trait SignalingConnector: Send {
    /// Direct-channel handle type of the produced clients.
    type Channel: DirectChannel;
    /// Client handle type this connector produces.
    type Client: SignalingClient<Channel = Self::Channel>;

    /// Construct a client registered under `local_id`, or under a
    /// service-assigned identity when `local_id` is `None`. Lifecycle
    /// events for the new client are delivered through `events`.
    ///
    /// # Errors
    ///
    /// Fails when the service cannot be reached at all; once a handle is
    /// returned, failures surface as [`SignalingEvent`]s instead.
    fn connect(
        &mut self,
        local_id: Option<&str>,
        options: &SignalingOptions,
        events: EventSink<Self::Channel>,
    ) -> Result<Self::Client, SignalingError>;
}
