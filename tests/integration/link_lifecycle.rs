// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the full link lifecycle against the loopback
//! signaling network: registration, discovery, dialing, inbound offers,
//! and identity persistence across controller restarts.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use edgelink::controller::{
    Command, LinkConfig, LinkController, LinkHandle, LinkStatus, PeerStatus, SignalingStatus,
};
use edgelink::identity::{IdentityStore, LOCAL_PEER_ID, MemoryIdentityStore, REMOTE_PEER_ID};
use edgelink::signaling::loopback::{LoopbackChannel, LoopbackClient, LoopbackSignaling};
use edgelink::signaling::{
    DirectChannel, EventSink, SignalingClient, SignalingConnector, SignalingEvent,
    SignalingOptions,
};

/// Link timing tuned for fast tests.
fn fast_config() -> LinkConfig {
    LinkConfig {
        signaling: SignalingOptions::default(),
        discovery_pause: Duration::from_millis(25),
        dial_timeout: Duration::from_millis(250),
        error_backoff: Duration::from_millis(50),
    }
}

/// Spawn a controller on `network` and return its handle plus an
/// observing clone of its identity store.
fn spawn_controller(
    network: &LoopbackSignaling,
) -> (LinkHandle, MemoryIdentityStore, tokio::task::JoinHandle<()>) {
    let store = MemoryIdentityStore::new();
    let (controller, handle) = LinkController::new(network.connector(), store.clone(), fast_config());
    let task = tokio::spawn(controller.run());
    (handle, store, task)
}

/// Register a bare device endpoint on the network. The returned client
/// must be kept alive for the registration to stay valid.
fn register_device(
    network: &LoopbackSignaling,
    id: &str,
) -> (
    LoopbackClient,
    mpsc::UnboundedReceiver<SignalingEvent<LoopbackChannel>>,
) {
    let (sink, events) = EventSink::channel();
    let client = network
        .connector()
        .connect(Some(id), &SignalingOptions::default(), sink)
        .expect("device registration failed");
    (client, events)
}

/// Wait for a status matching `pred`, with timeout. Panics on timeout or
/// controller exit.
async fn wait_for_status<F>(
    rx: &mut watch::Receiver<LinkStatus>,
    description: &str,
    pred: F,
) -> LinkStatus
where
    F: FnMut(&LinkStatus) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .unwrap_or_else(|_| panic!("timeout waiting for {description}"))
        .unwrap_or_else(|_| panic!("controller stopped while waiting for {description}"))
        .clone()
}

/// Wait for the next `Connection` event on a device's event stream.
async fn wait_for_inbound_channel(
    events: &mut mpsc::UnboundedReceiver<SignalingEvent<LoopbackChannel>>,
) -> LoopbackChannel {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        let remaining = deadline - tokio::time::Instant::now();
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Some(SignalingEvent::Connection(channel))) => return channel,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("device event stream closed"),
            Err(_) => break,
        }
    }
    panic!("timeout waiting for inbound channel");
}

#[tokio::test]
async fn panel_establishes_channel_to_device() {
    let network = LoopbackSignaling::new();
    let (_device, mut device_events) = register_device(&network, "device-1");
    let (handle, store, task) = spawn_controller(&network);

    handle.dispatch(Command::Initialize).unwrap();
    let mut status = handle.watch();
    let connected = wait_for_status(&mut status, "signaling connected", |s| {
        s.signaling == SignalingStatus::Connected
    })
    .await;
    let local_id = connected.local_id.expect("local identity assigned");

    handle
        .dispatch(Command::ChangeRemotePeer("device-1".to_string()))
        .unwrap();
    handle.dispatch(Command::Discover).unwrap();

    wait_for_status(&mut status, "peer connected", |s| {
        s.peer == PeerStatus::Connected
    })
    .await;

    // The device saw the inbound channel and can talk on it.
    let channel = wait_for_inbound_channel(&mut device_events).await;
    assert_eq!(channel.remote_id(), local_id);
    assert!(channel.is_open());
    channel.send(b"hello panel").unwrap();

    // Both identities were persisted through the store.
    assert_eq!(store.get(LOCAL_PEER_ID).as_deref(), Some(local_id.as_str()));
    assert_eq!(store.get(REMOTE_PEER_ID).as_deref(), Some("device-1"));

    handle.dispatch(Command::Shutdown).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn discovery_waits_for_remote_identity() {
    let network = LoopbackSignaling::new();
    let (_device, _device_events) = register_device(&network, "device-1");
    let (handle, _store, task) = spawn_controller(&network);

    handle.dispatch(Command::Initialize).unwrap();
    handle.dispatch(Command::Discover).unwrap();

    let mut status = handle.watch();
    wait_for_status(&mut status, "discovering", |s| {
        s.peer == PeerStatus::Discovering
    })
    .await;

    // Several discovery intervals with no remote identity: still waiting.
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(handle.status().peer, PeerStatus::Discovering);

    // The loop picks up the identity on its next tick, no extra Discover.
    handle
        .dispatch(Command::ChangeRemotePeer("device-1".to_string()))
        .unwrap();
    wait_for_status(&mut status, "peer connected", |s| {
        s.peer == PeerStatus::Connected
    })
    .await;

    handle.dispatch(Command::Shutdown).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn inbound_offer_marks_peer_connected() {
    let network = LoopbackSignaling::new();
    let (mut device, _device_events) = register_device(&network, "device-1");
    let (handle, _store, task) = spawn_controller(&network);

    handle.dispatch(Command::Initialize).unwrap();
    let mut status = handle.watch();
    let connected = wait_for_status(&mut status, "signaling connected", |s| {
        s.signaling == SignalingStatus::Connected
    })
    .await;
    let panel_id = connected.local_id.expect("local identity assigned");

    // The device dials the panel; the panel never issued a dial.
    let device_end = device.connect(&panel_id).expect("device dial failed");
    wait_for_status(&mut status, "peer connected", |s| {
        s.peer == PeerStatus::Connected
    })
    .await;
    assert!(device_end.is_open());

    handle.dispatch(Command::Shutdown).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn identity_survives_controller_restart() {
    let network = LoopbackSignaling::new();
    let store = MemoryIdentityStore::new();

    let (controller, handle) =
        LinkController::new(network.connector(), store.clone(), fast_config());
    let task = tokio::spawn(controller.run());
    handle.dispatch(Command::Initialize).unwrap();
    let mut status = handle.watch();
    let first = wait_for_status(&mut status, "signaling connected", |s| {
        s.signaling == SignalingStatus::Connected
    })
    .await;
    let first_id = first.local_id.expect("local identity assigned");
    handle.dispatch(Command::Shutdown).unwrap();
    task.await.unwrap();

    // A fresh controller over the same store re-registers under the same
    // identity instead of requesting a new one.
    let (controller, handle) =
        LinkController::new(network.connector(), store.clone(), fast_config());
    let task = tokio::spawn(controller.run());
    handle.dispatch(Command::Initialize).unwrap();
    let mut status = handle.watch();
    let second = wait_for_status(&mut status, "signaling connected again", |s| {
        s.signaling == SignalingStatus::Connected
    })
    .await;
    assert_eq!(second.local_id.as_deref(), Some(first_id.as_str()));

    handle.dispatch(Command::Shutdown).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn shutdown_releases_the_registration() {
    let network = LoopbackSignaling::new();
    let (handle, _store, task) = spawn_controller(&network);

    handle.dispatch(Command::Initialize).unwrap();
    let mut status = handle.watch();
    let connected = wait_for_status(&mut status, "signaling connected", |s| {
        s.signaling == SignalingStatus::Connected
    })
    .await;
    let local_id = connected.local_id.expect("local identity assigned");
    assert!(network.is_registered(&local_id));

    handle.dispatch(Command::Shutdown).unwrap();
    task.await.unwrap();

    assert!(!network.is_registered(&local_id));
    assert_eq!(handle.status().signaling, SignalingStatus::Disconnected);
    assert_eq!(handle.status().peer, PeerStatus::Disconnected);
}
