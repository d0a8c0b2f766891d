// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the recovery paths: stuck dials handled by the
//! watchdog, fatal signaling errors handled by the backoff restart, and
//! plain signaling drops revived by reconnect.

use std::time::Duration;

use tokio::sync::watch;

use edgelink::controller::{
    Command, LinkConfig, LinkController, LinkHandle, LinkStatus, PeerStatus, SignalingStatus,
};
use edgelink::identity::MemoryIdentityStore;
use edgelink::signaling::loopback::LoopbackSignaling;
use edgelink::signaling::{EventSink, SignalingConnector, SignalingError, SignalingOptions};

/// Link timing tuned for fast tests.
fn fast_config() -> LinkConfig {
    LinkConfig {
        signaling: SignalingOptions::default(),
        discovery_pause: Duration::from_millis(25),
        dial_timeout: Duration::from_millis(200),
        error_backoff: Duration::from_millis(50),
    }
}

fn spawn_controller(network: &LoopbackSignaling) -> (LinkHandle, tokio::task::JoinHandle<()>) {
    let store = MemoryIdentityStore::new();
    let (controller, handle) = LinkController::new(network.connector(), store, fast_config());
    let task = tokio::spawn(controller.run());
    (handle, task)
}

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

async fn bring_up_signaling(handle: &LinkHandle) -> (watch::Receiver<LinkStatus>, String) {
    handle.dispatch(Command::Initialize).unwrap();
    let mut status = handle.watch();
    let connected = wait_for_status(&mut status, "signaling connected", |s| {
        s.signaling == SignalingStatus::Connected
    })
    .await;
    let local_id = connected.local_id.expect("local identity assigned");
    (status, local_id)
}

#[tokio::test]
async fn watchdog_rebuilds_after_unanswered_dial() {
    let network = LoopbackSignaling::new();
    let (handle, task) = spawn_controller(&network);
    let (mut status, local_id) = bring_up_signaling(&handle).await;
    assert_eq!(network.clients_opened(), 1);

    // Dial a peer nobody registered: the dial never confirms.
    handle
        .dispatch(Command::ConnectPeer("ghost-device".to_string()))
        .unwrap();
    wait_for_status(&mut status, "dial in flight", |s| {
        s.peer == PeerStatus::Connecting
    })
    .await;

    // The watchdog gives up, tears the client down, and rebuilds: the
    // loopback service re-registers us immediately, so the end state is a
    // fresh signaling connection with the dial abandoned.
    wait_for_status(&mut status, "signaling rebuilt", |s| {
        s.peer == PeerStatus::Disconnected && s.signaling == SignalingStatus::Connected
    })
    .await;
    assert_eq!(network.clients_opened(), 2);

    // The rebuilt connection kept the persisted identity.
    assert_eq!(handle.status().local_id.as_deref(), Some(local_id.as_str()));
    assert!(network.is_registered(&local_id));

    handle.dispatch(Command::Shutdown).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn fatal_error_restarts_after_backoff() {
    let network = LoopbackSignaling::new();
    let (handle, task) = spawn_controller(&network);
    let (mut status, local_id) = bring_up_signaling(&handle).await;

    assert!(network.inject_error(&local_id, SignalingError::Protocol("broker failure".to_string())));

    // Both statuses drop and the failure is visible in the snapshot.
    let dropped = wait_for_status(&mut status, "statuses reset", |s| {
        s.signaling == SignalingStatus::Disconnected && s.peer == PeerStatus::Disconnected
    })
    .await;
    assert!(
        dropped
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("broker failure"))
    );

    // After the backoff the whole sequence restarts by itself.
    wait_for_status(&mut status, "signaling restored", |s| {
        s.signaling == SignalingStatus::Connected
    })
    .await;
    assert_eq!(network.clients_opened(), 2);
    assert_eq!(handle.status().local_id.as_deref(), Some(local_id.as_str()));

    handle.dispatch(Command::Shutdown).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn manual_error_command_runs_the_same_recovery() {
    let network = LoopbackSignaling::new();
    let (handle, task) = spawn_controller(&network);
    let (mut status, _local_id) = bring_up_signaling(&handle).await;

    handle
        .dispatch(Command::HandleConnectionError("operator reset".to_string()))
        .unwrap();

    let dropped = wait_for_status(&mut status, "statuses reset", |s| {
        s.signaling == SignalingStatus::Disconnected
    })
    .await;
    assert_eq!(dropped.last_error.as_deref(), Some("operator reset"));

    wait_for_status(&mut status, "signaling restored", |s| {
        s.signaling == SignalingStatus::Connected
    })
    .await;

    handle.dispatch(Command::Shutdown).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn signaling_drop_is_revived_by_reconnect() {
    let network = LoopbackSignaling::new();
    let (handle, task) = spawn_controller(&network);
    let (mut status, local_id) = bring_up_signaling(&handle).await;

    assert!(network.disconnect(&local_id));
    wait_for_status(&mut status, "signaling dropped", |s| {
        s.signaling == SignalingStatus::Disconnected
    })
    .await;

    // A drop is not fatal: the same client handle reconnects, no rebuild.
    handle.dispatch(Command::ReconnectService).unwrap();
    wait_for_status(&mut status, "signaling revived", |s| {
        s.signaling == SignalingStatus::Connected
    })
    .await;
    assert_eq!(network.clients_opened(), 1);
    assert_eq!(handle.status().local_id.as_deref(), Some(local_id.as_str()));

    handle.dispatch(Command::Shutdown).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn discovery_resumes_after_error_recovery() {
    let network = LoopbackSignaling::new();
    let (handle, task) = spawn_controller(&network);
    let (mut status, local_id) = bring_up_signaling(&handle).await;

    // Discovery is running but the remote identity is not known yet.
    handle.dispatch(Command::Discover).unwrap();
    wait_for_status(&mut status, "discovering", |s| {
        s.peer == PeerStatus::Discovering
    })
    .await;

    // A fatal error interrupts discovery.
    assert!(network.inject_error(&local_id, SignalingError::ConnectionClosed));
    wait_for_status(&mut status, "statuses reset", |s| {
        s.signaling == SignalingStatus::Disconnected && s.peer == PeerStatus::Disconnected
    })
    .await;

    // After the automatic restart, a new discovery round completes once
    // the device shows up.
    wait_for_status(&mut status, "signaling restored", |s| {
        s.signaling == SignalingStatus::Connected
    })
    .await;
    let (sink, _device_events) = EventSink::channel();
    let _device = network
        .connector()
        .connect(Some("device-1"), &SignalingOptions::default(), sink)
        .unwrap();

    handle
        .dispatch(Command::ChangeRemotePeer("device-1".to_string()))
        .unwrap();
    handle.dispatch(Command::Discover).unwrap();
    wait_for_status(&mut status, "peer connected", |s| {
        s.peer == PeerStatus::Connected
    })
    .await;

    handle.dispatch(Command::Shutdown).unwrap();
    task.await.unwrap();
}
