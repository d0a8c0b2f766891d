//! Edgelink — connection lifecycle controller demo.
//!
//! Runs the link controller against an in-process loopback signaling
//! network with a simulated device endpoint, so the whole lifecycle —
//! registration, discovery, dial, direct channel — can be watched in the
//! logs without a deployed signaling service.
//!
//! ```bash
//! # Full demo lifecycle against the built-in device
//! cargo run --bin edgelink
//!
//! # Dial a peer that does not exist to watch the watchdog recover
//! cargo run --bin edgelink -- --remote-peer ghost --log-level debug
//! ```
//!
//! A real deployment swaps the loopback connector for an implementation
//! of the `SignalingConnector` trait that speaks to its broker.

use std::time::Duration;

use clap::Parser;

use edgelink::config::{CliArgs, ClientConfig};
use edgelink::controller::{Command, LinkController, PeerStatus};
use edgelink::identity::{FileIdentityStore, IdentityStore, MemoryIdentityStore};
use edgelink::signaling::loopback::LoopbackSignaling;
use edgelink::signaling::{
    DirectChannel, EventSink, SignalingConnector, SignalingEvent, SignalingOptions,
};

/// Identity the simulated device registers under.
const DEMO_DEVICE_ID: &str = "demo-device";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    init_logging(&cli.log_level);
    tracing::info!("edgelink starting");

    let network = LoopbackSignaling::new();
    spawn_demo_device(&network, config.to_link_config().signaling);

    let store = open_identity_store(&config);
    let (controller, handle) = LinkController::new(
        network.connector(),
        store,
        config.to_link_config(),
    );
    let controller_task = tokio::spawn(controller.run());

    let remote_peer = config
        .remote_peer
        .clone()
        .unwrap_or_else(|| DEMO_DEVICE_ID.to_string());

    handle.dispatch(Command::Initialize)?;
    handle.dispatch(Command::ChangeRemotePeer(remote_peer))?;
    handle.dispatch(Command::Discover)?;

    let mut status = handle.watch();
    match tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| s.peer == PeerStatus::Connected),
    )
    .await
    {
        Ok(Ok(_)) => {
            let snapshot = handle.status();
            tracing::info!(
                local_id = ?snapshot.local_id,
                remote_id = ?snapshot.remote_id,
                "direct channel established"
            );
        }
        Ok(Err(_)) => return Err("controller stopped before the link came up".into()),
        Err(_) => {
            let snapshot = handle.status();
            tracing::warn!(
                signaling = %snapshot.signaling,
                peer = %snapshot.peer,
                last_error = ?snapshot.last_error,
                "link did not come up within 10s"
            );
        }
    }

    // Give the device a moment to greet us before tearing down.
    tokio::time::sleep(Duration::from_millis(200)).await;

    handle.dispatch(Command::Shutdown)?;
    controller_task.await?;
    tracing::info!("edgelink exiting");
    Ok(())
}

/// Initialize console logging with an env-filter.
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

/// Open the file-backed identity store, falling back to an in-memory one
/// when no usable path exists.
fn open_identity_store(config: &ClientConfig) -> Box<dyn IdentityStore> {
    let path = config
        .identity_file
        .clone()
        .or_else(FileIdentityStore::default_path);
    match path {
        Some(path) => match FileIdentityStore::open(&path) {
            Ok(store) => {
                tracing::debug!(path = %store.path().display(), "using file identity store");
                Box::new(store)
            }
            Err(error) => {
                tracing::warn!(%error, "identity file unusable, using in-memory store");
                Box::new(MemoryIdentityStore::new())
            }
        },
        None => Box::new(MemoryIdentityStore::new()),
    }
}

/// Register the simulated device on the loopback network and answer
/// inbound channels with a greeting.
fn spawn_demo_device(network: &LoopbackSignaling, options: SignalingOptions) {
    let (sink, mut events) = EventSink::channel();
    let client = match network
        .connector()
        .connect(Some(DEMO_DEVICE_ID), &options, sink)
    {
        Ok(client) => client,
        Err(error) => {
            tracing::warn!(%error, "demo device failed to register");
            return;
        }
    };

    tokio::spawn(async move {
        // Keep the registration alive for the lifetime of the task.
        let _client = client;
        while let Some(event) = events.recv().await {
            match event {
                SignalingEvent::Open(id) => {
                    tracing::info!(device_id = %id, "demo device registered");
                }
                SignalingEvent::Connection(channel) => {
                    tracing::info!(
                        panel_id = %channel.remote_id(),
                        "demo device accepted a direct channel"
                    );
                    if let Err(error) = channel.send(b"hello from demo-device") {
                        tracing::warn!(%error, "demo device greeting failed");
                        continue;
                    }
                    tokio::spawn(async move {
                        while let Some(payload) = channel.recv().await {
                            tracing::info!(
                                bytes = payload.len(),
                                "demo device received payload"
                            );
                        }
                    });
                }
                SignalingEvent::Disconnected
                | SignalingEvent::Closed
                | SignalingEvent::Error(_) => {
                    tracing::warn!("demo device lost its signaling connection");
                }
            }
        }
    });
}
