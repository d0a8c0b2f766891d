//! Edgelink — connection lifecycle controller for remote device links.
//!
//! Keeps a control panel linked to an embedded device behind NAT: it
//! registers with a cloud signaling service, discovers the remote peer,
//! dials a direct data channel, and recovers from dropped signaling
//! connections, stuck dial attempts, and transport errors.

pub mod config;
pub mod controller;
pub mod identity;
pub mod signaling;

mod timer;
