//! Timer messages for the controller loop.
//!
//! Timers are delivered as plain messages so expiries are handled in the
//! same single-threaded loop as every other event. A timer is never
//! cancelled; it carries the generation it was armed under, and the
//! controller ignores expiries whose generation is no longer current.

use std::time::Duration;

use tokio::sync::mpsc;

/// What an armed timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Recurring discovery-loop tick.
    DiscoveryTick,
    /// One-shot watchdog over a dial attempt.
    DialWatchdog,
    /// One-shot pause before restarting after a fatal error.
    ErrorBackoff,
}

/// An armed timer, tagged with the generation of the attempt it guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Timer {
    pub kind: TimerKind,
    pub generation: u64,
}

/// Deliver `timer` on `tx` after `delay`. Delivery is dropped silently if
/// the receiving loop has already exited.
pub(crate) fn schedule(tx: &mpsc::UnboundedSender<Timer>, delay: Duration, timer: Timer) {
    let tx = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(timer);
    });
}
