//! Real-time refresh signals for connected dispatch clients.

use serde::Serialize;
use tokio::sync::broadcast;

/// Fire-and-forget hooks called after unit assignments change.
pub trait Notifier: Send + Sync {
    fn officer_status_changed(&self);
    fn deputy_status_changed(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchSignal {
    UpdateOfficerStatus,
    UpdateEmsFdStatus,
}

/// Fans signals out to every subscriber (websocket sessions).
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<DispatchSignal>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        BroadcastNotifier { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchSignal> {
        self.sender.subscribe()
    }

    fn emit(&self, signal: DispatchSignal) {
        // No subscribers is fine; nobody is watching.
        let delivered = self.sender.send(signal).unwrap_or(0);
        tracing::trace!(
            target: "cad_dispatch",
            event = "signal_emitted",
            signal = ?signal,
            receivers = delivered
        );
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        BroadcastNotifier::new(64)
    }
}

impl Notifier for BroadcastNotifier {
    fn officer_status_changed(&self) {
        self.emit(DispatchSignal::UpdateOfficerStatus);
    }

    fn deputy_status_changed(&self) {
        self.emit(DispatchSignal::UpdateEmsFdStatus);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn officer_status_changed(&self) {}
    fn deputy_status_changed(&self) {}
}
