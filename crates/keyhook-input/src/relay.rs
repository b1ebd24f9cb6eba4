//! Termination relay from the hook thread to the owning thread.
//!
//! The hook never releases a session itself. Each End* transition posts one
//! [`RelayEvent`]; the owning thread drains the channel and releases the
//! session named by each event.

use keyhook_core::types::SessionId;
use tokio::sync::mpsc;

/// "Session `session` ended during run `run`."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelayEvent {
    pub session: SessionId,
    pub run: u32,
}

/// Hook-side end of the relay. Posting never blocks and never fails.
#[derive(Debug, Clone)]
pub struct RelaySender {
    tx: mpsc::UnboundedSender<RelayEvent>,
}

impl RelaySender {
    pub fn post(&self, event: RelayEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!(session = %event.session, "relay closed, event dropped");
        }
    }
}

/// Owning-thread end of the relay.
#[derive(Debug)]
pub struct RelayReceiver {
    rx: mpsc::UnboundedReceiver<RelayEvent>,
}

impl RelayReceiver {
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RelayEvent> {
        self.rx.try_recv().ok()
    }

    /// Blocking receive for owning threads outside a runtime.
    pub fn blocking_recv(&mut self) -> Option<RelayEvent> {
        self.rx.blocking_recv()
    }
}

pub fn channel() -> (RelaySender, RelayReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RelaySender { tx }, RelayReceiver { rx })
}
