use serde::{Deserialize, Serialize};

use crate::types::{SessionId, Timestamp};

/// Lifecycle events emitted by the capture runtime.
///
/// Consumed by whoever subscribes to the runtime's broadcast channel: the CLI
/// logs them, tests use them to observe ordering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum CaptureEvent {
    // =========================================================================
    // Session Events
    // =========================================================================
    /// A session was pushed onto the active stack.
    SessionStarted {
        session: SessionId,
        timeout_ms: u32,
        timestamp: Timestamp,
    },

    /// A session's termination relay was processed.
    SessionEnded {
        session: SessionId,
        reason: String,
        timestamp: Timestamp,
    },

    /// A session was unlinked and its lifetime reference handed back.
    SessionReleased {
        session: SessionId,
        needs_callback: bool,
        timestamp: Timestamp,
    },

    /// A relay event named a session no longer on the stack.
    StaleRelayDropped {
        session: SessionId,
        timestamp: Timestamp,
    },

    /// The scheduler ended a session whose deadline passed.
    TimeoutFired {
        session: SessionId,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Hook Events
    // =========================================================================
    /// The keyboard hook was requested.
    HookInstalled { timestamp: Timestamp },

    /// The keyboard hook is no longer needed.
    HookUninstalled { timestamp: Timestamp },
}

impl CaptureEvent {
    /// Returns the timestamp of this event.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            CaptureEvent::SessionStarted { timestamp, .. }
            | CaptureEvent::SessionEnded { timestamp, .. }
            | CaptureEvent::SessionReleased { timestamp, .. }
            | CaptureEvent::StaleRelayDropped { timestamp, .. }
            | CaptureEvent::TimeoutFired { timestamp, .. }
            | CaptureEvent::HookInstalled { timestamp }
            | CaptureEvent::HookUninstalled { timestamp } => *timestamp,
        }
    }

    /// Returns a short name for the event type, used in logs.
    pub fn event_name(&self) -> &'static str {
        match self {
            CaptureEvent::SessionStarted { .. } => "session_started",
            CaptureEvent::SessionEnded { .. } => "session_ended",
            CaptureEvent::SessionReleased { .. } => "session_released",
            CaptureEvent::StaleRelayDropped { .. } => "stale_relay_dropped",
            CaptureEvent::TimeoutFired { .. } => "timeout_fired",
            CaptureEvent::HookInstalled { .. } => "hook_installed",
            CaptureEvent::HookUninstalled { .. } => "hook_uninstalled",
        }
    }

    /// The session this event concerns, if any.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            CaptureEvent::SessionStarted { session, .. }
            | CaptureEvent::SessionEnded { session, .. }
            | CaptureEvent::SessionReleased { session, .. }
            | CaptureEvent::StaleRelayDropped { session, .. }
            | CaptureEvent::TimeoutFired { session, .. } => Some(*session),
            CaptureEvent::HookInstalled { .. } | CaptureEvent::HookUninstalled { .. } => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn all_events() -> Vec<CaptureEvent> {
        let ts = Timestamp(1_700_000_000);
        let session = SessionId(3);
        vec![
            CaptureEvent::SessionStarted {
                session,
                timeout_ms: 100,
                timestamp: ts,
            },
            CaptureEvent::SessionEnded {
                session,
                reason: "EndKey".to_string(),
                timestamp: ts,
            },
            CaptureEvent::SessionReleased {
                session,
                needs_callback: false,
                timestamp: ts,
            },
            CaptureEvent::StaleRelayDropped {
                session,
                timestamp: ts,
            },
            CaptureEvent::TimeoutFired {
                session,
                timestamp: ts,
            },
            CaptureEvent::HookInstalled { timestamp: ts },
            CaptureEvent::HookUninstalled { timestamp: ts },
        ]
    }

    #[test]
    fn test_event_names_unique() {
        let mut names: Vec<&str> = all_events().iter().map(|e| e.event_name()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_event_timestamp() {
        for event in all_events() {
            assert_eq!(event.timestamp(), Timestamp(1_700_000_000));
        }
    }

    #[test]
    fn test_event_session() {
        let events = all_events();
        assert_eq!(events[0].session(), Some(SessionId(3)));
        assert_eq!(events[5].session(), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = CaptureEvent::SessionEnded {
            session: SessionId(9),
            reason: "Match".to_string(),
            timestamp: Timestamp(1),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("SessionEnded"));
        assert!(json.contains("Match"));
        let back: CaptureEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
