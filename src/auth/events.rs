use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::broadcast;

/// Why the session was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureReason {
    /// Refresh failed `max_refresh_attempts` times in a row.
    TokenRefreshFailed,
}

/// Events emitted by the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A refresh persisted a new token.
    TokenRefreshed { token: String },
    /// The session was terminated; the UI should send the user to sign-in.
    AuthenticationFailed { reason: FailureReason },
}

/// Fan-out of [`SessionEvent`]s to any number of listeners.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No session event listeners");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_uses_wire_name() {
        assert_eq!(FailureReason::TokenRefreshFailed.to_string(), "token_refresh_failed");
        let json = serde_json::to_value(SessionEvent::AuthenticationFailed {
            reason: FailureReason::TokenRefreshFailed,
        })
        .unwrap();
        assert_eq!(json["event"], "authentication_failed");
        assert_eq!(json["reason"], "token_refresh_failed");
    }

    #[test]
    fn emit_without_listeners_is_harmless() {
        let bus = EventBus::default();
        bus.emit(SessionEvent::TokenRefreshed { token: "t".into() });
        let mut rx = bus.subscribe();
        bus.emit(SessionEvent::TokenRefreshed { token: "t2".into() });
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::TokenRefreshed { token: "t2".into() }
        );
    }
}
