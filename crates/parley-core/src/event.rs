use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{
    Issue, ParticipantSummary, SessionConfig, SessionId, SeverityCounts, StopRule, TokenUsage,
};

/// Per-subscriber queue depth. A subscriber that falls further behind than
/// this loses the oldest events and receives a synthetic warn log instead.
pub const SUBSCRIBER_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Participant data carried on `roundtable_generated` events.
pub type ParticipantInfo = ParticipantSummary;

/// Progress events for one refinement session, in emission order.
///
/// Payload schemas are stable; evolution is additive-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionCreated {
        session_id: SessionId,
        title: String,
        config: SessionConfig,
    },
    RoundtableGenerating {
        message: String,
        num_participants: u32,
    },
    RoundtableGenerated {
        participants: Vec<ParticipantInfo>,
        moderator_focus: String,
    },
    IterationStart {
        iteration: u32,
        max_iterations: u32,
    },
    CriticReviewStart {
        critic: String,
    },
    CriticReviewComplete {
        critic: String,
        issues_count: usize,
        counts: SeverityCounts,
        /// First three issues, for live display.
        top_issues: Vec<Issue>,
        tokens: TokenUsage,
    },
    ConvergenceCheck {
        iteration: u32,
        counts: SeverityCounts,
        converged: bool,
        reason: String,
    },
    ModeratorStart {
        iteration: u32,
    },
    ModeratorComplete {
        new_version: u32,
        tokens: TokenUsage,
    },
    RefinementComplete {
        final_version: u32,
        converged: bool,
        stopped_by: StopRule,
        iterations_count: u32,
        final_issue_count: SeverityCounts,
        total_tokens: u64,
    },
    Log {
        level: LogLevel,
        source: String,
        message: String,
    },
}

impl SessionEvent {
    pub fn log(level: LogLevel, source: &str, message: impl Into<String>) -> Self {
        SessionEvent::Log {
            level,
            source: source.to_string(),
            message: message.into(),
        }
    }
}

/// Per-session fan-out of ordered progress events.
///
/// One broadcast channel per session; the producer never blocks on
/// subscribers, and a subscriber joining mid-run sees only events emitted
/// from its join point forward. Reconnecting clients rebuild state from
/// the runtime's status/artifact reads, not from replay.
pub struct RoundtableBus {
    channels: RwLock<HashMap<SessionId, broadcast::Sender<SessionEvent>>>,
}

impl Default for RoundtableBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundtableBus {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    fn sender(&self, session_id: &str) -> broadcast::Sender<SessionEvent> {
        {
            let channels = self.channels.read();
            if let Some(tx) = channels.get(session_id) {
                return tx.clone();
            }
        }
        let mut channels = self.channels.write();
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_QUEUE).0)
            .clone()
    }

    /// Emit an event to all current subscribers. Never blocks; events to a
    /// session with no subscribers are dropped.
    pub fn emit(&self, session_id: &str, event: SessionEvent) {
        let _ = self.sender(session_id).send(event);
    }

    /// Subscribe to a session's live event stream. Non-blocking; allowed in
    /// any session state. No historical replay.
    pub fn subscribe(&self, session_id: &str) -> EventStream {
        EventStream {
            rx: self.sender(session_id).subscribe(),
        }
    }

    /// Tear down a session's channel. Outstanding subscribers drain what
    /// they already have, then observe end-of-stream.
    pub fn remove(&self, session_id: &str) {
        self.channels.write().remove(session_id);
    }

    /// Number of live subscribers for a session.
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.channels
            .read()
            .get(session_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// A live view onto one session's events. Dropping it unsubscribes;
/// unsubscribing never affects the session.
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<SessionEvent>,
}

impl EventStream {
    /// Next event, or `None` once the session's channel is gone and the
    /// backlog is drained. A subscriber that lagged past the queue bound
    /// gets a synthetic warn log in place of the dropped events.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => Some(SessionEvent::log(
                LogLevel::Warn,
                "bus",
                format!("events dropped: subscriber lagged behind by {missed}"),
            )),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant; `None` when no event is ready right now.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => Some(SessionEvent::log(
                LogLevel::Warn,
                "bus",
                format!("events dropped: subscriber lagged behind by {missed}"),
            )),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(msg: &str) -> SessionEvent {
        SessionEvent::log(LogLevel::Info, "test", msg)
    }

    fn message_of(event: &SessionEvent) -> String {
        match event {
            SessionEvent::Log { message, .. } => message.clone(),
            other => panic!("expected log event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivers_in_emission_order() {
        let bus = RoundtableBus::new();
        let mut stream = bus.subscribe("s1");
        bus.emit("s1", info("one"));
        bus.emit("s1", info("two"));
        bus.emit("s1", info("three"));
        assert_eq!(message_of(&stream.recv().await.unwrap()), "one");
        assert_eq!(message_of(&stream.recv().await.unwrap()), "two");
        assert_eq!(message_of(&stream.recv().await.unwrap()), "three");
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let bus = RoundtableBus::new();
        let mut a = bus.subscribe("a");
        let mut b = bus.subscribe("b");
        bus.emit("a", info("for a"));
        bus.emit("b", info("for b"));
        assert_eq!(message_of(&a.recv().await.unwrap()), "for a");
        assert_eq!(message_of(&b.recv().await.unwrap()), "for b");
        assert!(a.try_recv().is_none());
    }

    #[tokio::test]
    async fn late_joiner_sees_no_history() {
        let bus = RoundtableBus::new();
        bus.emit("s", info("before"));
        let mut stream = bus.subscribe("s");
        bus.emit("s", info("after"));
        assert_eq!(message_of(&stream.recv().await.unwrap()), "after");
    }

    #[tokio::test]
    async fn slow_subscriber_gets_drop_warning() {
        let bus = RoundtableBus::new();
        let mut stream = bus.subscribe("s");
        for i in 0..(SUBSCRIBER_QUEUE + 10) {
            bus.emit("s", info(&format!("event {i}")));
        }
        let first = stream.recv().await.unwrap();
        match first {
            SessionEvent::Log {
                level: LogLevel::Warn,
                ref message,
                ..
            } => assert!(message.contains("events dropped")),
            other => panic!("expected drop warning, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsubscribe_is_harmless_to_survivors() {
        let bus = RoundtableBus::new();
        let mut keep = bus.subscribe("s");
        let gone = bus.subscribe("s");
        drop(gone);
        bus.emit("s", info("still flowing"));
        assert_eq!(message_of(&keep.recv().await.unwrap()), "still flowing");
        assert_eq!(bus.subscriber_count("s"), 1);
    }

    #[tokio::test]
    async fn remove_closes_streams_after_drain() {
        let bus = RoundtableBus::new();
        let mut stream = bus.subscribe("s");
        bus.emit("s", info("last"));
        bus.remove("s");
        assert_eq!(message_of(&stream.recv().await.unwrap()), "last");
        assert!(stream.recv().await.is_none());
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let event = SessionEvent::IterationStart {
            iteration: 2,
            max_iterations: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "iteration_start");
        assert_eq!(json["iteration"], 2);

        let back: SessionEvent = serde_json::from_value(json).unwrap();
        match back {
            SessionEvent::IterationStart { iteration, .. } => assert_eq!(iteration, 2),
            other => panic!("round trip mangled event: {other:?}"),
        }
    }
}
