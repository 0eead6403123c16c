//! Integrity events emitted by supervisor loops

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::fingerprint::Digest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    NoDrift,
    Drifted,
    RecoveryOk,
    RecoveryFailed,
    Unmonitorable,
    /// A steady-state tick could not compute a fingerprint
    Unreadable,
}

impl EventKind {
    /// Whether this event reports a problem
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventKind::RecoveryFailed | EventKind::Unmonitorable | EventKind::Unreadable
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::NoDrift => "NoDrift",
            EventKind::Drifted => "Drifted",
            EventKind::RecoveryOk => "RecoveryOk",
            EventKind::RecoveryFailed => "RecoveryFailed",
            EventKind::Unmonitorable => "Unmonitorable",
            EventKind::Unreadable => "Unreadable",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityEvent {
    pub unit: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    /// Digest observed by the tick that produced this event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    /// Failure kind and cause, or other context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl IntegrityEvent {
    pub fn new(unit: &str, kind: EventKind) -> Self {
        Self {
            unit: unit.to_string(),
            kind,
            timestamp: Utc::now(),
            digest: None,
            detail: None,
        }
    }

    pub fn with_digest(mut self, digest: Digest) -> Self {
        self.digest = Some(digest);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Sending half of the event stream, shared by all loops
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<IntegrityEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<IntegrityEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: IntegrityEvent) {
        if self.tx.send(event).is_err() {
            debug!("event receiver closed; dropping event");
        }
    }
}
