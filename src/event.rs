//! Structured events recorded by the walker on every decision.
//!
//! The event log is append-only and outlives a walk, so `status` and
//! `events` can explain what happened after the session state is cleared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A structured event recorded by the walker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    WalkStarted {
        items: Vec<String>,
    },
    Navigated {
        item: String,
        from: String,
        to: String,
    },
    Downloaded {
        item: String,
        file_name: String,
        bytes: u64,
    },
    NotFound {
        item: String,
        location: String,
    },
    CursorAdvanced {
        from: usize,
        to: usize,
    },
    WalkCompleted {
        items: usize,
    },
    WalkReset,
    /// Stored kind that this build does not understand.
    #[serde(skip)]
    Unknown {
        raw: String,
    },
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::WalkStarted { items } => write!(f, "walk started: {}", items.join(", ")),
            EventKind::Navigated { item, from, to } => {
                write!(f, "navigated for {item}: '{from}' -> '{to}'")
            }
            EventKind::Downloaded {
                item,
                file_name,
                bytes,
            } => write!(f, "downloaded {file_name} for {item} ({bytes} bytes)"),
            EventKind::NotFound { item, location } => {
                write!(f, "no match for {item} in '{location}'")
            }
            EventKind::CursorAdvanced { from, to } => write!(f, "cursor {from} -> {to}"),
            EventKind::WalkCompleted { items } => write!(f, "walk completed ({items} items)"),
            EventKind::WalkReset => write!(f, "walk reset"),
            EventKind::Unknown { raw } => write!(f, "unknown event: {raw}"),
        }
    }
}
