//! Core data model.
//!
//! A walk is an ordered worklist of item names plus a cursor into it. Both
//! live in the session store; nothing here is kept in memory between steps.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Worklist
// ---------------------------------------------------------------------------

/// Ordered, immutable list of item names to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Worklist(Vec<String>);

impl Worklist {
    /// Parse comma-delimited user input.
    ///
    /// Tokens are trimmed, empty tokens dropped, and repeated names keep only
    /// their first position. Fails with [`Error::InputEmpty`] when nothing is left.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::from_items(raw.split(',').map(str::trim))
    }

    /// Build from already-split names, with the same trimming and dedup rules as [`Worklist::parse`].
    pub fn from_items<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut items: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() || items.iter().any(|existing| existing == name) {
                continue;
            }
            items.push(name.to_string());
        }
        if items.is_empty() {
            return Err(Error::InputEmpty);
        }
        Ok(Self(items))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn items(&self) -> &[String] {
        &self.0
    }

    /// The item under `cursor`, or [`Current::Done`] once the cursor has run off the end.
    pub fn current(&self, cursor: usize) -> Current<'_> {
        match self.0.get(cursor) {
            Some(item) => Current::Item(item),
            None => Current::Done,
        }
    }
}

/// Result of looking up the item under the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Current<'a> {
    Item(&'a str),
    Done,
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Where a single step of the walker currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No worklist persisted yet; waiting for user input.
    AwaitingInput,
    /// Deciding what the current item needs.
    Walking,
    /// Environment is in the wrong place; moving it.
    Navigating,
    /// Environment is in the right place; locating and downloading.
    Fetching,
    /// Cursor ran past the worklist. Terminal.
    Done,
}

impl Phase {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, to),
            (AwaitingInput, Walking)
                | (Walking, Navigating)
                | (Walking, Fetching)
                | (Walking, Done)
                | (Navigating, Walking)
                | (Fetching, Walking)
                | (Done, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::AwaitingInput => "awaiting_input",
            Phase::Walking => "walking",
            Phase::Navigating => "navigating",
            Phase::Fetching => "fetching",
            Phase::Done => "done",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// A candidate link in the current view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Absolute URL the link points at.
    pub url: String,
    /// Last path segment of `url`; what a download is saved as.
    pub file_name: String,
}

/// Everything a step may observe about the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// Location relative to the index root, e.g. `""` or `"n/"`.
    pub location: String,
    /// Links in document order.
    pub links: Vec<Link>,
}

/// A link chosen for download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub url: String,
    pub file_name: String,
}

impl From<&Link> for Target {
    fn from(link: &Link) -> Self {
        Self {
            url: link.url.clone(),
            file_name: link.file_name.clone(),
        }
    }
}

/// What the walker asks of the environment when it is in the wrong place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Navigate { location: String },
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of the fetching phase for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchOutcome {
    Downloaded { file_name: String, bytes: u64 },
    NotFound,
}

/// What one step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Environment was moved; cursor unchanged.
    Navigated { item: String, location: String },
    /// Item handled and cursor advanced to `cursor`.
    Fetched {
        item: String,
        outcome: FetchOutcome,
        cursor: usize,
    },
    /// Walk finished. `cleared` is false when there was nothing left to clear.
    Done { cleared: bool },
}
