//! SQLite session store.
//!
//! Holds the state that crosses step boundaries: the worklist, the cursor,
//! and the environment's location, plus an append-only event log.
//! Nothing else survives a restart.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::model::Worklist;

const KEY_WORKLIST: &str = "worklist";
const KEY_CURSOR: &str = "cursor";
const KEY_LOCATION: &str = "location";

/// Storage backend. Owns the SQLite connection.
pub struct Storage {
    conn: Connection,
}

/// Handle for performing storage operations within a transaction.
pub(crate) struct TxContext<'a> {
    tx: &'a Connection,
}

impl TxContext<'_> {
    pub fn cursor(&self) -> Result<Option<usize>> {
        get_cursor_on(self.tx)
    }

    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        set_value_on(self.tx, key, value)
    }

    pub fn delete_value(&self, key: &str) -> Result<()> {
        delete_value_on(self.tx, key)
    }

    pub fn record_event(&mut self, kind: EventKind) -> Result<Event> {
        record_event_on(self.tx, kind)
    }

    pub fn advance(&mut self, expected: usize) -> Result<usize> {
        let found = self.cursor()?.ok_or(Error::NoWorklist)?;
        if found != expected {
            return Err(Error::CursorConflict { expected, found });
        }
        let next = expected + 1;
        self.set_value(KEY_CURSOR, &next.to_string())?;
        self.record_event(EventKind::CursorAdvanced {
            from: expected,
            to: next,
        })?;
        Ok(next)
    }
}

impl Storage {
    /// Open or create a session database at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    fn init(&mut self) -> Result<()> {
        // WAL so `status` can read while a walk is running
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS session (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp   TEXT NOT NULL,
                kind        TEXT NOT NULL
            );
            ",
        )?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Execute a closure within a SQLite transaction.
    ///
    /// The transaction commits if the closure returns Ok, rolls back on Err.
    pub(crate) fn with_transaction<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TxContext) -> Result<T>,
    {
        let tx = self.conn.transaction()?;
        let mut ctx = TxContext { tx: &tx };
        let result = f(&mut ctx)?;
        tx.commit()?;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Walk state
    // -----------------------------------------------------------------------

    /// Persist a fresh worklist with the cursor at 0.
    ///
    /// Refuses to overwrite a walk that is still in progress.
    pub fn start_walk(&mut self, worklist: &Worklist) -> Result<()> {
        let json = serde_json::to_string(worklist)?;
        self.with_transaction(|ctx| {
            if ctx.cursor()?.is_some() {
                return Err(Error::Other("a walk is already in progress".to_string()));
            }
            ctx.set_value(KEY_WORKLIST, &json)?;
            ctx.set_value(KEY_CURSOR, "0")?;
            ctx.record_event(EventKind::WalkStarted {
                items: worklist.items().to_vec(),
            })?;
            Ok(())
        })
    }

    /// Load the persisted worklist, if a walk is in progress.
    pub fn worklist(&self) -> Result<Option<Worklist>> {
        get_value_on(&self.conn, KEY_WORKLIST)?
            .map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    /// Load the persisted cursor, if a walk is in progress.
    pub fn cursor(&self) -> Result<Option<usize>> {
        get_cursor_on(&self.conn)
    }

    /// Move the cursor from `expected` to `expected + 1` and record it.
    ///
    /// Fails with [`Error::CursorConflict`] if the stored cursor is not `expected`,
    /// so the cursor can only ever move forward one item at a time.
    pub fn advance(&mut self, expected: usize) -> Result<usize> {
        self.with_transaction(|ctx| ctx.advance(expected))
    }

    /// Record how an item was handled and advance past it, atomically.
    ///
    /// Either both the outcome event and the new cursor are stored, or neither.
    pub fn complete_item(&mut self, expected: usize, outcome: EventKind) -> Result<usize> {
        self.with_transaction(|ctx| {
            ctx.record_event(outcome)?;
            ctx.advance(expected)
        })
    }

    /// Remove worklist and cursor together, recording `event` in the same transaction.
    ///
    /// Returns false (and records nothing) if there was nothing to clear.
    pub fn clear_walk(&mut self, event: EventKind) -> Result<bool> {
        self.with_transaction(|ctx| {
            if ctx.cursor()?.is_none() {
                return Ok(false);
            }
            ctx.delete_value(KEY_WORKLIST)?;
            ctx.delete_value(KEY_CURSOR)?;
            ctx.record_event(event)?;
            Ok(true)
        })
    }

    // -----------------------------------------------------------------------
    // Environment
    // -----------------------------------------------------------------------

    /// Current location, `""` (the index root) if never navigated.
    pub fn location(&self) -> Result<String> {
        Ok(get_value_on(&self.conn, KEY_LOCATION)?.unwrap_or_default())
    }

    pub fn set_location(&mut self, location: &str) -> Result<()> {
        set_value_on(&self.conn, KEY_LOCATION, location)
    }

    /// Move to `location` and record why, atomically.
    pub fn navigate(&mut self, location: &str, event: EventKind) -> Result<()> {
        self.with_transaction(|ctx| {
            ctx.set_value(KEY_LOCATION, location)?;
            ctx.record_event(event)?;
            Ok(())
        })
    }

    pub fn clear_location(&mut self) -> Result<()> {
        delete_value_on(&self.conn, KEY_LOCATION)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Get events since a sequence number.
    pub fn get_events_since(&self, since_seq: u64) -> Result<Vec<Event>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, timestamp, kind FROM events WHERE seq > ?1 ORDER BY seq ASC")?;

        let events = stmt
            .query_map(params![since_seq as i64], |row| {
                let kind_str: String = row.get(2)?;
                Ok(Event {
                    seq: row.get::<_, i64>(0)? as u64,
                    timestamp: row
                        .get::<_, String>(1)?
                        .parse()
                        .unwrap_or_else(|_| Utc::now()),
                    kind: serde_json::from_str(&kind_str)
                        .unwrap_or(EventKind::Unknown { raw: kind_str }),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Inner functions take &Connection so they work with both
// Connection (auto-commit) and Transaction (deref to Connection).
// ---------------------------------------------------------------------------

fn get_value_on(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM session WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn set_value_on(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO session (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn delete_value_on(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM session WHERE key = ?1", params![key])?;
    Ok(())
}

fn get_cursor_on(conn: &Connection) -> Result<Option<usize>> {
    get_value_on(conn, KEY_CURSOR)?
        .map(|s| {
            s.parse::<usize>()
                .map_err(|e| Error::Other(format!("corrupt cursor {s:?}: {e}")))
        })
        .transpose()
}

fn record_event_on(conn: &Connection, kind: EventKind) -> Result<Event> {
    let now = Utc::now();

    conn.execute(
        "INSERT INTO events (timestamp, kind) VALUES (?1, ?2)",
        params![now.to_rfc3339(), serde_json::to_string(&kind)?],
    )?;

    let seq = conn.last_insert_rowid();

    Ok(Event {
        seq: seq as u64,
        timestamp: now,
        kind,
    })
}
