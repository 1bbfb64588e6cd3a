//! Hybrid Logical Clock (HLC) generation for LWW timestamps (C4).
//!
//! Grounded in the `next_hlc` pattern from the sync-engine example this
//! crate's LWW state machine descends from: a monotonic
//! `{millis}-{counter}-{node_id}` token, the counter resetting whenever
//! wall time advances past the last recorded millis and incrementing when
//! it does not, so the token stays totally ordered even within a single
//! millisecond.

use crate::errors::AppResult;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::cmp::Ordering;
use std::sync::Mutex;
use uuid::Uuid;

const HLC_STATE_TABLE: &str = "_lww_column_timestamps";
const HLC_STATE_SENTINEL: &str = "__hlc_state__";

struct ClockState {
    millis: i64,
    counter: u64,
    node_id: String,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn fresh_state() -> ClockState {
    ClockState {
        millis: 0,
        counter: 0,
        node_id: Uuid::new_v4().to_string(),
    }
}

fn encode_state(state: &ClockState) -> String {
    format!("{}|{}|{}", state.millis, state.counter, state.node_id)
}

fn decode_state(s: &str) -> Option<ClockState> {
    let mut parts = s.splitn(3, '|');
    let millis: i64 = parts.next()?.parse().ok()?;
    let counter: u64 = parts.next()?.parse().ok()?;
    let node_id = parts.next()?.to_string();
    Some(ClockState {
        millis,
        counter,
        node_id,
    })
}

/// Per-process HLC generator. `next()` is monotonic for the life of the
/// generator; `load`/`persist` round-trip state through the same reserved
/// table the LWW timestamp store uses, under a sentinel key, so a restart
/// resumes from the last emitted token rather than wall time alone.
pub struct HlcClock {
    state: Mutex<ClockState>,
}

impl HlcClock {
    /// A generator with a random node id and no persisted history. Used in
    /// tests and anywhere a database handle isn't available yet.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(fresh_state()),
        }
    }

    /// Load persisted state from `conn`, starting fresh with a new node id
    /// if none is found. Creates the backing table if absent.
    pub fn load(conn: &Connection) -> AppResult<Self> {
        ensure_table(conn)?;
        let row: Option<String> = conn
            .query_row(
                &format!(
                    "SELECT timestamp FROM {} \
                     WHERE table_name = ?1 AND primary_key_value = ?1 AND column_name = ?1",
                    HLC_STATE_TABLE
                ),
                params![HLC_STATE_SENTINEL],
                |r| r.get(0),
            )
            .optional()?;

        let state = row.and_then(|s| decode_state(&s)).unwrap_or_else(fresh_state);
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Persist current state so the next `load` resumes from here.
    pub fn persist(&self, conn: &Connection) -> AppResult<()> {
        ensure_table(conn)?;
        let state = self.state.lock().expect("hlc clock mutex poisoned");
        conn.execute(
            &format!(
                "INSERT INTO {} (table_name, primary_key_value, column_name, timestamp, is_from_server) \
                 VALUES (?1, ?1, ?1, ?2, 0) \
                 ON CONFLICT(table_name, primary_key_value, column_name) \
                 DO UPDATE SET timestamp = excluded.timestamp",
                HLC_STATE_TABLE
            ),
            params![HLC_STATE_SENTINEL, encode_state(&state)],
        )?;
        Ok(())
    }

    /// Produce the next token: non-decreasing for the lifetime of this
    /// generator (and, once `load`/`persist` are used, across restarts).
    pub fn next(&self) -> String {
        let mut state = self.state.lock().expect("hlc clock mutex poisoned");
        let now = now_millis();
        if now > state.millis {
            state.millis = now;
            state.counter = 0;
        } else {
            state.counter += 1;
        }
        format!("{}-{}-{}", state.millis, state.counter, state.node_id)
    }

    /// A one-off stamp with no state behind it, used to bump
    /// `systemVersion` independently of the LWW engine's own clock: the
    /// two don't need to share state since `systemVersion` is only a
    /// freshness indicator, never consulted for column conflict resolution.
    pub fn stamp() -> String {
        format!("{}-{}-{}", now_millis(), 0, Uuid::new_v4())
    }
}

impl Default for HlcClock {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_table(conn: &Connection) -> AppResult<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                table_name TEXT NOT NULL,
                primary_key_value TEXT NOT NULL,
                column_name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                is_from_server INTEGER NOT NULL,
                PRIMARY KEY (table_name, primary_key_value, column_name)
            )",
            HLC_STATE_TABLE
        ),
        [],
    )?;
    Ok(())
}

/// Compares two HLC tokens by their numeric `millis-counter` prefix, the
/// only part either generator above relies on for ordering. Tokens that
/// don't parse (e.g. a server-supplied opaque timestamp) fall back to a
/// plain string comparison, since the contract only requires tokens to be
/// "lexicographically or numerically comparable" (spec.md §4.4).
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse_prefix(a), parse_prefix(b)) {
        (Some(pa), Some(pb)) => pa.cmp(&pb),
        _ => a.cmp(b),
    }
}

fn parse_prefix(token: &str) -> Option<(i64, u64)> {
    let mut parts = token.splitn(3, '-');
    let millis: i64 = parts.next()?.parse().ok()?;
    let counter: u64 = parts.next()?.parse().ok()?;
    Some((millis, counter))
}
