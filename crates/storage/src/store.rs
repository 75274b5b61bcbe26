// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store operations over the embedded database.
//!
//! The handle owns a single connection; the daemon serializes access behind
//! a mutex. All timestamps are ms epoch and supplied by the caller so the
//! store stays clock-free.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use forked_core::{SnapshotCapture, Stream};

use crate::records::{EventRow, LineageRow, NewEvent, SessionRow, SnapshotRow};
use crate::schema;
use crate::Result;

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the store at `db_path`.
    ///
    /// The database file is chmod'd to 0600 and journaling is switched to
    /// WAL so ingest writes do not block API reads.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600))?;
        }

        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self { conn };
        schema::init_schema(&store.conn)?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        schema::init_schema(&store.conn)?;
        Ok(store)
    }

    // ── events ───────────────────────────────────────────────────────

    pub fn insert_event(&self, event: &NewEvent) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO events
                (run_id, session_key, seq, stream, ts, data, is_fork, forked_from_run_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                &event.run_id,
                &event.session_key,
                event.seq,
                event.stream.as_str(),
                event.ts,
                serde_json::to_string(&event.data)?,
                event.is_fork,
                &event.forked_from_run_id,
                event.created_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Append an audit event (rewind records) to a run.
    ///
    /// When `seq` is `None` the next free sequence number of the run is used.
    pub fn append_audit_event(
        &self,
        run_id: &str,
        session_key: Option<&str>,
        seq: Option<i64>,
        data: Value,
        is_fork: bool,
        forked_from_run_id: Option<&str>,
        now_ms: i64,
    ) -> Result<i64> {
        let seq = match seq {
            Some(s) => s,
            None => self.max_seq(run_id)?.map_or(0, |s| s + 1),
        };
        self.insert_event(&NewEvent {
            run_id: run_id.to_string(),
            session_key: session_key.map(str::to_string),
            seq,
            stream: Stream::Rewind,
            ts: now_ms,
            data,
            is_fork,
            forked_from_run_id: forked_from_run_id.map(str::to_string),
            created_at: now_ms,
        })
    }

    pub fn max_seq(&self, run_id: &str) -> Result<Option<i64>> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(seq) FROM events WHERE run_id = ?1",
            [run_id],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    /// Back-fill the lineage stamp on every existing row of a run.
    pub fn stamp_run_lineage(&self, run_id: &str, forked_from_run_id: &str) -> Result<usize> {
        let n = self.conn.execute(
            "UPDATE events SET is_fork = 1, forked_from_run_id = ?2 WHERE run_id = ?1",
            params![run_id, forked_from_run_id],
        )?;
        Ok(n)
    }

    /// True when `id` is a known session key.
    pub fn is_session_key(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM events WHERE session_key = ?1 LIMIT 1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// One row per run, most recent activity first.
    pub fn list_sessions(&self) -> Result<Vec<SessionRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT e.run_id,
                   (SELECT s.session_key FROM events s
                     WHERE s.run_id = e.run_id AND s.session_key IS NOT NULL
                     ORDER BY s.id DESC LIMIT 1),
                   MIN(e.ts),
                   MAX(e.ts),
                   COUNT(*),
                   SUM(CASE WHEN json_extract(e.data, '$.type') = 'llm_input' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN json_extract(e.data, '$.type') = 'llm_output' THEN 1 ELSE 0 END),
                   MAX(e.is_fork),
                   (SELECT f.forked_from_run_id FROM events f
                     WHERE f.run_id = e.run_id AND f.forked_from_run_id IS NOT NULL
                     ORDER BY f.id DESC LIMIT 1)
            FROM events e
            GROUP BY e.run_id
            ORDER BY MAX(e.ts) DESC
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(SessionRow {
                    run_id: row.get(0)?,
                    session_key: row.get(1)?,
                    start_time: row.get(2)?,
                    last_activity: row.get(3)?,
                    event_count: row.get(4)?,
                    llm_input_count: row.get(5)?,
                    llm_output_count: row.get(6)?,
                    is_fork: row.get::<_, i64>(7)? != 0,
                    forked_from_run_id: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Resolve `id` as a session key first (union of all runs sharing it,
    /// including their early rows that predate the key), then as a run id.
    pub fn list_traces_by_session_id(&self, id: &str) -> Result<Vec<EventRow>> {
        if self.is_session_key(id)? {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT id, run_id, session_key, seq, stream, ts, data,
                       is_fork, forked_from_run_id, created_at
                FROM events
                WHERE run_id IN (SELECT DISTINCT run_id FROM events WHERE session_key = ?1)
                ORDER BY ts, seq
                "#,
            )?;
            let rows = stmt
                .query_map([id], event_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            return Ok(rows);
        }
        self.events_for_run(id)
    }

    pub fn events_for_run(&self, run_id: &str) -> Result<Vec<EventRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, run_id, session_key, seq, stream, ts, data,
                   is_fork, forked_from_run_id, created_at
            FROM events
            WHERE run_id = ?1
            ORDER BY ts, seq
            "#,
        )?;
        let rows = stmt
            .query_map([run_id], event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The history slice replayed by a fork: events strictly before `seq`.
    pub fn events_before(&self, run_id: &str, seq: i64) -> Result<Vec<EventRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, run_id, session_key, seq, stream, ts, data,
                   is_fork, forked_from_run_id, created_at
            FROM events
            WHERE run_id = ?1 AND seq < ?2
            ORDER BY ts, seq
            "#,
        )?;
        let rows = stmt
            .query_map(params![run_id, seq], event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Last `limit` lifecycle events across every run of a session, oldest
    /// first. Used as the session-wide fallback during hint derivation.
    pub fn lifecycle_tail(&self, session_key: &str, limit: i64) -> Result<Vec<EventRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT * FROM (
                SELECT id, run_id, session_key, seq, stream, ts, data,
                       is_fork, forked_from_run_id, created_at
                FROM events
                WHERE stream = 'lifecycle'
                  AND run_id IN (SELECT DISTINCT run_id FROM events WHERE session_key = ?1)
                ORDER BY ts DESC, seq DESC LIMIT ?2
            ) ORDER BY ts, seq
            "#,
        )?;
        let rows = stmt
            .query_map(params![session_key, limit], event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn latest_session_key(&self, run_id: &str) -> Result<Option<String>> {
        let key: Option<String> = self
            .conn
            .query_row(
                r#"
                SELECT session_key FROM events
                WHERE run_id = ?1 AND session_key IS NOT NULL
                ORDER BY id DESC LIMIT 1
                "#,
                [run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key)
    }

    /// Distinct run ids first observed at or after `cutoff_ms`, optionally
    /// restricted to a session. Used by fork linkage fallback.
    pub fn runs_created_after(
        &self,
        cutoff_ms: i64,
        session_key: Option<&str>,
    ) -> Result<Vec<String>> {
        let rows = match session_key {
            Some(key) => {
                let mut stmt = self.conn.prepare(
                    r#"
                    SELECT run_id FROM events
                    WHERE session_key = ?2
                    GROUP BY run_id
                    HAVING MIN(created_at) >= ?1
                    ORDER BY MIN(id)
                    "#,
                )?;
                let rows = stmt
                    .query_map(params![cutoff_ms, key], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare(
                    r#"
                    SELECT run_id FROM events
                    GROUP BY run_id
                    HAVING MIN(created_at) >= ?1
                    ORDER BY MIN(id)
                    "#,
                )?;
                let rows = stmt
                    .query_map(params![cutoff_ms], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    /// Per-run lineage facts for startup reconstruction.
    pub fn lineage_entries(&self) -> Result<Vec<LineageRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT e.run_id,
                   MAX(e.is_fork),
                   (SELECT f.forked_from_run_id FROM events f
                     WHERE f.run_id = e.run_id AND f.forked_from_run_id IS NOT NULL
                     ORDER BY f.id DESC LIMIT 1),
                   (SELECT s.session_key FROM events s
                     WHERE s.run_id = e.run_id AND s.session_key IS NOT NULL
                     ORDER BY s.id DESC LIMIT 1),
                   COUNT(*),
                   MAX(CASE WHEN e.stream = 'fork_info' THEN 1 ELSE 0 END)
            FROM events e
            GROUP BY e.run_id
            ORDER BY MIN(e.id)
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LineageRow {
                    run_id: row.get(0)?,
                    is_fork: row.get::<_, i64>(1)? != 0,
                    forked_from_run_id: row.get(2)?,
                    session_key: row.get(3)?,
                    event_count: row.get(4)?,
                    has_fork_info: row.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── snapshots ────────────────────────────────────────────────────

    pub fn insert_snapshot_start(
        &self,
        run_id: &str,
        seq: i64,
        capture: &SnapshotCapture,
        now_ms: i64,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO file_snapshots
                (run_id, seq, tool_name, file_path, content_before, existed_before, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                run_id,
                seq,
                &capture.tool_name,
                &capture.file_path,
                &capture.content_before,
                capture.existed_before,
                now_ms,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Fill `content_after` on the most recent open start row for this
    /// `(run, file)` pair. Returns false when no open row exists.
    pub fn update_snapshot_end(&self, run_id: &str, capture: &SnapshotCapture) -> Result<bool> {
        let n = self.conn.execute(
            r#"
            UPDATE file_snapshots SET content_after = ?3, exists_after = ?4
            WHERE id = (
                SELECT id FROM file_snapshots
                WHERE run_id = ?1 AND file_path = ?2 AND content_after IS NULL
                ORDER BY id DESC LIMIT 1
            )
            "#,
            params![run_id, &capture.file_path, &capture.content_after, capture.exists_after],
        )?;
        Ok(n > 0)
    }

    /// Whole-file capture (config/setup changes carry before and after in a
    /// single observation).
    pub fn insert_snapshot_whole_file(
        &self,
        run_id: &str,
        seq: i64,
        capture: &SnapshotCapture,
        now_ms: i64,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO file_snapshots
                (run_id, seq, tool_name, file_path, content_before, content_after,
                 existed_before, exists_after, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                run_id,
                seq,
                &capture.tool_name,
                &capture.file_path,
                &capture.content_before,
                &capture.content_after,
                capture.existed_before,
                capture.exists_after,
                now_ms,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Same id resolution as traces: session key first, then run id.
    pub fn list_snapshots_by_session_id(&self, id: &str) -> Result<Vec<SnapshotRow>> {
        if self.is_session_key(id)? {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT id, run_id, seq, tool_name, file_path, content_before, content_after,
                       existed_before, exists_after, created_at
                FROM file_snapshots
                WHERE run_id IN (SELECT DISTINCT run_id FROM events WHERE session_key = ?1)
                ORDER BY run_id, seq
                "#,
            )?;
            let rows = stmt
                .query_map([id], snapshot_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            return Ok(rows);
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, run_id, seq, tool_name, file_path, content_before, content_after,
                   existed_before, exists_after, created_at
            FROM file_snapshots
            WHERE run_id = ?1
            ORDER BY seq
            "#,
        )?;
        let rows = stmt
            .query_map([id], snapshot_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Snapshots feeding a rewind: `seq <= target_seq`, ascending.
    pub fn snapshots_for_rewind(&self, run_id: &str, target_seq: i64) -> Result<Vec<SnapshotRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, run_id, seq, tool_name, file_path, content_before, content_after,
                   existed_before, exists_after, created_at
            FROM file_snapshots
            WHERE run_id = ?1 AND seq <= ?2
            ORDER BY seq
            "#,
        )?;
        let rows = stmt
            .query_map(params![run_id, target_seq], snapshot_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── retention ────────────────────────────────────────────────────

    /// Delete events and snapshots older than the retention window.
    /// Returns `(events_deleted, snapshots_deleted)`.
    pub fn delete_older_than(&self, days: u32, now_ms: i64) -> Result<(usize, usize)> {
        let cutoff = now_ms - i64::from(days) * 24 * 60 * 60 * 1000;
        let events = self
            .conn
            .execute("DELETE FROM events WHERE created_at < ?1", [cutoff])?;
        let snapshots = self
            .conn
            .execute("DELETE FROM file_snapshots WHERE created_at < ?1", [cutoff])?;
        Ok((events, snapshots))
    }
}

fn event_from_row(row: &Row) -> rusqlite::Result<EventRow> {
    let data: String = row.get(6)?;
    Ok(EventRow {
        id: row.get(0)?,
        run_id: row.get(1)?,
        session_key: row.get(2)?,
        seq: row.get(3)?,
        stream: row.get(4)?,
        ts: row.get(5)?,
        data: serde_json::from_str(&data).unwrap_or(Value::Null),
        is_fork: row.get::<_, i64>(7)? != 0,
        forked_from_run_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn snapshot_from_row(row: &Row) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        id: row.get(0)?,
        run_id: row.get(1)?,
        seq: row.get(2)?,
        tool_name: row.get(3)?,
        file_path: row.get(4)?,
        content_before: row.get(5)?,
        content_after: row.get(6)?,
        existed_before: row.get::<_, i64>(7)? != 0,
        exists_after: row.get::<_, i64>(8)? != 0,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
