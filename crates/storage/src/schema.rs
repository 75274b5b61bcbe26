// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use rusqlite::Connection;

use crate::Result;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            session_key TEXT,
            seq INTEGER NOT NULL,
            stream TEXT NOT NULL,
            ts INTEGER NOT NULL,
            data TEXT NOT NULL,
            is_fork INTEGER NOT NULL DEFAULT 0,
            forked_from_run_id TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS file_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            tool_name TEXT,
            file_path TEXT NOT NULL,
            content_before TEXT,
            content_after TEXT,
            existed_before INTEGER NOT NULL DEFAULT 0,
            exists_after INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_run_seq ON events(run_id, seq);
        CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_key);
        CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at);
        CREATE INDEX IF NOT EXISTS idx_snapshots_run_seq ON file_snapshots(run_id, seq);
        CREATE INDEX IF NOT EXISTS idx_snapshots_created ON file_snapshots(created_at);
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;

    Ok(())
}
