// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory run lineage.
//!
//! Tracks run → (parent, session) plus each session's most recent explicit
//! fork head, classifies incoming runs as main or branch, and assigns branch
//! keys for the trace API. Rebuilt from the store at startup; kept current
//! by the ingest pipeline and the fork engine.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use forked_storage::LineageRow;

/// Branch key of runs outside any explicit fork subtree.
pub const MAIN_BRANCH: &str = "main";

/// Per-run lineage facts.
#[derive(Debug, Clone, Default)]
pub struct RunEntry {
    pub is_fork: bool,
    pub forked_from_run_id: Option<String>,
    pub session_key: Option<String>,
    /// Events recorded so far; drives the promotion heuristic.
    pub event_count: i64,
    pub has_fork_info: bool,
}

/// Outcome of observing one frame.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Observation {
    /// First frame ever seen for this run.
    pub newly_seen: bool,
    /// The explicit fork head this run was just promoted under, if any.
    /// The caller must back-fill the store rows.
    pub promoted_under: Option<String>,
}

#[derive(Default)]
struct Inner {
    runs: HashMap<String, RunEntry>,
    /// session_key → run id of the most recent explicit fork placeholder.
    session_fork_heads: HashMap<String, String>,
    /// Fork children already adopted; makes linkage idempotent.
    linked_fork_runs: HashSet<String>,
    /// run id → nearest run with a fork_info event (memoized walk).
    ancestor_cache: HashMap<String, Option<String>>,
    /// Latest non-null session key seen on any fork_info event.
    latest_fork_session_key: Option<String>,
    /// Latest non-null session key seen overall.
    latest_session_key: Option<String>,
}

pub struct LineageTable {
    inner: Mutex<Inner>,
    promote_max_events: i64,
}

impl LineageTable {
    pub fn new(promote_max_events: i64) -> Self {
        Self { inner: Mutex::new(Inner::default()), promote_max_events }
    }

    /// Rebuild from store rows (ordered by first observation).
    pub fn from_store(rows: Vec<LineageRow>, promote_max_events: i64) -> Self {
        let table = Self::new(promote_max_events);
        {
            let mut inner = table.inner.lock();
            for row in rows {
                if row.has_fork_info {
                    if let Some(key) = &row.session_key {
                        inner.session_fork_heads.insert(key.clone(), row.run_id.clone());
                        inner.latest_fork_session_key = Some(key.clone());
                    }
                }
                if let Some(key) = &row.session_key {
                    inner.latest_session_key = Some(key.clone());
                }
                inner.runs.insert(
                    row.run_id.clone(),
                    RunEntry {
                        is_fork: row.is_fork,
                        forked_from_run_id: row.forked_from_run_id,
                        session_key: row.session_key,
                        event_count: row.event_count,
                        has_fork_info: row.has_fork_info,
                    },
                );
            }
        }
        table
    }

    /// Observe one frame for `run_id`: create/update the entry, apply the
    /// promotion heuristic, and report what the caller must persist.
    ///
    /// Promotion: a genuinely-new gateway run produced by a fork appears
    /// right after its placeholder with few prior events. If the session has
    /// an explicit fork head H, the run is not H itself, and the run has at
    /// most `promote_max_events` recorded events, it is adopted under H.
    /// Long-lived runs are never rewritten.
    pub fn observe(
        &self,
        run_id: &str,
        session_key: Option<&str>,
        is_fork_info: bool,
    ) -> Observation {
        let mut inner = self.inner.lock();
        let newly_seen = !inner.runs.contains_key(run_id);

        if let Some(key) = session_key {
            inner.latest_session_key = Some(key.to_string());
            if is_fork_info {
                inner.latest_fork_session_key = Some(key.to_string());
            }
        }

        let entry = inner.runs.entry(run_id.to_string()).or_default();
        if let Some(key) = session_key {
            if entry.session_key.as_deref() != Some(key) {
                entry.session_key = Some(key.to_string());
            }
        }
        if is_fork_info {
            entry.has_fork_info = true;
        }

        let session_key = entry.session_key.clone();
        let prior_events = entry.event_count;
        let already_fork = entry.is_fork;
        entry.event_count += 1;

        let mut promoted_under = None;
        if !already_fork && !is_fork_info && prior_events <= self.promote_max_events {
            if let Some(head) = session_key
                .as_deref()
                .and_then(|key| inner.session_fork_heads.get(key))
                .cloned()
            {
                if head != run_id {
                    let entry = inner.runs.entry(run_id.to_string()).or_default();
                    entry.is_fork = true;
                    entry.forked_from_run_id = Some(head.clone());
                    inner.ancestor_cache.remove(run_id);
                    promoted_under = Some(head);
                }
            }
        }

        if is_fork_info {
            // An explicit placeholder becomes its session's fork head.
            if let Some(key) = inner.runs.get(run_id).and_then(|e| e.session_key.clone()) {
                inner.session_fork_heads.insert(key, run_id.to_string());
            }
        }

        Observation { newly_seen, promoted_under }
    }

    /// Record a placeholder allocated by the fork engine, ahead of its
    /// fork_info frame arriving back through ingest.
    pub fn record_placeholder(&self, run_id: &str, origin: &str, session_key: Option<&str>) {
        let mut inner = self.inner.lock();
        let entry = inner.runs.entry(run_id.to_string()).or_default();
        entry.is_fork = true;
        entry.forked_from_run_id = Some(origin.to_string());
        entry.has_fork_info = true;
        if let Some(key) = session_key {
            entry.session_key = Some(key.to_string());
            inner.latest_fork_session_key = Some(key.to_string());
            inner.session_fork_heads.insert(key.to_string(), run_id.to_string());
        }
    }

    /// Adopt a gateway-created run under its fork placeholder.
    pub fn link_fork_child(&self, run_id: &str, placeholder: &str, session_key: Option<&str>) {
        let mut inner = self.inner.lock();
        let entry = inner.runs.entry(run_id.to_string()).or_default();
        entry.is_fork = true;
        entry.forked_from_run_id = Some(placeholder.to_string());
        if let Some(key) = session_key {
            entry.session_key.get_or_insert_with(|| key.to_string());
            inner.session_fork_heads.insert(key.to_string(), placeholder.to_string());
        }
        inner.linked_fork_runs.insert(run_id.to_string());
        inner.ancestor_cache.remove(run_id);
    }

    pub fn is_linked(&self, run_id: &str) -> bool {
        self.inner.lock().linked_fork_runs.contains(run_id)
    }

    pub fn entry(&self, run_id: &str) -> Option<RunEntry> {
        self.inner.lock().runs.get(run_id).cloned()
    }

    /// Session key used for synthesized background runs: latest fork-info
    /// session key, else latest session key overall.
    pub fn background_session_key(&self) -> Option<String> {
        let inner = self.inner.lock();
        inner.latest_fork_session_key.clone().or_else(|| inner.latest_session_key.clone())
    }

    /// Walk parent pointers to the nearest run carrying a fork_info event.
    /// Memoized; a visited set guards against corrupt (cyclic) lineage.
    pub fn nearest_explicit_ancestor(&self, run_id: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        if let Some(cached) = inner.ancestor_cache.get(run_id) {
            return cached.clone();
        }

        let mut visited = HashSet::new();
        let mut current = run_id.to_string();
        let found = loop {
            if !visited.insert(current.clone()) {
                break None;
            }
            match inner.runs.get(&current) {
                Some(entry) if entry.has_fork_info => break Some(current),
                Some(entry) => match &entry.forked_from_run_id {
                    Some(parent) => current = parent.clone(),
                    None => break None,
                },
                None => break None,
            }
        };

        inner.ancestor_cache.insert(run_id.to_string(), found.clone());
        found
    }

    /// Branch assignment for the trace API:
    /// own fork_info → own run id; fork → nearest explicit ancestor of the
    /// parent (or main); everything else → main.
    pub fn branch_key(&self, run_id: &str) -> String {
        let (has_fork_info, parent) = {
            let inner = self.inner.lock();
            match inner.runs.get(run_id) {
                Some(entry) => (entry.has_fork_info, entry.forked_from_run_id.clone()),
                None => return MAIN_BRANCH.to_string(),
            }
        };

        if has_fork_info {
            return run_id.to_string();
        }
        match parent {
            Some(parent) => self
                .nearest_explicit_ancestor(&parent)
                .unwrap_or_else(|| MAIN_BRANCH.to_string()),
            None => MAIN_BRANCH.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "lineage_tests.rs"]
mod tests;
