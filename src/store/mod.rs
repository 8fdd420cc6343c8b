//! SQLite-backed durable store.
//!
//! Holds the immutable event log plus the registry and batch bookkeeping
//! tables. All timestamps are stored as RFC 3339 UTC text with second
//! precision, which sorts lexicographically in window queries.

use crate::model::{
    BatchRepository, BatchStatus, CollectionBatch, EventKind, Owner, OwnerKind, RawEvent, RepoStatus, Scope, Window,
    batch_id,
};
use chrono::{DateTime, SecondsFormat, Utc};
use ohno::{IntoAppError, app_err};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const LOG_TARGET: &str = "store";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id          TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,
    owner       TEXT NOT NULL,
    owner_kind  TEXT NOT NULL,
    repo        TEXT NOT NULL,
    actor       TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    payload     TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_owner_time ON events (owner, occurred_at);
CREATE INDEX IF NOT EXISTS idx_events_repo_time  ON events (owner, repo, occurred_at);
CREATE INDEX IF NOT EXISTS idx_events_actor_time ON events (owner, actor, occurred_at);

CREATE TABLE IF NOT EXISTS repositories (
    owner      TEXT NOT NULL,
    name       TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen  TEXT NOT NULL,
    PRIMARY KEY (owner, name)
);

CREATE TABLE IF NOT EXISTS members (
    owner      TEXT NOT NULL,
    login      TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen  TEXT NOT NULL,
    PRIMARY KEY (owner, login)
);

CREATE TABLE IF NOT EXISTS collection_batches (
    id           TEXT PRIMARY KEY,
    mode         TEXT NOT NULL,
    owner        TEXT NOT NULL,
    window_start TEXT NOT NULL,
    window_end   TEXT NOT NULL,
    status       TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS batch_repositories (
    batch_id     TEXT NOT NULL,
    owner        TEXT NOT NULL,
    repo         TEXT NOT NULL,
    status       TEXT NOT NULL,
    events_count INTEGER NOT NULL DEFAULT 0,
    started_at   TEXT,
    completed_at TEXT,
    error        TEXT,
    PRIMARY KEY (batch_id, repo)
);
";

fn ts(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(text: &str) -> crate::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)
        .into_app_err_with(|| format!("invalid stored timestamp '{text}'"))?
        .with_timezone(&Utc))
}

/// Minimal event view used to build time series.
#[derive(Debug)]
pub struct SeriesEvent {
    pub occurred_at: DateTime<Utc>,
    pub kind: EventKind,
    pub additions: i64,
    pub deletions: i64,
}

/// Raw counter rollup as produced by SQL aggregation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TotalsRow {
    pub commits: i64,
    pub pull_requests: i64,
    pub merged_pull_requests: i64,
    pub deploys: i64,
    pub additions: i64,
    pub deletions: i64,
}

/// The durable store.
///
/// A single connection behind a mutex; callers from async contexts hold it
/// only for the duration of one statement or transaction.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> crate::Result<Self> {
        log::debug!(target: LOG_TARGET, "opening database '{}'", path.display());
        let conn =
            Connection::open(path).into_app_err_with(|| format!("unable to open database '{}'", path.display()))?;
        Self::init(conn)
    }

    /// Open a private in-memory database, for tests.
    pub fn open_in_memory() -> crate::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> crate::Result<Self> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("lock not poisoned")
    }

    /// Write events, replacing any prior version of the same event id.
    pub fn upsert_events(&self, events: &[RawEvent]) -> crate::Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO events
                 (id, kind, owner, owner_kind, repo, actor, occurred_at, payload, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;

            for event in events {
                let payload = serde_json::to_string(&event.payload)?;
                let _ = stmt.execute(params![
                    event.id,
                    event.kind.to_string(),
                    event.owner,
                    event.owner_kind.to_string(),
                    event.repo,
                    event.actor,
                    ts(event.occurred_at),
                    payload,
                    ts(event.recorded_at),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Record the owner's repository roster as of now.
    pub fn upsert_repositories(&self, owner: &str, names: &[String]) -> crate::Result<()> {
        self.upsert_registry("repositories", "name", owner, names)
    }

    /// Record the organization's member roster as of now.
    pub fn upsert_members(&self, owner: &str, logins: &[String]) -> crate::Result<()> {
        self.upsert_registry("members", "login", owner, logins)
    }

    fn upsert_registry(&self, table: &str, key: &str, owner: &str, values: &[String]) -> crate::Result<()> {
        let now = ts(Utc::now());
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let sql = format!(
                "INSERT INTO {table} (owner, {key}, first_seen, last_seen) VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT (owner, {key}) DO UPDATE SET last_seen = ?3"
            );
            let mut stmt = tx.prepare(&sql)?;
            for value in values {
                let _ = stmt.execute(params![owner, value, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn total_repositories(&self, owner: &str) -> crate::Result<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM repositories WHERE owner = ?1", params![owner], |row| row.get(0))?)
    }

    pub fn total_members(&self, owner: &str) -> crate::Result<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM members WHERE owner = ?1", params![owner], |row| row.get(0))?)
    }

    pub fn member_logins(&self, owner: &str) -> crate::Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT login FROM members WHERE owner = ?1 ORDER BY login")?;
        let rows = stmt.query_map(params![owner], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    pub fn repository_names(&self, owner: &str) -> crate::Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name FROM repositories WHERE owner = ?1 ORDER BY name")?;
        let rows = stmt.query_map(params![owner], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    /// Create the batch for (owner kind, owner, window), or resume the
    /// existing one. Resuming moves the batch back to `in_progress` so its
    /// status reflects the run now underway.
    pub fn create_or_get_batch(&self, owner: &Owner, window: Window) -> crate::Result<CollectionBatch> {
        let id = batch_id(owner.kind, &owner.name, window);
        let now = Utc::now();

        let conn = self.conn();
        let existing = conn
            .query_row(
                "SELECT created_at FROM collection_batches WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        let created_at = match existing {
            Some(created) => {
                let _ = conn.execute(
                    "UPDATE collection_batches SET status = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id, BatchStatus::InProgress.to_string(), ts(now)],
                )?;
                parse_ts(&created)?
            }
            None => {
                let _ = conn.execute(
                    "INSERT INTO collection_batches (id, mode, owner, window_start, window_end, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    params![
                        id,
                        owner.kind.to_string(),
                        owner.name,
                        ts(window.start),
                        ts(window.end),
                        BatchStatus::InProgress.to_string(),
                        ts(now),
                    ],
                )?;
                now
            }
        };

        Ok(CollectionBatch {
            id,
            mode: owner.kind,
            owner: owner.name.clone(),
            window,
            status: BatchStatus::InProgress,
            created_at,
            updated_at: now,
        })
    }

    pub fn get_batch(&self, id: &str) -> crate::Result<Option<CollectionBatch>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, mode, owner, window_start, window_end, status, created_at, updated_at
                 FROM collection_batches WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, mode, owner, start, end, status, created, updated)) = row else {
            return Ok(None);
        };

        Ok(Some(CollectionBatch {
            id,
            mode: mode.parse::<OwnerKind>().map_err(|_| app_err!("invalid stored mode '{mode}'"))?,
            owner,
            window: Window::new(parse_ts(&start)?, parse_ts(&end)?),
            status: status.parse::<BatchStatus>().map_err(|_| app_err!("invalid stored status '{status}'"))?,
            created_at: parse_ts(&created)?,
            updated_at: parse_ts(&updated)?,
        }))
    }

    pub fn update_batch_status(&self, id: &str, status: BatchStatus) -> crate::Result<()> {
        let changed = self.conn().execute(
            "UPDATE collection_batches SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.to_string(), ts(Utc::now())],
        )?;
        if changed == 0 {
            return Err(app_err!("batch '{id}' not found"));
        }
        Ok(())
    }

    /// Repositories already collected to completion for this batch.
    pub fn completed_repositories(&self, batch_id: &str) -> crate::Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT repo FROM batch_repositories WHERE batch_id = ?1 AND status = ?2 ORDER BY repo")?;
        let rows = stmt.query_map(params![batch_id, RepoStatus::Completed.to_string()], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    /// Record a repository's progress within a batch.
    ///
    /// A `pending` row carries no timestamps; the first transition out of it
    /// stamps `started_at`, and reaching a terminal state stamps
    /// `completed_at`. Re-enumerating a previously failed repository as
    /// `pending` clears its error and completion stamp.
    pub fn update_repository_status(
        &self,
        batch_id: &str,
        owner: &Owner,
        repo: &str,
        status: RepoStatus,
        events_count: i64,
        error: Option<&str>,
    ) -> crate::Result<()> {
        let now = ts(Utc::now());
        let terminal = matches!(status, RepoStatus::Completed | RepoStatus::Failed);
        let completed_at = terminal.then_some(now.as_str());
        let started_at = (!matches!(status, RepoStatus::Pending)).then_some(now.as_str());

        let _ = self.conn().execute(
            "INSERT INTO batch_repositories (batch_id, owner, repo, status, events_count, started_at, completed_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (batch_id, repo) DO UPDATE SET
                 status = excluded.status,
                 events_count = excluded.events_count,
                 started_at = COALESCE(batch_repositories.started_at, excluded.started_at),
                 completed_at = excluded.completed_at,
                 error = excluded.error",
            params![batch_id, owner.name, repo, status.to_string(), events_count, started_at, completed_at, error],
        )?;
        Ok(())
    }

    pub fn batch_repositories(&self, batch_id: &str) -> crate::Result<Vec<BatchRepository>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT batch_id, owner, repo, status, events_count, started_at, completed_at, error
             FROM batch_repositories WHERE batch_id = ?1 ORDER BY repo",
        )?;

        let rows = stmt.query_map(params![batch_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (batch_id, owner, repo, status, events_count, started, completed, error) = row?;
            out.push(BatchRepository {
                batch_id,
                owner,
                repo,
                status: status.parse::<RepoStatus>().map_err(|_| app_err!("invalid stored status '{status}'"))?,
                events_count,
                started_at: started.as_deref().map(parse_ts).transpose()?,
                completed_at: completed.as_deref().map(parse_ts).transpose()?,
                error,
            });
        }
        Ok(out)
    }

    fn scope_filter(scope: &Scope, window: Window) -> (String, Vec<String>) {
        let mut sql = String::from("owner = ?1 AND occurred_at >= ?2 AND occurred_at <= ?3");
        let (owner, extra) = match scope {
            Scope::Owner { owner } => (owner, None),
            Scope::Repo { owner, repo } => {
                sql.push_str(" AND repo = ?4");
                (owner, Some(repo))
            }
            Scope::Member { owner, member } => {
                sql.push_str(" AND actor = ?4");
                (owner, Some(member))
            }
        };

        let mut args = vec![owner.clone(), ts(window.start), ts(window.end)];
        if let Some(extra) = extra {
            args.push(extra.clone());
        }
        (sql, args)
    }

    const TOTALS_COLUMNS: &'static str = "
        SUM(CASE WHEN kind = 'commit' THEN 1 ELSE 0 END),
        SUM(CASE WHEN kind = 'pull_request' THEN 1 ELSE 0 END),
        SUM(CASE WHEN kind = 'pull_request' AND json_extract(payload, '$.merged_at') IS NOT NULL THEN 1 ELSE 0 END),
        SUM(CASE WHEN kind = 'deploy' THEN 1 ELSE 0 END),
        SUM(CASE WHEN kind = 'commit' THEN json_extract(payload, '$.additions') ELSE 0 END),
        SUM(CASE WHEN kind = 'commit' THEN json_extract(payload, '$.deletions') ELSE 0 END)";

    fn totals_from_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<TotalsRow> {
        Ok(TotalsRow {
            commits: row.get::<_, Option<i64>>(offset)?.unwrap_or_default(),
            pull_requests: row.get::<_, Option<i64>>(offset + 1)?.unwrap_or_default(),
            merged_pull_requests: row.get::<_, Option<i64>>(offset + 2)?.unwrap_or_default(),
            deploys: row.get::<_, Option<i64>>(offset + 3)?.unwrap_or_default(),
            additions: row.get::<_, Option<i64>>(offset + 4)?.unwrap_or_default(),
            deletions: row.get::<_, Option<i64>>(offset + 5)?.unwrap_or_default(),
        })
    }

    /// Counter rollup over a scope and window.
    pub fn totals(&self, scope: &Scope, window: Window) -> crate::Result<TotalsRow> {
        let (filter, args) = Self::scope_filter(scope, window);
        let sql = format!("SELECT {} FROM events WHERE {filter}", Self::TOTALS_COLUMNS);

        let conn = self.conn();
        Ok(conn.query_row(&sql, params_from_iter(args), |row| Self::totals_from_row(row, 0))?)
    }

    /// Distinct values of `column` ("repo" or "actor") within a scope and window.
    pub fn distinct_count(&self, scope: &Scope, window: Window, column: &str) -> crate::Result<i64> {
        debug_assert!(matches!(column, "repo" | "actor"));
        let (filter, args) = Self::scope_filter(scope, window);
        let sql = format!("SELECT COUNT(DISTINCT {column}) FROM events WHERE {filter}");

        let conn = self.conn();
        Ok(conn.query_row(&sql, params_from_iter(args), |row| row.get(0))?)
    }

    /// Counter rollups grouped by `column` ("repo" or "actor"), one row per
    /// distinct value, in unspecified order.
    pub fn grouped_totals(&self, owner: &str, window: Window, column: &str) -> crate::Result<Vec<(String, TotalsRow)>> {
        debug_assert!(matches!(column, "repo" | "actor"));
        let scope = Scope::Owner { owner: owner.to_string() };
        let (filter, args) = Self::scope_filter(&scope, window);
        let sql = format!(
            "SELECT {column}, {} FROM events WHERE {filter} GROUP BY {column}",
            Self::TOTALS_COLUMNS
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok((row.get::<_, String>(0)?, Self::totals_from_row(row, 1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Minimal per-event rows for time series bucketing, ordered by time.
    pub fn series_events(&self, scope: &Scope, window: Window) -> crate::Result<Vec<SeriesEvent>> {
        let (filter, args) = Self::scope_filter(scope, window);
        let sql = format!(
            "SELECT occurred_at, kind,
                    COALESCE(json_extract(payload, '$.additions'), 0),
                    COALESCE(json_extract(payload, '$.deletions'), 0)
             FROM events WHERE {filter} ORDER BY occurred_at"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (occurred, kind, additions, deletions) = row?;
            out.push(SeriesEvent {
                occurred_at: parse_ts(&occurred)?,
                kind: kind.parse::<EventKind>().map_err(|_| app_err!("invalid stored event kind '{kind}'"))?,
                additions,
                deletions,
            });
        }
        Ok(out)
    }
}
