use super::{OwnerKind, Window};
use chrono::{DateTime, Utc};

/// Lifecycle of a collection batch.
///
/// `InProgress` is the only non-terminal state. Terminal states do not
/// preclude re-runs: a fresh collection call for the same window reuses the
/// batch and resumes from its per-repository statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum BatchStatus {
    InProgress,
    Completed,
    Failed,
}

/// Per-repository progress within a batch. `Completed` is terminal and
/// retry-skippable; `Pending`, `Processing`, and `Failed` are all retried on
/// the next invocation for the same window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RepoStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One resumable collection job for a given owner, mode, and window.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionBatch {
    pub id: String,
    pub mode: OwnerKind,
    pub owner: String,
    pub window: Window,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-repository progress row within a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRepository {
    pub batch_id: String,
    pub owner: String,
    pub repo: String,
    pub status: RepoStatus,
    pub events_count: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Deterministic batch identity: the same (mode, owner, window) always maps
/// to the same id, so re-requesting a window resumes rather than duplicates.
#[must_use]
pub fn batch_id(mode: OwnerKind, owner: &str, window: Window) -> String {
    format!("{mode}-{owner}-{}-{}", window.start.timestamp(), window.end.timestamp())
}
