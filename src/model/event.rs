use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of account being measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Organization,
    User,
}

/// The account (organization or user) whose activity is being collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub name: String,
    pub kind: OwnerKind,
}

impl Owner {
    pub fn org(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: OwnerKind::Organization,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: OwnerKind::User,
        }
    }
}

impl core::fmt::Display for Owner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Kind of activity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Commit,
    PullRequest,
    Deploy,
}

/// Kind-specific event attributes.
///
/// Serialized as a tagged JSON object at the storage boundary; everywhere
/// else the variants carry strongly typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Commit {
        sha: String,
        message: String,
        additions: i64,
        deletions: i64,
        files_changed: i64,
    },
    PullRequest {
        number: i64,
        state: String,
        title: String,
        merged_at: Option<DateTime<Utc>>,
    },
    Deploy {
        environment: String,
        status: String,
        run_id: String,
    },
}

impl EventPayload {
    /// The event kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Commit { .. } => EventKind::Commit,
            Self::PullRequest { .. } => EventKind::PullRequest,
            Self::Deploy { .. } => EventKind::Deploy,
        }
    }
}

/// An immutable activity fact collected from the upstream source.
///
/// The `id` is a pure function of (owner, repository, kind, upstream natural
/// key), so collecting the same window twice produces identical ids and the
/// store's upsert keeps the event set stable.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub id: String,
    pub kind: EventKind,
    pub owner: String,
    pub owner_kind: OwnerKind,
    pub repo: String,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: EventPayload,
    pub recorded_at: DateTime<Utc>,
}

/// Deterministic event identity.
///
/// The natural key is the commit SHA, the pull request number, or the
/// upstream deployment id.
#[must_use]
pub fn event_id(owner: &str, repo: &str, kind: EventKind, natural_key: &str) -> String {
    format!("{owner}/{repo}/{kind}/{natural_key}")
}
