//! Domain types shared across the collection pipeline and aggregation engine.

mod batch;
mod event;
mod metrics;
mod window;

pub use batch::{BatchRepository, BatchStatus, CollectionBatch, RepoStatus, batch_id};
pub use event::{EventKind, EventPayload, Owner, OwnerKind, RawEvent, event_id};
pub use metrics::{
    ActivityTotals, MemberMetrics, OwnerMetrics, RankingEntry, RankingMetric, RepoMetrics, Scope, SeriesPoint,
    SubjectKind, TimeSeries,
};
pub use window::{Granularity, Window};
