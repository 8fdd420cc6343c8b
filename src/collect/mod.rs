//! Rate-limited, resumable collection pipeline.
//!
//! The pipeline is layered: [`RateLimiter`] paces every upstream call,
//! [`Client`] performs the HTTP and classifies responses, [`Fetcher`] turns
//! API pages into domain events, and [`Orchestrator`] drives a bounded pool
//! of per-repository workers against the store.

mod client;
mod fetch;
mod orchestrator;
mod rate_limit;

pub use client::{ApiResult, Client, RateLimitInfo};
pub use fetch::{Fetcher, RepoEvents};
pub use orchestrator::{CollectOutcome, Orchestrator, ProgressFn, RepoFailure};
pub use rate_limit::{RateLimiter, RateLimiterSnapshot};
