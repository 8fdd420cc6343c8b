//! Core library for gh-metrics
//!
//! Collects commit, pull request, and deployment activity for a GitHub
//! organization or user account, stores it durably, and computes aggregated
//! metrics from the stored event log.
//!
//! # Module Organization
//!
//! - [`commands`]: Command-line interface and orchestration
//! - [`model`]: Domain types shared across the pipeline
//! - [`collect`]: Rate-limited, resumable collection pipeline
//! - [`store`]: SQLite-backed durable store
//! - [`aggregate`]: Rollups, time series, and rankings

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

pub mod aggregate;
pub mod collect;
pub mod commands;
pub mod model;
pub mod store;

pub use crate::commands::run;
