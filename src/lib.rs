//! # idxwalk
//!
//! Resumable walker for static file indexes, plus an HTML table exporter.
//!
//! The walker fetches a list of named files from an index split into
//! per-letter folders. All progress lives in a SQLite session store, so
//! a walk can be stopped at any point and picked up by a later run.

pub mod config;
pub mod error;
pub mod event;
pub mod index;
pub mod model;
pub mod repodata;
pub mod storage;
pub mod table;
pub mod telemetry;
pub mod walker;
