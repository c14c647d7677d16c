//! Pack engine and the shared primitives around it.
//!
//! The pure engine (`canonical`, `archive`, `hash`, `pack`, `diff`,
//! `unified`, `patch`) works over in-memory buffers only. `store`, `broker`,
//! `db` and `repository` hold the caller-owned mutable state.

pub mod archive;
pub mod broker;
pub mod canonical;
pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod hash;
pub mod output;
pub mod pack;
pub mod patch;
pub mod repository;
pub mod schemas;
pub mod store;
pub mod time;
pub mod unified;
