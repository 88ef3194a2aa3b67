//! Data engine for virtualized tables
//!
//! Serves a table that is far larger than what fits on screen, or in memory.
//! A [`DataFrame`](frame::DataFrame) describes the source; wrappers add
//! caching ([`CachedFrame`](cache::CachedFrame)) and sorting
//! ([`SortableFrame`](sort::SortableFrame)); the [`viewport`] module turns a
//! scroll position into the window of rows to fetch.

pub mod cache;
pub mod coalesce;
pub mod error;
pub mod frame;
pub mod model;
pub mod prefs;
pub mod sort;
pub mod viewport;
