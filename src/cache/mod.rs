//! Versioned response cache with generation lifecycle.
//!
//! This module provides the durable half of the interception layer:
//! - Named, versioned cache generations (precache + runtime)
//! - All-or-nothing precache population from a manifest
//! - Activation-time purge of stale generations
//! - Opportunistic runtime caching bounded by an LRU cap
//!
//! Storage is behind the [`CacheStore`] trait so tests (and non-durable
//! runs) can substitute an in-memory backend.

mod manager;
mod store;

pub use manager::CacheManager;
pub use store::{CacheStore, EntrySummary, MemoryStore, SqliteStore, StoredResponse};
