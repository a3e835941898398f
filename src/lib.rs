//! Offline-first request cache for a single web origin.
//!
//! satchel sits between an application and the network: it precaches the
//! app shell from a manifest, routes every intercepted GET request through
//! a per-class caching strategy (network-first for pages, cache-first for
//! static assets, network-first with cache fallback for the rest), and
//! synthesizes a self-contained offline page when a navigation has neither
//! network nor cache.

pub mod cache;
pub mod config;
pub mod fallback;
pub mod http;
pub mod net;
pub mod strategy;
pub mod worker;
