//! gator: a personal RSS/Atom aggregator.
//!
//! Users follow feeds; a background loop polls the least recently fetched
//! feed on every tick and stores new posts, deduplicated by URL, in SQLite.

pub mod aggregator;
pub mod config;
pub mod feed;
pub mod shutdown;
pub mod storage;
pub mod util;
