//! The aggregation engine.
//!
//! - [`persister`] - deduplicating insert of parsed items, keyed by URL
//! - [`scheduler`] - the fixed-interval loop: pick the least recently
//!   fetched feed, fetch, parse, persist, repeat until stopped
//!
//! A failing feed never stops the loop. It is logged, stamped fetched, and
//! the next tick moves on to another feed.

mod persister;
mod scheduler;

pub use persister::{persist, PersistSummary};
pub use scheduler::{
    AggregateError, Aggregator, AggregatorHandle, AggregatorSettings, CycleOutcome,
    SchedulerState, SettingsError, DEFAULT_FETCH_TIMEOUT, DEFAULT_INTERVAL, MAX_WORKERS,
};
