//! Relational store: users, feeds, feed follows and posts in SQLite.
//!
//! [`Database`] is a cloneable handle over a `sqlx` pool. Each entity's
//! operations live in their own file as `impl Database` blocks.

mod feeds;
mod follows;
mod posts;
mod schema;
mod types;
mod users;

pub use schema::Database;
pub use types::{
    DatabaseError, Feed, FeedFollow, FeedListing, InsertOutcome, NewPost, Post, User,
};
