//! Tollbooth meters and bills tenant ("realm") consumption of third-party
//! language-model APIs.
//!
//! Prices, overhead markups, and budget ceilings all change over time per
//! realm. Tollbooth keeps a gapless, non-overlapping history of every such
//! change as validity intervals (`[valid_from, valid_to)` slices), so that any
//! past usage event can be re-priced identically and a UI can render
//! "current value + full history".
//!
//! The crate is a library: it is driven through [`services::Services`] by an
//! HTTP layer (or tests) that supplies realm ids and request payloads.
//! Persistence runs on SQLite or PostgreSQL behind the `database-sqlite` /
//! `database-postgres` features.

pub mod config;
pub mod db;
pub mod models;
pub mod services;
