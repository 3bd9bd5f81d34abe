//! rpgtop - PostgreSQL statistics viewer library.
//!
//! - [`query`] builds version-aware SQL from templates and detected
//!   server capabilities;
//! - [`stat`] holds query results and turns two snapshots into rates;
//! - [`view`] describes the statistics views and how to diff them;
//! - [`collector`] talks to the server;
//! - [`provider`] keeps polling state between snapshots.

pub mod collector;
pub mod provider;
pub mod query;
pub mod stat;
pub mod view;
