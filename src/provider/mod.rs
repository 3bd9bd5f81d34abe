//! Polling state: turns successive snapshots into rates.
//!
//! [`LiveProvider`] pulls snapshots from a [`StatSource`] (normally
//! [`PostgresCollector`](crate::collector::PostgresCollector)), remembers the
//! previous one per view and feeds both to the delta engine with the measured
//! interval between them.

mod live;

pub use live::LiveProvider;

use crate::collector::{PgCollectError, PostgresCollector};
use crate::stat::{StatError, StatTable};
use crate::view::{ConfiguredView, ViewKind};

/// Error types that can occur while polling.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Snapshot could not be collected.
    Collection(String),
    /// Snapshots could not be diffed.
    Delta(StatError),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Collection(msg) => write!(f, "Collection error: {}", msg),
            ProviderError::Delta(e) => write!(f, "Delta error: {}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<PgCollectError> for ProviderError {
    fn from(e: PgCollectError) -> Self {
        ProviderError::Collection(e.to_string())
    }
}

impl From<StatError> for ProviderError {
    fn from(e: StatError) -> Self {
        ProviderError::Delta(e)
    }
}

/// Source of raw view snapshots.
pub trait StatSource {
    /// Takes a fresh snapshot of `kind`.
    fn snapshot(&mut self, kind: ViewKind) -> Result<StatTable, ProviderError>;

    /// Diff parameters of `kind` for the snapshots currently produced.
    fn view(&self, kind: ViewKind) -> Option<&ConfiguredView>;
}

impl StatSource for PostgresCollector {
    fn snapshot(&mut self, kind: ViewKind) -> Result<StatTable, ProviderError> {
        Ok(PostgresCollector::snapshot(self, kind)?)
    }

    fn view(&self, kind: ViewKind) -> Option<&ConfiguredView> {
        PostgresCollector::view(self, kind)
    }
}
