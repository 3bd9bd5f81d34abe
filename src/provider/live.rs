//! Live provider backed by a [`StatSource`].

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, warn};

use super::{ProviderError, StatSource};
use crate::stat::{StatTable, calculate_delta};
use crate::view::ViewKind;

struct Previous {
    table: StatTable,
    taken_at: Instant,
}

/// Produces per-second rates for any view of the source.
pub struct LiveProvider<S> {
    source: S,
    previous: HashMap<ViewKind, Previous>,
    last_error: Option<ProviderError>,
}

impl<S: StatSource> LiveProvider<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            previous: HashMap::new(),
            last_error: None,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Returns the error of the last failed poll, cleared by a successful one.
    pub fn last_error(&self) -> Option<&ProviderError> {
        self.last_error.as_ref()
    }

    /// Whether a previous snapshot of `kind` is available for diffing.
    pub fn has_baseline(&self, kind: ViewKind) -> bool {
        self.previous.contains_key(&kind)
    }

    /// Forgets all previous snapshots.
    pub fn reset(&mut self) {
        self.previous.clear();
    }

    /// Takes a snapshot of `kind` and returns rates since the previous one.
    ///
    /// The first poll of a view returns the raw snapshot. On error the
    /// previous snapshot is kept for the next attempt.
    pub fn poll(&mut self, kind: ViewKind) -> Result<StatTable, ProviderError> {
        let result = self.poll_at(kind, Instant::now);
        match &result {
            Ok(_) => self.last_error = None,
            Err(e) => {
                warn!(view = %kind, error = %e, "poll failed");
                self.last_error = Some(e.clone());
            }
        }
        result
    }

    pub(crate) fn poll_at(
        &mut self,
        kind: ViewKind,
        clock: impl FnOnce() -> Instant,
    ) -> Result<StatTable, ProviderError> {
        let current = self.source.snapshot(kind)?;
        let taken_at = clock();

        let Some(view) = self.source.view(kind) else {
            return Ok(current);
        };
        if !current.is_valid() {
            self.previous.remove(&kind);
            return Ok(current);
        }

        let mut output = match self.previous.get(&kind) {
            Some(prev) => {
                let interval = taken_at.saturating_duration_since(prev.taken_at);
                debug!(view = %kind, interval_ms = interval.as_millis() as u64, "computing delta");
                calculate_delta(
                    &current,
                    &prev.table,
                    view.key_columns,
                    view.diff,
                    interval,
                    view.order_desc,
                )?
            }
            None => current.clone(),
        };
        if view.diff.is_empty() {
            output.sort(view.order_column, view.order_desc);
        }

        self.previous.insert(
            kind,
            Previous {
                table: current,
                taken_at,
            },
        );
        Ok(output)
    }
}
