//! Cancelling queries and terminating backends.

use tracing::{debug, info};

use super::{PgCollectError, PostgresCollector};
use crate::query::{Options, TemplateError, format, templates};

/// Signal sent to backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// `pg_cancel_backend`: abort the running query.
    Cancel,
    /// `pg_terminate_backend`: close the session.
    Terminate,
}

impl SignalAction {
    fn single_query(self) -> &'static str {
        match self {
            SignalAction::Cancel => templates::CANCEL_BACKEND,
            SignalAction::Terminate => templates::TERMINATE_BACKEND,
        }
    }

    fn group_template(self) -> &'static str {
        match self {
            SignalAction::Cancel => templates::CANCEL_GROUP,
            SignalAction::Terminate => templates::TERMINATE_GROUP,
        }
    }

    /// Human-readable outcome of a group signal.
    pub fn summary(self, count: i64) -> String {
        match self {
            SignalAction::Cancel => format!("Cancelled {} queries.", count),
            SignalAction::Terminate => format!("Terminated {} backends.", count),
        }
    }
}

/// Backends grouped by state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendGroup {
    Idle,
    IdleXact,
    Active,
    Waiting,
    Others,
}

impl BackendGroup {
    pub const ALL: [BackendGroup; 5] = [
        BackendGroup::Idle,
        BackendGroup::IdleXact,
        BackendGroup::Active,
        BackendGroup::Waiting,
        BackendGroup::Others,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BackendGroup::Idle => "idle",
            BackendGroup::IdleXact => "idle_xact",
            BackendGroup::Active => "active",
            BackendGroup::Waiting => "waiting",
            BackendGroup::Others => "others",
        }
    }

    fn letter(self) -> char {
        match self {
            BackendGroup::Idle => 'i',
            BackendGroup::IdleXact => 'x',
            BackendGroup::Active => 'a',
            BackendGroup::Waiting => 'w',
            BackendGroup::Others => 'o',
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// SQL condition over `pg_stat_activity` selecting this group.
    pub fn condition(self, version: i32) -> &'static str {
        match self {
            BackendGroup::Idle => "state = 'idle'",
            BackendGroup::IdleXact => {
                "state IN ('idle in transaction (aborted)', 'idle in transaction')"
            }
            BackendGroup::Active => "state = 'active'",
            BackendGroup::Waiting if version < 90600 => "waiting",
            BackendGroup::Waiting => "wait_event IS NOT NULL OR wait_event_type IS NOT NULL",
            BackendGroup::Others => "state IN ('fastpath function call', 'disabled')",
        }
    }
}

/// Set of [`BackendGroup`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupMask(u8);

impl GroupMask {
    /// Parses letters `i`, `x`, `a`, `w`, `o`; other characters are ignored.
    pub fn parse(s: &str) -> Self {
        let bits = s
            .chars()
            .filter_map(|c| BackendGroup::ALL.into_iter().find(|g| g.letter() == c))
            .fold(0, |acc, g| acc | g.bit());
        GroupMask(bits)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, group: BackendGroup) -> bool {
        self.0 & group.bit() != 0
    }

    pub fn groups(self) -> impl Iterator<Item = BackendGroup> {
        BackendGroup::ALL.into_iter().filter(move |g| self.contains(*g))
    }

    /// Space-separated group names, or `empty`.
    pub fn describe(self) -> String {
        if self.is_empty() {
            return "empty".to_string();
        }
        self.groups().map(BackendGroup::name).collect::<Vec<_>>().join(" ")
    }
}

/// Renders one group query per selected group.
pub fn group_queries(
    action: SignalAction,
    mask: GroupMask,
    version: i32,
    opts: &Options,
) -> Result<Vec<(BackendGroup, String)>, TemplateError> {
    mask.groups()
        .map(|group| {
            let mut opts = opts.clone();
            opts.backend_state = format!("({})", group.condition(version));
            format(action.group_template(), &opts).map(|sql| (group, sql))
        })
        .collect()
}

impl PostgresCollector {
    /// Signals one backend; returns whether the server signalled it.
    pub fn signal_backend(&mut self, action: SignalAction, pid: i32) -> Result<bool, PgCollectError> {
        self.ensure_connected()?;
        let signalled = self.with_client(|client| {
            let row = client.query_one(action.single_query(), &[&pid])?;
            Ok(row.try_get::<_, bool>(0)?)
        })?;
        info!(?action, pid, signalled, "signalled backend");
        Ok(signalled)
    }

    /// Signals every backend in the selected groups older than the configured
    /// age threshold; returns the number of signalled backends.
    pub fn signal_group(&mut self, action: SignalAction, mask: GroupMask) -> Result<i64, PgCollectError> {
        if mask.is_empty() {
            return Ok(0);
        }
        self.ensure_connected()?;
        let version = self.server().map_or(0, |s| s.version);
        let queries = group_queries(action, mask, version, self.options())?;

        let mut total = 0;
        for (group, sql) in queries {
            let count = self.with_client(|client| {
                let row = client.query_one(sql.as_str(), &[])?;
                Ok(row.try_get::<_, i64>(0)?)
            })?;
            debug!(group = group.name(), count, "signalled backend group");
            total += count;
        }
        info!(?action, mask = %mask.describe(), total, "signalled backend groups");
        Ok(total)
    }
}
