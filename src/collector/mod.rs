//! PostgreSQL statistics collector.
//!
//! Owns the connection, detects server capabilities once per (re)connect and
//! keeps the statistics views rendered for that server. Every call that
//! needs the server goes through [`PostgresCollector::ensure_connected`], so a
//! dropped connection is re-established on the next poll.

mod params;
mod signal;

pub use params::{ConnectionParams, TlsMode};
pub use signal::{BackendGroup, GroupMask, SignalAction, group_queries};

use postgres::Client;
use tracing::{debug, warn};

use crate::query::{
    DisplayMode, Options, TemplateError, parse_recovery,
    templates::{PGSS_SCHEMA, SERVER_PROPERTIES},
};
use crate::stat::{StatError, StatTable};
use crate::view::{ConfiguredView, ViewKind, configure_views};

/// Error type for PostgreSQL collection.
#[derive(Debug)]
pub enum PgCollectError {
    /// Environment variable not set.
    EnvNotSet(String),
    /// Connection failed.
    ConnectionError(String),
    /// Query execution failed.
    QueryError(String),
    /// View template could not be rendered.
    Template(TemplateError),
    /// Snapshot could not be built.
    Stat(StatError),
    /// Invalid user-supplied value.
    InvalidInput(String),
}

impl std::fmt::Display for PgCollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PgCollectError::EnvNotSet(var) => write!(f, "PostgreSQL: {} not set", var),
            PgCollectError::ConnectionError(msg) => write!(f, "PostgreSQL: {}", msg),
            PgCollectError::QueryError(msg) => write!(f, "PostgreSQL query error: {}", msg),
            PgCollectError::Template(e) => write!(f, "template error: {}", e),
            PgCollectError::Stat(e) => write!(f, "{}", e),
            PgCollectError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
        }
    }
}

impl std::error::Error for PgCollectError {}

impl From<TemplateError> for PgCollectError {
    fn from(e: TemplateError) -> Self {
        PgCollectError::Template(e)
    }
}

impl From<StatError> for PgCollectError {
    fn from(e: StatError) -> Self {
        PgCollectError::Stat(e)
    }
}

impl From<postgres::Error> for PgCollectError {
    fn from(e: postgres::Error) -> Self {
        let msg = format_postgres_error(&e);
        if e.is_closed() {
            PgCollectError::ConnectionError(msg)
        } else {
            PgCollectError::QueryError(msg)
        }
    }
}

impl PgCollectError {
    /// Whether the connection can no longer be used.
    fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            PgCollectError::ConnectionError(_) | PgCollectError::Stat(StatError::Connection(_))
        )
    }
}

/// Capabilities detected on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: i32,
    pub recovery: bool,
    /// Schema of `pg_stat_statements`, `None` if not installed.
    pub pgss_schema: Option<String>,
}

/// User choices layered over detected capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySettings {
    pub mode: DisplayMode,
    /// Query text length, 0 for the mode's default.
    pub query_len: i32,
    /// Query `pg_stat_all_*` instead of `pg_stat_user_*`.
    pub system_tables: bool,
    pub show_idle: bool,
    /// Minimum backend age, `HH:MM:SS[.f]`.
    pub min_age: Option<String>,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Top,
            query_len: 0,
            system_tables: false,
            show_idle: false,
            min_age: None,
        }
    }
}

impl QuerySettings {
    /// Builds the configuration bag for `server`.
    pub fn options(&self, server: &ServerInfo) -> Result<Options, PgCollectError> {
        let mut opts = Options::configure_with_query_len(
            server.version,
            server.recovery,
            self.mode,
            self.query_len,
        );
        if self.system_tables {
            opts.view_type = "all".to_string();
        }
        if self.show_idle {
            opts.show_no_idle = false;
        }
        if let Some(age) = &self.min_age {
            if !opts.set_age_threshold(age) {
                return Err(PgCollectError::InvalidInput(format!(
                    "age threshold '{}' is not HH:MM:SS",
                    age
                )));
            }
        }
        if let Some(schema) = &server.pgss_schema {
            opts.set_pgss_schema(schema);
        }
        Ok(opts)
    }
}

/// PostgreSQL statistics collector.
pub struct PostgresCollector {
    params: ConnectionParams,
    settings: QuerySettings,
    client: Option<Client>,
    last_error: Option<String>,
    server: Option<ServerInfo>,
    options: Options,
    views: Vec<ConfiguredView>,
}

impl PostgresCollector {
    pub fn new(params: ConnectionParams, settings: QuerySettings) -> Self {
        Self {
            params,
            settings,
            client: None,
            last_error: None,
            server: None,
            options: Options::default(),
            views: Vec::new(),
        }
    }

    /// Creates a collector from `PG*` environment variables.
    pub fn from_env(settings: QuerySettings) -> Result<Self, PgCollectError> {
        Ok(Self::new(ConnectionParams::from_env()?, settings))
    }

    /// Attempts to connect; useful as a startup check.
    pub fn try_connect(&mut self) -> Result<(), PgCollectError> {
        self.ensure_connected()
    }

    /// Returns the last error message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn server(&self) -> Option<&ServerInfo> {
        self.server.as_ref()
    }

    /// Configuration bag of the current connection.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Rendered view for the current connection.
    pub fn view(&self, kind: ViewKind) -> Option<&ConfiguredView> {
        self.views.iter().find(|v| v.kind == kind)
    }

    /// Ensures connection is established, reconnecting if needed.
    pub(crate) fn ensure_connected(&mut self) -> Result<(), PgCollectError> {
        if self.client.is_some() {
            return Ok(());
        }

        let mut client = match self.params.connect() {
            Ok(client) => client,
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.server = None;
                return Err(e);
            }
        };

        let server = detect_server(&mut client)?;
        let options = self.settings.options(&server)?;
        let views = configure_views(server.version, server.pgss_schema.is_some(), &options)?;
        debug!(
            version = server.version,
            recovery = server.recovery,
            pgss = ?server.pgss_schema,
            "connected to PostgreSQL"
        );

        self.server = Some(server);
        self.options = options;
        self.views = views;
        self.client = Some(client);
        self.last_error = None;
        Ok(())
    }

    /// Runs the view's query. Unavailable views yield an invalid table.
    pub fn snapshot(&mut self, kind: ViewKind) -> Result<StatTable, PgCollectError> {
        self.ensure_connected()?;

        let Some(sql) = self.view(kind).and_then(|v| v.sql.clone()) else {
            return Ok(StatTable::invalid());
        };
        let result = self.with_client(|client| Ok(StatTable::from_query(client, &sql)?));
        if let Ok(table) = &result {
            debug!(view = %kind, rows = table.row_count(), "collected snapshot");
        }
        result
    }

    /// Runs `f` on the live client; a lost connection is dropped so the next
    /// call reconnects.
    pub(crate) fn with_client<T>(
        &mut self,
        f: impl FnOnce(&mut Client) -> Result<T, PgCollectError>,
    ) -> Result<T, PgCollectError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| PgCollectError::ConnectionError("not connected".to_string()))?;

        let result = f(client);
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
            if e.is_connection_lost() || client.is_closed() {
                warn!(error = %e, "PostgreSQL connection lost");
                self.client = None;
            }
        }
        result
    }
}

fn detect_server(client: &mut Client) -> Result<ServerInfo, PgCollectError> {
    let props = StatTable::from_query(client, SERVER_PROPERTIES)?;
    let row = props
        .rows()
        .first()
        .ok_or_else(|| PgCollectError::QueryError("server properties: no rows".to_string()))?;
    let cell = |i: usize| row.get(i).and_then(|c| c.as_str()).unwrap_or_default();

    let version = cell(0).parse::<i32>().map_err(|_| {
        PgCollectError::QueryError(format!("invalid server_version_num '{}'", cell(0)))
    })?;
    let recovery = parse_recovery(cell(1));

    let pgss_schema = StatTable::from_query(client, PGSS_SCHEMA)?
        .rows()
        .first()
        .and_then(|row| row.first())
        .and_then(|c| c.as_str())
        .map(str::to_string);

    Ok(ServerInfo {
        version,
        recovery,
        pgss_schema,
    })
}

/// Formats PostgreSQL error message for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}
