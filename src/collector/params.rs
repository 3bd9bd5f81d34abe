//! Connection parameters in libpq style.

use std::str::FromStr;

use postgres::{Client, NoTls};

use super::{PgCollectError, format_postgres_error};

/// Transport security, from `PGSSLMODE` / `--sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    #[default]
    Disable,
    /// Encrypt without verifying the server certificate.
    Require,
    /// Encrypt and verify certificate and host name.
    VerifyFull,
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disable" | "allow" | "prefer" => Ok(TlsMode::Disable),
            "require" => Ok(TlsMode::Require),
            "verify-ca" | "verify-full" => Ok(TlsMode::VerifyFull),
            other => Err(format!("invalid sslmode '{}'", other)),
        }
    }
}

/// Where and how to connect.
///
/// Defaults follow libpq: `PGHOST` (localhost), `PGPORT` (5432),
/// `PGUSER` (falls back to `USER`), `PGPASSWORD`, `PGDATABASE` (same as the
/// user) and `PGSSLMODE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: Option<String>,
    pub sslmode: TlsMode,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: None,
            password: None,
            dbname: None,
            sslmode: TlsMode::Disable,
        }
    }
}

impl ConnectionParams {
    pub fn from_env() -> Result<Self, PgCollectError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ConnectionParams::from_env`] with a custom variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, PgCollectError> {
        let mut params = Self::default();
        if let Some(host) = get("PGHOST") {
            params.host = host;
        }
        if let Some(port) = get("PGPORT") {
            params.port = port
                .parse()
                .map_err(|_| PgCollectError::InvalidInput(format!("PGPORT: invalid port '{}'", port)))?;
        }
        params.user = get("PGUSER").or_else(|| get("USER"));
        params.password = get("PGPASSWORD").filter(|p| !p.is_empty());
        params.dbname = get("PGDATABASE");
        if let Some(mode) = get("PGSSLMODE") {
            params.sslmode = mode.parse().map_err(PgCollectError::InvalidInput)?;
        }
        Ok(params)
    }

    /// Builds a `key=value` connection string.
    pub fn connection_string(&self) -> Result<String, PgCollectError> {
        let user = self
            .user
            .as_deref()
            .ok_or_else(|| PgCollectError::EnvNotSet("PGUSER or USER".to_string()))?;
        let dbname = self.dbname.as_deref().unwrap_or(user);

        let mut parts = vec![
            format!("host={}", quote_value(&self.host)),
            format!("port={}", self.port),
            format!("user={}", quote_value(user)),
        ];
        if let Some(password) = &self.password {
            parts.push(format!("password={}", quote_value(password)));
        }
        parts.push(format!("dbname={}", quote_value(dbname)));
        parts.push(
            match self.sslmode {
                TlsMode::Disable => "sslmode=disable",
                TlsMode::Require | TlsMode::VerifyFull => "sslmode=require",
            }
            .to_string(),
        );
        parts.push("application_name=rpgtop".to_string());

        Ok(parts.join(" "))
    }

    /// Opens a new connection.
    pub fn connect(&self) -> Result<Client, PgCollectError> {
        let conn_str = self.connection_string()?;
        let result = match self.sslmode {
            TlsMode::Disable => Client::connect(&conn_str, NoTls),
            TlsMode::Require | TlsMode::VerifyFull => {
                let mut builder = native_tls::TlsConnector::builder();
                if self.sslmode == TlsMode::Require {
                    builder
                        .danger_accept_invalid_certs(true)
                        .danger_accept_invalid_hostnames(true);
                }
                let connector = builder
                    .build()
                    .map_err(|e| PgCollectError::ConnectionError(format!("TLS: {}", e)))?;
                Client::connect(&conn_str, postgres_native_tls::MakeTlsConnector::new(connector))
            }
        };
        result.map_err(|e| PgCollectError::ConnectionError(format_postgres_error(&e)))
    }
}

fn quote_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
