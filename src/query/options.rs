//! Capability-dependent query options.
//!
//! [`Options`] is the configuration bag consumed by the template renderer.
//! It is rebuilt from scratch whenever server capabilities are detected.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use super::template::{TemplateContext, Value};

/// Truncation length of query texts when no explicit length is given.
pub const DEFAULT_QUERY_LEN: i32 = 256;

/// Age threshold matching every backend.
pub const DEFAULT_AGE_THRESHOLD: &str = "00:00:00.0";

/// First server version with `pg_wal_*` function names (PostgreSQL 10).
pub const MODERN_WAL_VERSION: i32 = 100000;

static AGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,2}:[0-5]\d:[0-5]\d(\.\d+)?$").expect("valid age threshold regex")
});

/// How query texts are projected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// Interactive view, query texts truncated to [`DEFAULT_QUERY_LEN`].
    #[default]
    Top,
    /// Full query texts, used when snapshots are exported.
    Record,
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top" => Ok(DisplayMode::Top),
            "record" => Ok(DisplayMode::Record),
            other => Err(format!("unknown display mode '{}'", other)),
        }
    }
}

/// Named SQL fragments substituted into view templates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Options {
    /// `user` or `all`, selects `pg_stat_user_*` vs `pg_stat_all_*`.
    pub view_type: String,
    /// WAL position difference function.
    pub wal_fn_diff: String,
    /// Current WAL position function (last received on replicas).
    pub wal_fn_current: String,
    /// Minimum transaction or query age of listed backends.
    pub query_age_thresh: String,
    /// Hide idle backends.
    pub show_no_idle: bool,
    /// Requested query text length, 0 when unset.
    pub pgss_query_len: i32,
    /// Query text projection expression over alias `p`.
    pub pgss_query_len_fn: String,
    /// Quoted schema holding `pg_stat_statements`.
    pub pgss_schema: String,
    /// Backend state condition used by group signalling.
    pub backend_state: String,
}

impl Options {
    /// Builds options for the given server capabilities.
    pub fn configure(version: i32, recovery: bool, mode: DisplayMode) -> Self {
        Self::configure_with_query_len(version, recovery, mode, 0)
    }

    /// Like [`Options::configure`], with an explicit query text length.
    /// Zero or negative lengths fall back to the mode's default.
    pub fn configure_with_query_len(
        version: i32,
        recovery: bool,
        mode: DisplayMode,
        query_len: i32,
    ) -> Self {
        let (wal_fn_diff, wal_fn_current) = match (version >= MODERN_WAL_VERSION, recovery) {
            (true, false) => ("pg_wal_lsn_diff", "pg_current_wal_lsn"),
            (true, true) => ("pg_wal_lsn_diff", "pg_last_wal_receive_lsn"),
            (false, false) => ("pg_xlog_location_diff", "pg_current_xlog_location"),
            (false, true) => ("pg_xlog_location_diff", "pg_last_xlog_receive_location"),
        };

        let pgss_query_len_fn = match (mode, query_len > 0) {
            (_, true) => format!("left(p.query, {})", query_len),
            (DisplayMode::Top, false) => format!("left(p.query, {})", DEFAULT_QUERY_LEN),
            (DisplayMode::Record, false) => "p.query".to_string(),
        };

        Self {
            view_type: "user".to_string(),
            wal_fn_diff: wal_fn_diff.to_string(),
            wal_fn_current: wal_fn_current.to_string(),
            query_age_thresh: DEFAULT_AGE_THRESHOLD.to_string(),
            show_no_idle: true,
            pgss_query_len: query_len.max(0),
            pgss_query_len_fn,
            pgss_schema: "public".to_string(),
            backend_state: String::new(),
        }
    }

    /// Sets the schema holding `pg_stat_statements`, quoting it as an identifier.
    pub fn set_pgss_schema(&mut self, schema: &str) {
        self.pgss_schema = quote_ident(schema);
    }

    /// Sets the minimum backend age; returns false and keeps the old value
    /// if `age` is not `HH:MM:SS` with optional fraction.
    pub fn set_age_threshold(&mut self, age: &str) -> bool {
        if !is_valid_age_threshold(age) {
            return false;
        }
        self.query_age_thresh = age.to_string();
        true
    }
}

impl TemplateContext for Options {
    fn lookup(&self, name: &str) -> Option<Value<'_>> {
        let value = match name {
            "view_type" => Value::Str(&self.view_type),
            "wal_fn_diff" => Value::Str(&self.wal_fn_diff),
            "wal_fn_current" => Value::Str(&self.wal_fn_current),
            "query_age_thresh" => Value::Str(&self.query_age_thresh),
            "show_no_idle" => Value::Bool(self.show_no_idle),
            "pgss_query_len" => Value::Int(i64::from(self.pgss_query_len)),
            "pgss_query_len_fn" => Value::Str(&self.pgss_query_len_fn),
            "pgss_schema" => Value::Str(&self.pgss_schema),
            "backend_state" => Value::Str(&self.backend_state),
            _ => return None,
        };
        Some(value)
    }
}

/// Interprets the server's textual answer to `pg_is_in_recovery()`.
pub fn parse_recovery(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "t" | "true" | "on" | "yes" | "1"
    )
}

/// Checks an age threshold literal (`HH:MM:SS` or `HH:MM:SS.f`).
pub fn is_valid_age_threshold(s: &str) -> bool {
    AGE_RE.is_match(s)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::format;

    fn want(wal_fn_diff: &str, wal_fn_current: &str, query_len: i32, query_fn: &str) -> Options {
        Options {
            view_type: "user".to_string(),
            wal_fn_diff: wal_fn_diff.to_string(),
            wal_fn_current: wal_fn_current.to_string(),
            query_age_thresh: "00:00:00.0".to_string(),
            show_no_idle: true,
            pgss_query_len: query_len,
            pgss_query_len_fn: query_fn.to_string(),
            pgss_schema: "public".to_string(),
            backend_state: String::new(),
        }
    }

    #[test]
    fn test_configure_matrix() {
        let cases = [
            (
                130000,
                "f",
                DisplayMode::Top,
                want("pg_wal_lsn_diff", "pg_current_wal_lsn", 0, "left(p.query, 256)"),
            ),
            (
                130000,
                "t",
                DisplayMode::Top,
                want("pg_wal_lsn_diff", "pg_last_wal_receive_lsn", 0, "left(p.query, 256)"),
            ),
            (
                96000,
                "f",
                DisplayMode::Top,
                want("pg_xlog_location_diff", "pg_current_xlog_location", 0, "left(p.query, 256)"),
            ),
            (
                96000,
                "t",
                DisplayMode::Top,
                want(
                    "pg_xlog_location_diff",
                    "pg_last_xlog_receive_location",
                    0,
                    "left(p.query, 256)",
                ),
            ),
            (
                130000,
                "f",
                DisplayMode::Record,
                want("pg_wal_lsn_diff", "pg_current_wal_lsn", 0, "p.query"),
            ),
        ];

        for (version, recovery, mode, expected) in cases {
            let got = Options::configure(version, parse_recovery(recovery), mode);
            assert_eq!(got, expected, "version {} recovery {}", version, recovery);
        }
    }

    #[test]
    fn test_configure_explicit_query_len() {
        let got = Options::configure_with_query_len(130000, false, DisplayMode::Record, 123);
        assert_eq!(
            got,
            want("pg_wal_lsn_diff", "pg_current_wal_lsn", 123, "left(p.query, 123)")
        );

        let got = Options::configure_with_query_len(130000, false, DisplayMode::Top, 64);
        assert_eq!(got.pgss_query_len_fn, "left(p.query, 64)");
    }

    #[test]
    fn test_configure_non_positive_len_falls_back() {
        for len in [0, -5] {
            let top = Options::configure_with_query_len(150000, false, DisplayMode::Top, len);
            assert_eq!(top.pgss_query_len_fn, "left(p.query, 256)");
            assert_eq!(top.pgss_query_len, 0);

            let record = Options::configure_with_query_len(150000, false, DisplayMode::Record, len);
            assert_eq!(record.pgss_query_len_fn, "p.query");
        }
    }

    #[test]
    fn test_pg10_uses_modern_wal_functions() {
        let got = Options::configure(100000, false, DisplayMode::Top);
        assert_eq!(got.wal_fn_diff, "pg_wal_lsn_diff");
        let got = Options::configure(90624, false, DisplayMode::Top);
        assert_eq!(got.wal_fn_diff, "pg_xlog_location_diff");
        // PostgreSQL 10-12 have no pg_xlog_* functions left.
        for version in [100000, 110000, 120015] {
            let got = Options::configure(version, true, DisplayMode::Top);
            assert_eq!(got.wal_fn_diff, "pg_wal_lsn_diff", "{}", version);
            assert_eq!(got.wal_fn_current, "pg_last_wal_receive_lsn", "{}", version);
        }
        let got = Options::configure(MODERN_WAL_VERSION - 1, true, DisplayMode::Top);
        assert_eq!(got.wal_fn_current, "pg_last_xlog_receive_location");
    }

    #[test]
    fn test_parse_recovery() {
        for s in ["t", "true", "on", "T", " TRUE "] {
            assert!(parse_recovery(s), "{}", s);
        }
        for s in ["f", "false", "off", ""] {
            assert!(!parse_recovery(s), "{}", s);
        }
    }

    #[test]
    fn test_display_mode_from_str() {
        assert_eq!("top".parse::<DisplayMode>(), Ok(DisplayMode::Top));
        assert_eq!("record".parse::<DisplayMode>(), Ok(DisplayMode::Record));
        assert!("report".parse::<DisplayMode>().is_err());
    }

    #[test]
    fn test_default_renders_neutral() {
        let opts = Options::default();
        let got = format("[{{view_type}}][{{backend_state}}][{{pgss_query_len}}]", &opts).unwrap();
        assert_eq!(got, "[][][0]");
        let got = format("{{#if show_no_idle}}x{{else}}y{{/if}}", &opts).unwrap();
        assert_eq!(got, "y");
    }

    #[test]
    fn test_every_field_is_recognised() {
        let opts = Options::configure(150000, false, DisplayMode::Top);
        for name in [
            "view_type",
            "wal_fn_diff",
            "wal_fn_current",
            "query_age_thresh",
            "show_no_idle",
            "pgss_query_len",
            "pgss_query_len_fn",
            "pgss_schema",
            "backend_state",
        ] {
            assert!(opts.lookup(name).is_some(), "{}", name);
        }
        assert!(opts.lookup("Invalid").is_none());
    }

    #[test]
    fn test_age_threshold() {
        let mut opts = Options::configure(150000, false, DisplayMode::Top);
        assert!(opts.set_age_threshold("00:05:00"));
        assert_eq!(opts.query_age_thresh, "00:05:00");
        assert!(opts.set_age_threshold("01:00:00.5"));
        assert!(!opts.set_age_threshold("5 minutes"));
        assert!(!opts.set_age_threshold("00:61:00"));
        assert_eq!(opts.query_age_thresh, "01:00:00.5");
    }

    #[test]
    fn test_pgss_schema_is_quoted() {
        let mut opts = Options::configure(150000, false, DisplayMode::Top);
        opts.set_pgss_schema("ext");
        assert_eq!(opts.pgss_schema, "\"ext\"");
        opts.set_pgss_schema("we\"ird");
        assert_eq!(opts.pgss_schema, "\"we\"\"ird\"");
    }
}
