//! rpgtop - PostgreSQL statistics in batch "top" mode.
//!
//! Polls one statistics view at a fixed interval and prints per-second
//! rates of its cumulative counters. Also cancels queries and terminates
//! backends, one at a time or by state.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use clap::{ArgGroup, Parser};
use regex::Regex;
use serde::Serialize;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use rpgtop::collector::{
    ConnectionParams, GroupMask, PostgresCollector, QuerySettings, SignalAction, TlsMode,
};
use rpgtop::provider::LiveProvider;
use rpgtop::query::{DisplayMode, is_valid_age_threshold};
use rpgtop::stat::StatTable;
use rpgtop::view::ViewKind;

const MAX_INTERVAL: u64 = 300;

/// PostgreSQL statistics viewer.
#[derive(Parser)]
#[command(
    name = "rpgtop",
    about = "PostgreSQL statistics viewer",
    version,
    disable_help_flag = true,
    disable_version_flag = true,
    group(
        ArgGroup::new("admin")
            .args(["cancel", "terminate", "cancel_group", "terminate_group"])
            .multiple(false)
    )
)]
struct Args {
    /// Refresh interval in seconds (1-300).
    #[arg(default_value = "1", value_parser = parse_interval)]
    interval: u64,

    /// Statistics view: databases, activity, replication, tables, indexes,
    /// sizes, functions, statements, progress_vacuum.
    #[arg(short = 'V', long, default_value = "databases")]
    view: ViewKind,

    /// Number of rate tables to print before exiting.
    #[arg(short, long)]
    count: Option<u64>,

    /// Sort column, by name or zero-based index.
    #[arg(short, long)]
    sort: Option<String>,

    /// Sort ascending instead of descending.
    #[arg(long)]
    asc: bool,

    /// Print one JSON document per poll.
    #[arg(long)]
    json: bool,

    /// Truncate query texts to this many characters (0 = default).
    #[arg(long, default_value_t = 0)]
    query_len: i32,

    /// Include system tables and indexes.
    #[arg(long)]
    system_tables: bool,

    /// Include idle backends in the activity view.
    #[arg(long)]
    show_idle: bool,

    /// Only list and signal backends older than HH:MM:SS[.f].
    #[arg(long, value_parser = parse_age)]
    min_age: Option<String>,

    /// Keep rows whose COLUMN matches REGEX.
    #[arg(long, value_name = "COLUMN=REGEX", value_parser = parse_filter)]
    filter: Option<RowFilter>,

    /// Database server host or socket directory (overrides PGHOST).
    #[arg(short = 'h', long)]
    host: Option<String>,

    /// Database server port (overrides PGPORT).
    #[arg(short, long)]
    port: Option<u16>,

    /// Database user (overrides PGUSER).
    #[arg(short = 'U', long)]
    user: Option<String>,

    /// Database name (overrides PGDATABASE).
    #[arg(short, long)]
    dbname: Option<String>,

    /// disable, require or verify-full (overrides PGSSLMODE).
    #[arg(long)]
    sslmode: Option<TlsMode>,

    /// Cancel the query of backend PID and exit.
    #[arg(long, value_name = "PID")]
    cancel: Option<i32>,

    /// Terminate backend PID and exit.
    #[arg(long, value_name = "PID")]
    terminate: Option<i32>,

    /// Cancel queries of backends in states MASK (i, x, a, w, o) and exit.
    #[arg(long, value_name = "MASK")]
    cancel_group: Option<String>,

    /// Terminate backends in states MASK (i, x, a, w, o) and exit.
    #[arg(long, value_name = "MASK")]
    terminate_group: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,

    /// Print help.
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,

    /// Print version.
    #[arg(long, action = clap::ArgAction::Version)]
    version: Option<bool>,
}

#[derive(Debug, Clone)]
struct RowFilter {
    column: String,
    pattern: Regex,
}

enum AdminAction {
    Backend(SignalAction, i32),
    Group(SignalAction, GroupMask),
}

#[derive(Serialize)]
struct Report<'a> {
    timestamp: String,
    view: ViewKind,
    #[serde(flatten)]
    table: &'a StatTable,
}

fn parse_interval(s: &str) -> Result<u64, String> {
    let secs: u64 = s
        .parse()
        .map_err(|e| format!("invalid interval '{}': {}", s, e))?;
    if !(1..=MAX_INTERVAL).contains(&secs) {
        return Err(format!(
            "interval must be between 1 and {} seconds",
            MAX_INTERVAL
        ));
    }
    Ok(secs)
}

fn parse_age(s: &str) -> Result<String, String> {
    if is_valid_age_threshold(s) {
        Ok(s.to_string())
    } else {
        Err(format!("invalid age '{}', expected HH:MM:SS[.f]", s))
    }
}

fn parse_filter(s: &str) -> Result<RowFilter, String> {
    let (column, pattern) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid filter '{}', expected COLUMN=REGEX", s))?;
    if column.is_empty() {
        return Err("filter column is empty".to_string());
    }
    let pattern = Regex::new(pattern).map_err(|e| format!("invalid filter regex: {}", e))?;
    Ok(RowFilter {
        column: column.to_string(),
        pattern,
    })
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Logs go to stderr so stdout carries only tables.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(format!("rpgtop={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn connection_params(args: &Args) -> Result<ConnectionParams, Box<dyn std::error::Error>> {
    let mut params = ConnectionParams::from_env()?;
    if let Some(host) = &args.host {
        params.host = host.clone();
    }
    if let Some(port) = args.port {
        params.port = port;
    }
    if let Some(user) = &args.user {
        params.user = Some(user.clone());
    }
    if let Some(dbname) = &args.dbname {
        params.dbname = Some(dbname.clone());
    }
    if let Some(sslmode) = args.sslmode {
        params.sslmode = sslmode;
    }
    Ok(params)
}

fn admin_action(args: &Args) -> Option<AdminAction> {
    if let Some(pid) = args.cancel {
        return Some(AdminAction::Backend(SignalAction::Cancel, pid));
    }
    if let Some(pid) = args.terminate {
        return Some(AdminAction::Backend(SignalAction::Terminate, pid));
    }
    if let Some(mask) = &args.cancel_group {
        return Some(AdminAction::Group(SignalAction::Cancel, GroupMask::parse(mask)));
    }
    if let Some(mask) = &args.terminate_group {
        return Some(AdminAction::Group(SignalAction::Terminate, GroupMask::parse(mask)));
    }
    None
}

fn run_admin(
    collector: &mut PostgresCollector,
    action: AdminAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        AdminAction::Backend(action, pid) => {
            if !collector.signal_backend(action, pid)? {
                return Err(format!("backend {} was not signalled", pid).into());
            }
            match action {
                SignalAction::Cancel => println!("Cancelled query of backend {}.", pid),
                SignalAction::Terminate => println!("Terminated backend {}.", pid),
            }
        }
        AdminAction::Group(action, mask) => {
            if mask.is_empty() {
                warn!("state mask is empty, nothing to do");
                return Ok(());
            }
            info!(mask = %mask.describe(), "signalling backend groups");
            let count = collector.signal_group(action, mask)?;
            println!("{}", action.summary(count));
        }
    }
    Ok(())
}

/// Column to sort on: the user's choice, else the view's default.
fn sort_column(table: &StatTable, choice: Option<&str>, default: usize) -> Option<usize> {
    match choice {
        None => Some(default),
        Some(name) => table
            .column_index(name)
            .or_else(|| name.parse().ok().filter(|&i| i < table.column_count())),
    }
}

fn print_table(
    out: &mut impl Write,
    kind: ViewKind,
    table: &StatTable,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let now = Utc::now();
    if json {
        let report = Report {
            timestamp: now.to_rfc3339(),
            view: kind,
            table,
        };
        serde_json::to_writer(&mut *out, &report)?;
        writeln!(out)?;
    } else {
        writeln!(out, "{} {}", now.format("%Y-%m-%d %H:%M:%S UTC"), kind)?;
        if table.is_valid() {
            table.write(out)?;
        } else {
            writeln!(out, "view is not available on this server")?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let settings = QuerySettings {
        mode: DisplayMode::Top,
        query_len: args.query_len,
        system_tables: args.system_tables,
        show_idle: args.show_idle,
        min_age: args.min_age.clone(),
    };
    let mut collector = PostgresCollector::new(connection_params(&args)?, settings);
    collector.try_connect()?;
    if let Some(server) = collector.server() {
        info!(
            "Connected: server_version_num={}, recovery={}, pg_stat_statements={}",
            server.version,
            server.recovery,
            server.pgss_schema.as_deref().unwrap_or("not installed")
        );
    }

    if let Some(action) = admin_action(&args) {
        return run_admin(&mut collector, action);
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let kind = args.view;
    let interval = Duration::from_secs(args.interval);
    let mut provider = LiveProvider::new(collector);
    let mut printed: u64 = 0;
    let stdout = io::stdout();

    while running.load(Ordering::SeqCst) {
        let first = !provider.has_baseline(kind);
        match provider.poll(kind) {
            Ok(mut table) => {
                let view = provider.source().view(kind);
                let has_counters = view.is_some_and(|v| !v.diff.is_empty());
                if first && has_counters && table.is_valid() {
                    debug!("Baseline snapshot of {} taken", kind);
                } else {
                    if let Some(filter) = &args.filter {
                        match table.column_index(&filter.column) {
                            Some(col) => table.retain_matching(col, &filter.pattern),
                            None => warn!("Unknown filter column '{}'", filter.column),
                        }
                    }
                    if args.sort.is_some() || args.asc {
                        let default = view.map_or(0, |v| {
                            if v.diff.is_empty() { v.order_column } else { v.diff.start }
                        });
                        match sort_column(&table, args.sort.as_deref(), default) {
                            Some(col) => table.sort(col, !args.asc),
                            None => warn!("Unknown sort column '{}'", args.sort.as_deref().unwrap_or_default()),
                        }
                    }
                    print_table(&mut stdout.lock(), kind, &table, args.json)?;
                    printed += 1;
                    if args.count.is_some_and(|count| printed >= count) {
                        break;
                    }
                }
            }
            Err(e) => {
                error!("Failed to poll {}: {}", kind, e);
            }
        }

        // Sleep with periodic checks for shutdown signal
        let sleep_interval = Duration::from_millis(100);
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rpgtop::stat::Cell;

    #[test]
    fn cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parse_interval_bounds() {
        assert_eq!(parse_interval("1"), Ok(1));
        assert_eq!(parse_interval("300"), Ok(300));
        assert!(parse_interval("0").is_err());
        assert!(parse_interval("301").is_err());
        assert!(parse_interval("abc").is_err());
    }

    #[test]
    fn parse_args() {
        let args = Args::try_parse_from([
            "rpgtop", "5", "-V", "tables", "-s", "seq_scan", "--asc", "-h", "db1", "-U", "app",
            "--min-age", "00:00:05",
        ])
        .unwrap();
        assert_eq!(args.interval, 5);
        assert_eq!(args.view, ViewKind::Tables);
        assert_eq!(args.sort.as_deref(), Some("seq_scan"));
        assert!(args.asc);
        assert_eq!(args.host.as_deref(), Some("db1"));
        assert_eq!(args.min_age.as_deref(), Some("00:00:05"));
        assert!(admin_action(&args).is_none());
    }

    #[test]
    fn parse_args_rejects_invalid_values() {
        assert!(Args::try_parse_from(["rpgtop", "-V", "locks"]).is_err());
        assert!(Args::try_parse_from(["rpgtop", "--min-age", "5m"]).is_err());
        assert!(Args::try_parse_from(["rpgtop", "--filter", "novalue"]).is_err());
        assert!(Args::try_parse_from(["rpgtop", "--cancel", "1", "--terminate", "2"]).is_err());
    }

    #[test]
    fn admin_actions() {
        let args = Args::try_parse_from(["rpgtop", "--terminate-group", "ix"]).unwrap();
        match admin_action(&args) {
            Some(AdminAction::Group(SignalAction::Terminate, mask)) => {
                assert_eq!(mask.describe(), "idle idle_xact");
            }
            _ => panic!("expected group action"),
        }
        let args = Args::try_parse_from(["rpgtop", "--cancel", "42"]).unwrap();
        assert!(matches!(
            admin_action(&args),
            Some(AdminAction::Backend(SignalAction::Cancel, 42))
        ));
    }

    #[test]
    fn filter_parsing() {
        let f = parse_filter("datname=^app_").unwrap();
        assert_eq!(f.column, "datname");
        assert!(f.pattern.is_match("app_1"));
        assert!(parse_filter("=x").is_err());
        assert!(parse_filter("a=(").is_err());
    }

    #[test]
    fn sort_column_resolution() {
        let table = StatTable::new(
            vec!["name".to_string(), "calls".to_string()],
            vec![vec![Cell::new("a"), Cell::new("1")]],
        )
        .unwrap();
        assert_eq!(sort_column(&table, None, 1), Some(1));
        assert_eq!(sort_column(&table, Some("calls"), 0), Some(1));
        assert_eq!(sort_column(&table, Some("0"), 1), Some(0));
        assert_eq!(sort_column(&table, Some("7"), 1), None);
        assert_eq!(sort_column(&table, Some("missing"), 1), None);
    }

    #[test]
    fn json_report_shape() {
        let table = StatTable::new(
            vec!["name".to_string()],
            vec![vec![Cell::new("a")], vec![Cell::null()]],
        )
        .unwrap();
        let mut out = Vec::new();
        print_table(&mut out, ViewKind::Functions, &table, true).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["view"], "functions");
        assert_eq!(value["valid"], true);
        assert_eq!(value["columns"][0], "name");
        assert_eq!(value["rows"][1][0]["valid"], false);
        assert!(value["timestamp"].is_string());
    }
}
