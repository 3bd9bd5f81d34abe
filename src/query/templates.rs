//! SQL templates for statistics views and administrative commands.
//!
//! Column layout matters: the view catalog refers to columns by position
//! (key columns first, then a contiguous block of cumulative counters).

/// Server version and recovery state.
pub const SERVER_PROPERTIES: &str =
    "SELECT current_setting('server_version_num')::int, pg_is_in_recovery()";

/// Schema holding the `pg_stat_statements` extension, no rows when absent.
pub const PGSS_SCHEMA: &str = r#"
    SELECT n.nspname
    FROM pg_extension e
    JOIN pg_namespace n ON n.oid = e.extnamespace
    WHERE e.extname = 'pg_stat_statements'
"#;

pub const DATABASES: &str = r#"
    SELECT
        datname,
        xact_commit AS commits,
        xact_rollback AS rollbacks,
        blks_read AS reads,
        blks_hit AS hits,
        tup_returned AS returned,
        tup_fetched AS fetched,
        tup_inserted AS inserts,
        tup_updated AS updates,
        tup_deleted AS deletes,
        conflicts,
        deadlocks,
        temp_files,
        temp_bytes / 1024 AS temp_kb,
        round(blk_read_time::numeric, 2) AS read_t,
        round(blk_write_time::numeric, 2) AS write_t,
        numbackends AS backends,
        coalesce(date_trunc('seconds', now() - stats_reset)::text, '') AS stats_age
    FROM pg_stat_database
    WHERE datname IS NOT NULL
    ORDER BY datname
"#;

pub const ACTIVITY: &str = r#"
    SELECT
        p.pid,
        coalesce(p.client_addr::text, 'local') AS cl_addr,
        coalesce(p.client_port::text, '') AS cl_port,
        p.datname,
        p.usename,
        p.application_name AS appname,
        p.backend_type,
        p.wait_event_type AS wait_etype,
        p.wait_event,
        p.state,
        date_trunc('seconds', clock_timestamp() - p.xact_start)::text AS xact_age,
        date_trunc('seconds', clock_timestamp() - p.query_start)::text AS query_age,
        date_trunc('seconds', clock_timestamp() - p.state_change)::text AS change_age,
        regexp_replace({{pgss_query_len_fn}}, '\s+', ' ', 'g') AS query
    FROM pg_stat_activity p
    WHERE p.pid <> pg_backend_pid()
        AND ((clock_timestamp() - p.xact_start) > '{{query_age_thresh}}'::interval
            OR (clock_timestamp() - p.query_start) > '{{query_age_thresh}}'::interval)
        {{#if show_no_idle}}AND p.state <> 'idle'{{/if}}
    ORDER BY p.pid DESC
"#;

/// 9.6 has wait events but no `backend_type`.
pub const ACTIVITY_96: &str = r#"
    SELECT
        p.pid,
        coalesce(p.client_addr::text, 'local') AS cl_addr,
        coalesce(p.client_port::text, '') AS cl_port,
        p.datname,
        p.usename,
        p.application_name AS appname,
        p.wait_event_type AS wait_etype,
        p.wait_event,
        p.state,
        date_trunc('seconds', clock_timestamp() - p.xact_start)::text AS xact_age,
        date_trunc('seconds', clock_timestamp() - p.query_start)::text AS query_age,
        date_trunc('seconds', clock_timestamp() - p.state_change)::text AS change_age,
        regexp_replace({{pgss_query_len_fn}}, '\s+', ' ', 'g') AS query
    FROM pg_stat_activity p
    WHERE p.pid <> pg_backend_pid()
        AND ((clock_timestamp() - p.xact_start) > '{{query_age_thresh}}'::interval
            OR (clock_timestamp() - p.query_start) > '{{query_age_thresh}}'::interval)
        {{#if show_no_idle}}AND p.state <> 'idle'{{/if}}
    ORDER BY p.pid DESC
"#;

pub const REPLICATION: &str = "SELECT pid AS pid, client_addr AS client, usename AS user, \
    application_name AS name, state, sync_state AS mode, \
    ({{wal_fn_diff}}({{wal_fn_current}}(),'0/0') / 1024)::bigint AS wal, \
    ({{wal_fn_diff}}({{wal_fn_current}}(),sent_lsn) / 1024)::bigint AS pending, \
    ({{wal_fn_diff}}(sent_lsn,write_lsn) / 1024)::bigint AS write, \
    ({{wal_fn_diff}}(write_lsn,flush_lsn) / 1024)::bigint AS flush, \
    ({{wal_fn_diff}}(flush_lsn,replay_lsn) / 1024)::bigint AS replay, \
    ({{wal_fn_diff}}({{wal_fn_current}}(),replay_lsn))::bigint / 1024 AS total_lag, \
    coalesce(date_trunc('seconds', write_lag), '0 seconds'::interval) AS write_lag, \
    coalesce(date_trunc('seconds', flush_lag), '0 seconds'::interval) AS flush_lag, \
    coalesce(date_trunc('seconds', replay_lag), '0 seconds'::interval) AS replay_lag \
    FROM pg_stat_replication ORDER BY pid DESC";

/// Before 10 positions are `*_location` and there are no lag columns.
pub const REPLICATION_95: &str = "SELECT pid AS pid, client_addr AS client, usename AS user, \
    application_name AS name, state, sync_state AS mode, \
    ({{wal_fn_diff}}({{wal_fn_current}}(),'0/0') / 1024)::bigint AS wal, \
    ({{wal_fn_diff}}({{wal_fn_current}}(),sent_location) / 1024)::bigint AS pending, \
    ({{wal_fn_diff}}(sent_location,write_location) / 1024)::bigint AS write, \
    ({{wal_fn_diff}}(write_location,flush_location) / 1024)::bigint AS flush, \
    ({{wal_fn_diff}}(flush_location,replay_location) / 1024)::bigint AS replay, \
    ({{wal_fn_diff}}({{wal_fn_current}}(),replay_location))::bigint / 1024 AS total_lag \
    FROM pg_stat_replication ORDER BY pid DESC";

pub const TABLES: &str = r#"
    SELECT
        s.schemaname || '.' || s.relname AS relation,
        s.seq_scan,
        s.seq_tup_read,
        coalesce(s.idx_scan, 0) AS idx_scan,
        coalesce(s.idx_tup_fetch, 0) AS idx_tup_fetch,
        s.n_tup_ins AS inserts,
        s.n_tup_upd AS updates,
        s.n_tup_del AS deletes,
        s.n_tup_hot_upd AS hot_updates,
        coalesce(io.heap_blks_read, 0) AS heap_read,
        coalesce(io.heap_blks_hit, 0) AS heap_hit,
        s.vacuum_count AS vacuums,
        s.autovacuum_count AS autovacuums,
        s.analyze_count AS analyzes,
        s.autoanalyze_count AS autoanalyzes,
        s.n_live_tup AS live,
        s.n_dead_tup AS dead
    FROM pg_stat_{{view_type}}_tables s
    JOIN pg_statio_{{view_type}}_tables io ON io.relid = s.relid
    ORDER BY 1
"#;

pub const INDEXES: &str = r#"
    SELECT
        s.schemaname || '.' || s.relname || '.' || s.indexrelname AS index,
        s.idx_scan,
        s.idx_tup_read,
        s.idx_tup_fetch,
        coalesce(io.idx_blks_read, 0) AS idx_read,
        coalesce(io.idx_blks_hit, 0) AS idx_hit
    FROM pg_stat_{{view_type}}_indexes s
    JOIN pg_statio_{{view_type}}_indexes io ON io.indexrelid = s.indexrelid
    ORDER BY 1
"#;

pub const SIZES: &str = r#"
    SELECT
        s.schemaname || '.' || s.relname AS relation,
        pg_total_relation_size(s.relid) / 1024 AS total_kb,
        pg_relation_size(s.relid) / 1024 AS rel_kb,
        pg_indexes_size(s.relid) / 1024 AS idx_kb,
        (pg_total_relation_size(s.relid) - pg_relation_size(s.relid)
            - pg_indexes_size(s.relid)) / 1024 AS toast_kb,
        pg_total_relation_size(s.relid) / 1024 AS total_growth,
        pg_relation_size(s.relid) / 1024 AS rel_growth,
        pg_indexes_size(s.relid) / 1024 AS idx_growth,
        (pg_total_relation_size(s.relid) - pg_relation_size(s.relid)
            - pg_indexes_size(s.relid)) / 1024 AS toast_growth
    FROM pg_stat_{{view_type}}_tables s
    ORDER BY 1
"#;

pub const FUNCTIONS: &str = r#"
    SELECT
        f.schemaname || '.' || f.funcname
            || '(' || pg_get_function_arguments(f.funcid) || ')' AS function,
        f.calls,
        round(f.total_time::numeric, 2) AS total_t,
        round(f.self_time::numeric, 2) AS self_t,
        round((f.total_time / greatest(f.calls, 1))::numeric, 2) AS avg_t
    FROM pg_stat_user_functions f
    ORDER BY 1
"#;

/// 17 renamed block timings to `shared_blk_*_time`.
pub const STATEMENTS: &str = r#"
    SELECT
        left(md5(p.userid::text || p.dbid::text || p.queryid::text), 10) AS queryid,
        a.rolname AS user,
        d.datname AS database,
        p.calls,
        p.rows,
        round((p.total_plan_time + p.total_exec_time)::numeric, 2) AS total_t,
        round(p.total_plan_time::numeric, 2) AS plan_t,
        round(p.total_exec_time::numeric, 2) AS exec_t,
        round((p.shared_blk_read_time + p.shared_blk_write_time)::numeric, 2) AS io_t,
        p.shared_blks_hit + p.local_blks_hit AS hits,
        p.shared_blks_read + p.local_blks_read AS reads,
        p.shared_blks_dirtied + p.local_blks_dirtied AS dirtied,
        p.shared_blks_written + p.local_blks_written AS written,
        (p.wal_bytes / 1024)::bigint AS wal_kb,
        regexp_replace({{pgss_query_len_fn}}, '\s+', ' ', 'g') AS query
    FROM {{pgss_schema}}.pg_stat_statements p
    JOIN pg_roles a ON a.oid = p.userid
    JOIN pg_database d ON d.oid = p.dbid
    ORDER BY 1
"#;

pub const STATEMENTS_13: &str = r#"
    SELECT
        left(md5(p.userid::text || p.dbid::text || p.queryid::text), 10) AS queryid,
        a.rolname AS user,
        d.datname AS database,
        p.calls,
        p.rows,
        round((p.total_plan_time + p.total_exec_time)::numeric, 2) AS total_t,
        round(p.total_plan_time::numeric, 2) AS plan_t,
        round(p.total_exec_time::numeric, 2) AS exec_t,
        round((p.blk_read_time + p.blk_write_time)::numeric, 2) AS io_t,
        p.shared_blks_hit + p.local_blks_hit AS hits,
        p.shared_blks_read + p.local_blks_read AS reads,
        p.shared_blks_dirtied + p.local_blks_dirtied AS dirtied,
        p.shared_blks_written + p.local_blks_written AS written,
        (p.wal_bytes / 1024)::bigint AS wal_kb,
        regexp_replace({{pgss_query_len_fn}}, '\s+', ' ', 'g') AS query
    FROM {{pgss_schema}}.pg_stat_statements p
    JOIN pg_roles a ON a.oid = p.userid
    JOIN pg_database d ON d.oid = p.dbid
    ORDER BY 1
"#;

/// Before 13 there is no planning time and no WAL usage.
pub const STATEMENTS_LEGACY: &str = r#"
    SELECT
        left(md5(p.userid::text || p.dbid::text || p.queryid::text), 10) AS queryid,
        a.rolname AS user,
        d.datname AS database,
        p.calls,
        p.rows,
        round(p.total_time::numeric, 2) AS total_t,
        round((p.blk_read_time + p.blk_write_time)::numeric, 2) AS io_t,
        p.shared_blks_hit + p.local_blks_hit AS hits,
        p.shared_blks_read + p.local_blks_read AS reads,
        p.shared_blks_dirtied + p.local_blks_dirtied AS dirtied,
        p.shared_blks_written + p.local_blks_written AS written,
        regexp_replace({{pgss_query_len_fn}}, '\s+', ' ', 'g') AS query
    FROM {{pgss_schema}}.pg_stat_statements p
    JOIN pg_roles a ON a.oid = p.userid
    JOIN pg_database d ON d.oid = p.dbid
    ORDER BY 1
"#;

pub const PROGRESS_VACUUM: &str = r#"
    SELECT
        v.pid,
        date_trunc('seconds', clock_timestamp() - p.xact_start)::text AS xact_age,
        v.datname,
        v.relid::regclass::text AS relation,
        p.state,
        v.phase,
        v.heap_blks_total * current_setting('block_size')::bigint / 1024 AS total_kb,
        v.heap_blks_scanned * current_setting('block_size')::bigint / 1024 AS scanned_kb,
        v.heap_blks_vacuumed * current_setting('block_size')::bigint / 1024 AS vacuumed_kb,
        v.index_vacuum_count AS idx_vacuums,
        p.wait_event_type || '.' || p.wait_event AS wait,
        regexp_replace({{pgss_query_len_fn}}, '\s+', ' ', 'g') AS query
    FROM pg_stat_progress_vacuum v
    JOIN pg_stat_activity p ON p.pid = v.pid
    ORDER BY v.pid DESC
"#;

pub const CANCEL_BACKEND: &str = "SELECT pg_cancel_backend($1)";

pub const TERMINATE_BACKEND: &str = "SELECT pg_terminate_backend($1)";

pub const CANCEL_GROUP: &str = r#"
    SELECT count(pg_cancel_backend(pid))
    FROM pg_stat_activity
    WHERE {{backend_state}}
        AND ((clock_timestamp() - xact_start) > '{{query_age_thresh}}'::interval
            OR (clock_timestamp() - query_start) > '{{query_age_thresh}}'::interval)
        AND pid <> pg_backend_pid()
"#;

pub const TERMINATE_GROUP: &str = r#"
    SELECT count(pg_terminate_backend(pid))
    FROM pg_stat_activity
    WHERE {{backend_state}}
        AND ((clock_timestamp() - xact_start) > '{{query_age_thresh}}'::interval
            OR (clock_timestamp() - query_start) > '{{query_age_thresh}}'::interval)
        AND pid <> pg_backend_pid()
"#;
