//! Logical-cluster schema propagation
//!
//! When a new physical cluster joins a logical cluster it needs the tables
//! the other members already serve. The schema is read from a live member,
//! rewritten for the new cluster's name and replication mode, and replayed
//! on the new cluster with `ON CLUSTER` DDL.

use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::{first_available_host, ClickHouseConnection, ClickHouseConnector, ConnectOptions, Row};
use crate::error::{CkmanError, Result};
use crate::types::{ClickHouseConfig, DEFAULT_DATABASE};

/// ZooKeeper path used when a plain MergeTree becomes replicated
const REPLICATED_ZK_PATH: &str = "'/clickhouse/tables/{cluster}/{database}/{table}/{shard}'";
const REPLICATED_NAME: &str = "'{replica}'";

const DISTRIBUTED_TABLES_QUERY: &str = "SELECT database, name, create_table_query, engine_full \
    FROM system.tables \
    WHERE engine = 'Distributed' \
    AND database NOT IN ('system', 'INFORMATION_SCHEMA', 'information_schema') \
    ORDER BY database, name";

/// DDL for one database, in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicSchema {
    pub database: String,
    pub statements: Vec<String>,
}

fn create_table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^\s*CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?([^\s(]+)(.*)$")
            .expect("valid create table pattern")
    })
}

fn engine_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"ENGINE\s*=\s*(\w+)").expect("valid engine pattern"))
}

/// Turn `CREATE TABLE db.t ...` into `CREATE TABLE IF NOT EXISTS db.t ON CLUSTER c ...`
pub fn with_on_cluster(query: &str, cluster: &str) -> Result<String> {
    let caps = create_table_re()
        .captures(query)
        .ok_or_else(|| CkmanError::clickhouse(format!("unsupported table definition: {}", query)))?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ON CLUSTER `{}`{}",
        &caps[1], cluster, &caps[2]
    ))
}

/// Convert a MergeTree family engine to or from its Replicated variant
pub fn rewrite_engine(query: &str, replicated: bool) -> Result<String> {
    let Some(caps) = engine_re().captures(query) else {
        return Ok(query.to_string());
    };
    let name_match = caps.get(1).map(|m| (m.start(), m.end(), m.as_str().to_string()));
    let Some((start, name_end, name)) = name_match else {
        return Ok(query.to_string());
    };
    if !name.ends_with("MergeTree") {
        return Ok(query.to_string());
    }
    let is_replicated = name.starts_with("Replicated");
    if is_replicated == replicated {
        return Ok(query.to_string());
    }

    let (args, end) = if query[name_end..].starts_with('(') {
        let close = matching_paren(query, name_end)
            .ok_or_else(|| CkmanError::clickhouse(format!("unbalanced engine arguments: {}", query)))?;
        (split_args(&query[name_end + 1..close]), close + 1)
    } else {
        (Vec::new(), name_end)
    };

    let engine = if replicated {
        let mut new_args = vec![REPLICATED_ZK_PATH.to_string(), REPLICATED_NAME.to_string()];
        new_args.extend(args);
        format!("Replicated{}({})", name, new_args.join(", "))
    } else {
        let rest: Vec<String> = args.into_iter().skip(2).collect();
        format!("{}({})", &name["Replicated".len()..], rest.join(", "))
    };
    Ok(format!("{}{}{}", &query[..start], engine, &query[end..]))
}

/// Index of the ')' closing the '(' at `open`, skipping quoted text
fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s[open..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '`' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split engine arguments on top-level commas
fn split_args(s: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in s.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '`' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    args
}

fn unquote(arg: &str) -> &str {
    let arg = arg.trim();
    for q in ['\'', '`', '"'] {
        if let Some(inner) = arg.strip_prefix(q).and_then(|a| a.strip_suffix(q)) {
            return inner;
        }
    }
    arg
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// `(cluster, database, table)` referenced by a `Distributed(...)` engine
fn distributed_target(engine_full: &str) -> Option<(String, String, String)> {
    let open = engine_full.find("Distributed(")? + "Distributed".len();
    let close = matching_paren(engine_full, open)?;
    let args = split_args(&engine_full[open + 1..close]);
    if args.len() < 3 {
        return None;
    }
    Some((
        unquote(&args[0]).to_string(),
        unquote(&args[1]).to_string(),
        unquote(&args[2]).to_string(),
    ))
}

fn column<'a>(row: &'a Row, name: &str) -> Result<&'a str> {
    row.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| CkmanError::clickhouse(format!("missing column {} in system.tables", name)))
}

fn database_statements<'a>(
    schemas: &'a mut BTreeMap<String, Vec<String>>,
    database: &str,
    cluster: &str,
) -> &'a mut Vec<String> {
    schemas.entry(database.to_string()).or_insert_with(|| {
        vec![format!("CREATE DATABASE IF NOT EXISTS `{}` ON CLUSTER `{}`", database, cluster)]
    })
}

/// Read the schema served under `logic` and rewrite it for `cluster`
pub async fn get_logic_schema(
    conn: &dyn ClickHouseConnection,
    logic: &str,
    cluster: &str,
    replicated: bool,
) -> Result<Vec<LogicSchema>> {
    let mut schemas: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut locals_seen = HashSet::new();

    // locals are pushed while scanning, distributed tables afterwards, so
    // within a database every local table precedes the tables over it
    let mut distributed = Vec::new();
    for row in conn.query(DISTRIBUTED_TABLES_QUERY).await? {
        let database = column(&row, "database")?;
        let name = column(&row, "name")?;
        let Some((target, local_db, local_table)) = distributed_target(column(&row, "engine_full")?) else {
            continue;
        };
        if target != logic {
            continue;
        }
        debug!("logic table {}.{} -> {}.{}", database, name, local_db, local_table);

        if locals_seen.insert((local_db.clone(), local_table.clone())) {
            let rows = conn
                .query(&format!(
                    "SELECT create_table_query FROM system.tables WHERE database = {} AND name = {}",
                    quote_literal(&local_db),
                    quote_literal(&local_table)
                ))
                .await?;
            let local = rows.first().ok_or_else(|| {
                CkmanError::clickhouse(format!("local table {}.{} not found", local_db, local_table))
            })?;
            let ddl = with_on_cluster(&rewrite_engine(column(local, "create_table_query")?, replicated)?, cluster)?;
            database_statements(&mut schemas, &local_db, cluster).push(ddl);
        }
        distributed.push((database.to_string(), with_on_cluster(column(&row, "create_table_query")?, cluster)?));
    }

    for (database, ddl) in distributed {
        database_statements(&mut schemas, &database, cluster).push(ddl);
    }

    Ok(schemas
        .into_iter()
        .map(|(database, statements)| LogicSchema { database, statements })
        .collect())
}

/// Copy the logical-cluster schema from `src` onto `dst`.
///
/// Best effort: returns false on the first problem, leaving any statements
/// already applied in place. All statements are `IF NOT EXISTS`, so a later
/// retry can resume.
pub async fn propagate_schema(
    src: &ClickHouseConfig,
    dst: &ClickHouseConfig,
    logic: &str,
    connector: &dyn ClickHouseConnector,
) -> bool {
    let Some(src_host) = first_available_host(src, connector).await else {
        warn!("cluster {} all nodes are unavailable", src.cluster);
        return false;
    };
    let src_conn = match connector
        .connect(&ConnectOptions::for_host(src, &src_host, DEFAULT_DATABASE))
        .await
    {
        Ok(conn) => conn,
        Err(e) => {
            warn!("connect {} failed: {}", src_host, e);
            return false;
        }
    };
    let schemas = match get_logic_schema(src_conn.as_ref(), logic, &dst.cluster, dst.is_replica).await {
        Ok(schemas) => schemas,
        Err(e) => {
            warn!("get logic schema from {} failed: {}", src.cluster, e);
            return false;
        }
    };

    let Some(dst_host) = dst.hosts.first() else {
        warn!("cluster {} has no hosts", dst.cluster);
        return false;
    };
    let dst_conn = match connector
        .connect(&ConnectOptions::for_host(dst, dst_host, DEFAULT_DATABASE))
        .await
    {
        Ok(conn) => conn,
        Err(e) => {
            warn!("can't connect {}: {}", dst_host, e);
            return false;
        }
    };

    for schema in &schemas {
        for statement in &schema.statements {
            debug!("{}", statement);
            if let Err(e) = dst_conn.execute(statement).await {
                warn!("execute sql on {} failed: {}", dst_host, e);
                return false;
            }
        }
    }
    info!(
        "logic schema of {} copied from {} to {} ({} databases)",
        logic,
        src.cluster,
        dst.cluster,
        schemas.len()
    );
    true
}
