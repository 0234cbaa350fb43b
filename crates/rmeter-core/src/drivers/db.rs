//! DB driver: no live backend is ever opened (nothing in this system needs a
//! real MySQL/PostgreSQL/MongoDB instance to produce load-shaped results), so
//! this is a deterministic simulator keyed off the query shape. `DbConnect`
//! still goes through the registry like every other protocol, so a scenario
//! that queries before connecting fails the same way a TCP send before
//! connect does.

use std::time::Instant;

use crate::operation::{DbKind, Operation, Outcome};
use crate::registry::{ConnectionHandle, ConnectionRegistry, DbHandle, RegistryKey};

fn key(conn_string: &str) -> RegistryKey {
    RegistryKey::new("db", conn_string.to_string())
}

pub async fn execute(op: &Operation, registry: &mut ConnectionRegistry) -> Outcome {
    match op {
        Operation::DbConnect { conn_string, db_kind, .. } => connect(conn_string, *db_kind, registry),
        Operation::DbQuery { conn_string, query, .. } => query(conn_string, query, registry),
        Operation::DbDisconnect { conn_string } => disconnect(conn_string, registry),
        _ => Outcome::failure(0, "internal", "db driver received a non-db operation"),
    }
}

fn connect(conn_string: &str, db_kind: Option<DbKind>, registry: &mut ConnectionRegistry) -> Outcome {
    let kind = match db_kind.or_else(|| DbKind::detect(conn_string)) {
        Some(k) => k,
        None => return Outcome::failure(0, "invalid_input", format!("cannot detect db kind from {conn_string}")),
    };

    let start = Instant::now();
    registry.insert(key(conn_string), ConnectionHandle::Db(DbHandle { conn_string: conn_string.to_string(), kind }));

    Outcome {
        success: true,
        status_code: 0,
        response_time_us: start.elapsed().as_micros() as u64,
        body: String::new(),
        headers: Default::default(),
        error: None,
        protocol_data: None,
    }
}

fn query(conn_string: &str, sql: &str, registry: &mut ConnectionRegistry) -> Outcome {
    let handle = match registry.take(&key(conn_string)) {
        Some(ConnectionHandle::Db(handle)) => handle,
        Some(other) => {
            registry.insert(key(conn_string), other);
            return Outcome::failure(0, "protocol_error", "handle type mismatch for db key");
        }
        None => return Outcome::failure(0, "no_connection", conn_string.to_string()),
    };

    let start = Instant::now();
    let (rows_returned, rows_affected) = simulate_query(sql);
    let response_time_us = simulated_latency_us(sql, start);

    let protocol_data = serde_json::json!({
        "db_kind": handle.kind,
        "rows_returned": rows_returned,
        "rows_affected": rows_affected,
    });

    registry.insert(key(conn_string), ConnectionHandle::Db(handle));

    Outcome {
        success: true,
        status_code: 0,
        response_time_us,
        body: String::new(),
        headers: Default::default(),
        error: None,
        protocol_data: Some(protocol_data),
    }
}

fn disconnect(conn_string: &str, registry: &mut ConnectionRegistry) -> Outcome {
    registry.remove(&key(conn_string));
    Outcome {
        success: true,
        status_code: 0,
        response_time_us: 0,
        body: String::new(),
        headers: Default::default(),
        error: None,
        protocol_data: None,
    }
}

/// Row counts derived from the query's shape rather than any real data: a
/// read statement simulates a handful of returned rows scaled by the query's
/// length, a write statement simulates a single affected row.
fn simulate_query(sql: &str) -> (u64, u64) {
    let normalized = sql.trim_start().to_ascii_uppercase();
    if normalized.starts_with("SELECT") {
        (1 + (sql.len() as u64 % 20), 0)
    } else if normalized.starts_with("INSERT") || normalized.starts_with("UPDATE") || normalized.starts_with("DELETE")
    {
        (0, 1)
    } else {
        (0, 0)
    }
}

/// A small, deterministic per-query latency so repeated runs of the same
/// scenario produce comparable (not identical, since `elapsed` still moves)
/// numbers: the simulated floor scales with query length, the measured floor
/// captures whatever real work happened building the outcome.
fn simulated_latency_us(sql: &str, start: Instant) -> u64 {
    let floor_us = 200 + (sql.len() as u64 * 5);
    floor_us.max(start.elapsed().as_micros() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_without_connect_yields_no_connection() {
        let mut registry = ConnectionRegistry::new();
        let outcome = query("postgresql://localhost/test", "SELECT 1", &mut registry);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("no_connection"));
    }

    #[test]
    fn connect_detects_kind_from_scheme() {
        let mut registry = ConnectionRegistry::new();
        let outcome = connect("mysql://localhost/test", None, &mut registry);
        assert!(outcome.success);
        assert!(registry.contains(&key("mysql://localhost/test")));
    }

    #[test]
    fn connect_fails_on_unrecognized_scheme() {
        let mut registry = ConnectionRegistry::new();
        let outcome = connect("redis://localhost", None, &mut registry);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("invalid_input"));
    }

    #[test]
    fn select_simulates_returned_rows_not_affected() {
        let (returned, affected) = simulate_query("SELECT * FROM users");
        assert!(returned > 0);
        assert_eq!(affected, 0);
    }

    #[test]
    fn insert_simulates_one_affected_row() {
        let (returned, affected) = simulate_query("INSERT INTO users (id) VALUES (1)");
        assert_eq!(returned, 0);
        assert_eq!(affected, 1);
    }

    #[test]
    fn connect_then_query_round_trips_protocol_data() {
        let mut registry = ConnectionRegistry::new();
        let conn = "postgresql://localhost/test";
        assert!(connect(conn, None, &mut registry).success);
        let outcome = query(conn, "SELECT * FROM accounts", &mut registry);
        assert!(outcome.success);
        let data = outcome.protocol_data.unwrap();
        assert_eq!(data["db_kind"], "postgre_sql");
    }
}
