//! Connection/endpoint registry: a keyed cache of live transport handles
//! scoped to exactly one virtual user. A registry is never shared across VU
//! tasks, so — unlike [`crate::session::SessionStore`] or
//! [`crate::metrics::MetricsAggregator`] — it needs no internal locking; it is
//! owned outright by the task that drives one VU's operation loop.

use std::collections::HashMap;
use std::time::Instant;

use tokio::net::{TcpStream, UdpSocket};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::RmeterError;

/// `(protocol_kind, endpoint_key)` — `endpoint_key` is `host:port` for
/// TCP/UDP/MQTT, the canonical connection string for DB, the URL for WS.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    pub protocol: &'static str,
    pub endpoint: String,
}

impl RegistryKey {
    pub fn new(protocol: &'static str, endpoint: impl Into<String>) -> Self {
        RegistryKey { protocol, endpoint: endpoint.into() }
    }
}

/// A live MQTT connection: the async client handle plus the background task
/// driving its event loop, which is aborted when the handle is dropped.
pub struct MqttHandle {
    pub client: rumqttc::AsyncClient,
    pub event_loop_task: tokio::task::JoinHandle<()>,
}

impl Drop for MqttHandle {
    fn drop(&mut self) {
        self.event_loop_task.abort();
    }
}

/// A simulated database connection: the core never opens a live backend, so
/// the handle is just the resolved kind and connection string needed to keep
/// simulating consistently.
pub struct DbHandle {
    pub conn_string: String,
    pub kind: crate::operation::DbKind,
}

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Any one of the live transport handles a driver may park in the registry.
pub enum ConnectionHandle {
    Tcp(TcpStream),
    Udp(UdpSocket),
    Ws(WsStream),
    Mqtt(MqttHandle),
    Db(DbHandle),
}

struct RegistryEntry {
    handle: ConnectionHandle,
    #[allow(dead_code)]
    last_used: Instant,
}

/// Per-VU keyed cache of live transport handles. See module docs for why this
/// type is not `Send`-shared and needs no lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: HashMap<RegistryKey, RegistryEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a live handle under `key`.
    pub fn insert(&mut self, key: RegistryKey, handle: ConnectionHandle) {
        self.entries.insert(key, RegistryEntry { handle, last_used: Instant::now() });
    }

    /// Remove and return the handle under `key`, if any has been established
    /// (a prior `*Connect`/`*CreateEndpoint` operation succeeded).
    pub fn take(&mut self, key: &RegistryKey) -> Option<ConnectionHandle> {
        self.entries.remove(key).map(|e| e.handle)
    }

    /// Whether a live handle exists under `key` without consuming it.
    pub fn contains(&self, key: &RegistryKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove the handle under `key`, dropping (and thereby closing) it.
    pub fn remove(&mut self, key: &RegistryKey) {
        self.entries.remove(key);
    }

    /// Close every open handle. Called on VU teardown (test end, cancellation,
    /// or a fatal per-VU error) so nothing leaks on any exit path.
    pub fn close_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Helper shared by the TCP/UDP drivers: look up a required connection and
/// turn a miss into the protocol-appropriate structured error.
pub fn require_tcp(
    registry: &mut ConnectionRegistry,
    key: &RegistryKey,
) -> Result<TcpStream, RmeterError> {
    match registry.take(key) {
        Some(ConnectionHandle::Tcp(stream)) => Ok(stream),
        Some(other) => {
            registry.insert(key.clone(), other);
            Err(RmeterError::ProtocolError("handle type mismatch for tcp key".to_string()))
        }
        None => Err(RmeterError::NoConnection(key.endpoint.clone())),
    }
}

pub fn require_udp(
    registry: &mut ConnectionRegistry,
    key: &RegistryKey,
) -> Result<UdpSocket, RmeterError> {
    match registry.take(key) {
        Some(ConnectionHandle::Udp(socket)) => Ok(socket),
        Some(other) => {
            registry.insert(key.clone(), other);
            Err(RmeterError::ProtocolError("handle type mismatch for udp key".to_string()))
        }
        None => Err(RmeterError::NoEndpoint(key.endpoint.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::DbKind;

    #[test]
    fn registry_key_equality_by_protocol_and_endpoint() {
        let a = RegistryKey::new("tcp", "localhost:9000");
        let b = RegistryKey::new("tcp", "localhost:9000");
        let c = RegistryKey::new("udp", "localhost:9000");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn insert_then_take_round_trips_db_handle() {
        let mut registry = ConnectionRegistry::new();
        let key = RegistryKey::new("db", "postgresql://localhost/test");
        registry.insert(
            key.clone(),
            ConnectionHandle::Db(DbHandle {
                conn_string: key.endpoint.clone(),
                kind: DbKind::PostgreSql,
            }),
        );
        assert!(registry.contains(&key));
        let handle = registry.take(&key);
        assert!(handle.is_some());
        assert!(!registry.contains(&key));
    }

    #[test]
    fn take_missing_key_returns_none() {
        let mut registry = ConnectionRegistry::new();
        let key = RegistryKey::new("tcp", "localhost:1");
        assert!(registry.take(&key).is_none());
    }

    #[test]
    fn require_tcp_without_connect_yields_no_connection() {
        let mut registry = ConnectionRegistry::new();
        let key = RegistryKey::new("tcp", "localhost:9000");
        let err = require_tcp(&mut registry, &key).unwrap_err();
        assert_eq!(err.category(), "no_connection");
    }

    #[test]
    fn require_udp_without_create_yields_no_endpoint() {
        let mut registry = ConnectionRegistry::new();
        let key = RegistryKey::new("udp", "localhost:9001");
        let err = require_udp(&mut registry, &key).unwrap_err();
        assert_eq!(err.category(), "no_endpoint");
    }

    #[test]
    fn close_all_empties_registry() {
        let mut registry = ConnectionRegistry::new();
        let key = RegistryKey::new("db", "mysql://localhost/test");
        registry.insert(
            key.clone(),
            ConnectionHandle::Db(DbHandle { conn_string: key.endpoint.clone(), kind: DbKind::MySql }),
        );
        assert_eq!(registry.len(), 1);
        registry.close_all();
        assert!(registry.is_empty());
    }
}
