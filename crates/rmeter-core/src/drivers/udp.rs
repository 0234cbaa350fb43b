//! UDP driver: datagram create/send/receive/close against the registry. A
//! "connect" for UDP means binding an ephemeral local socket and calling
//! `connect()` on it so subsequent `send`/`recv` don't need the peer address
//! repeated, mirroring how a fire-and-forget load generator would drive it.

use std::time::Instant;

use tokio::net::UdpSocket;

use crate::operation::{Operation, Outcome};
use crate::registry::{require_udp, ConnectionHandle, ConnectionRegistry, RegistryKey};

const RECEIVE_BUFFER_SIZE: usize = 64 * 1024;

fn key(host: &str, port: u16) -> RegistryKey {
    RegistryKey::new("udp", format!("{host}:{port}"))
}

pub async fn execute(op: &Operation, registry: &mut ConnectionRegistry) -> Outcome {
    match op {
        Operation::UdpCreateEndpoint { host, port, .. } => create_endpoint(host, *port, registry).await,
        Operation::UdpSend { host, port, data, .. } => send(host, *port, data, registry).await,
        Operation::UdpReceive { host, port, .. } => receive(host, *port, registry).await,
        Operation::UdpCloseEndpoint { host, port } => close_endpoint(host, *port, registry),
        _ => Outcome::failure(0, "internal", "udp driver received a non-udp operation"),
    }
}

async fn create_endpoint(host: &str, port: u16, registry: &mut ConnectionRegistry) -> Outcome {
    let start = Instant::now();
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(s) => s,
        Err(e) => return Outcome::failure(0, categorize_io_error(&e), e.to_string()),
    };
    if let Err(e) = socket.connect((host, port)).await {
        return Outcome::failure(0, categorize_io_error(&e), e.to_string());
    }

    registry.insert(key(host, port), ConnectionHandle::Udp(socket));
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

async fn send(host: &str, port: u16, data: &str, registry: &mut ConnectionRegistry) -> Outcome {
    let socket = match require_udp(registry, &key(host, port)) {
        Ok(s) => s,
        Err(e) => return Outcome::failure(0, e.category(), e.to_string()),
    };

    let start = Instant::now();
    let result = socket.send(data.as_bytes()).await;
    let response_time_us = start.elapsed().as_micros() as u64;
    registry.insert(key(host, port), ConnectionHandle::Udp(socket));

    match result {
        Ok(_) => Outcome {
            success: true,
            status_code: 0,
            response_time_us,
            body: String::new(),
            headers: Default::default(),
            error: None,
            protocol_data: None,
        },
        Err(e) => Outcome::failure(0, categorize_io_error(&e), e.to_string()),
    }
}

async fn receive(host: &str, port: u16, registry: &mut ConnectionRegistry) -> Outcome {
    let socket = match require_udp(registry, &key(host, port)) {
        Ok(s) => s,
        Err(e) => return Outcome::failure(0, e.category(), e.to_string()),
    };

    let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
    let start = Instant::now();
    let result = socket.recv(&mut buf).await;
    let response_time_us = start.elapsed().as_micros() as u64;
    registry.insert(key(host, port), ConnectionHandle::Udp(socket));

    match result {
        Ok(n) => Outcome {
            success: true,
            status_code: 0,
            response_time_us,
            body: String::from_utf8_lossy(&buf[..n]).into_owned(),
            headers: Default::default(),
            error: None,
            protocol_data: None,
        },
        Err(e) => Outcome::failure(0, categorize_io_error(&e), e.to_string()),
    }
}

fn close_endpoint(host: &str, port: u16, registry: &mut ConnectionRegistry) -> Outcome {
    registry.remove(&key(host, port));
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

fn categorize_io_error(err: &std::io::Error) -> &'static str {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionRefused => "connection_refused",
        ErrorKind::TimedOut => "timeout",
        _ => "protocol_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_endpoint_succeeds_against_a_routable_host() {
        let mut registry = ConnectionRegistry::new();
        let outcome = create_endpoint("127.0.0.1", 9999, &mut registry).await;
        assert!(outcome.success);
        assert!(registry.contains(&key("127.0.0.1", 9999)));
    }

    #[tokio::test]
    async fn send_without_create_yields_no_endpoint() {
        let mut registry = ConnectionRegistry::new();
        let outcome = send("127.0.0.1", 9999, "ping", &mut registry).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("no_endpoint"));
    }

    #[tokio::test]
    async fn receive_without_create_yields_no_endpoint() {
        let mut registry = ConnectionRegistry::new();
        let outcome = receive("127.0.0.1", 9999, &mut registry).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("no_endpoint"));
    }

    #[test]
    fn close_endpoint_is_idempotent_on_an_absent_entry() {
        let mut registry = ConnectionRegistry::new();
        let outcome = close_endpoint("127.0.0.1", 9999, &mut registry);
        assert!(outcome.success);
    }
}
