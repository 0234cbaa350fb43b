//! TCP driver: raw-socket connect/send/receive/disconnect against the
//! registry. No higher-level framing is assumed — `data` is written and read
//! as bytes, matching a generic load-testing tool rather than any specific
//! wire protocol.

use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::operation::{Operation, Outcome};
use crate::registry::{require_tcp, ConnectionHandle, ConnectionRegistry, RegistryKey};

const RECEIVE_BUFFER_SIZE: usize = 64 * 1024;

fn key(host: &str, port: u16) -> RegistryKey {
    RegistryKey::new("tcp", format!("{host}:{port}"))
}

pub async fn execute(op: &Operation, registry: &mut ConnectionRegistry) -> Outcome {
    match op {
        Operation::TcpConnect { host, port, .. } => connect(host, *port, registry).await,
        Operation::TcpSend { host, port, data, .. } => send(host, *port, data, registry).await,
        Operation::TcpReceive { host, port, .. } => receive(host, *port, registry).await,
        Operation::TcpDisconnect { host, port } => disconnect(host, *port, registry),
        _ => Outcome::failure(0, "internal", "tcp driver received a non-tcp operation"),
    }
}

async fn connect(host: &str, port: u16, registry: &mut ConnectionRegistry) -> Outcome {
    let start = Instant::now();
    match TcpStream::connect((host, port)).await {
        Ok(stream) => {
            registry.insert(key(host, port), ConnectionHandle::Tcp(stream));
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
        Err(e) => Outcome::failure(0, categorize_io_error(&e), e.to_string()),
    }
}

async fn send(host: &str, port: u16, data: &str, registry: &mut ConnectionRegistry) -> Outcome {
    let mut stream = match require_tcp(registry, &key(host, port)) {
        Ok(s) => s,
        Err(e) => return Outcome::failure(0, e.category(), e.to_string()),
    };

    let start = Instant::now();
    let result = stream.write_all(data.as_bytes()).await;
    let response_time_us = start.elapsed().as_micros() as u64;
    registry.insert(key(host, port), ConnectionHandle::Tcp(stream));

    match result {
        Ok(()) => Outcome {
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
    let mut stream = match require_tcp(registry, &key(host, port)) {
        Ok(s) => s,
        Err(e) => return Outcome::failure(0, e.category(), e.to_string()),
    };

    let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
    let start = Instant::now();
    let result = stream.read(&mut buf).await;
    let response_time_us = start.elapsed().as_micros() as u64;
    registry.insert(key(host, port), ConnectionHandle::Tcp(stream));

    match result {
        Ok(0) => Outcome::failure(0, "connection_lost", "peer closed the connection"),
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

fn disconnect(host: &str, port: u16, registry: &mut ConnectionRegistry) -> Outcome {
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
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => "connection_lost",
        _ => "protocol_error",
    }
}
