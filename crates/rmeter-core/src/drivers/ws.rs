//! WebSocket driver. Splits `http/websocket.rs`'s whole-scenario
//! `execute_websocket_scenario` into three registry-backed operations —
//! connect, send (which also awaits the next incoming frame, mirroring a
//! request/response RPC-style exchange), and close — so a scenario can
//! interleave WS operations with other protocols.

use std::time::Instant;

use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async_tls_with_config;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::http::Request as WsHttpRequest;
use tokio_tungstenite::tungstenite::Message;

use crate::operation::{Operation, Outcome};
use crate::registry::{ConnectionHandle, RegistryKey};
use crate::registry::ConnectionRegistry;

fn key(url: &str) -> RegistryKey {
    RegistryKey::new("ws", url.to_string())
}

pub async fn execute(op: &Operation, registry: &mut ConnectionRegistry) -> Outcome {
    match op {
        Operation::WsConnect { url, headers, .. } => connect(url, headers, registry).await,
        Operation::WsSend { url, message, .. } => send(url, message, registry).await,
        Operation::WsClose { url } => close(url, registry).await,
        _ => Outcome::failure(0, "internal", "ws driver received a non-ws operation"),
    }
}

async fn connect(
    url: &str,
    headers: &std::collections::HashMap<String, String>,
    registry: &mut ConnectionRegistry,
) -> Outcome {
    let request = match build_ws_request(url, headers) {
        Ok(r) => r,
        Err(e) => return Outcome::failure(0, "invalid_input", e),
    };

    let start = Instant::now();
    match connect_async_tls_with_config(request, None, false, None).await {
        Ok((stream, response)) => {
            registry.insert(key(url), ConnectionHandle::Ws(stream));
            Outcome {
                success: true,
                status_code: response.status().as_u16() as i32,
                response_time_us: start.elapsed().as_micros() as u64,
                body: String::new(),
                headers: Default::default(),
                error: None,
                protocol_data: None,
            }
        }
        Err(e) => Outcome::failure(0, "connection_refused", e.to_string()),
    }
}

async fn send(url: &str, message: &str, registry: &mut ConnectionRegistry) -> Outcome {
    let handle = match registry.take(&key(url)) {
        Some(ConnectionHandle::Ws(stream)) => stream,
        Some(other) => {
            registry.insert(key(url), other);
            return Outcome::failure(0, "protocol_error", "handle type mismatch for ws key");
        }
        None => return Outcome::failure(0, "no_connection", url.to_string()),
    };

    let (mut sink, mut stream) = handle.split();
    let start = Instant::now();

    if let Err(e) = sink.send(Message::Text(message.to_string())).await {
        return Outcome::failure(0, "connection_lost", e.to_string());
    }

    let reply = match stream.next().await {
        Some(Ok(Message::Text(t))) => t,
        Some(Ok(Message::Binary(b))) => base64::engine::general_purpose::STANDARD.encode(&b),
        Some(Ok(_)) => String::new(),
        Some(Err(e)) => return Outcome::failure(0, "connection_lost", e.to_string()),
        None => return Outcome::failure(0, "connection_lost", "stream closed before a reply arrived"),
    };

    let response_time_us = start.elapsed().as_micros() as u64;
    let rejoined = sink.reunite(stream).expect("sink/stream split from the same stream always reunites");
    registry.insert(key(url), ConnectionHandle::Ws(rejoined));

    Outcome { success: true, status_code: 0, response_time_us, body: reply, headers: Default::default(), error: None, protocol_data: None }
}

async fn close(url: &str, registry: &mut ConnectionRegistry) -> Outcome {
    let handle = match registry.take(&key(url)) {
        Some(ConnectionHandle::Ws(stream)) => stream,
        Some(other) => {
            registry.insert(key(url), other);
            return Outcome::failure(0, "protocol_error", "handle type mismatch for ws key");
        }
        None => return Outcome::failure(0, "no_connection", url.to_string()),
    };

    let start = Instant::now();
    let (mut sink, _stream) = handle.split();
    let result = sink.send(Message::Close(None)).await;
    let response_time_us = start.elapsed().as_micros() as u64;

    match result {
        Ok(()) => Outcome { success: true, status_code: 0, response_time_us, body: String::new(), headers: Default::default(), error: None, protocol_data: None },
        Err(e) => Outcome::failure(0, "connection_lost", e.to_string()),
    }
}

fn build_ws_request(
    url: &str,
    extra_headers: &std::collections::HashMap<String, String>,
) -> Result<WsHttpRequest<()>, String> {
    let mut builder = WsHttpRequest::builder()
        .method("GET")
        .uri(url)
        .header("Host", extract_host(url)?)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", generate_key());

    for (key, value) in extra_headers {
        builder = builder.header(key.as_str(), value.as_str());
    }

    builder.body(()).map_err(|e| e.to_string())
}

fn extract_host(url: &str) -> Result<String, String> {
    let after_scheme = url.strip_prefix("wss://").or_else(|| url.strip_prefix("ws://")).unwrap_or(url);
    let authority = after_scheme.split(['/', '?', '#']).next().unwrap_or(after_scheme);
    if authority.is_empty() {
        return Err(format!("cannot extract host from URL: {url}"));
    }
    Ok(authority.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_host_plain() {
        assert_eq!(extract_host("ws://example.com/chat").unwrap(), "example.com");
    }

    #[test]
    fn extract_host_tls_with_port() {
        assert_eq!(extract_host("wss://echo.example.com:443/ws").unwrap(), "echo.example.com:443");
    }

    #[tokio::test]
    async fn send_without_connect_yields_no_connection() {
        let mut registry = ConnectionRegistry::new();
        let outcome = send("ws://example.com/chat", "hi", &mut registry).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("no_connection"));
    }

    #[tokio::test]
    async fn close_without_connect_yields_no_connection() {
        let mut registry = ConnectionRegistry::new();
        let outcome = close("ws://example.com/chat", &mut registry).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("no_connection"));
    }
}
