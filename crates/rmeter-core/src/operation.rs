//! The protocol-agnostic [`Operation`]/[`Outcome`] pair that every driver in
//! [`crate::drivers`] speaks. An `Operation` is immutable once produced by the
//! scenario compiler ([`crate::scenario`]); an `Outcome` is what comes back.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::plan::model::{HttpMethod, RequestBody};

/// Database backend kind, auto-detected from a connection-string scheme when
/// not given explicitly (`mysql://`, `postgresql://`, `mongodb://`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbKind {
    MySql,
    PostgreSql,
    MongoDb,
}

impl DbKind {
    /// Detect a [`DbKind`] from a connection-string scheme.
    pub fn detect(conn_string: &str) -> Option<Self> {
        if conn_string.starts_with("mysql://") {
            Some(DbKind::MySql)
        } else if conn_string.starts_with("postgresql://") || conn_string.starts_with("postgres://") {
            Some(DbKind::PostgreSql)
        } else if conn_string.starts_with("mongodb://") {
            Some(DbKind::MongoDb)
        } else {
            None
        }
    }
}

/// MQTT quality-of-service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MqttQos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// One atomic protocol action, tagged by kind. Immutable after compilation by
/// the scenario compiler. Every variant carries its own addressing
/// information (host/port, broker, connection string, or URL) so a driver can
/// compute a [`crate::registry::RegistryKey`] directly from the operation
/// without external context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    HttpRequest {
        url: String,
        method: HttpMethod,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<RequestBody>,
        timeout_ms: u64,
    },

    WsConnect {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        timeout_ms: u64,
    },
    WsSend {
        url: String,
        message: String,
        timeout_ms: u64,
    },
    WsClose {
        url: String,
    },

    TcpConnect {
        host: String,
        port: u16,
        timeout_ms: u64,
    },
    TcpSend {
        host: String,
        port: u16,
        data: String,
        timeout_ms: u64,
    },
    TcpReceive {
        host: String,
        port: u16,
        timeout_ms: u64,
    },
    TcpDisconnect {
        host: String,
        port: u16,
    },

    UdpCreateEndpoint {
        host: String,
        port: u16,
        timeout_ms: u64,
    },
    UdpSend {
        host: String,
        port: u16,
        data: String,
        timeout_ms: u64,
    },
    UdpReceive {
        host: String,
        port: u16,
        timeout_ms: u64,
    },
    UdpCloseEndpoint {
        host: String,
        port: u16,
    },

    MqttConnect {
        broker: String,
        port: u16,
        client_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(default = "default_keep_alive_secs")]
        keep_alive_secs: u16,
        timeout_ms: u64,
    },
    MqttPublish {
        broker: String,
        port: u16,
        client_id: String,
        topic: String,
        payload: String,
        qos: MqttQos,
        #[serde(default)]
        retain: bool,
        timeout_ms: u64,
    },
    MqttSubscribe {
        broker: String,
        port: u16,
        client_id: String,
        topic: String,
        qos: MqttQos,
        timeout_ms: u64,
    },
    MqttUnsubscribe {
        broker: String,
        port: u16,
        client_id: String,
        topic: String,
        timeout_ms: u64,
    },
    MqttDisconnect {
        broker: String,
        port: u16,
        client_id: String,
    },

    DbConnect {
        conn_string: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        db_kind: Option<DbKind>,
        timeout_ms: u64,
    },
    DbQuery {
        conn_string: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        db_kind: Option<DbKind>,
        query: String,
        timeout_ms: u64,
    },
    DbDisconnect {
        conn_string: String,
    },
}

fn default_keep_alive_secs() -> u16 {
    30
}

impl Operation {
    /// The timeout this operation's deadline is derived from. Teardown-only
    /// operations (`*Disconnect`/`*Close`) have no meaningful timeout; a
    /// generous default bounds them so a wedged close can't hang a VU forever.
    pub fn timeout_ms(&self) -> u64 {
        match self {
            Operation::HttpRequest { timeout_ms, .. }
            | Operation::WsConnect { timeout_ms, .. }
            | Operation::WsSend { timeout_ms, .. }
            | Operation::TcpConnect { timeout_ms, .. }
            | Operation::TcpSend { timeout_ms, .. }
            | Operation::TcpReceive { timeout_ms, .. }
            | Operation::UdpCreateEndpoint { timeout_ms, .. }
            | Operation::UdpSend { timeout_ms, .. }
            | Operation::UdpReceive { timeout_ms, .. }
            | Operation::MqttConnect { timeout_ms, .. }
            | Operation::MqttPublish { timeout_ms, .. }
            | Operation::MqttSubscribe { timeout_ms, .. }
            | Operation::MqttUnsubscribe { timeout_ms, .. }
            | Operation::DbConnect { timeout_ms, .. }
            | Operation::DbQuery { timeout_ms, .. } => *timeout_ms,
            Operation::WsClose { .. }
            | Operation::TcpDisconnect { .. }
            | Operation::UdpCloseEndpoint { .. }
            | Operation::MqttDisconnect { .. }
            | Operation::DbDisconnect { .. } => 5_000,
        }
    }

    /// A short machine-stable name for this operation's kind, used in logs and
    /// in `Outcome.protocol_data`.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Operation::HttpRequest { .. } => "http_request",
            Operation::WsConnect { .. } => "ws_connect",
            Operation::WsSend { .. } => "ws_send",
            Operation::WsClose { .. } => "ws_close",
            Operation::TcpConnect { .. } => "tcp_connect",
            Operation::TcpSend { .. } => "tcp_send",
            Operation::TcpReceive { .. } => "tcp_receive",
            Operation::TcpDisconnect { .. } => "tcp_disconnect",
            Operation::UdpCreateEndpoint { .. } => "udp_create_endpoint",
            Operation::UdpSend { .. } => "udp_send",
            Operation::UdpReceive { .. } => "udp_receive",
            Operation::UdpCloseEndpoint { .. } => "udp_close_endpoint",
            Operation::MqttConnect { .. } => "mqtt_connect",
            Operation::MqttPublish { .. } => "mqtt_publish",
            Operation::MqttSubscribe { .. } => "mqtt_subscribe",
            Operation::MqttUnsubscribe { .. } => "mqtt_unsubscribe",
            Operation::MqttDisconnect { .. } => "mqtt_disconnect",
            Operation::DbConnect { .. } => "db_connect",
            Operation::DbQuery { .. } => "db_query",
            Operation::DbDisconnect { .. } => "db_disconnect",
        }
    }
}

/// The structured result of executing one [`Operation`]. `response_time_us`
/// is the canonical stored duration; `response_time_ms` is always derived
/// from it at construction/read time, never stored independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Outcome {
    pub success: bool,
    pub status_code: i32,
    pub response_time_us: u64,
    pub body: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_data: Option<serde_json::Value>,
}

impl Outcome {
    /// Derived millisecond view of [`Self::response_time_us`]; never stored.
    pub fn response_time_ms(&self) -> f64 {
        self.response_time_us as f64 / 1000.0
    }

    pub fn failure(status_code: i32, error_category: &str, message: impl Into<String>) -> Self {
        Outcome {
            success: false,
            status_code,
            response_time_us: 0,
            body: String::new(),
            headers: HashMap::new(),
            error: Some(format!("{error_category}: {}", message.into())),
            protocol_data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_kind_detects_known_schemes() {
        assert_eq!(DbKind::detect("mysql://localhost/db"), Some(DbKind::MySql));
        assert_eq!(
            DbKind::detect("postgresql://localhost/db"),
            Some(DbKind::PostgreSql)
        );
        assert_eq!(DbKind::detect("mongodb://localhost/db"), Some(DbKind::MongoDb));
        assert_eq!(DbKind::detect("redis://localhost"), None);
    }

    #[test]
    fn response_time_ms_derives_from_us() {
        let outcome = Outcome {
            success: true,
            status_code: 200,
            response_time_us: 1500,
            body: String::new(),
            headers: HashMap::new(),
            error: None,
            protocol_data: None,
        };
        assert_eq!(outcome.response_time_ms(), 1.5);
    }

    #[test]
    fn timeout_ms_reads_the_right_field() {
        let op = Operation::TcpSend {
            host: "localhost".to_string(),
            port: 9000,
            data: "ping".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(op.timeout_ms(), 250);
    }

    #[test]
    fn disconnect_ops_have_a_default_timeout() {
        let op = Operation::TcpDisconnect {
            host: "localhost".to_string(),
            port: 9000,
        };
        assert_eq!(op.timeout_ms(), 5_000);
    }

    #[test]
    fn operation_tagged_serde_roundtrip() {
        let op = Operation::UdpSend {
            host: "localhost".to_string(),
            port: 9001,
            data: "hello".to_string(),
            timeout_ms: 1000,
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"type\":\"udp_send\""));
        let parsed: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind_name(), "udp_send");
    }

    #[test]
    fn failure_outcome_embeds_category_in_error() {
        let outcome = Outcome::failure(0, "timeout", "deadline exceeded");
        assert!(!outcome.success);
        assert_eq!(outcome.error.unwrap(), "timeout: deadline exceeded");
    }
}
