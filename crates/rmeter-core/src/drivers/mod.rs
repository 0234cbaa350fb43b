//! Protocol drivers: one executor per protocol family, each turning an
//! [`Operation`] into an [`Outcome`] against a live (or, for the database
//! driver, simulated) backend. Every driver shares the same connect-once,
//! reuse-via-registry shape the HTTP and WebSocket request helpers established,
//! generalized across protocols.

pub mod db;
pub mod http;
pub mod mqtt;
pub mod tcp;
pub mod udp;
pub mod ws;

use tokio::time::Duration;

use crate::operation::{Operation, Outcome};
use crate::registry::ConnectionRegistry;

/// Everything a driver needs beyond the operation itself: the shared HTTP
/// client (connection-pooled across every VU) and this VU's own connection
/// registry (owned exclusively by the task executing `op`).
pub struct DriverContext<'a> {
    pub http: &'a reqwest::Client,
    pub registry: &'a mut ConnectionRegistry,
}

/// Execute one operation against the appropriate driver, racing it against
/// the operation's own timeout. A timeout never panics the VU — it becomes a
/// failed [`Outcome`] with the `timeout` error category, matching every other
/// driver failure path.
pub async fn execute(op: &Operation, ctx: &mut DriverContext<'_>) -> Outcome {
    let timeout_ms = op.timeout_ms();
    let fut = dispatch(op, ctx);
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(outcome) => outcome,
        Err(_) => Outcome::failure(0, "timeout", format!("operation timed out after {timeout_ms}ms")),
    }
}

async fn dispatch(op: &Operation, ctx: &mut DriverContext<'_>) -> Outcome {
    match op {
        Operation::HttpRequest { .. } => http::execute(op, ctx.http).await,

        Operation::WsConnect { .. } | Operation::WsSend { .. } | Operation::WsClose { .. } => {
            ws::execute(op, ctx.registry).await
        }

        Operation::TcpConnect { .. }
        | Operation::TcpSend { .. }
        | Operation::TcpReceive { .. }
        | Operation::TcpDisconnect { .. } => tcp::execute(op, ctx.registry).await,

        Operation::UdpCreateEndpoint { .. }
        | Operation::UdpSend { .. }
        | Operation::UdpReceive { .. }
        | Operation::UdpCloseEndpoint { .. } => udp::execute(op, ctx.registry).await,

        Operation::MqttConnect { .. }
        | Operation::MqttPublish { .. }
        | Operation::MqttSubscribe { .. }
        | Operation::MqttUnsubscribe { .. }
        | Operation::MqttDisconnect { .. } => mqtt::execute(op, ctx.registry).await,

        Operation::DbConnect { .. } | Operation::DbQuery { .. } | Operation::DbDisconnect { .. } => {
            db::execute(op, ctx.registry).await
        }
    }
}
