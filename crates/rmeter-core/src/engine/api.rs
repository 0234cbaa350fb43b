//! Engine: the crate's single entry point. Wraps the shared pieces every VU
//! needs — the pooled HTTP client, the metrics aggregator, the session store,
//! the data source manager — and exposes both one-off protocol calls and full
//! scheduled runs via [`crate::scheduler`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::data_source::DataSourceManager;
use crate::drivers::{self, DriverContext};
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::operation::{MqttQos, Operation, Outcome};
use crate::plan::model::{HttpMethod, RequestBody};
use crate::registry::ConnectionRegistry;
use crate::scenario::ScenarioTemplate;
use crate::scheduler::{self, RunContext};
use crate::session::SessionStore;

/// Default timeout for the protocol-specific convenience methods below, when
/// the caller has no per-call scenario timeout to plug in.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// The crate's top-level handle. Cheap to share: every field either is an
/// `Arc` already or lives behind one, so cloning an `Engine` (or wrapping it
/// in one more `Arc`) never duplicates the underlying pool, aggregator, or
/// session table.
pub struct Engine {
    max_connections: usize,
    /// Sized by the caller (typically the CLI binary) when building the
    /// tokio runtime this engine runs on; the engine itself never spawns a
    /// runtime, so this is metadata rather than an enforced cap.
    worker_threads: usize,
    http_client: Arc<reqwest::Client>,
    metrics: Arc<MetricsAggregator>,
    sessions: Arc<SessionStore>,
    data_manager: Arc<DataSourceManager>,
    /// Registry backing the ad-hoc protocol methods (`tcp_connect` and
    /// friends) called outside of a scheduled run, where there is no VU task
    /// to own one. A scheduled run never touches this; each of its VUs gets
    /// its own registry instead.
    ad_hoc_registry: AsyncMutex<ConnectionRegistry>,
}

impl Engine {
    pub fn new(max_connections: usize, worker_threads: usize) -> Self {
        Engine {
            max_connections,
            worker_threads,
            http_client: Arc::new(
                reqwest::Client::builder()
                    .redirect(reqwest::redirect::Policy::none())
                    .build()
                    .unwrap_or_default(),
            ),
            metrics: Arc::new(MetricsAggregator::new()),
            sessions: Arc::new(SessionStore::new()),
            data_manager: Arc::new(DataSourceManager::new()),
            ad_hoc_registry: AsyncMutex::new(ConnectionRegistry::new()),
        }
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn data_manager(&self) -> &Arc<DataSourceManager> {
        &self.data_manager
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// A single, unscheduled HTTP request. Recorded against this engine's
    /// metrics aggregator the same as every request inside a run.
    pub async fn execute_request(
        &self,
        url: &str,
        method: HttpMethod,
        headers: HashMap<String, String>,
        body: Option<RequestBody>,
        timeout_ms: u64,
    ) -> Outcome {
        let op = Operation::HttpRequest { url: url.to_string(), method, headers, body, timeout_ms };
        let outcome = drivers::http::execute(&op, &self.http_client).await;
        self.metrics.record(outcome.response_time_us, outcome.success, outcome.body.len() as u64);
        outcome
    }

    /// Run `template` as a scheduled load test: `users` active VUs ramping up
    /// linearly over `ramp_up_s` then held constant until `duration_s`
    /// elapses.
    pub async fn run_scenario(
        &self,
        template: ScenarioTemplate,
        users: u32,
        duration_s: u64,
        ramp_up_s: u64,
    ) -> MetricsSnapshot {
        let stages = scheduler::stages_from_simple(users, duration_s, ramp_up_s);
        self.run_stages(template, stages, HashMap::new()).await
    }

    /// Run `template` against an explicit `load_pattern` string (the
    /// `constant:`/`ramp:`/`spike:` grammar) instead of the simple triple.
    pub async fn run_scenario_with_pattern(
        &self,
        template: ScenarioTemplate,
        load_pattern: &str,
    ) -> Result<MetricsSnapshot, crate::error::RmeterError> {
        let stages = scheduler::parse_load_pattern(load_pattern)?;
        Ok(self.run_stages(template, stages, HashMap::new()).await)
    }

    async fn run_stages(
        &self,
        template: ScenarioTemplate,
        stages: Vec<scheduler::Stage>,
        scenario_variables: HashMap<String, String>,
    ) -> MetricsSnapshot {
        let ctx = RunContext {
            template: Arc::new(template),
            data_manager: Arc::clone(&self.data_manager),
            scenario_variables,
            http_client: Arc::clone(&self.http_client),
            metrics: Arc::clone(&self.metrics),
            sessions: Arc::clone(&self.sessions),
        };
        scheduler::run(stages, self.max_connections, ctx, CancellationToken::new()).await;
        self.metrics.snapshot()
    }

    /// Run a caller-supplied iteration body once per VU, `users` VUs deep,
    /// for `duration_s`. Each VU gets its own [`EngineVu`] handle wrapping a
    /// private connection registry; `f` is responsible for looping until the
    /// handle reports cancellation.
    pub async fn run_custom<F, Fut>(self: &Arc<Self>, f: F, users: u32, duration_s: u64) -> MetricsSnapshot
    where
        F: Fn(EngineVu, u64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(duration_s);
        let cancel = CancellationToken::new();
        let f = Arc::new(f);

        let mut vus = tokio::task::JoinSet::new();
        for vu_id in 0..users as u64 {
            let engine = Arc::clone(self);
            let cancel = cancel.clone();
            let f = Arc::clone(&f);
            vus.spawn(async move {
                let vu = EngineVu { engine, registry: ConnectionRegistry::new(), cancel, deadline };
                f(vu, vu_id).await;
            });
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = async { while vus.join_next().await.is_some() {} } => {}
        }
        cancel.cancel();
        while vus.join_next().await.is_some() {}

        self.metrics.snapshot()
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    async fn ad_hoc(&self, op: Operation) -> Outcome {
        let mut registry = self.ad_hoc_registry.lock().await;
        let mut ctx = DriverContext { http: self.http_client.as_ref(), registry: &mut *registry };
        let outcome = drivers::execute(&op, &mut ctx).await;
        self.metrics.record(outcome.response_time_us, outcome.success, outcome.body.len() as u64);
        outcome
    }

    pub async fn websocket_connect(&self, url: &str, headers: HashMap<String, String>) -> Outcome {
        self.ad_hoc(Operation::WsConnect { url: url.to_string(), headers, timeout_ms: DEFAULT_TIMEOUT_MS }).await
    }
    pub async fn websocket_send(&self, url: &str, message: &str) -> Outcome {
        self.ad_hoc(Operation::WsSend { url: url.to_string(), message: message.to_string(), timeout_ms: DEFAULT_TIMEOUT_MS })
            .await
    }
    pub async fn websocket_close(&self, url: &str) -> Outcome {
        self.ad_hoc(Operation::WsClose { url: url.to_string() }).await
    }

    pub async fn tcp_connect(&self, host: &str, port: u16) -> Outcome {
        self.ad_hoc(Operation::TcpConnect { host: host.to_string(), port, timeout_ms: DEFAULT_TIMEOUT_MS }).await
    }
    pub async fn tcp_send(&self, host: &str, port: u16, data: &str) -> Outcome {
        self.ad_hoc(Operation::TcpSend { host: host.to_string(), port, data: data.to_string(), timeout_ms: DEFAULT_TIMEOUT_MS })
            .await
    }
    pub async fn tcp_receive(&self, host: &str, port: u16) -> Outcome {
        self.ad_hoc(Operation::TcpReceive { host: host.to_string(), port, timeout_ms: DEFAULT_TIMEOUT_MS }).await
    }
    pub async fn tcp_disconnect(&self, host: &str, port: u16) -> Outcome {
        self.ad_hoc(Operation::TcpDisconnect { host: host.to_string(), port }).await
    }

    pub async fn udp_create_endpoint(&self, host: &str, port: u16) -> Outcome {
        self.ad_hoc(Operation::UdpCreateEndpoint { host: host.to_string(), port, timeout_ms: DEFAULT_TIMEOUT_MS }).await
    }
    pub async fn udp_send(&self, host: &str, port: u16, data: &str) -> Outcome {
        self.ad_hoc(Operation::UdpSend { host: host.to_string(), port, data: data.to_string(), timeout_ms: DEFAULT_TIMEOUT_MS })
            .await
    }
    pub async fn udp_receive(&self, host: &str, port: u16) -> Outcome {
        self.ad_hoc(Operation::UdpReceive { host: host.to_string(), port, timeout_ms: DEFAULT_TIMEOUT_MS }).await
    }
    pub async fn udp_close_endpoint(&self, host: &str, port: u16) -> Outcome {
        self.ad_hoc(Operation::UdpCloseEndpoint { host: host.to_string(), port }).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn mqtt_connect(
        &self,
        broker: &str,
        port: u16,
        client_id: &str,
        username: Option<String>,
        password: Option<String>,
        keep_alive_secs: u16,
    ) -> Outcome {
        self.ad_hoc(Operation::MqttConnect {
            broker: broker.to_string(),
            port,
            client_id: client_id.to_string(),
            username,
            password,
            keep_alive_secs,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        })
        .await
    }
    pub async fn mqtt_publish(
        &self,
        broker: &str,
        port: u16,
        client_id: &str,
        topic: &str,
        payload: &str,
        qos: MqttQos,
        retain: bool,
    ) -> Outcome {
        self.ad_hoc(Operation::MqttPublish {
            broker: broker.to_string(),
            port,
            client_id: client_id.to_string(),
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos,
            retain,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        })
        .await
    }
    pub async fn mqtt_subscribe(&self, broker: &str, port: u16, client_id: &str, topic: &str, qos: MqttQos) -> Outcome {
        self.ad_hoc(Operation::MqttSubscribe {
            broker: broker.to_string(),
            port,
            client_id: client_id.to_string(),
            topic: topic.to_string(),
            qos,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        })
        .await
    }
    pub async fn mqtt_unsubscribe(&self, broker: &str, port: u16, client_id: &str, topic: &str) -> Outcome {
        self.ad_hoc(Operation::MqttUnsubscribe {
            broker: broker.to_string(),
            port,
            client_id: client_id.to_string(),
            topic: topic.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        })
        .await
    }
    pub async fn mqtt_disconnect(&self, broker: &str, port: u16, client_id: &str) -> Outcome {
        self.ad_hoc(Operation::MqttDisconnect { broker: broker.to_string(), port, client_id: client_id.to_string() }).await
    }

    pub async fn database_connect(&self, conn_string: &str, db_kind: Option<crate::operation::DbKind>) -> Outcome {
        self.ad_hoc(Operation::DbConnect { conn_string: conn_string.to_string(), db_kind, timeout_ms: DEFAULT_TIMEOUT_MS })
            .await
    }
    pub async fn database_query(
        &self,
        conn_string: &str,
        db_kind: Option<crate::operation::DbKind>,
        query: &str,
    ) -> Outcome {
        self.ad_hoc(Operation::DbQuery {
            conn_string: conn_string.to_string(),
            db_kind,
            query: query.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        })
        .await
    }
    pub async fn database_disconnect(&self, conn_string: &str) -> Outcome {
        self.ad_hoc(Operation::DbDisconnect { conn_string: conn_string.to_string() }).await
    }
}

/// A [`Engine::run_custom`] VU's handle: its own connection registry plus
/// access back to the engine's shared HTTP client and metrics aggregator.
/// Every protocol method here mirrors one of [`Engine`]'s ad-hoc methods but
/// dispatches against this VU's own registry instead of the engine's shared
/// one, and records directly rather than through a lock.
pub struct EngineVu {
    engine: Arc<Engine>,
    registry: ConnectionRegistry,
    cancel: CancellationToken,
    deadline: tokio::time::Instant,
}

impl EngineVu {
    /// Whether this VU should stop iterating: either the run's deadline has
    /// passed, or the run was cancelled early (e.g. another VU panicked the
    /// whole pool down — it doesn't today, but the check is cheap).
    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || tokio::time::Instant::now() >= self.deadline
    }

    pub async fn execute(&mut self, op: Operation) -> Outcome {
        let mut ctx = DriverContext { http: self.engine.http_client.as_ref(), registry: &mut self.registry };
        let outcome = drivers::execute(&op, &mut ctx).await;
        self.engine.metrics.record(outcome.response_time_us, outcome.success, outcome.body.len() as u64);
        outcome
    }

    pub async fn http_request(
        &mut self,
        url: &str,
        method: HttpMethod,
        headers: HashMap<String, String>,
        body: Option<RequestBody>,
        timeout_ms: u64,
    ) -> Outcome {
        self.execute(Operation::HttpRequest { url: url.to_string(), method, headers, body, timeout_ms }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tcp_ad_hoc_methods_round_trip_through_one_registry() {
        let engine = Engine::new(10, 2);
        let outcome = engine.tcp_send("127.0.0.1", 9999, "ping").await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("no_connection"));
    }

    #[tokio::test]
    async fn get_metrics_reflects_ad_hoc_calls() {
        let engine = Engine::new(10, 2);
        let _ = engine.tcp_send("127.0.0.1", 9999, "ping").await;
        let snap = engine.get_metrics();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.total_errors, 1);
    }

    #[tokio::test]
    async fn reset_metrics_clears_the_aggregator() {
        let engine = Engine::new(10, 2);
        let _ = engine.tcp_send("127.0.0.1", 9999, "ping").await;
        engine.reset_metrics();
        assert_eq!(engine.get_metrics().total_requests, 0);
    }

    #[tokio::test]
    async fn run_scenario_against_an_empty_template_produces_a_clean_snapshot() {
        let engine = Engine::new(10, 2);
        let template = ScenarioTemplate { name: "empty".to_string(), ..Default::default() };
        let snapshot = engine.run_scenario(template, 3, 1, 0).await;
        assert_eq!(snapshot.total_requests, 0);
    }

    #[tokio::test]
    async fn run_scenario_with_pattern_rejects_malformed_grammar() {
        let engine = Engine::new(10, 2);
        let template = ScenarioTemplate { name: "t".to_string(), ..Default::default() };
        let result = engine.run_scenario_with_pattern(template, "nonsense").await;
        assert!(result.is_err());
    }
}
