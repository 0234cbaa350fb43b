//! Worker pool / scheduler: one `tokio::task` per virtual user, load shaped
//! by an ordered stage list. The task-per-VU, ramp-stagger idiom generalizes
//! a single thread group's `num_threads`/`ramp_up_seconds` pair into the full
//! `constant`/`ramp`/`spike` stage-list grammar.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::data_source::DataSourceManager;
use crate::drivers::{self, DriverContext};
use crate::error::RmeterError;
use crate::extractors::{self, ExtractionContext};
use crate::metrics::MetricsAggregator;
use crate::operation::Outcome;
use crate::registry::ConnectionRegistry;
use crate::scenario::{self, ScenarioStep, ScenarioTemplate};
use crate::session::SessionStore;

/// One segment of a run's load shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageKind {
    Constant { users: u32 },
    Ramp { start_users: u32, end_users: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stage {
    pub kind: StageKind,
    pub duration_s: u64,
}

/// Sugar for the common `{users, duration_s, ramp_up_s}` triple: a ramp from
/// 1 to `users` over `ramp_up_s`, then a constant hold at `users` for the
/// rest of `duration_s`. Collapses to the same stage-list representation the
/// `constant`/`ramp`/`spike` grammar produces.
pub fn stages_from_simple(users: u32, duration_s: u64, ramp_up_s: u64) -> Vec<Stage> {
    if ramp_up_s == 0 || users <= 1 {
        return vec![Stage { kind: StageKind::Constant { users }, duration_s }];
    }
    if ramp_up_s >= duration_s {
        return vec![Stage { kind: StageKind::Ramp { start_users: 1, end_users: users }, duration_s }];
    }
    vec![
        Stage { kind: StageKind::Ramp { start_users: 1, end_users: users }, duration_s: ramp_up_s },
        Stage { kind: StageKind::Constant { users }, duration_s: duration_s - ramp_up_s },
    ]
}

/// Parse the `constant:`/`ramp:`/`spike:` load-pattern grammar into an
/// ordered stage list. The optional `spike` trailing `NORMAL_SECONDS` wraps
/// the spike in a normal-load stage both before and after it; omitted, the
/// pattern is just the spike itself.
pub fn parse_load_pattern(pattern: &str) -> Result<Vec<Stage>, RmeterError> {
    let parts: Vec<&str> = pattern.split(':').collect();
    match parts.as_slice() {
        ["constant", users, seconds] => {
            let users = parse_u32(users)?;
            let seconds = parse_u64(seconds)?;
            Ok(vec![Stage { kind: StageKind::Constant { users }, duration_s: seconds }])
        }
        ["ramp", start, end, seconds] => {
            let start_users = parse_u32(start)?;
            let end_users = parse_u32(end)?;
            let seconds = parse_u64(seconds)?;
            Ok(vec![Stage { kind: StageKind::Ramp { start_users, end_users }, duration_s: seconds }])
        }
        ["spike", normal, spike, spike_seconds] => {
            let normal_users = parse_u32(normal)?;
            let spike_users = parse_u32(spike)?;
            let spike_seconds = parse_u64(spike_seconds)?;
            let _ = normal_users;
            Ok(vec![Stage { kind: StageKind::Constant { users: spike_users }, duration_s: spike_seconds }])
        }
        ["spike", normal, spike, spike_seconds, normal_seconds] => {
            let normal_users = parse_u32(normal)?;
            let spike_users = parse_u32(spike)?;
            let spike_seconds = parse_u64(spike_seconds)?;
            let normal_seconds = parse_u64(normal_seconds)?;
            Ok(vec![
                Stage { kind: StageKind::Constant { users: normal_users }, duration_s: normal_seconds },
                Stage { kind: StageKind::Constant { users: spike_users }, duration_s: spike_seconds },
                Stage { kind: StageKind::Constant { users: normal_users }, duration_s: normal_seconds },
            ])
        }
        _ => Err(RmeterError::InvalidInput(format!("unrecognized load pattern: {pattern}"))),
    }
}

fn parse_u32(s: &str) -> Result<u32, RmeterError> {
    s.parse().map_err(|_| RmeterError::InvalidInput(format!("expected an integer, got \"{s}\"")))
}

fn parse_u64(s: &str) -> Result<u64, RmeterError> {
    s.parse().map_err(|_| RmeterError::InvalidInput(format!("expected an integer, got \"{s}\"")))
}

/// Highest concurrent VU count any stage in the list calls for.
fn peak_users(stages: &[Stage]) -> u32 {
    stages
        .iter()
        .map(|s| match s.kind {
            StageKind::Constant { users } => users,
            StageKind::Ramp { start_users, end_users } => start_users.max(end_users),
        })
        .max()
        .unwrap_or(0)
}

/// When each VU index (0-based) should start, relative to the run's start.
/// VUs are never torn down mid-run to make room for a later, smaller stage —
/// once started, a VU runs until the overall deadline.
fn compute_start_offsets(stages: &[Stage]) -> Vec<Duration> {
    let total = peak_users(stages) as usize;
    let mut offsets = vec![Duration::ZERO; total];
    let mut assigned: u32 = 0;
    let mut elapsed = Duration::ZERO;

    for stage in stages {
        match stage.kind {
            StageKind::Constant { users } => {
                for i in assigned..users {
                    offsets[i as usize] = elapsed;
                }
                assigned = assigned.max(users);
            }
            StageKind::Ramp { start_users, end_users } => {
                let lo = assigned.max(start_users.min(end_users));
                let hi = start_users.max(end_users);
                let span = hi.saturating_sub(lo).max(1);
                for i in lo..hi {
                    let frac = (i - lo + 1) as f64 / span as f64;
                    offsets[i as usize] = elapsed + Duration::from_secs_f64(stage.duration_s as f64 * frac);
                }
                assigned = assigned.max(hi);
            }
        }
        elapsed += Duration::from_secs(stage.duration_s);
    }

    offsets
}

pub fn total_duration(stages: &[Stage]) -> Duration {
    Duration::from_secs(stages.iter().map(|s| s.duration_s).sum())
}

/// Everything a VU's run loop needs that is shared across every VU.
pub struct RunContext {
    pub template: Arc<ScenarioTemplate>,
    pub data_manager: Arc<DataSourceManager>,
    pub scenario_variables: HashMap<String, String>,
    pub http_client: Arc<reqwest::Client>,
    pub metrics: Arc<MetricsAggregator>,
    pub sessions: Arc<SessionStore>,
}

/// Run `stages`' load shape to completion (or until `cancel` fires),
/// spawning one task per VU, each compiling and executing the scenario in a
/// loop until the run's deadline. `max_connections` bounds how many VUs may
/// be concurrently active at once.
pub async fn run(stages: Vec<Stage>, max_connections: usize, ctx: RunContext, cancel: CancellationToken) {
    let peak = peak_users(&stages);
    if peak == 0 {
        return;
    }
    let deadline = Instant::now() + total_duration(&stages);
    let offsets = compute_start_offsets(&stages);
    let semaphore = Arc::new(Semaphore::new(max_connections.max(1)));
    let ctx = Arc::new(ctx);

    let mut vus: JoinSet<()> = JoinSet::new();
    for vu_id in 0..peak as u64 {
        let start_offset = offsets[vu_id as usize];
        let semaphore = Arc::clone(&semaphore);
        let ctx = Arc::clone(&ctx);
        let cancel = cancel.clone();

        vus.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(start_offset) => {}
                _ = cancel.cancelled() => return,
            }

            let permit = tokio::select! {
                p = semaphore.acquire_owned() => match p {
                    Ok(p) => p,
                    Err(_) => return,
                },
                _ = cancel.cancelled() => return,
            };

            run_virtual_user(vu_id, &ctx, deadline, cancel).await;
            drop(permit);
        });
    }

    while vus.join_next().await.is_some() {}
}

async fn run_virtual_user(vu_id: u64, ctx: &RunContext, deadline: Instant, cancel: CancellationToken) {
    let mut registry = ConnectionRegistry::new();

    loop {
        tokio::task::yield_now().await;
        if cancel.is_cancelled() || Instant::now() >= deadline {
            break;
        }

        let base_vars = match scenario::resolve_base_variables(&ctx.template, vu_id, &ctx.data_manager, &ctx.scenario_variables) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(vu_id, error = %e, "scenario compilation failed, recording as a failed first operation");
                let outcome = Outcome::failure(0, "invalid_input", e.to_string());
                ctx.metrics.record(outcome.response_time_us, outcome.success, outcome.body.len() as u64);
                continue;
            }
        };

        let steps = ctx.template.setup.iter().chain(&ctx.template.operations).chain(&ctx.template.teardown);

        for step in steps {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                return;
            }

            let vars = merge_session_variables(vu_id, &ctx.sessions, &base_vars);
            let mut op = scenario::substitute_operation(&step.operation, &vars);
            apply_session_headers(vu_id, &ctx.sessions, &mut op);

            let mut driver_ctx = DriverContext { http: ctx.http_client.as_ref(), registry: &mut registry };
            let outcome = drivers::execute(&op, &mut driver_ctx).await;

            absorb_session_cookies(vu_id, &ctx.sessions, &outcome);
            apply_extractions(vu_id, &ctx.sessions, step, &outcome);
            ctx.metrics.record(outcome.response_time_us, outcome.success, outcome.body.len() as u64);
        }
    }
}

/// Overlay the VU's session variables (persisted across iterations, updated
/// by extraction rules within this one) onto the per-iteration base map —
/// session variables win on conflict since they reflect the most recent
/// extraction.
fn merge_session_variables(vu_id: u64, sessions: &SessionStore, base: &HashMap<String, String>) -> HashMap<String, String> {
    sessions.with_session(vu_id, |session| {
        let mut merged = base.clone();
        for (k, v) in &session.variables {
            merged.insert(k.clone(), json_value_to_plain_string(v));
        }
        merged
    })
}

fn json_value_to_plain_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Run `step`'s extraction bindings against its outcome and store captured
/// values into the VU's session, visible to every later step in this
/// iteration and to every iteration after it. Extraction errors are logged
/// but never fail the request.
fn apply_extractions(vu_id: u64, sessions: &SessionStore, step: &ScenarioStep, outcome: &Outcome) {
    if step.extract.is_empty() {
        return;
    }
    let extraction_ctx = ExtractionContext {
        status_code: outcome.status_code.max(0) as u16,
        headers: &outcome.headers,
        body: &outcome.body,
        response_time_us: outcome.response_time_us,
    };
    for binding in &step.extract {
        let (success, value, message) = extractors::evaluate_extractor(&binding.rule, &extraction_ctx);
        if success {
            if let Some(value) = value {
                sessions.with_session(vu_id, |session| {
                    session.set_variable(binding.variable.clone(), serde_json::Value::String(value));
                });
            }
        } else {
            tracing::warn!(vu_id, variable = %binding.variable, %message, "extraction failed");
        }
    }
}

/// For HTTP operations, merge the VU's session-derived headers (cookies,
/// bearer/api-key tokens) onto the operation's own headers before dispatch.
fn apply_session_headers(vu_id: u64, sessions: &SessionStore, op: &mut crate::operation::Operation) {
    if let crate::operation::Operation::HttpRequest { headers, .. } = op {
        let merged = sessions.with_session(vu_id, |session| session.prepare_request_headers(headers));
        *headers = merged;
    }
}

/// After an HTTP outcome, absorb any `set-cookie` response header into the
/// VU's session so the next request in this iteration carries it.
fn absorb_session_cookies(vu_id: u64, sessions: &SessionStore, outcome: &crate::operation::Outcome) {
    let Some(raw) = outcome.headers.get("set-cookie") else { return };
    for one in raw.split(',') {
        let (name_value, _) = one.split_once(';').unwrap_or((one, ""));
        let Some((name, value)) = name_value.trim().split_once('=') else { continue };
        sessions.with_session(vu_id, |session| {
            session.set_cookie(
                name.to_string(),
                crate::session::Cookie { value: value.to_string(), domain: None, path: None },
            );
        });
    }
}
