//! Headless CLI front end for `rmeter-core`. Parses arguments with `clap`
//! (the core never parses args itself), builds one `Engine`, runs either a
//! single request, a scenario file, or a load pattern, then reports results
//! and exits with the appropriate code.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rmeter_core::metrics::MetricsSnapshot;
use rmeter_core::plan::model::{HttpMethod, RequestBody};
use rmeter_core::scenario::ScenarioTemplate;
use rmeter_core::{Engine, Outcome, RmeterError};

#[derive(Parser, Debug)]
#[command(name = "rmeter-cli", about = "Multi-protocol load generator")]
struct Cli {
    /// Target URL for a single ad-hoc request. Mutually exclusive with
    /// `--scenario`/`--config`/`--interactive`.
    url: Option<String>,

    #[arg(long)]
    scenario: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    interactive: bool,

    #[arg(long, default_value_t = 1)]
    users: u32,
    #[arg(long, default_value_t = 10)]
    duration: u64,
    #[arg(long = "ramp-up", default_value_t = 0)]
    ramp_up: u64,
    #[arg(long)]
    pattern: Option<String>,

    #[arg(long = "max-connections", default_value_t = 100)]
    max_connections: usize,
    #[arg(long = "threads", default_value_t = 4)]
    threads: usize,

    #[arg(long, default_value = "GET")]
    method: String,
    #[arg(short = 'H', long = "header")]
    header: Vec<String>,
    #[arg(short = 'b', long = "body")]
    body: Option<String>,
    #[arg(short = 't', long = "timeout", default_value_t = 30_000)]
    timeout_ms: u64,

    #[arg(long)]
    json: Option<PathBuf>,
    #[arg(long)]
    html: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long = "no-progress")]
    no_progress: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::try_init().ok();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.threads.max(1))
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("fatal: failed to start runtime: {e}");
            return ExitCode::from(1);
        }
    };

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    let engine = std::sync::Arc::new(Engine::new(cli.max_connections, cli.threads));

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    tokio::select! {
        result = dispatch(&cli, &engine) => match result {
            Ok(report) => {
                if !cli.quiet {
                    print_report(&report);
                }
                write_outputs(&cli, &report);
                ExitCode::from(0)
            }
            Err(e) => {
                eprintln!("fatal: {e}");
                ExitCode::from(1)
            }
        },
        _ = &mut interrupted => {
            eprintln!("interrupted");
            ExitCode::from(130)
        }
    }
}

enum Report {
    SingleRequest(Outcome),
    Metrics(MetricsSnapshot),
}

async fn dispatch(cli: &Cli, engine: &Engine) -> Result<Report, RmeterError> {
    if cli.interactive {
        return run_interactive(engine).await.map(Report::Metrics);
    }

    if let Some(path) = cli.scenario.as_ref().or(cli.config.as_ref()) {
        let template = load_scenario(path)?;
        let snapshot = match &cli.pattern {
            Some(pattern) => engine.run_scenario_with_pattern(template, pattern).await?,
            None => engine.run_scenario(template, cli.users, cli.duration, cli.ramp_up).await,
        };
        return Ok(Report::Metrics(snapshot));
    }

    let Some(url) = cli.url.as_ref() else {
        return Err(RmeterError::InvalidInput(
            "provide a URL, or one of --scenario/--config/--interactive".to_string(),
        ));
    };

    let method = parse_method(&cli.method)?;
    let headers = parse_headers(&cli.header)?;
    let body = cli.body.clone().map(RequestBody::Raw);

    if cli.users <= 1 {
        let outcome = engine.execute_request(url, method, headers, body, cli.timeout_ms).await;
        return Ok(Report::SingleRequest(outcome));
    }

    let template = ScenarioTemplate {
        name: "cli-request".to_string(),
        operations: vec![rmeter_core::operation::Operation::HttpRequest {
            url: url.clone(),
            method,
            headers,
            body,
            timeout_ms: cli.timeout_ms,
        }
        .into()],
        ..Default::default()
    };
    let snapshot = match &cli.pattern {
        Some(pattern) => engine.run_scenario_with_pattern(template, pattern).await?,
        None => engine.run_scenario(template, cli.users, cli.duration, cli.ramp_up).await,
    };
    Ok(Report::Metrics(snapshot))
}

fn load_scenario(path: &PathBuf) -> Result<ScenarioTemplate, RmeterError> {
    let content = std::fs::read_to_string(path).map_err(RmeterError::Io)?;
    serde_json::from_str(&content).map_err(RmeterError::from)
}

fn parse_method(s: &str) -> Result<HttpMethod, RmeterError> {
    match s.to_ascii_uppercase().as_str() {
        "GET" => Ok(HttpMethod::Get),
        "POST" => Ok(HttpMethod::Post),
        "PUT" => Ok(HttpMethod::Put),
        "DELETE" => Ok(HttpMethod::Delete),
        "PATCH" => Ok(HttpMethod::Patch),
        "HEAD" => Ok(HttpMethod::Head),
        "OPTIONS" => Ok(HttpMethod::Options),
        other => Err(RmeterError::InvalidInput(format!("unknown HTTP method: {other}"))),
    }
}

fn parse_headers(raw: &[String]) -> Result<HashMap<String, String>, RmeterError> {
    let mut headers = HashMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .ok_or_else(|| RmeterError::InvalidInput(format!("header must be NAME:VALUE, got \"{entry}\"")))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}

/// A minimal read-eval-print loop: each line is a URL, sent as a single GET
/// and reported immediately; `quit`/`exit` ends the session.
async fn run_interactive(engine: &Engine) -> Result<MetricsSnapshot, RmeterError> {
    let stdin = std::io::stdin();
    loop {
        print!("rmeter> ");
        std::io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }
        let outcome = engine.execute_request(line, HttpMethod::Get, HashMap::new(), None, 30_000).await;
        print_outcome(&outcome);
    }
    Ok(engine.get_metrics())
}

fn print_report(report: &Report) {
    match report {
        Report::SingleRequest(outcome) => print_outcome(outcome),
        Report::Metrics(snapshot) => print_snapshot(snapshot),
    }
}

fn print_outcome(outcome: &Outcome) {
    if outcome.success {
        println!("{} {:.2}ms {}B", outcome.status_code, outcome.response_time_ms(), outcome.body.len());
    } else {
        println!("error: {}", outcome.error.as_deref().unwrap_or("unknown"));
    }
}

fn print_snapshot(snapshot: &MetricsSnapshot) {
    println!("requests:    {}", snapshot.total_requests);
    println!("successes:   {}", snapshot.total_successes);
    println!("errors:      {}", snapshot.total_errors);
    println!("mean:        {:.2}ms", snapshot.mean_response_time_ms);
    println!("p50/p95/p99: {}/{}/{}ms", snapshot.p50_ms, snapshot.p95_ms, snapshot.p99_ms);
    println!("rps:         {:.1}", snapshot.current_rps);
}

fn write_outputs(cli: &Cli, report: &Report) {
    let Report::Metrics(snapshot) = report else { return };

    if let Some(path) = &cli.json {
        if let Ok(body) = serde_json::to_string_pretty(&json_snapshot(snapshot)) {
            let _ = std::fs::write(path, body);
        }
    }
    if let Some(path) = &cli.html {
        let _ = std::fs::write(path, html_report(snapshot));
    }
}

fn json_snapshot(snapshot: &MetricsSnapshot) -> serde_json::Value {
    serde_json::json!({
        "total_requests": snapshot.total_requests,
        "total_errors": snapshot.total_errors,
        "total_successes": snapshot.total_successes,
        "mean_response_time_ms": snapshot.mean_response_time_ms,
        "p50_ms": snapshot.p50_ms,
        "p95_ms": snapshot.p95_ms,
        "p99_ms": snapshot.p99_ms,
        "min_response_time_us": snapshot.min_response_time_us,
        "max_response_time_us": snapshot.max_response_time_us,
        "current_rps": snapshot.current_rps,
        "elapsed_ms": snapshot.elapsed_ms,
    })
}

fn html_report(snapshot: &MetricsSnapshot) -> String {
    format!(
        "<html><body><h1>rmeter report</h1><ul>\
         <li>requests: {}</li><li>errors: {}</li><li>mean: {:.2}ms</li>\
         <li>p95: {}ms</li><li>rps: {:.1}</li></ul></body></html>",
        snapshot.total_requests, snapshot.total_errors, snapshot.mean_response_time_ms, snapshot.p95_ms, snapshot.current_rps
    )
}
