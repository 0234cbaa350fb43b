//! Assertion engine — evaluates HTTP response assertions during a test run,
//! and aggregate assertions against a finished run's metrics.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;

// ---------------------------------------------------------------------------
// AssertionRule
// ---------------------------------------------------------------------------

/// The kind of assertion to evaluate against an HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssertionRule {
    /// Assert that the HTTP status code equals a specific value.
    StatusCodeEquals { expected: u16 },
    /// Assert that the HTTP status code does NOT equal a specific value.
    StatusCodeNotEquals { not_expected: u16 },
    /// Assert that the HTTP status code falls within a range (inclusive).
    StatusCodeRange { min: u16, max: u16 },
    /// Assert that the response body contains a given substring.
    BodyContains { substring: String },
    /// Assert that the response body does NOT contain a given substring.
    BodyNotContains { substring: String },
    /// Assert that a simple dot-notation JSON path evaluates to a specific value.
    JsonPath { expression: String, expected: serde_json::Value },
    /// Assert that the response time is below a threshold in milliseconds.
    ResponseTimeBelow { threshold_ms: u64 },
    /// Assert that a response header equals a specific value.
    HeaderEquals { header: String, expected: String },
    /// Assert that a response header contains a specific substring.
    HeaderContains { header: String, substring: String },
    /// Assert that the response body matches a regular expression.
    BodyMatches { pattern: String },
}

/// A per-response assertion not expressible as data: a rule implemented in
/// code rather than deserialized, per the redesign note keeping arbitrary
/// callables out of the serializable [`AssertionRule`] enum.
pub trait CustomAssertion: Send + Sync {
    fn evaluate(&self, ctx: &ResponseContext) -> (bool, String);
}

/// One member of an [`AssertionGroup`]: either a data-driven rule or a
/// programmatically-constructed custom one.
#[derive(Clone)]
pub enum AssertionSpec {
    Rule(AssertionRule),
    Custom(Arc<dyn CustomAssertion>),
}

/// `AND`/`OR` combinator for a set of assertions, both per-response and
/// per-aggregate. `And` short-circuits on the first failure; `Or` evaluates
/// every member so a passing group still reports which members failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLogic {
    And,
    Or,
}

pub struct AssertionGroup {
    pub logic: GroupLogic,
    pub members: Vec<AssertionSpec>,
}

impl AssertionGroup {
    /// Evaluate every member, returning the group's overall pass/fail plus
    /// the failure messages of every member that failed (empty when the
    /// group passes under `And`, since evaluation stops at the first miss).
    pub fn evaluate(&self, ctx: &ResponseContext) -> (bool, Vec<String>) {
        let mut failures = Vec::new();
        match self.logic {
            GroupLogic::And => {
                for member in &self.members {
                    let (passed, message) = evaluate_spec(member, ctx);
                    if !passed {
                        failures.push(message);
                        return (false, failures);
                    }
                }
                (true, failures)
            }
            GroupLogic::Or => {
                let mut any_passed = false;
                for member in &self.members {
                    let (passed, message) = evaluate_spec(member, ctx);
                    if passed {
                        any_passed = true;
                    } else {
                        failures.push(message);
                    }
                }
                (any_passed, failures)
            }
        }
    }
}

fn evaluate_spec(spec: &AssertionSpec, ctx: &ResponseContext) -> (bool, String) {
    match spec {
        AssertionSpec::Rule(rule) => evaluate_assertion(rule, ctx),
        AssertionSpec::Custom(custom) => custom.evaluate(ctx),
    }
}

// ---------------------------------------------------------------------------
// ResponseContext
// ---------------------------------------------------------------------------

/// Context needed to evaluate assertions against an HTTP response.
pub struct ResponseContext<'a> {
    pub status_code: u16,
    pub headers: &'a std::collections::HashMap<String, String>,
    pub body: &'a str,
    pub elapsed_ms: u64,
}

// ---------------------------------------------------------------------------
// evaluate_assertion
// ---------------------------------------------------------------------------

/// Evaluate a single assertion rule against the response context.
///
/// Returns `(passed, message)` — never panics.
pub fn evaluate_assertion(rule: &AssertionRule, ctx: &ResponseContext) -> (bool, String) {
    match rule {
        AssertionRule::StatusCodeEquals { expected } => {
            let passed = ctx.status_code == *expected;
            let msg = if passed {
                format!("Status code {} matches expected {}", ctx.status_code, expected)
            } else {
                format!("Expected status {}, got {}", expected, ctx.status_code)
            };
            (passed, msg)
        }
        AssertionRule::StatusCodeNotEquals { not_expected } => {
            let passed = ctx.status_code != *not_expected;
            let msg = if passed {
                format!("Status code {} is not {}", ctx.status_code, not_expected)
            } else {
                format!("Status code {} should not be {}", ctx.status_code, not_expected)
            };
            (passed, msg)
        }
        AssertionRule::StatusCodeRange { min, max } => {
            let passed = ctx.status_code >= *min && ctx.status_code <= *max;
            let msg = if passed {
                format!("Status {} is within range [{}, {}]", ctx.status_code, min, max)
            } else {
                format!("Status {} is outside range [{}, {}]", ctx.status_code, min, max)
            };
            (passed, msg)
        }
        AssertionRule::BodyContains { substring } => {
            let passed = ctx.body.contains(substring.as_str());
            let msg = if passed {
                format!("Body contains \"{}\"", substring)
            } else {
                format!("Body does not contain \"{}\"", substring)
            };
            (passed, msg)
        }
        AssertionRule::BodyNotContains { substring } => {
            let passed = !ctx.body.contains(substring.as_str());
            let msg = if passed {
                format!("Body does not contain \"{}\"", substring)
            } else {
                format!("Body unexpectedly contains \"{}\"", substring)
            };
            (passed, msg)
        }
        AssertionRule::JsonPath { expression, expected } => {
            // Parse body as JSON, navigate the dot-notation path, compare with expected.
            match serde_json::from_str::<serde_json::Value>(ctx.body) {
                Ok(json) => {
                    let actual = navigate_json_path(&json, expression);
                    match actual {
                        Some(value) if value == expected => (
                            true,
                            format!("JSON path \"{}\" equals {:?}", expression, expected),
                        ),
                        Some(value) => (
                            false,
                            format!(
                                "JSON path \"{}\" expected {:?}, got {:?}",
                                expression, expected, value
                            ),
                        ),
                        None => (
                            false,
                            format!("JSON path \"{}\" not found in response", expression),
                        ),
                    }
                }
                Err(e) => (false, format!("Failed to parse response as JSON: {e}")),
            }
        }
        AssertionRule::ResponseTimeBelow { threshold_ms } => {
            let passed = ctx.elapsed_ms < *threshold_ms;
            let msg = if passed {
                format!(
                    "Response time {} ms < {} ms threshold",
                    ctx.elapsed_ms, threshold_ms
                )
            } else {
                format!(
                    "Response time {} ms exceeds {} ms threshold",
                    ctx.elapsed_ms, threshold_ms
                )
            };
            (passed, msg)
        }
        AssertionRule::HeaderEquals { header, expected } => {
            match ctx.headers.get(header) {
                Some(value) if value == expected => (
                    true,
                    format!("Header \"{}\" equals \"{}\"", header, expected),
                ),
                Some(value) => (
                    false,
                    format!(
                        "Header \"{}\" expected \"{}\", got \"{}\"",
                        header, expected, value
                    ),
                ),
                None => (
                    false,
                    format!("Header \"{}\" not found in response", header),
                ),
            }
        }
        AssertionRule::HeaderContains { header, substring } => {
            match ctx.headers.get(header) {
                Some(value) if value.contains(substring.as_str()) => (
                    true,
                    format!("Header \"{}\" contains \"{}\"", header, substring),
                ),
                Some(value) => (
                    false,
                    format!(
                        "Header \"{}\" value \"{}\" does not contain \"{}\"",
                        header, value, substring
                    ),
                ),
                None => (
                    false,
                    format!("Header \"{}\" not found in response", header),
                ),
            }
        }
        AssertionRule::BodyMatches { pattern } => match regex::Regex::new(pattern) {
            Ok(re) => {
                let passed = re.is_match(ctx.body);
                let msg = if passed {
                    format!("Body matches pattern \"{}\"", pattern)
                } else {
                    format!("Body does not match pattern \"{}\"", pattern)
                };
                (passed, msg)
            }
            Err(e) => (false, format!("Invalid regex pattern \"{}\": {e}", pattern)),
        },
    }
}

// ---------------------------------------------------------------------------
// JSON path navigator (simple dot-notation)
// ---------------------------------------------------------------------------

/// Navigate a simple dot-notation JSON path.
///
/// Supports:
/// - `"key"` — top-level key
/// - `"key.subkey"` — nested key
/// - `"key[0]"` — array index
/// - `"key[0].subkey"` — array index followed by key
///
/// Does NOT support bracket-notation key access, wildcards, or filter
/// expressions.  For advanced querying, a full JSONPath library would be
/// required, but this simple implementation avoids an extra dependency.
fn navigate_json_path<'a>(
    value: &'a serde_json::Value,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        // Check for array index notation: "items[0]"
        if let Some(bracket_pos) = segment.find('[') {
            let key = &segment[..bracket_pos];
            let closing = segment.rfind(']').unwrap_or(segment.len() - 1);
            let idx_str = &segment[bracket_pos + 1..closing];

            // Navigate into the object key (if a key precedes the bracket).
            if !key.is_empty() {
                current = current.get(key)?;
            }
            let idx: usize = idx_str.parse().ok()?;
            current = current.get(idx)?;
        } else {
            current = current.get(segment)?;
        }
    }
    Some(current)
}

// ---------------------------------------------------------------------------
// Aggregate assertions — evaluated once, against a finished run's snapshot
// ---------------------------------------------------------------------------

/// A predicate over a whole run's [`MetricsSnapshot`], evaluated once after
/// the run ends rather than per-response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregateAssertionRule {
    ThroughputAtLeast { rps: f64 },
    AvgResponseTimeUnder { ms: f64 },
    ErrorRateBelow { pct: f64 },
    SuccessRateAtLeast { pct: f64 },
    MaxResponseTimeUnder { ms: u64 },
    TotalRequestsAtLeast { n: u64 },
}

pub trait CustomAggregateAssertion: Send + Sync {
    fn evaluate(&self, snapshot: &MetricsSnapshot) -> (bool, String);
}

#[derive(Clone)]
pub enum AggregateAssertionSpec {
    Rule(AggregateAssertionRule),
    Custom(Arc<dyn CustomAggregateAssertion>),
}

pub struct AggregateAssertionGroup {
    pub logic: GroupLogic,
    pub members: Vec<AggregateAssertionSpec>,
}

impl AggregateAssertionGroup {
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> (bool, Vec<String>) {
        let mut failures = Vec::new();
        match self.logic {
            GroupLogic::And => {
                for member in &self.members {
                    let (passed, message) = evaluate_aggregate_spec(member, snapshot);
                    if !passed {
                        failures.push(message);
                        return (false, failures);
                    }
                }
                (true, failures)
            }
            GroupLogic::Or => {
                let mut any_passed = false;
                for member in &self.members {
                    let (passed, message) = evaluate_aggregate_spec(member, snapshot);
                    if passed {
                        any_passed = true;
                    } else {
                        failures.push(message);
                    }
                }
                (any_passed, failures)
            }
        }
    }
}

fn evaluate_aggregate_spec(spec: &AggregateAssertionSpec, snapshot: &MetricsSnapshot) -> (bool, String) {
    match spec {
        AggregateAssertionSpec::Rule(rule) => evaluate_aggregate_assertion(rule, snapshot),
        AggregateAssertionSpec::Custom(custom) => custom.evaluate(snapshot),
    }
}

/// Evaluate a single aggregate rule. `success_rate_at_least` passes
/// vacuously on zero requests; `total_requests_at_least` with `n > 0` fails
/// on zero requests — both per the run's documented empty-run edge cases.
pub fn evaluate_aggregate_assertion(rule: &AggregateAssertionRule, snapshot: &MetricsSnapshot) -> (bool, String) {
    match rule {
        AggregateAssertionRule::ThroughputAtLeast { rps } => {
            let passed = snapshot.current_rps >= *rps;
            let msg = if passed {
                format!("throughput {:.1} rps meets minimum {:.1} rps", snapshot.current_rps, rps)
            } else {
                format!("throughput {:.1} rps is below minimum {:.1} rps", snapshot.current_rps, rps)
            };
            (passed, msg)
        }
        AggregateAssertionRule::AvgResponseTimeUnder { ms } => {
            let passed = snapshot.mean_response_time_ms < *ms;
            let msg = if passed {
                format!("avg response time {:.1}ms is under limit {:.1}ms", snapshot.mean_response_time_ms, ms)
            } else {
                format!("avg response time {:.1}ms exceeds limit {:.1}ms", snapshot.mean_response_time_ms, ms)
            };
            (passed, msg)
        }
        AggregateAssertionRule::ErrorRateBelow { pct } => {
            let error_rate = error_rate_pct(snapshot);
            let passed = error_rate < *pct;
            let msg = if passed {
                format!("error rate {:.2}% is below {:.2}%", error_rate, pct)
            } else {
                format!("error rate {:.2}% is not below {:.2}%", error_rate, pct)
            };
            (passed, msg)
        }
        AggregateAssertionRule::SuccessRateAtLeast { pct } => {
            if snapshot.total_requests == 0 {
                return (true, "success rate assertion vacuously passes on zero requests".to_string());
            }
            let success_rate = 100.0 - error_rate_pct(snapshot);
            let passed = success_rate >= *pct;
            let msg = if passed {
                format!("success rate {:.2}% meets minimum {:.2}%", success_rate, pct)
            } else {
                format!("success rate {:.2}% is below minimum {:.2}%", success_rate, pct)
            };
            (passed, msg)
        }
        AggregateAssertionRule::MaxResponseTimeUnder { ms } => {
            let max_ms = snapshot.max_response_time_us / 1000;
            let passed = max_ms < *ms;
            let msg = if passed {
                format!("max response time {}ms is under limit {}ms", max_ms, ms)
            } else {
                format!("max response time {}ms exceeds limit {}ms", max_ms, ms)
            };
            (passed, msg)
        }
        AggregateAssertionRule::TotalRequestsAtLeast { n } => {
            let passed = snapshot.total_requests >= *n;
            let msg = if passed {
                format!("total requests {} meets minimum {}", snapshot.total_requests, n)
            } else {
                format!("total requests {} is below minimum {}", snapshot.total_requests, n)
            };
            (passed, msg)
        }
    }
}

fn error_rate_pct(snapshot: &MetricsSnapshot) -> f64 {
    if snapshot.total_requests == 0 {
        0.0
    } else {
        (snapshot.total_errors as f64 / snapshot.total_requests as f64) * 100.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_ctx<'a>(
        status: u16,
        headers: &'a HashMap<String, String>,
        body: &'a str,
        elapsed: u64,
    ) -> ResponseContext<'a> {
        ResponseContext {
            status_code: status,
            headers,
            body,
            elapsed_ms: elapsed,
        }
    }

    #[test]
    fn status_code_equals_pass() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, "", 50);
        let rule = AssertionRule::StatusCodeEquals { expected: 200 };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(passed);
    }

    #[test]
    fn status_code_equals_fail() {
        let headers = HashMap::new();
        let ctx = make_ctx(404, &headers, "", 50);
        let rule = AssertionRule::StatusCodeEquals { expected: 200 };
        let (passed, msg) = evaluate_assertion(&rule, &ctx);
        assert!(!passed);
        assert!(msg.contains("404"));
    }

    #[test]
    fn status_code_not_equals_pass() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, "", 50);
        let rule = AssertionRule::StatusCodeNotEquals { not_expected: 500 };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(passed);
    }

    #[test]
    fn status_code_range_pass() {
        let headers = HashMap::new();
        let ctx = make_ctx(201, &headers, "", 50);
        let rule = AssertionRule::StatusCodeRange { min: 200, max: 299 };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(passed);
    }

    #[test]
    fn status_code_range_fail() {
        let headers = HashMap::new();
        let ctx = make_ctx(404, &headers, "", 50);
        let rule = AssertionRule::StatusCodeRange { min: 200, max: 299 };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(!passed);
    }

    #[test]
    fn body_contains_pass() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, "Hello, world!", 50);
        let rule = AssertionRule::BodyContains { substring: "world".to_string() };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(passed);
    }

    #[test]
    fn body_not_contains_pass() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, "Hello, world!", 50);
        let rule = AssertionRule::BodyNotContains { substring: "error".to_string() };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(passed);
    }

    #[test]
    fn response_time_below_pass() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, "", 99);
        let rule = AssertionRule::ResponseTimeBelow { threshold_ms: 100 };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(passed);
    }

    #[test]
    fn response_time_below_fail() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, "", 200);
        let rule = AssertionRule::ResponseTimeBelow { threshold_ms: 100 };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(!passed);
    }

    #[test]
    fn header_equals_pass() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let ctx = make_ctx(200, &headers, "", 50);
        let rule = AssertionRule::HeaderEquals {
            header: "content-type".to_string(),
            expected: "application/json".to_string(),
        };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(passed);
    }

    #[test]
    fn header_contains_pass() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json; charset=utf-8".to_string());
        let ctx = make_ctx(200, &headers, "", 50);
        let rule = AssertionRule::HeaderContains {
            header: "content-type".to_string(),
            substring: "application/json".to_string(),
        };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(passed);
    }

    #[test]
    fn header_missing_fails() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, "", 50);
        let rule = AssertionRule::HeaderEquals {
            header: "x-custom".to_string(),
            expected: "value".to_string(),
        };
        let (passed, msg) = evaluate_assertion(&rule, &ctx);
        assert!(!passed);
        assert!(msg.contains("not found"));
    }

    #[test]
    fn json_path_simple_key() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, r#"{"status":"ok"}"#, 50);
        let rule = AssertionRule::JsonPath {
            expression: "status".to_string(),
            expected: serde_json::json!("ok"),
        };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(passed);
    }

    #[test]
    fn json_path_nested() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, r#"{"data":{"id":42}}"#, 50);
        let rule = AssertionRule::JsonPath {
            expression: "data.id".to_string(),
            expected: serde_json::json!(42),
        };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(passed);
    }

    #[test]
    fn json_path_array_index() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, r#"{"items":["a","b","c"]}"#, 50);
        let rule = AssertionRule::JsonPath {
            expression: "items[1]".to_string(),
            expected: serde_json::json!("b"),
        };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(passed);
    }

    #[test]
    fn json_path_not_found() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, r#"{"a":1}"#, 50);
        let rule = AssertionRule::JsonPath {
            expression: "b.c".to_string(),
            expected: serde_json::json!(1),
        };
        let (passed, msg) = evaluate_assertion(&rule, &ctx);
        assert!(!passed);
        assert!(msg.contains("not found"));
    }

    #[test]
    fn json_path_invalid_json_body() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, "not json", 50);
        let rule = AssertionRule::JsonPath {
            expression: "key".to_string(),
            expected: serde_json::json!("val"),
        };
        let (passed, msg) = evaluate_assertion(&rule, &ctx);
        assert!(!passed);
        assert!(msg.contains("parse"));
    }

    #[test]
    fn body_matches_pass() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, "order-482910", 50);
        let rule = AssertionRule::BodyMatches { pattern: r"^order-\d+$".to_string() };
        let (passed, _) = evaluate_assertion(&rule, &ctx);
        assert!(passed);
    }

    #[test]
    fn body_matches_invalid_pattern_fails() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, "anything", 50);
        let rule = AssertionRule::BodyMatches { pattern: "(unclosed".to_string() };
        let (passed, msg) = evaluate_assertion(&rule, &ctx);
        assert!(!passed);
        assert!(msg.contains("Invalid regex"));
    }

    #[test]
    fn and_group_short_circuits_on_first_failure() {
        let headers = HashMap::new();
        let ctx = make_ctx(404, &headers, "", 50);
        let group = AssertionGroup {
            logic: GroupLogic::And,
            members: vec![
                AssertionSpec::Rule(AssertionRule::StatusCodeEquals { expected: 200 }),
                AssertionSpec::Rule(AssertionRule::BodyContains { substring: "never evaluated".to_string() }),
            ],
        };
        let (passed, failures) = group.evaluate(&ctx);
        assert!(!passed);
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn or_group_passes_and_still_reports_the_failing_member() {
        let headers = HashMap::new();
        let ctx = make_ctx(200, &headers, "", 50);
        let group = AssertionGroup {
            logic: GroupLogic::Or,
            members: vec![
                AssertionSpec::Rule(AssertionRule::StatusCodeEquals { expected: 500 }),
                AssertionSpec::Rule(AssertionRule::StatusCodeEquals { expected: 200 }),
            ],
        };
        let (passed, failures) = group.evaluate(&ctx);
        assert!(passed);
        assert_eq!(failures.len(), 1);
    }

    fn empty_snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: 0,
            total_errors: 0,
            total_successes: 0,
            min_response_time_us: 0,
            max_response_time_us: 0,
            mean_response_time_ms: 0.0,
            p50_ms: 0,
            p95_ms: 0,
            p99_ms: 0,
            total_bytes: 0,
            current_rps: 0.0,
            elapsed_ms: 0,
        }
    }

    #[test]
    fn success_rate_at_least_passes_vacuously_on_zero_requests() {
        let rule = AggregateAssertionRule::SuccessRateAtLeast { pct: 99.0 };
        let (passed, _) = evaluate_aggregate_assertion(&rule, &empty_snapshot());
        assert!(passed);
    }

    #[test]
    fn total_requests_at_least_fails_on_zero_requests() {
        let rule = AggregateAssertionRule::TotalRequestsAtLeast { n: 1 };
        let (passed, _) = evaluate_aggregate_assertion(&rule, &empty_snapshot());
        assert!(!passed);
    }

    #[test]
    fn avg_response_time_under_reports_exceeds_limit_message() {
        let mut snap = empty_snapshot();
        snap.total_requests = 10;
        snap.mean_response_time_ms = 1500.0;
        let rule = AggregateAssertionRule::AvgResponseTimeUnder { ms: 500.0 };
        let (passed, msg) = evaluate_aggregate_assertion(&rule, &snap);
        assert!(!passed);
        assert!(msg.contains("exceeds limit 500.0ms"));
    }

    #[test]
    fn error_rate_below_uses_percentage_of_total() {
        let mut snap = empty_snapshot();
        snap.total_requests = 100;
        snap.total_errors = 10;
        let rule = AggregateAssertionRule::ErrorRateBelow { pct: 20.0 };
        let (passed, _) = evaluate_aggregate_assertion(&rule, &snap);
        assert!(passed);

        let rule_strict = AggregateAssertionRule::ErrorRateBelow { pct: 5.0 };
        let (passed_strict, _) = evaluate_aggregate_assertion(&rule_strict, &snap);
        assert!(!passed_strict);
    }

    #[test]
    fn aggregate_and_group_short_circuits() {
        let mut snap = empty_snapshot();
        snap.total_requests = 5;
        let group = AggregateAssertionGroup {
            logic: GroupLogic::And,
            members: vec![
                AggregateAssertionSpec::Rule(AggregateAssertionRule::TotalRequestsAtLeast { n: 100 }),
                AggregateAssertionSpec::Rule(AggregateAssertionRule::ThroughputAtLeast { rps: 1.0 }),
            ],
        };
        let (passed, failures) = group.evaluate(&snap);
        assert!(!passed);
        assert_eq!(failures.len(), 1);
    }
}
