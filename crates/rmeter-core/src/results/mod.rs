use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregated summary of a completed run, as produced by [`crate::metrics::MetricsAggregator::summary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TestSummary {
    pub plan_id: Uuid,
    pub plan_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Total number of operations that were executed.
    pub total_requests: u64,
    /// Number of operations that completed without error.
    pub successful_requests: u64,
    /// Number of operations that resulted in an error.
    pub failed_requests: u64,
    /// Minimum response time observed (ms).
    pub min_response_ms: u64,
    /// Maximum response time observed (ms).
    pub max_response_ms: u64,
    /// Mean response time (ms).
    pub mean_response_ms: f64,
    /// 50th percentile response time (ms).
    pub p50_response_ms: u64,
    /// 95th percentile response time (ms).
    pub p95_response_ms: u64,
    /// 99th percentile response time (ms).
    pub p99_response_ms: u64,
    /// Aggregate throughput in operations per second.
    pub requests_per_second: f64,
    /// Total bytes received across all responses.
    pub total_bytes_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_summary(plan_name: &str, total: u64, failed: u64, mean_ms: f64) -> TestSummary {
        let now = Utc::now();
        TestSummary {
            plan_id: Uuid::new_v4(),
            plan_name: plan_name.to_string(),
            started_at: now,
            finished_at: now,
            total_requests: total,
            successful_requests: total.saturating_sub(failed),
            failed_requests: failed,
            min_response_ms: 10,
            max_response_ms: 500,
            mean_response_ms: mean_ms,
            p50_response_ms: 100,
            p95_response_ms: 300,
            p99_response_ms: 490,
            requests_per_second: if total > 0 { total as f64 } else { 0.0 },
            total_bytes_received: total * 1024,
        }
    }

    #[test]
    fn summary_serde_roundtrip() {
        let summary = make_summary("Plan A", 100, 5, 42.5);
        let json = serde_json::to_string(&summary).expect("serialize");
        let parsed: TestSummary = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.plan_name, "Plan A");
        assert_eq!(parsed.total_requests, 100);
        assert_eq!(parsed.failed_requests, 5);
    }

    #[test]
    fn zero_requests_summary_is_constructible() {
        let summary = make_summary("Empty", 0, 0, 0.0);
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.requests_per_second, 0.0);
    }
}
