//! Request outcomes and aggregate statistics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport-level failure establishing or maintaining the connection.
    Connection,
    /// Per-request timeout exceeded.
    Timeout,
    /// Non-success HTTP status from the target.
    Http,
    /// Response body was not a valid completion payload.
    Parse,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Http => write!(f, "http"),
            ErrorKind::Parse => write!(f, "parse"),
        }
    }
}

/// Result of a single inference request.
///
/// Created by the client, consumed exactly once by the aggregator.
/// `sequence_id` is assigned at dispatch time so slow requests can be
/// correlated to their position in the run; aggregation itself is
/// order-independent.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub sequence_id: u64,
    pub started_at: Instant,
    pub finished_at: Instant,
    pub latency: Duration,
    /// Completion tokens reported by the target; 0 on failure or when the
    /// response carries no usage metadata.
    pub tokens_generated: u64,
    /// HTTP status, when one was received at all.
    pub status: Option<u16>,
    pub error: Option<ErrorKind>,
    pub error_detail: Option<String>,
}

impl RequestOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated statistics over a completed run.
///
/// Latencies are reported in milliseconds; percentile fields are `None`
/// when no requests were issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateStats {
    pub timestamp: String,
    pub scenario_name: String,
    pub model_name: String,
    pub concurrency: u32,
    pub total_issued: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub duration_secs: f64,
    pub requests_per_second: f64,
    pub tokens_per_second: f64,
    pub total_tokens: u64,
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
    pub latency_min_ms: Option<f64>,
    pub latency_max_ms: Option<f64>,
    pub latency_mean_ms: Option<f64>,
    pub error_counts: BTreeMap<ErrorKind, u64>,
    /// True when the run was cut short by a fatal-abort condition; the
    /// remaining fields then cover whatever outcomes were collected.
    pub aborted: bool,
}

/// Nearest-rank percentile over ascending-sorted samples.
///
/// For percentile `p`, picks the element at index `ceil(p/100 * n) - 1`
/// (0-indexed), clamped to `[0, n-1]`. Returns `None` on an empty slice.
pub fn nearest_rank(sorted: &[Duration], percentile: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let rank = (percentile / 100.0 * n as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(n - 1);
    Some(sorted[index])
}

impl AggregateStats {
    /// Compute final statistics over a complete set of outcomes.
    ///
    /// `wall_clock` runs from the dispatch of the first main-phase request
    /// to the completion of the last; warmup time is never included.
    /// Percentiles cover all outcomes, succeeded and failed alike, so a
    /// timed-out request contributes its elapsed-until-cancel duration.
    pub fn from_outcomes(
        scenario_name: &str,
        model_name: &str,
        concurrency: u32,
        outcomes: &[RequestOutcome],
        wall_clock: Duration,
        aborted: bool,
    ) -> Self {
        let total_issued = outcomes.len() as u64;
        let total_succeeded = outcomes.iter().filter(|o| o.succeeded()).count() as u64;
        let total_failed = total_issued - total_succeeded;

        let total_tokens: u64 = outcomes
            .iter()
            .filter(|o| o.succeeded())
            .map(|o| o.tokens_generated)
            .sum();

        let mut latencies: Vec<Duration> = outcomes.iter().map(|o| o.latency).collect();
        latencies.sort_unstable();

        let duration_secs = wall_clock.as_secs_f64();
        let requests_per_second = if total_issued > 0 && duration_secs > 0.0 {
            total_issued as f64 / duration_secs
        } else {
            0.0
        };
        let tokens_per_second = if total_tokens > 0 && duration_secs > 0.0 {
            total_tokens as f64 / duration_secs
        } else {
            0.0
        };

        let as_ms = |d: Duration| d.as_secs_f64() * 1000.0;
        let latency_mean_ms = if latencies.is_empty() {
            None
        } else {
            let sum: Duration = latencies.iter().sum();
            Some(as_ms(sum) / latencies.len() as f64)
        };

        let mut error_counts = BTreeMap::new();
        for outcome in outcomes {
            if let Some(kind) = outcome.error {
                *error_counts.entry(kind).or_insert(0) += 1;
            }
        }

        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            scenario_name: scenario_name.to_string(),
            model_name: model_name.to_string(),
            concurrency,
            total_issued,
            total_succeeded,
            total_failed,
            duration_secs,
            requests_per_second,
            tokens_per_second,
            total_tokens,
            latency_p50_ms: nearest_rank(&latencies, 50.0).map(as_ms),
            latency_p95_ms: nearest_rank(&latencies, 95.0).map(as_ms),
            latency_p99_ms: nearest_rank(&latencies, 99.0).map(as_ms),
            latency_min_ms: latencies.first().copied().map(as_ms),
            latency_max_ms: latencies.last().copied().map(as_ms),
            latency_mean_ms,
            error_counts,
            aborted,
        }
    }

    /// Fold failures from discarded (warmup) outcomes into the error
    /// breakdown without touching the issued/succeeded/failed totals.
    /// Used on fatal abort so the report names what went wrong even when
    /// no measured request was issued.
    pub fn merge_discarded_failures<'a>(
        &mut self,
        discarded: impl IntoIterator<Item = &'a RequestOutcome>,
    ) {
        for outcome in discarded {
            if let Some(kind) = outcome.error {
                *self.error_counts.entry(kind).or_insert(0) += 1;
            }
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_issued > 0 {
            self.total_succeeded as f64 / self.total_issued as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn outcome(sequence_id: u64, latency_ms: u64, tokens: u64, error: Option<ErrorKind>) -> RequestOutcome {
        let started_at = Instant::now();
        RequestOutcome {
            sequence_id,
            started_at,
            finished_at: started_at + ms(latency_ms),
            latency: ms(latency_ms),
            tokens_generated: if error.is_none() { tokens } else { 0 },
            status: if error.is_none() { Some(200) } else { None },
            error,
            error_detail: None,
        }
    }

    #[test]
    fn test_nearest_rank_reference_vector() {
        let samples = vec![ms(10), ms(20), ms(30), ms(40), ms(50)];
        assert_eq!(nearest_rank(&samples, 50.0), Some(ms(30)));
        assert_eq!(nearest_rank(&samples, 95.0), Some(ms(50)));
        assert_eq!(nearest_rank(&samples, 99.0), Some(ms(50)));
    }

    #[test]
    fn test_nearest_rank_edges() {
        let samples = vec![ms(7)];
        assert_eq!(nearest_rank(&samples, 50.0), Some(ms(7)));
        assert_eq!(nearest_rank(&samples, 99.0), Some(ms(7)));
        assert_eq!(nearest_rank(&[], 50.0), None);
        // p = 0 clamps to the first element rather than underflowing
        let samples = vec![ms(1), ms(2)];
        assert_eq!(nearest_rank(&samples, 0.0), Some(ms(1)));
    }

    #[test]
    fn test_totals_invariant() {
        let outcomes = vec![
            outcome(0, 10, 20, None),
            outcome(1, 20, 20, None),
            outcome(2, 30, 0, Some(ErrorKind::Timeout)),
        ];
        let stats = AggregateStats::from_outcomes("t", "m", 2, &outcomes, ms(60), false);
        assert_eq!(stats.total_issued, 3);
        assert_eq!(stats.total_succeeded + stats.total_failed, stats.total_issued);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.error_counts.get(&ErrorKind::Timeout), Some(&1));
    }

    #[test]
    fn test_percentiles_include_failures() {
        // A timed-out request's elapsed-until-cancel duration still counts.
        let outcomes = vec![
            outcome(0, 10, 20, None),
            outcome(1, 20, 20, None),
            outcome(2, 30, 20, None),
            outcome(3, 40, 20, None),
            outcome(4, 50, 0, Some(ErrorKind::Timeout)),
        ];
        let stats = AggregateStats::from_outcomes("t", "m", 1, &outcomes, ms(150), false);
        assert_eq!(stats.latency_p50_ms, Some(30.0));
        assert_eq!(stats.latency_p99_ms, Some(50.0));
        assert_eq!(stats.latency_max_ms, Some(50.0));
    }

    #[test]
    fn test_throughput_rates() {
        let outcomes = vec![outcome(0, 100, 20, None), outcome(1, 100, 30, None)];
        let stats =
            AggregateStats::from_outcomes("t", "m", 2, &outcomes, Duration::from_secs(1), false);
        assert_eq!(stats.total_tokens, 50);
        assert!((stats.tokens_per_second - 50.0).abs() < 1e-9);
        assert!((stats.requests_per_second - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_tokens_excluded_from_throughput() {
        let outcomes = vec![
            outcome(0, 100, 20, None),
            outcome(1, 100, 0, Some(ErrorKind::Http)),
        ];
        let stats =
            AggregateStats::from_outcomes("t", "m", 1, &outcomes, Duration::from_secs(1), false);
        assert_eq!(stats.total_tokens, 20);
    }

    #[test]
    fn test_empty_run_has_no_rates_or_percentiles() {
        let stats = AggregateStats::from_outcomes("t", "m", 1, &[], Duration::ZERO, true);
        assert_eq!(stats.total_issued, 0);
        assert_eq!(stats.requests_per_second, 0.0);
        assert_eq!(stats.tokens_per_second, 0.0);
        assert_eq!(stats.latency_p50_ms, None);
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn test_merge_discarded_failures() {
        let mut stats = AggregateStats::from_outcomes("t", "m", 1, &[], Duration::ZERO, true);
        let warmup = vec![
            outcome(0, 5, 0, Some(ErrorKind::Connection)),
            outcome(1, 5, 0, Some(ErrorKind::Connection)),
            outcome(2, 5, 20, None),
        ];
        stats.merge_discarded_failures(&warmup);
        assert_eq!(stats.total_issued, 0);
        assert_eq!(stats.error_counts.get(&ErrorKind::Connection), Some(&2));
    }
}
