//! Results reporting and formatting.

use crate::metrics::AggregateStats;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

/// Formats aggregate statistics for output. Pure formatting; the only
/// side effect is the string the caller chooses to print.
pub struct ResultsReport;

fn fmt_opt_ms(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}", v),
        None => "-".to_string(),
    }
}

// Free-text fields must not shift the CSV column layout.
fn csv_field(value: &str) -> String {
    value.replace(',', ";")
}

impl ResultsReport {
    /// Format results as a console table.
    pub fn format_table(stats: &AggregateStats) -> String {
        let mut table = Table::new();
        let title = if stats.aborted {
            format!("Load Test Results: {} (ABORTED)", stats.scenario_name)
        } else {
            format!("Load Test Results: {}", stats.scenario_name)
        };
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![title]);

        table.add_row(vec!["Model:", &stats.model_name]);
        table.add_row(vec!["Concurrency:", &format!("{}", stats.concurrency)]);
        table.add_row(vec!["Duration:", &format!("{:.2}s", stats.duration_secs)]);
        table.add_row(vec!["Total Requests:", &format!("{}", stats.total_issued)]);
        table.add_row(vec![
            "Succeeded / Failed:",
            &format!("{} / {}", stats.total_succeeded, stats.total_failed),
        ]);
        table.add_row(vec![
            "Success Rate:",
            &format!("{:.1}%", stats.success_rate() * 100.0),
        ]);
        table.add_row(vec![
            "Requests/sec:",
            &format!("{:.2}", stats.requests_per_second),
        ]);
        table.add_row(vec![
            "Tokens/sec:",
            &format!("{:.2}", stats.tokens_per_second),
        ]);
        table.add_row(vec!["Total Tokens:", &format!("{}", stats.total_tokens)]);

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Latency (ms)", "p50 / p95 / p99 / min / max / mean"]);
        table.add_row(vec![
            "",
            &format!(
                "{} / {} / {} / {} / {} / {}",
                fmt_opt_ms(stats.latency_p50_ms),
                fmt_opt_ms(stats.latency_p95_ms),
                fmt_opt_ms(stats.latency_p99_ms),
                fmt_opt_ms(stats.latency_min_ms),
                fmt_opt_ms(stats.latency_max_ms),
                fmt_opt_ms(stats.latency_mean_ms),
            ),
        ]);

        if !stats.error_counts.is_empty() {
            table.add_row(vec!["", ""]);
            table.add_row(vec!["Errors", ""]);
            for (kind, count) in &stats.error_counts {
                table.add_row(vec![&format!("  {}:", kind), &format!("{}", count)]);
            }
        }

        table.to_string()
    }

    /// Format results as JSON.
    pub fn format_json(stats: &AggregateStats) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(stats)?)
    }

    /// Format results as a CSV row.
    pub fn format_csv(stats: &AggregateStats) -> String {
        format!(
            "{},{},{},{},{},{},{:.2},{:.2},{:.2},{},{},{},{}",
            stats.timestamp,
            csv_field(&stats.scenario_name),
            csv_field(&stats.model_name),
            stats.concurrency,
            stats.duration_secs,
            stats.total_issued,
            stats.requests_per_second,
            stats.tokens_per_second,
            stats.success_rate() * 100.0,
            fmt_opt_ms(stats.latency_p50_ms),
            fmt_opt_ms(stats.latency_p95_ms),
            fmt_opt_ms(stats.latency_p99_ms),
            stats.aborted,
        )
    }

    /// CSV header row.
    pub fn csv_header() -> &'static str {
        "timestamp,scenario,model,concurrency,duration_secs,requests,rps,tokens_per_sec,success_rate,p50,p95,p99,aborted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{AggregateStats, ErrorKind, RequestOutcome};
    use std::time::{Duration, Instant};

    fn sample_stats(aborted: bool) -> AggregateStats {
        let now = Instant::now();
        let outcomes: Vec<RequestOutcome> = (0..4)
            .map(|i| RequestOutcome {
                sequence_id: i,
                started_at: now,
                finished_at: now + Duration::from_millis(100),
                latency: Duration::from_millis(100),
                tokens_generated: 20,
                status: Some(200),
                error: if i == 3 { Some(ErrorKind::Timeout) } else { None },
                error_detail: None,
            })
            .collect();
        AggregateStats::from_outcomes("demo", "m", 2, &outcomes, Duration::from_secs(1), aborted)
    }

    #[test]
    fn test_table_contains_key_fields() {
        let rendered = ResultsReport::format_table(&sample_stats(false));
        assert!(rendered.contains("demo"));
        assert!(rendered.contains("Requests/sec:"));
        assert!(rendered.contains("Tokens/sec:"));
        assert!(rendered.contains("timeout"));
        assert!(!rendered.contains("ABORTED"));
    }

    #[test]
    fn test_table_annotates_aborted_runs() {
        let rendered = ResultsReport::format_table(&sample_stats(true));
        assert!(rendered.contains("ABORTED"));
    }

    #[test]
    fn test_csv_field_count_matches_header() {
        let header_fields = ResultsReport::csv_header().split(',').count();
        let row_fields = ResultsReport::format_csv(&sample_stats(false)).split(',').count();
        assert_eq!(header_fields, row_fields);
    }

    #[test]
    fn test_csv_survives_commas_in_names() {
        let mut stats = sample_stats(false);
        stats.scenario_name = "burst, then steady".to_string();
        stats.model_name = "org/model,v2".to_string();
        let header_fields = ResultsReport::csv_header().split(',').count();
        let row = ResultsReport::format_csv(&stats);
        assert_eq!(row.split(',').count(), header_fields);
        assert!(row.contains("burst; then steady"));
    }

    #[test]
    fn test_json_roundtrip() {
        let stats = sample_stats(false);
        let json = ResultsReport::format_json(&stats).unwrap();
        let parsed: AggregateStats = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.total_issued, stats.total_issued);
        assert_eq!(parsed.error_counts, stats.error_counts);
    }

    #[test]
    fn test_empty_run_renders_dashes() {
        let stats = AggregateStats::from_outcomes("empty", "m", 1, &[], Duration::ZERO, true);
        let rendered = ResultsReport::format_table(&stats);
        assert!(rendered.contains("- / - / - / - / - / -"));
    }
}
