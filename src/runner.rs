//! Load run orchestration: warmup, bounded-concurrency dispatch, collection.

use crate::client::InferenceClient;
use crate::config::RunConfig;
use crate::metrics::{AggregateStats, ErrorKind, RequestOutcome};
use crate::prompts::PromptGenerator;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Consecutive connection failures that flip the run into fatal abort.
const FATAL_CONNECTION_STREAK: u32 = 5;

/// Run phases. Transitions are driven only by dispatch and completion
/// events; `Completed` is terminal and a runner executes exactly one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Warming,
    Running,
    Draining,
    Completed,
}

/// One JSONL record per measured request when request logging is enabled.
#[derive(Debug, Serialize)]
pub struct RequestLog {
    pub sequence_id: u64,
    /// Milliseconds from the start of the measured phase to dispatch.
    pub offset_ms: u64,
    pub latency_ms: f64,
    pub tokens_generated: u64,
    pub status: Option<u16>,
    pub error: Option<ErrorKind>,
}

/// Everything a finished run produces: the aggregate plus the retained
/// per-request outcomes for external logging or inspection.
pub struct RunSummary {
    pub stats: AggregateStats,
    pub outcomes: Vec<RequestOutcome>,
    pub aborted: bool,
    /// Where the per-request JSONL stream was written, when enabled.
    pub request_log_path: Option<PathBuf>,
}

struct PhaseOutput {
    outcomes: Vec<RequestOutcome>,
    started: Instant,
    wall_clock: Duration,
    aborted: bool,
}

/// Drives a complete load run against the configured endpoint.
pub struct LoadRunner {
    config: Arc<RunConfig>,
    client: Arc<InferenceClient>,
    phase: Phase,
    next_sequence_id: u64,
}

impl LoadRunner {
    /// Build a runner from a validated configuration. Fails only on a
    /// structurally invalid config; no request is issued here.
    pub fn new(config: RunConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let client = InferenceClient::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            client: Arc::new(client),
            phase: Phase::Idle,
            next_sequence_id: 0,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Execute the run: warmup, measured phase, drain, aggregate.
    ///
    /// Per-request failures never stop the run; only a sustained streak of
    /// connection failures aborts it early, in which case the summary is
    /// computed over whatever outcomes were collected and flagged as
    /// aborted.
    pub async fn run(&mut self) -> anyhow::Result<RunSummary> {
        if self.phase != Phase::Idle {
            anyhow::bail!("a LoadRunner executes exactly one run");
        }

        let mut generator = PromptGenerator::new(&self.config);
        let connection_streak = Arc::new(AtomicU32::new(0));

        info!(
            scenario = %self.config.name,
            model = %self.config.model_name,
            endpoint = %self.config.endpoint_url(),
            total_requests = self.config.total_requests,
            concurrency = self.config.concurrency,
            "starting load run"
        );

        // Warmup primes connections and the server's first batch; its
        // outcomes are excluded from the aggregate.
        let warmup = if self.config.warmup_requests > 0 {
            self.phase = Phase::Warming;
            info!(requests = self.config.warmup_requests, "warmup phase");
            Some(
                self.dispatch_phase(
                    self.config.warmup_requests,
                    &mut generator,
                    &connection_streak,
                    false,
                )
                .await?,
            )
        } else {
            None
        };

        let warmup_aborted = warmup.as_ref().map(|p| p.aborted).unwrap_or(false)
            || connection_streak.load(Ordering::Relaxed) >= FATAL_CONNECTION_STREAK;

        let main = if warmup_aborted {
            warn!("endpoint unreachable during warmup, aborting before the measured phase");
            None
        } else {
            self.phase = Phase::Running;
            info!(requests = self.config.total_requests, "measured phase");
            Some(
                self.dispatch_phase(
                    self.config.total_requests,
                    &mut generator,
                    &connection_streak,
                    true,
                )
                .await?,
            )
        };

        self.phase = Phase::Completed;

        let aborted = warmup_aborted || main.as_ref().map(|p| p.aborted).unwrap_or(false);
        let (outcomes, phase_start, wall_clock) = match main {
            Some(p) => (p.outcomes, Some(p.started), p.wall_clock),
            None => (Vec::new(), None, Duration::ZERO),
        };

        let mut stats = AggregateStats::from_outcomes(
            &self.config.name,
            &self.config.model_name,
            self.config.concurrency,
            &outcomes,
            wall_clock,
            aborted,
        );
        if warmup_aborted {
            if let Some(p) = &warmup {
                stats.merge_discarded_failures(&p.outcomes);
            }
        }

        let mut request_log_path = None;
        if self.config.log_requests {
            if let Some(start) = phase_start {
                match write_request_log(&self.config.name, &outcomes, start) {
                    Ok(path) => request_log_path = Some(path),
                    Err(e) => warn!(error = %e, "failed to write request log"),
                }
            }
        }

        if aborted {
            warn!(
                collected = outcomes.len(),
                "run aborted early, reporting partial statistics"
            );
        } else {
            info!(
                collected = outcomes.len(),
                duration_secs = stats.duration_secs,
                "run complete"
            );
        }

        Ok(RunSummary {
            stats,
            outcomes,
            aborted,
            request_log_path,
        })
    }

    /// Dispatch `count` requests with admission gated on a semaphore sized
    /// to the concurrency ceiling, and collect exactly one outcome per
    /// dispatched request. Closed-loop: a new call is admitted only when a
    /// slot frees up, so throughput follows the server's answer rate.
    async fn dispatch_phase(
        &mut self,
        count: u64,
        generator: &mut PromptGenerator,
        connection_streak: &Arc<AtomicU32>,
        measured: bool,
    ) -> anyhow::Result<PhaseOutput> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency as usize));
        let (tx, mut rx) = mpsc::unbounded_channel::<RequestOutcome>();

        let progress = if measured && count > 0 {
            let bar = ProgressBar::new(count);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                    .map_err(|e| anyhow::anyhow!("invalid progress bar template: {e}"))?
                    .progress_chars("##-"),
            );
            Some(bar)
        } else {
            None
        };

        let started = Instant::now();
        let mut collected: Vec<RequestOutcome> = Vec::with_capacity(count as usize);
        let mut dispatched: u64 = 0;
        let mut aborted = false;

        while dispatched < count {
            // Admission waits for a free slot; the in-flight count can
            // never exceed the configured concurrency.
            let permit = semaphore.clone().acquire_owned().await?;

            // Pick up finished outcomes so the abort check below sees the
            // freshest failure streak.
            while let Ok(outcome) = rx.try_recv() {
                record_outcome(outcome, &mut collected, progress.as_ref());
            }

            if connection_streak.load(Ordering::Relaxed) >= FATAL_CONNECTION_STREAK {
                aborted = true;
                break;
            }

            let sequence_id = self.next_sequence_id;
            self.next_sequence_id += 1;
            let prompt = generator.next_prompt();
            let client = self.client.clone();
            let streak = connection_streak.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let outcome = client.execute(sequence_id, &prompt).await;
                match outcome.error {
                    Some(ErrorKind::Connection) => {
                        streak.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => streak.store(0, Ordering::Relaxed),
                }
                // Receiver outlives all senders; a send failure would mean
                // the collector is gone, which only happens after drain.
                let _ = tx.send(outcome);
                drop(permit);
            });
            dispatched += 1;
        }
        drop(tx);

        // Drain: no new admissions, in-flight calls run to completion or
        // their own timeout.
        if measured {
            self.phase = Phase::Draining;
            if let Some(bar) = &progress {
                bar.set_message("draining in-flight requests");
            }
        }
        while let Some(outcome) = rx.recv().await {
            record_outcome(outcome, &mut collected, progress.as_ref());
        }

        if let Some(bar) = &progress {
            bar.finish_with_message("done");
        }

        // Wall clock: first dispatch of the phase to last completion.
        let wall_clock = collected
            .iter()
            .map(|o| o.finished_at)
            .max()
            .map(|end| end.duration_since(started))
            .unwrap_or(Duration::ZERO);

        debug!(
            dispatched,
            collected = collected.len(),
            aborted,
            measured,
            "phase finished"
        );

        Ok(PhaseOutput {
            outcomes: collected,
            started,
            wall_clock,
            aborted,
        })
    }
}

fn record_outcome(
    outcome: RequestOutcome,
    collected: &mut Vec<RequestOutcome>,
    progress: Option<&ProgressBar>,
) {
    if let Some(kind) = outcome.error {
        debug!(
            sequence_id = outcome.sequence_id,
            kind = %kind,
            detail = outcome.error_detail.as_deref().unwrap_or(""),
            "request failed"
        );
    }
    if let Some(bar) = progress {
        bar.inc(1);
    }
    collected.push(outcome);
}

/// Write one JSONL record per measured request for external logging or
/// metrics-export pipelines.
fn write_request_log(
    scenario_name: &str,
    outcomes: &[RequestOutcome],
    phase_start: Instant,
) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all("results")?;
    let name = scenario_name.replace(' ', "_").to_lowercase();
    let path = PathBuf::from(format!(
        "results/{}_{}.jsonl",
        name,
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    ));
    let file = File::create(&path)?;
    let mut writer = BufWriter::new(file);
    for outcome in outcomes {
        let record = RequestLog {
            sequence_id: outcome.sequence_id,
            offset_ms: outcome
                .started_at
                .saturating_duration_since(phase_start)
                .as_millis() as u64,
            latency_ms: outcome.latency.as_secs_f64() * 1000.0,
            tokens_generated: outcome.tokens_generated,
            status: outcome.status,
            error: outcome.error,
        };
        writeln!(writer, "{}", serde_json::to_string(&record)?)?;
    }
    writer.flush()?;
    info!(path = %path.display(), requests = outcomes.len(), "request log written");
    Ok(path)
}
