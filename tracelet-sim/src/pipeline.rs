//! The simulated CDNN processing pipeline.
//!
//! Four sequential stages stand in for a small ML serving workload: data
//! preprocessing, a database query, model inference and an external API
//! call. Each round opens one transaction, runs the stages under spans,
//! records a metric-bearing message per successful stage and captures an
//! exception on an injected failure. Timing and failure draws live behind
//! [`Workload`] so tests can run deterministically with zero delays.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use thiserror::Error;
use tracelet::{Outcome, Severity, TraceContext, TransactionHandle};

/// Name and timing profile of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    /// Stage name, used as the span name.
    pub name: &'static str,
    /// Span kind, e.g. `app` or `db`.
    pub kind: &'static str,
    /// Lower bound of the simulated stage duration, in milliseconds.
    pub min_ms: u64,
    /// Upper bound of the simulated stage duration, in milliseconds.
    pub max_ms: u64,
}

/// The pipeline stages, in execution order.
pub const STAGES: [StageSpec; 4] = [
    StageSpec {
        name: "data_preprocessing",
        kind: "app",
        min_ms: 1_000,
        max_ms: 2_500,
    },
    StageSpec {
        name: "database_query",
        kind: "db",
        min_ms: 2_000,
        max_ms: 4_000,
    },
    StageSpec {
        name: "model_inference",
        kind: "ml",
        min_ms: 3_000,
        max_ms: 7_000,
    },
    StageSpec {
        name: "external_api_call",
        kind: "external",
        min_ms: 500,
        max_ms: 2_000,
    },
];

/// Name of the transaction opened per pipeline round.
pub const TRANSACTION_NAME: &str = "cdnn_pipeline";

/// Errors reported by a pipeline round.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Simulated business-logic failure inside a stage. This is the only
    /// error the pipeline reports under normal operation; it has already
    /// been captured as an exception event by the time it propagates.
    #[error("stage {stage} failed on round {round}: {reason}")]
    StageFailed {
        /// The stage that failed.
        stage: &'static str,
        /// Zero-based round index.
        round: usize,
        /// Failure description.
        reason: String,
    },

    /// Instrumentation-lifecycle misuse. Never expected from a correct
    /// driver; surfaced rather than swallowed because it indicates a bug.
    #[error(transparent)]
    Instrumentation(#[from] tracelet::Error),
}

/// Timing, failure and metric sources of the simulation.
///
/// Production uses [`Workload::randomized`]; tests use [`Workload::instant`]
/// with a scripted failure plan and zero delays.
pub struct Workload {
    delay: Box<dyn FnMut(Duration) + Send>,
    duration: Box<dyn FnMut(&StageSpec) -> Duration + Send>,
    fail: Box<dyn FnMut(&StageSpec, usize) -> bool + Send>,
    metrics: Box<dyn FnMut(&StageSpec) -> String + Send>,
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Workload")
    }
}

impl Workload {
    /// Real-time workload: sleeps through stage durations drawn uniformly
    /// from each stage's range and injects failures at `failure_rate` per
    /// stage draw.
    pub fn randomized(failure_rate: f64) -> Self {
        let mut duration_rng = StdRng::from_entropy();
        let mut fail_rng = StdRng::from_entropy();
        let mut metrics_rng = StdRng::from_entropy();
        Workload {
            delay: Box::new(std::thread::sleep),
            duration: Box::new(move |stage| {
                Duration::from_millis(duration_rng.gen_range(stage.min_ms..=stage.max_ms))
            }),
            fail: Box::new(move |_, _| fail_rng.gen_bool(failure_rate)),
            metrics: Box::new(move |stage| describe_stage(stage, &mut metrics_rng)),
        }
    }

    /// Zero-delay workload with a scripted failure plan; `fail` receives the
    /// stage and the zero-based round index.
    pub fn instant<F>(fail: F) -> Self
    where
        F: FnMut(&StageSpec, usize) -> bool + Send + 'static,
    {
        Workload {
            delay: Box::new(|_| {}),
            duration: Box::new(|stage| Duration::from_millis(stage.min_ms)),
            fail: Box::new(fail),
            metrics: Box::new(|stage| format!("{} completed", stage.name)),
        }
    }

    fn pause(&mut self, duration: Duration) {
        (self.delay)(duration);
    }
}

// Metric flavor matching the workload being imitated.
fn describe_stage(stage: &StageSpec, rng: &mut StdRng) -> String {
    match stage.name {
        "data_preprocessing" => {
            format!("processed {} samples", rng.gen_range(1_000..=5_000))
        }
        "database_query" => format!("retrieved {} records", rng.gen_range(100..=1_000)),
        "model_inference" => format!(
            "batch size {}, accuracy {:.2}",
            rng.gen_range(32..=128),
            rng.gen_range(0.85..=0.98)
        ),
        _ => format!(
            "api responded in {:.2}s",
            rng.gen_range(0.5..=2.0)
        ),
    }
}

/// Summary of one completed round.
#[derive(Debug, Clone, Copy)]
pub struct RoundReport {
    /// Zero-based round index.
    pub round: usize,
    /// The transaction recorded for this round.
    pub transaction: TransactionHandle,
    /// Number of stages that ran to completion.
    pub stages_completed: usize,
}

/// Runs one pipeline round under a fresh transaction.
///
/// On an injected failure the failing stage's span closes with outcome
/// [`Outcome::Error`], an exception event is captured against it, later
/// stages never open, the transaction ends with outcome `Error` and the
/// failure propagates to the caller.
pub fn run_round(
    cx: &TraceContext,
    workload: &mut Workload,
    round: usize,
) -> Result<RoundReport, PipelineError> {
    let transaction = cx.begin(TRANSACTION_NAME, "request")?;

    for (index, stage) in STAGES.iter().enumerate() {
        let span = cx.start_span(stage.name, stage.kind)?;
        let elapsed = (workload.duration)(stage);
        (workload.delay)(elapsed);

        if (workload.fail)(stage, round) {
            let err = PipelineError::StageFailed {
                stage: stage.name,
                round,
                reason: "injected failure".to_owned(),
            };
            cx.capture_exception(&err)?;
            cx.end_span(span, Outcome::Error)?;
            cx.end(Outcome::Error)?;
            tracing::warn!(
                name: "stage_failed",
                stage = stage.name,
                round,
                stages_completed = index,
            );
            return Err(err);
        }

        cx.capture_message((workload.metrics)(stage), Severity::Info)?;
        cx.end_span(span, Outcome::Success)?;
        tracing::debug!(name: "stage_done", stage = stage.name, elapsed_ms = elapsed.as_millis() as u64);
    }

    cx.end(Outcome::Success)?;
    Ok(RoundReport {
        round,
        transaction,
        stages_completed: STAGES.len(),
    })
}

/// Runs `rounds` pipeline rounds, pausing `pause` between rounds (skipped
/// after the final round). Per-round failures are recorded in the returned
/// results; they never abort the remaining rounds.
pub fn run(
    cx: &TraceContext,
    workload: &mut Workload,
    rounds: usize,
    pause: Duration,
) -> Vec<Result<RoundReport, PipelineError>> {
    let mut results = Vec::with_capacity(rounds);
    for round in 0..rounds {
        tracing::info!(name: "round_start", round = round + 1, rounds);
        results.push(run_round(cx, workload, round));
        if round + 1 < rounds {
            workload.pause(pause);
        }
    }
    results
}
