//! Pipeline simulation driver.
//!
//! Usage: `tracelet-sim [ROUNDS [PAUSE_SECS]]`, with `TRACELET_SIM_*` and
//! `TRACELET_*` environment variables filling in the rest. Batches go to
//! stdout as JSON lines; diagnostics go to stderr via `tracing`.

use tracelet::{Client, ClientConfig};
use tracelet_sim::pipeline::{self, Workload};
use tracelet_sim::SimConfig;
use tracing_subscriber::EnvFilter;

const FAILURE_RATE: f64 = 0.2;

fn main() {
    let config = ClientConfig::default();
    init_logging(&config);

    let sim = SimConfig::from_args_and_env(std::env::args().skip(1));
    tracing::info!(
        name: "sim_start",
        service = %config.service_name,
        rounds = sim.rounds,
        pause_secs = sim.pause.as_secs(),
        failure_rate = FAILURE_RATE,
    );

    let client = Client::builder().with_config(config).build();
    let cx = client.context();
    let mut workload = Workload::randomized(FAILURE_RATE);

    let results = pipeline::run(&cx, &mut workload, sim.rounds, sim.pause);
    let mut succeeded = 0usize;
    for result in &results {
        match result {
            Ok(report) => {
                succeeded += 1;
                tracing::info!(
                    name: "round_done",
                    round = report.round + 1,
                    transaction = %report.transaction.id(),
                    stages_completed = report.stages_completed,
                );
            }
            Err(err) => {
                tracing::warn!(name: "round_failed", error = %err);
            }
        }
    }
    tracing::info!(name: "sim_done", rounds = results.len(), succeeded);

    // Delivery problems are already logged by the worker; a failed drain
    // must not turn a completed simulation into a nonzero exit.
    if let Err(err) = client.shutdown() {
        tracing::warn!(name: "shutdown_failed", error = %err);
    }
}

fn init_logging(config: &ClientConfig) {
    let default_level = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
