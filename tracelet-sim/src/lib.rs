//! Simulated multi-stage ML pipeline instrumented with the `tracelet`
//! client. The binary drives [`pipeline::run`] against a stdout sink; the
//! library surface exists so scenario tests can drive the same pipeline
//! against an in-memory sink.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(test, deny(warnings))]

pub mod pipeline;

pub use pipeline::{run, run_round, PipelineError, RoundReport, StageSpec, Workload, STAGES};

use std::str::FromStr;
use std::time::Duration;

/// Number of pipeline rounds to run.
pub const TRACELET_SIM_ROUNDS: &str = "TRACELET_SIM_ROUNDS";
/// Default number of rounds.
pub const TRACELET_SIM_ROUNDS_DEFAULT: usize = 3;
/// Pause between rounds, in seconds.
pub const TRACELET_SIM_PAUSE_SECS: &str = "TRACELET_SIM_PAUSE_SECS";
/// Default inter-round pause.
pub const TRACELET_SIM_PAUSE_SECS_DEFAULT: u64 = 5;

/// Run count and inter-round delay, the only externally tunable driver
/// parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Number of pipeline rounds.
    pub rounds: usize,
    /// Pause between rounds, skipped after the final one.
    pub pause: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            rounds: TRACELET_SIM_ROUNDS_DEFAULT,
            pause: Duration::from_secs(TRACELET_SIM_PAUSE_SECS_DEFAULT),
        }
    }
}

impl SimConfig {
    /// Builds the configuration from positional arguments
    /// (`tracelet-sim [ROUNDS [PAUSE_SECS]]`), falling back to the
    /// `TRACELET_SIM_*` environment variables and then the defaults.
    /// Unparseable values are ignored.
    pub fn from_args_and_env<I: Iterator<Item = String>>(mut args: I) -> Self {
        let mut config = SimConfig::default();

        if let Some(rounds) = std::env::var(TRACELET_SIM_ROUNDS)
            .ok()
            .and_then(|raw| usize::from_str(&raw).ok())
        {
            config.rounds = rounds;
        }
        if let Some(pause) = std::env::var(TRACELET_SIM_PAUSE_SECS)
            .ok()
            .and_then(|raw| u64::from_str(&raw).ok())
        {
            config.pause = Duration::from_secs(pause);
        }

        if let Some(rounds) = args.next().and_then(|raw| usize::from_str(&raw).ok()) {
            config.rounds = rounds;
        }
        if let Some(pause) = args.next().and_then(|raw| u64::from_str(&raw).ok()) {
            config.pause = Duration::from_secs(pause);
        }

        config
    }
}
