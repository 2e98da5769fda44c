//! Run metrics.

use std::io::Write;

use serde::{Deserialize, Serialize};

/// Contains metrics collected from a controller run.
///
/// All accumulators are updated monotonically; the summary is emitted on
/// shutdown.
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
pub struct Metrics {
    /// Total time pilot jobs spent waiting in the batch queue (in seconds).
    pub total_queue_wait_time: f64,
    /// Node-seconds spent executing completed tasks.
    pub used_node_seconds: f64,
    /// Node-seconds reserved by pilot jobs but not spent on completed tasks.
    pub wasted_node_seconds: f64,
    /// The number of pilot jobs that expired while some of their tasks were
    /// still unfinished.
    pub num_pilot_expirations_with_remaining_tasks: u64,
    /// The number of times the remaining workflow was split.
    pub number_of_splits: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_queue_wait(&mut self, seconds: f64) {
        self.total_queue_wait_time += seconds;
    }

    pub fn add_used_node_seconds(&mut self, seconds: f64) {
        self.used_node_seconds += seconds;
    }

    pub fn add_wasted_node_seconds(&mut self, seconds: f64) {
        self.wasted_node_seconds += seconds;
    }

    pub fn register_expiration_with_remaining_tasks(&mut self) {
        self.num_pilot_expirations_with_remaining_tasks += 1;
    }

    pub fn register_split(&mut self) {
        self.number_of_splits += 1;
    }

    /// Writes the fixed shutdown summary.
    pub fn write_summary<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "#SPLITS={}", self.number_of_splits)
    }
}
