//! Batch compute service interface.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use thiserror::Error;

/// Identifier of a pilot job issued by the batch service.
pub type PilotJobId = u64;
/// Identifier of a standard (single-task) job issued by the batch service.
pub type StandardJobId = u64;

/// Service-specific arguments attached to a batch submission.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct ServiceArgs {
    pub nodes: u64,
    pub cores_per_node: u32,
    pub walltime_min: u64,
}

impl ServiceArgs {
    pub fn new(nodes: u64, walltime_min: u64) -> Self {
        Self {
            nodes,
            cores_per_node: 1,
            walltime_min,
        }
    }

    /// The `-N`/`-c`/`-t` mapping expected by batch schedulers.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("-N".to_string(), self.nodes.to_string()),
            ("-c".to_string(), self.cores_per_node.to_string()),
            ("-t".to_string(), self.walltime_min.to_string()),
        ])
    }
}

/// A start-time-estimate query for a hypothetical job configuration.
#[derive(Clone, Debug)]
pub struct ProbeRequest {
    pub id: String,
    pub nodes: u64,
    pub cores_per_node: u32,
    /// Requested walltime in seconds.
    pub walltime: f64,
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("job is already terminated")]
    AlreadyTerminated,
    #[error("batch service failure: {0}")]
    ServiceFailure(String),
}

/// Interface of the batch compute service consumed by the controller.
///
/// Submissions are asynchronous: the service answers with
/// [PilotJobStarted], [PilotJobExpired], [StandardJobCompleted] and
/// [StandardJobFailed] events delivered through the simulation.
pub trait BatchService {
    /// Mapping from host id to its core speed in flops/sec.
    fn core_flop_rate(&self) -> BTreeMap<String, f64>;

    /// Number of hosts managed by the service.
    fn num_hosts(&self) -> u64;

    /// Submits a pilot job reserving `args.nodes` nodes for
    /// `args.walltime_min` minutes.
    fn submit_pilot_job(&mut self, args: ServiceArgs) -> PilotJobId;

    /// Submits a single-task standard job against the batch queue.
    fn submit_standard_job(&mut self, task: usize, flops: f64, args: ServiceArgs) -> StandardJobId;

    /// Submits a single-task standard job into a running pilot's reservation.
    fn submit_to_pilot(&mut self, pilot: PilotJobId, task: usize, flops: f64) -> StandardJobId;

    /// Predicted absolute start times for the given probe configurations.
    /// A negative value means the configuration is unschedulable.
    fn start_time_estimates(&self, probes: &[ProbeRequest]) -> Result<HashMap<String, f64>, BatchError>;

    /// Terminates a pilot job: a queued pilot is dequeued, a running one
    /// releases its nodes.
    fn terminate_pilot_job(&mut self, pilot: PilotJobId) -> Result<(), BatchError>;
}

/// A pilot job left the queue and acquired its nodes.
#[derive(Clone, Serialize)]
pub struct PilotJobStarted {
    pub pilot: PilotJobId,
    pub submit_time: f64,
}

/// A pilot job reached the end of its requested walltime.
#[derive(Clone, Serialize)]
pub struct PilotJobExpired {
    pub pilot: PilotJobId,
}

/// A standard job finished successfully.
#[derive(Clone, Serialize)]
pub struct StandardJobCompleted {
    pub job: StandardJobId,
    pub task: usize,
}

/// A standard job was killed before completing.
#[derive(Clone, Serialize)]
pub struct StandardJobFailed {
    pub job: StandardJobId,
    pub task: usize,
}
