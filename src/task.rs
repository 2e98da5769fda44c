//! Workflow task.

use strum_macros::EnumIter;

/// Represents a workflow task state.
#[derive(Eq, PartialEq, Copy, Clone, Debug, EnumIter)]
pub enum TaskState {
    /// Waiting for its parents to complete.
    NotReady,
    /// All parents are completed, ready to be submitted.
    Ready,
    /// Submitted to the batch service, waiting in the queue.
    Pending,
    /// Task is running.
    Running,
    /// Task is completed.
    Completed,
    /// Task failed.
    Failed,
}

/// Represents a workflow task.
///
/// Described by the amount of computation performed by the task in flops.
/// Parents and children are indices into the owning
/// [Workflow](crate::workflow::Workflow). The top level of a task is its
/// longest-path distance from a source task; levels are assigned by the
/// workflow and are stable for the whole run.
#[derive(Clone, Debug)]
pub struct Task {
    pub name: String,
    /// The amount of computations performed by this task in flops.
    pub flops: f64,
    pub state: TaskState,
    /// Simulated time at which the task first started running.
    pub start_date: Option<f64>,
    pub parents: Vec<usize>,
    pub children: Vec<usize>,
    pub(crate) level: usize,
}

impl Task {
    /// Creates new task.
    pub fn new(name: &str, flops: f64) -> Self {
        Self {
            name: name.to_string(),
            flops,
            state: TaskState::Ready,
            start_date: None,
            parents: Vec::new(),
            children: Vec::new(),
            level: 0,
        }
    }

    /// Top level of this task.
    pub fn level(&self) -> usize {
        self.level
    }
}
