//! Grouping heuristics.
//!
//! A grouping heuristic consumes the current workflow state together with
//! the makespan estimator and the wait-time oracle and decides what the
//! controller should do at a decision point: submit a placeholder job for
//! a range of levels, switch to individual mode, or do nothing.

pub mod test;
pub mod zhang;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::str::FromStr;

use itertools::Itertools;

use crate::error::Result;
use crate::heuristics::test::TestHeuristic;
use crate::heuristics::zhang::ZhangHeuristic;
use crate::oracle::WaitTimeOracle;
use crate::workflow::Workflow;

/// The decision produced by a grouping heuristic at one decision point.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// Submit a placeholder job for the given level range.
    Submit {
        start_level: usize,
        end_level: usize,
        parallelism: u64,
        /// Requested execution time in seconds, before the submission
        /// fudge factor is applied.
        walltime: f64,
    },
    /// Switch the controller to individual mode.
    Individual,
    /// Nothing to submit at this decision point.
    Idle,
}

/// Read-only view of the controller state handed to a heuristic.
pub struct SchedulingSnapshot<'a> {
    pub workflow: &'a Workflow,
    /// First level that is neither fully completed nor covered by a
    /// running placeholder.
    pub start_level: usize,
    /// Core speed of the batch service hosts, in flops/sec.
    pub core_speed: f64,
    /// Number of hosts managed by the batch service.
    pub num_hosts: u64,
    /// Walltime of the most recently submitted placeholder, in seconds.
    pub parent_runtime: f64,
    /// Maximum requested walltime across running placeholders, in seconds.
    pub running_walltime_max: f64,
    /// Current simulated time.
    pub now: f64,
}

pub trait GroupingHeuristic {
    fn decide(&mut self, snapshot: &SchedulingSnapshot, oracle: &mut WaitTimeOracle) -> Result<Decision>;
}

/// Number of tasks in the widest level of an inclusive level range.
pub fn find_max_tasks(workflow: &Workflow, start_level: usize, end_level: usize) -> u64 {
    (start_level..=end_level)
        .map(|l| workflow.tasks_in_level(l).len() as u64)
        .max()
        .unwrap_or(0)
}

/// Maximum useful parallelism of a level range: the widest level, capped
/// by the cluster size.
pub fn max_parallelism(workflow: &Workflow, start_level: usize, end_level: usize, num_hosts: u64) -> u64 {
    find_max_tasks(workflow, start_level, end_level).min(num_hosts)
}

/// Heuristic selection string of the form `Name[param=value,...]`.
#[derive(Debug, Clone)]
pub struct HeuristicParams {
    name: String,
    params: BTreeMap<String, String>,
}

impl HeuristicParams {
    pub fn from_str(s: &str) -> Option<Self> {
        let open = s.find('[');
        if open.is_none() {
            return Some(Self {
                name: s.to_string(),
                params: BTreeMap::new(),
            });
        }

        let open = open.unwrap();
        if !s.ends_with(']') {
            return None;
        }

        let mut params = BTreeMap::new();
        for param in s[open + 1..s.len() - 1].split(',') {
            let pos = param.find('=')?;
            params.insert(param[..pos].to_string(), param[pos + 1..].to_string());
        }

        Some(Self {
            name: s[..open].to_string(),
            params,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get<T: FromStr, K: AsRef<str>>(&self, name: K) -> Option<T> {
        self.params.get(name.as_ref()).and_then(|s| s.parse().ok())
    }
}

impl std::fmt::Display for HeuristicParams {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(
                f,
                "{}[{}]",
                self.name,
                self.params.iter().map(|(k, v)| format!("{k}={v}")).join(",")
            )
        }
    }
}

pub fn default_heuristic_resolver(params: &HeuristicParams) -> Option<Rc<RefCell<dyn GroupingHeuristic>>> {
    match params.name() {
        "Test" => Some(Rc::new(RefCell::new(TestHeuristic::from_params(params)))),
        "Zhang" => Some(Rc::new(RefCell::new(ZhangHeuristic::from_params(params)))),
        _ => None,
    }
}
