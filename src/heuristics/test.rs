//! Test grouping heuristic.

use crate::error::{Error, Result};
use crate::estimator::estimate_makespan;
use crate::heuristics::{find_max_tasks, Decision, GroupingHeuristic, HeuristicParams, SchedulingSnapshot};
use crate::oracle::WaitTimeOracle;

/// A split whose leeway exceeds this fraction of the second job's runtime
/// is rejected.
const LEEWAY_BOUND: f64 = 0.10;

/// Two-way-split grouping heuristic.
///
/// Compares running the remaining DAG as one job against every possible
/// prefix/remainder split. For each candidate range the best node count is
/// searched exhaustively, subject to a bound on the wasted fraction of the
/// allocation. A split that would leave the second job waiting behind the
/// first for more than a tenth of its own runtime is rejected, and the
/// first accepted split additionally has to beat the whole-DAG baseline by
/// the configured margin.
pub struct TestHeuristic {
    waste_bound: f64,
    beat_bound: f64,
}

impl TestHeuristic {
    pub fn new(waste_bound: f64, beat_bound: f64) -> Self {
        Self {
            waste_bound,
            beat_bound,
        }
    }

    pub fn from_params(params: &HeuristicParams) -> Self {
        Self {
            waste_bound: params.get("waste_bound").unwrap_or(1.0),
            beat_bound: params.get("beat_bound").unwrap_or(0.0),
        }
    }

    /// Searches the node count minimizing wait plus makespan for the given
    /// level range, rejecting candidates that violate the waste bound.
    /// Returns `(wait, makespan, num_hosts)`.
    fn best_num_hosts(
        &self,
        snapshot: &SchedulingSnapshot,
        oracle: &mut WaitTimeOracle,
        start_level: usize,
        end_level: usize,
    ) -> Result<(f64, f64, u64)> {
        let workflow = snapshot.workflow;
        let max_tasks = find_max_tasks(workflow, start_level, end_level);
        if max_tasks == 0 {
            return Err(Error::InvalidArgument(format!(
                "no tasks in levels {}-{}",
                start_level, end_level
            )));
        }

        // serial work of the range, for the waste ratio
        let mut serial_time = 0.0;
        for level in start_level..=end_level {
            serial_time += estimate_makespan(workflow, workflow.tasks_in_level(level), 1, snapshot.core_speed)?;
        }

        let tasks = workflow.tasks_in_range(start_level, end_level);
        let mut best = (f64::MAX, f64::MAX, 1u64);
        for num_hosts in 1..=max_tasks {
            let makespan = estimate_makespan(workflow, &tasks, num_hosts, snapshot.core_speed)?;
            let wait = oracle.estimate_wait(num_hosts, makespan, snapshot.now)?;

            let allocation = num_hosts as f64 * makespan;
            if (allocation - serial_time) / allocation > self.waste_bound {
                continue;
            }

            if best.0 + best.1 > wait + makespan {
                best = (wait, makespan, num_hosts);
            }
        }
        Ok(best)
    }
}

impl GroupingHeuristic for TestHeuristic {
    fn decide(&mut self, snapshot: &SchedulingSnapshot, oracle: &mut WaitTimeOracle) -> Result<Decision> {
        let workflow = snapshot.workflow;
        let start_level = snapshot.start_level;
        let num_levels = workflow.num_levels();
        let end_level = num_levels - 1;

        // best node counts for every prefix [start_level, i] and every
        // suffix [i, end_level]
        let mut prefix = Vec::with_capacity(num_levels - start_level);
        for i in start_level..num_levels {
            prefix.push(self.best_num_hosts(snapshot, oracle, start_level, i)?);
        }
        let mut suffix = Vec::with_capacity(num_levels - start_level);
        for i in start_level..num_levels {
            suffix.push(self.best_num_hosts(snapshot, oracle, i, end_level)?);
        }

        let (wait_all, run_all, hosts_all) = suffix[0];
        let mut best_total_time = wait_all + run_all;
        let mut partial_end_level = end_level;
        let (mut wait, mut run, mut hosts) = (wait_all, run_all, hosts_all);

        for i in start_level..end_level {
            let (wait_one, run_one, hosts_one) = prefix[i - start_level];
            let (wait_two, run_two, _) = suffix[i + 1 - start_level];

            // leeway the first job needs so the second one does not start
            // before it finishes
            let mut leeway = run_one - wait_two;
            if leeway > 0.0 {
                if leeway > run_two * LEEWAY_BOUND {
                    continue;
                }
            } else {
                leeway = 0.0;
            }

            let total_time = wait_one + run_one.max(wait_two) + run_two + leeway;

            // only the first split has to beat the whole-DAG incumbent by
            // the beat bound
            let adjusted_time = if partial_end_level == end_level {
                total_time * (1.0 + self.beat_bound)
            } else {
                total_time
            };

            if adjusted_time < best_total_time {
                best_total_time = total_time;
                partial_end_level = i;
                wait = wait_one;
                run = run_one;
                hosts = hosts_one;
            }
        }

        if partial_end_level == end_level && wait_all > 2.0 * run_all {
            return Ok(Decision::Individual);
        }

        let mut walltime = run;
        if snapshot.parent_runtime > wait {
            walltime += snapshot.parent_runtime - wait;
        }
        Ok(Decision::Submit {
            start_level,
            end_level: partial_end_level,
            parallelism: hosts,
            walltime,
        })
    }
}
