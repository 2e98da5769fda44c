//! Zhang grouping heuristic.

use crate::error::Result;
use crate::estimator::estimate_makespan;
use crate::heuristics::{max_parallelism, Decision, GroupingHeuristic, HeuristicParams, SchedulingSnapshot};
use crate::oracle::WaitTimeOracle;

/// Prefix-growing grouping heuristic.
///
/// Grows the level prefix one level at a time while the wait/run ratio
/// keeps improving. Groupings whose queue wait exceeds their runtime are
/// skipped until the first acceptable one ("giant" guard); if no grouping
/// is ever accepted the whole remaining DAG is submitted as one job.
/// When a parent placeholder is still running, the request is padded with
/// leeway, refined by bisection against the oracle, so the new pilot does
/// not start before the parent finishes.
pub struct ZhangHeuristic {
    /// Reserved: strict parallelism cap. Accepted but currently without
    /// effect.
    #[allow(dead_code)]
    plimit: bool,
}

impl ZhangHeuristic {
    pub fn new(plimit: bool) -> Self {
        Self { plimit }
    }

    pub fn from_params(params: &HeuristicParams) -> Self {
        Self {
            plimit: params.get("plimit").unwrap_or(false),
        }
    }

    /// Finds the best prefix `[start_level, end]` of the remaining DAG.
    /// Returns `(wait, runtime + leeway, end)`.
    fn group_levels(
        &self,
        snapshot: &SchedulingSnapshot,
        oracle: &mut WaitTimeOracle,
        start_level: usize,
        end_level: usize,
    ) -> Result<(f64, f64, usize)> {
        let workflow = snapshot.workflow;
        // runtime of the longest currently running placeholder
        let parent_runtime = snapshot.running_walltime_max;

        let mut giant = true;
        let mut candidate_end_level = start_level;

        let mut best_wait_time = f64::MAX;
        let mut best_run_time = 0.0;
        let mut best_leeway = 0.0;

        while candidate_end_level < end_level {
            let num_nodes = max_parallelism(workflow, start_level, candidate_end_level, snapshot.num_hosts);
            let run_time = estimate_makespan(
                workflow,
                &workflow.tasks_in_range(start_level, candidate_end_level),
                num_nodes,
                snapshot.core_speed,
            )?;
            let mut wait_time = oracle.estimate_wait(num_nodes, run_time, snapshot.now)?;

            let mut leeway = 0.0;
            if wait_time < parent_runtime {
                // pad the request so the pilot cannot start, and expire,
                // before its parent finishes; bisect the padding down while
                // half of it still suffices
                leeway = parent_runtime - wait_time;
                while leeway > 1.0 {
                    wait_time = oracle.estimate_wait(num_nodes, run_time + leeway / 2.0, snapshot.now)?;
                    if wait_time <= parent_runtime {
                        break;
                    }
                    leeway /= 2.0;
                }
            }

            if giant {
                // this grouping would wait longer than it runs, pretend we
                // did not see it
                if wait_time > run_time {
                    candidate_end_level += 1;
                    continue;
                }
                giant = false;
            }

            if wait_time / run_time > best_wait_time / best_run_time {
                break;
            }

            best_wait_time = wait_time;
            best_run_time = run_time;
            best_leeway = leeway;

            candidate_end_level += 1;
        }

        if giant || candidate_end_level == start_level {
            // nothing was accepted, fall back to the whole remaining DAG
            let num_nodes = max_parallelism(workflow, start_level, end_level, snapshot.num_hosts);
            let run_time_all = estimate_makespan(
                workflow,
                &workflow.tasks_in_range(start_level, end_level),
                num_nodes,
                snapshot.core_speed,
            )?;
            let wait_time_all = oracle.estimate_wait(num_nodes, run_time_all, snapshot.now)?;

            best_wait_time = wait_time_all;
            best_run_time = run_time_all;
            best_leeway = (parent_runtime - wait_time_all).max(0.0);
            candidate_end_level = end_level + 1;
        }

        Ok((best_wait_time, best_run_time + best_leeway, candidate_end_level - 1))
    }
}

impl GroupingHeuristic for ZhangHeuristic {
    fn decide(&mut self, snapshot: &SchedulingSnapshot, oracle: &mut WaitTimeOracle) -> Result<Decision> {
        let workflow = snapshot.workflow;
        let start_level = snapshot.start_level;
        let end_level = workflow.num_levels() - 1;

        let (_, partial_walltime, partial_end_level) =
            self.group_levels(snapshot, oracle, start_level, end_level)?;

        // estimates for the remaining DAG as a single job, for the
        // individual-mode check
        let all_nodes = max_parallelism(workflow, start_level, end_level, snapshot.num_hosts);
        let run_time_all = estimate_makespan(
            workflow,
            &workflow.tasks_in_range(start_level, end_level),
            all_nodes,
            snapshot.core_speed,
        )?;
        let wait_time_all = oracle.estimate_wait(all_nodes, run_time_all, snapshot.now)?;

        if partial_end_level == end_level && wait_time_all > 2.0 * run_time_all {
            return Ok(Decision::Individual);
        }

        let parallelism = max_parallelism(workflow, start_level, partial_end_level, snapshot.num_hosts);
        Ok(Decision::Submit {
            start_level,
            end_level: partial_end_level,
            parallelism,
            walltime: partial_walltime,
        })
    }
}
