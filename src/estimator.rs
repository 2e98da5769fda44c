//! Makespan estimation for task subsets.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::workflow::Workflow;

/// Estimates the makespan of a set of tasks executed on `num_hosts`
/// identical single-core hosts of the given speed.
///
/// Runs a list-scheduling simulation over the given subset only. For any
/// task with parents outside of the subset, those parents are assumed
/// completed; a task with no parents in the subset is ready at time zero.
/// Tasks are scheduled in insertion order and placed on the lowest-indexed
/// idle host, so identical inputs always yield identical estimates.
///
/// Returns 0 for an empty subset and fails if `num_hosts` is zero.
pub fn estimate_makespan(
    workflow: &Workflow,
    tasks: &[usize],
    num_hosts: u64,
    core_speed: f64,
) -> Result<f64> {
    if num_hosts == 0 {
        return Err(Error::InvalidArgument(
            "cannot estimate makespan with 0 hosts".to_string(),
        ));
    }
    if tasks.is_empty() {
        return Ok(0.0);
    }

    let mut idle = vec![0.0f64; num_hosts as usize];
    // completion time of each subset task, -1 while unscheduled
    let mut finish = vec![-1.0f64; tasks.len()];
    let position: HashMap<usize, usize> = tasks.iter().enumerate().map(|(i, &t)| (t, i)).collect();

    let mut num_scheduled = 0;
    let mut current = 0.0f64;
    while num_scheduled < tasks.len() {
        let mut scheduled_something = false;

        for i in 0..tasks.len() {
            if finish[i] >= 0.0 {
                continue;
            }
            let schedulable = workflow.task(tasks[i]).parents.iter().all(|parent| {
                match position.get(parent) {
                    Some(&k) => finish[k] >= 0.0 && finish[k] <= current,
                    None => true,
                }
            });
            if !schedulable {
                continue;
            }
            for host in idle.iter_mut() {
                if *host <= current {
                    let completion = current + workflow.task(tasks[i]).flops / core_speed;
                    finish[i] = completion;
                    *host = completion;
                    scheduled_something = true;
                    num_scheduled += 1;
                    break;
                }
            }
        }

        if num_scheduled == tasks.len() {
            break;
        }
        if scheduled_something {
            current = idle.iter().copied().fold(f64::INFINITY, f64::min);
        } else {
            // next event time: the earliest host release strictly after now
            current = idle
                .iter()
                .copied()
                .filter(|&t| t > current)
                .fold(f64::INFINITY, f64::min);
        }
    }

    Ok(idle.iter().copied().fold(0.0, f64::max))
}
