//! Workflow execution controller.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;
use strum::IntoEnumIterator;

use dslab_core::cast;
use dslab_core::context::SimulationContext;
use dslab_core::event::Event;
use dslab_core::handler::EventHandler;
use dslab_core::{log_debug, log_error, log_info};

use crate::batch::{
    BatchError, BatchService, PilotJobExpired, PilotJobId, PilotJobStarted, ServiceArgs, StandardJobCompleted,
    StandardJobFailed, StandardJobId,
};
use crate::config::Config;
use crate::error::Error;
use crate::heuristics::{Decision, GroupingHeuristic, SchedulingSnapshot};
use crate::metrics::Metrics;
use crate::oracle::WaitTimeOracle;
use crate::placeholder::PlaceholderJob;
use crate::task::TaskState;
use crate::workflow::Workflow;

/// Requested execution times are padded by this factor at submission.
pub const EXEC_FUDGE: f64 = 1.1;

/// Starts workflow execution.
#[derive(Clone, Serialize)]
pub struct Start {}

/// Drives the execution of a workflow through pilot jobs on a batch service.
///
/// Maintains the pending and running placeholder jobs, invokes the grouping
/// heuristic at every decision point, dispatches ready tasks into running
/// pilots (or, in individual mode, as single-node batch jobs) and accounts
/// queue wait and node waste.
pub struct Controller {
    workflow: Workflow,
    batch: Rc<RefCell<dyn BatchService>>,
    heuristic: Rc<RefCell<dyn GroupingHeuristic>>,
    config: Config,
    oracle: WaitTimeOracle,
    core_speed: f64,
    number_of_hosts: u64,
    pending_placeholder: Option<PlaceholderJob>,
    running_placeholders: Vec<PlaceholderJob>,
    individual_mode: bool,
    // walltime of the most recently submitted placeholder, used by the
    // Test heuristic as a lower bound for the next placeholder's walltime
    parent_runtime: f64,
    metrics: Metrics,
    ctx: SimulationContext,
}

impl Controller {
    pub fn new(
        workflow: Workflow,
        batch: Rc<RefCell<dyn BatchService>>,
        heuristic: Rc<RefCell<dyn GroupingHeuristic>>,
        config: Config,
        ctx: SimulationContext,
    ) -> Self {
        let oracle = WaitTimeOracle::new(batch.clone());
        Self {
            workflow,
            batch,
            heuristic,
            config,
            oracle,
            core_speed: 0.0,
            number_of_hosts: 0,
            pending_placeholder: None,
            running_placeholders: Vec::new(),
            individual_mode: false,
            parent_runtime: 0.0,
            metrics: Metrics::new(),
            ctx,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn individual_mode(&self) -> bool {
        self.individual_mode
    }

    pub fn pending_placeholder(&self) -> Option<&PlaceholderJob> {
        self.pending_placeholder.as_ref()
    }

    pub fn running_placeholders(&self) -> &Vec<PlaceholderJob> {
        &self.running_placeholders
    }

    /// Checks whether all workflow tasks are completed.
    pub fn is_completed(&self) -> bool {
        self.workflow.is_done()
    }

    /// Logs the per-state task counts if the workflow did not complete.
    pub fn validate_completed(&self) {
        if !self.workflow.is_done() {
            let mut states: Vec<String> = Vec::new();
            for task_state in TaskState::iter() {
                let cnt = self.workflow.tasks().iter().filter(|t| t.state == task_state).count();
                if cnt != 0 {
                    states.push(format!("{} {:?}", cnt, task_state));
                }
            }
            log_error!(
                self.ctx,
                "workflow is not completed, currently {} tasks",
                states.join(", ")
            );
        }
    }

    fn on_start(&mut self) {
        let rates = self.batch.borrow().core_flop_rate();
        self.core_speed = *rates.values().next().expect("batch service reports no hosts");
        self.number_of_hosts = self.batch.borrow().num_hosts();
        log_info!(
            self.ctx,
            "started workflow execution: {} tasks in {} levels on {} hosts",
            self.workflow.tasks().len(),
            self.workflow.num_levels(),
            self.number_of_hosts
        );
        self.apply_grouping_heuristic();
    }

    /// First level that is neither fully completed nor covered by a
    /// running placeholder.
    fn start_level(&self) -> usize {
        let mut start_level = 0;
        for level in 0..self.workflow.num_levels() {
            let all_completed = self
                .workflow
                .tasks_in_level(level)
                .iter()
                .all(|&t| self.workflow.task(t).state == TaskState::Completed);
            if all_completed {
                start_level = level + 1;
            }
        }
        for placeholder in &self.running_placeholders {
            start_level = start_level.max(placeholder.end_level + 1);
        }
        start_level
    }

    fn apply_grouping_heuristic(&mut self) {
        // don't schedule a pilot job if one is pending
        if self.pending_placeholder.is_some() {
            return;
        }
        if self.individual_mode {
            return;
        }
        // don't schedule a pilot job if overlap is off and anything is running
        if !self.config.overlap && !self.running_placeholders.is_empty() {
            return;
        }

        let start_level = self.start_level();
        if start_level >= self.workflow.num_levels() {
            return;
        }

        let snapshot = SchedulingSnapshot {
            workflow: &self.workflow,
            start_level,
            core_speed: self.core_speed,
            num_hosts: self.number_of_hosts,
            parent_runtime: self.parent_runtime,
            running_walltime_max: self
                .running_placeholders
                .iter()
                .map(|ph| ph.walltime_sec)
                .fold(0.0, f64::max),
            now: self.ctx.time(),
        };
        let decision = match self.heuristic.borrow_mut().decide(&snapshot, &mut self.oracle) {
            Ok(decision) => decision,
            Err(e) => {
                log_error!(self.ctx, "grouping heuristic failed: {}", e);
                panic!("grouping heuristic failed: {}", e);
            }
        };

        match decision {
            Decision::Idle => {}
            Decision::Individual => {
                log_info!(self.ctx, "switching to individual mode");
                self.individual_mode = true;
                self.dispatch_individual_tasks();
            }
            Decision::Submit {
                start_level,
                end_level,
                parallelism,
                walltime,
            } => {
                if end_level < self.workflow.num_levels() - 1 {
                    log_info!(self.ctx, "splitting at end level {}", end_level);
                    self.metrics.register_split();
                }
                self.create_and_submit_placeholder(walltime, parallelism, start_level, end_level);
            }
        }
    }

    fn create_and_submit_placeholder(
        &mut self,
        requested_execution_time: f64,
        parallelism: u64,
        start_level: usize,
        end_level: usize,
    ) {
        let walltime_sec = requested_execution_time * EXEC_FUDGE;
        self.parent_runtime = walltime_sec;

        let mut tasks = Vec::new();
        for level in start_level..=end_level {
            for &task in self.workflow.tasks_in_level(level) {
                if self.workflow.task(task).state != TaskState::Completed {
                    tasks.push(task);
                }
            }
        }

        let walltime_min = 1 + walltime_sec as u64 / 60;
        let args = ServiceArgs::new(parallelism, walltime_min);
        let pilot = self.batch.borrow_mut().submit_pilot_job(args);
        log_info!(
            self.ctx,
            "submitted pilot job {} ({} nodes, {:.2} sec) for workflow levels {}-{}",
            pilot,
            parallelism,
            walltime_sec,
            start_level,
            end_level
        );
        self.pending_placeholder = Some(PlaceholderJob::new(
            pilot,
            start_level,
            end_level,
            parallelism,
            walltime_sec,
            walltime_min,
            tasks,
        ));
    }

    /// Submits every ready task of the placeholder into its pilot, within
    /// node capacity, in the placeholder's stored task order.
    fn dispatch_ready_tasks(&mut self, placeholder: &mut PlaceholderJob) {
        let tasks = placeholder.tasks.clone();
        for task in tasks {
            if self.workflow.task(task).state != TaskState::Ready {
                continue;
            }
            if placeholder.num_running >= placeholder.requested_nodes {
                break;
            }
            let flops = self.workflow.task(task).flops;
            self.batch.borrow_mut().submit_to_pilot(placeholder.pilot, task, flops);
            self.workflow.mark_running(task, self.ctx.time());
            placeholder.on_task_start();
            log_debug!(
                self.ctx,
                "submitted task {} as part of placeholder job {}-{}",
                self.workflow.task(task).name,
                placeholder.start_level,
                placeholder.end_level
            );
        }
    }

    /// Submits every ready task workflow-wide as its own single-node job.
    fn dispatch_individual_tasks(&mut self) {
        for task in 0..self.workflow.tasks().len() {
            if self.workflow.task(task).state != TaskState::Ready {
                continue;
            }
            let flops = self.workflow.task(task).flops;
            let requested_execution_time = flops / self.core_speed * EXEC_FUDGE;
            let args = ServiceArgs::new(1, 1 + requested_execution_time as u64 / 60);
            log_info!(self.ctx, "submitting task {} individually", self.workflow.task(task).name);
            self.batch.borrow_mut().submit_standard_job(task, flops, args);
            self.workflow.mark_pending(task);
        }
    }

    fn terminate_pilot(&mut self, pilot: PilotJobId) {
        match self.batch.borrow_mut().terminate_pilot_job(pilot) {
            Ok(()) => {}
            Err(BatchError::AlreadyTerminated) => {
                log_debug!(self.ctx, "pilot job {} was already terminated", pilot);
            }
            Err(e) => {
                log_error!(self.ctx, "failed to terminate pilot job {}: {}", pilot, e);
                panic!("failed to terminate pilot job {}: {}", pilot, e);
            }
        }
    }

    fn on_pilot_job_started(&mut self, pilot: PilotJobId, submit_time: f64) {
        self.metrics.add_queue_wait(self.ctx.time() - submit_time);

        log_debug!(self.ctx, "pilot job {} started", pilot);
        if self.pending_placeholder.is_none() {
            let err = Error::MissingPlaceholder(pilot);
            log_error!(self.ctx, "{}", err);
            panic!("{}", err);
        }
        if self.pending_placeholder.as_ref().unwrap().pilot != pilot {
            // a late start for a placeholder that was already canceled
            log_info!(self.ctx, "pilot job {} belongs to a canceled placeholder, ignoring", pilot);
            return;
        }

        let mut placeholder = self.pending_placeholder.take().unwrap();
        log_info!(
            self.ctx,
            "placeholder job for levels {}-{} is running",
            placeholder.start_level,
            placeholder.end_level
        );
        self.dispatch_ready_tasks(&mut placeholder);
        self.running_placeholders.push(placeholder);

        // re-decide, so the next job's queue wait overlaps this execution
        self.apply_grouping_heuristic();
    }

    fn on_pilot_job_expired(&mut self, pilot: PilotJobId) {
        let position = self.running_placeholders.iter().position(|ph| ph.pilot == pilot);
        let placeholder = match position {
            Some(idx) => self.running_placeholders.remove(idx),
            None => {
                log_error!(self.ctx, "pilot job {} expired without a running placeholder", pilot);
                panic!("pilot job {} expired without a running placeholder", pilot);
            }
        };
        log_info!(
            self.ctx,
            "pilot job {} for levels {}-{} expired",
            pilot,
            placeholder.start_level,
            placeholder.end_level
        );

        let mut wasted = 60.0 * placeholder.walltime_min as f64 * placeholder.requested_nodes as f64;
        for &task in &placeholder.tasks {
            if self.workflow.task(task).state == TaskState::Completed {
                wasted -= self.workflow.task(task).flops / self.core_speed;
            }
        }
        self.metrics.add_wasted_node_seconds(wasted);

        let unprocessed = placeholder
            .tasks
            .iter()
            .any(|&t| self.workflow.task(t).state != TaskState::Completed);
        if unprocessed {
            self.metrics.register_expiration_with_remaining_tasks();

            if let Some(pending) = self.pending_placeholder.take() {
                log_info!(
                    self.ctx,
                    "canceling pending placeholder job for levels {}-{}",
                    pending.start_level,
                    pending.end_level
                );
                self.terminate_pilot(pending.pilot);
            }

            // cancel running placeholders none of whose tasks has started:
            // they were chained on the expired one and cannot run
            let workflow = &self.workflow;
            let (doomed, alive): (Vec<_>, Vec<_>) = self
                .running_placeholders
                .drain(..)
                .partition(|ph| !ph.has_started(workflow));
            self.running_placeholders = alive;
            for placeholder in doomed {
                log_info!(
                    self.ctx,
                    "canceling running placeholder job for levels {}-{}: none of its tasks has started",
                    placeholder.start_level,
                    placeholder.end_level
                );
                self.terminate_pilot(placeholder.pilot);
            }

            self.apply_grouping_heuristic();
        } else {
            log_debug!(self.ctx, "expired placeholder job has no unprocessed tasks");
        }
    }

    fn on_standard_job_completed(&mut self, job: StandardJobId, task: usize) {
        log_debug!(
            self.ctx,
            "standard job {} for task {} completed",
            job,
            self.workflow.task(task).name
        );
        self.workflow.mark_completed(task);
        self.metrics
            .add_used_node_seconds(self.workflow.task(task).flops / self.core_speed);

        let mut running = std::mem::take(&mut self.running_placeholders);
        let owner = running.iter().position(|ph| ph.contains_task(task));
        if owner.is_none() && !self.individual_mode {
            let err = Error::OrphanCompletion(self.workflow.task(task).name.clone());
            log_error!(self.ctx, "{}", err);
            panic!("{}", err);
        }

        let mut placeholder_removed = false;
        if let Some(idx) = owner {
            running[idx].on_task_complete();
            if running[idx].all_done(&self.workflow) {
                let placeholder = running.remove(idx);
                placeholder_removed = true;
                let first_start = placeholder.min_task_start(&self.workflow, self.ctx.time());
                let mut wasted = placeholder.requested_nodes as f64 * (self.ctx.time() - first_start);
                for &t in &placeholder.tasks {
                    wasted -= self.workflow.task(t).flops / self.core_speed;
                }
                self.metrics.add_wasted_node_seconds(wasted);
                log_info!(
                    self.ctx,
                    "all tasks of placeholder job {}-{} are completed, terminating pilot job {}",
                    placeholder.start_level,
                    placeholder.end_level,
                    placeholder.pilot
                );
                self.terminate_pilot(placeholder.pilot);
            }
        }

        // dispatch tasks that became ready, in any running placeholder
        for placeholder in running.iter_mut() {
            self.dispatch_ready_tasks(placeholder);
        }
        self.running_placeholders = running;

        if self.individual_mode {
            self.dispatch_individual_tasks();
        } else if placeholder_removed {
            // a finished placeholder frees the way for the next submission
            self.apply_grouping_heuristic();
        }
    }

    fn on_standard_job_failed(&mut self, job: StandardJobId, task: usize) {
        log_info!(
            self.ctx,
            "standard job {} for task {} failed, returning the task to the ready pool",
            job,
            self.workflow.task(task).name
        );
        if self.workflow.task(task).state == TaskState::Running {
            if let Some(placeholder) = self.running_placeholders.iter_mut().find(|ph| ph.contains_task(task)) {
                // the killed job no longer occupies a pilot node
                placeholder.on_task_complete();
            }
        }
        self.workflow.revive_task(task);
    }
}

impl EventHandler for Controller {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            Start {} => {
                self.on_start()
            }
            PilotJobStarted { pilot, submit_time } => {
                self.on_pilot_job_started(pilot, submit_time)
            }
            PilotJobExpired { pilot } => {
                self.on_pilot_job_expired(pilot)
            }
            StandardJobCompleted { job, task } => {
                self.on_standard_job_completed(job, task)
            }
            StandardJobFailed { job, task } => {
                self.on_standard_job_failed(job, task)
            }
        })
    }
}
