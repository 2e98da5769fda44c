//! Leveled DAG model of a workflow.

use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::error::{Error, Result};
use crate::task::{Task, TaskState};

/// Represents a computation consisting of multiple tasks with dependencies
/// modeled as a directed acyclic graph (DAG).
///
/// The DAG is partitioned into *top levels*: the level of a task is its
/// longest-path distance from a source task (sources have level 0).
/// Level assignment happens during construction and is stable afterwards;
/// task states are updated as the controller submits tasks and processes
/// completion events.
#[derive(Clone)]
pub struct Workflow {
    tasks: Vec<Task>,
    levels: Vec<Vec<usize>>,
    completed_task_count: usize,
}

impl Workflow {
    /// Creates empty workflow.
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            levels: Vec::new(),
            completed_task_count: 0,
        }
    }

    /// Adds new [task](crate::task::Task) with provided parameters and returns its id.
    pub fn add_task(&mut self, name: &str, flops: f64) -> usize {
        let task_id = self.tasks.len();
        self.tasks.push(Task::new(name, flops));
        self.rebuild_levels();
        task_id
    }

    /// Adds a dependency between two tasks, demoting the child to
    /// [NotReady](crate::task::TaskState::NotReady) if the parent is not
    /// completed yet.
    pub fn add_dependency(&mut self, parent: usize, child: usize) {
        self.tasks[parent].children.push(child);
        self.tasks[child].parents.push(parent);
        if self.tasks[parent].state != TaskState::Completed && self.tasks[child].state == TaskState::Ready {
            self.tasks[child].state = TaskState::NotReady;
        }
        self.relevel(child);
        self.rebuild_levels();
    }

    fn relevel(&mut self, task_id: usize) {
        let mut queue = vec![task_id];
        while let Some(v) = queue.pop() {
            let level = self.tasks[v]
                .parents
                .iter()
                .map(|&p| self.tasks[p].level + 1)
                .max()
                .unwrap_or(0);
            if level != self.tasks[v].level {
                self.tasks[v].level = level;
                queue.extend(self.tasks[v].children.iter().copied());
            }
        }
    }

    fn rebuild_levels(&mut self) {
        let num_levels = self.tasks.iter().map(|t| t.level + 1).max().unwrap_or(0);
        self.levels = vec![Vec::new(); num_levels];
        for (id, task) in self.tasks.iter().enumerate() {
            self.levels[task.level].push(id);
        }
    }

    /// Returns the number of levels in the workflow.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Returns ids of tasks with the given top level, in insertion order.
    pub fn tasks_in_level(&self, level: usize) -> &[usize] {
        &self.levels[level]
    }

    /// Returns ids of tasks in the inclusive range of top levels, in level
    /// order (insertion order within a level).
    pub fn tasks_in_range(&self, start_level: usize, end_level: usize) -> Vec<usize> {
        (start_level..=end_level)
            .flat_map(|l| self.levels[l].iter().copied())
            .collect()
    }

    /// Returns task by id.
    pub fn task(&self, task_id: usize) -> &Task {
        &self.tasks[task_id]
    }

    /// Returns all tasks.
    pub fn tasks(&self) -> &Vec<Task> {
        &self.tasks
    }

    /// Checks whether all tasks are completed.
    pub fn is_done(&self) -> bool {
        self.tasks.len() == self.completed_task_count
    }

    /// Marks a submitted task as waiting in the batch queue.
    pub fn mark_pending(&mut self, task_id: usize) {
        self.tasks[task_id].state = TaskState::Pending;
    }

    /// Marks a task as running, recording its first start time.
    pub fn mark_running(&mut self, task_id: usize, time: f64) {
        let task = &mut self.tasks[task_id];
        task.state = TaskState::Running;
        task.start_date.get_or_insert(time);
    }

    /// Marks a task as completed and promotes its children whose parents
    /// are now all completed to [Ready](crate::task::TaskState::Ready).
    pub fn mark_completed(&mut self, task_id: usize) {
        self.tasks[task_id].state = TaskState::Completed;
        self.completed_task_count += 1;
        let children = self.tasks[task_id].children.clone();
        for child in children {
            if self.tasks[child].state != TaskState::NotReady {
                continue;
            }
            let ready = self.tasks[child]
                .parents
                .iter()
                .all(|&p| self.tasks[p].state == TaskState::Completed);
            if ready {
                self.tasks[child].state = TaskState::Ready;
            }
        }
    }

    /// Returns a non-completed task to the ready pool after its job died
    /// with an expiring pilot. The recorded start time is kept.
    pub fn revive_task(&mut self, task_id: usize) {
        if self.tasks[task_id].state != TaskState::Completed {
            self.tasks[task_id].state = TaskState::Ready;
        }
    }

    /// Builds a workflow from a compact level specification of the form
    /// `levels:<seed>:<tasks>:<min_sec>:<max_sec>[:<tasks>:<min_sec>:<max_sec>...]`.
    ///
    /// Each triple describes one level; task runtimes are drawn uniformly
    /// from `[min_sec, max_sec]` and converted to flops at the reference
    /// core speed. Every task of a level depends on every task of the
    /// previous level.
    pub fn from_levels_spec(spec: &str, reference_speed: f64) -> Result<Self> {
        let fields: Vec<&str> = spec.split(':').collect();
        if fields.len() < 5 || fields[0] != "levels" || (fields.len() - 2) % 3 != 0 {
            return Err(Error::MalformedSpec(spec.to_string()));
        }
        let mut values = Vec::with_capacity(fields.len() - 1);
        for field in &fields[1..] {
            values.push(
                field
                    .parse::<u64>()
                    .map_err(|_| Error::MalformedSpec(spec.to_string()))?,
            );
        }
        let mut rng = Pcg64::seed_from_u64(values[0]);

        let mut workflow = Workflow::new();
        let mut previous_level: Vec<usize> = Vec::new();
        for (level, triple) in values[1..].chunks(3).enumerate() {
            let (num_tasks, min_sec, max_sec) = (triple[0], triple[1], triple[2]);
            if num_tasks == 0 || min_sec > max_sec {
                return Err(Error::MalformedSpec(spec.to_string()));
            }
            let mut current_level = Vec::with_capacity(num_tasks as usize);
            for i in 0..num_tasks {
                let runtime = rng.gen_range(min_sec..=max_sec);
                let task_id = workflow.add_task(
                    &format!("task_{}_{}", level, i),
                    runtime as f64 * reference_speed,
                );
                for &parent in &previous_level {
                    workflow.add_dependency(parent, task_id);
                }
                current_level.push(task_id);
            }
            previous_level = current_level;
        }
        Ok(workflow)
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new()
    }
}
