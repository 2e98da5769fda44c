//! Reference in-memory batch service model.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::Serialize;

use dslab_core::cast;
use dslab_core::component::Id;
use dslab_core::context::SimulationContext;
use dslab_core::event::Event;
use dslab_core::handler::EventHandler;
use dslab_core::{log_debug, log_info};

use crate::batch::{
    BatchError, BatchService, PilotJobExpired, PilotJobId, PilotJobStarted, ProbeRequest, ServiceArgs,
    StandardJobCompleted, StandardJobFailed, StandardJobId,
};

#[derive(Clone, Serialize)]
struct PilotWalltimeElapsed {
    pilot: PilotJobId,
}

#[derive(Clone, Serialize)]
struct JobRunFinished {
    job: StandardJobId,
}

#[derive(Clone, Serialize)]
struct OccupancyReleased {
    id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum PilotStatus {
    Queued,
    Running,
    Finished,
}

struct Pilot {
    args: ServiceArgs,
    submit_time: f64,
    start_time: f64,
    free_nodes: u64,
    status: PilotStatus,
}

impl Pilot {
    fn walltime_sec(&self) -> f64 {
        60.0 * self.args.walltime_min as f64
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum JobStatus {
    Queued,
    Running,
    Finished,
}

struct StandardJob {
    task: usize,
    flops: f64,
    /// Walltime limit in seconds (for jobs submitted against the queue).
    walltime_sec: f64,
    pilot: Option<PilotJobId>,
    status: JobStatus,
}

#[derive(Clone, Copy)]
enum QueueEntry {
    Pilot(PilotJobId),
    Job(StandardJobId),
}

/// A strict-FIFO batch compute service over identical single-core hosts.
///
/// Jobs are dispatched in submission order with no backfilling. A pilot
/// job holds its nodes for the full requested walltime unless terminated;
/// standard jobs submitted into a running pilot execute on that pilot's
/// nodes and are killed when the pilot expires. Start-time estimates are
/// computed against the conservative occupancy profile: running jobs hold
/// until their walltime end, queued entries are placed FIFO, then the
/// probe. Probes requesting more nodes than the cluster has yield a
/// negative (unschedulable) estimate.
pub struct FcfsBatchService {
    num_hosts: u64,
    host_speed: f64,
    free_hosts: u64,
    queue: VecDeque<QueueEntry>,
    pilots: HashMap<PilotJobId, Pilot>,
    jobs: HashMap<StandardJobId, StandardJob>,
    /// Synthetic background load: id -> (release time, nodes).
    background: HashMap<u64, (f64, u64)>,
    next_id: u64,
    controller: Id,
    ctx: SimulationContext,
}

impl FcfsBatchService {
    pub fn new(num_hosts: u64, host_speed: f64, controller: Id, ctx: SimulationContext) -> Self {
        Self {
            num_hosts,
            host_speed,
            free_hosts: num_hosts,
            queue: VecDeque::new(),
            pilots: HashMap::new(),
            jobs: HashMap::new(),
            background: HashMap::new(),
            next_id: 0,
            controller,
            ctx,
        }
    }

    /// Injects synthetic background load holding `nodes` hosts until the
    /// given absolute time.
    pub fn occupy(&mut self, nodes: u64, until: f64) {
        assert!(nodes <= self.free_hosts, "not enough free hosts to occupy");
        self.free_hosts -= nodes;
        let id = self.next_id;
        self.next_id += 1;
        self.background.insert(id, (until, nodes));
        self.ctx.emit_self(OccupancyReleased { id }, until - self.ctx.time());
    }

    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn try_dispatch(&mut self) {
        while let Some(&entry) = self.queue.front() {
            match entry {
                QueueEntry::Pilot(id) => {
                    if self.pilots[&id].status == PilotStatus::Finished {
                        // terminated while queued
                        self.queue.pop_front();
                        continue;
                    }
                    if self.pilots[&id].args.nodes > self.free_hosts {
                        break;
                    }
                    self.queue.pop_front();
                    let now = self.ctx.time();
                    let pilot = self.pilots.get_mut(&id).unwrap();
                    pilot.status = PilotStatus::Running;
                    pilot.start_time = now;
                    pilot.free_nodes = pilot.args.nodes;
                    self.free_hosts -= pilot.args.nodes;
                    let walltime = pilot.walltime_sec();
                    let submit_time = pilot.submit_time;
                    log_info!(self.ctx, "pilot job {} started on {} nodes", id, pilot.args.nodes);
                    self.ctx.emit_self(PilotWalltimeElapsed { pilot: id }, walltime);
                    self.ctx.emit_now(PilotJobStarted { pilot: id, submit_time }, self.controller);
                }
                QueueEntry::Job(id) => {
                    if self.free_hosts < 1 {
                        break;
                    }
                    self.queue.pop_front();
                    self.free_hosts -= 1;
                    let job = self.jobs.get_mut(&id).unwrap();
                    job.status = JobStatus::Running;
                    let run_for = (job.flops / self.host_speed).min(job.walltime_sec);
                    log_debug!(self.ctx, "standard job {} started", id);
                    self.ctx.emit_self(JobRunFinished { job: id }, run_for);
                }
            }
        }
    }

    /// Earliest start time of a hypothetical job, after everything that is
    /// running or already queued.
    fn place_after_queue(&self, nodes: u64, walltime: f64) -> f64 {
        let mut profile = Profile::new(self.free_hosts, self.ctx.time());
        for pilot in self.pilots.values() {
            if pilot.status == PilotStatus::Running {
                profile.add_release(pilot.start_time + pilot.walltime_sec(), pilot.args.nodes);
            }
        }
        for job in self.jobs.values() {
            if job.status == JobStatus::Running && job.pilot.is_none() {
                profile.add_release(
                    self.ctx.time() + (job.flops / self.host_speed).min(job.walltime_sec),
                    1,
                );
            }
        }
        for &(until, held) in self.background.values() {
            profile.add_release(until, held);
        }

        for entry in &self.queue {
            match *entry {
                QueueEntry::Pilot(id) => {
                    let pilot = &self.pilots[&id];
                    if pilot.status == PilotStatus::Queued {
                        profile.place(pilot.args.nodes, pilot.walltime_sec());
                    }
                }
                QueueEntry::Job(id) => {
                    let job = &self.jobs[&id];
                    if job.status == JobStatus::Queued {
                        profile.place(1, (job.flops / self.host_speed).min(job.walltime_sec));
                    }
                }
            }
        }
        profile.place(nodes, walltime)
    }

    fn on_pilot_walltime_elapsed(&mut self, pilot_id: PilotJobId) {
        if self.pilots[&pilot_id].status != PilotStatus::Running {
            return;
        }
        let pilot = self.pilots.get_mut(&pilot_id).unwrap();
        pilot.status = PilotStatus::Finished;
        self.free_hosts += pilot.args.nodes;
        log_info!(self.ctx, "pilot job {} expired", pilot_id);

        // kill the jobs still running inside the pilot, in id order
        let mut killed: Vec<StandardJobId> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.pilot == Some(pilot_id) && job.status == JobStatus::Running)
            .map(|(&id, _)| id)
            .collect();
        killed.sort();
        for job_id in killed {
            let job = self.jobs.get_mut(&job_id).unwrap();
            job.status = JobStatus::Finished;
            let task = job.task;
            self.ctx.emit_now(StandardJobFailed { job: job_id, task }, self.controller);
        }

        self.ctx.emit_now(PilotJobExpired { pilot: pilot_id }, self.controller);
        self.try_dispatch();
    }

    fn on_job_run_finished(&mut self, job_id: StandardJobId) {
        if self.jobs[&job_id].status != JobStatus::Running {
            // the owning pilot finished first and the job was killed
            return;
        }
        let job = self.jobs.get_mut(&job_id).unwrap();
        job.status = JobStatus::Finished;
        let task = job.task;
        let pilot = job.pilot;
        let killed = job.flops / self.host_speed > job.walltime_sec;
        match pilot {
            Some(pilot_id) => {
                self.pilots.get_mut(&pilot_id).unwrap().free_nodes += 1;
                self.ctx.emit_now(StandardJobCompleted { job: job_id, task }, self.controller);
            }
            None => {
                if killed {
                    // the walltime limit elapsed before the job finished
                    self.ctx.emit_now(StandardJobFailed { job: job_id, task }, self.controller);
                } else {
                    self.ctx.emit_now(StandardJobCompleted { job: job_id, task }, self.controller);
                }
                self.free_hosts += 1;
                self.try_dispatch();
            }
        }
    }

    fn on_occupancy_released(&mut self, id: u64) {
        let (_, nodes) = self.background.remove(&id).unwrap();
        self.free_hosts += nodes;
        self.try_dispatch();
    }
}

impl BatchService for FcfsBatchService {
    fn core_flop_rate(&self) -> BTreeMap<String, f64> {
        (0..self.num_hosts)
            .map(|i| (format!("host{}", i), self.host_speed))
            .collect()
    }

    fn num_hosts(&self) -> u64 {
        self.num_hosts
    }

    fn submit_pilot_job(&mut self, args: ServiceArgs) -> PilotJobId {
        let id = self.fresh_id();
        self.pilots.insert(
            id,
            Pilot {
                args,
                submit_time: self.ctx.time(),
                start_time: 0.0,
                free_nodes: 0,
                status: PilotStatus::Queued,
            },
        );
        self.queue.push_back(QueueEntry::Pilot(id));
        log_info!(
            self.ctx,
            "pilot job {} submitted with batch arguments {:?}",
            id,
            args.to_map()
        );
        self.try_dispatch();
        id
    }

    fn submit_standard_job(&mut self, task: usize, flops: f64, args: ServiceArgs) -> StandardJobId {
        let id = self.fresh_id();
        self.jobs.insert(
            id,
            StandardJob {
                task,
                flops,
                walltime_sec: 60.0 * args.walltime_min as f64,
                pilot: None,
                status: JobStatus::Queued,
            },
        );
        self.queue.push_back(QueueEntry::Job(id));
        log_debug!(self.ctx, "standard job {} for task {} submitted", id, task);
        self.try_dispatch();
        id
    }

    fn submit_to_pilot(&mut self, pilot_id: PilotJobId, task: usize, flops: f64) -> StandardJobId {
        let pilot = self.pilots.get_mut(&pilot_id).unwrap();
        assert!(
            pilot.status == PilotStatus::Running && pilot.free_nodes > 0,
            "pilot job {} cannot accept a standard job",
            pilot_id
        );
        pilot.free_nodes -= 1;
        let id = self.fresh_id();
        self.jobs.insert(
            id,
            StandardJob {
                task,
                flops,
                walltime_sec: f64::INFINITY,
                pilot: Some(pilot_id),
                status: JobStatus::Running,
            },
        );
        let run_for = flops / self.host_speed;
        log_debug!(
            self.ctx,
            "standard job {} for task {} started in pilot job {}",
            id,
            task,
            pilot_id
        );
        self.ctx.emit_self(JobRunFinished { job: id }, run_for);
        id
    }

    fn start_time_estimates(&self, probes: &[ProbeRequest]) -> Result<HashMap<String, f64>, BatchError> {
        let mut estimates = HashMap::new();
        for probe in probes {
            let estimate = if probe.nodes > self.num_hosts {
                -1.0
            } else {
                self.place_after_queue(probe.nodes, probe.walltime)
            };
            estimates.insert(probe.id.clone(), estimate);
        }
        Ok(estimates)
    }

    fn terminate_pilot_job(&mut self, pilot_id: PilotJobId) -> Result<(), BatchError> {
        let pilot = self
            .pilots
            .get_mut(&pilot_id)
            .ok_or_else(|| BatchError::ServiceFailure(format!("unknown pilot job {}", pilot_id)))?;
        match pilot.status {
            PilotStatus::Finished => Err(BatchError::AlreadyTerminated),
            PilotStatus::Queued => {
                pilot.status = PilotStatus::Finished;
                log_info!(self.ctx, "pilot job {} terminated while queued", pilot_id);
                Ok(())
            }
            PilotStatus::Running => {
                pilot.status = PilotStatus::Finished;
                self.free_hosts += pilot.args.nodes;
                log_info!(self.ctx, "pilot job {} terminated", pilot_id);
                self.try_dispatch();
                Ok(())
            }
        }
    }
}

impl EventHandler for FcfsBatchService {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            PilotWalltimeElapsed { pilot } => {
                self.on_pilot_walltime_elapsed(pilot)
            }
            JobRunFinished { job } => {
                self.on_job_run_finished(job)
            }
            OccupancyReleased { id } => {
                self.on_occupancy_released(id)
            }
        })
    }
}

/// Node availability profile used to answer start-time estimates.
struct Profile {
    free: u64,
    time: f64,
    releases: Vec<(f64, u64)>,
}

impl Profile {
    fn new(free: u64, time: f64) -> Self {
        Self {
            free,
            time,
            releases: Vec::new(),
        }
    }

    fn add_release(&mut self, time: f64, nodes: u64) {
        self.releases.push((time, nodes));
    }

    /// Places a job needing `nodes` nodes for `hold` seconds at the
    /// earliest time enough nodes are free, and returns that time.
    fn place(&mut self, nodes: u64, hold: f64) -> f64 {
        while self.free < nodes {
            let next = self
                .releases
                .iter()
                .enumerate()
                .min_by(|a, b| a.1 .0.total_cmp(&b.1 .0).then(a.1 .1.cmp(&b.1 .1)))
                .map(|(i, _)| i)
                .expect("occupancy profile ran out of releases");
            let (release_time, released) = self.releases.swap_remove(next);
            self.time = self.time.max(release_time);
            self.free += released;
        }
        let start = self.time;
        self.releases.push((start + hold, nodes));
        self.free -= nodes;
        start
    }
}
