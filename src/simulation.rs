//! Simulation configuration and execution.

use std::cell::RefCell;
use std::rc::Rc;

use dslab_core::simulation::Simulation;

use crate::batch::BatchService;
use crate::config::Config;
use crate::controller::{Controller, Start};
use crate::fcfs::FcfsBatchService;
use crate::heuristics::GroupingHeuristic;
use crate::workflow::Workflow;

/// Provides a convenient API for configuring and running pilot-job
/// clustering simulations.
pub struct PilotSimulation {
    pub sim: Simulation,
    heuristic: Rc<RefCell<dyn GroupingHeuristic>>,
    config: Config,
    batch: Option<Rc<RefCell<FcfsBatchService>>>,
}

impl PilotSimulation {
    /// Creates simulation with provided random seed, grouping heuristic
    /// and controller config.
    pub fn new(seed: u64, heuristic: Rc<RefCell<dyn GroupingHeuristic>>, config: Config) -> Self {
        Self {
            sim: Simulation::new(seed),
            heuristic,
            config,
            batch: None,
        }
    }

    /// Initializes the simulation: creates the batch service and the
    /// controller and schedules the start of workflow execution.
    pub fn init(&mut self, workflow: Workflow, num_hosts: u64, host_speed: f64) -> Rc<RefCell<Controller>> {
        let batch_ctx = self.sim.create_context("batch");
        let controller_ctx = self.sim.create_context("controller");
        let controller_id = controller_ctx.id();

        let batch = Rc::new(RefCell::new(FcfsBatchService::new(
            num_hosts,
            host_speed,
            controller_id,
            batch_ctx,
        )));
        self.sim.add_handler("batch", batch.clone());
        self.batch = Some(batch.clone());

        let controller = Rc::new(RefCell::new(Controller::new(
            workflow,
            batch as Rc<RefCell<dyn BatchService>>,
            self.heuristic.clone(),
            self.config.clone(),
            controller_ctx,
        )));
        self.sim.add_handler("controller", controller.clone());

        let mut client = self.sim.create_context("client");
        client.emit_now(Start {}, controller_id);
        controller
    }

    /// Returns the batch service created by [init](Self::init).
    pub fn batch(&self) -> Rc<RefCell<FcfsBatchService>> {
        self.batch.clone().expect("simulation is not initialized")
    }

    /// Performs the specified number of steps through the simulation.
    pub fn steps(&mut self, step_count: u64) -> bool {
        self.sim.steps(step_count)
    }

    /// Steps through the simulation until there are no pending events left.
    pub fn step_until_no_events(&mut self) {
        self.sim.step_until_no_events();
    }

    /// Returns the total number of created events.
    pub fn event_count(&self) -> u64 {
        self.sim.event_count()
    }

    /// Returns the current simulation time.
    pub fn time(&mut self) -> f64 {
        self.sim.time()
    }
}
