//! Wait-time oracle adapter.

use std::cell::RefCell;
use std::rc::Rc;

use crate::batch::{BatchError, BatchService, ProbeRequest};
use crate::error::{Error, Result};

/// Wraps the batch service start-time-estimate API into wait-time queries.
///
/// Every probe is tagged with a fresh monotonically increasing sequence
/// number so probe ids never collide in the batch service cache.
pub struct WaitTimeOracle {
    batch: Rc<RefCell<dyn BatchService>>,
    sequence: u64,
}

impl WaitTimeOracle {
    pub fn new(batch: Rc<RefCell<dyn BatchService>>) -> Self {
        Self { batch, sequence: 0 }
    }

    /// Estimated time from `now` until a job with the given parallelism
    /// and walltime would start, never negative.
    pub fn estimate_wait(&mut self, parallelism: u64, walltime: f64, now: f64) -> Result<f64> {
        let probe_id = format!("estimate_{}", self.sequence);
        self.sequence += 1;
        let probe = ProbeRequest {
            id: probe_id.clone(),
            nodes: parallelism,
            cores_per_node: 1,
            walltime,
        };
        let estimates = self
            .batch
            .borrow()
            .start_time_estimates(&[probe])
            .map_err(Error::OracleUnavailable)?;
        let predicted = *estimates.get(&probe_id).ok_or_else(|| {
            Error::OracleUnavailable(BatchError::ServiceFailure(format!(
                "no estimate returned for probe {}",
                probe_id
            )))
        })?;
        if predicted < 0.0 {
            return Err(Error::OracleInvalid(predicted, probe_id));
        }
        Ok((predicted - now).max(0.0))
    }
}
