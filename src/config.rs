//! Controller configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Represents a controller run configuration.
///
/// The heuristic itself and its parameters (waste bound, beat bound) are
/// selected separately, see
/// [default_heuristic_resolver](crate::heuristics::default_heuristic_resolver).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Allow a new placeholder submission while another placeholder is
    /// running, overlapping its queue wait with the running job.
    pub overlap: bool,
    /// Reserved: strict parallelism cap in the Zhang heuristic. Accepted
    /// but currently without effect.
    #[serde(default)]
    pub plimit: bool,
}

impl Config {
    pub fn new(overlap: bool, plimit: bool) -> Self {
        Self { overlap, plimit }
    }

    /// Loads a configuration from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}
