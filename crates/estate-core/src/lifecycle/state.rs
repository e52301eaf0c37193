//! Coordinator instance states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an instance is in its lifecycle.
///
/// `Installing → Installed → Activating → Activated`. `Redundant` is
/// terminal: the install failed or a newer instance took over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Installing => "installing",
            InstanceState::Installed => "installed",
            InstanceState::Activating => "activating",
            InstanceState::Activated => "activated",
            InstanceState::Redundant => "redundant",
        }
    }

    /// Whether the instance may answer intercepted requests.
    pub fn is_serving(&self) -> bool {
        matches!(self, InstanceState::Activated)
    }

    pub fn is_redundant(&self) -> bool {
        matches!(self, InstanceState::Redundant)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
