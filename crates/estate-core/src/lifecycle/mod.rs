//! Coordinator lifecycle.
//!
//! A [`CoordinatorInstance`] owns one cache generation and moves through
//! install and activation. The [`Registration`] keeps the active instance
//! and the one waiting to replace it, persists which generation is active,
//! and restores it after a restart.

mod clients;
mod instance;
mod registration;
mod state;

pub use clients::{Client, ClientRegistry};
pub use instance::{ActivationReport, CoordinatorInstance, InstallReport};
pub use registration::{
    DeployOutcome, InstanceStatus, Registration, RegistrationBuilder, RegistrationStatus,
};
pub use state::InstanceState;
