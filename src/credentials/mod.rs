// Credential registry, leases, and the predictive rate controller.

pub mod lease;
pub mod rate_controller;
pub mod registry;

pub use lease::{Lease, LeaseOutcome};
pub use rate_controller::{ErrorWindow, RateController, UsageWindow};
pub use registry::{
    Alert, AlertKind, CredentialError, CredentialRegistry, UsageSnapshot, WindowEvents,
};
