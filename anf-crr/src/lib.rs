//! anf-crr: cross-region replication for NetApp volumes on an eventually
//! consistent control plane.
//!
//! - [`resource_uri`] parses and builds hierarchical resource ids.
//! - [`wait`] polls the control plane until a resource converges.
//! - [`workflow`] sets up (and optionally tears down) a replication pair.

pub mod client;
pub mod config;
pub mod error;
pub mod resource_uri;
pub mod simulated;
pub mod wait;
pub mod workflow;

pub use client::{AnfClient, ResourceReader};
pub use config::{ConfigError, CrrConfig, RegionConfig};
pub use error::{AnfError, WaitError};
pub use resource_uri::{ResourceIdentifier, ResourceKind};
pub use simulated::SimulatedAnf;
pub use wait::{Absence, PollSpec, Target};
pub use workflow::{CrrReport, CrrWorkflow};
