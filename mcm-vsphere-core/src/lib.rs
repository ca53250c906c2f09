//! MCM vSphere provider core
//!
//! Machine lifecycle for an orchestrator's vSphere provider plugin:
//! - Provider identifier codec (`vsphere://{region}/{machine-id}`)
//! - Discovery engine (identifier lookup, name fallback, cluster/role tag scan)
//! - Lifecycle operations (create, delete, shut down, status, list)
//! - In-memory inventory simulator implementing the platform contracts

pub mod codec;
pub mod context;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod platform;
pub mod session;
pub mod simulator;
pub mod spec;
pub mod tags;

pub use codec::{decode, encode, Decoded, ProviderId};
pub use error::{Operation, PlatformError, ProviderError};
pub use lifecycle::{MachineProvider, MachineStatus};
pub use platform::{MachineRef, Platform, Session};
pub use simulator::Simulator;
pub use spec::{MachineSpec, PlacementScope, Secrets};
pub use tags::ClusterRoleTags;
