//! # Wayfarer Common
//!
//! Shared types and errors for the Wayfarer agent core.
//!
//! ## Core Types
//!
//! - [`Vec3`]/[`BlockPos`]: world-space and block-grid coordinates
//! - [`Snapshot`]: one pulled view of the world, taken once per tick
//! - [`Priority`]: inbox priority of a buffered event
//! - [`Intent`]: an action the agent wants a behavior to perform
//! - [`BehaviorEnd`]: completion notification for a behavior run
//!
//! ## Errors
//!
//! - [`WayfarerError`]: unified error with domain-specific variants

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{BodyError, Result, ToolArgError, WayfarerError};
pub use types::{
    behavior::{BehaviorEnd, BehaviorPriority, Intent, Priority},
    geometry::{BlockPos, Vec3},
    snapshot::{BlockSnapshot, EntitySnapshot, Snapshot},
};

/// Wayfarer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run id reserved for "no behavior bound"
pub const NO_RUN_ID: u64 = 0;
