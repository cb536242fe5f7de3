//! # Warren Common
//!
//! Shared types, errors, and constants used across Warren components.
//!
//! ## Modules
//! - `types` - Core data structures (NodeName, ClusterCookie, ClusterSnapshot, etc.)
//! - `error` - Common error type and retry classification
//! - `constants` - Coordination key layout and default settings

pub mod constants;
pub mod error;
pub mod types;

pub use error::{WarrenError, WarrenResult};
pub use types::*;
