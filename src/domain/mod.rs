//! Domain models - core fleet types
//!
//! This module contains the canonical data types used throughout the system:
//! - `VehicleRecord` - a vehicle after normalization, independent of source schema
//! - `FleetState` / `StatusCounts` - the canonical fleet and its derived counts
//! - `SourceConfig` - which origin to poll and how often
//! - `SyncError` - classified adapter and connection errors

pub mod error;
pub mod fleet;
pub mod source;
pub mod types;

// Re-export commonly used types at module level
pub use error::SyncError;
pub use fleet::{FleetQuery, FleetState, StatusCounts};
pub use source::{SourceConfig, SourceType};
pub use types::{RawRow, VehicleId, VehicleRecord, VehicleStatus};
