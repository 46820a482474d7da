//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `normalizer` - Raw rows to vehicle records via field aliases
//! - `reconciler` - Merges a normalized batch into the canonical fleet
//! - `scheduler` - Fixed-interval poll loop and countdown
//! - `connection` - Connection state machine
//! - `engine` - Orchestrates connect, poll cycles and disconnect

pub mod connection;
pub mod engine;
pub mod normalizer;
pub mod reconciler;
pub mod scheduler;

// Re-export commonly used types
pub use connection::{ConnectionMachine, ConnectionState};
pub use engine::{DisconnectPolicy, EngineSettings, FleetEngine, FleetSnapshot};
pub use normalizer::{FieldAliases, Normalizer};
pub use reconciler::{AbsentPolicy, Reconciler};
pub use scheduler::{CycleRunner, CycleTicket, PollScheduler};
