// Core library for the Palisade resilience policies
// This crate contains the policy engine, its error taxonomy and logging setup

pub mod error;
pub mod logging;
pub mod resilience;

// Re-export commonly used types
pub use error::*;
pub use resilience::*;
