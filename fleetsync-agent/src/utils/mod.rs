//! Utility modules for the fleetsync agent.

pub mod errors;
pub mod logger;

pub use errors::{AgentError, Result};
