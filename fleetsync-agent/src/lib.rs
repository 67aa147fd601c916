//! Fleetsync Agent Library
//!
//! Host-side half of fleetsync: builds content-addressed manifests of a
//! directory tree and performs the copy/move operations that preserve
//! conflicting files. The controller runs the `fleetsync-agent` binary over
//! SSH and reads its JSON output.

pub mod fs;
pub mod manifest;
pub mod utils;

// Re-export commonly used types
pub use fs::exclude::ExcludeSet;
pub use manifest::{FileRecord, Manifest, ManifestReport};
pub use utils::errors::AgentError;
pub type Result<T> = std::result::Result<T, AgentError>;
