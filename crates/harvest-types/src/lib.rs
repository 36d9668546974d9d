/// Shared types, traits, and errors for the harvest workspace.
///
/// This crate is the foundation that all other harvest crates depend on.
/// It contains:
/// - **Trait contracts** (`traits`) for the driver, launcher, credential flow and store
/// - **Shared data types** (`jobs`) for jobs, results and network events
/// - **Error types** (`errors`) for unified error handling
/// - **Config types** (`config`, `config_loader`) for the YAML run configuration
pub mod columns;
pub mod config;
pub mod config_loader;
pub mod errors;
pub mod jobs;
pub mod traits;

// Re-export commonly used types at the crate root for convenience.
pub use config::{Credentials, HarvestConfig};
pub use errors::HarvestError;
pub use jobs::*;
pub use traits::*;
