//! Configuration for the profile manager
//!
//! Two layers:
//! - **paths**: where the store and the bus socket live (env-overridable)
//! - **settings**: typed runtime settings read from the store's settings namespace

pub mod paths;
pub mod settings;

// Re-export commonly used types
pub use paths::AppPaths;
pub use settings::RuntimeSettings;
