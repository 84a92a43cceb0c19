//! Shared types for rvbuild.
//!
//! Everything that crosses the boundary between the mirror backends, the
//! acquisition orchestrator and the command line lives here.

/// Android ABI selectors.
pub mod arch;
/// App configs, download candidates and the build matrix.
pub mod types;
pub mod version;

// Re-exports
pub use arch::*;
pub use types::*;
pub use version::Version;
