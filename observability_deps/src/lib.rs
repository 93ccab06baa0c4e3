//! Re-exports of the observability ecosystem used across this workspace.
//!
//! Crates in this workspace import `tracing` (and friends) through this shim
//! so the version is pinned in exactly one place and upgrades touch a single
//! `Cargo.toml`.
#![warn(missing_docs)]

// Export tracing so consumers can write `use observability_deps::tracing::info;`.
pub use tracing;

// Workaround for "unused crate" lint false positives.
use workspace_hack as _;
