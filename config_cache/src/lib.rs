//! Client-side caching for a storage cluster's configuration plane.
//!
//! The remote configuration service owns users, tenants, tenant memberships,
//! volumes and snapshot policies, and stamps every committed change with a
//! global, monotonically increasing version counter. Every node in the
//! cluster answers frequent authorization and routing questions against
//! that configuration, far too frequently to pay an RPC per question.
//!
//! This crate keeps one immutable, fully indexed
//! [`ConfigSnapshot`](data_types::snapshot::ConfigSnapshot) per cache:
//!
//! - [`cache::ConfigCache`] serves reads from the snapshot, loading it
//!   lazily and coalescing concurrent loads into one remote fetch,
//! - [`gateway::MutationGateway`] forwards writes to the remote and
//!   invalidates the cache after each success,
//! - [`refresh::Refresher`] polls the remote version counter in the
//!   background and invalidates when it moves, bounding staleness for
//!   changes made by other nodes.
//!
//! Nothing here retries: remote failures surface to the caller, and the
//! cache degrades to serving its last snapshot until invalidated.
#![warn(missing_docs)]

// Workaround for "unused crate" lint false positives.
use workspace_hack as _;

pub mod cache;
pub mod fault_injection;
pub mod gateway;
pub mod interface;
pub mod mem;
pub mod refresh;
