// Path: crates/api/src/lib.rs
#![forbid(unsafe_code)]

//! # Meridian API
//!
//! Capability traits at the seams of the migration subsystem. Each seam is a
//! small, cohesive contract: the SQL transaction bundles the block processor
//! hands around, the snapshot producer/restorer pair, the changeset handoff
//! channel, the migrator module the block processor drives, and the
//! resolution registry the vote store exposes.
//!
//! The concrete implementations of the SQL database, the vote store, and the
//! validator store live outside this workspace; `test_utils` provides
//! in-memory doubles faithful to these contracts for the test suites.

/// Account store read access for the mempool.
pub mod accounts;
/// The migrator module contract and snapshot/changeset capabilities.
pub mod module;
/// The resolution registry and vote-store contracts.
pub mod resolutions;
/// SQL executor and transaction bundles.
pub mod sql;
/// In-memory doubles for the external collaborators.
pub mod test_utils;
