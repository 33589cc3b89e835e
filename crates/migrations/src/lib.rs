// Path: crates/migrations/src/lib.rs
#![forbid(unsafe_code)]

//! Long-running, zero-downtime network migrations for Meridian. A network can
//! upgrade itself into a new network (new chain ID, possibly a new validator
//! set or parameters) without service interruption.
//!
//! The process is as follows:
//!
//!  1. The network votes to create a new network. When enough validator power
//!     approves, the migration is scheduled.
//!
//!  2. Each operator stands up a node of the new network next to their
//!     current node. The new node restores from the genesis snapshot the old
//!     node produced, then pulls every committed block's changeset from it.
//!
//!  3. The two networks run in parallel until the old network reaches its
//!     scheduled end height. At that point the new network takes over and the
//!     old network halts.
//!
//! While a migration is scheduled or running, the old network cannot deploy
//! or drop datasets, transfer balances, vote on resolutions, or change
//! validator power; the mempool firewall in `meridian-mempool` enforces this.

/// Per-height persistence of the changesets the old chain forwards.
pub mod changesets;
/// Pull client used by the new network to sync from the old one.
pub mod client;
/// Genesis snapshot verification, restore, and post-restore cleanup.
pub mod genesis;
/// The migration orchestrator driven by the block processor.
pub mod migrator;
/// The `start_migration` resolution kind and its resolve callback.
pub mod resolution;
/// SQL-backed migration state store.
pub mod store;

pub use migrator::Migrator;
pub use resolution::{migration_resolution, START_MIGRATION_KIND};
