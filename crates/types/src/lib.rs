// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Meridian Types
//!
//! This crate is the foundational library for the Meridian node, containing
//! all core data structures, error types, and configuration objects shared by
//! the migration subsystem, the mempool, and the block processor.
//!
//! ## Architectural Role
//!
//! As the base crate, `meridian-types` has minimal dependencies and is itself
//! a dependency for almost every other crate in the workspace. This structure
//! prevents circular dependencies and provides a stable, canonical definition
//! for shared types like `BlockContext`, `Transaction`, `MigrationStatus`,
//! and the error enums.

/// The maximum size in bytes of a single changeset chunk handed from the
/// block processor to the migrator.
pub const MAX_CHANGESET_CHUNK_BYTES: usize = 4 * 1024 * 1024; // 4 MiB

/// A top-level, crate-wide `Result` type alias with a default error type.
pub type Result<T, E = crate::error::MigrationError> = std::result::Result<T, E>;

/// Block and chain context structures carried through block execution.
pub mod chain;
/// The canonical, deterministic binary codec for consensus-critical state.
pub mod codec;
/// Shared configuration structures for node components.
pub mod config;
/// A unified set of all error types used across the workspace.
pub mod error;
/// Migration lifecycle types: status, declaration, active record, metadata.
pub mod migrations;
/// Transaction payloads and the payload-kind taxonomy.
pub mod transaction;
