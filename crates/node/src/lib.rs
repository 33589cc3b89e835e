// Path: crates/node/src/lib.rs
#![forbid(unsafe_code)]

//! Node-side integration of the Meridian migration subsystem: the
//! block-processor hook that drives the migrator inside each block commit,
//! the boot-time genesis restore for nodes of a new network, and the HTTP
//! pull API old-network nodes serve to their new-network counterparts.
//!
//! This crate is embedded by the full node; it owns no consensus engine and
//! no SQL engine, only the seams the migration subsystem needs from them.

/// The block-processor hook around the migrator.
pub mod block_processor;
/// Boot sequence: config loading and genesis snapshot restore.
pub mod boot;
/// The HTTP pull API served to new-network nodes.
pub mod rpc;
/// Tracing initialization.
pub mod telemetry;

pub use block_processor::BlockProcessor;
