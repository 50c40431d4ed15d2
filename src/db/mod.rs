//! Database module: persisted ledger of delivered items and source cursors.
//!
//! This module is split into two submodules:
//! - `model`: row types returned by the inspection queries.
//! - `repo`: the [`Store`] handle and its SQL.
//!
//! The store is opened once at startup and shared by reference with the
//! orchestrator and every adapter.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{OffsetRecord, SeenCount};
