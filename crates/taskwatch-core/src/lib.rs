//! Core types shared by the taskwatch crates: order summaries, the order
//! ledger, and snapshot change detection.

pub mod account;
pub mod diff;
pub mod order;

pub use account::AccountCredentials;
pub use diff::{DiffResult, PointsUpdate, compute_diff};
pub use order::{OrderLedger, OrderSummary, descending_keys};
