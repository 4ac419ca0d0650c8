//! Core types for the distributed STM
//!
//! This crate holds everything the other layers agree on: the error
//! taxonomy, transaction identifiers and lifecycle states, the value codec,
//! the configuration surface, and the coordinator subtree layout.
//!
//! Nothing here talks to a coordination service; higher crates
//! (`dstm-coordinator`, `dstm-storage`, `dstm-concurrency`) build on these
//! definitions.

pub mod codec;
pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::StmConfig;
pub use error::{Error, Result};
pub use paths::StmLayout;
pub use types::{TransactionState, TxnId};
