//! # dstm
//!
//! Distributed software transactional memory over a coordination service.
//!
//! Clients create named distributed **refs** and mutate them inside
//! transactions that are atomic, consistent, and isolated across the
//! cluster, and named distributed **atoms** mutated with single-cell
//! compare-and-set. All coordination (ordering, locks, durable state)
//! goes through a coordination service reached via the
//! [`Coordinator`] trait; [`MemoryCoordinator`] is the bundled in-process
//! implementation.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use dstm::{Coordinator, MemoryCoordinator, StmClient, StmConfig};
//!
//! fn main() -> dstm::Result<()> {
//!     let coord: Arc<dyn Coordinator> = Arc::new(MemoryCoordinator::new().session());
//!     let client = StmClient::connect(coord, StmConfig::default())?;
//!
//!     // Refs change inside transactions
//!     let account = client.stm_ref("account", Some(100i64))?;
//!     let log = client.stm_ref("log", Some(Vec::<String>::new()))?;
//!     client.transact(|tx| {
//!         let balance = account.alter(tx, |b| b - 30)?;
//!         log.alter(tx, |mut entries| {
//!             entries.push(format!("withdrew 30, now {balance}"));
//!             entries
//!         })?;
//!         Ok(())
//!     })?;
//!     assert_eq!(account.read()?, 70);
//!
//!     // Atoms are independent CAS cells
//!     let hits = client.atom("hits", Some(0u64))?;
//!     hits.swap(|n| n + 1)?;
//!     assert_eq!(hits.read()?, 1);
//!     Ok(())
//! }
//! ```
//!
//! # Transactions
//!
//! [`StmClient::transact`] is the sole transactional entry point. The block
//! receives an explicit [`Txn`] context and may run several times under
//! contention, so it must be pure apart from its ref operations. Reads are
//! snapshot-stable for the transaction's lifetime; writes are staged in
//! memory and become visible atomically at commit. Conflicts retry with
//! jittered exponential backoff up to the configured ceiling; validators
//! veto commits; watches fire asynchronously after the visibility boundary.
//!
//! # Serialization
//!
//! Values are any `serde` type, encoded as MessagePack (via `rmp-serde`) on
//! the wire. Encoding round-trips; refs and atoms of the same name must be
//! used with the same type.
//!
//! # Architecture
//!
//! Internal crates (`dstm-core`, `dstm-coordinator`, `dstm-storage`,
//! `dstm-concurrency`) carry the layers; this crate is the public surface.

mod atom;
mod client;
mod dispatch;
mod ref_cell;

pub use atom::TAtom;
pub use client::StmClient;
pub use ref_cell::{ContainerMode, TRef};

pub use dstm_concurrency::Txn;
pub use dstm_coordinator::{
    Coordinator, CreateMode, MemoryCoordinator, MemorySession, SessionId, Stat, Watch, WatchEvent,
};
pub use dstm_core::{Error, Result, StmConfig, StmLayout, TransactionState, TxnId};
pub use dstm_storage::{CoordinatorContainer, LocalContainer, StateContainer};
