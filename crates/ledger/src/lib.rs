//! Round and spin storage for the spin saga core.
//!
//! Rounds are created by an atomic upsert on `(session_id, ext_round_id)`;
//! spins form an append-only ledger that is never updated or deleted.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{LedgerError, Result};
pub use memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use store::{LedgerStore, LedgerStoreExt};
