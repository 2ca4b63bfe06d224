//! Durable store access for the order tracking engine.
//!
//! [`PersistenceGateway`] is the seam between the engine and the store
//! holding positions, orders, wallets and ledger entries. [`MemoryGateway`]
//! implements it in process, seeded from a JSON file, and can mirror every
//! order and ledger write to daily JSON Lines files through [`AuditWriter`].

pub mod error;
pub mod gateway;
pub mod memory;
pub mod writer;

pub use error::{PersistenceError, PersistenceResult};
pub use gateway::{DynGateway, PersistenceGateway};
pub use memory::MemoryGateway;
pub use writer::{AuditWriter, JsonLinesWriter};
