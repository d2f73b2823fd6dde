//! Persistence for the order core.
//!
//! One [`OrderStore`] covers the inventory store, the reservation transaction,
//! the payment ledger and the notification dedupe table, so every multi-row
//! change can run as a single transaction. Two implementations are provided:
//! [`InMemoryOrderStore`] for tests and local runs, and [`PostgresOrderStore`].

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use query::{OrderQuery, Page};
pub use store::{ConfirmationOutcome, OrderStore};
