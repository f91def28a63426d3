//! Services module for invoice-chain-service.

pub mod database;
pub mod memory;
pub mod metrics;
pub mod store;

pub use database::Database;
pub use memory::InMemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use store::{ChainFilter, ChainSlot, InvoiceStore};
