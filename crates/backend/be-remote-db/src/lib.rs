pub mod db;
pub mod error;
pub mod memory;
pub mod store;
pub mod types;

pub use db::DatabaseManager;
pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use store::{SettlementStore, SettlementTx};
pub use types::*;
