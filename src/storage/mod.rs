// ============================================================================
// In-memory storage engine
// ============================================================================
//
// - catalog: registered entity schemas (copy-on-write)
// - table:   row keys and persistent row maps
// - memory:  the shared store, batch application and integrity checks
// - session: per-session change staging, transactions and relation loading
//
// ============================================================================

pub mod catalog;
pub mod memory;
pub mod session;
pub mod table;

pub use catalog::Catalog;
pub use memory::{MemoryStore, MemoryStoreBuilder};
pub use session::MemorySession;
pub use table::{RowKey, Table};
