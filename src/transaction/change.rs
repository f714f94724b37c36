// ============================================================================
// Change Tracking
// ============================================================================
//
// Command Pattern for entity writes. A session stages changes until flush;
// inside a transaction the flushed changes are kept until commit.
//
// ============================================================================

use crate::storage::RowKey;
use serde_json::Value;

/// A single staged write against one table row
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert a new row; fails if the key exists
    Insert { table: String, key: RowKey, row: Value },

    /// Replace an existing row; fails if the key is missing
    Update { table: String, key: RowKey, row: Value },

    /// Insert or replace, decided against the state visible at flush
    Upsert { table: String, key: RowKey, row: Value },

    /// Delete an existing row; fails if the key is missing
    Delete { table: String, key: RowKey },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::Insert { table, .. }
            | Change::Update { table, .. }
            | Change::Upsert { table, .. }
            | Change::Delete { table, .. } => table,
        }
    }

    pub fn key(&self) -> &RowKey {
        match self {
            Change::Insert { key, .. }
            | Change::Update { key, .. }
            | Change::Upsert { key, .. }
            | Change::Delete { key, .. } => key,
        }
    }

    /// The row image written by this change, `None` for deletes
    pub fn row(&self) -> Option<&Value> {
        match self {
            Change::Insert { row, .. } | Change::Update { row, .. } | Change::Upsert { row, .. } => {
                Some(row)
            }
            Change::Delete { .. } => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Change::Delete { .. })
    }

    pub fn touches(&self, table: &str, key: &RowKey) -> bool {
        self.table_name() == table && self.key() == key
    }
}
