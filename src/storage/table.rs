use crate::core::StorageError;
use crate::transaction::Change;
use im::OrdMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Primary key of a stored row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowKey {
    Int(i64),
    Text(String),
}

impl RowKey {
    pub fn from_value(value: &Value) -> Result<Self, StorageError> {
        match value {
            Value::Number(n) => n.as_i64().map(RowKey::Int).ok_or_else(|| {
                StorageError::ConstraintViolation(format!("Key {} is not an integer", n))
            }),
            Value::String(s) => Ok(RowKey::Text(s.clone())),
            other => Err(StorageError::ConstraintViolation(format!(
                "Unsupported key value {}",
                other
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RowKey::Int(n) => Value::from(*n),
            RowKey::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Int(n) => write!(f, "{}", n),
            RowKey::Text(s) => write!(f, "'{}'", s),
        }
    }
}

/// Rows of one entity table.
///
/// Backed by a persistent map, so cloning is O(1) and a clone can be
/// mutated freely as a scratch copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    name: String,
    rows: OrdMap<RowKey, Value>,
    next_seq: i64,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: OrdMap::new(),
            next_seq: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &RowKey) -> Option<&Value> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &RowKey) -> bool {
        self.rows.contains_key(key)
    }

    /// Rows in key order
    pub fn scan(&self) -> impl Iterator<Item = (&RowKey, &Value)> {
        self.rows.iter()
    }

    /// Draw the next sequence key
    pub fn next_key(&mut self) -> i64 {
        let key = self.next_seq;
        self.next_seq += 1;
        key
    }

    /// Apply a change, enforcing key existence rules.
    pub fn apply(&mut self, change: &Change) -> Result<(), StorageError> {
        match change {
            Change::Insert { key, row, .. } => {
                if self.contains(key) {
                    return Err(StorageError::DuplicateKey {
                        table: self.name.clone(),
                        key: key.to_string(),
                    });
                }
                self.put(key.clone(), row.clone());
            }
            Change::Update { key, row, .. } => {
                if !self.contains(key) {
                    return Err(self.missing(key));
                }
                self.put(key.clone(), row.clone());
            }
            Change::Upsert { key, row, .. } => self.put(key.clone(), row.clone()),
            Change::Delete { key, .. } => {
                if self.rows.remove(key).is_none() {
                    return Err(self.missing(key));
                }
            }
        }
        Ok(())
    }

    /// Apply a change without existence checks; last write wins.
    pub fn overlay(&mut self, change: &Change) {
        match change {
            Change::Insert { key, row, .. }
            | Change::Update { key, row, .. }
            | Change::Upsert { key, row, .. } => self.put(key.clone(), row.clone()),
            Change::Delete { key, .. } => {
                self.rows.remove(key);
            }
        }
    }

    fn put(&mut self, key: RowKey, row: Value) {
        if let RowKey::Int(n) = key
            && n >= self.next_seq
        {
            self.next_seq = n + 1;
        }
        self.rows.insert(key, row);
    }

    fn missing(&self, key: &RowKey) -> StorageError {
        StorageError::RowNotFound {
            table: self.name.clone(),
            key: key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(key: i64) -> Change {
        Change::Insert {
            table: "foos".into(),
            key: RowKey::Int(key),
            row: json!({ "foo_id": key }),
        }
    }

    #[test]
    fn test_row_key_from_value() {
        assert_eq!(RowKey::from_value(&json!(4)).unwrap(), RowKey::Int(4));
        assert_eq!(
            RowKey::from_value(&json!("abc")).unwrap(),
            RowKey::Text("abc".into())
        );
        assert!(RowKey::from_value(&json!(1.5)).is_err());
        assert!(RowKey::from_value(&Value::Null).is_err());
        assert_eq!(RowKey::Int(9).to_value(), json!(9));
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let mut table = Table::new("foos");
        table.apply(&insert(1)).unwrap();

        let err = table.apply(&insert(1)).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { ref key, .. } if key == "1"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_update_and_delete_require_row() {
        let mut table = Table::new("foos");
        let update = Change::Update {
            table: "foos".into(),
            key: RowKey::Int(3),
            row: json!({}),
        };
        assert!(matches!(
            table.apply(&update),
            Err(StorageError::RowNotFound { .. })
        ));

        let delete = Change::Delete {
            table: "foos".into(),
            key: RowKey::Int(3),
        };
        assert!(table.apply(&delete).is_err());
    }

    #[test]
    fn test_sequence_skips_explicit_keys() {
        let mut table = Table::new("foos");
        assert_eq!(table.next_key(), 1);
        table.apply(&insert(10)).unwrap();
        assert_eq!(table.next_key(), 11);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut table = Table::new("foos");
        table.apply(&insert(1)).unwrap();

        let mut scratch = table.clone();
        scratch.overlay(&Change::Delete {
            table: "foos".into(),
            key: RowKey::Int(1),
        });
        scratch.overlay(&insert(2));

        assert!(table.contains(&RowKey::Int(1)));
        assert!(!scratch.contains(&RowKey::Int(1)));
        assert_eq!(scratch.scan().count(), 1);
    }
}
