use crate::core::{EntitySchema, Relation, StorageError};
use std::collections::HashMap;
use std::sync::Arc;

/// Registered entity schemas.
///
/// Immutable once built; adding a schema returns a new catalog
/// (copy-on-write), so clones are cheap and lock-free to read.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    schemas: Arc<HashMap<String, EntitySchema>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a schema, returning the new catalog
    pub fn with_schema(self, schema: EntitySchema) -> Result<Self, StorageError> {
        let name = schema.table().to_string();

        if self.schemas.contains_key(&name) {
            return Err(StorageError::TableExists(name));
        }

        let mut schemas = (*self.schemas).clone();
        schemas.insert(name, schema);

        Ok(Self {
            schemas: Arc::new(schemas),
        })
    }

    pub fn get(&self, table: &str) -> Result<&EntitySchema, StorageError> {
        self.schemas
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.schemas.contains_key(table)
    }

    pub fn list_tables(&self) -> Vec<&str> {
        self.schemas.keys().map(|s| s.as_str()).collect()
    }

    /// Every relation, on any table, that points at `target`
    pub fn referencing<'a>(
        &'a self,
        target: &'a str,
    ) -> impl Iterator<Item = (&'a EntitySchema, &'a Relation)> + 'a {
        self.schemas.values().flat_map(move |schema| {
            schema
                .relations()
                .iter()
                .filter(move |r| r.target == target)
                .map(move |r| (schema, r))
        })
    }

    /// Check that every relation points at a registered table.
    pub fn validate(&self) -> Result<(), StorageError> {
        for schema in self.schemas.values() {
            for relation in schema.relations() {
                if !self.table_exists(relation.target) {
                    return Err(StorageError::TableNotFound(relation.target.to_string()));
                }
            }
        }
        Ok(())
    }
}
