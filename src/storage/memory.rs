use super::{Catalog, MemorySession, RowKey, Table};
use crate::core::{Entity, EntitySchema, Result, StorageError};
use crate::session::SessionFactory;
use crate::transaction::{Change, Transaction};
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory entity store.
///
/// Cloning yields another handle to the same store. Committed state lives
/// here; each [`MemorySession`] stages its own writes on top of it.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: RwLock<StoreState>,
    sessions_created: AtomicUsize,
    sessions_alive: AtomicUsize,
}

pub(crate) struct StoreState {
    pub(crate) catalog: Catalog,
    pub(crate) tables: HashMap<String, Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_catalog(Catalog::new())
    }

    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::default()
    }

    fn from_catalog(catalog: Catalog) -> Self {
        let tables = catalog
            .list_tables()
            .into_iter()
            .map(|name| (name.to_string(), Table::new(name)))
            .collect();

        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(StoreState { catalog, tables }),
                sessions_created: AtomicUsize::new(0),
                sessions_alive: AtomicUsize::new(0),
            }),
        }
    }

    /// Register an entity type on a live store.
    ///
    /// Its relation targets must already be registered.
    pub fn register<E: Entity>(&self) -> Result<()> {
        let schema = E::schema();
        let mut state = self.write()?;

        let catalog = state.catalog.clone().with_schema(schema.clone())?;
        catalog.validate()?;

        state
            .tables
            .insert(schema.table().to_string(), Table::new(schema.table()));
        state.catalog = catalog;
        debug!("Registered table '{}'", schema.table());
        Ok(())
    }

    /// Open a new session on this store
    pub fn session(&self) -> MemorySession {
        self.inner.sessions_created.fetch_add(1, Ordering::SeqCst);
        self.inner.sessions_alive.fetch_add(1, Ordering::SeqCst);
        MemorySession::new(self.clone())
    }

    pub fn catalog(&self) -> Result<Catalog> {
        Ok(self.read()?.catalog.clone())
    }

    /// Number of committed rows in `table`
    pub fn row_count(&self, table: &str) -> Result<usize> {
        let state = self.read()?;
        state
            .tables
            .get(table)
            .map(Table::len)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()).into())
    }

    /// Total sessions ever opened on this store
    pub fn sessions_created(&self) -> usize {
        self.inner.sessions_created.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet dropped
    pub fn sessions_alive(&self) -> usize {
        self.inner.sessions_alive.load(Ordering::SeqCst)
    }

    pub(crate) fn session_dropped(&self) {
        self.inner.sessions_alive.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        Ok(self.inner.state.read()?)
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        Ok(self.inner.state.write()?)
    }

    /// Draw the next sequence key of `table`
    pub(crate) fn next_sequence(&self, table: &str) -> Result<i64> {
        let mut state = self.write()?;
        let table = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        Ok(table.next_key())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFactory<MemorySession> for MemoryStore {
    fn create_session(&self) -> Result<MemorySession> {
        Ok(self.session())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("sessions_created", &self.sessions_created())
            .field("sessions_alive", &self.sessions_alive())
            .finish()
    }
}

#[derive(Default)]
pub struct MemoryStoreBuilder {
    schemas: Vec<EntitySchema>,
}

impl MemoryStoreBuilder {
    pub fn register<E: Entity>(mut self) -> Self {
        self.schemas.push(E::schema());
        self
    }

    pub fn build(self) -> Result<MemoryStore> {
        let mut catalog = Catalog::new();
        for schema in self.schemas {
            catalog = catalog.with_schema(schema)?;
        }
        catalog.validate()?;

        Ok(MemoryStore::from_catalog(catalog))
    }
}

/// Committed tables with `transaction`'s flushed changes laid over them
pub(crate) fn visible_tables(
    state: &StoreState,
    transaction: Option<&Transaction>,
) -> HashMap<String, Table> {
    let mut tables = state.tables.clone();
    if let Some(txn) = transaction {
        for change in txn.changes() {
            if let Some(table) = tables.get_mut(change.table_name()) {
                table.overlay(change);
            }
        }
    }
    tables
}

/// Apply a batch of changes to `tables`, then check referential integrity.
///
/// On error `tables` is left partially modified; callers work on a scratch
/// copy and only keep it on success.
pub(crate) fn apply_batch(
    catalog: &Catalog,
    tables: &mut HashMap<String, Table>,
    changes: &[Change],
) -> std::result::Result<(), StorageError> {
    for change in changes {
        tables
            .get_mut(change.table_name())
            .ok_or_else(|| StorageError::TableNotFound(change.table_name().to_string()))?
            .apply(change)?;
    }

    for change in changes {
        check_references(catalog, tables, change)?;
    }
    Ok(())
}

fn check_references(
    catalog: &Catalog,
    tables: &HashMap<String, Table>,
    change: &Change,
) -> std::result::Result<(), StorageError> {
    let table = change.table_name();

    if change.is_delete() {
        for (schema, relation) in catalog.referencing(table) {
            let Some(referencing) = tables.get(schema.table()) else {
                continue;
            };
            let still_referenced = referencing.scan().any(|(_, row)| {
                row.get(relation.foreign_key)
                    .and_then(|fk| RowKey::from_value(fk).ok())
                    .is_some_and(|fk| &fk == change.key())
            });
            if still_referenced {
                return Err(StorageError::ConstraintViolation(format!(
                    "Row {} of '{}' is still referenced by '{}.{}'",
                    change.key(),
                    table,
                    schema.table(),
                    relation.foreign_key
                )));
            }
        }
        return Ok(());
    }

    // A later change in the same batch may have removed the row again
    let Some(row) = tables.get(table).and_then(|t| t.get(change.key())) else {
        return Ok(());
    };

    for relation in catalog.get(table)?.relations() {
        let fk = match row.get(relation.foreign_key) {
            None | Some(serde_json::Value::Null) => continue,
            Some(fk) => RowKey::from_value(fk)?,
        };
        let exists = tables
            .get(relation.target)
            .is_some_and(|target| target.contains(&fk));
        if !exists {
            return Err(StorageError::ConstraintViolation(format!(
                "'{}.{}' references missing row {} of '{}'",
                table, relation.foreign_key, fk, relation.target
            )));
        }
    }
    Ok(())
}
