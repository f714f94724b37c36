use super::memory::{apply_batch, visible_tables};
use super::{Catalog, MemoryStore, RowKey, Table};
use crate::core::{Entity, EntitySchema, KeyKind, Result, StorageError};
use crate::repository::{Candidates, Query};
use crate::session::{EntitySet, Session};
use crate::transaction::{
    Change, IsolationLevel, Transaction, TransactionId, TransactionOptions,
};
use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

type Tables = HashMap<String, Table>;
type TrackedKey = (String, RowKey);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Insert,
    Update,
    Upsert,
}

impl WriteKind {
    fn change(self, table: &str, key: RowKey, row: Value) -> Change {
        let table = table.to_string();
        match self {
            WriteKind::Insert => Change::Insert { table, key, row },
            WriteKind::Update => Change::Update { table, key, row },
            WriteKind::Upsert => Change::Upsert { table, key, row },
        }
    }
}

/// A unit of work against a [`MemoryStore`].
///
/// Writes are staged until [`Session::flush`]. Inside a transaction flushed
/// writes are visible to this session only, until commit.
pub struct MemorySession {
    store: MemoryStore,
    pending: Vec<Change>,
    transaction: Option<Transaction>,
    /// Identity map: rows this session has written or loaded
    tracked: HashSet<TrackedKey>,
}

impl MemorySession {
    pub(crate) fn new(store: MemoryStore) -> Self {
        Self {
            store,
            pending: Vec::new(),
            transaction: None,
            tracked: HashSet::new(),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn pending_changes(&self) -> &[Change] {
        &self.pending
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction.as_ref().map(Transaction::id)
    }

    pub fn is_tracked(&self, table: &str, key: &RowKey) -> bool {
        self.tracked.contains(&(table.to_string(), key.clone()))
    }

    /// Catalog plus the rows this session can see
    fn view(&self) -> Result<(Catalog, Tables)> {
        let state = self.store.read()?;
        Ok((
            state.catalog.clone(),
            visible_tables(&state, self.transaction.as_ref()),
        ))
    }

    /// Latest image of a row: staged writes first, then visible rows
    fn lookup(&self, tables: &Tables, table: &str, key: &RowKey) -> Option<Value> {
        if let Some(change) = self.pending.iter().rev().find(|c| c.touches(table, key)) {
            return change.row().cloned();
        }
        tables.get(table).and_then(|t| t.get(key)).cloned()
    }

    /// Stage `value` and every related entity it embeds. Generated keys and
    /// foreign keys are written back into `value`.
    fn stage(
        &self,
        catalog: &Catalog,
        schema: &EntitySchema,
        value: &mut Value,
        kind: WriteKind,
        staged: &mut Vec<Change>,
    ) -> Result<RowKey> {
        let table = schema.table();
        let object = value.as_object_mut().ok_or_else(|| {
            StorageError::ConstraintViolation(format!(
                "'{}' entity must serialize to an object",
                table
            ))
        })?;

        for relation in schema.relations() {
            let Some(related) = object.get_mut(relation.name) else {
                continue;
            };
            if !related.is_object() {
                continue;
            }

            let target = catalog.get(relation.target)?;
            let related_kind = match related.get(target.key()) {
                Some(key) if !target.key_kind().is_unset(key) => WriteKind::Upsert,
                _ => WriteKind::Insert,
            };

            let key = self.stage(catalog, target, related, related_kind, staged)?;
            object.insert(relation.foreign_key.to_string(), key.to_value());
        }

        let current = object.get(schema.key()).cloned().unwrap_or(Value::Null);
        let key = if schema.key_kind().is_unset(&current) {
            if kind == WriteKind::Update {
                return Err(StorageError::ConstraintViolation(format!(
                    "Cannot update a '{}' row without a key",
                    table
                ))
                .into());
            }
            match schema.key_kind() {
                KeyKind::Sequence => Value::from(self.store.next_sequence(table)?),
                KeyKind::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
                KeyKind::Assigned => {
                    return Err(StorageError::ConstraintViolation(format!(
                        "'{}' requires an assigned key",
                        table
                    ))
                    .into());
                }
            }
        } else {
            current
        };
        object.insert(schema.key().to_string(), key.clone());

        let mut row = object.clone();
        for relation in schema.relations() {
            row.remove(relation.name);
        }

        let key = RowKey::from_value(&key)?;
        staged.push(kind.change(table, key.clone(), Value::Object(row)));
        Ok(key)
    }

    fn write_graph<E: Entity>(&mut self, entity: E, kind: WriteKind) -> Result<E> {
        let catalog = self.store.catalog()?;
        let schema = catalog.get(E::TABLE)?;

        let mut value = serde_json::to_value(&entity)?;
        let mut staged = Vec::new();
        self.stage(&catalog, schema, &mut value, kind, &mut staged)?;
        let entity = serde_json::from_value(value)?;

        for change in &staged {
            self.tracked
                .insert((change.table_name().to_string(), change.key().clone()));
        }
        debug!("Staged {} changes rooted at '{}'", staged.len(), E::TABLE);
        self.pending.extend(staged);
        Ok(entity)
    }

    /// Fill relation fields of `row`: eagerly requested paths always, other
    /// relations only when the related row is tracked by this session.
    #[allow(clippy::too_many_arguments)]
    fn materialize(
        &self,
        catalog: &Catalog,
        tables: &Tables,
        schema: &EntitySchema,
        mut row: Value,
        paths: &[Vec<String>],
        loaded: &mut Vec<TrackedKey>,
        stack: &mut Vec<TrackedKey>,
    ) -> Result<Value> {
        for relation in schema.relations() {
            let fk = match row.get(relation.foreign_key) {
                None | Some(Value::Null) => continue,
                Some(fk) => RowKey::from_value(fk)?,
            };
            let target_key = (relation.target.to_string(), fk);
            if stack.contains(&target_key) {
                continue;
            }

            let nested: Vec<Vec<String>> = paths
                .iter()
                .filter(|path| path.first().is_some_and(|head| head == relation.name))
                .map(|path| path[1..].to_vec())
                .collect();
            let eager = !nested.is_empty();
            if !eager && !self.tracked.contains(&target_key) {
                continue;
            }

            let Some(related) = self.lookup(tables, relation.target, &target_key.1) else {
                continue;
            };
            let target = catalog.get(relation.target)?;

            stack.push(target_key.clone());
            let related = self.materialize(
                catalog, tables, target, related, &nested, loaded, stack,
            )?;
            stack.pop();

            if eager {
                loaded.push(target_key);
            }
            if let Some(object) = row.as_object_mut() {
                object.insert(relation.name.to_string(), related);
            }
        }
        Ok(row)
    }

    /// Materialize every visible row of `E`'s table, with eager paths loaded
    fn candidates<E: Entity>(
        &self,
        query: &dyn Query<E>,
    ) -> Result<(Vec<E>, Vec<TrackedKey>)> {
        let (catalog, tables) = self.view()?;
        let schema = catalog.get(E::TABLE)?;
        let paths = resolve_paths(&catalog, schema, &query.eager_load_paths())?;
        let table = tables
            .get(E::TABLE)
            .ok_or_else(|| StorageError::TableNotFound(E::TABLE.to_string()))?;

        let mut loaded = Vec::new();
        let mut entities = Vec::with_capacity(table.len());
        for (key, row) in table.scan() {
            let mut stack = vec![(E::TABLE.to_string(), key.clone())];
            let value = self.materialize(
                &catalog,
                &tables,
                schema,
                row.clone(),
                &paths,
                &mut loaded,
                &mut stack,
            )?;
            entities.push(serde_json::from_value(value)?);
        }
        Ok((entities, loaded))
    }

    fn track<E: Entity>(&mut self, entity: &E) -> Result<()> {
        let key = entity_key(entity)?;
        self.tracked.insert((E::TABLE.to_string(), key));
        Ok(())
    }
}

fn entity_key<E: Entity>(entity: &E) -> Result<RowKey> {
    Ok(RowKey::from_value(&serde_json::to_value(entity.id())?)?)
}

/// Split dotted eager-load paths and check each segment names a relation.
fn resolve_paths(
    catalog: &Catalog,
    schema: &EntitySchema,
    paths: &[String],
) -> Result<Vec<Vec<String>>> {
    let mut resolved = Vec::with_capacity(paths.len());
    for path in paths {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        let mut current = schema;
        for segment in &segments {
            let relation = current.relation(segment).ok_or_else(|| {
                StorageError::UnknownRelation {
                    table: current.table().to_string(),
                    relation: segment.clone(),
                }
            })?;
            current = catalog.get(relation.target)?;
        }
        resolved.push(segments);
    }
    Ok(resolved)
}

#[async_trait]
impl Session for MemorySession {
    fn begin_transaction(&mut self, options: &TransactionOptions) -> Result<()> {
        if let Some(txn) = &self.transaction {
            return Err(StorageError::Transaction(format!(
                "Transaction {} already in progress",
                txn.id()
            ))
            .into());
        }
        if options.isolation_level != IsolationLevel::ReadCommitted {
            debug!(
                "{:?} isolation requested, running read committed",
                options.isolation_level
            );
        }

        let txn = Transaction::new(TransactionId::new(), *options);
        debug!("Began {}", txn.id());
        self.transaction = Some(txn);
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<()> {
        let mut txn = self
            .transaction
            .take()
            .ok_or_else(|| StorageError::Transaction("No transaction in progress".into()))?;
        let id = txn.id();
        let changes = txn.commit()?;

        if !changes.is_empty() {
            let mut state = self.store.write()?;
            let mut tables = state.tables.clone();
            apply_batch(&state.catalog, &mut tables, &changes).map_err(|err| {
                StorageError::Conflict(format!("{} could not be applied: {}", id, err))
            })?;
            state.tables = tables;
        }

        debug!(
            "Committed {} ({} changes, {:?})",
            id,
            changes.len(),
            txn.duration()
        );
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        let mut txn = self
            .transaction
            .take()
            .ok_or_else(|| StorageError::Transaction("No transaction in progress".into()))?;
        let discarded = txn.change_count();
        txn.rollback()?;
        debug!(
            "Rolled back {} ({} changes discarded, {:?})",
            txn.id(),
            discarded,
            txn.duration()
        );
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut state = self.store.write()?;
        let mut tables = visible_tables(&state, self.transaction.as_ref());
        apply_batch(&state.catalog, &mut tables, &self.pending)?;

        let batch = std::mem::take(&mut self.pending);
        let count = batch.len();
        match self.transaction.as_mut() {
            Some(txn) => {
                for change in batch {
                    txn.record_change(change)?;
                }
            }
            None => state.tables = tables,
        }

        debug!("Flushed {} changes", count);
        Ok(())
    }

    async fn flush_async(&mut self) -> Result<()> {
        tokio::task::yield_now().await;
        self.flush()
    }
}

#[async_trait]
impl<E: Entity> EntitySet<E> for MemorySession {
    fn add(&mut self, entity: E) -> Result<E> {
        self.write_graph(entity, WriteKind::Insert)
    }

    async fn add_async(&mut self, entity: E) -> Result<E> {
        tokio::task::yield_now().await;
        self.write_graph(entity, WriteKind::Insert)
    }

    fn find(&mut self, id: &E::Id) -> Result<Option<E>> {
        let key = RowKey::from_value(&serde_json::to_value(id)?)?;
        let (catalog, tables) = self.view()?;
        let Some(row) = self.lookup(&tables, E::TABLE, &key) else {
            return Ok(None);
        };

        let schema = catalog.get(E::TABLE)?;
        let mut stack = vec![(E::TABLE.to_string(), key.clone())];
        let value = self.materialize(&catalog, &tables, schema, row, &[], &mut Vec::new(), &mut stack)?;
        let entity = serde_json::from_value(value)?;

        self.tracked.insert((E::TABLE.to_string(), key));
        Ok(Some(entity))
    }

    async fn find_async(&mut self, id: &E::Id) -> Result<Option<E>> {
        tokio::task::yield_now().await;
        EntitySet::<E>::find(self, id)
    }

    fn update(&mut self, entity: E) -> Result<E> {
        self.write_graph(entity, WriteKind::Update)
    }

    fn remove(&mut self, entity: &E) -> Result<()> {
        let key = entity_key(entity)?;
        self.tracked.remove(&(E::TABLE.to_string(), key.clone()));
        self.pending.push(Change::Delete {
            table: E::TABLE.to_string(),
            key,
        });
        Ok(())
    }

    fn filter(&mut self, query: &dyn Query<E>) -> Result<Vec<E>> {
        let (entities, loaded) = self.candidates(query)?;
        let results = query.filter(Candidates::new(entities)).into_vec();

        for entity in &results {
            self.track(entity)?;
        }
        self.tracked.extend(loaded);
        Ok(results)
    }

    async fn filter_async(&mut self, query: &dyn Query<E>) -> Result<Vec<E>> {
        tokio::task::yield_now().await;
        EntitySet::<E>::filter(self, query)
    }

    fn count(&mut self, query: &dyn Query<E>) -> Result<usize> {
        let (entities, _) = self.candidates(query)?;
        Ok(query.filter(Candidates::new(entities)).count())
    }

    fn any(&mut self, query: &dyn Query<E>) -> Result<bool> {
        let (entities, _) = self.candidates(query)?;
        Ok(query.filter(Candidates::new(entities)).any())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Some(txn) = &self.transaction {
            debug!(
                "Session dropped with {} open, discarding {} changes",
                txn.id(),
                txn.change_count()
            );
        }
        self.store.session_dropped();
    }
}
