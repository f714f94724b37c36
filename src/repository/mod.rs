pub mod flush;
pub mod query;

pub use flush::FlushPolicy;
pub use query::{AllQuery, Candidates, FnQuery, Query};

use crate::context::{ContextService, Scope, ScopedSession};
use crate::core::{Entity, KeyKind, PersistenceError, Result};
use crate::session::{EntitySet, Session};
use log::debug;
use std::marker::PhantomData;
use std::sync::Arc;

/// CRUD and query access to entities of type `E`.
///
/// Every operation resolves its session through the scope: the ambient
/// session when one is set (for example inside a unit of work), otherwise a
/// private session that is released before the call returns.
pub struct Repository<E, S: Session> {
    context: Arc<ContextService<S>>,
    flush_policy: FlushPolicy,
    _entity: PhantomData<fn() -> E>,
}

impl<E, S: Session> Clone for Repository<E, S> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            flush_policy: self.flush_policy,
            _entity: PhantomData,
        }
    }
}

impl<E, S> Repository<E, S>
where
    E: Entity,
    S: EntitySet<E>,
{
    pub fn new(context: Arc<ContextService<S>>, flush_policy: FlushPolicy) -> Self {
        Self {
            context,
            flush_policy,
            _entity: PhantomData,
        }
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        self.flush_policy
    }

    pub fn context(&self) -> &Arc<ContextService<S>> {
        &self.context
    }

    /// Add `entity` and its related graph. Returns the entity with generated
    /// keys filled in.
    pub fn add(&self, scope: &mut Scope<S>, entity: E) -> Result<E> {
        Self::validate_new(&entity)?;
        self.execute(scope, |session, owned| {
            let entity = session.add(entity)?;
            self.flush_policy.after_write(session, owned)?;
            Ok(entity)
        })
    }

    pub async fn add_async(&self, scope: &mut Scope<S>, entity: E) -> Result<E> {
        Self::validate_new(&entity)?;
        let scoped = self.context.acquire_scoped(scope)?;
        let result = self.add_in(&scoped, entity).await;
        scoped.release(result)
    }

    pub fn get(&self, scope: &mut Scope<S>, id: &E::Id) -> Result<Option<E>> {
        self.execute(scope, |session, _| session.find(id))
    }

    pub async fn get_async(&self, scope: &mut Scope<S>, id: &E::Id) -> Result<Option<E>> {
        let scoped = self.context.acquire_scoped(scope)?;
        let result = self.get_in(&scoped, id).await;
        scoped.release(result)
    }

    pub fn update(&self, scope: &mut Scope<S>, entity: E) -> Result<E> {
        Self::validate_persisted(&entity)?;
        self.execute(scope, |session, owned| {
            let entity = session.update(entity)?;
            self.flush_policy.after_write(session, owned)?;
            Ok(entity)
        })
    }

    pub fn delete(&self, scope: &mut Scope<S>, entity: &E) -> Result<()> {
        Self::validate_persisted(entity)?;
        self.execute(scope, |session, owned| {
            session.remove(entity)?;
            self.flush_policy.after_write(session, owned)
        })
    }

    pub fn query(&self, scope: &mut Scope<S>, query: &dyn Query<E>) -> Result<Vec<E>> {
        Self::validate_paths(&query.eager_load_paths())?;
        self.execute(scope, |session, _| session.filter(query))
    }

    pub async fn query_async(&self, scope: &mut Scope<S>, query: &dyn Query<E>) -> Result<Vec<E>> {
        Self::validate_paths(&query.eager_load_paths())?;
        let scoped = self.context.acquire_scoped(scope)?;
        let result = self.query_in(&scoped, query).await;
        scoped.release(result)
    }

    pub fn count(&self, scope: &mut Scope<S>, query: &dyn Query<E>) -> Result<usize> {
        Self::validate_paths(&query.eager_load_paths())?;
        self.execute(scope, |session, _| session.count(query))
    }

    pub fn any(&self, scope: &mut Scope<S>, query: &dyn Query<E>) -> Result<bool> {
        Self::validate_paths(&query.eager_load_paths())?;
        self.execute(scope, |session, _| session.any(query))
    }

    /// Query with a filter closure over the candidate set.
    pub fn query_fn<F>(&self, scope: &mut Scope<S>, filter: F) -> Result<Vec<E>>
    where
        F: for<'a> Fn(Candidates<'a, E>) -> Candidates<'a, E> + Send + Sync,
    {
        self.query(scope, &FnQuery::new(filter))
    }

    pub async fn query_fn_async<F>(&self, scope: &mut Scope<S>, filter: F) -> Result<Vec<E>>
    where
        F: for<'a> Fn(Candidates<'a, E>) -> Candidates<'a, E> + Send + Sync,
    {
        self.query_async(scope, &FnQuery::new(filter)).await
    }

    /// Query with a filter closure, eagerly loading `paths`.
    pub fn query_fn_with<F, I, P>(&self, scope: &mut Scope<S>, filter: F, paths: I) -> Result<Vec<E>>
    where
        F: for<'a> Fn(Candidates<'a, E>) -> Candidates<'a, E> + Send + Sync,
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.query(scope, &FnQuery::with_paths(filter, paths))
    }

    /// Persist staged writes of the ambient session.
    ///
    /// A no-op under [`FlushPolicy::Suppressed`] or when the scope has no
    /// session, since a private session never holds staged writes.
    pub fn flush(&self, scope: &mut Scope<S>) -> Result<()> {
        if !self.flush_policy.allows_explicit_flush() {
            debug!("Explicit flush of '{}' ignored, flushing is suppressed", E::TABLE);
            return Ok(());
        }
        let Some(handle) = self.context.current(scope) else {
            return Ok(());
        };
        let mut session = handle.lock()?;
        session.flush()
    }

    pub async fn flush_async(&self, scope: &mut Scope<S>) -> Result<()> {
        if !self.flush_policy.allows_explicit_flush() {
            debug!("Explicit flush of '{}' ignored, flushing is suppressed", E::TABLE);
            return Ok(());
        }
        let Some(handle) = self.context.current(scope) else {
            return Ok(());
        };
        let mut session = handle.lock_async().await?;
        session.flush_async().await
    }

    fn execute<T, F>(&self, scope: &mut Scope<S>, op: F) -> Result<T>
    where
        F: FnOnce(&mut S, bool) -> Result<T>,
    {
        let scoped = self.context.acquire_scoped(scope)?;
        let owned = scoped.owns_session();
        let result = scoped.session().and_then(|handle| {
            let mut session = handle.lock()?;
            op(&mut session, owned)
        });
        scoped.release(result)
    }

    async fn add_in(&self, scoped: &ScopedSession<'_, S>, entity: E) -> Result<E> {
        let mut session = scoped.session()?.lock_async().await?;
        let entity = session.add_async(entity).await?;
        self.flush_policy
            .after_write_async(&mut *session, scoped.owns_session())
            .await?;
        Ok(entity)
    }

    async fn get_in(&self, scoped: &ScopedSession<'_, S>, id: &E::Id) -> Result<Option<E>> {
        let mut session = scoped.session()?.lock_async().await?;
        session.find_async(id).await
    }

    async fn query_in(&self, scoped: &ScopedSession<'_, S>, query: &dyn Query<E>) -> Result<Vec<E>> {
        let mut session = scoped.session()?.lock_async().await?;
        session.filter_async(query).await
    }

    fn validate_new(entity: &E) -> Result<()> {
        if E::KEY_KIND == KeyKind::Assigned && entity.is_transient() {
            return Err(PersistenceError::argument(
                "entity",
                format!("'{}' entities need an assigned key before they are added", E::TABLE),
            ));
        }
        Ok(())
    }

    fn validate_persisted(entity: &E) -> Result<()> {
        if entity.is_transient() {
            return Err(PersistenceError::argument(
                "entity",
                format!("'{}' entity has no key; add it first", E::TABLE),
            ));
        }
        Ok(())
    }

    fn validate_paths(paths: &[String]) -> Result<()> {
        for path in paths {
            if path.trim().is_empty() {
                return Err(PersistenceError::argument("path", "eager-load path is blank"));
            }
            if path.split('.').any(|segment| segment.trim().is_empty()) {
                return Err(PersistenceError::argument(
                    "path",
                    format!("eager-load path '{}' has an empty segment", path),
                ));
            }
        }
        Ok(())
    }
}
