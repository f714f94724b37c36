use super::Scope;
use crate::core::{PersistenceError, Result};
use crate::session::{PoolStats, Session, SessionFactory, SessionHandle, SessionPool};
use log::{debug, error, warn};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Resolves, creates and releases the ambient session of a scope.
///
/// With a pool configured new sessions are borrowed from it and returned on
/// release; otherwise they come from the factory and are dropped.
pub struct ContextService<S: Session> {
    factory: Arc<dyn SessionFactory<S>>,
    pool: Option<Arc<SessionPool<S>>>,
}

impl<S: Session> ContextService<S> {
    pub fn new(factory: Arc<dyn SessionFactory<S>>) -> Self {
        Self {
            factory,
            pool: None,
        }
    }

    pub fn with_pool(factory: Arc<dyn SessionFactory<S>>, pool: Arc<SessionPool<S>>) -> Self {
        Self {
            factory,
            pool: Some(pool),
        }
    }

    /// Service backed by a new pool of `max_retained` idle sessions
    pub fn pooled(factory: Arc<dyn SessionFactory<S>>, max_retained: usize) -> Self {
        let pool = Arc::new(SessionPool::new(Arc::clone(&factory), max_retained));
        Self::with_pool(factory, pool)
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    pub fn has_current(&self, scope: &Scope<S>) -> bool {
        scope.has_session()
    }

    pub fn current(&self, scope: &Scope<S>) -> Option<SessionHandle<S>> {
        scope.session().cloned()
    }

    /// Give `scope` a session of its own.
    ///
    /// # Errors
    /// `AlreadyActive` if the scope already has one.
    pub fn init(&self, scope: &mut Scope<S>) -> Result<SessionHandle<S>> {
        if scope.has_session() {
            return Err(PersistenceError::AlreadyActive);
        }

        let handle = match &self.pool {
            Some(pool) => SessionHandle::pooled(pool.borrow()?, pool),
            None => SessionHandle::new(self.factory.create_session()?),
        };
        scope.attach(handle.clone())?;

        debug!("Initialized {} ({:?})", handle.id(), handle.origin());
        Ok(handle)
    }

    /// Empty the slot of `scope`, releasing the session if the scope owns it.
    ///
    /// A pooled session goes back to the pool once every handle to it,
    /// including the one returned by [`ContextService::init`], is dropped.
    ///
    /// # Errors
    /// `NotSet` if the scope has no session.
    pub fn clear(&self, scope: &mut Scope<S>) -> Result<()> {
        let (handle, owned) = scope.detach()?;
        if !owned {
            debug!("Detached inherited {}", handle.id());
            return Ok(());
        }

        self.release(handle);
        Ok(())
    }

    fn release(&self, handle: SessionHandle<S>) {
        let others = handle.ref_count() - 1;
        if others > 0 {
            debug!(
                "Released {} ({:?}), {} other handles keep it until dropped",
                handle.id(),
                handle.origin(),
                others
            );
        } else {
            debug!("Released {} ({:?})", handle.id(), handle.origin());
        }
    }

    /// Session for one operation: the ambient one if the scope has it,
    /// otherwise a private session released by the returned guard.
    pub fn acquire_scoped<'a>(&'a self, scope: &'a mut Scope<S>) -> Result<ScopedSession<'a, S>> {
        let owned = if scope.has_session() {
            false
        } else {
            self.init(scope)?;
            true
        };

        Ok(ScopedSession {
            context: self,
            scope,
            owned,
            released: false,
        })
    }

    /// Private session for a unit of work.
    ///
    /// # Errors
    /// `AlreadyActive` if the scope already has a session.
    pub fn begin_owned<'a>(&'a self, scope: &'a mut Scope<S>) -> Result<ScopedSession<'a, S>> {
        self.init(scope)?;
        Ok(ScopedSession {
            context: self,
            scope,
            owned: true,
            released: false,
        })
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(|pool| pool.stats())
    }
}

/// Session acquired for the duration of one operation.
///
/// Dereferences to the scope it was acquired on. An owned session is
/// cleared by [`ScopedSession::release`], or on drop if the operation
/// panicked or its future was cancelled.
pub struct ScopedSession<'a, S: Session> {
    context: &'a ContextService<S>,
    scope: &'a mut Scope<S>,
    owned: bool,
    released: bool,
}

impl<S: Session> ScopedSession<'_, S> {
    pub fn session(&self) -> Result<&SessionHandle<S>> {
        self.scope.session().ok_or(PersistenceError::NotSet)
    }

    pub fn owns_session(&self) -> bool {
        self.owned
    }

    /// Release the session and pass `result` through.
    ///
    /// If both the operation and the release fail, the operation's error is
    /// returned and the release error is logged.
    pub fn release<T, E>(mut self, result: std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<PersistenceError>,
    {
        self.released = true;
        let cleared = if self.owned {
            self.context.clear(self.scope)
        } else {
            Ok(())
        };

        match (result, cleared) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                error!("Failed to release session after a failed operation: {}", release_err);
                Err(err)
            }
        }
    }
}

impl<S: Session> Deref for ScopedSession<'_, S> {
    type Target = Scope<S>;

    fn deref(&self) -> &Scope<S> {
        &*self.scope
    }
}

impl<S: Session> DerefMut for ScopedSession<'_, S> {
    fn deref_mut(&mut self) -> &mut Scope<S> {
        &mut *self.scope
    }
}

impl<S: Session> Drop for ScopedSession<'_, S> {
    fn drop(&mut self) {
        if self.released || !self.owned {
            return;
        }
        if let Err(err) = self.context.clear(self.scope) {
            warn!("Failed to release session on unwind: {}", err);
        }
    }
}
