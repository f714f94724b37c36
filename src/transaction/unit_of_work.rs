// ============================================================================
// Unit of Work
// ============================================================================
//
// Runs caller logic inside one ambient session and one transaction:
//
//   begin_owned -> begin transaction -> action -> flush -> commit -> clear
//
// A failed action rolls back instead of committing. The ambient session is
// cleared on every exit path, including panics and dropped futures.
//
// ============================================================================

use super::{
    TransactionId, TransactionMode, TransactionOptions, TransactionScopeOptions,
    TransactionState,
};
use crate::context::{ContextService, Scope, ScopedSession};
use crate::core::{PersistenceError, Result};
use crate::session::{Session, SessionHandle};
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, info_span};

/// Bookkeeping for one unit-of-work run
#[derive(Debug)]
struct UnitTransaction {
    id: TransactionId,
    state: TransactionState,
    /// False when the scope suppresses transactions
    enlisted: bool,
    started: Instant,
}

impl UnitTransaction {
    fn new(enlisted: bool) -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            enlisted,
            started: Instant::now(),
        }
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        debug!(
            "Unit of work {} {} after {:?} (enlisted: {})",
            self.id,
            self.state,
            self.started.elapsed(),
            self.enlisted
        );
    }
}

/// Groups repository calls into one session and one transaction.
pub struct UnitOfWork<S: Session> {
    context: Arc<ContextService<S>>,
    mode: TransactionMode,
    scope_options: TransactionScopeOptions,
}

impl<S: Session> Clone for UnitOfWork<S> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            mode: self.mode,
            scope_options: self.scope_options,
        }
    }
}

impl<S: Session> UnitOfWork<S> {
    pub fn new(context: Arc<ContextService<S>>) -> Self {
        Self {
            context,
            mode: TransactionMode::default(),
            scope_options: TransactionScopeOptions::default(),
        }
    }

    pub fn with_mode(mut self, mode: TransactionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_scope_options(mut self, scope_options: TransactionScopeOptions) -> Self {
        self.scope_options = scope_options;
        self
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn scope_options(&self) -> TransactionScopeOptions {
        self.scope_options
    }

    /// Run `action` against the scope's new ambient session.
    ///
    /// # Errors
    /// `AlreadyActive` if the scope already has an ambient session; otherwise
    /// the action's own error, or the storage error of flush or commit.
    pub fn run<F, E>(&self, scope: &mut Scope<S>, action: F) -> std::result::Result<(), E>
    where
        F: FnOnce(&mut Scope<S>) -> std::result::Result<(), E>,
        E: From<PersistenceError>,
    {
        self.run_with(scope, action)
    }

    pub fn run_with<T, F, E>(&self, scope: &mut Scope<S>, func: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Scope<S>) -> std::result::Result<T, E>,
        E: From<PersistenceError>,
    {
        if scope.has_session() {
            return Err(PersistenceError::AlreadyActive.into());
        }

        let span = info_span!("unit_of_work", mode = ?self.mode);
        let _entered = span.enter();

        let mut scoped = self.context.begin_owned(scope)?;
        let result = self.execute(&mut scoped, func);
        scoped.release(result)
    }

    /// Async counterpart of [`UnitOfWork::run`]. The action receives a
    /// continuation scope sharing the unit's session; it is awaited to
    /// completion before flush and commit.
    pub async fn run_async<F, Fut, E>(&self, scope: &mut Scope<S>, action: F) -> std::result::Result<(), E>
    where
        F: FnOnce(Scope<S>) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: From<PersistenceError>,
    {
        self.run_async_with(scope, action).await
    }

    pub async fn run_async_with<T, F, Fut, E>(
        &self,
        scope: &mut Scope<S>,
        func: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(Scope<S>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<PersistenceError>,
    {
        if scope.has_session() {
            return Err(PersistenceError::AlreadyActive.into());
        }

        let span = info_span!("unit_of_work", mode = ?self.mode, flavor = "async");
        self.run_async_owned(scope, func).instrument(span).await
    }

    async fn run_async_owned<T, F, Fut, E>(
        &self,
        scope: &mut Scope<S>,
        func: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(Scope<S>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<PersistenceError>,
    {
        let mut scoped = self.context.begin_owned(scope)?;
        let result = self.execute_async(&mut scoped, func).await;
        scoped.release(result)
    }

    fn execute<T, F, E>(&self, scoped: &mut ScopedSession<'_, S>, func: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Scope<S>) -> std::result::Result<T, E>,
        E: From<PersistenceError>,
    {
        let handle = scoped.session()?.clone();
        let mut unit = {
            let mut session = handle.lock()?;
            self.begin(&mut *session)?
        };

        let value = match func(&mut **scoped) {
            Ok(value) => value,
            Err(err) => {
                match handle.lock() {
                    Ok(mut session) => abort(&mut *session, &mut unit),
                    Err(busy) => warn!("Cannot roll back {}: {}", unit.id, busy),
                }
                return Err(err);
            }
        };

        let mut session = handle.lock()?;
        complete(&mut *session, &mut unit)?;
        Ok(value)
    }

    async fn execute_async<T, F, Fut, E>(
        &self,
        scoped: &mut ScopedSession<'_, S>,
        func: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(Scope<S>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<PersistenceError>,
    {
        let handle: SessionHandle<S> = scoped.session()?.clone();
        let mut unit = {
            let mut session = handle.lock_async().await?;
            self.begin(&mut *session)?
        };

        let value = match func(scoped.continuation()).await {
            Ok(value) => value,
            Err(err) => {
                match handle.lock_async().await {
                    Ok(mut session) => abort(&mut *session, &mut unit),
                    Err(lost) => warn!("Cannot roll back {}: {}", unit.id, lost),
                }
                return Err(err);
            }
        };

        let mut session = handle.lock_async().await?;
        if let Err(err) = session.flush_async().await {
            rollback_quietly(&mut *session, &unit);
            unit.finish(TransactionState::Aborted);
            return Err(err.into());
        }
        complete(&mut *session, &mut unit)?;
        Ok(value)
    }

    /// Open the session transaction the mode calls for.
    fn begin(&self, session: &mut S) -> Result<UnitTransaction> {
        let options = match self.mode {
            TransactionMode::Session => Some(TransactionOptions::default()),
            TransactionMode::Scoped => self.scope_options.transaction_options(),
        };

        if let Some(options) = &options {
            session.begin_transaction(options)?;
        }

        let unit = UnitTransaction::new(options.is_some());
        debug!("Unit of work {} started ({:?})", unit.id, self.mode);
        Ok(unit)
    }
}

/// Flush, then commit. On failure the transaction is rolled back.
fn complete<S: Session>(session: &mut S, unit: &mut UnitTransaction) -> Result<()> {
    let outcome = session.flush().and_then(|()| {
        if unit.enlisted {
            session.commit_transaction()
        } else {
            Ok(())
        }
    });

    match outcome {
        Ok(()) => {
            unit.finish(TransactionState::Committed);
            Ok(())
        }
        Err(err) => {
            rollback_quietly(session, unit);
            unit.finish(TransactionState::Aborted);
            Err(err)
        }
    }
}

fn abort<S: Session>(session: &mut S, unit: &mut UnitTransaction) {
    rollback_quietly(session, unit);
    unit.finish(TransactionState::Aborted);
}

fn rollback_quietly<S: Session>(session: &mut S, unit: &UnitTransaction) {
    if !session.in_transaction() {
        return;
    }
    if let Err(err) = session.rollback_transaction() {
        warn!("Rollback of unit of work {} failed: {}", unit.id, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{RecordingSession, recording_factory};
    use crate::transaction::ScopeOption;

    fn unit_of_work() -> UnitOfWork<RecordingSession> {
        UnitOfWork::new(Arc::new(ContextService::new(recording_factory())))
    }

    fn observe(scope: &Scope<RecordingSession>) -> (bool, usize) {
        let session = scope.session().unwrap().lock().unwrap();
        (session.in_transaction, session.commits)
    }

    #[test]
    fn test_run_commits_and_clears() {
        let uow = unit_of_work();
        let mut scope = Scope::new();

        let (in_txn, commits) = uow
            .run_with(&mut scope, |scope| Ok::<_, PersistenceError>(observe(scope)))
            .unwrap();

        assert!(in_txn);
        assert_eq!(commits, 0);
        assert!(!scope.has_session());
    }

    #[test]
    fn test_nested_run_rejected() {
        let uow = unit_of_work();
        let mut scope = Scope::new();

        let result: Result<()> = uow.run(&mut scope, |scope| uow.run(scope, |_| Ok(())));
        assert!(matches!(result, Err(PersistenceError::AlreadyActive)));
        assert!(!scope.has_session());
    }

    #[test]
    fn test_action_error_is_returned_unchanged() {
        #[derive(Debug, PartialEq)]
        enum AppError {
            Declined,
            Persistence(String),
        }

        impl From<PersistenceError> for AppError {
            fn from(err: PersistenceError) -> Self {
                AppError::Persistence(err.to_string())
            }
        }

        let uow = unit_of_work();
        let mut scope = Scope::new();
        let result = uow.run(&mut scope, |_| Err(AppError::Declined));
        assert_eq!(result, Err(AppError::Declined));
    }

    #[test]
    fn test_suppressed_scope_runs_without_transaction() {
        let uow = unit_of_work()
            .with_scope_options(TransactionScopeOptions::default().scope_option(ScopeOption::Suppress));
        let mut scope = Scope::new();

        let (in_txn, _) = uow
            .run_with(&mut scope, |scope| Ok::<_, PersistenceError>(observe(scope)))
            .unwrap();
        assert!(!in_txn);
    }

    #[test]
    fn test_session_mode() {
        let uow = unit_of_work().with_mode(TransactionMode::Session);
        assert_eq!(uow.mode(), TransactionMode::Session);

        let mut scope = Scope::new();
        let (in_txn, _) = uow
            .run_with(&mut scope, |scope| Ok::<_, PersistenceError>(observe(scope)))
            .unwrap();
        assert!(in_txn);
    }

    #[tokio::test]
    async fn test_async_action_sees_continuation_scope() {
        let uow = unit_of_work();
        let mut scope = Scope::new();

        let owned = uow
            .run_async_with(&mut scope, |inner| async move {
                Ok::<_, PersistenceError>((inner.has_session(), inner.owns_session()))
            })
            .await
            .unwrap();

        assert_eq!(owned, (true, false));
        assert!(!scope.has_session());
    }

    #[tokio::test]
    async fn test_nested_async_run_rejected() {
        let uow = unit_of_work();
        let mut scope = Scope::new();

        let result: Result<()> = uow
            .run_async(&mut scope, |mut inner| {
                let uow = uow.clone();
                async move { uow.run_async(&mut inner, |_| async { Ok(()) }).await }
            })
            .await;
        assert!(matches!(result, Err(PersistenceError::AlreadyActive)));
    }
}
