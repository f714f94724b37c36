use crate::core::{PersistenceError, Result};
use crate::session::{Session, SessionHandle};
use log::warn;
use std::ops::{Deref, DerefMut};

struct Ambient<S: Session> {
    session: SessionHandle<S>,
    /// This scope called `init` and must release the session
    owned: bool,
}

/// Execution scope carrying the ambient session slot.
///
/// A scope is passed explicitly to every repository and unit-of-work call.
/// Work handed to another thread or task gets its own scope via
/// [`Scope::fork`], which shares the parent's session unless flow is
/// suppressed.
pub struct Scope<S: Session> {
    ambient: Option<Ambient<S>>,
    flow_suppressed: bool,
    detached: bool,
}

impl<S: Session> Scope<S> {
    pub fn new() -> Self {
        Self {
            ambient: None,
            flow_suppressed: false,
            detached: false,
        }
    }

    pub fn has_session(&self) -> bool {
        self.ambient.is_some()
    }

    pub fn session(&self) -> Option<&SessionHandle<S>> {
        self.ambient.as_ref().map(|ambient| &ambient.session)
    }

    /// True if this scope created the ambient session, false if it has none
    /// or inherited it.
    pub fn owns_session(&self) -> bool {
        self.ambient.as_ref().is_some_and(|ambient| ambient.owned)
    }

    pub fn is_flow_suppressed(&self) -> bool {
        self.flow_suppressed
    }

    /// True for a scope forked while flow was suppressed
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn set_flow_suppressed(&mut self, suppressed: bool) {
        self.flow_suppressed = suppressed;
    }

    /// Suppress session flow into forks until the guard is dropped.
    pub fn suppress_flow(&mut self) -> FlowSuppression<'_, S> {
        let previous = self.flow_suppressed;
        self.flow_suppressed = true;
        FlowSuppression {
            scope: self,
            previous,
        }
    }

    /// Scope for spawned work.
    ///
    /// Inherits the ambient session without owning it. Under flow
    /// suppression the fork starts empty and detached.
    pub fn fork(&self) -> Scope<S> {
        if self.flow_suppressed {
            return Scope {
                ambient: None,
                flow_suppressed: false,
                detached: true,
            };
        }

        Scope {
            ambient: self.inherited(),
            flow_suppressed: false,
            detached: false,
        }
    }

    /// Scope handed to an async continuation of this one. Unlike a fork it
    /// always sees the session and keeps the suppression flag.
    pub(crate) fn continuation(&self) -> Scope<S> {
        Scope {
            ambient: self.inherited(),
            flow_suppressed: self.flow_suppressed,
            detached: self.detached,
        }
    }

    fn inherited(&self) -> Option<Ambient<S>> {
        self.ambient.as_ref().map(|ambient| Ambient {
            session: ambient.session.clone(),
            owned: false,
        })
    }

    pub(crate) fn attach(&mut self, session: SessionHandle<S>) -> Result<()> {
        if self.ambient.is_some() {
            return Err(PersistenceError::AlreadyActive);
        }
        self.ambient = Some(Ambient {
            session,
            owned: true,
        });
        Ok(())
    }

    /// Empty the slot, returning the session and whether it was owned.
    pub(crate) fn detach(&mut self) -> Result<(SessionHandle<S>, bool)> {
        self.ambient
            .take()
            .map(|ambient| (ambient.session, ambient.owned))
            .ok_or(PersistenceError::NotSet)
    }
}

impl<S: Session> Default for Scope<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Session> Drop for Scope<S> {
    fn drop(&mut self) {
        if let Some(ambient) = &self.ambient
            && ambient.owned
        {
            warn!(
                "Scope dropped while owning {} ({:?}) without clear",
                ambient.session.id(),
                ambient.session.origin()
            );
        }
    }
}

impl<S: Session> std::fmt::Debug for Scope<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("session", &self.session().map(SessionHandle::id))
            .field("owned", &self.owns_session())
            .field("flow_suppressed", &self.flow_suppressed)
            .field("detached", &self.detached)
            .finish()
    }
}

/// Guard returned by [`Scope::suppress_flow`]; restores the previous flag
/// on drop.
pub struct FlowSuppression<'a, S: Session> {
    scope: &'a mut Scope<S>,
    previous: bool,
}

impl<S: Session> Deref for FlowSuppression<'_, S> {
    type Target = Scope<S>;

    fn deref(&self) -> &Scope<S> {
        &*self.scope
    }
}

impl<S: Session> DerefMut for FlowSuppression<'_, S> {
    fn deref_mut(&mut self) -> &mut Scope<S> {
        &mut *self.scope
    }
}

impl<S: Session> Drop for FlowSuppression<'_, S> {
    fn drop(&mut self) {
        self.scope.flow_suppressed = self.previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::RecordingSession;

    fn handle() -> SessionHandle<RecordingSession> {
        SessionHandle::new(RecordingSession::default())
    }

    #[test]
    fn test_attach_and_detach() {
        let mut scope = Scope::new();
        assert!(!scope.has_session());
        assert!(matches!(scope.detach(), Err(PersistenceError::NotSet)));

        scope.attach(handle()).unwrap();
        assert!(scope.has_session());
        assert!(scope.owns_session());
        assert!(matches!(
            scope.attach(handle()),
            Err(PersistenceError::AlreadyActive)
        ));

        let (_, owned) = scope.detach().unwrap();
        assert!(owned);
        assert!(!scope.has_session());
    }

    #[test]
    fn test_fork_inherits_without_owning() {
        let mut scope = Scope::new();
        scope.attach(handle()).unwrap();

        let fork = scope.fork();
        assert!(fork.has_session());
        assert!(!fork.owns_session());
        assert!(!fork.is_detached());
        assert!(fork.session().unwrap().ptr_eq(scope.session().unwrap()));
    }

    #[test]
    fn test_suppressed_fork_is_detached() {
        let mut scope = Scope::new();
        scope.attach(handle()).unwrap();

        {
            let guard = scope.suppress_flow();
            assert!(guard.is_flow_suppressed());
            let fork = guard.fork();
            assert!(!fork.has_session());
            assert!(fork.is_detached());
            assert!(!fork.is_flow_suppressed());

            let continuation = guard.continuation();
            assert!(continuation.has_session());
            assert!(continuation.is_flow_suppressed());
        }

        assert!(!scope.is_flow_suppressed());
        assert!(scope.fork().has_session());
    }

    #[test]
    fn test_suppression_guard_restores_previous_flag() {
        let mut scope: Scope<RecordingSession> = Scope::new();
        scope.set_flow_suppressed(true);
        {
            let _guard = scope.suppress_flow();
        }
        assert!(scope.is_flow_suppressed());
    }
}
