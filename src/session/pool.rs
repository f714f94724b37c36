use super::{Session, SessionFactory};
use crate::core::Result;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Session pool
///
/// Bounded cache of idle sessions. Borrowing never waits: a miss creates a
/// fresh session through the factory, so outstanding sessions may exceed the
/// bound. Only the number of idle sessions retained is capped.
pub struct SessionPool<S: Session> {
    factory: Arc<dyn SessionFactory<S>>,
    /// Idle sessions ready for reuse
    idle: Mutex<VecDeque<S>>,
    max_retained: usize,
    /// Sessions created by this pool
    created: AtomicUsize,
    /// Sessions dropped on return instead of kept
    discarded: AtomicUsize,
    /// Sessions borrowed and not yet given back
    outstanding: AtomicUsize,
}

impl<S: Session> SessionPool<S> {
    pub fn new(factory: Arc<dyn SessionFactory<S>>, max_retained: usize) -> Self {
        Self {
            factory,
            idle: Mutex::new(VecDeque::with_capacity(max_retained)),
            max_retained,
            created: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    pub fn max_retained(&self) -> usize {
        self.max_retained
    }

    /// Take an idle session, or create one if none is idle.
    pub fn borrow(&self) -> Result<S> {
        let reused = self.idle.lock()?.pop_front();

        let session = match reused {
            Some(session) => session,
            None => {
                let session = self.factory.create_session()?;
                self.created.fetch_add(1, Ordering::SeqCst);
                debug!("Session pool miss, created a new session");
                session
            }
        };

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }

    /// Return a borrowed session.
    ///
    /// An open transaction is rolled back first. Sessions that cannot be
    /// rolled back, still hold unflushed changes, or would push the idle set
    /// past its bound are dropped.
    pub(crate) fn give_back(&self, mut session: S) {
        let counted = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if counted.is_err() {
            warn!("Session returned to a pool with nothing outstanding");
        }

        if session.in_transaction() {
            if let Err(err) = session.rollback_transaction() {
                warn!("Discarding pooled session, rollback on return failed: {}", err);
                self.discard();
                return;
            }
        }

        if session.has_pending_changes() {
            debug!("Discarding pooled session with unflushed changes");
            self.discard();
            return;
        }

        match self.idle.lock() {
            Ok(mut idle) if idle.len() < self.max_retained => idle.push_back(session),
            Ok(_) => {
                drop(session);
                self.discard();
            }
            Err(err) => {
                warn!("Discarding pooled session, pool lock poisoned: {}", err);
                self.discard();
            }
        }
    }

    fn discard(&self) {
        self.discarded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().map(|idle| idle.len()).unwrap_or(0);

        PoolStats {
            idle,
            max_retained: self.max_retained,
            created: self.created.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
            outstanding: self.outstanding.load(Ordering::SeqCst),
        }
    }
}

pub(crate) fn default_max_retained() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(2)
}

/// Session pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub max_retained: usize,
    pub created: usize,
    pub discarded: usize,
    pub outstanding: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {} outstanding, {}/{} idle, {} created, {} discarded",
            self.outstanding, self.idle, self.max_retained, self.created, self.discarded
        )
    }
}
