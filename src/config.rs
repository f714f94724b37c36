use crate::core::{PersistenceError, Result};
use crate::repository::FlushPolicy;
use crate::session::pool::default_max_retained;
use crate::transaction::{TransactionMode, TransactionScopeOptions};
use serde::{Deserialize, Serialize};

/// Persistence configuration
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use scoped_persistence::config::PersistenceOptions;
///
/// let options = PersistenceOptions::from_json(r#"{ "use_session_pool": true }"#).unwrap();
/// assert!(options.use_session_pool);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceOptions {
    /// How a unit of work opens its transaction
    pub transaction_mode: TransactionMode,

    /// Scope options used in `TransactionMode::Scoped`
    pub transaction_scope: TransactionScopeOptions,

    /// Borrow sessions from a pool instead of creating one per scope
    pub use_session_pool: bool,

    /// Idle sessions the pool keeps
    #[serde(default = "default_max_retained")]
    pub max_pooled_sessions: usize,

    pub flush_policy: FlushPolicy,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            transaction_mode: TransactionMode::default(),
            transaction_scope: TransactionScopeOptions::default(),
            use_session_pool: false,
            max_pooled_sessions: default_max_retained(),
            flush_policy: FlushPolicy::default(),
        }
    }
}

impl PersistenceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction_mode = mode;
        self
    }

    pub fn transaction_scope(mut self, scope: TransactionScopeOptions) -> Self {
        self.transaction_scope = scope;
        self
    }

    pub fn use_session_pool(mut self, enabled: bool) -> Self {
        self.use_session_pool = enabled;
        self
    }

    pub fn max_pooled_sessions(mut self, max: usize) -> Self {
        self.max_pooled_sessions = max;
        self
    }

    pub fn flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    /// Parse and validate options from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|err| PersistenceError::Configuration(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_pooled_sessions == 0 {
            return Err(PersistenceError::Configuration(
                "max_pooled_sessions must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
