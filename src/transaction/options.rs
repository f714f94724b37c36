use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Which mechanism a unit of work uses to open its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Scope-style transaction driven by `TransactionScopeOptions`.
    #[default]
    Scoped,
    /// The session's own begin/commit API with default options.
    Session,
}

/// How a scope-style transaction relates to an enclosing one.
///
/// No enclosing system transaction exists at this layer, so `Required`
/// and `RequiresNew` both open a fresh session transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeOption {
    #[default]
    Required,
    RequiresNew,
    /// Run without a transaction; flushed writes are not undone on failure.
    Suppress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionScopeOptions {
    pub scope_option: ScopeOption,
    pub isolation_level: IsolationLevel,
}

impl TransactionScopeOptions {
    pub fn scope_option(mut self, scope_option: ScopeOption) -> Self {
        self.scope_option = scope_option;
        self
    }

    pub fn isolation_level(mut self, isolation_level: IsolationLevel) -> Self {
        self.isolation_level = isolation_level;
        self
    }

    /// Options to hand to the session, or `None` when the scope suppresses
    /// transactions.
    pub fn transaction_options(&self) -> Option<TransactionOptions> {
        match self.scope_option {
            ScopeOption::Required | ScopeOption::RequiresNew => Some(TransactionOptions {
                isolation_level: self.isolation_level,
            }),
            ScopeOption::Suppress => None,
        }
    }
}

/// Options passed to `Session::begin_transaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub isolation_level: IsolationLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = TransactionScopeOptions::default();
        assert_eq!(options.scope_option, ScopeOption::Required);
        assert_eq!(options.isolation_level, IsolationLevel::ReadCommitted);
        assert_eq!(TransactionMode::default(), TransactionMode::Scoped);
    }

    #[test]
    fn test_suppressed_scope_has_no_transaction() {
        let options = TransactionScopeOptions::default().scope_option(ScopeOption::Suppress);
        assert!(options.transaction_options().is_none());
    }

    #[test]
    fn test_scope_isolation_is_forwarded() {
        let options = TransactionScopeOptions::default()
            .scope_option(ScopeOption::RequiresNew)
            .isolation_level(IsolationLevel::Serializable);
        assert_eq!(
            options.transaction_options(),
            Some(TransactionOptions {
                isolation_level: IsolationLevel::Serializable
            })
        );
    }
}
