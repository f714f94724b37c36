use crate::core::Result;
use crate::session::Session;
use serde::{Deserialize, Serialize};

/// When repository writes are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Flush after every write
    #[default]
    Auto,
    /// Stage writes until `Repository::flush` or unit-of-work commit
    Manual,
    /// Only unit-of-work commit persists; explicit flushes are ignored
    Suppressed,
}

impl FlushPolicy {
    /// Whether a write must flush right away. A session owned by the
    /// operation is released afterwards, so it always flushes.
    pub fn flushes_after_write(&self, owned: bool) -> bool {
        owned || *self == FlushPolicy::Auto
    }

    pub fn allows_explicit_flush(&self) -> bool {
        *self != FlushPolicy::Suppressed
    }

    pub fn after_write<S: Session>(&self, session: &mut S, owned: bool) -> Result<()> {
        if self.flushes_after_write(owned) {
            session.flush()?;
        }
        Ok(())
    }

    pub async fn after_write_async<S: Session>(&self, session: &mut S, owned: bool) -> Result<()> {
        if self.flushes_after_write(owned) {
            session.flush_async().await?;
        }
        Ok(())
    }
}

impl std::str::FromStr for FlushPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(FlushPolicy::Auto),
            "manual" => Ok(FlushPolicy::Manual),
            "suppressed" => Ok(FlushPolicy::Suppressed),
            other => Err(format!("Unknown flush policy '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::RecordingSession;

    #[test]
    fn test_auto_flushes_every_write() {
        let mut session = RecordingSession {
            pending: 1,
            ..Default::default()
        };
        FlushPolicy::Auto.after_write(&mut session, false).unwrap();
        assert_eq!(session.flushed, 1);
    }

    #[test]
    fn test_manual_and_suppressed_stage_on_shared_session() {
        for policy in [FlushPolicy::Manual, FlushPolicy::Suppressed] {
            let mut session = RecordingSession {
                pending: 1,
                ..Default::default()
            };
            policy.after_write(&mut session, false).unwrap();
            assert_eq!(session.flushed, 0);
            assert!(session.has_pending_changes());
        }
    }

    #[test]
    fn test_owned_session_always_flushes() {
        let mut session = RecordingSession {
            pending: 2,
            ..Default::default()
        };
        FlushPolicy::Suppressed.after_write(&mut session, true).unwrap();
        assert_eq!(session.flushed, 2);
    }

    #[tokio::test]
    async fn test_async_flush() {
        let mut session = RecordingSession {
            pending: 1,
            ..Default::default()
        };
        FlushPolicy::Manual
            .after_write_async(&mut session, true)
            .await
            .unwrap();
        assert_eq!(session.flushed, 1);
    }

    #[test]
    fn test_parse_and_serde() {
        assert_eq!("Manual".parse::<FlushPolicy>().unwrap(), FlushPolicy::Manual);
        assert!("sometimes".parse::<FlushPolicy>().is_err());
        assert_eq!(
            serde_json::to_string(&FlushPolicy::Suppressed).unwrap(),
            "\"suppressed\""
        );
        assert!(!FlushPolicy::Suppressed.allows_explicit_flush());
        assert!(FlushPolicy::Manual.allows_explicit_flush());
    }
}
