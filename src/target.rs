//! Browser targets (tabs, workers) and their lifecycle.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::session::Session;

/// Target metadata as reported by `Target.getTargets`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    #[serde(default)]
    pub target_id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

/// A browser-level entity (tab, iframe, worker) with its attached session.
///
/// Owns exactly one [`Session`]; destroying the target cascades to it.
pub struct Target {
    info: TargetInfo,
    session: Session,
    destroyed: bool,
}

impl Target {
    /// Pair target metadata with its attached session
    pub fn new(info: TargetInfo, session: Session) -> Self {
        Self {
            info,
            session,
            destroyed: false,
        }
    }

    /// The target id
    pub fn target_id(&self) -> &str {
        &self.info.target_id
    }

    /// The target type as reported by the browser ("page", "worker", ...)
    pub fn kind(&self) -> &str {
        &self.info.kind
    }

    /// Last known title
    pub fn title(&self) -> &str {
        &self.info.title
    }

    /// Last known URL
    pub fn url(&self) -> &str {
        &self.info.url
    }

    /// Whether this target has been destroyed
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// The owned session; fails once destroyed
    pub fn session(&self) -> Result<&Session> {
        if self.destroyed {
            return Err(Error::TargetDestroyed(self.describe()));
        }
        Ok(&self.session)
    }

    /// Mutable access to the owned session; fails once destroyed
    pub fn session_mut(&mut self) -> Result<&mut Session> {
        if self.destroyed {
            return Err(Error::TargetDestroyed(self.describe()));
        }
        Ok(&mut self.session)
    }

    /// Tear the target down, cascading to its session.
    ///
    /// A second call fails with [`Error::AlreadyDestroyed`].
    pub fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(Error::AlreadyDestroyed(self.describe()));
        }

        tracing::debug!(target_id = %self.info.target_id, "destroying target");
        if !self.session.is_destroyed() {
            self.session.destroy()?;
        }
        self.destroyed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("target {}", self.info.target_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cdp::{Connection, MockTransport, SocketTransport};

    fn target() -> Target {
        let mock = Arc::new(MockTransport::new());
        let conn = Arc::new(Connection::new(mock as Arc<dyn SocketTransport>));
        let info = TargetInfo {
            target_id: "T1".into(),
            kind: "page".into(),
            title: "blank".into(),
            url: "about:blank".into(),
        };
        Target::new(info, Session::new(conn, "T1", "S1"))
    }

    #[test]
    fn destroy_cascades_to_the_session() {
        let mut target = target();
        assert!(target.session().expect("live").session_id() == "S1");

        target.destroy().expect("first destroy");
        assert!(target.is_destroyed());
        assert!(matches!(
            target.session(),
            Err(Error::TargetDestroyed(_))
        ));
        assert!(matches!(
            target.destroy(),
            Err(Error::AlreadyDestroyed(_))
        ));
    }

    #[test]
    fn destroy_tolerates_an_already_destroyed_session() {
        let mut target = target();
        target
            .session_mut()
            .expect("live")
            .destroy()
            .expect("session destroy");

        // Browser-initiated session teardown happened first; the target's
        // own destroy must still succeed exactly once.
        target.destroy().expect("target destroy");
        assert!(matches!(
            target.destroy(),
            Err(Error::AlreadyDestroyed(_))
        ));
    }

    #[test]
    fn parses_target_info() {
        let info: TargetInfo = serde_json::from_value(serde_json::json!({
            "targetId": "ABC",
            "type": "page",
            "title": "Example",
            "url": "https://example.com",
            "attached": false,
        }))
        .expect("deserialize");
        assert_eq!(info.target_id, "ABC");
        assert_eq!(info.kind, "page");
    }
}
