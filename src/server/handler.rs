//! Authorization and lifecycle notification hooks
//!
//! Sessions consult an [`Authorizer`] before a publish or play takes
//! effect, and report lifecycle transitions to a [`NotificationSink`].
//! Both are shared across connections behind an `Arc`.
//!
//! # Example
//!
//! ```no_run
//! use rtmp_relay::server::handler::{AuthResult, Authorizer};
//!
//! struct KeyCheck;
//!
//! #[async_trait::async_trait]
//! impl Authorizer for KeyCheck {
//!     async fn publish(&self, path: &str) -> AuthResult {
//!         if path.starts_with("/live/") {
//!             AuthResult::Accept
//!         } else {
//!             AuthResult::Reject("unknown application".into())
//!         }
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::registry::SessionId;

/// Outcome of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Allow the operation
    Accept,
    /// Deny the operation with a reason
    Reject(String),
}

impl AuthResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AuthResult::Accept)
    }
}

/// Decides whether a publish or play may proceed
///
/// Both methods default to accepting, so implementors override only the
/// side they care about.
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    /// Called after the path is claimed, before `NetStream.Publish.Start`
    async fn publish(&self, _path: &str) -> AuthResult {
        AuthResult::Accept
    }

    /// Called after the subscription is recorded, before playback starts
    async fn play(&self, _path: &str) -> AuthResult {
        AuthResult::Accept
    }
}

/// Authorizer that accepts everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {}

/// Session lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `connect` received
    ConnectAttempt {
        session_id: SessionId,
        app: String,
    },
    ConnectSuccess {
        session_id: SessionId,
        app: String,
    },
    /// Socket closed, for any reason
    ConnectDone {
        session_id: SessionId,
    },
    /// Socket or protocol failure; followed by `ConnectDone`
    ConnectError {
        session_id: SessionId,
        error: String,
    },
    PublishAttempt {
        session_id: SessionId,
        path: String,
        args: String,
        stream_id: u32,
    },
    PublishSuccess {
        session_id: SessionId,
        path: String,
        args: String,
        stream_id: u32,
    },
    /// Publish stream deleted or closed
    PublishDone {
        session_id: SessionId,
        path: String,
        args: String,
        stream_id: u32,
    },
    PlayAttempt {
        session_id: SessionId,
        path: String,
        args: String,
        stream_id: u32,
    },
    PlaySuccess {
        session_id: SessionId,
        path: String,
        args: String,
        stream_id: u32,
    },
    /// Play stream deleted or closed
    PlayDone {
        session_id: SessionId,
        path: String,
        args: String,
        stream_id: u32,
    },
}

impl Event {
    /// Dotted event name, e.g. `client.publish.done`
    pub fn name(&self) -> &'static str {
        match self {
            Event::ConnectAttempt { .. } => "client.connect.attempt",
            Event::ConnectSuccess { .. } => "client.connect.success",
            Event::ConnectDone { .. } => "client.connect.done",
            Event::ConnectError { .. } => "client.connect.error",
            Event::PublishAttempt { .. } => "client.publish.attempt",
            Event::PublishSuccess { .. } => "client.publish.success",
            Event::PublishDone { .. } => "client.publish.done",
            Event::PlayAttempt { .. } => "client.play.attempt",
            Event::PlaySuccess { .. } => "client.play.success",
            Event::PlayDone { .. } => "client.play.done",
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            Event::ConnectAttempt { session_id, .. }
            | Event::ConnectSuccess { session_id, .. }
            | Event::ConnectDone { session_id }
            | Event::ConnectError { session_id, .. }
            | Event::PublishAttempt { session_id, .. }
            | Event::PublishSuccess { session_id, .. }
            | Event::PublishDone { session_id, .. }
            | Event::PlayAttempt { session_id, .. }
            | Event::PlaySuccess { session_id, .. }
            | Event::PlayDone { session_id, .. } => *session_id,
        }
    }

    /// Stream path for publish and play events
    pub fn path(&self) -> Option<&str> {
        match self {
            Event::PublishAttempt { path, .. }
            | Event::PublishSuccess { path, .. }
            | Event::PublishDone { path, .. }
            | Event::PlayAttempt { path, .. }
            | Event::PlaySuccess { path, .. }
            | Event::PlayDone { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Receives session lifecycle events
///
/// Called inline from the session task; implementations must not block.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, event: Event);
}

/// Sink that logs every event with `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, event: Event) {
        match &event {
            Event::ConnectError { session_id, error } => {
                tracing::warn!(session_id = session_id, error = %error, event = event.name());
            }
            _ => {
                tracing::info!(
                    session_id = event.session_id(),
                    path = event.path().unwrap_or(""),
                    event = event.name()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyPlay;

    #[async_trait]
    impl Authorizer for DenyPlay {
        async fn play(&self, path: &str) -> AuthResult {
            AuthResult::Reject(format!("{} is private", path))
        }
    }

    #[tokio::test]
    async fn test_authorizer_defaults_accept() {
        let auth = DenyPlay;
        assert_eq!(auth.publish("/live/a").await, AuthResult::Accept);
        assert_eq!(
            auth.play("/live/a").await,
            AuthResult::Reject("/live/a is private".into())
        );
        assert!(AllowAll.play("/live/a").await.is_accepted());
    }

    #[test]
    fn test_event_names() {
        let done = Event::PublishDone {
            session_id: 3,
            path: "/live/a".into(),
            args: String::new(),
            stream_id: 1,
        };
        assert_eq!(done.name(), "client.publish.done");
        assert_eq!(done.session_id(), 3);
        assert_eq!(done.path(), Some("/live/a"));

        let error = Event::ConnectError {
            session_id: 4,
            error: "reset".into(),
        };
        assert_eq!(error.name(), "client.connect.error");
        assert_eq!(error.path(), None);
    }
}
