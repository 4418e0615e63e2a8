//! Session entry types
//!
//! This module defines the per-session state stored in the registry.

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use crate::session::state::PlayStatus;
use crate::session::stream::StreamCache;

use super::SessionId;

/// What a connection hands the registry on accept
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Bounded queue drained by the connection's writer task
    pub outbound: mpsc::Sender<Bytes>,
    /// Set to true when the registry tears the session down
    pub shutdown: watch::Sender<bool>,
}

impl SessionHandle {
    pub fn new(outbound: mpsc::Sender<Bytes>, shutdown: watch::Sender<bool>) -> Self {
        Self { outbound, shutdown }
    }
}

/// Registry-side view of a session's play sub-state
#[derive(Debug, Clone, Default)]
pub struct PlayMirror {
    pub path: Option<String>,
    pub stream_id: u32,
    pub status: PlayStatus,
}

/// Entry for a single session in the registry
#[derive(Debug)]
pub struct SessionEntry {
    pub(super) handle: SessionHandle,

    /// Scheduled tasks (ping) aborted on destroy
    pub(super) tasks: Vec<AbortHandle>,

    /// Path this session publishes to
    pub publish_path: Option<String>,

    pub play: PlayMirror,

    /// Populated while publishing
    pub cache: StreamCache,
}

impl SessionEntry {
    pub(super) fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            tasks: Vec::new(),
            publish_path: None,
            play: PlayMirror::default(),
            cache: StreamCache::default(),
        }
    }

    pub(super) fn target(&self, session_id: SessionId) -> FanoutTarget {
        FanoutTarget {
            session_id,
            stream_id: self.play.stream_id,
            outbound: self.handle.outbound.clone(),
        }
    }

    /// Abort scheduled tasks and signal the connection to stop
    pub(super) fn shut_down(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let _ = self.handle.shutdown.send(true);
    }
}

/// A subscriber reachable from a publisher's task
#[derive(Debug, Clone)]
pub struct FanoutTarget {
    pub session_id: SessionId,
    /// Message stream id the subscriber plays on
    pub stream_id: u32,
    pub outbound: mpsc::Sender<Bytes>,
}

impl FanoutTarget {
    /// Queue a serialized message without waiting
    ///
    /// Returns false when the subscriber's queue is full or closed; the
    /// message is dropped for this subscriber only.
    pub fn try_deliver(&self, bytes: Bytes) -> bool {
        match self.outbound.try_send(bytes) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(
                    session_id = self.session_id,
                    "Subscriber queue full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}
