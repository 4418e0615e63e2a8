//! Session registry implementation
//!
//! The central registry that tracks all live sessions and enforces one
//! publisher per path with any number of subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tokio::task::AbortHandle;

use crate::protocol::chunk::ChunkMessage;
use crate::session::state::PlayStatus;
use crate::session::stream::StreamCache;

use super::entry::{FanoutTarget, SessionEntry, SessionHandle};
use super::error::RegistryError;
use super::SessionId;

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, SessionEntry>,
    publishers: HashMap<String, SessionId>,
    subscribers: HashMap<String, Vec<SessionId>>,
}

impl RegistryInner {
    fn remove_subscriber(&mut self, id: SessionId, path: &str) -> bool {
        let Some(list) = self.subscribers.get_mut(path) else {
            return false;
        };
        let before = list.len();
        list.retain(|&sub| sub != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.subscribers.remove(path);
        }
        removed
    }
}

/// Central registry for all live sessions
///
/// One `RwLock` guards all three maps, so a publisher claim and a
/// concurrent destroy on the same path never interleave.
#[derive(Debug)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a freshly accepted connection
    pub async fn register(&self, handle: SessionHandle) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        inner.sessions.insert(id, SessionEntry::new(handle));

        tracing::debug!(session_id = id, sessions = inner.sessions.len(), "Session registered");
        id
    }

    /// Claim `path` for publishing
    ///
    /// Fails without changing anything when the session is unknown, already
    /// publishes, or the path already has a publisher.
    pub async fn set_publisher(&self, id: SessionId, path: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;

        let Some(entry) = inner.sessions.get(&id) else {
            return Err(RegistryError::SessionNotFound(id));
        };
        if let Some(owned) = &entry.publish_path {
            return Err(RegistryError::AlreadyPublishing(owned.clone()));
        }
        if let Some(&current) = inner.publishers.get(path) {
            tracing::info!(
                path = %path,
                session_id = id,
                publisher = current,
                "Publish rejected, path in use"
            );
            return Err(RegistryError::PathAlreadyPublished(path.to_string()));
        }

        inner.publishers.insert(path.to_string(), id);
        if let Some(entry) = inner.sessions.get_mut(&id) {
            entry.publish_path = Some(path.to_string());
        }

        tracing::info!(path = %path, session_id = id, "Publisher registered");
        Ok(())
    }

    /// Add the session to the subscribers of `path`
    ///
    /// A session subscribes to one path at a time; a second path is refused
    /// until the first is released or detached.
    pub async fn set_subscriber(&self, id: SessionId, path: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;

        let Some(entry) = inner.sessions.get(&id) else {
            return Err(RegistryError::SessionNotFound(id));
        };
        if let Some(current) = &entry.play.path {
            return Err(RegistryError::AlreadySubscribed(current.clone()));
        }
        let list = inner.subscribers.entry(path.to_string()).or_default();
        if list.contains(&id) {
            return Err(RegistryError::AlreadySubscribed(path.to_string()));
        }
        list.push(id);
        let count = list.len();

        if let Some(entry) = inner.sessions.get_mut(&id) {
            entry.play.path = Some(path.to_string());
        }

        tracing::info!(path = %path, session_id = id, subscribers = count, "Subscriber added");
        Ok(())
    }

    /// Undo [`SessionRegistry::set_publisher`]
    pub async fn release_publisher(&self, id: SessionId, path: &str) {
        let mut inner = self.inner.write().await;

        if inner.publishers.get(path) == Some(&id) {
            inner.publishers.remove(path);
        }
        if let Some(entry) = inner.sessions.get_mut(&id) {
            if entry.publish_path.as_deref() == Some(path) {
                entry.publish_path = None;
                entry.cache = StreamCache::default();
            }
        }
        tracing::debug!(path = %path, session_id = id, "Publisher released");
    }

    /// Undo [`SessionRegistry::set_subscriber`]
    pub async fn release_subscriber(&self, id: SessionId, path: &str) {
        let mut inner = self.inner.write().await;

        inner.remove_subscriber(id, path);
        if let Some(entry) = inner.sessions.get_mut(&id) {
            if entry.play.path.as_deref() == Some(path) {
                entry.play = Default::default();
            }
        }
        tracing::debug!(path = %path, session_id = id, "Subscriber released");
    }

    /// Tear a session down
    ///
    /// Aborts its scheduled tasks, signals its connection to stop and
    /// drops its entry. If it was publishing, its subscribers are detached
    /// from the path but stay connected. Returns false for unknown ids,
    /// so calling it twice is harmless.
    pub async fn destroy(&self, id: SessionId) -> bool {
        let mut inner = self.inner.write().await;

        let Some(mut entry) = inner.sessions.remove(&id) else {
            return false;
        };
        entry.shut_down();

        if let Some(path) = entry.publish_path.take() {
            if inner.publishers.get(&path) == Some(&id) {
                inner.publishers.remove(&path);
                let detached = inner.subscribers.remove(&path).unwrap_or_default();
                for sub in &detached {
                    if let Some(sub_entry) = inner.sessions.get_mut(sub) {
                        sub_entry.play = Default::default();
                    }
                }
                tracing::info!(
                    path = %path,
                    session_id = id,
                    detached = detached.len(),
                    "Publisher removed"
                );
            }
        }

        if let Some(path) = entry.play.path.take() {
            inner.remove_subscriber(id, &path);
        }

        tracing::debug!(session_id = id, sessions = inner.sessions.len(), "Session destroyed");
        true
    }

    /// Keep a scheduled task's handle so destroy can abort it
    ///
    /// Aborts the task right away if the session is already gone.
    pub async fn attach_task(&self, id: SessionId, task: AbortHandle) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&id) {
            Some(entry) => {
                entry.tasks.push(task);
                true
            }
            None => {
                task.abort();
                false
            }
        }
    }

    /// Mirror a session's play sub-state
    pub async fn set_play_state(&self, id: SessionId, stream_id: u32, status: PlayStatus) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.sessions.get_mut(&id) {
            entry.play.stream_id = stream_id;
            entry.play.status = status;
        }
    }

    /// Current play status; `None` for unknown sessions
    pub async fn play_status(&self, id: SessionId) -> PlayStatus {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(&id)
            .map(|e| e.play.status)
            .unwrap_or_default()
    }

    /// Move subscribers waiting on `path` to playing
    ///
    /// Called once a publisher starts so subscribers that arrived first
    /// receive its metadata and config frames as they are sent.
    pub async fn promote_waiting(&self, path: &str) -> usize {
        let mut inner = self.inner.write().await;
        let ids = inner.subscribers.get(path).cloned().unwrap_or_default();

        let mut promoted = 0;
        for id in ids {
            if let Some(entry) = inner.sessions.get_mut(&id) {
                if entry.play.status == PlayStatus::Idle {
                    entry.play.status = PlayStatus::Play;
                    promoted += 1;
                }
            }
        }
        promoted
    }

    /// Replace a publisher's stream cache
    pub async fn update_cache(&self, id: SessionId, cache: StreamCache) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.sessions.get_mut(&id) {
            entry.cache = cache;
        }
    }

    /// Late-joiner frames of the publisher of `path`, addressed to `stream_id`
    ///
    /// `None` when nobody publishes to the path.
    pub async fn bootstrap_frames(&self, path: &str, stream_id: u32) -> Option<Vec<ChunkMessage>> {
        let inner = self.inner.read().await;
        let publisher = inner.publishers.get(path)?;
        let entry = inner.sessions.get(publisher)?;
        Some(entry.cache.bootstrap_frames(stream_id))
    }

    /// Subscribers of `path` currently receiving media
    pub async fn playing_targets(&self, path: &str) -> Vec<FanoutTarget> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.subscribers.get(path) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| {
                let entry = inner.sessions.get(id)?;
                (entry.play.status == PlayStatus::Play).then(|| entry.target(*id))
            })
            .collect()
    }

    /// All subscribers of `path`, whatever their play status
    pub async fn subscriber_targets(&self, path: &str) -> Vec<FanoutTarget> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.subscribers.get(path) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.sessions.get(id).map(|entry| entry.target(*id)))
            .collect()
    }

    /// Session publishing to `path`
    pub async fn publisher_of(&self, path: &str) -> Option<SessionId> {
        self.inner.read().await.publishers.get(path).copied()
    }

    /// Subscribers of `path` in subscription order
    pub async fn subscribers_of(&self, path: &str) -> Vec<SessionId> {
        self.inner
            .read()
            .await
            .subscribers
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_registered(&self, id: SessionId) -> bool {
        self.inner.read().await.sessions.contains_key(&id)
    }

    /// Number of registered sessions
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Number of paths with a publisher
    pub async fn publisher_count(&self) -> usize {
        self.inner.read().await.publishers.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
