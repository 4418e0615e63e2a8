//! Session context
//!
//! Everything a session needs from outside its own connection: the shared
//! registry, server configuration, hooks and its own outbound queue.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::registry::{SessionId, SessionRegistry};
use crate::server::config::ServerConfig;
use crate::server::handler::{Authorizer, Event, NotificationSink};

/// Shared collaborators handed to each session
#[derive(Clone)]
pub struct SessionContext {
    /// Registry id of this session
    pub session_id: SessionId,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    pub config: Arc<ServerConfig>,

    pub registry: Arc<SessionRegistry>,

    /// Consulted before publish and play; `None` accepts everything
    pub authorizer: Option<Arc<dyn Authorizer>>,

    pub sink: Arc<dyn NotificationSink>,

    /// Queue drained by the connection's writer task
    pub outbound: mpsc::Sender<Bytes>,
}

impl SessionContext {
    pub fn new(
        session_id: SessionId,
        peer_addr: SocketAddr,
        config: Arc<ServerConfig>,
        registry: Arc<SessionRegistry>,
        authorizer: Option<Arc<dyn Authorizer>>,
        sink: Arc<dyn NotificationSink>,
        outbound: mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            session_id,
            peer_addr,
            config,
            registry,
            authorizer,
            sink,
            outbound,
        }
    }

    pub fn notify(&self, event: Event) {
        self.sink.notify(event);
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.session_id)
            .field("peer_addr", &self.peer_addr)
            .field("authorizer", &self.authorizer.is_some())
            .finish_non_exhaustive()
    }
}
