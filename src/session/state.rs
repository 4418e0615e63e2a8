//! Session state
//!
//! Tracks one connection from accept to teardown: handshake progress,
//! acknowledgement bookkeeping and the publish/play sub-states.

use std::net::SocketAddr;
use std::time::Instant;

use crate::protocol::constants::ACK_COUNTER_WRAP;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// TCP connected, no byte seen yet
    None,
    /// C0 received, collecting C1
    HandshakeS0,
    /// S0S1S2 sent, collecting C2
    HandshakeS1,
    /// Handshake complete, chunk stream expected
    HandshakeS2,
    /// First chunk decoded
    Streaming,
    /// Session torn down
    Closed,
}

/// Play sub-state status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayStatus {
    /// Not playing
    #[default]
    None,
    /// Subscribed, waiting for a publisher
    Idle,
    /// Receiving media
    Play,
    /// Paused by the client
    Pause,
}

/// Publish sub-state
#[derive(Debug, Clone, Default)]
pub struct PublishState {
    /// Normalised path, `/app/name`
    pub path: String,
    /// Path including the query, used in status descriptions
    pub original_path: String,
    /// Query string after `?`
    pub args: String,
    pub stream_id: u32,
    pub active: bool,
}

/// Play sub-state
#[derive(Debug, Clone, Default)]
pub struct PlayState {
    pub path: String,
    pub original_path: String,
    pub args: String,
    pub stream_id: u32,
    pub status: PlayStatus,
}

/// Complete session state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Connection start time
    pub connected_at: Instant,

    /// Set when `connect` is processed; drives ping timestamps
    pub connect_started_at: Option<Instant>,

    /// Application name (from connect)
    pub app: String,

    /// Object encoding requested by the client
    pub object_encoding: f64,

    /// Peer's window acknowledgement size; 0 until announced
    pub window_ack_size: u32,

    /// Bytes received, wraps at [`ACK_COUNTER_WRAP`]
    pub in_size: u32,

    /// `in_size` at the last acknowledgement
    pub last_ack_size: u32,

    pub publish: PublishState,

    pub play: PlayState,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::None,
            connected_at: Instant::now(),
            connect_started_at: None,
            app: String::new(),
            object_encoding: 0.0,
            window_ack_size: 0,
            in_size: 0,
            last_ack_size: 0,
            publish: PublishState::default(),
            play: PlayState::default(),
        }
    }

    /// Apply a peer's Window Acknowledgement Size; values below 1 are ignored
    pub fn set_window_ack_size(&mut self, size: u32) {
        if size < 1 {
            return;
        }
        self.window_ack_size = size;
    }

    /// Count received bytes
    ///
    /// Returns the sequence number to acknowledge when a window's worth of
    /// bytes arrived since the last acknowledgement.
    pub fn add_bytes_received(&mut self, bytes: usize) -> Option<u32> {
        let bytes = u32::try_from(bytes).unwrap_or(u32::MAX);
        self.in_size = self.in_size.saturating_add(bytes);

        if self.in_size >= ACK_COUNTER_WRAP {
            self.in_size = 0;
            self.last_ack_size = 0;
        }

        if self.window_ack_size > 0 && self.in_size - self.last_ack_size >= self.window_ack_size {
            self.last_ack_size = self.in_size;
            return Some(self.in_size);
        }
        None
    }

    /// Get session duration
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }

    pub fn is_connected(&self) -> bool {
        self.connect_started_at.is_some()
    }

    /// Start closing the session
    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
    }
}

/// Split `name?query` and join it under the app: `("/app/name", "query")`
///
/// Empty and `.` segments are dropped and `..` pops a segment, so the
/// result is always absolute.
pub fn stream_path(app: &str, name: &str) -> (String, String) {
    let (name, args) = match name.split_once('?') {
        Some((name, args)) => (name, args),
        None => (name, ""),
    };
    (normalize_path(app, name), args.to_string())
}

/// `/app/name` with the query kept, used in status descriptions
pub fn original_stream_path(app: &str, name: &str) -> String {
    normalize_path(app, name)
}

fn normalize_path(app: &str, name: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in app.split('/').chain(name.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}
