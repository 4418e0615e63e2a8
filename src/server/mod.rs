//! TCP server: listener, per-connection tasks and hooks

pub mod config;
pub mod connection;
pub mod handler;
pub mod listener;

pub use config::ServerConfig;
pub use handler::{AllowAll, AuthResult, Authorizer, Event, NotificationSink, TracingSink};
pub use listener::RtmpServer;
