//! rtmp-relay: RTMP live ingest and fan-out server core
//!
//! Publishers push audio, video and metadata over RTMP; every subscriber
//! playing the same path receives a copy in near real time. Subscribers
//! that join mid-stream first get the publisher's cached metadata and codec
//! configuration frames.
//!
//! # Example
//!
//! ```no_run
//! use rtmp_relay::{RtmpServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RtmpServer::with_config(ServerConfig::default());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use error::{Error, Result};
pub use registry::{SessionId, SessionRegistry};
pub use server::handler::{AuthResult, Authorizer, Event, NotificationSink};
pub use server::{RtmpServer, ServerConfig};
