//! Session registry for pub/sub routing
//!
//! The registry owns every live session's routing state: which session
//! publishes to a path, which sessions subscribe to it, and the handles
//! needed to reach or tear down a session from another connection's task.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<SessionRegistry>
//!                 ┌──────────────────────────────┐
//!                 │ sessions:    id   -> entry   │
//!                 │ publishers:  path -> id      │
//!                 │ subscribers: path -> [id..]  │
//!                 └──────────────┬───────────────┘
//!                                │
//!         ┌──────────────────────┼──────────────────────┐
//!         ▼                      ▼                      ▼
//!    [Publisher]           [Subscriber]           [Subscriber]
//!    playing_targets()     outbound rx            outbound rx
//!         │                      ▲                      ▲
//!         └──── try_send(Bytes) ─┴──────────────────────┘
//! ```
//!
//! Sessions never hold references to each other. Anything one session
//! needs from another goes through the registry by id, and a destroyed
//! session simply stops resolving.

pub mod entry;
pub mod error;
pub mod store;

/// Identifier assigned to a session on registration
pub type SessionId = u64;

pub use entry::{FanoutTarget, SessionEntry, SessionHandle};
pub use error::RegistryError;
pub use store::SessionRegistry;
