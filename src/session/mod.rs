//! Per-connection session handling

pub mod context;
pub mod machine;
pub mod state;
pub mod stream;

pub use context::SessionContext;
pub use machine::Session;
pub use state::{PlayStatus, SessionPhase, SessionState};
pub use stream::StreamCache;
