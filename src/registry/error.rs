//! Registry error types

use super::SessionId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No session registered under this id
    SessionNotFound(SessionId),
    /// Another session already publishes to the path
    PathAlreadyPublished(String),
    /// The session already publishes to another path
    AlreadyPublishing(String),
    /// The session is already subscribed to the path
    AlreadySubscribed(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            RegistryError::PathAlreadyPublished(path) => {
                write!(f, "Path already has a publisher: {}", path)
            }
            RegistryError::AlreadyPublishing(path) => {
                write!(f, "Session already publishes to: {}", path)
            }
            RegistryError::AlreadySubscribed(path) => {
                write!(f, "Session already subscribed to: {}", path)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
