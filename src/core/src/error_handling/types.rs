use std::fmt;

use crate::service::types::ConnectAttemptId;
use crate::session_management::session::SessionId;
use crate::session_management::SessionState;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    MissingServiceName,
    NoEndpoints,
    NotInRange(String),
    BadLogLevel(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::MissingServiceName => write!(f, "Service name must not be empty"),
            ConfigError::NoEndpoints => {
                write!(f, "No listen or connect endpoint configured")
            }
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::BadLogLevel(e) => write!(f, "Unknown log level: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug, PartialEq)]
pub enum SessionError {
    SessionLimitReached(usize),
    IdSpaceExhausted,
    NotFound(SessionId),
    InvalidTransition {
        session_id: SessionId,
        from: Option<SessionState>,
        to: SessionState,
    },
    RegistryPoisoned,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::SessionLimitReached(max) => {
                write!(f, "Session limit reached ({} sessions)", max)
            }
            SessionError::IdSpaceExhausted => write!(f, "No free session identifier left"),
            SessionError::NotFound(id) => write!(f, "Session {} not found", id),
            SessionError::InvalidTransition { session_id, from, to } => match from {
                Some(from) => write!(
                    f,
                    "Session {} cannot move from {:?} to {:?}",
                    session_id, from, to
                ),
                None => write!(f, "Unknown session {} cannot move to {:?}", session_id, to),
            },
            SessionError::RegistryPoisoned => write!(f, "Session registry lock poisoned"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Rejections raised while validating engine events against the session
/// state machine. A rejected event never reaches a facade.
#[derive(Debug, PartialEq)]
pub enum DispatchError {
    NotRunning,
    DuplicateCreation(SessionId),
    SessionNotLive(SessionId),
    UnknownAttempt(ConnectAttemptId),
    MismatchedConnResult(ConnectAttemptId),
    Session(SessionError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::NotRunning => write!(f, "Dispatcher is not running"),
            DispatchError::DuplicateCreation(id) => {
                write!(f, "Session {} was already created", id)
            }
            DispatchError::SessionNotLive(id) => write!(f, "Session {} is not live", id),
            DispatchError::UnknownAttempt(a) => write!(f, "Unknown connect attempt {}", a),
            DispatchError::MismatchedConnResult(a) => write!(
                f,
                "Connect attempt {} result disagrees with its session payload",
                a
            ),
            DispatchError::Session(e) => write!(f, "Session error: {}", e),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<SessionError> for DispatchError {
    fn from(err: SessionError) -> Self {
        DispatchError::Session(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(std::io::Error),
    SockError(std::io::Error),
    ChannelFailed,
    UnknownSession(SessionId),
    NotStarted,
    Session(SessionError),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::SockError(e) => write!(f, "Socket error: {}", e),
            NetworkError::ChannelFailed => write!(f, "Network channel failed"),
            NetworkError::UnknownSession(id) => write!(f, "No connection for session {}", id),
            NetworkError::NotStarted => write!(f, "Engine not started"),
            NetworkError::Session(e) => write!(f, "Session error: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<SessionError> for NetworkError {
    fn from(err: SessionError) -> Self {
        NetworkError::Session(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    OpenFailed(std::io::Error),
    WriteFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::OpenFailed(e) => write!(f, "Storage open failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum ServiceError {
    NotRunning,
    ChannelFailed,
    Network(NetworkError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::NotRunning => write!(f, "Service is not running"),
            ServiceError::ChannelFailed => write!(f, "Service command channel closed"),
            ServiceError::Network(e) => write!(f, "Network error: {}", e),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<NetworkError> for ServiceError {
    fn from(err: NetworkError) -> Self {
        ServiceError::Network(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_both_states() {
        let err = SessionError::InvalidTransition {
            session_id: SessionId::new(7),
            from: Some(SessionState::Retiring),
            to: SessionState::Live,
        };
        let text = err.to_string();
        assert!(text.contains("7"));
        assert!(text.contains("Retiring"));
        assert!(text.contains("Live"));
    }

    #[test]
    fn session_error_converts_into_dispatch_error() {
        let err: DispatchError = SessionError::IdSpaceExhausted.into();
        assert_eq!(err, DispatchError::Session(SessionError::IdSpaceExhausted));
    }
}
