use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Identifier of one session, unique among concurrently live sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u32);

impl SessionId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable record of one connection's identity and endpoints.
///
/// Built by the engine the moment a connection is accepted or established and
/// shared by reference with every record that concerns the session. Holding a
/// descriptor after its destruction record was delivered is fine for
/// inspection, but the id no longer addresses a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    session_id: SessionId,
    socket_handle: i64,
    is_listen: bool,
    local_endpoint: SocketAddr,
    remote_endpoint: SocketAddr,
}

impl SessionInfo {
    pub fn new(
        session_id: SessionId,
        socket_handle: i64,
        is_listen: bool,
        local_endpoint: SocketAddr,
        remote_endpoint: SocketAddr,
    ) -> Self {
        Self {
            session_id,
            socket_handle,
            is_listen,
            local_endpoint,
            remote_endpoint,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Underlying transport handle, `-1` when the platform exposes none.
    pub fn socket_handle(&self) -> i64 {
        self.socket_handle
    }

    pub fn is_listen_session(&self) -> bool {
        self.is_listen
    }

    pub fn local_endpoint(&self) -> SocketAddr {
        self.local_endpoint
    }

    pub fn local_host(&self) -> IpAddr {
        self.local_endpoint.ip()
    }

    pub fn local_port(&self) -> u16 {
        self.local_endpoint.port()
    }

    pub fn remote_endpoint(&self) -> SocketAddr {
        self.remote_endpoint
    }

    pub fn remote_host(&self) -> IpAddr {
        self.remote_endpoint.ip()
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_endpoint.port()
    }
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionInfo[session_id: {}, socket: {}, listen: {}, local: {}, remote: {}]",
            self.session_id,
            self.socket_handle,
            self.is_listen,
            self.local_endpoint,
            self.remote_endpoint
        )
    }
}
