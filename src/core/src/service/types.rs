use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::events::Packet;
use crate::facade::Facade;
use crate::service::handle::ServiceHandle;
use crate::session_management::session::SessionId;

/// Identifies one async-connect attempt from issue to its single result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectAttemptId(u64);

impl ConnectAttemptId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handler for packets of one opcode. Gets the packet on loan, like
/// `Facade::on_unhandled_packet`.
pub type PacketHandler = Box<dyn FnMut(&ServiceHandle, &Packet<'_>) + Send>;

/// Where the dispatcher is in the service lifecycle.
///
/// `Created -> Initialized -> Running -> Stopped -> Destroyed`; a service whose
/// engine failed to start goes from `Initialized` straight to `Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePhase {
    Created,
    Initialized,
    Running,
    Stopped,
    Destroyed,
}

/// Requests queued by a [`ServiceHandle`] for the service task.
pub enum ServiceCommand {
    Send { session_id: SessionId, data: Vec<u8> },
    Close { session_id: SessionId, reason: String },
    Connect { attempt: ConnectAttemptId, addr: SocketAddr },
    Listen(SocketAddr),
    RegisterFacade(Box<dyn Facade>),
    UnregisterFacade(String),
    Stop,
}

impl fmt::Debug for ServiceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceCommand::Send { session_id, data } => f
                .debug_struct("Send")
                .field("session_id", session_id)
                .field("len", &data.len())
                .finish(),
            ServiceCommand::Close { session_id, reason } => f
                .debug_struct("Close")
                .field("session_id", session_id)
                .field("reason", reason)
                .finish(),
            ServiceCommand::Connect { attempt, addr } => f
                .debug_struct("Connect")
                .field("attempt", attempt)
                .field("addr", addr)
                .finish(),
            ServiceCommand::Listen(addr) => f.debug_tuple("Listen").field(addr).finish(),
            ServiceCommand::RegisterFacade(facade) => {
                f.debug_tuple("RegisterFacade").field(&facade.name()).finish()
            }
            ServiceCommand::UnregisterFacade(name) => {
                f.debug_tuple("UnregisterFacade").field(name).finish()
            }
            ServiceCommand::Stop => f.write_str("Stop"),
        }
    }
}
