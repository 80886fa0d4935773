use std::net::SocketAddr;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

use crate::error_handling::types::{NetworkError, SessionError};
use crate::events::{AsyncConnResult, OwnedPacket, ProtoReport, SessionDestroyInfo};
use crate::service::types::ConnectAttemptId;
use crate::session_management::session::{SessionId, SessionInfo};
use crate::session_management::session_registry::SharedRegistry;

/// Work the service task hands to its engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Listen(SocketAddr),
    Connect {
        attempt: ConnectAttemptId,
        addr: SocketAddr,
    },
    Send {
        session_id: SessionId,
        data: Vec<u8>,
    },
    Close {
        session_id: SessionId,
        reason: String,
    },
    /// Close everything. No event is expected after this.
    Shutdown,
}

/// Session state changes reported by an engine, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    SessionCreated(SessionInfo),
    SessionDestroyed(SessionDestroyInfo),
    /// Outcome of a `Connect` command. `session` is set exactly when the
    /// attempt succeeded.
    AsyncConnResult {
        attempt: ConnectAttemptId,
        result: AsyncConnResult,
        session: Option<SessionInfo>,
    },
    ProtoReport(ProtoReport),
    Packet(OwnedPacket),
}

impl EngineEvent {
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            EngineEvent::SessionCreated(info) => Some(info.session_id()),
            EngineEvent::SessionDestroyed(info) => Some(info.session_id()),
            EngineEvent::AsyncConnResult { session, .. } => {
                session.as_ref().map(|s| s.session_id())
            }
            EngineEvent::ProtoReport(report) => Some(report.session_id()),
            EngineEvent::Packet(packet) => Some(packet.session_id()),
        }
    }
}

/// Where an engine sends its events, plus access to id allocation.
///
/// Cheap to clone; every connection task of an engine holds one.
#[derive(Clone)]
pub struct EngineSink {
    events: Sender<EngineEvent>,
    registry: SharedRegistry,
}

impl EngineSink {
    pub fn new(events: Sender<EngineEvent>, registry: SharedRegistry) -> Self {
        Self { events, registry }
    }

    /// Reserves an id for a session the engine is about to report.
    pub fn allocate_session_id(&self) -> Result<SessionId, SessionError> {
        self.registry
            .lock()
            .map_err(|_| SessionError::RegistryPoisoned)?
            .allocate()
    }

    /// Hands back a reservation that never turned into a creation event.
    pub fn cancel_session_id(&self, id: SessionId) -> Result<(), SessionError> {
        self.registry
            .lock()
            .map_err(|_| SessionError::RegistryPoisoned)?
            .cancel(id)
    }

    /// Queues an event, waiting for room when the service is behind.
    pub async fn emit(&self, event: EngineEvent) -> Result<(), NetworkError> {
        self.events
            .send(event)
            .await
            .map_err(|_| NetworkError::ChannelFailed)
    }

    /// Queues an event without waiting. Fails when the queue is full or the
    /// service is gone.
    pub fn try_emit(&self, event: EngineEvent) -> Result<(), NetworkError> {
        self.events.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) | TrySendError::Closed(_) => NetworkError::ChannelFailed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// A transport driven by a service.
///
/// `start` is called once, before the first `execute`. Neither may block: an
/// engine spawns tasks for anything that waits on I/O.
pub trait Engine: Send + 'static {
    fn start(&mut self, sink: EngineSink) -> Result<(), NetworkError>;

    fn execute(&mut self, command: EngineCommand) -> Result<(), NetworkError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::session_registry::SessionRegistry;
    use crate::session_management::SessionState;
    use tokio::sync::mpsc;

    #[test]
    fn sink_reserves_and_cancels_ids() {
        let (tx, _rx) = mpsc::channel(4);
        let registry = SessionRegistry::shared(2);
        let sink = EngineSink::new(tx, registry.clone());

        let first = sink.allocate_session_id().unwrap();
        let second = sink.allocate_session_id().unwrap();
        assert_eq!(
            sink.allocate_session_id(),
            Err(SessionError::SessionLimitReached(2))
        );

        sink.cancel_session_id(first).unwrap();
        assert_eq!(registry.lock().unwrap().state(first), None);
        assert_eq!(
            registry.lock().unwrap().state(second),
            Some(SessionState::Reserved)
        );
    }

    #[tokio::test]
    async fn try_emit_reports_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = EngineSink::new(tx, SessionRegistry::shared(4));
        let packet = OwnedPacket::new(SessionId::new(1), 0, b"a".to_vec());

        sink.try_emit(EngineEvent::Packet(packet.clone())).unwrap();
        assert!(matches!(
            sink.try_emit(EngineEvent::Packet(packet.clone())),
            Err(NetworkError::ChannelFailed)
        ));

        assert_eq!(rx.recv().await, Some(EngineEvent::Packet(packet)));
        drop(rx);
        assert!(sink.is_closed());
    }
}
