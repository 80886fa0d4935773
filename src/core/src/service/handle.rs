use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::types::{ConnectAttemptId, ServiceCommand};
use crate::error_handling::types::ServiceError;
use crate::facade::Facade;
use crate::session_management::session::SessionId;

/// Capability object for one service instance.
///
/// Handed to every facade hook and cheap to clone. All commands are queued on
/// an unbounded channel and executed by the service task, so calling them
/// from a hook never blocks. Nothing here is global: two services have two
/// independent handles.
#[derive(Clone)]
pub struct ServiceHandle {
    service_id: Uuid,
    name: Arc<str>,
    commands: UnboundedSender<ServiceCommand>,
    running: Arc<AtomicBool>,
    next_attempt: Arc<AtomicU64>,
}

impl ServiceHandle {
    pub fn new(name: impl Into<String>, commands: UnboundedSender<ServiceCommand>) -> Self {
        let name: String = name.into();
        Self {
            service_id: Uuid::new_v4(),
            name: Arc::from(name),
            commands,
            running: Arc::new(AtomicBool::new(false)),
            next_attempt: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn service_id(&self) -> Uuid {
        self.service_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn send(&self, session_id: SessionId, data: impl Into<Vec<u8>>) -> Result<(), ServiceError> {
        self.submit(ServiceCommand::Send {
            session_id,
            data: data.into(),
        })
    }

    /// Asks the engine to close a session. Its destruction record follows
    /// with `is_destroyed_from_service() == true`.
    pub fn close(&self, session_id: SessionId, reason: impl Into<String>) -> Result<(), ServiceError> {
        self.submit(ServiceCommand::Close {
            session_id,
            reason: reason.into(),
        })
    }

    /// Starts a connection attempt. Exactly one `AsyncConnResult` carrying
    /// `addr` is delivered for it, to every registered facade.
    pub fn async_connect(&self, addr: SocketAddr) -> Result<ConnectAttemptId, ServiceError> {
        let attempt = ConnectAttemptId::new(self.next_attempt.fetch_add(1, Ordering::Relaxed));
        self.submit(ServiceCommand::Connect { attempt, addr })?;
        debug!("[{}] queued connect {} to {}", self.service_id, attempt, addr);
        Ok(attempt)
    }

    pub fn listen(&self, addr: SocketAddr) -> Result<(), ServiceError> {
        self.submit(ServiceCommand::Listen(addr))
    }

    pub fn register_facade(&self, facade: Box<dyn Facade>) -> Result<(), ServiceError> {
        self.submit(ServiceCommand::RegisterFacade(facade))
    }

    pub fn unregister_facade(&self, name: impl Into<String>) -> Result<(), ServiceError> {
        self.submit(ServiceCommand::UnregisterFacade(name.into()))
    }

    pub fn stop(&self) -> Result<(), ServiceError> {
        self.submit(ServiceCommand::Stop)
    }

    fn submit(&self, command: ServiceCommand) -> Result<(), ServiceError> {
        if !self.is_running() {
            return Err(ServiceError::NotRunning);
        }
        self.commands
            .send(command)
            .map_err(|_| ServiceError::ChannelFailed)
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("service_id", &self.service_id)
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn commands_are_refused_until_running() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ServiceHandle::new("svc", tx);

        assert!(matches!(
            handle.send(SessionId::new(1), b"x".to_vec()),
            Err(ServiceError::NotRunning)
        ));

        handle.set_running(true);
        handle.close(SessionId::new(1), "bye").unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServiceCommand::Close { reason, .. } if reason == "bye"
        ));
    }

    #[test]
    fn attempts_are_numbered_per_service() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ServiceHandle::new("svc", tx);
        handle.set_running(true);
        let addr: SocketAddr = "203.0.113.9:443".parse().unwrap();

        let first = handle.async_connect(addr).unwrap();
        let second = handle.clone().async_connect(addr).unwrap();

        assert_eq!(first, ConnectAttemptId::new(1));
        assert_eq!(second, ConnectAttemptId::new(2));
        assert!(matches!(rx.try_recv().unwrap(), ServiceCommand::Connect { attempt, .. } if attempt == first));
    }

    #[test]
    fn closed_channel_is_reported() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ServiceHandle::new("svc", tx);
        handle.set_running(true);
        drop(rx);

        assert!(matches!(handle.stop(), Err(ServiceError::ChannelFailed)));
    }
}
