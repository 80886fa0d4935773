//! The single dispatch path of a service.
//!
//! [`EventDispatcher`] owns the registered facades and opcode handlers,
//! validates every engine event against the session state machine, and
//! invokes hooks one at a time. Events that would break the per-session
//! ordering (a second creation, anything after a destruction, a result for an
//! attempt nobody issued) are rejected with a [`DispatchError`] and never
//! reach a facade.
//!
//! Hook faults are isolated: a panicking facade is logged and the event still
//! reaches the remaining facades.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::MutexGuard;
use std::time::Duration;

use log::{debug, error, trace, warn};

use super::handle::ServiceHandle;
use super::types::{ConnectAttemptId, PacketHandler, ServicePhase};
use crate::error_handling::types::{DispatchError, SessionError};
use crate::events::{
    errno, AsyncConnResult, OwnedPacket, ServiceEvent, SessionDestroyInfo, SERVICE_STOPPED_REASON,
};
use crate::facade::Facade;
use crate::network::types::EngineEvent;
use crate::session_management::session::{SessionId, SessionInfo};
use crate::session_management::session_registry::{SessionRegistry, SharedRegistry};
use crate::session_management::SessionState;

pub struct EventDispatcher {
    handle: ServiceHandle,
    registry: SharedRegistry,
    facades: Vec<Box<dyn Facade>>,
    handlers: HashMap<u32, PacketHandler>,
    live: BTreeMap<SessionId, SessionInfo>,
    pending_connects: BTreeMap<ConnectAttemptId, SocketAddr>,
    phase: ServicePhase,
}

impl EventDispatcher {
    pub fn new(handle: ServiceHandle, registry: SharedRegistry) -> Self {
        Self {
            handle,
            registry,
            facades: Vec::new(),
            handlers: HashMap::new(),
            live: BTreeMap::new(),
            pending_connects: BTreeMap::new(),
            phase: ServicePhase::Created,
        }
    }

    pub fn handle(&self) -> &ServiceHandle {
        &self.handle
    }

    pub fn phase(&self) -> ServicePhase {
        self.phase
    }

    pub fn facade_count(&self) -> usize {
        self.facades.len()
    }

    pub fn is_live(&self, session_id: SessionId) -> bool {
        self.live.contains_key(&session_id)
    }

    pub fn live_sessions(&self) -> impl Iterator<Item = &SessionInfo> {
        self.live.values()
    }

    pub fn pending_connect_count(&self) -> usize {
        self.pending_connects.len()
    }

    /// Attaches a facade, catching it up with the hooks the service already
    /// went through (`on_init`, and `on_start` if running).
    pub fn add_facade(&mut self, mut facade: Box<dyn Facade>) {
        debug!(
            "[{}] registering facade '{}' in phase {:?}",
            self.handle.service_id(),
            facade.name(),
            self.phase
        );
        match self.phase {
            ServicePhase::Created => {}
            ServicePhase::Initialized | ServicePhase::Stopped => {
                deliver_guarded(&self.handle, facade.as_mut(), ServiceEvent::Init);
            }
            ServicePhase::Running => {
                deliver_guarded(&self.handle, facade.as_mut(), ServiceEvent::Init);
                deliver_guarded(&self.handle, facade.as_mut(), ServiceEvent::Start);
            }
            ServicePhase::Destroyed => {
                warn!(
                    "[{}] service destroyed, dropping facade '{}'",
                    self.handle.service_id(),
                    facade.name()
                );
                return;
            }
        }
        self.facades.push(facade);
    }

    /// Detaches the first facade named `name`, running `on_stop` and
    /// `on_destroy` as its lifecycle requires.
    pub fn remove_facade(&mut self, name: &str) -> Option<Box<dyn Facade>> {
        let index = self.facades.iter().position(|f| f.name() == name)?;
        let mut facade = self.facades.remove(index);

        if self.phase == ServicePhase::Running {
            deliver_guarded(&self.handle, facade.as_mut(), ServiceEvent::Stop);
        }
        if matches!(
            self.phase,
            ServicePhase::Initialized | ServicePhase::Running | ServicePhase::Stopped
        ) {
            deliver_guarded(&self.handle, facade.as_mut(), ServiceEvent::Destroy);
        }
        debug!("[{}] unregistered facade '{}'", self.handle.service_id(), name);
        Some(facade)
    }

    /// Routes packets with `opcode` to `handler` instead of the facades'
    /// unhandled-packet hook. Returns the handler it replaced.
    pub fn subscribe(&mut self, opcode: u32, handler: PacketHandler) -> Option<PacketHandler> {
        self.handlers.insert(opcode, handler)
    }

    pub fn unsubscribe(&mut self, opcode: u32) -> Option<PacketHandler> {
        self.handlers.remove(&opcode)
    }

    pub fn initialize(&mut self) {
        if self.phase != ServicePhase::Created {
            warn!("[{}] initialize in phase {:?} ignored", self.handle.service_id(), self.phase);
            return;
        }
        self.phase = ServicePhase::Initialized;
        self.broadcast(ServiceEvent::Init);
    }

    pub fn start(&mut self) {
        if self.phase != ServicePhase::Initialized {
            warn!("[{}] start in phase {:?} ignored", self.handle.service_id(), self.phase);
            return;
        }
        self.phase = ServicePhase::Running;
        self.broadcast(ServiceEvent::Start);
    }

    pub fn update(&mut self) {
        if self.phase == ServicePhase::Running {
            self.broadcast(ServiceEvent::Update);
        }
    }

    pub fn idle(&mut self, idle: Duration) {
        if self.phase == ServicePhase::Running {
            self.broadcast(ServiceEvent::Idle(idle));
        }
    }

    /// Stops the service. Attempts still in flight resolve as failed and live
    /// sessions get their destruction record before the stop hooks run.
    pub fn stop(&mut self) {
        if self.phase != ServicePhase::Running {
            return;
        }

        let pending = std::mem::take(&mut self.pending_connects);
        for (attempt, addr) in pending {
            debug!("[{}] failing connect {} on stop", self.handle.service_id(), attempt);
            let result = AsyncConnResult::failed(SERVICE_STOPPED_REASON, addr);
            self.broadcast(ServiceEvent::AsyncConnResult(&result));
        }

        let live: Vec<SessionInfo> = self.live.values().cloned().collect();
        for info in live {
            let destroy = SessionDestroyInfo::new(
                info,
                true,
                SERVICE_STOPPED_REASON,
                errno::SUCCESS,
                errno::SUB_SERVICE_STOPPED,
            );
            if let Err(e) = self.destroy_session(destroy) {
                warn!("[{}] {}", self.handle.service_id(), e);
            }
        }

        self.phase = ServicePhase::Stopped;
        self.broadcast(ServiceEvent::Stop);
    }

    /// Tears every facade down. Stops first if still running; a service that
    /// never started still gets its `on_destroy` hooks.
    pub fn destroy(&mut self) {
        match self.phase {
            ServicePhase::Created | ServicePhase::Destroyed => {
                self.phase = ServicePhase::Destroyed;
                return;
            }
            ServicePhase::Running => self.stop(),
            ServicePhase::Initialized | ServicePhase::Stopped => {}
        }
        self.phase = ServicePhase::Destroyed;
        self.broadcast(ServiceEvent::Destroy);
    }

    /// Records an attempt issued through the service handle.
    pub fn track_connect(
        &mut self,
        attempt: ConnectAttemptId,
        addr: SocketAddr,
    ) -> Result<(), DispatchError> {
        if self.phase != ServicePhase::Running {
            return Err(DispatchError::NotRunning);
        }
        self.pending_connects.insert(attempt, addr);
        Ok(())
    }

    /// Resolves a tracked attempt as failed, e.g. when the engine refused the
    /// command outright.
    pub fn fail_connect(
        &mut self,
        attempt: ConnectAttemptId,
        reason: &str,
    ) -> Result<(), DispatchError> {
        let addr = *self
            .pending_connects
            .get(&attempt)
            .ok_or(DispatchError::UnknownAttempt(attempt))?;
        self.dispatch(EngineEvent::AsyncConnResult {
            attempt,
            result: AsyncConnResult::failed(reason, addr),
            session: None,
        })
    }

    /// Validates one engine event and delivers it.
    pub fn dispatch(&mut self, event: EngineEvent) -> Result<(), DispatchError> {
        if self.phase != ServicePhase::Running {
            return Err(DispatchError::NotRunning);
        }

        match event {
            EngineEvent::SessionCreated(info) => self.create_session(info),
            EngineEvent::SessionDestroyed(info) => self.destroy_session(info),
            EngineEvent::AsyncConnResult {
                attempt,
                result,
                session,
            } => self.resolve_connect(attempt, result, session),
            EngineEvent::ProtoReport(report) => {
                self.ensure_live(report.session_id())?;
                self.broadcast(ServiceEvent::ProtoReport(&report));
                Ok(())
            }
            EngineEvent::Packet(packet) => {
                self.ensure_live(packet.session_id())?;
                self.route_packet(&packet);
                Ok(())
            }
        }
    }

    fn create_session(&mut self, info: SessionInfo) -> Result<(), DispatchError> {
        let id = info.session_id();
        match self.lock_registry()?.activate(id) {
            Ok(()) => {}
            Err(SessionError::InvalidTransition {
                from: Some(SessionState::Live),
                ..
            }) => return Err(DispatchError::DuplicateCreation(id)),
            Err(e) => return Err(e.into()),
        }

        self.live.insert(id, info.clone());
        self.broadcast(ServiceEvent::SessionCreate(&info));
        Ok(())
    }

    fn destroy_session(&mut self, info: SessionDestroyInfo) -> Result<(), DispatchError> {
        let id = info.session_id();
        self.lock_registry()?
            .begin_retire(id)
            .map_err(|_| DispatchError::SessionNotLive(id))?;
        self.live.remove(&id);

        self.broadcast(ServiceEvent::SessionDestroy(&info));

        // every facade is done with the record, the id may be handed out again
        self.lock_registry()?.release(id)?;
        Ok(())
    }

    fn resolve_connect(
        &mut self,
        attempt: ConnectAttemptId,
        result: AsyncConnResult,
        session: Option<SessionInfo>,
    ) -> Result<(), DispatchError> {
        if !self.pending_connects.contains_key(&attempt) {
            return Err(DispatchError::UnknownAttempt(attempt));
        }
        if result.is_connected() != session.is_some() {
            return Err(DispatchError::MismatchedConnResult(attempt));
        }
        if let Some(info) = &session {
            let state = self.lock_registry()?.state(info.session_id());
            if matches!(state, Some(SessionState::Live | SessionState::Retiring)) {
                return Err(DispatchError::DuplicateCreation(info.session_id()));
            }
        }

        self.pending_connects.remove(&attempt);
        trace!("[{}] connect {} resolved", self.handle.service_id(), attempt);
        self.broadcast(ServiceEvent::AsyncConnResult(&result));

        match session {
            Some(info) => self.create_session(info),
            None => Ok(()),
        }
    }

    fn ensure_live(&self, session_id: SessionId) -> Result<(), DispatchError> {
        if self.live.contains_key(&session_id) {
            Ok(())
        } else {
            Err(DispatchError::SessionNotLive(session_id))
        }
    }

    fn route_packet(&mut self, packet: &OwnedPacket) {
        let loan = packet.as_packet();
        if let Some(handler) = self.handlers.get_mut(&loan.opcode()) {
            let handle = &self.handle;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(handle, &loan)));
            if let Err(payload) = outcome {
                error!(
                    "[{}] handler for opcode {} panicked: {}",
                    handle.service_id(),
                    loan.opcode(),
                    panic_message(payload.as_ref())
                );
            }
            return;
        }
        self.broadcast(ServiceEvent::UnhandledPacket(loan));
    }

    fn broadcast(&mut self, event: ServiceEvent<'_>) {
        trace!("[{}] dispatching {}", self.handle.service_id(), event);
        for facade in self.facades.iter_mut() {
            deliver_guarded(&self.handle, facade.as_mut(), event);
        }
    }

    fn lock_registry(&self) -> Result<MutexGuard<'_, SessionRegistry>, DispatchError> {
        self.registry
            .lock()
            .map_err(|_| DispatchError::Session(SessionError::RegistryPoisoned))
    }
}

fn deliver_guarded(handle: &ServiceHandle, facade: &mut dyn Facade, event: ServiceEvent<'_>) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| event.deliver(&mut *facade, handle)));
    if let Err(payload) = outcome {
        error!(
            "[{}] facade '{}' panicked in {}: {}",
            handle.service_id(),
            facade.name(),
            event.kind(),
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
