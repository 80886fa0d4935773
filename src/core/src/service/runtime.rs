//! The service task.
//!
//! [`Service::run`] drives one dispatcher in fixed cycles. Each cycle it
//! executes the commands facades queued through their [`ServiceHandle`],
//! delivers up to `max_events_per_cycle` engine events, then calls
//! `on_update`, and `on_idle` if the cycle had nothing to do.

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, Receiver, UnboundedReceiver};
use tokio::time::{self, Instant, MissedTickBehavior};

use super::dispatcher::EventDispatcher;
use super::handle::ServiceHandle;
use super::types::ServiceCommand;
use crate::configuration::types::ServiceSettings;
use crate::error_handling::types::ServiceError;
use crate::events::Packet;
use crate::facade::Facade;
use crate::network::types::{Engine, EngineCommand, EngineEvent, EngineSink};
use crate::session_management::session_registry::SessionRegistry;

pub struct Service<E: Engine> {
    handle: ServiceHandle,
    dispatcher: EventDispatcher,
    engine: E,
    sink: EngineSink,
    commands: UnboundedReceiver<ServiceCommand>,
    events: Receiver<EngineEvent>,
    settings: ServiceSettings,
}

impl<E: Engine> Service<E> {
    pub fn new(engine: E, settings: ServiceSettings) -> Self {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::channel(settings.event_queue_capacity.max(1));
        let handle = ServiceHandle::new(settings.name.clone(), command_tx);
        let registry = SessionRegistry::shared(settings.max_sessions);

        Self {
            dispatcher: EventDispatcher::new(handle.clone(), registry.clone()),
            sink: EngineSink::new(event_tx, registry),
            handle,
            engine,
            commands,
            events,
            settings,
        }
    }

    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn add_facade(&mut self, facade: Box<dyn Facade>) {
        self.dispatcher.add_facade(facade);
    }

    /// Sends packets with `opcode` to `handler` rather than to the facades'
    /// unhandled-packet hook.
    pub fn subscribe<F>(&mut self, opcode: u32, handler: F)
    where
        F: FnMut(&ServiceHandle, &Packet<'_>) + Send + 'static,
    {
        if self.dispatcher.subscribe(opcode, Box::new(handler)).is_some() {
            debug!(
                "[{}] replaced handler for opcode {}",
                self.handle.service_id(),
                opcode
            );
        }
    }

    /// Runs the service until a facade calls `stop`.
    ///
    /// A failing engine start is returned as an error after every facade got
    /// its `on_destroy`.
    pub async fn run(&mut self) -> Result<(), ServiceError> {
        let id = self.handle.service_id();
        info!("[{}] starting service '{}'", id, self.handle.name());

        self.dispatcher.initialize();
        if let Err(e) = self.engine.start(self.sink.clone()) {
            error!("[{}] engine failed to start: {}", id, e);
            self.dispatcher.destroy();
            return Err(e.into());
        }

        self.handle.set_running(true);
        self.dispatcher.start();

        let interval = self.settings.update_interval;
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let cycle_start = Instant::now();

            let (processed, stop_requested) = self.process_pending();
            if stop_requested {
                break;
            }

            self.dispatcher.update();
            if processed == 0 {
                self.dispatcher
                    .idle(interval.saturating_sub(cycle_start.elapsed()));
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Returns how much work was done and whether a stop was requested.
    fn process_pending(&mut self) -> (usize, bool) {
        let mut processed = 0;

        while let Ok(command) = self.commands.try_recv() {
            processed += 1;
            if let ServiceCommand::Stop = command {
                debug!("[{}] stop requested", self.handle.service_id());
                return (processed, true);
            }
            self.handle_command(command);
        }

        let budget = self.settings.max_events_per_cycle.max(1);
        let mut delivered = 0;
        while delivered < budget {
            let Ok(event) = self.events.try_recv() else {
                break;
            };
            delivered += 1;
            self.deliver(event);
        }

        (processed + delivered, false)
    }

    fn deliver(&mut self, event: EngineEvent) {
        let session_id = event.session_id();
        if let Err(e) = self.dispatcher.dispatch(event) {
            match session_id {
                Some(session_id) => warn!(
                    "[{}] dropped engine event for session {}: {}",
                    self.handle.service_id(),
                    session_id,
                    e
                ),
                None => warn!("[{}] dropped engine event: {}", self.handle.service_id(), e),
            }
        }
    }

    fn handle_command(&mut self, command: ServiceCommand) {
        let id = self.handle.service_id();
        match command {
            ServiceCommand::Send { session_id, data } => {
                if !self.dispatcher.is_live(session_id) {
                    warn!("[{}] send to session {} which is not live", id, session_id);
                    return;
                }
                self.execute(EngineCommand::Send { session_id, data });
            }
            ServiceCommand::Close { session_id, reason } => {
                if !self.dispatcher.is_live(session_id) {
                    warn!("[{}] close of session {} which is not live", id, session_id);
                    return;
                }
                self.execute(EngineCommand::Close { session_id, reason });
            }
            ServiceCommand::Connect { attempt, addr } => {
                if let Err(e) = self.dispatcher.track_connect(attempt, addr) {
                    warn!("[{}] connect {} not tracked: {}", id, attempt, e);
                    return;
                }
                if let Err(e) = self.engine.execute(EngineCommand::Connect { attempt, addr }) {
                    warn!("[{}] connect {} to {} failed: {}", id, attempt, addr, e);
                    if let Err(e) = self.dispatcher.fail_connect(attempt, &e.to_string()) {
                        warn!("[{}] {}", id, e);
                    }
                }
            }
            ServiceCommand::Listen(addr) => self.execute(EngineCommand::Listen(addr)),
            ServiceCommand::RegisterFacade(facade) => self.dispatcher.add_facade(facade),
            ServiceCommand::UnregisterFacade(name) => {
                if self.dispatcher.remove_facade(&name).is_none() {
                    warn!("[{}] no facade named '{}'", id, name);
                }
            }
            ServiceCommand::Stop => {}
        }
    }

    fn execute(&mut self, command: EngineCommand) {
        if let Err(e) = self.engine.execute(command) {
            warn!("[{}] engine command failed: {}", self.handle.service_id(), e);
        }
    }

    fn shutdown(&mut self) {
        let id = self.handle.service_id();
        self.handle.set_running(false);

        // attempts queued behind the stop still resolve, as failures
        while let Ok(command) = self.commands.try_recv() {
            match command {
                ServiceCommand::Connect { attempt, addr } => {
                    if let Err(e) = self.dispatcher.track_connect(attempt, addr) {
                        warn!("[{}] {}", id, e);
                    }
                }
                ServiceCommand::RegisterFacade(facade) => self.dispatcher.add_facade(facade),
                other => debug!("[{}] discarding {:?} after stop", id, other),
            }
        }

        if let Err(e) = self.engine.execute(EngineCommand::Shutdown) {
            warn!("[{}] engine shutdown failed: {}", id, e);
        }

        // events the engine queued before the stop keep their own cause; only
        // what is still unresolved afterwards gets a "service stopped" record
        while let Ok(event) = self.events.try_recv() {
            self.deliver(event);
        }
        self.dispatcher.stop();
        self.dispatcher.destroy();
        info!("[{}] service '{}' stopped", id, self.handle.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::types::NetworkError;
    use crate::events::{
        errno, AsyncConnResult, OwnedServiceEvent, SessionDestroyInfo, SERVICE_STOPPED_REASON,
    };
    use crate::facade::ForwardingFacade;
    use crate::session_management::session::{SessionId, SessionInfo};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Clone, Copy)]
    enum ConnectBehavior {
        Accept,
        /// Connects, then the peer resets the connection at once.
        AcceptThenReset,
        Hang,
        Fail,
    }

    struct ScriptedEngine {
        behavior: ConnectBehavior,
        sink: Option<EngineSink>,
        sessions: HashMap<SessionId, SessionInfo>,
        executed: Arc<Mutex<Vec<EngineCommand>>>,
    }

    impl ScriptedEngine {
        fn new(behavior: ConnectBehavior) -> (Self, Arc<Mutex<Vec<EngineCommand>>>) {
            let executed = Arc::new(Mutex::new(Vec::new()));
            let engine = Self {
                behavior,
                sink: None,
                sessions: HashMap::new(),
                executed: Arc::clone(&executed),
            };
            (engine, executed)
        }
    }

    impl Engine for ScriptedEngine {
        fn start(&mut self, sink: EngineSink) -> Result<(), NetworkError> {
            self.sink = Some(sink);
            Ok(())
        }

        fn execute(&mut self, command: EngineCommand) -> Result<(), NetworkError> {
            self.executed.lock().unwrap().push(command.clone());
            let sink = self.sink.as_ref().ok_or(NetworkError::NotStarted)?;
            match command {
                EngineCommand::Connect { attempt, addr } => match self.behavior {
                    ConnectBehavior::Accept => {
                        let id = sink.allocate_session_id()?;
                        let info = SessionInfo::new(id, 3, false, "10.0.0.1:40000".parse().unwrap(), addr);
                        self.sessions.insert(id, info.clone());
                        sink.try_emit(EngineEvent::AsyncConnResult {
                            attempt,
                            result: AsyncConnResult::succeeded(addr),
                            session: Some(info),
                        })
                    }
                    ConnectBehavior::AcceptThenReset => {
                        let id = sink.allocate_session_id()?;
                        let info = SessionInfo::new(id, 3, false, "10.0.0.1:40001".parse().unwrap(), addr);
                        sink.try_emit(EngineEvent::AsyncConnResult {
                            attempt,
                            result: AsyncConnResult::succeeded(addr),
                            session: Some(info.clone()),
                        })?;
                        sink.try_emit(EngineEvent::SessionDestroyed(SessionDestroyInfo::new(
                            info,
                            false,
                            "connection reset by peer",
                            104,
                            errno::SUB_CLOSED_BY_PEER,
                        )))
                    }
                    ConnectBehavior::Hang => Ok(()),
                    ConnectBehavior::Fail => Err(NetworkError::ChannelFailed),
                },
                EngineCommand::Close { session_id, reason } => {
                    let info = self
                        .sessions
                        .remove(&session_id)
                        .ok_or(NetworkError::UnknownSession(session_id))?;
                    sink.try_emit(EngineEvent::SessionDestroyed(SessionDestroyInfo::new(
                        info, true, reason, 0, 2,
                    )))
                }
                _ => Ok(()),
            }
        }
    }

    struct FailingEngine;

    impl Engine for FailingEngine {
        fn start(&mut self, _sink: EngineSink) -> Result<(), NetworkError> {
            Err(NetworkError::NotStarted)
        }

        fn execute(&mut self, _command: EngineCommand) -> Result<(), NetworkError> {
            Ok(())
        }
    }

    /// Connects on start, says hello and hangs up, then stops the service.
    struct Driver {
        target: SocketAddr,
        stop_right_away: bool,
    }

    impl Facade for Driver {
        fn name(&self) -> &str {
            "driver"
        }

        fn on_start(&mut self, svc: &ServiceHandle) {
            svc.async_connect(self.target).unwrap();
            if self.stop_right_away {
                svc.stop().unwrap();
            }
        }

        fn on_session_create(&mut self, svc: &ServiceHandle, info: &SessionInfo) {
            svc.send(info.session_id(), b"hello".to_vec()).unwrap();
            svc.close(info.session_id(), "done").unwrap();
        }

        fn on_session_destroy(&mut self, svc: &ServiceHandle, _info: &SessionDestroyInfo) {
            svc.stop().unwrap();
        }

        fn on_async_conn_result(&mut self, svc: &ServiceHandle, result: &AsyncConnResult) {
            if !result.is_connected() && svc.is_running() {
                svc.stop().unwrap();
            }
        }
    }

    /// Connects on start. Closes the session it gets and stops in the same
    /// hook, or just stops once the connect result arrives.
    struct Hangup {
        close_first: bool,
    }

    impl Facade for Hangup {
        fn name(&self) -> &str {
            "hangup"
        }

        fn on_start(&mut self, svc: &ServiceHandle) {
            svc.async_connect(target()).unwrap();
        }

        fn on_async_conn_result(&mut self, svc: &ServiceHandle, _result: &AsyncConnResult) {
            if !self.close_first {
                svc.stop().unwrap();
            }
        }

        fn on_session_create(&mut self, svc: &ServiceHandle, info: &SessionInfo) {
            if self.close_first {
                svc.close(info.session_id(), "bye").unwrap();
                svc.stop().unwrap();
            }
        }
    }

    fn destroy_records(events: &[OwnedServiceEvent]) -> Vec<SessionDestroyInfo> {
        events
            .iter()
            .filter_map(|e| match e {
                OwnedServiceEvent::SessionDestroy(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    /// Stops the service on its third update.
    #[derive(Default)]
    struct Stopper {
        updates: usize,
    }

    impl Facade for Stopper {
        fn on_update(&mut self, svc: &ServiceHandle) {
            self.updates += 1;
            if self.updates == 3 {
                svc.stop().unwrap();
            }
        }
    }

    fn settings() -> ServiceSettings {
        ServiceSettings {
            name: "runtime-test".to_string(),
            update_interval: Duration::from_millis(10),
            ..ServiceSettings::default()
        }
    }

    fn target() -> SocketAddr {
        "198.51.100.7:9000".parse().unwrap()
    }

    fn drain(rx: &mut UnboundedReceiver<OwnedServiceEvent>) -> Vec<OwnedServiceEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_run_between_start_and_stop() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (engine, executed) = ScriptedEngine::new(ConnectBehavior::Hang);
        let mut service = Service::new(engine, settings());
        let (recorder, mut events) = ForwardingFacade::new("recorder");
        service.add_facade(Box::new(recorder.with_ticks()));
        service.add_facade(Box::new(Stopper::default()));

        service.run().await.unwrap();

        let events = drain(&mut events);
        assert_eq!(events.first(), Some(&OwnedServiceEvent::Init));
        assert_eq!(events.get(1), Some(&OwnedServiceEvent::Start));
        assert_eq!(
            events.iter().filter(|e| **e == OwnedServiceEvent::Update).count(),
            3
        );
        assert!(events.contains(&OwnedServiceEvent::Idle {
            idle: Duration::from_millis(10)
        }));
        assert_eq!(
            &events[events.len() - 2..],
            &[OwnedServiceEvent::Stop, OwnedServiceEvent::Destroy]
        );
        assert_eq!(*executed.lock().unwrap(), vec![EngineCommand::Shutdown]);
        assert!(!service.handle().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_send_close_round_trip() {
        let (engine, executed) = ScriptedEngine::new(ConnectBehavior::Accept);
        let mut service = Service::new(engine, settings());
        let (recorder, mut events) = ForwardingFacade::new("recorder");
        service.add_facade(Box::new(recorder));
        service.add_facade(Box::new(Driver {
            target: target(),
            stop_right_away: false,
        }));

        service.run().await.unwrap();

        let events = drain(&mut events);
        assert_eq!(events.len(), 7, "{:?}", events);
        assert_eq!(
            events[2],
            OwnedServiceEvent::AsyncConnResult(AsyncConnResult::succeeded(target()))
        );
        let session_id = match &events[3] {
            OwnedServiceEvent::SessionCreate(info) => info.session_id(),
            other => panic!("unexpected {:?}", other),
        };
        match &events[4] {
            OwnedServiceEvent::SessionDestroy(record) => {
                assert_eq!(record.session_id(), session_id);
                assert!(record.is_destroyed_from_service());
                assert_eq!(record.reason(), "done");
            }
            other => panic!("unexpected {:?}", other),
        }

        let executed = executed.lock().unwrap();
        assert!(matches!(executed[0], EngineCommand::Connect { .. }));
        assert_eq!(
            executed[1],
            EngineCommand::Send {
                session_id,
                data: b"hello".to_vec()
            }
        );
        assert!(matches!(executed[2], EngineCommand::Close { .. }));
        assert_eq!(executed[3], EngineCommand::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_connect_fails_on_stop() {
        let (engine, _executed) = ScriptedEngine::new(ConnectBehavior::Hang);
        let mut service = Service::new(engine, settings());
        let (recorder, mut events) = ForwardingFacade::new("recorder");
        service.add_facade(Box::new(recorder));
        service.add_facade(Box::new(Driver {
            target: target(),
            stop_right_away: true,
        }));

        service.run().await.unwrap();

        assert_eq!(
            drain(&mut events),
            vec![
                OwnedServiceEvent::Init,
                OwnedServiceEvent::Start,
                OwnedServiceEvent::AsyncConnResult(AsyncConnResult::failed(
                    SERVICE_STOPPED_REASON,
                    target()
                )),
                OwnedServiceEvent::Stop,
                OwnedServiceEvent::Destroy,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refused_engine_command_resolves_the_attempt() {
        let (engine, _executed) = ScriptedEngine::new(ConnectBehavior::Fail);
        let mut service = Service::new(engine, settings());
        let (recorder, mut events) = ForwardingFacade::new("recorder");
        service.add_facade(Box::new(recorder));
        service.add_facade(Box::new(Driver {
            target: target(),
            stop_right_away: false,
        }));

        service.run().await.unwrap();

        let results: Vec<_> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                OwnedServiceEvent::AsyncConnResult(result) => Some(result),
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_connected());
        assert_eq!(results[0].reason(), NetworkError::ChannelFailed.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn close_queued_before_stop_keeps_its_reason() {
        let (engine, executed) = ScriptedEngine::new(ConnectBehavior::Accept);
        let mut service = Service::new(engine, settings());
        let (recorder, mut events) = ForwardingFacade::new("recorder");
        service.add_facade(Box::new(recorder));
        service.add_facade(Box::new(Hangup { close_first: true }));

        service.run().await.unwrap();

        let events = drain(&mut events);
        let records = destroy_records(&events);
        assert_eq!(records.len(), 1, "{:?}", events);
        assert_eq!(records[0].reason(), "bye");
        assert!(records[0].is_destroyed_from_service());
        assert_eq!(records[0].err_no(), errno::SUCCESS);
        assert_eq!(records[0].sub_err_no(), errno::SUB_CLOSED_BY_SERVICE);
        assert_eq!(
            &events[events.len() - 2..],
            &[OwnedServiceEvent::Stop, OwnedServiceEvent::Destroy]
        );

        let executed = executed.lock().unwrap();
        assert!(matches!(executed[1], EngineCommand::Close { .. }));
        assert_eq!(executed[2], EngineCommand::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_reset_queued_before_stop_stays_peer_initiated() {
        let (engine, _executed) = ScriptedEngine::new(ConnectBehavior::AcceptThenReset);
        let settings = ServiceSettings {
            max_events_per_cycle: 1,
            ..settings()
        };
        let mut service = Service::new(engine, settings);
        let (recorder, mut events) = ForwardingFacade::new("recorder");
        service.add_facade(Box::new(recorder));
        service.add_facade(Box::new(Hangup { close_first: false }));

        service.run().await.unwrap();

        let events = drain(&mut events);
        assert_eq!(
            events[2],
            OwnedServiceEvent::AsyncConnResult(AsyncConnResult::succeeded(target()))
        );
        let records = destroy_records(&events);
        assert_eq!(records.len(), 1, "{:?}", events);
        assert_eq!(records[0].reason(), "connection reset by peer");
        assert!(!records[0].is_destroyed_from_service());
        assert_eq!(records[0].err_no(), 104);
        assert_eq!(records[0].sub_err_no(), errno::SUB_CLOSED_BY_PEER);
    }

    #[tokio::test]
    async fn failed_engine_start_still_tears_down() {
        let mut service = Service::new(FailingEngine, settings());
        let (recorder, mut events) = ForwardingFacade::new("recorder");
        service.add_facade(Box::new(recorder));

        let result = service.run().await;

        assert!(matches!(
            result,
            Err(ServiceError::Network(NetworkError::NotStarted))
        ));
        assert_eq!(
            drain(&mut events),
            vec![OwnedServiceEvent::Init, OwnedServiceEvent::Destroy]
        );
        assert!(!service.handle().is_running());
    }
}
