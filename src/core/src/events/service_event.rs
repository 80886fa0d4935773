//! Tagged form of every facade hook invocation.
//!
//! [`ServiceEvent`] borrows the records it carries and is what the dispatcher
//! hands to [`ServiceEvent::deliver`]. [`OwnedServiceEvent`] is its detached
//! copy, used to move events off the dispatch path or into the journal.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use super::packet::{OwnedPacket, Packet};
use super::types::{AsyncConnResult, ProtoReport, SessionDestroyInfo};
use crate::facade::Facade;
use crate::service::handle::ServiceHandle;
use crate::session_management::session::SessionInfo;

#[derive(Debug, Clone, Copy)]
pub enum ServiceEvent<'a> {
    Init,
    Destroy,
    Start,
    Stop,
    Update,
    Idle(Duration),
    SessionCreate(&'a SessionInfo),
    SessionDestroy(&'a SessionDestroyInfo),
    AsyncConnResult(&'a AsyncConnResult),
    ProtoReport(&'a ProtoReport),
    UnhandledPacket(Packet<'a>),
}

impl<'a> ServiceEvent<'a> {
    /// Invokes the facade hook matching this event.
    pub fn deliver(self, facade: &mut dyn Facade, svc: &ServiceHandle) {
        match self {
            ServiceEvent::Init => facade.on_init(svc),
            ServiceEvent::Destroy => facade.on_destroy(svc),
            ServiceEvent::Start => facade.on_start(svc),
            ServiceEvent::Stop => facade.on_stop(svc),
            ServiceEvent::Update => facade.on_update(svc),
            ServiceEvent::Idle(idle) => facade.on_idle(svc, idle),
            ServiceEvent::SessionCreate(info) => facade.on_session_create(svc, info),
            ServiceEvent::SessionDestroy(info) => facade.on_session_destroy(svc, info),
            ServiceEvent::AsyncConnResult(result) => facade.on_async_conn_result(svc, result),
            ServiceEvent::ProtoReport(report) => facade.on_proto_report(svc, report),
            ServiceEvent::UnhandledPacket(packet) => facade.on_unhandled_packet(svc, &packet),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceEvent::Init => "init",
            ServiceEvent::Destroy => "destroy",
            ServiceEvent::Start => "start",
            ServiceEvent::Stop => "stop",
            ServiceEvent::Update => "update",
            ServiceEvent::Idle(_) => "idle",
            ServiceEvent::SessionCreate(_) => "session_create",
            ServiceEvent::SessionDestroy(_) => "session_destroy",
            ServiceEvent::AsyncConnResult(_) => "async_conn_result",
            ServiceEvent::ProtoReport(_) => "proto_report",
            ServiceEvent::UnhandledPacket(_) => "unhandled_packet",
        }
    }

    pub fn to_owned_event(&self) -> OwnedServiceEvent {
        match *self {
            ServiceEvent::Init => OwnedServiceEvent::Init,
            ServiceEvent::Destroy => OwnedServiceEvent::Destroy,
            ServiceEvent::Start => OwnedServiceEvent::Start,
            ServiceEvent::Stop => OwnedServiceEvent::Stop,
            ServiceEvent::Update => OwnedServiceEvent::Update,
            ServiceEvent::Idle(idle) => OwnedServiceEvent::Idle { idle },
            ServiceEvent::SessionCreate(info) => OwnedServiceEvent::SessionCreate(info.clone()),
            ServiceEvent::SessionDestroy(info) => OwnedServiceEvent::SessionDestroy(info.clone()),
            ServiceEvent::AsyncConnResult(result) => {
                OwnedServiceEvent::AsyncConnResult(result.clone())
            }
            ServiceEvent::ProtoReport(report) => OwnedServiceEvent::ProtoReport(report.clone()),
            ServiceEvent::UnhandledPacket(packet) => {
                OwnedServiceEvent::UnhandledPacket(packet.to_owned_packet())
            }
        }
    }
}

impl fmt::Display for ServiceEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceEvent::Idle(idle) => write!(f, "idle({:?})", idle),
            ServiceEvent::SessionCreate(info) => write!(f, "{}", info),
            ServiceEvent::SessionDestroy(info) => write!(f, "{}", info),
            ServiceEvent::AsyncConnResult(result) => write!(f, "{}", result),
            ServiceEvent::ProtoReport(report) => write!(f, "{}", report),
            ServiceEvent::UnhandledPacket(packet) => write!(f, "{}", packet),
            other => f.write_str(other.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OwnedServiceEvent {
    Init,
    Destroy,
    Start,
    Stop,
    Update,
    Idle { idle: Duration },
    SessionCreate(SessionInfo),
    SessionDestroy(SessionDestroyInfo),
    AsyncConnResult(AsyncConnResult),
    ProtoReport(ProtoReport),
    UnhandledPacket(OwnedPacket),
}

impl OwnedServiceEvent {
    /// Session, report and packet events; everything but the service ticks
    /// and lifecycle hooks.
    pub fn is_session_event(&self) -> bool {
        matches!(
            self,
            OwnedServiceEvent::SessionCreate(_)
                | OwnedServiceEvent::SessionDestroy(_)
                | OwnedServiceEvent::AsyncConnResult(_)
                | OwnedServiceEvent::ProtoReport(_)
                | OwnedServiceEvent::UnhandledPacket(_)
        )
    }

    pub fn is_tick(&self) -> bool {
        matches!(self, OwnedServiceEvent::Update | OwnedServiceEvent::Idle { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::session::SessionId;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Tally {
        hooks: Vec<&'static str>,
    }

    impl Facade for Tally {
        fn on_idle(&mut self, _svc: &ServiceHandle, _idle: Duration) {
            self.hooks.push("idle");
        }

        fn on_unhandled_packet(&mut self, _svc: &ServiceHandle, packet: &Packet<'_>) {
            assert_eq!(packet.payload(), b"abc");
            self.hooks.push("unhandled_packet");
        }
    }

    #[test]
    fn deliver_routes_to_matching_hook() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let svc = ServiceHandle::new("test", tx);
        let mut tally = Tally::default();
        let payload = b"abc".to_vec();

        ServiceEvent::Idle(Duration::from_millis(5)).deliver(&mut tally, &svc);
        ServiceEvent::UnhandledPacket(Packet::new(SessionId::new(1), 0, &payload))
            .deliver(&mut tally, &svc);
        // default no-op
        ServiceEvent::Update.deliver(&mut tally, &svc);

        assert_eq!(tally.hooks, vec!["idle", "unhandled_packet"]);
    }

    #[test]
    fn owned_copy_serializes_with_kind_tag() {
        let info = SessionInfo::new(
            SessionId::new(3),
            -1,
            true,
            "127.0.0.1:7000".parse().unwrap(),
            "0.0.0.0:0".parse().unwrap(),
        );
        let owned = ServiceEvent::SessionCreate(&info).to_owned_event();

        let json = serde_json::to_value(&owned).unwrap();
        assert_eq!(json["kind"], "session_create");
        assert_eq!(json["session_id"], 3);
        assert!(owned.is_session_event());
        assert!(!owned.is_tick());
    }
}
