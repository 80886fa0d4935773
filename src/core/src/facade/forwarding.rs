use std::time::Duration;

use log::warn;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::Facade;
use crate::events::{
    AsyncConnResult, OwnedServiceEvent, Packet, ProtoReport, ServiceEvent, SessionDestroyInfo,
};
use crate::service::handle::ServiceHandle;
use crate::session_management::session::SessionInfo;

/// Copies every hook invocation into an unbounded channel.
///
/// Lets an application move slow work off the dispatch path: the hook only
/// clones the record and enqueues it, a separate task does the rest.
/// Update/Idle ticks are skipped unless `with_ticks` is set.
pub struct ForwardingFacade {
    name: String,
    tx: UnboundedSender<OwnedServiceEvent>,
    forward_ticks: bool,
    closed: bool,
}

impl ForwardingFacade {
    pub fn new(name: impl Into<String>) -> (Self, UnboundedReceiver<OwnedServiceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let facade = Self {
            name: name.into(),
            tx,
            forward_ticks: false,
            closed: false,
        };
        (facade, rx)
    }

    pub fn with_ticks(mut self) -> Self {
        self.forward_ticks = true;
        self
    }

    fn forward(&mut self, event: ServiceEvent<'_>) {
        if self.closed {
            return;
        }
        if self.tx.send(event.to_owned_event()).is_err() {
            warn!("Forwarding facade '{}' lost its receiver", self.name);
            self.closed = true;
        }
    }
}

impl Facade for ForwardingFacade {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_init(&mut self, _svc: &ServiceHandle) {
        self.forward(ServiceEvent::Init);
    }

    fn on_destroy(&mut self, _svc: &ServiceHandle) {
        self.forward(ServiceEvent::Destroy);
    }

    fn on_start(&mut self, _svc: &ServiceHandle) {
        self.forward(ServiceEvent::Start);
    }

    fn on_stop(&mut self, _svc: &ServiceHandle) {
        self.forward(ServiceEvent::Stop);
    }

    fn on_update(&mut self, _svc: &ServiceHandle) {
        if self.forward_ticks {
            self.forward(ServiceEvent::Update);
        }
    }

    fn on_idle(&mut self, _svc: &ServiceHandle, idle: Duration) {
        if self.forward_ticks {
            self.forward(ServiceEvent::Idle(idle));
        }
    }

    fn on_session_create(&mut self, _svc: &ServiceHandle, info: &SessionInfo) {
        self.forward(ServiceEvent::SessionCreate(info));
    }

    fn on_session_destroy(&mut self, _svc: &ServiceHandle, info: &SessionDestroyInfo) {
        self.forward(ServiceEvent::SessionDestroy(info));
    }

    fn on_async_conn_result(&mut self, _svc: &ServiceHandle, result: &AsyncConnResult) {
        self.forward(ServiceEvent::AsyncConnResult(result));
    }

    fn on_proto_report(&mut self, _svc: &ServiceHandle, report: &ProtoReport) {
        self.forward(ServiceEvent::ProtoReport(report));
    }

    fn on_unhandled_packet(&mut self, _svc: &ServiceHandle, packet: &Packet<'_>) {
        self.forward(ServiceEvent::UnhandledPacket(*packet));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_opt_in() {
        let (svc_tx, _svc_rx) = mpsc::unbounded_channel();
        let svc = ServiceHandle::new("fwd", svc_tx);

        let (mut quiet, mut quiet_rx) = ForwardingFacade::new("quiet");
        quiet.on_update(&svc);
        quiet.on_start(&svc);
        assert_eq!(quiet_rx.try_recv().unwrap(), OwnedServiceEvent::Start);
        assert!(quiet_rx.try_recv().is_err());

        let (noisy, mut noisy_rx) = ForwardingFacade::new("noisy");
        let mut noisy = noisy.with_ticks();
        noisy.on_idle(&svc, Duration::from_millis(3));
        assert_eq!(
            noisy_rx.try_recv().unwrap(),
            OwnedServiceEvent::Idle {
                idle: Duration::from_millis(3)
            }
        );
    }

    #[test]
    fn dropped_receiver_disables_forwarding() {
        let (svc_tx, _svc_rx) = mpsc::unbounded_channel();
        let svc = ServiceHandle::new("fwd", svc_tx);
        let (mut facade, rx) = ForwardingFacade::new("gone");
        drop(rx);

        facade.on_start(&svc);
        assert!(facade.closed);
        facade.on_stop(&svc);
    }
}
