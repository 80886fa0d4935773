use std::time::Duration;

use log::{debug, error, info, trace, warn};

use super::Facade;
use crate::events::{AsyncConnResult, Packet, ProtoReport, ProtoReportLevel, SessionDestroyInfo};
use crate::service::handle::ServiceHandle;
use crate::session_management::session::SessionInfo;

/// Logs every hook through the `log` facade.
///
/// Session lifecycle goes to INFO, failed connects to WARN, protocol reports
/// at the level matching their severity, ticks to TRACE.
pub struct LoggingFacade {
    name: String,
}

impl LoggingFacade {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LoggingFacade {
    fn default() -> Self {
        Self::new("logging")
    }
}

impl Facade for LoggingFacade {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_init(&mut self, svc: &ServiceHandle) {
        debug!("[{}] {} initialized", svc.service_id(), self.name);
    }

    fn on_destroy(&mut self, svc: &ServiceHandle) {
        debug!("[{}] {} destroyed", svc.service_id(), self.name);
    }

    fn on_start(&mut self, svc: &ServiceHandle) {
        info!("[{}] service '{}' started", svc.service_id(), svc.name());
    }

    fn on_stop(&mut self, svc: &ServiceHandle) {
        info!("[{}] service '{}' stopped", svc.service_id(), svc.name());
    }

    fn on_update(&mut self, svc: &ServiceHandle) {
        trace!("[{}] update", svc.service_id());
    }

    fn on_idle(&mut self, svc: &ServiceHandle, idle: Duration) {
        trace!("[{}] idle for {:?}", svc.service_id(), idle);
    }

    fn on_session_create(&mut self, svc: &ServiceHandle, info: &SessionInfo) {
        info!("[{}] session created: {}", svc.service_id(), info);
    }

    fn on_session_destroy(&mut self, svc: &ServiceHandle, info: &SessionDestroyInfo) {
        info!("[{}] session destroyed: {}", svc.service_id(), info);
    }

    fn on_async_conn_result(&mut self, svc: &ServiceHandle, result: &AsyncConnResult) {
        if result.is_connected() {
            info!("[{}] {}", svc.service_id(), result);
        } else {
            warn!("[{}] {}", svc.service_id(), result);
        }
    }

    fn on_proto_report(&mut self, svc: &ServiceHandle, report: &ProtoReport) {
        match report.level() {
            ProtoReportLevel::Info => info!("[{}] {}", svc.service_id(), report),
            ProtoReportLevel::Warning => warn!("[{}] {}", svc.service_id(), report),
            ProtoReportLevel::Error => error!("[{}] {}", svc.service_id(), report),
        }
    }

    fn on_unhandled_packet(&mut self, svc: &ServiceHandle, packet: &Packet<'_>) {
        let preview = &packet.payload()[..std::cmp::min(packet.len(), 64)];
        debug!(
            "[{}] unhandled {}: {}{}",
            svc.service_id(),
            packet,
            String::from_utf8_lossy(preview),
            if packet.len() > 64 { " ..." } else { "" }
        );
    }
}
