//! The facade contract.
//!
//! A [`Facade`] is the application's view of one service. The engine calls its
//! hooks on the service's single dispatch path, so an implementation needs no
//! locking to stay consistent across hooks of the same service. Hooks must
//! return promptly; long work belongs on another task (see
//! [`forwarding::ForwardingFacade`]).
//!
//! Every hook defaults to a no-op. Per facade the order is always
//! `on_init`, `on_start`, session/report/tick hooks, `on_stop`, `on_destroy`.
//! `on_destroy` also runs when the service failed to start after `on_init`.
//!
//! Hooks report nothing back. A panic inside a hook is caught and logged by
//! the dispatcher; other facades and sessions are unaffected.

use std::time::Duration;

use crate::events::{AsyncConnResult, Packet, ProtoReport, SessionDestroyInfo};
use crate::service::handle::ServiceHandle;
use crate::session_management::session::SessionInfo;

pub mod forwarding;
pub mod journal;
pub mod logging;

pub use forwarding::ForwardingFacade;
pub use journal::JournalFacade;
pub use logging::LoggingFacade;

pub trait Facade: Send {
    /// Name used in diagnostics and by `unregister_facade`.
    fn name(&self) -> &str {
        "facade"
    }

    /// Called once when the facade is attached, before `on_start`.
    fn on_init(&mut self, _svc: &ServiceHandle) {}

    /// Called once when the facade is detached; always the last hook.
    fn on_destroy(&mut self, _svc: &ServiceHandle) {}

    /// The service is running. Precedes every session and report hook.
    fn on_start(&mut self, _svc: &ServiceHandle) {}

    /// The service stopped. Only `on_destroy` follows.
    fn on_stop(&mut self, _svc: &ServiceHandle) {}

    /// Once per processing cycle.
    fn on_update(&mut self, _svc: &ServiceHandle) {}

    /// The cycle had no pending work; `idle` is the rest of the cycle.
    fn on_idle(&mut self, _svc: &ServiceHandle, _idle: Duration) {}

    fn on_session_create(&mut self, _svc: &ServiceHandle, _info: &SessionInfo) {}

    fn on_session_destroy(&mut self, _svc: &ServiceHandle, _info: &SessionDestroyInfo) {}

    fn on_async_conn_result(&mut self, _svc: &ServiceHandle, _result: &AsyncConnResult) {}

    /// Diagnostic from the protocol stack. Observational only.
    fn on_proto_report(&mut self, _svc: &ServiceHandle, _report: &ProtoReport) {}

    /// A packet no opcode handler claimed. The borrow ends with the call;
    /// copy with [`Packet::to_owned_packet`] to keep it.
    fn on_unhandled_packet(&mut self, _svc: &ServiceHandle, _packet: &Packet<'_>) {}
}
