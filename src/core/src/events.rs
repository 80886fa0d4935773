//! Lifecycle event records delivered to facades.
//!
//! Every record is built once by the engine and never mutated afterwards, so
//! it can be read from logging code while application logic consumes it.

pub mod packet;
pub mod service_event;
pub mod types;

pub use packet::{OwnedPacket, Packet};
pub use service_event::{OwnedServiceEvent, ServiceEvent};
pub use types::{AsyncConnResult, ProtoLayer, ProtoReport, ProtoReportLevel, SessionDestroyInfo};

/// Reason carried by records the service synthesizes while stopping.
pub const SERVICE_STOPPED_REASON: &str = "service stopped";

/// Error codes carried by [`SessionDestroyInfo`].
///
/// Facades treat them as opaque. The primary code is `SUCCESS` for clean
/// closes and an OS error code for I/O failures; the sub-code tells apart
/// causes that share a primary code.
pub mod errno {
    pub const SUCCESS: i32 = 0;
    /// Primary code used when an I/O error carries no OS error number.
    pub const UNKNOWN_OS_ERROR: i32 = -1;

    pub const SUB_NONE: i32 = 0;
    pub const SUB_CLOSED_BY_PEER: i32 = 1;
    pub const SUB_CLOSED_BY_SERVICE: i32 = 2;
    pub const SUB_SERVICE_STOPPED: i32 = 3;
    pub const SUB_IO_ERROR: i32 = 4;
}
