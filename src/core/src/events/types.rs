//! Immutable records for session destruction, async-connect results and
//! protocol-stack reports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::session_management::session::{SessionId, SessionInfo};

/// Concludes one session. Exactly one is delivered per session id, after
/// every other event for that id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDestroyInfo {
    session: SessionInfo,
    from_service: bool,
    reason: String,
    err_no: i32,
    sub_err_no: i32,
}

impl SessionDestroyInfo {
    pub fn new(
        session: SessionInfo,
        from_service: bool,
        reason: impl Into<String>,
        err_no: i32,
        sub_err_no: i32,
    ) -> Self {
        Self {
            session,
            from_service,
            reason: reason.into(),
            err_no,
            sub_err_no,
        }
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub fn session_id(&self) -> SessionId {
        self.session.session_id()
    }

    /// `true` when the local service initiated the destruction, `false` for
    /// peer or network initiated closes.
    pub fn is_destroyed_from_service(&self) -> bool {
        self.from_service
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn err_no(&self) -> i32 {
        self.err_no
    }

    pub fn sub_err_no(&self) -> i32 {
        self.sub_err_no
    }
}

impl fmt::Display for SessionDestroyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionDestroyInfo[session_id: {}, from_svc: {}, err_no: {}, sub_err_no: {}, session: {}, reason: {}]",
            self.session.session_id(),
            self.from_service,
            self.err_no,
            self.sub_err_no,
            self.session,
            self.reason
        )
    }
}

/// Outcome of one async-connect attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncConnResult {
    connected: bool,
    reason: String,
    remote_endpoint: SocketAddr,
}

impl AsyncConnResult {
    pub fn new(connected: bool, reason: impl Into<String>, remote_endpoint: SocketAddr) -> Self {
        Self {
            connected,
            reason: reason.into(),
            remote_endpoint,
        }
    }

    pub fn succeeded(remote_endpoint: SocketAddr) -> Self {
        Self::new(true, "", remote_endpoint)
    }

    pub fn failed(reason: impl Into<String>, remote_endpoint: SocketAddr) -> Self {
        Self::new(false, reason, remote_endpoint)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn remote_endpoint(&self) -> SocketAddr {
        self.remote_endpoint
    }

    pub fn remote_host(&self) -> IpAddr {
        self.remote_endpoint.ip()
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_endpoint.port()
    }
}

impl fmt::Display for AsyncConnResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AsyncConnResult[connected: {}, remote: {}, reason: {}]",
            self.connected, self.remote_endpoint, self.reason
        )
    }
}

/// Protocol-stack layer a report comes from, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtoLayer {
    Transport,
    Compress,
    Codec,
    Application,
}

impl fmt::Display for ProtoLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtoLayer::Transport => "transport",
            ProtoLayer::Compress => "compress",
            ProtoLayer::Codec => "codec",
            ProtoLayer::Application => "application",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtoReportLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for ProtoReportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtoReportLevel::Info => "info",
            ProtoReportLevel::Warning => "warning",
            ProtoReportLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// Out-of-band diagnostic from the protocol pipeline. Observational only: a
/// report never moves a session through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtoReport {
    session_id: SessionId,
    layer: ProtoLayer,
    level: ProtoReportLevel,
    report: String,
}

impl ProtoReport {
    pub fn new(
        session_id: SessionId,
        layer: ProtoLayer,
        level: ProtoReportLevel,
        report: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            layer,
            level,
            report: report.into(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn layer(&self) -> ProtoLayer {
        self.layer
    }

    pub fn level(&self) -> ProtoReportLevel {
        self.level
    }

    pub fn report(&self) -> &str {
        &self.report
    }
}

impl fmt::Display for ProtoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProtoReport[session_id: {}, layer: {}, level: {}, report: {}]",
            self.session_id, self.layer, self.level, self.report
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::errno;

    fn session(id: u32) -> SessionInfo {
        SessionInfo::new(
            SessionId::new(id),
            3,
            false,
            "10.0.0.1:4000".parse().unwrap(),
            "10.0.0.2:5000".parse().unwrap(),
        )
    }

    #[test]
    fn destroy_info_keeps_cause_verbatim() {
        let info = SessionDestroyInfo::new(session(5), false, "peer reset", 10054, 0);

        assert!(!info.is_destroyed_from_service());
        assert_eq!(info.reason(), "peer reset");
        assert_eq!(info.err_no(), 10054);
        assert_eq!(info.sub_err_no(), errno::SUB_NONE);
        assert_eq!(info.session_id(), SessionId::new(5));

        let text = info.to_string();
        assert!(text.contains("session_id: 5"));
        assert!(text.contains("from_svc: false"));
        assert!(text.contains("peer reset"));
    }

    #[test]
    fn sub_error_disambiguates_shared_primary_code() {
        let clean = SessionDestroyInfo::new(session(1), true, "closed", errno::SUCCESS, errno::SUB_NONE);
        let violation = SessionDestroyInfo::new(
            session(1),
            true,
            "closed: protocol violation",
            errno::SUCCESS,
            errno::SUB_IO_ERROR,
        );

        assert_eq!(clean.err_no(), violation.err_no());
        assert_ne!(clean.sub_err_no(), violation.sub_err_no());
    }

    #[test]
    fn refused_connect_result() {
        let result = AsyncConnResult::failed("connection refused", "203.0.113.9:443".parse().unwrap());

        assert!(!result.is_connected());
        assert_eq!(result.reason(), "connection refused");
        assert_eq!(result.remote_port(), 443);
        assert_eq!(result.remote_host().to_string(), "203.0.113.9");
        assert!(result.to_string().starts_with("AsyncConnResult[connected: false"));
    }

    #[test]
    fn layers_and_levels_are_ordered() {
        assert!(ProtoLayer::Transport < ProtoLayer::Compress);
        assert!(ProtoLayer::Compress < ProtoLayer::Codec);
        assert!(ProtoLayer::Codec < ProtoLayer::Application);
        assert!(ProtoReportLevel::Info < ProtoReportLevel::Warning);
        assert!(ProtoReportLevel::Warning < ProtoReportLevel::Error);
    }

    #[test]
    fn report_rendering() {
        let report = ProtoReport::new(
            SessionId::new(4),
            ProtoLayer::Codec,
            ProtoReportLevel::Warning,
            "partial frame",
        );

        assert_eq!(
            report.to_string(),
            "ProtoReport[session_id: 4, layer: codec, level: warning, report: partial frame]"
        );
    }
}
