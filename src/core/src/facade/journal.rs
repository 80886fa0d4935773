//! JSON-lines event journal.
//!
//! One line per session, report or lifecycle event:
//!
//! ```text
//! {"timestamp":"2026-01-01T00:00:00Z","service_id":"…","event":{"kind":"session_create",…}}
//! ```
//!
//! Ticks are not journaled. Writes are buffered and flushed on every update
//! tick and on stop/destroy, so a hook never waits on more than a buffered
//! write.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::Serialize;
use uuid::Uuid;

use super::Facade;
use crate::error_handling::types::StorageError;
use crate::events::{
    AsyncConnResult, OwnedServiceEvent, Packet, ProtoReport, ServiceEvent, SessionDestroyInfo,
};
use crate::service::handle::ServiceHandle;
use crate::session_management::session::SessionInfo;

#[derive(Serialize)]
struct JournalEntry<'a> {
    timestamp: DateTime<Utc>,
    service_id: Uuid,
    event: &'a OwnedServiceEvent,
}

pub struct JournalFacade {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
    failed: bool,
}

impl JournalFacade {
    /// Opens `path` for appending, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                error!("Failed to open journal {}: {}", path.display(), e);
                StorageError::OpenFailed(e)
            })?;
        info!("Journaling events to {}", path.display());

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
            failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn append(&mut self, svc: &ServiceHandle, event: ServiceEvent<'_>) {
        if self.failed {
            return;
        }
        let owned = event.to_owned_event();
        let entry = JournalEntry {
            timestamp: Utc::now(),
            service_id: svc.service_id(),
            event: &owned,
        };
        if let Err(e) = self.write_entry(&entry) {
            // keep the service running, stop journaling
            error!("[{}] journal {} disabled: {}", svc.service_id(), self.path.display(), e);
            self.failed = true;
        }
    }

    fn write_entry(&mut self, entry: &JournalEntry<'_>) -> Result<(), StorageError> {
        serde_json::to_writer(&mut self.writer, entry)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self, svc: &ServiceHandle) {
        if self.failed {
            return;
        }
        if let Err(e) = self.writer.flush() {
            error!("[{}] journal flush failed: {}", svc.service_id(), e);
            self.failed = true;
        }
    }
}

impl Facade for JournalFacade {
    fn name(&self) -> &str {
        "journal"
    }

    fn on_init(&mut self, svc: &ServiceHandle) {
        self.append(svc, ServiceEvent::Init);
    }

    fn on_destroy(&mut self, svc: &ServiceHandle) {
        self.append(svc, ServiceEvent::Destroy);
        self.flush(svc);
        debug!("[{}] journal closed after {} entries", svc.service_id(), self.written);
    }

    fn on_start(&mut self, svc: &ServiceHandle) {
        self.append(svc, ServiceEvent::Start);
    }

    fn on_stop(&mut self, svc: &ServiceHandle) {
        self.append(svc, ServiceEvent::Stop);
        self.flush(svc);
    }

    fn on_update(&mut self, svc: &ServiceHandle) {
        self.flush(svc);
    }

    fn on_session_create(&mut self, svc: &ServiceHandle, info: &SessionInfo) {
        self.append(svc, ServiceEvent::SessionCreate(info));
    }

    fn on_session_destroy(&mut self, svc: &ServiceHandle, info: &SessionDestroyInfo) {
        self.append(svc, ServiceEvent::SessionDestroy(info));
    }

    fn on_async_conn_result(&mut self, svc: &ServiceHandle, result: &AsyncConnResult) {
        self.append(svc, ServiceEvent::AsyncConnResult(result));
    }

    fn on_proto_report(&mut self, svc: &ServiceHandle, report: &ProtoReport) {
        self.append(svc, ServiceEvent::ProtoReport(report));
    }

    fn on_unhandled_packet(&mut self, svc: &ServiceHandle, packet: &Packet<'_>) {
        self.append(svc, ServiceEvent::UnhandledPacket(*packet));
    }
}
