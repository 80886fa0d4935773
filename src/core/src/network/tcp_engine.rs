//! Raw TCP engine.
//!
//! Every bound socket is reported as a listen session, every accepted or
//! connected stream as a regular session. Bytes are moved as they arrive: no
//! framing, every read becomes one opcode `0` packet.
//!
//! Each socket is served by its own task. Writes reach a task through an
//! unbounded channel kept in a shared map, so `execute` never waits on I/O.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

use super::types::{Engine, EngineCommand, EngineEvent, EngineSink};
use crate::error_handling::types::NetworkError;
use crate::events::{
    errno, AsyncConnResult, OwnedPacket, ProtoLayer, ProtoReport, ProtoReportLevel,
    SessionDestroyInfo,
};
use crate::service::types::ConnectAttemptId;
use crate::session_management::session::{SessionId, SessionInfo};

pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opcode carried by every packet this engine produces.
pub const RAW_OPCODE: u32 = 0;

const PREVIEW_LEN: usize = 64;

#[derive(Debug)]
enum SocketCommand {
    Data(Vec<u8>),
    Close(String),
}

type Connections = Arc<Mutex<HashMap<SessionId, UnboundedSender<SocketCommand>>>>;

/// Why a socket task stopped.
#[derive(Debug)]
enum Closure {
    Peer,
    Local(String),
    Io(io::Error),
    Shutdown,
}

#[derive(Clone)]
struct EngineContext {
    sink: EngineSink,
    connections: Connections,
    shutdown: watch::Receiver<bool>,
    read_buffer_size: usize,
    connect_timeout: Duration,
}

impl EngineContext {
    fn register(&self, session_id: SessionId) -> UnboundedReceiver<SocketCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.connections.lock() {
            Ok(mut map) => {
                map.insert(session_id, tx);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(session_id, tx);
            }
        }
        rx
    }

    fn unregister(&self, session_id: SessionId) {
        match self.connections.lock() {
            Ok(mut map) => {
                map.remove(&session_id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&session_id);
            }
        }
    }

    /// Undoes `register` for a session whose creation was never reported,
    /// handing its reserved id back.
    fn abandon(&self, session_id: SessionId) {
        self.unregister(session_id);
        self.release_id(session_id);
    }

    fn release_id(&self, session_id: SessionId) {
        if let Err(e) = self.sink.cancel_session_id(session_id) {
            warn!("[{}] reserved id not released: {}", session_id, e);
        }
    }
}

pub struct TcpEngine {
    unstarted: Vec<std::net::TcpListener>,
    local_addrs: Vec<SocketAddr>,
    read_buffer_size: usize,
    connect_timeout: Duration,
    connections: Connections,
    shutdown: watch::Sender<bool>,
    context: Option<EngineContext>,
}

impl TcpEngine {
    /// An engine with no listening socket; it can still connect out and bind
    /// later through `EngineCommand::Listen`.
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            unstarted: Vec::new(),
            local_addrs: Vec::new(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connections: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
            context: None,
        }
    }

    /// Binds every address right away, so the bound ports are known before
    /// the service starts. Accepting begins with `start`.
    pub fn bind(addrs: &[SocketAddr]) -> Result<Self, NetworkError> {
        let mut engine = Self::new();
        for addr in addrs {
            let listener = bind_std(*addr)?;
            engine.local_addrs.push(local_addr_of(&listener, *addr));
            engine.unstarted.push(listener);
        }
        Ok(engine)
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Addresses bound so far, with the port the OS picked for port `0`.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    pub fn connection_count(&self) -> usize {
        match self.connections.lock() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn context(&self) -> Result<&EngineContext, NetworkError> {
        self.context.as_ref().ok_or(NetworkError::NotStarted)
    }

    fn spawn_listener(&self, listener: std::net::TcpListener) -> Result<(), NetworkError> {
        let ctx = self.context()?.clone();
        let listener = TcpListener::from_std(listener).map_err(NetworkError::SockError)?;
        tokio::spawn(accept_loop(listener, ctx));
        Ok(())
    }

    fn socket_command(
        &self,
        session_id: SessionId,
        command: SocketCommand,
    ) -> Result<(), NetworkError> {
        let map = self
            .connections
            .lock()
            .map_err(|_| NetworkError::ChannelFailed)?;
        let tx = map
            .get(&session_id)
            .ok_or(NetworkError::UnknownSession(session_id))?;
        tx.send(command)
            .map_err(|_| NetworkError::UnknownSession(session_id))
    }
}

impl Default for TcpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for TcpEngine {
    fn start(&mut self, sink: EngineSink) -> Result<(), NetworkError> {
        self.context = Some(EngineContext {
            sink,
            connections: Arc::clone(&self.connections),
            shutdown: self.shutdown.subscribe(),
            read_buffer_size: self.read_buffer_size,
            connect_timeout: self.connect_timeout,
        });

        for listener in std::mem::take(&mut self.unstarted) {
            self.spawn_listener(listener)?;
        }
        info!("Raw TCP engine started on {:?}", self.local_addrs);
        Ok(())
    }

    fn execute(&mut self, command: EngineCommand) -> Result<(), NetworkError> {
        match command {
            EngineCommand::Listen(addr) => {
                self.context()?;
                let listener = bind_std(addr)?;
                self.local_addrs.push(local_addr_of(&listener, addr));
                self.spawn_listener(listener)
            }
            EngineCommand::Connect { attempt, addr } => {
                let ctx = self.context()?.clone();
                tokio::spawn(connect_task(attempt, addr, ctx));
                Ok(())
            }
            EngineCommand::Send { session_id, data } => {
                self.socket_command(session_id, SocketCommand::Data(data))
            }
            EngineCommand::Close { session_id, reason } => {
                self.socket_command(session_id, SocketCommand::Close(reason))
            }
            EngineCommand::Shutdown => {
                debug!("Raw TCP engine shutting down");
                self.shutdown.send_replace(true);
                match self.connections.lock() {
                    Ok(mut map) => map.clear(),
                    Err(poisoned) => poisoned.into_inner().clear(),
                }
                Ok(())
            }
        }
    }
}

fn bind_std(addr: SocketAddr) -> Result<std::net::TcpListener, NetworkError> {
    let listener = std::net::TcpListener::bind(addr).map_err(|e| {
        error!("[!] Bind error on {}: {:?}", addr, e);
        NetworkError::BindError(e)
    })?;
    listener
        .set_nonblocking(true)
        .map_err(NetworkError::SockError)?;
    Ok(listener)
}

fn local_addr_of(listener: &std::net::TcpListener, requested: SocketAddr) -> SocketAddr {
    listener.local_addr().unwrap_or(requested)
}

fn unspecified() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}

#[cfg(unix)]
fn raw_handle<S: std::os::unix::io::AsRawFd>(socket: &S) -> i64 {
    i64::from(socket.as_raw_fd())
}

#[cfg(not(unix))]
fn raw_handle<S>(_socket: &S) -> i64 {
    -1
}

/// Resolves once the engine was told to shut down, or the engine is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        let stopping = *rx.borrow_and_update();
        if stopping || rx.changed().await.is_err() {
            return;
        }
    }
}

fn destroy_record(info: SessionInfo, closure: &Closure) -> Option<SessionDestroyInfo> {
    let record = match closure {
        Closure::Peer => SessionDestroyInfo::new(
            info,
            false,
            "closed by peer",
            errno::SUCCESS,
            errno::SUB_CLOSED_BY_PEER,
        ),
        Closure::Local(reason) => SessionDestroyInfo::new(
            info,
            true,
            reason.as_str(),
            errno::SUCCESS,
            errno::SUB_CLOSED_BY_SERVICE,
        ),
        Closure::Io(e) => SessionDestroyInfo::new(
            info,
            false,
            e.to_string(),
            e.raw_os_error().unwrap_or(errno::UNKNOWN_OS_ERROR),
            errno::SUB_IO_ERROR,
        ),
        Closure::Shutdown => return None,
    };
    Some(record)
}

/// Reports how a socket ended. Transport errors get a report first.
async fn finish(ctx: &EngineContext, info: SessionInfo, closure: Closure) {
    let session_id = info.session_id();
    ctx.unregister(session_id);

    if let Closure::Io(e) = &closure {
        let report = ProtoReport::new(
            session_id,
            ProtoLayer::Transport,
            ProtoReportLevel::Error,
            e.to_string(),
        );
        if ctx.sink.emit(EngineEvent::ProtoReport(report)).await.is_err() {
            return;
        }
    }

    if let Some(record) = destroy_record(info, &closure) {
        debug!("[{}] session closed: {}", session_id, record.reason());
        if let Err(e) = ctx.sink.emit(EngineEvent::SessionDestroyed(record)).await {
            debug!("[{}] destruction record not delivered: {}", session_id, e);
        }
    }
}

async fn accept_loop(listener: TcpListener, ctx: EngineContext) {
    let local = match listener.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("[!] Listener has no local address: {:?}", e);
            return;
        }
    };
    let session_id = match ctx.sink.allocate_session_id() {
        Ok(id) => id,
        Err(e) => {
            error!("[!] No session id for listener {}: {}", local, e);
            return;
        }
    };
    let info = SessionInfo::new(session_id, raw_handle(&listener), true, local, unspecified());
    let mut commands = ctx.register(session_id);

    if ctx
        .sink
        .emit(EngineEvent::SessionCreated(info.clone()))
        .await
        .is_err()
    {
        ctx.abandon(session_id);
        return;
    }
    info!("[{}] listening on {}", session_id, local);

    let mut shutdown = ctx.shutdown.clone();
    let closure = loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break Closure::Shutdown,
            command = commands.recv() => match command {
                Some(SocketCommand::Close(reason)) => break Closure::Local(reason),
                Some(SocketCommand::Data(data)) => {
                    warn!("[{}] dropping {} bytes sent to a listen session", session_id, data.len());
                }
                None => break Closure::Shutdown,
            },
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => accept_one(stream, peer, &ctx),
                Err(e) => {
                    warn!("[{}] accept failed: {:?}", session_id, e);
                    let report = ProtoReport::new(
                        session_id,
                        ProtoLayer::Transport,
                        ProtoReportLevel::Warning,
                        format!("accept failed: {}", e),
                    );
                    if ctx.sink.emit(EngineEvent::ProtoReport(report)).await.is_err() {
                        break Closure::Shutdown;
                    }
                }
            },
        }
    };

    finish(&ctx, info, closure).await;
}

fn accept_one(stream: TcpStream, peer: SocketAddr, ctx: &EngineContext) {
    let session_id = match ctx.sink.allocate_session_id() {
        Ok(id) => id,
        Err(e) => {
            warn!("[!] Refusing connection from {}: {}", peer, e);
            return;
        }
    };
    let local = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("[{}] accepted socket has no local address: {:?}", session_id, e);
            ctx.release_id(session_id);
            return;
        }
    };

    let info = SessionInfo::new(session_id, raw_handle(&stream), false, local, peer);
    let commands = ctx.register(session_id);
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if ctx
            .sink
            .emit(EngineEvent::SessionCreated(info.clone()))
            .await
            .is_err()
        {
            ctx.abandon(session_id);
            return;
        }
        info!("[{}] accepted {}", session_id, peer);
        run_connection(stream, info, commands, ctx).await;
    });
}

async fn connect_task(attempt: ConnectAttemptId, addr: SocketAddr, ctx: EngineContext) {
    let mut shutdown = ctx.shutdown.clone();
    let outcome = tokio::select! {
        // the service resolves attempts left open at shutdown
        _ = shutdown_requested(&mut shutdown) => return,
        outcome = tokio::time::timeout(ctx.connect_timeout, TcpStream::connect(addr)) => outcome,
    };

    let stream = match outcome {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!("Connect {} to {} failed: {}", attempt, addr, e);
            fail_attempt(&ctx, attempt, addr, e.to_string()).await;
            return;
        }
        Err(_) => {
            debug!("Connect {} to {} timed out", attempt, addr);
            fail_attempt(&ctx, attempt, addr, "connect timed out".to_string()).await;
            return;
        }
    };

    let session_id = match ctx.sink.allocate_session_id() {
        Ok(id) => id,
        Err(e) => {
            fail_attempt(&ctx, attempt, addr, e.to_string()).await;
            return;
        }
    };
    let local = match stream.local_addr() {
        Ok(local) => local,
        Err(e) => {
            ctx.release_id(session_id);
            fail_attempt(&ctx, attempt, addr, e.to_string()).await;
            return;
        }
    };

    let info = SessionInfo::new(session_id, raw_handle(&stream), false, local, addr);
    let commands = ctx.register(session_id);
    let event = EngineEvent::AsyncConnResult {
        attempt,
        result: AsyncConnResult::succeeded(addr),
        session: Some(info.clone()),
    };
    if ctx.sink.emit(event).await.is_err() {
        ctx.abandon(session_id);
        return;
    }
    info!("[{}] connected to {}", session_id, addr);
    run_connection(stream, info, commands, ctx).await;
}

async fn fail_attempt(
    ctx: &EngineContext,
    attempt: ConnectAttemptId,
    addr: SocketAddr,
    reason: String,
) {
    let event = EngineEvent::AsyncConnResult {
        attempt,
        result: AsyncConnResult::failed(reason, addr),
        session: None,
    };
    if let Err(e) = ctx.sink.emit(event).await {
        warn!("[!] Result of connect {} to {} not delivered: {}", attempt, addr, e);
    }
}

async fn run_connection(
    stream: TcpStream,
    info: SessionInfo,
    mut commands: UnboundedReceiver<SocketCommand>,
    ctx: EngineContext,
) {
    let session_id = info.session_id();
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; ctx.read_buffer_size];
    let mut shutdown = ctx.shutdown.clone();

    trace!("[{}] connection task started", session_id);

    let closure = loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break Closure::Shutdown,
            command = commands.recv() => match command {
                Some(SocketCommand::Data(data)) => {
                    if let Err(e) = writer.write_all(&data).await {
                        break Closure::Io(e);
                    }
                    trace!("[{}] wrote {} bytes", session_id, data.len());
                }
                Some(SocketCommand::Close(reason)) => {
                    let _ = writer.shutdown().await;
                    break Closure::Local(reason);
                }
                None => break Closure::Shutdown,
            },
            read = reader.read(&mut buf) => match read {
                Ok(0) => break Closure::Peer,
                Ok(n) => {
                    let preview = &buf[..n.min(PREVIEW_LEN)];
                    trace!(
                        "[{}] read {} bytes: {}{}",
                        session_id,
                        n,
                        String::from_utf8_lossy(preview),
                        if n > PREVIEW_LEN { " ..." } else { "" }
                    );
                    let packet = OwnedPacket::new(session_id, RAW_OPCODE, buf[..n].to_vec());
                    if ctx.sink.emit(EngineEvent::Packet(packet)).await.is_err() {
                        break Closure::Shutdown;
                    }
                }
                Err(e) => break Closure::Io(e),
            },
        }
    };

    trace!("[{}] connection task ending: {:?}", session_id, closure);
    finish(&ctx, info, closure).await;
}
