//! # Network Module
//!
//! The seam between a service and whatever moves bytes for it.
//!
//! An [`Engine`](types::Engine) receives [`EngineCommand`](types::EngineCommand)s
//! from the service task and reports session state changes back through an
//! [`EngineSink`](types::EngineSink). The service never touches sockets itself,
//! so tests can drive it with a scripted engine.
//!
//! [`TcpEngine`](tcp_engine::TcpEngine) is the bundled implementation. It
//! applies no framing: every chunk read from a socket becomes an opcode `0`
//! packet.
//!
//! ```text
//! ┌──────────────┐  EngineCommand  ┌────────────┐  accept/connect  ┌───────┐
//! │ Service task │────────────────▶│ TcpEngine  │◀────────────────▶│ Peers │
//! │              │◀────────────────│ (tasks)    │                  └───────┘
//! └──────────────┘ EngineEvent     └────────────┘
//! ```

pub mod tcp_engine;
pub mod types;

pub use tcp_engine::TcpEngine;
pub use types::{Engine, EngineCommand, EngineEvent, EngineSink};
