//! Service layer: the capability handle facades talk through, the
//! dispatcher that validates and delivers events, and the runtime that drives
//! both on a single tokio task.
//!
//! ```text
//! ┌──────────────┐ EngineEvent ┌──────────────────┐ hooks ┌──────────┐
//! │ Engine       │────────────▶│ Service          │──────▶│ Facades  │
//! │ (tcp, mock…) │◀────────────│ └ EventDispatcher│◀──────│          │
//! └──────────────┘EngineCommand└──────────────────┘ServiceHandle└──────┘
//! ```

pub mod dispatcher;
pub mod handle;
pub mod runtime;
pub mod types;

pub use dispatcher::EventDispatcher;
pub use handle::ServiceHandle;
pub use runtime::Service;
pub use types::{ConnectAttemptId, PacketHandler, ServiceCommand, ServicePhase};
