//! Session management core module.
//!
//! This module provides the session descriptor handed to facades and the
//! registry that assigns session identifiers and tracks where each one is in
//! its lifecycle.

use serde::{Deserialize, Serialize};

/// Submodule for the immutable session descriptor.
pub mod session;
/// Submodule for identifier allocation and lifecycle bookkeeping.
pub mod session_registry;

pub use session::{SessionId, SessionInfo};
pub use session_registry::{SessionRegistry, SharedRegistry};

/// Lifecycle state of an identifier held by the [`SessionRegistry`].
///
/// Variants:
/// - `Reserved`: the engine allocated the id but creation was not delivered yet.
/// - `Live`: the creation record was delivered.
/// - `Retiring`: destruction dispatch is in progress; the id cannot be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Reserved,
    Live,
    Retiring,
}
