//! Event facade for connection-oriented network services.
//!
//! An engine reports session lifecycle, connect results, protocol
//! diagnostics and packets; a [`service::Service`] validates their order and
//! hands them to every registered [`facade::Facade`] on a single task.

pub mod configuration;
pub mod error_handling;
pub mod events;
pub mod facade;
pub mod network;
pub mod service;
pub mod session_management;
