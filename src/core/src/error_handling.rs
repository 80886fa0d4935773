//! Error types shared by every subsystem of the crate.
//!
//! Facade hooks never return errors; these types cover configuration,
//! session bookkeeping, event validation, the engine seam and the service
//! command surface.

pub mod types;
