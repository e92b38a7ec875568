//! Coordination primitives for the long-running process
//!
//! - Shutdown signalling shared by the tick loop and fill polling

pub mod shutdown;

pub use shutdown::{ShutdownHandle, ShutdownToken};
