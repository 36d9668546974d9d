//! Adapter for an external browser automation bridge spoken to over HTTP.

pub mod driver;
pub mod sse;

pub use driver::{BridgeClient, BridgeDriver, BridgeLauncher};
