//! The fetch relay endpoint the engine talks to.

pub mod handler;

pub use handler::{inbound_headers, outbound_headers, RelayBackend, RelayError};
