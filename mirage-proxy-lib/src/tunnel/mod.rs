//! Bidirectional WebSocket tunnel between a client and a real origin.

pub mod error;
pub mod session;
pub mod upgrade;

pub use error::{TunnelError, TunnelResult};
pub use session::{CloseCause, TunnelSession, TunnelState};
pub use upgrade::{
    connect_origin, handle_upgrade, switching_protocols, target_from_query, validate_upgrade,
};
