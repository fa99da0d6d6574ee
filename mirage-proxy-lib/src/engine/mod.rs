//! The rewriting proxy engine: resolution, cross-origin gate, header and
//! content transforms around a relay round trip.

pub mod cors;
pub mod error;
pub mod headers;
pub mod orchestrator;
pub mod relay;
pub mod request;
pub mod resolver;
pub mod response;
pub mod transform;

pub use cors::{CorsGate, PolicyGate, ProbeGate};
pub use error::{EngineError, EngineResult};
pub use orchestrator::{Outcome, RewritingEngine};
pub use relay::{HyperRelayClient, RawResponse, RelayClient, RelayRequest};
pub use request::{InterceptedRequest, ResourceKind};
pub use response::{ResponseBody, RewrittenResponse, DEFAULT_STATUS};
