#![forbid(unsafe_code)]

pub mod config;
pub mod engine;
pub mod error;
pub mod proxy;
pub mod relay;
pub mod telemetry;
pub mod tunnel;

pub use config::{load_from_path, watch_config, Config, ConfigStore, ProxyConfig};
pub use engine::{InterceptedRequest, Outcome, ResourceKind, RewritingEngine, RewrittenResponse};
pub use error::{ProxyError, Result};
pub use proxy::{run, serve};
pub use tunnel::{TunnelSession, TunnelState};
