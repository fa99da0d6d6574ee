mod loader;
mod reloader;
mod types;

pub use loader::{apply_port_override, load_from_path, parse_config, validate_config};
pub use reloader::{watch_config, ConfigStore};
pub use types::{
    Config, CorsConfig, DebugFlags, FeatureFlags, LoggingConfig, ProxyConfig, SharedModule,
    TelemetryConfig, TimeoutConfig, DEFAULT_PORT,
};
