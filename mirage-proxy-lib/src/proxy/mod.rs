pub mod assets;
pub mod intercept;
pub mod server;
pub mod synthetic_response;

pub use assets::serve_asset;
pub use intercept::intercepted_request;
pub use server::{run, serve, spawn_signal_handler};
