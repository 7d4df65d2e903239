pub mod config;
pub mod error;
pub mod providers;
pub mod proxy;
pub mod server;
pub mod translate;

pub use config::BridgeConfig;
pub use error::{ProxyError, Result};
pub use server::{build_router, AppState};
