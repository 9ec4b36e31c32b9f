//! HTTP and WebSocket front-end for a running directory mirror.

pub mod config;
pub mod server;

pub use config::ServerConfig;
pub use server::Server;
