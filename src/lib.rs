pub mod api;
pub mod config;
pub mod engine;
pub mod init;
pub mod resolver;
pub mod server;
pub mod stats;
