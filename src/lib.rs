pub mod config;
pub mod control;
pub mod lifecycle;
pub mod probe;
pub mod protocol;
pub mod server;
pub mod session;
pub mod status;
pub mod tracing;
