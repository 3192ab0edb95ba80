// foreground-host: drives the foreground registry and correlation table
// against an in-process platform event loop.

pub mod config;
pub mod host;
pub mod scenario;
