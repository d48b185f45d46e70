//! Logging setup.
//!
//! The engine logs through the `log` facade only. Binaries and tests call
//! [`init_logging`] once to install an `env_logger` backend.

mod init;

pub use init::{init_logging, LoggingConfig};
