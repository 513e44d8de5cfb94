//! Runtime glue that wires configuration, fatal-error capture, telemetry and
//! signal-driven supervision.

pub mod config;
pub mod fatal;
pub mod supervisor;
pub mod telemetry;
