//! Datastore Telemetry - logging setup for the scoped data store.
//!
//! # Example
//!
//! ```rust,no_run
//! use datastore_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), datastore_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("datastore_storage=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{FileRotation, LogConfig, LogFormat, LogTarget, setup_logging};
