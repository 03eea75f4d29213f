//! Telemetry for amtwsman.
//!
//! All library code logs through `tracing` macros with structured fields
//! (`host`, `status`, `tag`, ...). Binaries install a subscriber with
//! [`init_logging`] or a configured [`LoggingBuilder`].
//!
//! ```rust,ignore
//! use amtwsman::telemetry::{init_logging, LogFormat};
//!
//! init_logging(2, LogFormat::Json)?;
//! tracing::info!(host = %host, "connecting");
//! ```

pub mod logging;

pub use logging::{level_for_verbosity, LogFormat, LoggingBuilder};

/// Install a global subscriber for `verbosity` (count of `-v`) and `format`.
pub fn init_logging(verbosity: u8, format: LogFormat) -> crate::error::Result<()> {
    LoggingBuilder::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .init()
}
