//! Error definitions for the front panel link

use thiserror::Error;

/// Exit code used when the switch shift register returns a short frame.
pub const SHORT_READ_EXIT_CODE: u8 = 4;

/// Errors raised by the front panel hardware path
#[derive(Debug, Error)]
pub enum PanelError {
    /// The GPIO peripheral itself could not be opened
    #[error("GPIO peripheral unavailable: {0}")]
    GpioUnavailable(String),

    /// A control line could not be acquired or driven
    #[error("GPIO error on line {line}: {reason}")]
    Gpio { line: u8, reason: String },

    /// The serial device could not be opened or configured
    #[error("SPI device error: {0}")]
    Spi(String),

    /// The switch register returned fewer (or more) bytes than a full frame.
    ///
    /// The link has no retry path for this; it means the panel or its
    /// firmware misbehaves and the process has to stop.
    #[error("Switch read returned {actual} bytes, expected {expected}")]
    ShortRead { expected: usize, actual: usize },

    /// The LED register accepted fewer bytes than a full status word
    #[error("Status write accepted {actual} bytes, expected {expected}")]
    ShortWrite { expected: usize, actual: usize },

    /// Transfer failed at the driver level
    #[error("Transfer failed: {0}")]
    Transfer(String),
}

impl PanelError {
    /// Whether this error must end the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, PanelError::ShortRead { .. })
    }

    /// Process exit code for fatal errors
    pub fn exit_code(&self) -> Option<u8> {
        match self {
            PanelError::ShortRead { .. } => Some(SHORT_READ_EXIT_CODE),
            _ => None,
        }
    }
}
