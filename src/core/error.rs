//! Error types shared by the polling engine
//!
//! Transport failures live next to the transport layer
//! ([`crate::core::transport::TransportError`]); everything else is here.

use super::transport::TransportError;
use thiserror::Error;

/// Invalid session or register configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// No serial port selected
    #[error("No serial port selected")]
    MissingPort,

    /// Baud rate outside the supported set
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// Parity string that is not E, O or N
    #[error("Invalid parity: {0} (expected E, O or N)")]
    InvalidParity(String),

    /// Unit id outside 1..=247
    #[error("Unit id must be 1..247, got {0}")]
    InvalidUnitId(u8),

    /// Zero response timeout
    #[error("Response timeout must be greater than zero")]
    InvalidTimeout,

    /// Register offset below 1 or past the end of the address space
    #[error("Register '{name}': invalid offset {offset}")]
    InvalidOffset {
        /// Register name
        name: String,
        /// Offending offset
        offset: u32,
    },

    /// Register without a display name
    #[error("Register at offset {0} has an empty name")]
    EmptyName(u32),

    /// Scale is NaN or infinite
    #[error("Register '{name}': scale must be finite, got {scale}")]
    InvalidScale {
        /// Register name
        name: String,
        /// Offending scale
        scale: f64,
    },

    /// Function code other than 3 or 4
    #[error("Unsupported function code: {0}")]
    UnsupportedFunction(String),

    /// Data type the decoder does not know
    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    /// Register map with no entries
    #[error("Register map is empty")]
    EmptyRegisterMap,

    /// Config file could not be read or written
    #[error("Config file {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// Underlying error text
        message: String,
    },

    /// Config file could not be parsed
    #[error("Config parse error: {0}")]
    Parse(String),
}

/// Raw words that do not fit the declared data type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Word count differs from what the data type needs
    #[error("insufficient words: expected {expected}, got {actual}")]
    WordCount {
        /// Words required by the data type
        expected: usize,
        /// Words actually received
        actual: usize,
    },
}

/// Errors returned by [`crate::core::engine::PollingEngine::start`]
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration rejected before any I/O
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The serial session could not be opened
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// `start` called on an engine that is already polling
    #[error("Polling engine is already running")]
    AlreadyRunning,
}
