//! Transport layer for Modbus RTU register reads
//!
//! The engine only talks to [`ModbusTransport`], a blocking request/response
//! interface over an already-open serial session. Framing and CRC are the
//! client library's job.
//!
//! Supports:
//! - Modbus RTU over RS-485/USB-serial adapters ([`RtuTransport`])
//! - Any other client through [`TransportOpener`]

mod serial;

pub use serial::{
    ConnectionConfig, RtuOpener, RtuTransport, SerialParity, DATA_BITS, STOP_BITS,
    SUPPORTED_BAUD_RATES,
};

use thiserror::Error;

/// Transport error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Port could not be opened
    #[error("open failed: {0}")]
    OpenFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No response within the configured timeout
    #[error("Response timeout after {0} ms")]
    Timeout(u64),

    /// Device answered with a Modbus exception
    #[error("Modbus exception (function {function}): {message}")]
    Exception {
        /// Function code of the failed request
        function: u8,
        /// Exception description
        message: String,
    },

    /// Malformed or unexpected reply
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Line or driver error
    #[error("I/O error: {0}")]
    Io(String),

    /// Read attempted on a closed connection
    #[error("Not connected")]
    NotConnected,

    /// Unexpected fault while servicing a register
    #[error("Internal fault: {0}")]
    Internal(String),
}

impl TransportError {
    /// Timeouts and line errors may clear up on a second attempt;
    /// an exception reply means the device understood and refused.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Io(_) | Self::Protocol(_))
    }
}

/// Blocking register-read interface of an open Modbus session
///
/// Implementations are not reentrant; callers serialize requests.
#[cfg_attr(test, mockall::automock)]
pub trait ModbusTransport {
    /// Function code 4
    fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<u16>, TransportError>;

    /// Function code 3
    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<u16>, TransportError>;

    /// Release the underlying port
    fn close(&mut self) -> Result<(), TransportError>;

    /// Human readable description of the session
    fn connection_info(&self) -> String;
}

/// Opens transport sessions for a connection configuration
///
/// The engine calls this from its polling thread, so the returned transport
/// never crosses threads.
pub trait TransportOpener: Send + Sync {
    /// Open a session
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn ModbusTransport>, TransportError>;
}

impl<F> TransportOpener for F
where
    F: Fn(&ConnectionConfig) -> Result<Box<dyn ModbusTransport>, TransportError> + Send + Sync,
{
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn ModbusTransport>, TransportError> {
        self(config)
    }
}
