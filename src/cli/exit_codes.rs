//! CLI Exit Codes
//!
//! Exit codes for scripted polling runs.

use crate::core::error::{ConfigError, EngineError};
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Connection timeout
    pub const TIMEOUT: u8 = 4;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Protocol error
    pub const PROTOCOL_ERROR: u8 = 9;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Some registers failed in the last sweep
    pub const READ_ERRORS: u8 = 18;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a closing message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) => Some(msg),
            Self::Error(_, msg) => Some(msg),
            _ => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Exit code for a transport failure
pub fn transport_exit_code(err: &TransportError) -> u8 {
    match err {
        TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
        TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
        TransportError::Timeout(_) => ExitCodes::TIMEOUT,
        TransportError::Exception { .. } | TransportError::Protocol(_) => ExitCodes::PROTOCOL_ERROR,
        TransportError::OpenFailed(_) | TransportError::Io(_) | TransportError::NotConnected => {
            ExitCodes::CONNECTION_FAILED
        }
        TransportError::Internal(_) => ExitCodes::INTERNAL_ERROR,
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

impl From<TransportError> for CliResult {
    fn from(err: TransportError) -> Self {
        Self::Error(transport_exit_code(&err), err.to_string())
    }
}

impl From<EngineError> for CliResult {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Config(e) => e.into(),
            EngineError::Transport(e) => e.into(),
            EngineError::AlreadyRunning => Self::Error(ExitCodes::ERROR, err.to_string()),
        }
    }
}

impl From<anyhow::Error> for CliResult {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<EngineError>() {
            Ok(e) => return e.into(),
            Err(err) => err,
        };
        let err = match err.downcast::<ConfigError>() {
            Ok(e) => return e.into(),
            Err(err) => err,
        };
        match err.downcast::<TransportError>() {
            Ok(e) => e.into(),
            Err(err) => Self::Error(ExitCodes::ERROR, format!("{err:#}")),
        }
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Connection timeout",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Protocol error",
        14 => "Port not found",
        18 => "Register read errors",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Codes a run can exit with, in ascending order
const ALL_CODES: [u8; 11] = [
    ExitCodes::SUCCESS,
    ExitCodes::ERROR,
    ExitCodes::INVALID_ARGS,
    ExitCodes::CONNECTION_FAILED,
    ExitCodes::TIMEOUT,
    ExitCodes::PERMISSION_DENIED,
    ExitCodes::CONFIG_ERROR,
    ExitCodes::PROTOCOL_ERROR,
    ExitCodes::PORT_NOT_FOUND,
    ExitCodes::READ_ERRORS,
    ExitCodes::INTERNAL_ERROR,
];

/// Exit code table, one code per line
pub fn exit_code_table() -> String {
    let mut out = String::from("Exit Codes:");
    for code in ALL_CODES {
        out.push_str(&format!("\n  {:>3}  {}", code, exit_code_description(code)));
    }
    out
}

/// Print exit code documentation
pub fn print_exit_codes() {
    println!("{}", exit_code_table());
}
