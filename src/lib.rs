//! # Meterpoll Core Library
//!
//! Periodic Modbus RTU polling of power meters over RS-485:
//! - Register maps with 1-based offsets and per-register function codes
//! - IEEE-754 float32 decoding, big-endian or word-swapped
//! - One background polling thread per device session
//! - Latest-value result store safe to read from any thread
//! - Timestamped diagnostic events
//!
//! ## Example
//!
//! ```rust,no_run
//! use meterpoll_core::{ConnectionConfig, PollingEngine, RegisterMap};
//!
//! fn main() -> anyhow::Result<()> {
//!     let engine = PollingEngine::new();
//!     engine.start(ConnectionConfig::new("/dev/ttyUSB0", 19200), RegisterMap::em6400ng(), 1000u64)?;
//!
//!     std::thread::sleep(std::time::Duration::from_secs(3));
//!     for row in engine.snapshot() {
//!         println!("{:<28} {:>12} {}", row.name, row.value_text(), row.unit);
//!     }
//!
//!     engine.stop();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod utils;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, PollingConfig};
pub use crate::core::connection::Connection;
pub use crate::core::decoder::{decode_float32, encode_float32, Decoder};
pub use crate::core::engine::{EngineState, PollInterval, PollStats, PollingEngine};
pub use crate::core::error::{ConfigError, DecodeError, EngineError};
pub use crate::core::events::{EventHub, PollEvent, PollEventKind};
pub use crate::core::register::{DataType, FunctionCode, RegisterDefinition, RegisterMap};
pub use crate::core::retry::RetryPolicy;
pub use crate::core::sink::{ReadStatus, ReadingResult, ResultSink, SnapshotRow};
pub use crate::core::transport::{
    ConnectionConfig, ModbusTransport, RtuOpener, SerialParity, TransportError, TransportOpener,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
