//! Serial Modbus RTU transport implementation

use super::{ModbusTransport, TransportError, TransportOpener};
use crate::core::error::ConfigError;
use crate::core::register::FunctionCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

/// Baud rates the poller accepts
pub const SUPPORTED_BAUD_RATES: &[u32] = &[4800, 9600, 19200, 38400, 57600, 115200];

/// Data bits, fixed for Modbus RTU
pub const DATA_BITS: u8 = 8;

/// Stop bits, fixed at one
pub const STOP_BITS: u8 = 1;

/// Serial port parity
///
/// Config files may use `E`/`O`/`N` or the full names, in any case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum SerialParity {
    /// No parity
    None,
    /// Odd parity
    Odd,
    /// Even parity (Modbus RTU default)
    #[default]
    Even,
}

impl SerialParity {
    /// Single-letter code used in "8E1" style notation
    pub fn letter(self) -> char {
        match self {
            Self::None => 'N',
            Self::Odd => 'O',
            Self::Even => 'E',
        }
    }
}

impl fmt::Display for SerialParity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl std::str::FromStr for SerialParity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            _ => Err(ConfigError::InvalidParity(s.to_string())),
        }
    }
}

impl TryFrom<String> for SerialParity {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SerialParity> for tokio_serial::Parity {
    fn from(parity: SerialParity) -> Self {
        match parity {
            SerialParity::None => tokio_serial::Parity::None,
            SerialParity::Odd => tokio_serial::Parity::Odd,
            SerialParity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Serial session parameters for one meter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Parity
    pub parity: SerialParity,
    /// Modbus unit (slave) id
    pub unit_id: u8,
    /// Response timeout in milliseconds
    pub timeout_ms: u64,
    /// Exchange high/low words of 32-bit values
    pub word_swap: bool,
}

impl ConnectionConfig {
    /// Create a configuration with EM6400NG factory defaults (8E1, unit 1)
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            parity: SerialParity::Even,
            unit_id: 1,
            timeout_ms: 1000,
            word_swap: false,
        }
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set unit id
    #[must_use]
    pub fn unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    /// Set response timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable word swap for 32-bit values
    #[must_use]
    pub fn word_swap(mut self, enable: bool) -> Self {
        self.word_swap = enable;
        self
    }

    /// Response timeout as a duration
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check the parameters before anything is opened
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.trim().is_empty() {
            return Err(ConfigError::MissingPort);
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(ConfigError::UnsupportedBaudRate(self.baud_rate));
        }
        if !(1..=247).contains(&self.unit_id) {
            return Err(ConfigError::InvalidUnitId(self.unit_id));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }

    /// Summary such as `/dev/ttyUSB0 19200 8E1 unit 1`
    pub fn connection_info(&self) -> String {
        format!(
            "{} {} {}{}{} unit {}",
            self.port,
            self.baud_rate,
            DATA_BITS,
            self.parity.letter(),
            STOP_BITS,
            self.unit_id
        )
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("", 19200)
    }
}

/// Modbus RTU client over a serial port
///
/// Wraps the async `tokio-modbus` client with a private single-threaded
/// runtime so each read is a plain blocking call bounded by the timeout.
pub struct RtuTransport {
    runtime: Runtime,
    ctx: Option<Context>,
    timeout: Duration,
    info: String,
}

impl RtuTransport {
    /// Open the serial port and attach an RTU client to it
    pub fn open(config: &ConnectionConfig) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let builder = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(config.parity.into())
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(config.response_timeout());

        let port = {
            let _guard = runtime.enter();
            tokio_serial::SerialStream::open(&builder).map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(config.port.clone()),
                serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                    TransportError::PortNotFound(config.port.clone())
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(config.port.clone())
                }
                _ => TransportError::OpenFailed(e.to_string()),
            })?
        };

        let ctx = rtu::attach_slave(port, Slave(config.unit_id));

        Ok(Self {
            runtime,
            ctx: Some(ctx),
            timeout: config.response_timeout(),
            info: config.connection_info(),
        })
    }

    fn read(
        &mut self,
        function: FunctionCode,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<u16>, TransportError> {
        let Self { runtime, ctx, timeout, .. } = self;
        let ctx = ctx.as_mut().ok_or(TransportError::NotConnected)?;
        let timeout = *timeout;

        ctx.set_slave(Slave(unit_id));

        let reply = runtime.block_on(async {
            let request = async {
                match function {
                    FunctionCode::ReadHoldingRegisters => ctx.read_holding_registers(address, count).await,
                    FunctionCode::ReadInputRegisters => ctx.read_input_registers(address, count).await,
                }
            };
            tokio::time::timeout(timeout, request).await
        });

        match reply {
            Err(_elapsed) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
            Ok(Err(tokio_modbus::Error::Transport(e))) if e.kind() == std::io::ErrorKind::TimedOut => {
                Err(TransportError::Timeout(timeout.as_millis() as u64))
            }
            Ok(Err(tokio_modbus::Error::Transport(e))) => Err(TransportError::Io(e.to_string())),
            Ok(Err(e)) => Err(TransportError::Protocol(e.to_string())),
            Ok(Ok(Err(exception))) => Err(TransportError::Exception {
                function: function.code(),
                message: exception.to_string(),
            }),
            Ok(Ok(Ok(words))) => Ok(words),
        }
    }
}

impl ModbusTransport for RtuTransport {
    fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<u16>, TransportError> {
        self.read(FunctionCode::ReadInputRegisters, address, count, unit_id)
    }

    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<u16>, TransportError> {
        self.read(FunctionCode::ReadHoldingRegisters, address, count, unit_id)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut ctx) = self.ctx.take() else {
            return Ok(());
        };
        self.runtime
            .block_on(ctx.disconnect())
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn connection_info(&self) -> String {
        self.info.clone()
    }
}

/// Opens [`RtuTransport`] sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct RtuOpener;

impl TransportOpener for RtuOpener {
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn ModbusTransport>, TransportError> {
        Ok(Box::new(RtuTransport::open(config)?))
    }
}
