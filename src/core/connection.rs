//! One Modbus session on one serial port
//!
//! A `Connection` is created, used and closed on the engine's polling
//! thread only, so reads are serialized by construction.

use super::register::FunctionCode;
use super::retry::RetryPolicy;
use super::transport::{ConnectionConfig, ModbusTransport, TransportError, TransportOpener};

/// Open session plus the policy used for its reads
pub struct Connection {
    transport: Option<Box<dyn ModbusTransport>>,
    retry: RetryPolicy,
    info: String,
}

impl Connection {
    /// Open a session through `opener`
    pub fn open(
        opener: &dyn TransportOpener,
        config: &ConnectionConfig,
        retry: RetryPolicy,
    ) -> Result<Self, TransportError> {
        let transport = opener.open(config)?;
        let info = transport.connection_info();
        Ok(Self::from_transport(transport, retry, info))
    }

    /// Wrap an already opened transport
    pub fn from_transport(transport: Box<dyn ModbusTransport>, retry: RetryPolicy, info: String) -> Self {
        Self {
            transport: Some(transport),
            retry,
            info,
        }
    }

    /// Issue one read request (plus retries allowed by the policy)
    pub fn read_registers(
        &mut self,
        address: u16,
        count: u16,
        function: FunctionCode,
        unit_id: u8,
    ) -> Result<Vec<u16>, TransportError> {
        let retry = self.retry;
        let transport = self.transport.as_mut().ok_or(TransportError::NotConnected)?;

        let mut attempt = 0;
        loop {
            let result = match function {
                FunctionCode::ReadInputRegisters => transport.read_input_registers(address, count, unit_id),
                FunctionCode::ReadHoldingRegisters => transport.read_holding_registers(address, count, unit_id),
            };

            match result {
                Err(e) if retry.should_retry(attempt, &e) => {
                    tracing::debug!(
                        "Retrying read of {} @ {} after error: {} (attempt {})",
                        function.name(),
                        address,
                        e,
                        attempt + 1
                    );
                    attempt += 1;
                    if !retry.delay.is_zero() {
                        std::thread::sleep(retry.delay);
                    }
                }
                other => return other,
            }
        }
    }

    /// Close the session; further calls are no-ops
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                tracing::warn!("Error closing {}: {}", self.info, e);
            }
        }
    }

    /// Whether the session is still open
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Connection info string
    pub fn info(&self) -> &str {
        &self.info
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
