//! Latest-value store between the polling thread and its consumers
//!
//! One slot per register index. The polling thread overwrites slots,
//! readers take ordered snapshots at their own pace.

use super::register::{FunctionCode, RegisterMap};
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of reading one register in one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadStatus {
    /// Value decoded
    Ok,
    /// Open/read failed, timed out or the device replied with an exception
    TransportError,
    /// Words did not fit the declared data type
    DecodeError,
}

impl ReadStatus {
    /// Short cell text for table views
    pub fn cell_text(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::TransportError => "ERR",
            Self::DecodeError => "N/A",
        }
    }
}

impl fmt::Display for ReadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "Ok"),
            Self::TransportError => write!(f, "TransportError"),
            Self::DecodeError => write!(f, "DecodeError"),
        }
    }
}

/// One register reading from one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingResult {
    /// Poll cycle number, starting at 1
    pub cycle: u64,
    /// Index into the register map
    pub register_index: usize,
    /// Words as received, if the read succeeded
    pub raw_words: Option<Vec<u16>>,
    /// Decoded and scaled value
    pub value: Option<f64>,
    /// Outcome
    pub status: ReadStatus,
    /// Diagnostic text for non-Ok results
    pub message: Option<String>,
    /// When the reading was taken
    pub timestamp: DateTime<Local>,
}

impl ReadingResult {
    /// Successful reading
    pub fn ok(cycle: u64, register_index: usize, raw_words: Vec<u16>, value: f64) -> Self {
        Self {
            cycle,
            register_index,
            raw_words: Some(raw_words),
            value: Some(value),
            status: ReadStatus::Ok,
            message: None,
            timestamp: Local::now(),
        }
    }

    /// Failed read
    pub fn transport_error(cycle: u64, register_index: usize, message: impl Into<String>) -> Self {
        Self {
            cycle,
            register_index,
            raw_words: None,
            value: None,
            status: ReadStatus::TransportError,
            message: Some(message.into()),
            timestamp: Local::now(),
        }
    }

    /// Read succeeded but the words could not be decoded
    pub fn decode_error(
        cycle: u64,
        register_index: usize,
        raw_words: Vec<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            cycle,
            register_index,
            raw_words: Some(raw_words),
            value: None,
            status: ReadStatus::DecodeError,
            message: Some(message.into()),
            timestamp: Local::now(),
        }
    }

    /// Whether the value is usable
    pub fn is_ok(&self) -> bool {
        self.status == ReadStatus::Ok
    }
}

/// Row handed to presentation layers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRow {
    /// Register index
    pub index: usize,
    /// Register name
    pub name: String,
    /// Function code used for the read
    pub function: FunctionCode,
    /// 1-based register number
    pub offset: u32,
    /// 0-based wire address
    pub address: u16,
    /// Display unit
    pub unit: String,
    /// Latest reading, `None` until the register has been polled
    pub reading: Option<ReadingResult>,
}

impl SnapshotRow {
    /// Value cell: 4 decimals, `ERR` for transport errors, `N/A` for
    /// decode errors, empty before the first read
    pub fn value_text(&self) -> String {
        match &self.reading {
            None => String::new(),
            Some(r) => match (r.status, r.value) {
                (ReadStatus::Ok, Some(v)) => format!("{v:.4}"),
                (status, _) => status.cell_text().to_string(),
            },
        }
    }
}

struct SinkInner {
    map: RegisterMap,
    slots: Vec<Option<ReadingResult>>,
}

/// Thread-safe latest-value-wins store of readings
pub struct ResultSink {
    inner: RwLock<SinkInner>,
}

impl ResultSink {
    /// Create an empty sink sized for `map`
    pub fn new(map: RegisterMap) -> Self {
        let slots = vec![None; map.len()];
        Self {
            inner: RwLock::new(SinkInner { map, slots }),
        }
    }

    /// Drop all readings and resize for a new map
    pub fn reset(&self, map: RegisterMap) {
        let mut inner = self.inner.write();
        inner.slots = vec![None; map.len()];
        inner.map = map;
    }

    /// Store the latest reading for `register_index`
    ///
    /// A reading from an older cycle never replaces a newer one.
    pub fn publish(&self, register_index: usize, result: ReadingResult) {
        let mut inner = self.inner.write();
        let Some(slot) = inner.slots.get_mut(register_index) else {
            tracing::debug!("Dropping result for unknown register index {}", register_index);
            return;
        };
        if matches!(slot, Some(existing) if existing.cycle > result.cycle) {
            return;
        }
        *slot = Some(result);
    }

    /// Latest reading for one register
    pub fn latest(&self, register_index: usize) -> Option<ReadingResult> {
        self.inner.read().slots.get(register_index).cloned().flatten()
    }

    /// Latest readings in map order
    pub fn results(&self) -> Vec<Option<ReadingResult>> {
        self.inner.read().slots.clone()
    }

    /// Ordered rows for rendering
    pub fn snapshot(&self) -> Vec<SnapshotRow> {
        let inner = self.inner.read();
        inner
            .map
            .iter()
            .zip(inner.slots.iter())
            .enumerate()
            .map(|(index, (def, reading))| SnapshotRow {
                index,
                name: def.name.clone(),
                function: def.function,
                offset: def.offset,
                address: def.address(),
                unit: def.unit.clone(),
                reading: reading.clone(),
            })
            .collect()
    }

    /// Register map the sink is sized for
    pub fn register_map(&self) -> RegisterMap {
        self.inner.read().map.clone()
    }
}
