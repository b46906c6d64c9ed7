//! Register definitions and the ordered register map
//!
//! Offsets are the 1-based register numbers printed in vendor manuals.
//! The 0-based wire address is always derived from the offset, never stored.

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Highest 1-based register number addressable on the wire
pub const MAX_OFFSET: u32 = 0x1_0000;

/// Modbus read function codes supported by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawFunction", into = "u8")]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
}

impl FunctionCode {
    /// Get function code from u8
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            _ => None,
        }
    }

    /// Numeric code as sent on the wire
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Get name of function code
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl From<FunctionCode> for u8 {
    fn from(function: FunctionCode) -> Self {
        function.code()
    }
}

impl std::str::FromStr for FunctionCode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "3" | "03" | "holding" => Ok(Self::ReadHoldingRegisters),
            "4" | "04" | "input" => Ok(Self::ReadInputRegisters),
            other => Err(ConfigError::UnsupportedFunction(other.to_string())),
        }
    }
}

/// Config files may spell the function as `3`/`4` or `"holding"`/`"input"`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawFunction {
    Code(u8),
    Name(String),
}

impl TryFrom<RawFunction> for FunctionCode {
    type Error = ConfigError;

    fn try_from(raw: RawFunction) -> Result<Self, Self::Error> {
        match raw {
            RawFunction::Code(code) => {
                Self::from_u8(code).ok_or_else(|| ConfigError::UnsupportedFunction(code.to_string()))
            }
            RawFunction::Name(name) => name.parse(),
        }
    }
}

/// Register data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum DataType {
    /// IEEE-754 single precision spread over two registers
    #[default]
    Float32,
}

impl DataType {
    /// Number of 16-bit registers the type occupies
    pub fn word_count(self) -> u16 {
        match self {
            Self::Float32 => 2,
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "float32" | "f32" => Ok(Self::Float32),
            other => Err(ConfigError::UnsupportedDataType(other.to_string())),
        }
    }
}

impl TryFrom<String> for DataType {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

fn default_scale() -> f64 {
    1.0
}

/// One named register to poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDefinition {
    /// Vendor-documented 1-based register number
    pub offset: u32,
    /// Display label, unique within a map
    pub name: String,
    /// Display-only engineering unit
    #[serde(default)]
    pub unit: String,
    /// Which read request to issue
    #[serde(alias = "fc")]
    pub function: FunctionCode,
    /// How the raw words are decoded
    #[serde(default)]
    pub data_type: DataType,
    /// Multiplier applied after decoding
    #[serde(default = "default_scale")]
    pub scale: f64,
}

impl RegisterDefinition {
    /// Create a float32 register with scale 1.0
    pub fn new(offset: u32, name: &str, unit: &str, function: FunctionCode) -> Self {
        Self {
            offset,
            name: name.to_string(),
            unit: unit.to_string(),
            function,
            data_type: DataType::Float32,
            scale: 1.0,
        }
    }

    /// Input register (function 4) shorthand
    pub fn input(offset: u32, name: &str, unit: &str) -> Self {
        Self::new(offset, name, unit, FunctionCode::ReadInputRegisters)
    }

    /// Holding register (function 3) shorthand
    pub fn holding(offset: u32, name: &str, unit: &str) -> Self {
        Self::new(offset, name, unit, FunctionCode::ReadHoldingRegisters)
    }

    /// Set scale factor
    #[must_use]
    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Set data type
    #[must_use]
    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// 0-based wire address, `offset - 1`
    pub fn address(&self) -> u16 {
        // validate() guarantees 1 <= offset <= MAX_OFFSET
        self.offset.saturating_sub(1) as u16
    }

    /// Registers to read for this definition
    pub fn word_count(&self) -> u16 {
        self.data_type.word_count()
    }

    /// Check the definition is structurally usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName(self.offset));
        }
        let last = u64::from(self.offset) + u64::from(self.word_count()) - 1;
        if self.offset < 1 || last > u64::from(MAX_OFFSET) {
            return Err(ConfigError::InvalidOffset {
                name: self.name.clone(),
                offset: self.offset,
            });
        }
        if !self.scale.is_finite() {
            return Err(ConfigError::InvalidScale {
                name: self.name.clone(),
                scale: self.scale,
            });
        }
        Ok(())
    }
}

/// Ordered, immutable collection of register definitions
///
/// Cloning is cheap and shares the same definitions, so a running engine and
/// its consumers always see one consistent map. Replacing the map means
/// building a new one and restarting the engine with it.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterMap {
    registers: Arc<[RegisterDefinition]>,
}

impl RegisterMap {
    /// Build a map, validating every definition
    pub fn new(registers: Vec<RegisterDefinition>) -> Result<Self, ConfigError> {
        if registers.is_empty() {
            return Err(ConfigError::EmptyRegisterMap);
        }

        let mut seen = HashSet::new();
        for def in &registers {
            def.validate()?;
            if !seen.insert(def.name.as_str()) {
                tracing::warn!("Duplicate register name '{}' (offset {})", def.name, def.offset);
            }
        }

        Ok(Self {
            registers: registers.into(),
        })
    }

    /// Number of registers
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Always false for a constructed map
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Get definition by poll index
    pub fn get(&self, index: usize) -> Option<&RegisterDefinition> {
        self.registers.get(index)
    }

    /// Iterate in poll order
    pub fn iter(&self) -> std::slice::Iter<'_, RegisterDefinition> {
        self.registers.iter()
    }

    /// Find the poll index of a register by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.registers.iter().position(|r| r.name == name)
    }

    /// Definitions as a slice
    pub fn as_slice(&self) -> &[RegisterDefinition] {
        &self.registers
    }

    /// Default map for the Schneider EasyLogic EM6400NG meter
    pub fn em6400ng() -> Self {
        Self {
            registers: em6400ng_registers().into(),
        }
    }
}

impl<'a> IntoIterator for &'a RegisterMap {
    type Item = &'a RegisterDefinition;
    type IntoIter = std::slice::Iter<'a, RegisterDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// EM6400NG float32 registers: energy counters are holding registers,
/// instantaneous values are input registers
pub fn em6400ng_registers() -> Vec<RegisterDefinition> {
    use RegisterDefinition as R;

    vec![
        R::holding(2699, "Active energy delivered (into load)", "kWh"),
        R::holding(2701, "Active energy received (out of load)", "kWh"),
        R::holding(2703, "Active energy delivered + received", "kWh"),
        R::input(2999, "Current A", "A"),
        R::input(3001, "Current B", "A"),
        R::input(3003, "Current C", "A"),
        R::input(3009, "Current avg", "A"),
        R::input(3019, "Voltage A B", "V"),
        R::input(3021, "Voltage B C", "V"),
        R::input(3023, "Voltage C A", "V"),
        R::input(3025, "Voltage L L avg", "V"),
        R::input(3053, "Active power A", "kW"),
        R::input(3055, "Active power B", "kW"),
        R::input(3057, "Active power C", "kW"),
        R::input(3059, "Active power total", "kW"),
        R::input(3061, "Reactive power A", "kVAR"),
        R::input(3063, "Reactive power B", "kVAR"),
        R::input(3065, "Reactive power C", "kVAR"),
        R::input(3067, "Reactive power total", "kVAR"),
        R::input(3069, "Apparent power A", "kVA"),
        R::input(3071, "Apparent power B", "kVA"),
        R::input(3073, "Apparent power C", "kVA"),
        R::input(3075, "Apparent power total", "kVA"),
    ]
}
