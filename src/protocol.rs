//! Command protocol definitions
//!
//! This module contains the gateway's command vocabulary: the function code
//! table, the bus modes and the JSON request structure clients publish.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

/// Modbus slave/unit identifier
pub type SlaveId = u8;

/// Function code sent in place of a real one when a message fails to
/// dispatch because of its mode
pub const MODE_ERROR_CODE: i64 = -1;

/// Function code sent in place of a real one when a payload is not JSON
pub const PARSE_ERROR_CODE: i64 = -2;

/// Gateway command codes
///
/// Codes 1-16 are Modbus function codes; 50 and 51 are gateway commands
/// operating on the response timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Coils (0x01)
    ReadCoils = 1,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 2,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 3,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 4,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 5,
    /// Write Single Register (0x06)
    WriteSingleRegister = 6,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 15,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 16,
    /// Set the response timeout
    SetTimeout = 50,
    /// Get the response timeout
    GetTimeout = 51,
}

impl FunctionCode {
    /// Every supported code, in table order
    pub const ALL: [FunctionCode; 10] = [
        FunctionCode::ReadCoils,
        FunctionCode::ReadDiscreteInputs,
        FunctionCode::ReadHoldingRegisters,
        FunctionCode::ReadInputRegisters,
        FunctionCode::WriteSingleCoil,
        FunctionCode::WriteSingleRegister,
        FunctionCode::WriteMultipleCoils,
        FunctionCode::WriteMultipleRegisters,
        FunctionCode::SetTimeout,
        FunctionCode::GetTimeout,
    ];

    /// Look up a code received on the wire
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.code() == code)
    }

    /// Numeric wire value
    pub fn code(self) -> i64 {
        self as u8 as i64
    }

    /// Check if this command talks to a slave
    pub fn needs_slave(self) -> bool {
        !matches!(self, FunctionCode::SetTimeout | FunctionCode::GetTimeout)
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FunctionCode::ReadCoils => "Read Coils",
            FunctionCode::ReadDiscreteInputs => "Read Discrete Inputs",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::WriteSingleCoil => "Write Single Coil",
            FunctionCode::WriteSingleRegister => "Write Single Register",
            FunctionCode::WriteMultipleCoils => "Write Multiple Coils",
            FunctionCode::WriteMultipleRegisters => "Write Multiple Registers",
            FunctionCode::SetTimeout => "Set Response Timeout",
            FunctionCode::GetTimeout => "Get Response Timeout",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Request mode carried in the first frame of an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Tcp,
    Rtu,
    Unknown(String),
}

impl From<&str> for Mode {
    fn from(value: &str) -> Self {
        match value {
            "tcp" => Mode::Tcp,
            "rtu" => Mode::Rtu,
            other => Mode::Unknown(other.to_string()),
        }
    }
}

/// A single data item: coils may be sent as booleans or 0/1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Bool(bool),
    Int(i64),
}

impl DataValue {
    pub fn as_i64(self) -> i64 {
        match self {
            DataValue::Bool(b) => b as i64,
            DataValue::Int(v) => v,
        }
    }
}

/// Payload of the `values`/`data` field
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DataField {
    One(DataValue),
    Many(Vec<DataValue>),
}

/// A decoded command
///
/// Field names follow the camelCase wire contract; the short names used by
/// older clients (`tid`, `cmd`, `ip`, `port`, `slave`, `addr`, `len`,
/// `data`) are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    /// Opaque client correlation token, echoed verbatim
    #[serde(default, alias = "tid")]
    pub transaction_id: Value,
    #[serde(default, alias = "cmd")]
    pub function_code: i64,
    #[serde(default, alias = "ip")]
    pub host: String,
    /// Port number or service name
    #[serde(default, alias = "port", deserialize_with = "service_string")]
    pub service: String,
    #[serde(default = "default_slave_id", alias = "slave")]
    pub slave_id: SlaveId,
    #[serde(default, alias = "addr")]
    pub address: u32,
    #[serde(default, alias = "len")]
    pub length: u32,
    #[serde(default)]
    pub value: Option<DataValue>,
    #[serde(default, alias = "data")]
    pub values: Option<DataField>,
    /// Response timeout in microseconds (set-timeout only)
    #[serde(default)]
    pub timeout: Option<i64>,
}

fn default_slave_id() -> SlaveId {
    1
}

/// Accept the service as either a JSON string or a JSON number
fn service_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Service {
        Name(String),
        Port(u64),
    }

    Ok(match Service::deserialize(deserializer)? {
        Service::Name(name) => name,
        Service::Port(port) => port.to_string(),
    })
}

impl CommandRequest {
    /// Decode a request from an already parsed JSON document
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Value for single writes; `data` is accepted when it holds one item
    pub fn single_value(&self) -> Option<i64> {
        self.value.map(DataValue::as_i64).or(match &self.values {
            Some(DataField::One(v)) => Some(v.as_i64()),
            _ => None,
        })
    }

    /// Values for multiple writes, in order
    pub fn value_list(&self) -> Vec<i64> {
        match &self.values {
            Some(DataField::Many(list)) => list.iter().map(|v| v.as_i64()).collect(),
            Some(DataField::One(v)) => vec![v.as_i64()],
            None => Vec::new(),
        }
    }
}

/// Pull the correlation token out of a parsed message, under either name
pub fn transaction_id_of(doc: &Value) -> Value {
    doc.get("transactionId")
        .or_else(|| doc.get("tid"))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Pull the function code out of a parsed message, under either name
///
/// A missing or non-integer code reads as 0, which no command uses.
pub fn function_code_of(doc: &Value) -> i64 {
    doc.get("functionCode")
        .or_else(|| doc.get("cmd"))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}
