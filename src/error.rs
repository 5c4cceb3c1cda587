//! # modbusd Error Handling
//!
//! This module provides the error type shared by every layer of the gateway:
//! the Modbus session transport, the connection pool, the message bus and
//! the configuration loader.
//!
//! ## Error Categories
//!
//! ### Transport Errors
//! - **I/O Errors**: socket failures, carrying the original `std::io::ErrorKind`
//! - **Connection Errors**: connection establishment problems (refused, unresolvable host)
//! - **Timeout Errors**: operations exceeding the configured response timeout
//!
//! ### Protocol Errors
//! - **Protocol Errors**: malformed or unexpected responses
//! - **Exception Responses**: standard Modbus exception codes returned by a slave
//!
//! ### Gateway Errors
//! - **Allocation Errors**: a session handle could not be created for a slave key
//! - **Bus Errors**: message bus send/receive failures
//! - **Configuration Errors**: unreadable or malformed configuration file
//!
//! ## Classification
//!
//! The connection pool does not care about the full error, only about what
//! it means for the cached connection state. [`ModbusError::class`] reduces
//! an error to an [`ErrorClass`]:
//!
//! ```rust
//! use modbusd::error::{ErrorClass, ModbusError};
//! use std::io::ErrorKind;
//!
//! let reset = ModbusError::io(ErrorKind::ConnectionReset, "Connection reset by peer");
//! assert_eq!(reset.class(), ErrorClass::Reset);
//!
//! let exception = ModbusError::exception(0x03, 0x02);
//! assert_eq!(exception.class(), ErrorClass::Protocol);
//! ```

use std::fmt;
use std::io::ErrorKind;
use thiserror::Error;

/// Result type alias for gateway operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// How a failed operation affects the cached state of a slave connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The peer dropped the TCP session; the connection must be re-opened
    Reset,
    /// No answer within the response timeout
    Timeout,
    /// Anything else: exceptions, malformed frames, local validation
    Protocol,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Reset => write!(f, "reset"),
            ErrorClass::Timeout => write!(f, "timeout"),
            ErrorClass::Protocol => write!(f, "protocol"),
        }
    }
}

/// Gateway error types
///
/// Each variant carries enough context to be turned directly into the
/// human-readable `status` string of a failed command response.
#[derive(Error, Debug, Clone)]
pub enum ModbusError {
    /// I/O related errors on an established session
    ///
    /// The original `ErrorKind` is kept so that connection-reset class
    /// failures can be told apart from the rest.
    #[error("{message}")]
    Io { kind: ErrorKind, message: String },

    /// Connection establishment errors
    ///
    /// # Examples
    /// - Connection refused by remote host
    /// - Host name does not resolve
    /// - Unknown service name
    #[error("{message}")]
    Connection { message: String },

    /// Timeout errors
    #[error("Connection timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Protocol-level errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Modbus exception response
    ///
    /// # Standard Exception Codes
    /// - 0x01: Illegal Function
    /// - 0x02: Illegal Data Address
    /// - 0x03: Illegal Data Value
    /// - 0x04: Slave Device Failure
    /// - 0x05: Acknowledge
    /// - 0x06: Slave Device Busy
    /// - 0x08: Memory Parity Error
    /// - 0x0A: Gateway Path Unavailable
    /// - 0x0B: Gateway Target Device Failed to Respond
    #[error("{message}")]
    Exception { function: u8, code: u8, message: String },

    /// Invalid data value
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Session handle allocation failure
    #[error("Allocation error: {message}")]
    Allocation { message: String },

    /// Message bus errors
    #[error("Bus error: {message}")]
    Bus { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors (should not occur in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self::Io { kind, message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create a Modbus exception error
    ///
    /// Maps standard exception codes to human-readable messages.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal function",
            0x02 => "Illegal data address",
            0x03 => "Illegal data value",
            0x04 => "Slave device or server failure",
            0x05 => "Acknowledge",
            0x06 => "Slave device or server is busy",
            0x08 => "Memory parity error",
            0x0A => "Gateway path unavailable",
            0x0B => "Target device failed to respond",
            _ => "Unknown exception",
        }
        .to_string();

        Self::Exception { function, code, message }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create an allocation error
    pub fn allocation<S: Into<String>>(message: S) -> Self {
        Self::Allocation { message: message.into() }
    }

    /// Create a message bus error
    pub fn bus<S: Into<String>>(message: S) -> Self {
        Self::Bus { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Classify the error by its effect on a cached connection
    ///
    /// Only reset-class errors mean the socket is gone. A timeout or a
    /// slave exception leaves the session usable.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io { kind, .. } => match kind {
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof
                | ErrorKind::NotConnected => ErrorClass::Reset,
                ErrorKind::TimedOut => ErrorClass::Timeout,
                _ => ErrorClass::Protocol,
            },
            Self::Timeout { .. } => ErrorClass::Timeout,
            _ => ErrorClass::Protocol,
        }
    }
}

/// Convert from std::io::Error, keeping the error kind
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.kind(), err.to_string())
    }
}

/// Convert from tokio timeout errors
///
/// The elapsed error carries no duration; callers that know the configured
/// timeout build the error with [`ModbusError::timeout`] instead.
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_data(format!("JSON error: {}", err))
    }
}

/// Convert from tokio-modbus client errors
impl From<tokio_modbus::Error> for ModbusError {
    fn from(err: tokio_modbus::Error) -> Self {
        match err {
            tokio_modbus::Error::Transport(io) => io.into(),
            other => Self::protocol(other.to_string()),
        }
    }
}

/// Convert from ZeroMQ errors
impl From<zeromq::ZmqError> for ModbusError {
    fn from(err: zeromq::ZmqError) -> Self {
        Self::bus(err.to_string())
    }
}
