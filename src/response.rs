//! Command responses and transport error classification
//!
//! A failed command carries its reason in `status`, the same field that
//! holds `"ok"` on success. Clients tell the two apart by comparing with
//! [`STATUS_OK`].

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorClass, ModbusError};
use crate::pool::SlaveConnection;

/// Status of every successful command
pub const STATUS_OK: &str = "ok";

/// Failure reasons produced by the gateway itself
pub mod reason {
    pub const PARSE_FAILED: &str = "Fail to parse command string";
    pub const UNSUPPORTED_REQUEST: &str = "unsupport request";
    pub const UNSUPPORTED_MODE: &str = "unsupport mode";
    pub const RTU_UNSUPPORTED: &str = "rtu mode is not supported";
    pub const ALLOCATION_FAILED: &str = "Fail to init modbus tcp handle";
    pub const TOO_MANY_BITS: &str = "Too many bits requested";
    pub const TOO_MANY_REGISTERS: &str = "Too many registers requested";
    pub const INVALID_FUNCTION: &str = "Invalid function code";
    pub const INVALID_ADDRESS: &str = "Invalid address";
    pub const MISSING_VALUE: &str = "Missing value";
    pub const INVALID_VALUE: &str = "Invalid register value";
    pub const LENGTH_MISMATCH: &str = "values length mismatch";
}

/// Response published for every command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub transaction_id: Value,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl CommandResponse {
    /// Successful write: no data
    pub fn success(transaction_id: Value) -> Self {
        Self {
            transaction_id,
            status: STATUS_OK.to_string(),
            data: None,
            timeout: None,
        }
    }

    /// Successful read
    pub fn success_with_data(transaction_id: Value, data: Vec<u16>) -> Self {
        Self {
            data: Some(data),
            ..Self::success(transaction_id)
        }
    }

    /// Successful get-timeout
    pub fn success_with_timeout(transaction_id: Value, timeout_us: u64) -> Self {
        Self {
            timeout: Some(timeout_us),
            ..Self::success(transaction_id)
        }
    }

    /// Failure with a reason string
    pub fn failure<S: Into<String>>(transaction_id: Value, reason: S) -> Self {
        Self {
            transaction_id,
            status: reason.into(),
            data: None,
            timeout: None,
        }
    }

    /// Failure caused by a session error
    ///
    /// A reset-class error marks the connection disconnected so the next
    /// request against the same slave reconnects first. Every other class
    /// leaves the cached state alone.
    pub fn failure_from_transport_error(
        transaction_id: Value,
        conn: &mut SlaveConnection,
        err: &ModbusError,
    ) -> Self {
        let class = err.class();
        if class == ErrorClass::Reset {
            conn.mark_disconnected();
            debug!("{} marked disconnected", conn.key());
        }
        warn!("{} {} error: {}", conn.key(), class, err);
        Self::failure(transaction_id, err.to_string())
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Serialize for the bus
    pub fn to_json(&self) -> String {
        // A struct of strings, integers and JSON values always serializes
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::SlaveKey;
    use crate::testing::MockSession;
    use serde_json::json;
    use std::io::ErrorKind;

    #[test]
    fn test_success_payloads() {
        let ok = CommandResponse::success(json!("7"));
        assert_eq!(ok.to_json(), r#"{"transactionId":"7","status":"ok"}"#);

        let read = CommandResponse::success_with_data(json!("1"), vec![10, 11, 12]);
        assert_eq!(
            read.to_json(),
            r#"{"transactionId":"1","status":"ok","data":[10,11,12]}"#
        );

        let timeout = CommandResponse::success_with_timeout(json!(3), 200000);
        assert_eq!(timeout.timeout, Some(200000));
        assert!(timeout.is_ok());
    }

    #[test]
    fn test_failure_uses_status_field() {
        let failed = CommandResponse::failure(json!("9"), reason::UNSUPPORTED_REQUEST);
        assert!(!failed.is_ok());
        assert_eq!(
            failed.to_json(),
            r#"{"transactionId":"9","status":"unsupport request"}"#
        );
    }

    #[test]
    fn test_reset_error_marks_disconnected() {
        let (session, _slave) = MockSession::new();
        let mut conn = SlaveConnection::new(SlaveKey::new("10.0.0.1", "502"), Box::new(session));
        conn.set_connected(true);

        let err = ModbusError::io(ErrorKind::ConnectionReset, "Connection reset by peer");
        let resp = CommandResponse::failure_from_transport_error(json!("1"), &mut conn, &err);

        assert_eq!(resp.status, "Connection reset by peer");
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_other_errors_keep_connection() {
        let (session, _slave) = MockSession::new();
        let mut conn = SlaveConnection::new(SlaveKey::new("10.0.0.1", "502"), Box::new(session));
        conn.set_connected(true);

        for err in [
            ModbusError::exception(0x03, 0x02),
            ModbusError::timeout("read holding registers", 200),
        ] {
            CommandResponse::failure_from_transport_error(json!("1"), &mut conn, &err);
            assert!(conn.is_connected());
        }
    }
}
