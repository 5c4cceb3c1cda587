//! Command handlers
//!
//! Each handler serves a family of function codes against a connected
//! [`SlaveConnection`]. Request validation that needs no I/O happens here,
//! before the session is touched.

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use crate::pool::SlaveConnection;
use crate::protocol::{CommandRequest, FunctionCode};
use crate::response::{reason, CommandResponse};
use crate::{MAX_READ_BITS, MAX_READ_REGISTERS};

/// Operation bound to one or more function codes
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Function codes this handler serves
    fn function_codes(&self) -> &'static [FunctionCode];

    /// Run `function` on a connected slave
    ///
    /// Always yields a response; transport errors are classified through
    /// [`CommandResponse::failure_from_transport_error`].
    async fn execute(
        &self,
        conn: &mut SlaveConnection,
        request: &CommandRequest,
        function: FunctionCode,
    ) -> CommandResponse;
}

/// Starting address as a Modbus address
fn start_address(request: &CommandRequest) -> Result<u16, CommandResponse> {
    u16::try_from(request.address)
        .map_err(|_| CommandResponse::failure(request.transaction_id.clone(), reason::INVALID_ADDRESS))
}

/// Register value as a 16-bit word
fn register_value(tid: &Value, value: i64) -> Result<u16, CommandResponse> {
    u16::try_from(value).map_err(|_| CommandResponse::failure(tid.clone(), reason::INVALID_VALUE))
}

/// Read coils (1) and discrete inputs (2)
#[derive(Debug, Default)]
pub struct ReadBitsHandler;

#[async_trait]
impl CommandHandler for ReadBitsHandler {
    fn function_codes(&self) -> &'static [FunctionCode] {
        &[FunctionCode::ReadCoils, FunctionCode::ReadDiscreteInputs]
    }

    async fn execute(
        &self,
        conn: &mut SlaveConnection,
        request: &CommandRequest,
        function: FunctionCode,
    ) -> CommandResponse {
        let tid = request.transaction_id.clone();
        if request.length > MAX_READ_BITS {
            return CommandResponse::failure(tid, reason::TOO_MANY_BITS);
        }
        let address = match start_address(request) {
            Ok(address) => address,
            Err(resp) => return resp,
        };
        // Bounded by MAX_READ_BITS above
        let quantity = request.length as u16;

        let result = match function {
            FunctionCode::ReadCoils => conn.session_mut().read_01(address, quantity).await,
            FunctionCode::ReadDiscreteInputs => conn.session_mut().read_02(address, quantity).await,
            _ => return CommandResponse::failure(tid, reason::INVALID_FUNCTION),
        };

        match result {
            Ok(bits) => {
                debug!("{} {} bits from {}", conn.key(), bits.len(), address);
                let data = bits.into_iter().map(u16::from).collect();
                CommandResponse::success_with_data(tid, data)
            }
            Err(e) => CommandResponse::failure_from_transport_error(tid, conn, &e),
        }
    }
}

/// Read holding (3) and input (4) registers
#[derive(Debug, Default)]
pub struct ReadRegistersHandler;

#[async_trait]
impl CommandHandler for ReadRegistersHandler {
    fn function_codes(&self) -> &'static [FunctionCode] {
        &[FunctionCode::ReadHoldingRegisters, FunctionCode::ReadInputRegisters]
    }

    async fn execute(
        &self,
        conn: &mut SlaveConnection,
        request: &CommandRequest,
        function: FunctionCode,
    ) -> CommandResponse {
        let tid = request.transaction_id.clone();
        if request.length > MAX_READ_REGISTERS {
            return CommandResponse::failure(tid, reason::TOO_MANY_REGISTERS);
        }
        let address = match start_address(request) {
            Ok(address) => address,
            Err(resp) => return resp,
        };
        let quantity = request.length as u16;

        let result = match function {
            FunctionCode::ReadHoldingRegisters => conn.session_mut().read_03(address, quantity).await,
            FunctionCode::ReadInputRegisters => conn.session_mut().read_04(address, quantity).await,
            _ => return CommandResponse::failure(tid, reason::INVALID_FUNCTION),
        };

        match result {
            Ok(registers) => {
                debug!("{} {} registers from {}", conn.key(), registers.len(), address);
                CommandResponse::success_with_data(tid, registers)
            }
            Err(e) => CommandResponse::failure_from_transport_error(tid, conn, &e),
        }
    }
}

/// Write single coil (5) or register (6)
#[derive(Debug, Default)]
pub struct WriteSingleHandler;

#[async_trait]
impl CommandHandler for WriteSingleHandler {
    fn function_codes(&self) -> &'static [FunctionCode] {
        &[FunctionCode::WriteSingleCoil, FunctionCode::WriteSingleRegister]
    }

    async fn execute(
        &self,
        conn: &mut SlaveConnection,
        request: &CommandRequest,
        function: FunctionCode,
    ) -> CommandResponse {
        let tid = request.transaction_id.clone();
        let address = match start_address(request) {
            Ok(address) => address,
            Err(resp) => return resp,
        };
        let value = match request.single_value() {
            Some(value) => value,
            None => return CommandResponse::failure(tid, reason::MISSING_VALUE),
        };

        let result = match function {
            FunctionCode::WriteSingleCoil => conn.session_mut().write_05(address, value != 0).await,
            FunctionCode::WriteSingleRegister => {
                let word = match register_value(&tid, value) {
                    Ok(word) => word,
                    Err(resp) => return resp,
                };
                conn.session_mut().write_06(address, word).await
            }
            _ => return CommandResponse::failure(tid, reason::INVALID_FUNCTION),
        };

        match result {
            Ok(()) => CommandResponse::success(tid),
            Err(e) => CommandResponse::failure_from_transport_error(tid, conn, &e),
        }
    }
}

/// Write multiple coils (15) or registers (16)
#[derive(Debug, Default)]
pub struct WriteMultipleHandler;

#[async_trait]
impl CommandHandler for WriteMultipleHandler {
    fn function_codes(&self) -> &'static [FunctionCode] {
        &[FunctionCode::WriteMultipleCoils, FunctionCode::WriteMultipleRegisters]
    }

    async fn execute(
        &self,
        conn: &mut SlaveConnection,
        request: &CommandRequest,
        function: FunctionCode,
    ) -> CommandResponse {
        let tid = request.transaction_id.clone();
        let address = match start_address(request) {
            Ok(address) => address,
            Err(resp) => return resp,
        };
        let values = request.value_list();
        if values.len() != request.length as usize {
            return CommandResponse::failure(tid, reason::LENGTH_MISMATCH);
        }

        let result = match function {
            FunctionCode::WriteMultipleCoils => {
                let bits: Vec<bool> = values.iter().map(|v| *v != 0).collect();
                conn.session_mut().write_0f(address, &bits).await
            }
            FunctionCode::WriteMultipleRegisters => {
                let words = match values
                    .iter()
                    .map(|v| register_value(&tid, *v))
                    .collect::<Result<Vec<u16>, _>>()
                {
                    Ok(words) => words,
                    Err(resp) => return resp,
                };
                conn.session_mut().write_10(address, &words).await
            }
            _ => return CommandResponse::failure(tid, reason::INVALID_FUNCTION),
        };

        match result {
            Ok(()) => CommandResponse::success(tid),
            Err(e) => CommandResponse::failure_from_transport_error(tid, conn, &e),
        }
    }
}
