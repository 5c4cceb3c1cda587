//! # Command Dispatcher
//!
//! Routes a decoded [`CommandRequest`] to its handler:
//!
//! 1. Timeout commands (50/51) are answered from the [`GatewayContext`]
//!    without touching the pool.
//! 2. Unknown function codes are rejected.
//! 3. The slave connection is resolved through the pool and connected if
//!    it is not already; a failed connect is reported, not retried.
//! 4. The unit identifier is set and the handler runs.
//!
//! [`Dispatcher::handle_message`] wraps this for the message bus: it
//! checks the mode, parses the payload and pairs the response with the
//! function code to publish.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, warn};
use serde_json::Value;

use crate::context::GatewayContext;
use crate::handler::{
    CommandHandler, ReadBitsHandler, ReadRegistersHandler, WriteMultipleHandler, WriteSingleHandler,
};
use crate::pool::SlaveKey;
use crate::protocol::{
    function_code_of, transaction_id_of, CommandRequest, FunctionCode, Mode, MODE_ERROR_CODE,
    PARSE_ERROR_CODE,
};
use crate::response::{reason, CommandResponse};

/// Response paired with the function code it is published under
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub function_code: i64,
    pub response: CommandResponse,
}

impl Reply {
    fn new(function_code: i64, response: CommandResponse) -> Self {
        Self { function_code, response }
    }
}

/// Function code to handler routing
pub struct Dispatcher {
    context: Arc<GatewayContext>,
    handlers: HashMap<FunctionCode, Arc<dyn CommandHandler>>,
}

impl Dispatcher {
    /// Dispatcher with the standard handler set
    pub fn new(context: Arc<GatewayContext>) -> Self {
        let mut dispatcher = Self {
            context,
            handlers: HashMap::new(),
        };
        dispatcher.register(Arc::new(ReadBitsHandler));
        dispatcher.register(Arc::new(ReadRegistersHandler));
        dispatcher.register(Arc::new(WriteSingleHandler));
        dispatcher.register(Arc::new(WriteMultipleHandler));
        dispatcher
    }

    /// Route every code the handler declares to it, replacing earlier ones
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        for function in handler.function_codes() {
            self.handlers.insert(*function, Arc::clone(&handler));
        }
    }

    pub fn context(&self) -> &Arc<GatewayContext> {
        &self.context
    }

    /// Execute one command
    pub async fn dispatch(&self, request: &CommandRequest) -> CommandResponse {
        let tid = request.transaction_id.clone();

        let function = match FunctionCode::from_code(request.function_code) {
            Some(function) => function,
            None => {
                warn!("unsupported function code {}", request.function_code);
                return CommandResponse::failure(tid, reason::UNSUPPORTED_REQUEST);
            }
        };

        if !function.needs_slave() {
            return self.timeout_command(function, request);
        }

        let handler = match self.handlers.get(&function) {
            Some(handler) => Arc::clone(handler),
            None => return CommandResponse::failure(tid, reason::INVALID_FUNCTION),
        };

        let timeout = self.context.timeout();
        let key = SlaveKey::new(request.host.as_str(), request.service.as_str());
        let handle = match self.context.pool().resolve(&key, timeout).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("{}: {}", key, e);
                return CommandResponse::failure(tid, reason::ALLOCATION_FAILED);
            }
        };

        let mut conn = handle.lock().await;
        if let Err(e) = conn.ensure_connected(timeout).await {
            return CommandResponse::failure(tid, e.to_string());
        }
        conn.session_mut().set_slave(request.slave_id);

        debug!("{} on {} slave {}", function, key, request.slave_id);
        handler.execute(&mut conn, request, function).await
    }

    /// Set or get the response timeout; no slave is involved
    fn timeout_command(&self, function: FunctionCode, request: &CommandRequest) -> CommandResponse {
        let tid = request.transaction_id.clone();
        if function == FunctionCode::GetTimeout {
            return CommandResponse::success_with_timeout(tid, self.context.timeout_us());
        }

        // A missing value keeps the current setting
        if let Some(timeout) = request.timeout {
            let timeout_us = timeout.max(0) as u64;
            self.context.set_timeout_us(timeout_us);
            debug!("response timeout set to {}us", timeout_us);
        }
        CommandResponse::success(tid)
    }

    /// Execute one bus message: a mode frame and a JSON payload
    pub async fn handle_message(&self, mode: &str, payload: &[u8]) -> Reply {
        let doc: Value = match serde_json::from_slice(payload) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("{}: {}", reason::PARSE_FAILED, e);
                return Reply::new(
                    PARSE_ERROR_CODE,
                    CommandResponse::failure(Value::Null, reason::PARSE_FAILED),
                );
            }
        };

        let tid = transaction_id_of(&doc);
        match Mode::from(mode) {
            Mode::Tcp => {}
            Mode::Rtu => {
                return Reply::new(MODE_ERROR_CODE, CommandResponse::failure(tid, reason::RTU_UNSUPPORTED));
            }
            Mode::Unknown(other) => {
                warn!("unsupported mode {:?}", other);
                return Reply::new(MODE_ERROR_CODE, CommandResponse::failure(tid, reason::UNSUPPORTED_MODE));
            }
        }

        let code = function_code_of(&doc);
        let request = match CommandRequest::from_value(doc) {
            Ok(request) => request,
            Err(e) => {
                warn!("invalid request: {}", e);
                return Reply::new(code, CommandResponse::failure(tid, format!("invalid request: {}", e)));
            }
        };

        Reply::new(request.function_code, self.dispatch(&request).await)
    }
}
