//! # modbusd - Modbus TCP Gateway Daemon
//!
//! modbusd bridges a ZeroMQ message bus and Modbus TCP slaves. Clients
//! publish JSON commands ("read 3 holding registers from 10.0.0.5:502")
//! and receive JSON responses; they never speak Modbus themselves.
//!
//! ## Features
//!
//! - **Connection Pool**: one persistent session per (host, service), opened
//!   lazily and re-opened after a connection reset
//! - **Typed Dispatch**: function codes routed to handlers through a table
//! - **Error Classification**: transport failures become per-request
//!   failure responses and pool state changes
//! - **Runtime Timeout**: response timeout readable and writable over the
//!   bus, persisted at shutdown
//!
//! ## Supported Function Codes
//!
//! | Code | Command | Fields |
//! |------|---------|--------|
//! | 1 | Read Coils | address, length |
//! | 2 | Read Discrete Inputs | address, length |
//! | 3 | Read Holding Registers | address, length |
//! | 4 | Read Input Registers | address, length |
//! | 5 | Write Single Coil | address, value |
//! | 6 | Write Single Register | address, value |
//! | 15 | Write Multiple Coils | address, length, values |
//! | 16 | Write Multiple Registers | address, length, values |
//! | 50 | Set Response Timeout | timeout (us) |
//! | 51 | Get Response Timeout | |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbusd::{CommandRequest, ConnectionPool, Dispatcher, GatewayContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let context = Arc::new(GatewayContext::new(ConnectionPool::tcp(), 200_000));
//!     let dispatcher = Dispatcher::new(context);
//!
//!     let request = CommandRequest::from_value(serde_json::json!({
//!         "transactionId": "1",
//!         "functionCode": 3,
//!         "host": "127.0.0.1",
//!         "service": "502",
//!         "slaveId": 1,
//!         "address": 0,
//!         "length": 3
//!     }))?;
//!
//!     let response = dispatcher.dispatch(&request).await;
//!     println!("{}", response.to_json());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │   Message Bus   │────►│  Gateway Server │
//! │   (ZeroMQ)      │◄────│   (run loop)    │
//! └─────────────────┘     └─────────────────┘
//!                                  │
//!                         ┌─────────────────┐
//!                         │   Dispatcher    │──► Handlers
//!                         └─────────────────┘
//!                                  │
//!                         ┌─────────────────┐
//!                         │ Connection Pool │
//!                         └─────────────────┘
//!                                  │
//!                         ┌─────────────────┐
//!                         │  Slave Session  │
//!                         │ (tokio-modbus)  │
//!                         └─────────────────┘
//! ```

/// Core error types and result handling
pub mod error;

/// Command vocabulary and request decoding
pub mod protocol;

/// Modbus TCP slave sessions
pub mod transport;

/// Keyed pool of slave connections
pub mod pool;

/// Response payloads and transport error classification
pub mod response;

/// Per-function-code command handlers
pub mod handler;

/// Shared service state
pub mod context;

/// Function code routing
pub mod dispatcher;

/// Configuration file handling
pub mod config;

/// Two-frame message bus
pub mod bus;

/// Receive, dispatch and publish loop
pub mod server;

/// Request metrics
pub mod utils;

/// Logger setup
pub mod logging;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use bus::{BusMessage, ChannelBus, ChannelClient, MessageBus, ZmqBus};
pub use config::GatewayConfig;
pub use context::GatewayContext;
pub use dispatcher::{Dispatcher, Reply};
pub use error::{ErrorClass, ModbusError, ModbusResult};
pub use handler::CommandHandler;
pub use pool::{ConnectionPool, SlaveConnection, SlaveHandle, SlaveKey};
pub use protocol::{CommandRequest, FunctionCode, Mode};
pub use response::CommandResponse;
pub use server::GatewayServer;
pub use transport::{SessionFactory, SlaveSession, TcpSession, TcpSessionFactory, TransportStats};
pub use utils::{OperationTimer, PerformanceMetrics};

/// Default response timeout (200 ms)
pub const DEFAULT_TIMEOUT_US: u64 = 200_000;

/// Maximum number of bits in one read request
pub const MAX_READ_BITS: u32 = 2000;

/// Maximum number of registers in one read request
pub const MAX_READ_REGISTERS: u32 = 125;

/// Daemon version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get daemon information
pub fn info() -> String {
    format!("modbusd v{} - Modbus TCP gateway over ZeroMQ", VERSION)
}
