//! # Slave Session Transport
//!
//! This module wraps the Modbus TCP wire protocol behind the [`SlaveSession`]
//! trait, the opaque session handle owned by each pooled connection.
//!
//! ## Sessions
//!
//! A session is created disconnected. [`SlaveSession::connect`] opens (or
//! re-opens) its TCP socket; it never holds more than one socket at a time.
//! Every operation is bounded by the response timeout given to the last
//! `connect` call, so a new timeout reaches a session only when it connects.
//!
//! The MBAP framing itself is done by `tokio-modbus`; this layer adds
//! host/service resolution, timeouts, typed errors and statistics.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use modbusd::transport::{SessionFactory, TcpSessionFactory};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = TcpSessionFactory;
//! let mut session = factory.create("127.0.0.1", "502")?;
//! session.connect(Duration::from_millis(200)).await?;
//! session.set_slave(1);
//!
//! let registers = session.read_03(0, 10).await?;
//! println!("Read registers: {:?}", registers);
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use dns_lookup::{getaddrinfo, AddrInfoHints, SockType};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;
use tracing::{debug, trace};

use crate::error::{ErrorClass, ModbusError, ModbusResult};
use crate::protocol::SlaveId;

/// Longest host or service string a session accepts
pub const MAX_ENDPOINT_LEN: usize = 255;

/// Session layer abstraction over one Modbus slave
///
/// Method names carry the Modbus function code they issue. Sessions are
/// `Send` so pooled connections can move between tasks; sharing goes
/// through the pool's per-entry mutex.
#[async_trait]
pub trait SlaveSession: Send {
    /// Open the session, replacing any socket it already holds
    ///
    /// `timeout` bounds the connect itself and every later operation until
    /// the next `connect`.
    async fn connect(&mut self, timeout: Duration) -> ModbusResult<()>;

    /// Set the unit identifier used by subsequent requests
    fn set_slave(&mut self, slave_id: SlaveId);

    /// Read coils (function code 0x01)
    async fn read_01(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>>;

    /// Read discrete inputs (function code 0x02)
    async fn read_02(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>>;

    /// Read holding registers (function code 0x03)
    async fn read_03(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>>;

    /// Read input registers (function code 0x04)
    async fn read_04(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>>;

    /// Write single coil (function code 0x05)
    async fn write_05(&mut self, address: u16, value: bool) -> ModbusResult<()>;

    /// Write single register (function code 0x06)
    async fn write_06(&mut self, address: u16, value: u16) -> ModbusResult<()>;

    /// Write multiple coils (function code 0x0F)
    async fn write_0f(&mut self, address: u16, values: &[bool]) -> ModbusResult<()>;

    /// Write multiple registers (function code 0x10)
    async fn write_10(&mut self, address: u16, values: &[u16]) -> ModbusResult<()>;

    /// Check whether a socket is currently held
    ///
    /// This is a local check, the remote slave is not contacted.
    fn is_open(&self) -> bool;

    /// Close the socket, if any
    async fn close(&mut self) -> ModbusResult<()>;

    /// Get session statistics
    fn get_stats(&self) -> TransportStats;
}

/// Allocates sessions for the connection pool
pub trait SessionFactory: Send + Sync {
    /// Create a disconnected session for `host`/`service`
    ///
    /// Fails with [`ModbusError::Allocation`] when no session can be made.
    fn create(&self, host: &str, service: &str) -> ModbusResult<Box<dyn SlaveSession>>;
}

/// Session statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub connects: u64,
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
}

/// Factory producing [`TcpSession`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpSessionFactory;

impl SessionFactory for TcpSessionFactory {
    fn create(&self, host: &str, service: &str) -> ModbusResult<Box<dyn SlaveSession>> {
        Ok(Box::new(TcpSession::new(host, service)?))
    }
}

/// Modbus TCP session backed by `tokio-modbus`
pub struct TcpSession {
    host: String,
    service: String,
    ctx: Option<Context>,
    slave: Slave,
    timeout: Duration,
    stats: TransportStats,
}

impl TcpSession {
    /// Create a disconnected session
    pub fn new(host: &str, service: &str) -> ModbusResult<Self> {
        if host.is_empty() || service.is_empty() {
            return Err(ModbusError::allocation("host and service must not be empty"));
        }
        if host.len() > MAX_ENDPOINT_LEN || service.len() > MAX_ENDPOINT_LEN {
            return Err(ModbusError::allocation(format!(
                "host and service are limited to {} bytes",
                MAX_ENDPOINT_LEN
            )));
        }

        Ok(Self {
            host: host.to_string(),
            service: service.to_string(),
            ctx: None,
            slave: Slave(1),
            timeout: Duration::from_micros(crate::DEFAULT_TIMEOUT_US),
            stats: TransportStats::default(),
        })
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    fn context(&mut self) -> ModbusResult<&mut Context> {
        self.ctx
            .as_mut()
            .ok_or_else(|| ModbusError::io(ErrorKind::NotConnected, "Socket is not connected"))
    }

    /// Update statistics for a finished request
    ///
    /// A reset drops the socket so that the next `connect` starts clean.
    fn record<T>(&mut self, operation: &str, result: &ModbusResult<T>) {
        self.stats.requests_sent += 1;
        match result {
            Ok(_) => {
                self.stats.responses_received += 1;
                trace!(host = %self.host, service = %self.service, "{} ok", operation);
            }
            Err(err) => {
                self.stats.errors += 1;
                match err.class() {
                    ErrorClass::Timeout => self.stats.timeouts += 1,
                    ErrorClass::Reset => self.ctx = None,
                    ErrorClass::Protocol => {}
                }
                debug!(host = %self.host, service = %self.service, "{} failed: {}", operation, err);
            }
        }
    }
}

/// Resolve `host` and `service` to stream socket addresses
///
/// The service is a port number or any name known to the system services
/// database, looked up through `getaddrinfo` on the blocking pool.
pub async fn resolve_endpoint(host: &str, service: &str) -> ModbusResult<Vec<SocketAddr>> {
    let (host, service) = (host.to_string(), service.to_string());
    let endpoint = format!("{}:{}", host, service);

    let lookup = tokio::task::spawn_blocking(move || -> io::Result<Vec<SocketAddr>> {
        let hints = AddrInfoHints {
            socktype: SockType::Stream.into(),
            ..AddrInfoHints::default()
        };
        let addrs = getaddrinfo(Some(&host), Some(&service), Some(hints))?
            .filter_map(Result::ok)
            .map(|info| info.sockaddr)
            .collect();
        Ok(addrs)
    });

    lookup
        .await
        .map_err(|e| ModbusError::internal(format!("resolver task failed: {}", e)))?
        .map_err(|e| ModbusError::connection(format!("Cannot resolve {}: {}", endpoint, e)))
}

/// Convert a transport failure on an open session
///
/// Once tokio-modbus reports an I/O error the framed stream is unusable.
/// A peer close surfaces as whatever `errno` held at the time (often
/// `EAGAIN` or 0), so every such error except a timeout is a reset.
fn transport_error(err: tokio_modbus::Error) -> ModbusError {
    match err {
        tokio_modbus::Error::Transport(io) if io.kind() == ErrorKind::TimedOut => io.into(),
        tokio_modbus::Error::Transport(io) => {
            let message = match (io.kind(), io.raw_os_error()) {
                (ErrorKind::WouldBlock, _) | (_, Some(0)) => "Connection closed by peer".to_string(),
                _ => io.to_string(),
            };
            ModbusError::io(ErrorKind::ConnectionReset, message)
        }
        other => other.into(),
    }
}

/// Run one request future under the response timeout and flatten the
/// transport/exception result layers
async fn finish<T, F>(
    limit: Duration,
    operation: &str,
    function: u8,
    request: F,
) -> ModbusResult<T>
where
    F: Future<Output = tokio_modbus::Result<T>>,
{
    match timeout(limit, request).await {
        Err(_) => Err(ModbusError::timeout(operation, limit.as_millis() as u64)),
        Ok(Err(err)) => Err(transport_error(err)),
        Ok(Ok(Err(exception))) => Err(ModbusError::exception(function, u8::from(exception))),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

#[async_trait]
impl SlaveSession for TcpSession {
    async fn connect(&mut self, limit: Duration) -> ModbusResult<()> {
        self.timeout = limit;
        if let Some(mut ctx) = self.ctx.take() {
            let _ = ctx.disconnect().await;
        }

        let timeout_ms = self.timeout_ms();
        let addrs = timeout(limit, resolve_endpoint(&self.host, &self.service))
            .await
            .map_err(|_| ModbusError::timeout(format!("resolve {}", self.host), timeout_ms))??;

        let mut last_error = None;
        for addr in addrs {
            match timeout(limit, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    self.ctx = Some(tcp::attach_slave(stream, self.slave));
                    self.stats.connects += 1;
                    debug!(host = %self.host, service = %self.service, %addr, "session connected");
                    return Ok(());
                }
                Ok(Err(e)) => last_error = Some(ModbusError::connection(e.to_string())),
                Err(_) => {
                    last_error = Some(ModbusError::timeout(format!("connect to {}", addr), timeout_ms))
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ModbusError::connection(format!("{} resolved to no address", self.host))
        }))
    }

    fn set_slave(&mut self, slave_id: SlaveId) {
        self.slave = Slave(slave_id);
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.set_slave(self.slave);
        }
    }

    async fn read_01(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        let limit = self.timeout;
        let result = match self.context() {
            Ok(ctx) => finish(limit, "read coils", 0x01, ctx.read_coils(address, quantity)).await,
            Err(e) => Err(e),
        };
        self.record("read coils", &result);
        result
    }

    async fn read_02(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        let limit = self.timeout;
        let result = match self.context() {
            Ok(ctx) => {
                finish(limit, "read discrete inputs", 0x02, ctx.read_discrete_inputs(address, quantity)).await
            }
            Err(e) => Err(e),
        };
        self.record("read discrete inputs", &result);
        result
    }

    async fn read_03(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let limit = self.timeout;
        let result = match self.context() {
            Ok(ctx) => {
                finish(limit, "read holding registers", 0x03, ctx.read_holding_registers(address, quantity)).await
            }
            Err(e) => Err(e),
        };
        self.record("read holding registers", &result);
        result
    }

    async fn read_04(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let limit = self.timeout;
        let result = match self.context() {
            Ok(ctx) => {
                finish(limit, "read input registers", 0x04, ctx.read_input_registers(address, quantity)).await
            }
            Err(e) => Err(e),
        };
        self.record("read input registers", &result);
        result
    }

    async fn write_05(&mut self, address: u16, value: bool) -> ModbusResult<()> {
        let limit = self.timeout;
        let result = match self.context() {
            Ok(ctx) => finish(limit, "write single coil", 0x05, ctx.write_single_coil(address, value)).await,
            Err(e) => Err(e),
        };
        self.record("write single coil", &result);
        result
    }

    async fn write_06(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        let limit = self.timeout;
        let result = match self.context() {
            Ok(ctx) => {
                finish(limit, "write single register", 0x06, ctx.write_single_register(address, value)).await
            }
            Err(e) => Err(e),
        };
        self.record("write single register", &result);
        result
    }

    async fn write_0f(&mut self, address: u16, values: &[bool]) -> ModbusResult<()> {
        let limit = self.timeout;
        let result = match self.context() {
            Ok(ctx) => {
                finish(limit, "write multiple coils", 0x0F, ctx.write_multiple_coils(address, values)).await
            }
            Err(e) => Err(e),
        };
        self.record("write multiple coils", &result);
        result
    }

    async fn write_10(&mut self, address: u16, values: &[u16]) -> ModbusResult<()> {
        let limit = self.timeout;
        let result = match self.context() {
            Ok(ctx) => {
                finish(limit, "write multiple registers", 0x10, ctx.write_multiple_registers(address, values)).await
            }
            Err(e) => Err(e),
        };
        self.record("write multiple registers", &result);
        result
    }

    fn is_open(&self) -> bool {
        self.ctx.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut ctx) = self.ctx.take() {
            ctx.disconnect().await?;
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
