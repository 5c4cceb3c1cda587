//! Scripted sessions for unit tests
//!
//! A [`MockSession`] keeps a small in-memory register and coil map and
//! shares a [`MockSlave`] with the test, which counts calls and injects
//! failures.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ErrorClass, ModbusError, ModbusResult};
use crate::protocol::SlaveId;
use crate::transport::{SessionFactory, SlaveSession, TransportStats};

/// Size of the mock register and coil maps
pub const MOCK_MAP_SIZE: usize = 256;

/// Test-side view of a mock session
#[derive(Debug)]
pub struct MockSlave {
    connects: AtomicUsize,
    io_calls: AtomicUsize,
    slave: AtomicU8,
    connect_failure: Mutex<Option<ModbusError>>,
    connect_delay: Mutex<Duration>,
    io_failures: Mutex<VecDeque<ModbusError>>,
    last_timeout: Mutex<Option<Duration>>,
    registers: Mutex<Vec<u16>>,
    coils: Mutex<Vec<bool>>,
}

impl MockSlave {
    fn new() -> Self {
        Self {
            connects: AtomicUsize::new(0),
            io_calls: AtomicUsize::new(0),
            slave: AtomicU8::new(1),
            connect_failure: Mutex::new(None),
            connect_delay: Mutex::new(Duration::ZERO),
            io_failures: Mutex::new(VecDeque::new()),
            last_timeout: Mutex::new(None),
            registers: Mutex::new((0..MOCK_MAP_SIZE as u16).collect()),
            coils: Mutex::new(vec![false; MOCK_MAP_SIZE]),
        }
    }

    /// Number of connect attempts
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of read/write calls
    pub fn io_calls(&self) -> usize {
        self.io_calls.load(Ordering::SeqCst)
    }

    pub fn slave(&self) -> SlaveId {
        self.slave.load(Ordering::SeqCst)
    }

    /// Timeout given to the last connect
    pub fn last_timeout(&self) -> Option<Duration> {
        *self.last_timeout.lock().unwrap()
    }

    /// Fail every connect until cleared
    pub fn fail_connects(&self, err: ModbusError) {
        *self.connect_failure.lock().unwrap() = Some(err);
    }

    pub fn clear_connect_failure(&self) {
        *self.connect_failure.lock().unwrap() = None;
    }

    /// Fail the next read/write call
    pub fn fail_next_io(&self, err: ModbusError) {
        self.io_failures.lock().unwrap().push_back(err);
    }

    pub fn register(&self, address: usize) -> u16 {
        self.registers.lock().unwrap()[address]
    }

    pub fn coil(&self, address: usize) -> bool {
        self.coils.lock().unwrap()[address]
    }

    pub fn set_coil(&self, address: usize, value: bool) {
        self.coils.lock().unwrap()[address] = value;
    }
}

/// In-memory session
#[derive(Debug)]
pub struct MockSession {
    slave: Arc<MockSlave>,
    open: bool,
    stats: TransportStats,
}

impl MockSession {
    pub fn new() -> (Self, Arc<MockSlave>) {
        let slave = Arc::new(MockSlave::new());
        (Self::with_slave(Arc::clone(&slave)), slave)
    }

    fn with_slave(slave: Arc<MockSlave>) -> Self {
        Self {
            slave,
            open: false,
            stats: TransportStats::default(),
        }
    }

    /// Common entry of every read/write: count, check the socket, apply
    /// scripted failures and the address range
    fn begin(&mut self, function: u8, address: u16, quantity: usize) -> ModbusResult<usize> {
        self.slave.io_calls.fetch_add(1, Ordering::SeqCst);
        self.stats.requests_sent += 1;

        if !self.open {
            self.stats.errors += 1;
            return Err(ModbusError::io(ErrorKind::NotConnected, "Socket is not connected"));
        }
        if let Some(err) = self.slave.io_failures.lock().unwrap().pop_front() {
            self.stats.errors += 1;
            if err.class() == ErrorClass::Reset {
                self.open = false;
            }
            return Err(err);
        }

        let start = address as usize;
        if start + quantity > MOCK_MAP_SIZE {
            self.stats.errors += 1;
            return Err(ModbusError::exception(function, 0x02));
        }
        self.stats.responses_received += 1;
        Ok(start)
    }
}

#[async_trait]
impl SlaveSession for MockSession {
    async fn connect(&mut self, timeout: Duration) -> ModbusResult<()> {
        self.slave.connects.fetch_add(1, Ordering::SeqCst);
        *self.slave.last_timeout.lock().unwrap() = Some(timeout);

        let delay = *self.slave.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.slave.connect_failure.lock().unwrap().clone() {
            self.open = false;
            return Err(err);
        }
        self.open = true;
        self.stats.connects += 1;
        Ok(())
    }

    fn set_slave(&mut self, slave_id: SlaveId) {
        self.slave.slave.store(slave_id, Ordering::SeqCst);
    }

    async fn read_01(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        let start = self.begin(0x01, address, quantity as usize)?;
        Ok(self.slave.coils.lock().unwrap()[start..start + quantity as usize].to_vec())
    }

    async fn read_02(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        let start = self.begin(0x02, address, quantity as usize)?;
        Ok(self.slave.coils.lock().unwrap()[start..start + quantity as usize].to_vec())
    }

    async fn read_03(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let start = self.begin(0x03, address, quantity as usize)?;
        Ok(self.slave.registers.lock().unwrap()[start..start + quantity as usize].to_vec())
    }

    async fn read_04(&mut self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let start = self.begin(0x04, address, quantity as usize)?;
        Ok(self.slave.registers.lock().unwrap()[start..start + quantity as usize].to_vec())
    }

    async fn write_05(&mut self, address: u16, value: bool) -> ModbusResult<()> {
        let start = self.begin(0x05, address, 1)?;
        self.slave.coils.lock().unwrap()[start] = value;
        Ok(())
    }

    async fn write_06(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        let start = self.begin(0x06, address, 1)?;
        self.slave.registers.lock().unwrap()[start] = value;
        Ok(())
    }

    async fn write_0f(&mut self, address: u16, values: &[bool]) -> ModbusResult<()> {
        let start = self.begin(0x0F, address, values.len())?;
        self.slave.coils.lock().unwrap()[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }

    async fn write_10(&mut self, address: u16, values: &[u16]) -> ModbusResult<()> {
        let start = self.begin(0x10, address, values.len())?;
        self.slave.registers.lock().unwrap()[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.open = false;
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Factory handing out [`MockSession`]s and keeping their slaves
#[derive(Debug, Default)]
pub struct MockFactory {
    slaves: Mutex<Vec<Arc<MockSlave>>>,
    fail_allocation: AtomicBool,
    connect_failure: Mutex<Option<ModbusError>>,
    connect_delay: Mutex<Duration>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions_created(&self) -> usize {
        self.slaves.lock().unwrap().len()
    }

    /// Backing slave of the n-th created session
    pub fn slave(&self, index: usize) -> Arc<MockSlave> {
        Arc::clone(&self.slaves.lock().unwrap()[index])
    }

    pub fn fail_allocation(&self, fail: bool) {
        self.fail_allocation.store(fail, Ordering::SeqCst);
    }

    /// Sessions created from now on fail to connect
    pub fn fail_connects(&self, err: ModbusError) {
        *self.connect_failure.lock().unwrap() = Some(err);
    }

    /// Sessions created from now on take `delay` to connect
    pub fn delay_connects(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }
}

impl SessionFactory for MockFactory {
    fn create(&self, host: &str, service: &str) -> ModbusResult<Box<dyn SlaveSession>> {
        if self.fail_allocation.load(Ordering::SeqCst) {
            return Err(ModbusError::allocation(format!(
                "no session available for {}:{}",
                host, service
            )));
        }

        let slave = Arc::new(MockSlave::new());
        if let Some(err) = self.connect_failure.lock().unwrap().clone() {
            slave.fail_connects(err);
        }
        *slave.connect_delay.lock().unwrap() = *self.connect_delay.lock().unwrap();

        self.slaves.lock().unwrap().push(Arc::clone(&slave));
        Ok(Box::new(MockSession::with_slave(slave)))
    }
}
