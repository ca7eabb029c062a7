//! Scripted [`RegisterBus`] for driver tests.
//!
//! Records every transaction for verification and replays pre-programmed
//! read outcomes, in the manner of a transaction-log mock: queue the bytes
//! (or failures) a peripheral would produce, run the driver, then assert on
//! the log.

use heapless::{Deque, Vec};

use crate::{BusError, RegisterBus};

const LOG_CAPACITY: usize = 256;
const QUEUE_CAPACITY: usize = 32;

/// One logged transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    WriteCommand { addr: u8, reg: u8 },
    WriteRegisters { addr: u8, reg: u8, bytes: Vec<u8, 16> },
    ReadRegisters { addr: u8, reg: u8, len: usize },
}

#[derive(Debug, Clone)]
enum ReadOutcome {
    Bytes(Vec<u8, 16>),
    Status(u8),
    Short(usize),
}

/// Scripted register bus. Reads consume queued outcomes in order; once the
/// queue is empty every read returns `fill` bytes, so open-ended polling
/// loops can be driven to their timeout.
#[derive(Debug)]
pub struct MockBus {
    log: Vec<Transaction, LOG_CAPACITY>,
    reads: Deque<ReadOutcome, QUEUE_CAPACITY>,
    fill: u8,
    write_status: Option<u8>,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            log: Vec::new(),
            reads: Deque::new(),
            fill: 0,
            write_status: None,
        }
    }

    /// Queue the bytes the next read will return.
    pub fn queue_read(&mut self, bytes: &[u8]) {
        let mut v = Vec::new();
        v.extend_from_slice(bytes).unwrap();
        self.reads.push_back(ReadOutcome::Bytes(v)).unwrap();
    }

    /// Queue a transmission failure for the next read.
    pub fn queue_read_status(&mut self, status: u8) {
        self.reads.push_back(ReadOutcome::Status(status)).unwrap();
    }

    /// Queue a truncated response for the next read.
    pub fn queue_short_read(&mut self, actual: usize) {
        self.reads.push_back(ReadOutcome::Short(actual)).unwrap();
    }

    /// Byte returned for reads once the queue is exhausted.
    pub fn set_fill(&mut self, fill: u8) {
        self.fill = fill;
    }

    /// Make every write fail with the given bus status.
    pub fn fail_writes(&mut self, status: u8) {
        self.write_status = Some(status);
    }

    pub fn log(&self) -> &[Transaction] {
        &self.log
    }

    fn record(&mut self, transaction: Transaction) {
        // a full log only matters for assertions the test never makes
        let _ = self.log.push(transaction);
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBus for MockBus {
    type Error = u8;

    async fn write_command(&mut self, addr: u8, reg: u8) -> Result<(), BusError<u8>> {
        self.record(Transaction::WriteCommand { addr, reg });
        match self.write_status {
            Some(status) => Err(BusError::Transmission(status)),
            None => Ok(()),
        }
    }

    async fn write_registers(
        &mut self,
        addr: u8,
        reg: u8,
        bytes: &[u8],
    ) -> Result<(), BusError<u8>> {
        let mut v = Vec::new();
        v.extend_from_slice(bytes).unwrap();
        self.record(Transaction::WriteRegisters { addr, reg, bytes: v });
        match self.write_status {
            Some(status) => Err(BusError::Transmission(status)),
            None => Ok(()),
        }
    }

    async fn read_registers(
        &mut self,
        addr: u8,
        reg: u8,
        buf: &mut [u8],
    ) -> Result<(), BusError<u8>> {
        self.record(Transaction::ReadRegisters {
            addr,
            reg,
            len: buf.len(),
        });
        match self.reads.pop_front() {
            Some(ReadOutcome::Bytes(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(())
            }
            Some(ReadOutcome::Status(status)) => Err(BusError::Transmission(status)),
            Some(ReadOutcome::Short(actual)) => Err(BusError::ShortRead {
                expected: buf.len(),
                actual,
            }),
            None => {
                buf.fill(self.fill);
                Ok(())
            }
        }
    }
}
