//! Register-level transactions over a shared two-wire bus.
//!
//! Peripherals on the bus follow the usual register-pointer protocol: every
//! transfer starts with a write that selects a register, optionally followed
//! by payload bytes or by a repeated-start read. Platforms provide the raw
//! [`I2cBus`]; drivers are written against [`RegisterBus`], which layers the
//! register protocol and short-read detection on top.

#![no_std]
#![allow(async_fn_in_trait)]

#[allow(unused_imports)]
#[cfg(target_os = "none")]
use defmt::{debug, error, info, warn};
#[allow(unused_imports)]
#[cfg(not(target_os = "none"))]
use log::{debug, error, info, warn};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// Largest payload that can follow a register pointer in a single write.
pub const MAX_WRITE_PAYLOAD: usize = 15;

/// Error produced by a register transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError<E> {
    /// The underlying transmission failed; carries the bus status verbatim.
    Transmission(E),
    /// The peripheral acknowledged but returned fewer bytes than requested.
    ShortRead { expected: usize, actual: usize },
}

impl<E> From<E> for BusError<E> {
    fn from(err: E) -> Self {
        BusError::Transmission(err)
    }
}

/// Raw half-duplex bus access provided by the platform.
///
/// Implementations must not yield to other bus users between a write issued
/// with `release_bus == false` and the read that follows it; the pair forms
/// one transaction.
pub trait I2cBus {
    type Error;

    /// Write `bytes` to the peripheral at `addr`. When `release_bus` is
    /// false the stop condition is withheld and the next transfer begins
    /// with a repeated start.
    async fn write(&mut self, addr: u8, bytes: &[u8], release_bus: bool) -> Result<(), Self::Error>;

    /// Read into `buf` from the peripheral at `addr`, releasing the bus
    /// after. Returns the number of bytes the peripheral actually produced.
    async fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// The register transaction contract sensor drivers are written against.
pub trait RegisterBus {
    type Error;

    /// Send a bare register pointer (command byte) and release the bus.
    async fn write_command(&mut self, addr: u8, reg: u8) -> Result<(), BusError<Self::Error>>;

    /// Send a register pointer followed by payload bytes, then release the
    /// bus. `bytes` must not exceed [`MAX_WRITE_PAYLOAD`].
    async fn write_registers(
        &mut self,
        addr: u8,
        reg: u8,
        bytes: &[u8],
    ) -> Result<(), BusError<Self::Error>>;

    /// Select a register without releasing the bus, then read `buf.len()`
    /// bytes with a repeated start. Fails with [`BusError::ShortRead`] if
    /// the peripheral returns fewer bytes than requested, independent of
    /// the underlying transmission status.
    async fn read_registers(
        &mut self,
        addr: u8,
        reg: u8,
        buf: &mut [u8],
    ) -> Result<(), BusError<Self::Error>>;

    /// Write a single register value.
    async fn write_register(
        &mut self,
        addr: u8,
        reg: u8,
        value: u8,
    ) -> Result<(), BusError<Self::Error>> {
        self.write_registers(addr, reg, &[value]).await
    }

    /// Read a single register value.
    async fn read_register(&mut self, addr: u8, reg: u8) -> Result<u8, BusError<Self::Error>> {
        let mut buf = [0u8; 1];
        self.read_registers(addr, reg, &mut buf).await?;
        Ok(buf[0])
    }
}

impl<B: I2cBus> RegisterBus for B {
    type Error = B::Error;

    async fn write_command(&mut self, addr: u8, reg: u8) -> Result<(), BusError<B::Error>> {
        self.write(addr, &[reg], true).await?;
        Ok(())
    }

    async fn write_registers(
        &mut self,
        addr: u8,
        reg: u8,
        bytes: &[u8],
    ) -> Result<(), BusError<B::Error>> {
        debug_assert!(bytes.len() <= MAX_WRITE_PAYLOAD);
        let mut frame = [0u8; MAX_WRITE_PAYLOAD + 1];
        let len = bytes.len().min(MAX_WRITE_PAYLOAD);
        frame[0] = reg;
        frame[1..=len].copy_from_slice(&bytes[..len]);
        self.write(addr, &frame[..len + 1], true).await?;
        Ok(())
    }

    async fn read_registers(
        &mut self,
        addr: u8,
        reg: u8,
        buf: &mut [u8],
    ) -> Result<(), BusError<B::Error>> {
        // keep the bus so the read continues with a repeated start
        self.write(addr, &[reg], false).await?;
        let received = self.read(addr, buf).await?;
        if received != buf.len() {
            warn!("short read from {}: {} of {} bytes", addr, received, buf.len());
            return Err(BusError::ShortRead {
                expected: buf.len(),
                actual: received,
            });
        }
        Ok(())
    }
}
