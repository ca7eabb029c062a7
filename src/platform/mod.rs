#[cfg(target_os = "none")]
mod embedded;
#[cfg(target_os = "none")]
pub use embedded::*;

#[cfg(not(target_os = "none"))]
mod native;
#[cfg(not(target_os = "none"))]
pub use native::*;

use mpu6500::InertialSample;
use ms5611::BaroSample;

pub trait InertialSensor<E> {
    async fn data_ready(&mut self) -> Result<bool, E>;
    async fn read_sample(&mut self) -> Result<InertialSample, E>;
}

pub trait BarometricSensor<E> {
    async fn measure(&mut self) -> Result<BaroSample, E>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageCapacity {
    pub used: u32,
    pub total: u32,
    pub block_size: u32,
}

/// Append-only persistence for the telemetry stream. One logical data set
/// at a time; `remove` discards it entirely.
pub trait Storage {
    type Error;

    async fn append(&mut self, data: &[u8]) -> Result<(), Self::Error>;
    async fn read_at(&mut self, offset: u32, buffer: &mut [u8]) -> Result<(), Self::Error>;
    async fn remove(&mut self) -> Result<(), Self::Error>;
    async fn exists(&mut self) -> bool;
    async fn capacity(&mut self) -> Result<StorageCapacity, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamStorageError {
    Full,
    OutOfBounds,
}

/// Fixed-size in-memory backend. Serves deployments without any backing
/// store and doubles as the store's test double.
pub struct RamStorage<const N: usize> {
    data: [u8; N],
    used: usize,
    present: bool,
    block_size: u32,
}

impl<const N: usize> RamStorage<N> {
    pub fn new(block_size: u32) -> Self {
        Self {
            data: [0; N],
            used: 0,
            present: false,
            block_size,
        }
    }
}

impl<const N: usize> Storage for RamStorage<N> {
    type Error = RamStorageError;

    async fn append(&mut self, data: &[u8]) -> Result<(), RamStorageError> {
        if self.used + data.len() > N {
            return Err(RamStorageError::Full);
        }
        self.data[self.used..self.used + data.len()].copy_from_slice(data);
        self.used += data.len();
        self.present = true;
        Ok(())
    }

    async fn read_at(&mut self, offset: u32, buffer: &mut [u8]) -> Result<(), RamStorageError> {
        let offset = offset as usize;
        if offset + buffer.len() > self.used {
            return Err(RamStorageError::OutOfBounds);
        }
        buffer.copy_from_slice(&self.data[offset..offset + buffer.len()]);
        Ok(())
    }

    async fn remove(&mut self) -> Result<(), RamStorageError> {
        self.used = 0;
        self.present = false;
        Ok(())
    }

    async fn exists(&mut self) -> bool {
        self.present
    }

    async fn capacity(&mut self) -> Result<StorageCapacity, RamStorageError> {
        Ok(StorageCapacity {
            used: self.used as u32,
            total: N as u32,
            block_size: self.block_size,
        })
    }
}
