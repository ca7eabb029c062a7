use std::convert::Infallible;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

#[allow(unused_imports)]
use log::{debug, error, info, warn};

use embassy_time::Instant;
use libm::sinf;

use mpu6500::{InertialSample, GRAVITATIONAL_ACCELERATION};
use ms5611::BaroSample;

use super::{BarometricSensor, InertialSensor, Storage, StorageCapacity};

pub type InertialSensorType = SimInertialSensor;
pub type InertialSensorError = Infallible;
pub type BarometricSensorType = SimBarometricSensor;
pub type BarometricSensorError = Infallible;

#[cfg(not(feature = "ram-storage"))]
pub type StorageType = FileStorage;
#[cfg(feature = "ram-storage")]
pub type StorageType = super::RamStorage<{ 64 * 1024 }>;

pub type InitError = Infallible;

/// The host build has no bus hardware; the simulated sensors synthesize
/// their own signals.
pub struct SensorBus;

pub async fn init_sensors(
    _bus: &'static SensorBus,
) -> Result<(InertialSensorType, BarometricSensorType), InitError> {
    Ok((SimInertialSensor::new(), SimBarometricSensor::new()))
}

#[cfg(not(feature = "ram-storage"))]
pub fn storage() -> StorageType {
    FileStorage::new()
}

#[cfg(feature = "ram-storage")]
pub fn storage() -> StorageType {
    super::RamStorage::new(1024)
}

/// Slow tumble on the gyro, gravity plus a wobble on the accelerometer.
pub struct SimInertialSensor {
    started: Instant,
}

impl SimInertialSensor {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl InertialSensor<InertialSensorError> for SimInertialSensor {
    async fn data_ready(&mut self) -> Result<bool, InertialSensorError> {
        Ok(true)
    }

    async fn read_sample(&mut self) -> Result<InertialSample, InertialSensorError> {
        let t = self.started.elapsed().as_millis() as f32 / 1000.0;
        Ok(InertialSample {
            gyro: [0.2 * sinf(t), 0.1 * sinf(t * 0.7), 0.05 * sinf(t * 1.3)],
            accel: [
                0.5 * sinf(t * 2.0),
                0.5 * sinf(t * 2.3),
                GRAVITATIONAL_ACCELERATION + 0.3 * sinf(t * 1.7),
            ],
        })
    }
}

/// Pressure swings a few kPa around standard sea level, a few hundred
/// meters of apparent altitude.
pub struct SimBarometricSensor {
    started: Instant,
}

impl SimBarometricSensor {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl BarometricSensor<BarometricSensorError> for SimBarometricSensor {
    async fn measure(&mut self) -> Result<BaroSample, BarometricSensorError> {
        let t = self.started.elapsed().as_millis() as f32 / 1000.0;
        Ok(BaroSample {
            pressure: (101325.0 - 3000.0 * sinf(t * 0.1)) as i32,
            temperature: 2200,
        })
    }
}

const STORAGE_TOTAL: u32 = 1 << 20;
const STORAGE_BLOCK: u32 = 8192;

/// Telemetry file in the system temp directory. Opened per operation so a
/// crash never leaves a stale handle behind.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new() -> Self {
        Self {
            path: env::temp_dir().join("rocket_telemetry.bin"),
        }
    }
}

impl Storage for FileStorage {
    type Error = std::io::Error;

    async fn append(&mut self, data: &[u8]) -> Result<(), std::io::Error> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(data)
    }

    async fn read_at(&mut self, offset: u32, buffer: &mut [u8]) -> Result<(), std::io::Error> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.read_exact(buffer)
    }

    async fn remove(&mut self) -> Result<(), std::io::Error> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    async fn exists(&mut self) -> bool {
        self.path.exists()
    }

    async fn capacity(&mut self) -> Result<StorageCapacity, std::io::Error> {
        let used = match fs::metadata(&self.path) {
            Ok(meta) => meta.len() as u32,
            Err(_) => 0,
        };
        Ok(StorageCapacity {
            used,
            total: STORAGE_TOTAL,
            block_size: STORAGE_BLOCK,
        })
    }
}
