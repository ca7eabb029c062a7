#[allow(unused_imports)]
use defmt::{debug, error, info, warn};

use embassy_nrf::peripherals::TWISPI0;
use embassy_nrf::twim::{self, Twim};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Delay;

use mpu6500::{Mpu6500, Mpu6500Error};
use ms5611::{Ms5611, Osr};
use regbus::{BusError, I2cBus};

use super::{BarometricSensor, InertialSensor};

pub type SensorBus = Mutex<CriticalSectionRawMutex, Twim<'static, TWISPI0>>;

pub type InertialSensorType = Mpu6500<TwimDevice>;
pub type InertialSensorError = Mpu6500Error<BusError<twim::Error>>;
pub type BarometricSensorType = Ms5611<TwimDevice, Delay>;
pub type BarometricSensorError = BusError<twim::Error>;

pub type StorageType = super::RamStorage<{ 64 * 1024 }>;

/// Internal sensor rate; the acquisition loop paces itself well below this,
/// so data-ready is always fresh.
const INERTIAL_RATE_HZ: u16 = 1000;
const BARO_OSR: Osr = Osr::Osr1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    Inertial,
    Barometric,
}

pub async fn init_sensors(
    bus: &'static SensorBus,
) -> Result<(InertialSensorType, BarometricSensorType), InitError> {
    let inertial = match Mpu6500::new(TwimDevice::new(bus), INERTIAL_RATE_HZ, &mut Delay).await {
        Ok(dev) => dev,
        Err(_) => {
            error!("mpu6500 init failed");
            return Err(InitError::Inertial);
        }
    };

    let barometric = match Ms5611::new(TwimDevice::new(bus), Delay, BARO_OSR).await {
        Ok(dev) => dev,
        Err(_) => {
            error!("ms5611 init failed");
            return Err(InitError::Barometric);
        }
    };

    Ok((inertial, barometric))
}

pub fn storage() -> StorageType {
    super::RamStorage::new(1024)
}

/// One peripheral's view of the shared TWIM bus.
///
/// TWIM has no standalone write-without-stop, so a held register select is
/// deferred and folded into the following read as a single write_read under
/// one lock acquisition. Nothing else can take the bus in between, which
/// keeps the select-then-read pair atomic.
pub struct TwimDevice {
    bus: &'static SensorBus,
    pending_register: Option<u8>,
}

impl TwimDevice {
    pub fn new(bus: &'static SensorBus) -> Self {
        Self {
            bus,
            pending_register: None,
        }
    }
}

impl I2cBus for TwimDevice {
    type Error = twim::Error;

    async fn write(
        &mut self,
        addr: u8,
        bytes: &[u8],
        release_bus: bool,
    ) -> Result<(), twim::Error> {
        if !release_bus {
            self.pending_register = bytes.first().copied();
            return Ok(());
        }
        let mut twim = self.bus.lock().await;
        twim.write(addr, bytes).await
    }

    async fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, twim::Error> {
        let mut twim = self.bus.lock().await;
        match self.pending_register.take() {
            Some(reg) => twim.write_read(addr, &[reg], buf).await?,
            None => twim.read(addr, buf).await?,
        }
        // TWIM transfers are DMA-length-exact; anything less errors out
        Ok(buf.len())
    }
}

impl InertialSensor<InertialSensorError> for InertialSensorType {
    async fn data_ready(&mut self) -> Result<bool, InertialSensorError> {
        Ok(Mpu6500::data_ready(self).await?)
    }

    async fn read_sample(&mut self) -> Result<mpu6500::InertialSample, InertialSensorError> {
        Ok(Mpu6500::read_sample(self).await?)
    }
}

impl BarometricSensor<BarometricSensorError> for BarometricSensorType {
    async fn measure(&mut self) -> Result<ms5611::BaroSample, BarometricSensorError> {
        Ms5611::measure(self).await
    }
}
