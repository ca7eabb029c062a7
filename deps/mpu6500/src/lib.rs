//! A platform agnostic driver to interface with the MPU-6500 inertial
//! sensor (3-axis gyroscope + 3-axis accelerometer).
//!
//! The driver is built on top of the [`regbus`] register transaction
//! contract and converts raw register data into SI units: m/s² for the
//! accelerometer and rad/s for the gyroscope. No zero-offset calibration is
//! applied; samples are the raw converted values.

#![no_std]

use embedded_hal_async::delay::DelayNs;

use regbus::{BusError, RegisterBus};

#[allow(unused_imports)]
#[cfg(target_os = "none")]
use defmt::{debug, error, info, warn};
#[allow(unused_imports)]
#[cfg(not(target_os = "none"))]
use log::{debug, error, info, warn};

/// Fixed 7-bit bus address of the sensor.
pub const ADDRESS: u8 = 0x68;

/// The expected value of the WHO_AM_I register.
pub const DEVICE_ID: u8 = 0x70;

/// Highest sample rate the sensor divider supports, in Hz.
pub const MAX_SAMPLE_RATE_HZ: u16 = 1000;

#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum Register {
    /// Sample Rate Divider
    SMPLRT_DIV = 0x19,
    /// Interrupt Status
    INT_STATUS = 0x3A,
    /// Start of the accelerometer measurement block
    ACCEL_XOUT_H = 0x3B,
    /// Power Management 1
    PWR_MGMT_1 = 0x6B,
    /// Who Am I
    WHO_AM_I = 0x75,
}

/// PWR_MGMT_1: reset all internal registers to their defaults.
const DEVICE_RESET: u8 = 1 << 7;
/// PWR_MGMT_1: disable the temperature sensor path.
const TEMP_DIS: u8 = 1 << 3;
/// PWR_MGMT_1: auto-select the best available clock source (PLL).
const CLKSEL_PLL: u8 = 1 << 0;
/// INT_STATUS: raw sensor data ready.
const RAW_DATA_RDY: u8 = 1 << 0;

/// Reset-clear poll bound: attempts at 1 ms intervals.
const RESET_POLL_ATTEMPTS: u32 = 100;

/// Gyroscope scale factor for the ±250 °/s full-scale range, LSB/(°/s).
const GYRO_SCALE_250DPS: f32 = 131.0;
/// Accelerometer scale factor for the ±16 g full-scale range, LSB/g.
const ACCEL_SCALE_16G: f32 = 2048.0;

/// Standard gravitational acceleration, m/s² per g.
pub const GRAVITATIONAL_ACCELERATION: f32 = 9.80665;
const DEG_TO_RAD: f32 = core::f32::consts::PI / 180.0;

/// One converted measurement: angular rate in rad/s and linear
/// acceleration in m/s², X/Y/Z each.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InertialSample {
    pub gyro: [f32; 3],
    pub accel: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mpu6500Error<E> {
    Bus(E),
    /// WHO_AM_I did not match [`DEVICE_ID`].
    InvalidDeviceId,
    /// The soft-reset bit never self-cleared.
    ResetTimeout,
    /// Requested sample rate is outside 1..=[`MAX_SAMPLE_RATE_HZ`].
    UnsupportedSampleRate,
}

impl<E> From<BusError<E>> for Mpu6500Error<BusError<E>> {
    fn from(err: BusError<E>) -> Self {
        Mpu6500Error::Bus(err)
    }
}

/// `MPU-6500` driver
#[derive(Debug)]
pub struct Mpu6500<Bus> {
    bus: Bus,
    gyro_scale: f32,
    accel_scale: f32,
}

impl<Bus: RegisterBus> Mpu6500<Bus> {
    /// Create and configure the driver.
    ///
    /// Checks the device identity, soft-resets the part, wakes it with the
    /// PLL clock reference and configures the divider for `sample_rate_hz`
    /// together with ±250 °/s gyro and ±16 g accelerometer full-scale
    /// ranges. Every failure here is fatal for the boot cycle; running with
    /// a partially configured sensor would serve physically wrong data.
    pub async fn new(
        bus: Bus,
        sample_rate_hz: u16,
        delay: &mut impl DelayNs,
    ) -> Result<Self, Mpu6500Error<BusError<Bus::Error>>> {
        let mut dev = Self {
            bus,
            gyro_scale: GYRO_SCALE_250DPS,
            accel_scale: ACCEL_SCALE_16G,
        };

        let id = dev.read_reg(Register::WHO_AM_I).await?;
        if id != DEVICE_ID {
            error!("unexpected WHO_AM_I: {}", id);
            return Err(Mpu6500Error::InvalidDeviceId);
        }

        // Reset the device, then wait for the bit to self-clear. The power
        // on reset time is specified as 100 ms and a software reset behaves
        // the same.
        dev.write_reg(Register::PWR_MGMT_1, DEVICE_RESET).await?;
        delay.delay_ms(100).await;
        let mut cleared = false;
        for _ in 0..RESET_POLL_ATTEMPTS {
            if dev.read_reg(Register::PWR_MGMT_1).await? & DEVICE_RESET == 0 {
                cleared = true;
                break;
            }
            delay.delay_ms(1).await;
        }
        if !cleared {
            error!("reset bit did not clear");
            return Err(Mpu6500Error::ResetTimeout);
        }

        // Disable sleep mode, disable the temperature sensor and use the
        // PLL as clock reference.
        dev.write_reg(Register::PWR_MGMT_1, TEMP_DIS | CLKSEL_PLL).await?;

        if sample_rate_hz == 0 || sample_rate_hz > MAX_SAMPLE_RATE_HZ {
            return Err(Mpu6500Error::UnsupportedSampleRate);
        }
        // frequency = 1000 / (register + 1) Hz; the register is 8 bit, so
        // rates below 4 Hz saturate at the slowest divider
        let divider = (1000 / sample_rate_hz - 1).min(255) as u8;
        let config = [
            divider,
            0x01,    // disable FSYNC, 184 Hz gyro filtering, 1 kHz sampling
            0 << 3,  // gyro full-scale range ±250 °/s
            3 << 3,  // accelerometer full-scale range ±16 g
            0x00,    // 218.1 Hz accelerometer filtering, 1 kHz sampling
        ];
        // one batched write covering SMPLRT_DIV through ACCEL_CONFIG_2
        dev.bus
            .write_registers(ADDRESS, Register::SMPLRT_DIV as u8, &config)
            .await?;

        delay.delay_ms(10).await; // let the sensor settle before the first read

        info!("MPU-6500 configured at {} Hz", sample_rate_hz);
        Ok(dev)
    }

    /// Whether a new raw sample is waiting in the measurement registers.
    pub async fn data_ready(&mut self) -> Result<bool, BusError<Bus::Error>> {
        let status = self.bus.read_register(ADDRESS, Register::INT_STATUS as u8).await?;
        Ok(status & RAW_DATA_RDY != 0)
    }

    /// Read and convert one sample.
    ///
    /// The measurement block is 14 bytes: accelerometer X/Y/Z, die
    /// temperature (discarded) and gyroscope X/Y/Z, big-endian i16 each.
    pub async fn read_sample(&mut self) -> Result<InertialSample, BusError<Bus::Error>> {
        let mut buf = [0u8; 14];
        self.bus
            .read_registers(ADDRESS, Register::ACCEL_XOUT_H as u8, &mut buf)
            .await?;

        let word = |i: usize| i16::from_be_bytes([buf[i], buf[i + 1]]);
        let accel_raw = [word(0), word(2), word(4)];
        let gyro_raw = [word(8), word(10), word(12)];

        let mut sample = InertialSample {
            gyro: [0.0; 3],
            accel: [0.0; 3],
        };
        for axis in 0..3 {
            sample.accel[axis] =
                accel_raw[axis] as f32 / self.accel_scale * GRAVITATIONAL_ACCELERATION;
            sample.gyro[axis] = gyro_raw[axis] as f32 / self.gyro_scale * DEG_TO_RAD;
        }
        Ok(sample)
    }

    async fn read_reg(&mut self, reg: Register) -> Result<u8, BusError<Bus::Error>> {
        self.bus.read_register(ADDRESS, reg as u8).await
    }

    async fn write_reg(&mut self, reg: Register, value: u8) -> Result<(), BusError<Bus::Error>> {
        self.bus.write_register(ADDRESS, reg as u8, value).await
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec;

    use embassy_futures::block_on;
    use regbus::mock::{MockBus, Transaction};

    use super::*;

    /// Delay that completes immediately; init timing is the bus mock's job.
    struct NoopDelay;

    impl DelayNs for NoopDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    fn healthy_bus() -> MockBus {
        let mut bus = MockBus::new();
        bus.queue_read(&[DEVICE_ID]); // WHO_AM_I
        bus.queue_read(&[0x00]); // reset bit already clear
        bus
    }

    #[test]
    fn init_writes_the_documented_sequence() {
        let bus = healthy_bus();
        let mut dev = block_on(Mpu6500::new(bus, 200, &mut NoopDelay)).unwrap();

        // borrow the log back out through the driver
        let log = dev.bus.log().to_vec();
        assert_eq!(
            log,
            vec![
                Transaction::ReadRegisters { addr: ADDRESS, reg: 0x75, len: 1 },
                Transaction::WriteRegisters {
                    addr: ADDRESS,
                    reg: 0x6B,
                    bytes: heapless::Vec::from_slice(&[0x80]).unwrap(),
                },
                Transaction::ReadRegisters { addr: ADDRESS, reg: 0x6B, len: 1 },
                Transaction::WriteRegisters {
                    addr: ADDRESS,
                    reg: 0x6B,
                    bytes: heapless::Vec::from_slice(&[0x09]).unwrap(),
                },
                Transaction::WriteRegisters {
                    addr: ADDRESS,
                    reg: 0x19,
                    // 200 Hz -> divider 4; 184 Hz DLPF; ±250 °/s; ±16 g
                    bytes: heapless::Vec::from_slice(&[0x04, 0x01, 0x00, 0x18, 0x00]).unwrap(),
                },
            ]
        );

        // data-ready flag decoding
        dev.bus.queue_read(&[0x01]);
        assert!(block_on(dev.data_ready()).unwrap());
        dev.bus.queue_read(&[0x00]);
        assert!(!block_on(dev.data_ready()).unwrap());
    }

    #[test]
    fn identity_mismatch_is_fatal() {
        let mut bus = MockBus::new();
        bus.queue_read(&[0x68]); // some other part answered
        let err = block_on(Mpu6500::new(bus, 200, &mut NoopDelay)).unwrap_err();
        assert_eq!(err, Mpu6500Error::InvalidDeviceId);
    }

    #[test]
    fn reset_that_never_clears_times_out() {
        let mut bus = MockBus::new();
        bus.queue_read(&[DEVICE_ID]);
        bus.set_fill(DEVICE_RESET); // every poll still shows the reset bit
        let err = block_on(Mpu6500::new(bus, 200, &mut NoopDelay)).unwrap_err();
        assert_eq!(err, Mpu6500Error::ResetTimeout);
    }

    #[test]
    fn out_of_range_sample_rates_are_rejected() {
        for rate in [0u16, 1001, u16::MAX] {
            let bus = healthy_bus();
            let err = block_on(Mpu6500::new(bus, rate, &mut NoopDelay)).unwrap_err();
            assert_eq!(err, Mpu6500Error::UnsupportedSampleRate);
        }
    }

    #[test]
    fn bus_failures_during_init_propagate() {
        let mut bus = MockBus::new();
        bus.queue_read_status(2); // address NACK on the identity read
        let err = block_on(Mpu6500::new(bus, 200, &mut NoopDelay)).unwrap_err();
        assert_eq!(err, Mpu6500Error::Bus(BusError::Transmission(2)));
    }

    #[test]
    fn sample_conversion_matches_the_scale_factors() {
        let bus = healthy_bus();
        let mut dev = block_on(Mpu6500::new(bus, 200, &mut NoopDelay)).unwrap();

        // accel X = 16384 (8 g at ±16 g), gyro Z = -131 (-1 °/s at ±250 °/s),
        // die temperature bytes in the middle must be skipped
        let raw = [
            0x40, 0x00, // accel X
            0x00, 0x00, // accel Y
            0xF8, 0x00, // accel Z = -2048 (-1 g)
            0x7F, 0xFF, // temperature, discarded
            0x00, 0x00, // gyro X
            0x00, 0x83, // gyro Y = 131 (1 °/s)
            0xFF, 0x7D, // gyro Z = -131
        ];
        dev.bus.queue_read(&raw);
        let sample = block_on(dev.read_sample()).unwrap();

        assert_eq!(sample.accel[0], 16384.0 / 2048.0 * GRAVITATIONAL_ACCELERATION);
        assert_eq!(sample.accel[1], 0.0);
        assert_eq!(sample.accel[2], -GRAVITATIONAL_ACCELERATION);
        assert_eq!(sample.gyro[0], 0.0);
        assert_eq!(sample.gyro[1], DEG_TO_RAD);
        assert_eq!(sample.gyro[2], -DEG_TO_RAD);
    }

    #[test]
    fn truncated_sample_reads_surface_short_read() {
        let bus = healthy_bus();
        let mut dev = block_on(Mpu6500::new(bus, 200, &mut NoopDelay)).unwrap();

        dev.bus.queue_short_read(6);
        let err = block_on(dev.read_sample()).unwrap_err();
        assert_eq!(
            err,
            BusError::ShortRead {
                expected: 14,
                actual: 6
            }
        );
    }
}
