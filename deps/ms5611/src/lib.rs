//! A platform agnostic driver to interface with the MS5611 barometric
//! pressure sensor.
//!
//! The sensor is uncompensated in hardware: it delivers raw 24-bit pressure
//! and temperature conversions plus six factory calibration coefficients in
//! PROM. This driver runs the full second-order compensation from the
//! datasheet in 64-bit integer arithmetic, so results are bit-exact and
//! reproducible across platforms.

#![no_std]

use embedded_hal_async::delay::DelayNs;

use regbus::{BusError, RegisterBus};

#[allow(unused_imports)]
#[cfg(target_os = "none")]
use defmt::{debug, error, info, warn};
#[allow(unused_imports)]
#[cfg(not(target_os = "none"))]
use log::{debug, error, info, warn};

/// Bus address with the CSB pin pulled low.
pub const ADDRESS: u8 = 0x77;

const CMD_RESET: u8 = 0x1E;
const CMD_CONVERT_D1: u8 = 0x40;
const CMD_CONVERT_D2: u8 = 0x50;
const CMD_ADC_READ: u8 = 0x00;
/// PROM words C1..C6 live at 0xA2..0xAC; 0xA0 is factory data and 0xAE
/// holds the serial/CRC word, neither enters the compensation.
const PROM_BASE: u8 = 0xA2;

/// Standard sea-level pressure, Pa.
pub const SEA_LEVEL_PRESSURE: f32 = 101325.0;

/// Oversampling ratio for one conversion. Higher ratios reduce ADC noise
/// and roughly double the conversion time per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Osr {
    Osr256,
    Osr512,
    Osr1024,
    Osr2048,
    Osr4096,
}

impl Osr {
    fn command_bits(self) -> u8 {
        match self {
            Osr::Osr256 => 0x00,
            Osr::Osr512 => 0x02,
            Osr::Osr1024 => 0x04,
            Osr::Osr2048 => 0x06,
            Osr::Osr4096 => 0x08,
        }
    }

    /// Worst-case conversion time from the datasheet, with margin.
    pub fn settle_time_us(self) -> u32 {
        match self {
            Osr::Osr256 => 600,
            Osr::Osr512 => 1170,
            Osr::Osr1024 => 2280,
            Osr::Osr2048 => 4540,
            Osr::Osr4096 => 9040,
        }
    }
}

/// One compensated measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaroSample {
    /// Pressure in Pa.
    pub pressure: i32,
    /// Temperature in centi-degrees Celsius (2007 is 20.07 C), the
    /// compensation's native fixed-point resolution.
    pub temperature: i32,
}

impl BaroSample {
    pub fn temperature_celsius(&self) -> f32 {
        self.temperature as f32 / 100.0
    }
}

/// Factory calibration coefficients C1..C6 read from PROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    coefficients: [u16; 6],
}

impl Calibration {
    pub fn new(coefficients: [u16; 6]) -> Self {
        Self { coefficients }
    }

    /// Datasheet compensation of raw pressure `d1` and temperature `d2`.
    ///
    /// All intermediates are i64 with truncating division. Below 20 C the
    /// second-order temperature correction applies, and below -15 C an
    /// additional very-low-temperature term on top of that.
    pub fn compensate(&self, d1: u32, d2: u32) -> BaroSample {
        let c = &self.coefficients;

        let dt = d2 as i64 - ((c[4] as i64) << 8);
        let mut temp = 2000 + dt * c[5] as i64 / (1i64 << 23);
        let mut off = ((c[1] as i64) << 16) + c[3] as i64 * dt / (1i64 << 7);
        let mut sens = ((c[0] as i64) << 15) + c[2] as i64 * dt / (1i64 << 8);

        if temp < 2000 {
            let t2 = dt * dt / (1i64 << 31);
            let dev = temp - 2000;
            let mut off2 = 5 * dev * dev / 2;
            let mut sens2 = 5 * dev * dev / 4;
            if temp < -1500 {
                let dev = temp + 1500;
                off2 += 7 * dev * dev;
                sens2 += 11 * dev * dev / 2;
            }
            temp -= t2;
            off -= off2;
            sens -= sens2;
        }

        let pressure = (d1 as i64 * sens / (1i64 << 21) - off) / (1i64 << 15);
        BaroSample {
            pressure: pressure as i32,
            temperature: temp as i32,
        }
    }
}

/// Barometric altitude above standard sea level, in meters.
pub fn altitude(pressure_pa: f32) -> f32 {
    44330.0 * (1.0 - libm::powf(pressure_pa / SEA_LEVEL_PRESSURE, 1.0 / 5.255))
}

/// `MS5611` driver
#[derive(Debug)]
pub struct Ms5611<Bus, Delay> {
    bus: Bus,
    delay: Delay,
    osr: Osr,
    calibration: Calibration,
}

impl<Bus: RegisterBus, Delay: DelayNs> Ms5611<Bus, Delay> {
    /// Reset the sensor and load its calibration PROM.
    ///
    /// The delay is owned because every measurement has to wait out the
    /// conversion time before touching the ADC; reading it early corrupts
    /// the conversion in progress.
    pub async fn new(
        bus: Bus,
        delay: Delay,
        osr: Osr,
    ) -> Result<Self, BusError<Bus::Error>> {
        let mut dev = Self {
            bus,
            delay,
            osr,
            calibration: Calibration::new([0; 6]),
        };

        dev.bus.write_command(ADDRESS, CMD_RESET).await?;
        dev.delay.delay_ms(100).await;

        // PROM words have to be addressed one at a time, the address
        // pointer does not auto-increment across words.
        let mut coefficients = [0u16; 6];
        for (i, word) in coefficients.iter_mut().enumerate() {
            let mut buf = [0u8; 2];
            dev.bus
                .read_registers(ADDRESS, PROM_BASE + 2 * i as u8, &mut buf)
                .await?;
            *word = u16::from_be_bytes(buf);
        }
        dev.calibration = Calibration::new(coefficients);

        info!("MS5611 calibration loaded");
        Ok(dev)
    }

    /// Run one pressure and one temperature conversion and compensate.
    pub async fn measure(&mut self) -> Result<BaroSample, BusError<Bus::Error>> {
        let d1 = self.convert(CMD_CONVERT_D1).await?;
        let d2 = self.convert(CMD_CONVERT_D2).await?;
        Ok(self.calibration.compensate(d1, d2))
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    async fn convert(&mut self, command: u8) -> Result<u32, BusError<Bus::Error>> {
        self.bus
            .write_command(ADDRESS, command | self.osr.command_bits())
            .await?;
        self.delay.delay_us(self.osr.settle_time_us()).await;

        let mut buf = [0u8; 3];
        self.bus.read_registers(ADDRESS, CMD_ADC_READ, &mut buf).await?;
        Ok(u32::from_be_bytes([0, buf[0], buf[1], buf[2]]))
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec;
    use std::vec::Vec;

    use embassy_futures::block_on;
    use regbus::mock::{MockBus, Transaction};

    use super::*;

    /// Coefficients and conversions from the datasheet worked example.
    const DATASHEET_C: [u16; 6] = [40127, 36924, 23317, 23282, 33464, 28312];
    const DATASHEET_D1: u32 = 9085466;
    const DATASHEET_D2: u32 = 8569150;

    #[derive(Debug)]
    struct RecordingDelay {
        us: Vec<u32>,
    }

    impl DelayNs for RecordingDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.us.push(ns / 1000);
        }
    }

    fn scripted_sensor(c: [u16; 6], osr: Osr) -> Ms5611<MockBus, RecordingDelay> {
        let mut bus = MockBus::new();
        for word in c {
            bus.queue_read(&word.to_be_bytes());
        }
        let delay = RecordingDelay { us: Vec::new() };
        block_on(Ms5611::new(bus, delay, osr)).unwrap()
    }

    fn queue_conversions(dev: &mut Ms5611<MockBus, RecordingDelay>, d1: u32, d2: u32) {
        dev.bus.queue_read(&d1.to_be_bytes()[1..]);
        dev.bus.queue_read(&d2.to_be_bytes()[1..]);
    }

    #[test]
    fn datasheet_worked_example() {
        let mut dev = scripted_sensor(DATASHEET_C, Osr::Osr1024);
        queue_conversions(&mut dev, DATASHEET_D1, DATASHEET_D2);

        let sample = block_on(dev.measure()).unwrap();
        assert_eq!(sample.pressure, 100009);
        assert_eq!(sample.temperature, 2007);
        assert!((sample.temperature_celsius() - 20.07).abs() < 1e-4);
    }

    #[test]
    fn compensation_is_deterministic() {
        let cal = Calibration::new(DATASHEET_C);
        let a = cal.compensate(DATASHEET_D1, DATASHEET_D2);
        let b = cal.compensate(DATASHEET_D1, DATASHEET_D2);
        assert_eq!(a, b);
    }

    // C3 = C4 = 0 so OFF and SENS stay hand-computable; C5 = 32768 puts the
    // temperature reference at D2 = 8388608 and C6 = 16384 makes one count
    // of dT worth 1/512 centidegree.
    const FLAT_C: [u16; 6] = [40960, 36864, 0, 0, 32768, 16384];

    #[test]
    fn second_order_correction_below_twenty_degrees() {
        let cal = Calibration::new(FLAT_C);

        // dT = -1024000 -> first-order TEMP = 0 C
        // T2 = dT^2 / 2^31 = 488, OFF2 = 10_000_000, SENS2 = 5_000_000
        let sample = cal.compensate(8_388_608, 7_364_608);
        assert_eq!(sample.temperature, -488);
        assert_eq!(sample.pressure, 89_806);
    }

    #[test]
    fn very_low_temperature_tier_below_minus_fifteen() {
        let cal = Calibration::new(FLAT_C);

        // dT = -2048000 -> first-order TEMP = -20 C, inside the extra tier:
        // T2 = 1953, OFF2 = 40_000_000 + 7 * 500^2,
        // SENS2 = 20_000_000 + 11 * 500^2 / 2
        let sample = cal.compensate(8_388_608, 6_340_608);
        assert_eq!(sample.temperature, -3953);
        assert_eq!(sample.pressure, 88_776);
    }

    #[test]
    fn warm_readings_skip_the_correction() {
        let cal = Calibration::new(FLAT_C);

        // dT = 0 lands exactly on 20.00 C, which is not "below 20 C"
        let sample = cal.compensate(8_388_608, 8_388_608);
        assert_eq!(sample.temperature, 2000);
        // P = (2^23 * C1 * 2^15 / 2^21 - C2 * 2^16) / 2^15
        assert_eq!(sample.pressure, 4 * 40960 - 2 * 36864);
    }

    #[test]
    fn correction_activates_only_below_twenty_degrees() {
        let cal = Calibration::new(FLAT_C);
        // with C3 = C4 = 0 the first-order pressure is independent of dT,
        // so any deviation is the second-order path firing
        let first_order = 4 * 40960 - 2 * 36864;

        for d2 in [8_388_608u32, 8_388_608 + 512, 9_000_000, 12_000_000] {
            let sample = cal.compensate(8_388_608, d2);
            assert!(sample.temperature >= 2000);
            assert_eq!(sample.pressure, first_order);
        }
        for d2 in [7_364_608u32, 6_340_608, 5_000_000] {
            let sample = cal.compensate(8_388_608, d2);
            assert!(sample.temperature < 2000);
            assert_ne!(sample.pressure, first_order);
        }
    }

    #[test]
    fn settle_time_doubles_with_the_oversampling_ratio() {
        let ratios = [Osr::Osr256, Osr::Osr512, Osr::Osr1024, Osr::Osr2048, Osr::Osr4096];
        for pair in ratios.windows(2) {
            let (lo, hi) = (pair[0].settle_time_us(), pair[1].settle_time_us());
            assert!(hi > lo);
            let ratio = hi as f32 / lo as f32;
            assert!((1.9..=2.1).contains(&ratio), "{} -> {}", lo, hi);
        }
    }

    #[test]
    fn startup_reads_each_prom_word_separately() {
        let dev = scripted_sensor(DATASHEET_C, Osr::Osr256);

        let mut expected = vec![Transaction::WriteCommand {
            addr: ADDRESS,
            reg: CMD_RESET,
        }];
        for i in 0..6u8 {
            expected.push(Transaction::ReadRegisters {
                addr: ADDRESS,
                reg: PROM_BASE + 2 * i,
                len: 2,
            });
        }
        assert_eq!(dev.bus.log(), &expected[..]);
        assert_eq!(dev.calibration, Calibration::new(DATASHEET_C));
    }

    #[test]
    fn measurement_interleaves_conversions_and_settle_waits() {
        let mut dev = scripted_sensor(DATASHEET_C, Osr::Osr4096);
        queue_conversions(&mut dev, DATASHEET_D1, DATASHEET_D2);
        block_on(dev.measure()).unwrap();

        let commands: Vec<_> = dev
            .bus
            .log()
            .iter()
            .skip(7) // reset + PROM
            .cloned()
            .collect();
        assert_eq!(
            commands,
            vec![
                Transaction::WriteCommand { addr: ADDRESS, reg: 0x48 },
                Transaction::ReadRegisters { addr: ADDRESS, reg: 0x00, len: 3 },
                Transaction::WriteCommand { addr: ADDRESS, reg: 0x58 },
                Transaction::ReadRegisters { addr: ADDRESS, reg: 0x00, len: 3 },
            ]
        );
        // startup settle plus one conversion wait per channel
        assert_eq!(dev.delay.us, vec![100_000, 9040, 9040]);
    }

    #[test]
    fn reset_failures_abort_startup() {
        let mut bus = MockBus::new();
        bus.fail_writes(4);
        let delay = RecordingDelay { us: Vec::new() };
        let err = block_on(Ms5611::new(bus, delay, Osr::Osr256)).unwrap_err();
        assert_eq!(err, BusError::Transmission(4));
    }

    #[test]
    fn truncated_adc_reads_surface_short_read() {
        let mut dev = scripted_sensor(DATASHEET_C, Osr::Osr1024);
        dev.bus.queue_short_read(1);

        let err = block_on(dev.measure()).unwrap_err();
        assert_eq!(
            err,
            BusError::ShortRead {
                expected: 3,
                actual: 1
            }
        );
    }

    #[test]
    fn altitude_is_zero_at_sea_level_and_falls_with_pressure() {
        assert!(altitude(SEA_LEVEL_PRESSURE).abs() < 0.1);

        let pressures = [120000.0, 101325.0, 100009.0, 89806.0, 70000.0, 54000.0, 30000.0, 10000.0];
        for pair in pressures.windows(2) {
            assert!(altitude(pair[1]) > altitude(pair[0]));
        }

        // ~8.3 m per hPa near sea level
        let gradient = altitude(101225.0) - altitude(101325.0);
        assert!((7.0..10.0).contains(&gradient));
    }
}
