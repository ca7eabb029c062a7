use core::sync::atomic::{AtomicU16, Ordering};

#[allow(unused_imports)]
#[cfg(target_os = "none")]
use defmt::{debug, error, info, warn};
#[allow(unused_imports)]
#[cfg(not(target_os = "none"))]
use log::{debug, error, info, warn};

use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Instant, Timer};

use super::platform::{self, BarometricSensor, InertialSensor};
use super::store::{TelemetryRecord, TelemetryStore};

pub const MAX_SAMPLE_RATE_HZ: u16 = 200;
pub const DEFAULT_SAMPLE_RATE_HZ: u16 = 100;

static SAMPLE_RATE_HZ: AtomicU16 = AtomicU16::new(DEFAULT_SAMPLE_RATE_HZ);

/// Takes effect on the next tick. Out-of-range values are clamped, not
/// rejected.
pub fn set_sample_rate(hz: u16) {
    SAMPLE_RATE_HZ.store(clamp_rate(hz), Ordering::Relaxed);
}

pub fn sample_rate() -> u16 {
    SAMPLE_RATE_HZ.load(Ordering::Relaxed)
}

fn clamp_rate(hz: u16) -> u16 {
    hz.clamp(1, MAX_SAMPLE_RATE_HZ)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Sleep for the given microseconds to hold the target rate.
    Sleep(u64),
    /// The tick overran its slot. Yield once anyway so lower-priority work
    /// is never starved, then start the next tick immediately.
    Yield,
}

pub fn pace(elapsed_us: u64, target_us: u64) -> Pacing {
    if elapsed_us < target_us {
        Pacing::Sleep(target_us - elapsed_us)
    } else {
        Pacing::Yield
    }
}

pub type SharedStore = Mutex<CriticalSectionRawMutex, TelemetryStore<platform::StorageType>>;

#[embassy_executor::task]
pub async fn sampling_task(bus: &'static platform::SensorBus, store: &'static SharedStore) -> ! {
    loop {
        match platform::init_sensors(bus).await {
            Ok((mut inertial, mut barometric)) => {
                info!("sensors up, sampling at {} Hz", sample_rate());
                run_acquisition(&mut inertial, &mut barometric, store).await
            }
            Err(_) => {
                error!("sensor bring-up failed, retrying");
                Timer::after_secs(1).await;
            }
        }
    }
}

async fn run_acquisition<IE, BE>(
    inertial: &mut impl InertialSensor<IE>,
    barometric: &mut impl BarometricSensor<BE>,
    store: &'static SharedStore,
) -> ! {
    loop {
        let target_us = 1_000_000 / sample_rate() as u64;
        let started = Instant::now();

        // a failed tick is dropped, the loop keeps its cadence
        let _ = acquire_once(inertial, barometric, store).await;

        match pace(started.elapsed().as_micros(), target_us) {
            Pacing::Sleep(us) => Timer::after_micros(us).await,
            Pacing::Yield => yield_now().await,
        }
    }
}

async fn acquire_once<IE, BE>(
    inertial: &mut impl InertialSensor<IE>,
    barometric: &mut impl BarometricSensor<BE>,
    store: &'static SharedStore,
) -> Result<(), ()> {
    let ready = match inertial.data_ready().await {
        Ok(ready) => ready,
        Err(_) => {
            error!("inertial status read failed");
            return Err(());
        }
    };
    if !ready {
        return Ok(());
    }

    let motion = match inertial.read_sample().await {
        Ok(sample) => sample,
        Err(_) => {
            error!("inertial sample read failed");
            return Err(());
        }
    };

    let baro = match barometric.measure().await {
        Ok(sample) => sample,
        Err(_) => {
            error!("barometric measurement failed");
            return Err(());
        }
    };

    let record = TelemetryRecord {
        timestamp_ms: Instant::now().as_millis() as u32,
        pressure: baro.pressure,
        gyro: motion.gyro,
        accel: motion.accel,
    };
    store.lock().await.append(&record).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacing_sleeps_out_the_remainder_of_the_slot() {
        assert_eq!(pace(2_000, 10_000), Pacing::Sleep(8_000));
        assert_eq!(pace(9_999, 10_000), Pacing::Sleep(1));
        assert_eq!(pace(0, 5_000), Pacing::Sleep(5_000));
    }

    #[test]
    fn overrun_ticks_yield_instead_of_sleeping() {
        assert_eq!(pace(10_000, 10_000), Pacing::Yield);
        assert_eq!(pace(25_000, 10_000), Pacing::Yield);
    }

    #[test]
    fn sample_rate_is_clamped_to_the_supported_range() {
        assert_eq!(clamp_rate(0), 1);
        assert_eq!(clamp_rate(1), 1);
        assert_eq!(clamp_rate(100), 100);
        assert_eq!(clamp_rate(MAX_SAMPLE_RATE_HZ), MAX_SAMPLE_RATE_HZ);
        assert_eq!(clamp_rate(MAX_SAMPLE_RATE_HZ + 1), MAX_SAMPLE_RATE_HZ);
        assert_eq!(clamp_rate(u16::MAX), MAX_SAMPLE_RATE_HZ);
    }
}
