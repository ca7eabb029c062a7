#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![allow(async_fn_in_trait)]

mod platform;
mod sampling;
mod store;

use embassy_executor::Spawner;
use embassy_sync::mutex::Mutex;
use embassy_time::Timer;
use static_cell::StaticCell;

#[cfg(target_os = "none")]
use embassy_nrf::gpio::{Level, Output, OutputDrive};
#[cfg(target_os = "none")]
use embassy_nrf::peripherals::TWISPI0;
#[cfg(target_os = "none")]
use embassy_nrf::{bind_interrupts, twim};
#[cfg(target_os = "none")]
use {defmt_rtt as _, panic_probe as _};

#[allow(unused_imports)]
#[cfg(target_os = "none")]
use defmt::{debug, error, info, warn};
#[allow(unused_imports)]
#[cfg(not(target_os = "none"))]
use log::{debug, error, info, warn};

use sampling::SharedStore;
use store::TelemetryStore;

static SENSOR_BUS: StaticCell<platform::SensorBus> = StaticCell::new();
static STORE: StaticCell<SharedStore> = StaticCell::new();

#[cfg(target_os = "none")]
bind_interrupts!(struct Irqs {
    SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0 => twim::InterruptHandler<TWISPI0>;
});

#[cfg(target_os = "none")]
#[embassy_executor::main]
async fn main(spawner: Spawner) -> ! {
    let p = embassy_nrf::init(Default::default());

    let mut led_pin = Output::new(p.P0_09, Level::High, OutputDrive::HighDrive);

    let mut twi_config = twim::Config::default();
    twi_config.frequency = twim::Frequency::K400;
    let twi = twim::Twim::new(p.TWISPI0, Irqs, p.P0_29, p.P0_28, twi_config);
    let bus = SENSOR_BUS.init(Mutex::new(twi));

    let store = STORE.init(Mutex::new(TelemetryStore::new(platform::storage())));
    if store.lock().await.start_session().await.is_err() {
        error!("could not start the logging session");
    }

    spawner.spawn(sampling::sampling_task(bus, store)).unwrap();

    loop {
        led_pin.toggle();
        Timer::after_millis(500).await;
    }
}

#[cfg(not(target_os = "none"))]
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    if let Ok(rate) = std::env::var("SAMPLE_RATE_HZ") {
        match rate.parse() {
            Ok(hz) => sampling::set_sample_rate(hz),
            Err(_) => warn!("ignoring unparsable SAMPLE_RATE_HZ"),
        }
    }

    let bus = SENSOR_BUS.init(platform::SensorBus);
    let store = STORE.init(Mutex::new(TelemetryStore::new(platform::storage())));
    if store.lock().await.start_session().await.is_err() {
        error!("could not start the logging session");
    }

    spawner.spawn(sampling::sampling_task(bus, store)).unwrap();

    loop {
        Timer::after_secs(5).await;
        let store = store.lock().await;
        info!(
            "session open: {}, started at {} ms, records: {}",
            store.is_session_open(),
            store.session_started_ms(),
            store.record_count()
        );
    }
}
