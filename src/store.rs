use core::fmt::Write;

#[allow(unused_imports)]
#[cfg(target_os = "none")]
use defmt::{debug, error, info, warn};
#[allow(unused_imports)]
#[cfg(not(target_os = "none"))]
use log::{debug, error, info, warn};

use embassy_time::Instant;

use super::platform::Storage;

/// On-disk record layout, little-endian:
/// timestamp_ms u32, pressure i32, gyro \[f32; 3\], accel \[f32; 3\].
pub const RECORD_SIZE: usize = 32;

const CSV_HEADER: &str = "timestamp,pressure,altitude,gyroX,gyroY,gyroZ,accX,accY,accZ\n";
/// Upper bound for one formatted CSV line.
const CSV_LINE_MAX: usize = 192;

/// Appends between capacity queries.
const CAPACITY_CHECK_INTERVAL: u32 = 10;
/// Close this many blocks before the backend is actually full, so the tail
/// of the stream is never torn by a failed write.
const CAPACITY_MARGIN_BLOCKS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRecord {
    pub timestamp_ms: u32,
    /// Pa
    pub pressure: i32,
    /// rad/s
    pub gyro: [f32; 3],
    /// m/s²
    pub accel: [f32; 3],
}

impl TelemetryRecord {
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        buf[4..8].copy_from_slice(&self.pressure.to_le_bytes());
        for axis in 0..3 {
            let at = 8 + axis * 4;
            buf[at..at + 4].copy_from_slice(&self.gyro[axis].to_le_bytes());
            let at = 20 + axis * 4;
            buf[at..at + 4].copy_from_slice(&self.accel[axis].to_le_bytes());
        }
        buf
    }

    pub fn from_bytes(buf: &[u8; RECORD_SIZE]) -> Self {
        let u32_at = |i: usize| [buf[i], buf[i + 1], buf[i + 2], buf[i + 3]];
        let mut record = Self {
            timestamp_ms: u32::from_le_bytes(u32_at(0)),
            pressure: i32::from_le_bytes(u32_at(4)),
            gyro: [0.0; 3],
            accel: [0.0; 3],
        };
        for axis in 0..3 {
            record.gyro[axis] = f32::from_le_bytes(u32_at(8 + axis * 4));
            record.accel[axis] = f32::from_le_bytes(u32_at(20 + axis * 4));
        }
        record
    }

    /// One CSV line, newline included. Altitude is derived from the stored
    /// pressure, it is not persisted separately.
    fn write_csv(&self, line: &mut heapless::String<CSV_LINE_MAX>) -> core::fmt::Result {
        write!(
            line,
            "{},{},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4}\n",
            self.timestamp_ms,
            self.pressure,
            ms5611::altitude(self.pressure as f32),
            self.gyro[0],
            self.gyro[1],
            self.gyro[2],
            self.accel[0],
            self.accel[1],
            self.accel[2],
        )
    }
}

/// Append-only telemetry store with an open/closed session around it.
///
/// Appends are only accepted while a session is open; retrieval only makes
/// sense once it is closed again. That precondition is the caller's to
/// uphold, `read_chunk` just returns nothing while logging is live.
pub struct TelemetryStore<S> {
    storage: S,
    open: bool,
    started_at_ms: u32,
    record_count: u32,
    appends_since_check: u32,
    read_cursor: u32,
    header_sent: bool,
}

impl<S: Storage> TelemetryStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            open: false,
            started_at_ms: 0,
            record_count: 0,
            appends_since_check: 0,
            read_cursor: 0,
            header_sent: false,
        }
    }

    /// Open a fresh session. Any previous one is closed and its records are
    /// discarded; the stream never continues across a restart.
    pub async fn start_session(&mut self) -> Result<(), S::Error> {
        self.open = false;
        if self.storage.exists().await {
            self.storage.remove().await?;
        }
        self.open = true;
        self.started_at_ms = Instant::now().as_millis() as u32;
        self.record_count = 0;
        self.appends_since_check = 0;
        self.read_cursor = 0;
        self.header_sent = false;
        info!("telemetry session started");
        Ok(())
    }

    /// Idempotent.
    pub fn stop_session(&mut self) {
        if self.open {
            info!("telemetry session stopped, {} records", self.record_count);
        }
        self.open = false;
    }

    pub fn is_session_open(&self) -> bool {
        self.open
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Boot-relative start time of the current (or last) session.
    pub fn session_started_ms(&self) -> u32 {
        self.started_at_ms
    }

    /// Append one record. Returns whether it was stored: appends while
    /// closed are rejected, and a backend failure drops the record rather
    /// than stall acquisition.
    pub async fn append(&mut self, record: &TelemetryRecord) -> bool {
        if !self.open {
            return false;
        }

        let stored = match self.storage.append(&record.to_bytes()).await {
            Ok(()) => {
                self.record_count += 1;
                true
            }
            Err(_) => {
                error!("record append failed, dropped");
                false
            }
        };

        // failed attempts advance the counter too, so a jammed backend
        // still reaches the capacity check
        self.appends_since_check += 1;
        if self.appends_since_check >= CAPACITY_CHECK_INTERVAL {
            self.appends_since_check = 0;
            if let Ok(cap) = self.storage.capacity().await {
                if cap.used + CAPACITY_MARGIN_BLOCKS * cap.block_size >= cap.total {
                    warn!("storage nearly full, closing session");
                    self.stop_session();
                }
            }
        }
        stored
    }

    /// Fill `buf` with the next piece of the CSV rendition: the header line
    /// first, then whole record lines only, never a partial one. Returns
    /// the bytes written. 0 means the stream is exhausted and the cursor
    /// has been rewound for a fresh pass — unless records remain that `buf`
    /// cannot hold (or a read failed mid-stream), in which case nothing is
    /// lost and a retry with a larger buffer resumes where it left off.
    /// `buf` must at least fit the header.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> usize {
        if self.open {
            return 0;
        }

        let mut written = 0;

        if !self.header_sent {
            if buf.len() < CSV_HEADER.len() {
                return 0;
            }
            buf[..CSV_HEADER.len()].copy_from_slice(CSV_HEADER.as_bytes());
            written = CSV_HEADER.len();
            self.header_sent = true;
        }

        while self.read_cursor < self.record_count {
            let mut raw = [0u8; RECORD_SIZE];
            let offset = self.read_cursor * RECORD_SIZE as u32;
            if self.storage.read_at(offset, &mut raw).await.is_err() {
                error!("record read failed at {}", self.read_cursor);
                break;
            }

            let mut line: heapless::String<CSV_LINE_MAX> = Default::default();
            if TelemetryRecord::from_bytes(&raw).write_csv(&mut line).is_err() {
                error!("record format overflow at {}", self.read_cursor);
                break;
            }
            if written + line.len() > buf.len() {
                break;
            }
            buf[written..written + line.len()].copy_from_slice(line.as_bytes());
            written += line.len();
            self.read_cursor += 1;
        }

        if written == 0 && self.header_sent && self.read_cursor >= self.record_count {
            // exhausted; rewind so the next retrieval starts over
            self.header_sent = false;
            self.read_cursor = 0;
        }
        written
    }
}
