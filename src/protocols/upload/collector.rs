//! Byte counting and throughput derivation for uploads.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::protocols::round_to;

/// Result of a finished upload session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadMeasurement {
    pub bytes_transferred: u64,
    pub elapsed_seconds: f64,
    pub throughput_mbps: f64,
}

impl UploadMeasurement {
    /// Derive throughput in megabits per second.
    ///
    /// A zero or negative elapsed time yields a throughput of 0.
    pub fn compute(bytes_transferred: u64, elapsed_seconds: f64) -> Self {
        let throughput_mbps = if elapsed_seconds > 0.0 {
            (bytes_transferred as f64 * 8.0) / elapsed_seconds / 1_000_000.0
        } else {
            0.0
        };

        Self {
            bytes_transferred,
            elapsed_seconds,
            throughput_mbps,
        }
    }

    pub fn from_duration(bytes_transferred: u64, elapsed: Duration) -> Self {
        Self::compute(bytes_transferred, elapsed.as_secs_f64())
    }

    pub fn report(&self) -> UploadReport {
        UploadReport {
            uploaded_mb: round_to(self.bytes_transferred as f64 / 1_000_000.0, 2),
            speed_mbps: round_to(self.throughput_mbps, 2),
        }
    }
}

/// JSON body returned by `POST /upload`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UploadReport {
    pub uploaded_mb: f64,
    pub speed_mbps: f64,
}

/// Running byte count for one upload session.
#[derive(Debug, Default)]
pub struct UploadCollector {
    total_bytes: u64,
    first_byte_at: Option<Instant>,
}

impl UploadCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one read of `len` bytes.
    pub fn record(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        self.first_byte_at.get_or_insert_with(Instant::now);
        self.total_bytes += len as u64;
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Read `stream` to exhaustion, counting every chunk.
    ///
    /// Chunks are dropped as soon as they are counted.
    pub async fn consume<S, E>(&mut self, mut stream: S) -> Result<(), E>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
    {
        while let Some(chunk) = stream.next().await {
            self.record(chunk?.len());
        }
        Ok(())
    }

    /// Close the session and derive the measurement.
    pub fn finish(self) -> UploadMeasurement {
        let elapsed = self
            .first_byte_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        UploadMeasurement::from_duration(self.total_bytes, elapsed)
    }
}
