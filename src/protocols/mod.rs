//! Measurement protocols.
//!
//! Each protocol owns one kind of session, driven by a single inbound
//! connection. Sessions share no mutable state.
//!
//! - `download`: paced stream of filler bytes for download throughput
//! - `upload`: byte counter for upload throughput
//! - `latency`: ping/pong round trips with running jitter

pub mod download;
pub mod latency;
pub mod upload;

/// Round `value` to `places` decimal places.
///
/// Rounds the exact binary value of `value`, with exact ties going to the
/// even digit, so 0.125 becomes 0.12 and 0.015 (stored just below) 0.01.
pub fn round_to(value: f64, places: usize) -> f64 {
    format!("{value:.places$}").parse().unwrap_or(value)
}
