//! Upload protocol.
//!
//! The client sends a payload of any length, either as a raw body or as a
//! `multipart/form-data` file part. The server counts bytes as they arrive
//! and never holds more than one read buffer of payload in memory.
//!
//! ## Response
//!
//! ```text
//! {"uploaded_mb": 1.0, "speed_mbps": 80.0}
//! ```
//!
//! Time is measured from the first payload byte to the end of the stream.
//! A zero elapsed time (empty or single-read upload on a coarse clock)
//! reports a speed of 0.

pub mod collector;
pub mod handler;

pub use handler::upload;
