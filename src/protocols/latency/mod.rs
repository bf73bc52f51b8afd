//! Latency protocol.
//!
//! Runs over a WebSocket at `/ws`:
//!
//! ```text
//! Server: ping
//! Client: pong
//! Server: {"ping": 23.4, "jitter": 1.7}
//! ... one probe interval later ...
//! Server: ping
//! ```
//!
//! Latency is the time from sending `ping` to receiving the matching
//! `pong`. Any other reply is discarded and the probe stays outstanding.
//! Jitter is the sample standard deviation of every latency measured on the
//! connection so far, and 0 until there are two samples.

pub mod handler;
pub mod prober;
pub mod session;
pub mod stats;

pub use handler::ws;
