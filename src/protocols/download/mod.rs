//! Download protocol.
//!
//! The server streams opaque filler chunks to the client for a fixed
//! duration. The client derives throughput from the bytes it received over
//! the time it observed; there is no end-of-stream marker.
//!
//! ## Pacing
//!
//! ```text
//! chunk -> sleep(stream_delay) -> chunk -> sleep(stream_delay) -> ... -> end
//! ```
//!
//! A chunk is only produced while less than `duration` has passed since the
//! first poll. Dropping the stream (peer disconnect) cancels the pending
//! sleep and ends the session.

pub mod handler;
pub mod stream;

pub use handler::download;
pub use stream::random_filler;
