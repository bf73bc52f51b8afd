//! Time-bounded, paced stream of filler chunks.

use bytes::Bytes;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::DownloadConfig;

/// Fill a `chunk_size` buffer with OS randomness.
///
/// Random bytes keep intermediaries from compressing the payload, which
/// would inflate the measured throughput.
pub fn random_filler(chunk_size: usize) -> Result<Bytes, getrandom::Error> {
    let mut buf = vec![0u8; chunk_size];
    getrandom::getrandom(&mut buf)?;
    Ok(Bytes::from(buf))
}

/// State of a single download session.
struct DownloadSession {
    chunk: Bytes,
    duration: Duration,
    stream_delay: Duration,
    started: Option<Instant>,
    chunks_sent: u64,
    completed: bool,
}

impl DownloadSession {
    fn new(chunk: Bytes, config: &DownloadConfig) -> Self {
        Self {
            chunk,
            duration: config.duration,
            stream_delay: config.stream_delay,
            started: None,
            chunks_sent: 0,
            completed: false,
        }
    }

    /// Produce the next chunk, or `None` once the duration has elapsed.
    async fn next_chunk(&mut self) -> Option<Bytes> {
        match self.started {
            Some(_) => tokio::time::sleep(self.stream_delay).await,
            None => self.started = Some(Instant::now()),
        }

        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        if elapsed >= self.duration {
            self.completed = true;
            return None;
        }

        self.chunks_sent += 1;
        Some(self.chunk.clone())
    }
}

impl Drop for DownloadSession {
    fn drop(&mut self) {
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        debug!(
            chunks = self.chunks_sent,
            bytes = self.chunks_sent * self.chunk.len() as u64,
            elapsed_ms = elapsed.as_millis() as u64,
            completed = self.completed,
            "Download session ended"
        );
    }
}

/// Build the response body stream for one download session.
///
/// `chunk` is shared between sessions; cloning `Bytes` only bumps a
/// reference count.
pub fn filler_stream(
    chunk: Bytes,
    config: &DownloadConfig,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let session = DownloadSession::new(chunk, config);

    stream::unfold(session, |mut session| async move {
        let chunk = session.next_chunk().await?;
        Some((Ok(chunk), session))
    })
}
