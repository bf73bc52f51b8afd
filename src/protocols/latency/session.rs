//! Session driver: runs a [`Prober`] against a live connection.

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::prober::{Action, Event, Prober};
use super::stats::LatencyStats;
use crate::config::LatencyConfig;
use crate::error::SessionError;

/// Text channel the prober talks over.
///
/// `recv_text` must be cancel safe: the driver races it against the idle
/// timer.
#[async_trait]
pub trait ProbeTransport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError>;

    /// Next text message, or `None` once the peer has gone away.
    async fn recv_text(&mut self) -> Result<Option<String>, SessionError>;
}

/// Summary of a finished latency session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub samples: usize,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub jitter_ms: f64,
}

impl SessionSummary {
    fn from_stats(stats: &LatencyStats) -> Self {
        let (min_ms, max_ms) = if stats.is_empty() {
            (0.0, 0.0)
        } else {
            stats
                .samples()
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| {
                    (lo.min(s), hi.max(s))
                })
        };

        Self {
            samples: stats.len(),
            mean_ms: stats.mean(),
            min_ms,
            max_ms,
            jitter_ms: stats.jitter(),
        }
    }
}

/// Probe the peer until it disconnects.
///
/// A disconnect is a normal end. Any other transport failure ends the
/// session with an error.
pub async fn run_session<T: ProbeTransport>(
    transport: &mut T,
    config: &LatencyConfig,
) -> Result<SessionSummary, SessionError> {
    let mut prober = Prober::new(config);
    let mut action = prober.handle(Event::Accepted)?;

    loop {
        action = match action {
            Action::SendProbe => {
                let at = Instant::now();
                if deliver(transport, config.probe_token.clone()).await? {
                    prober.handle(Event::ProbeWritten { at })?
                } else {
                    prober.handle(Event::Closed)?
                }
            }

            Action::AwaitReply => match transport.recv_text().await? {
                Some(text) => {
                    let at = Instant::now();
                    trace!(%text, state = prober.state().name(), "Reply received");
                    prober.handle(Event::Reply { text, at })?
                }
                None => prober.handle(Event::Closed)?,
            },

            Action::Emit(result) => {
                let report = serde_json::to_string(&result.report())?;
                if deliver(transport, report).await? {
                    prober.handle(Event::ResultSent)?
                } else {
                    prober.handle(Event::Closed)?
                }
            }

            Action::Idle(interval) => {
                let deadline = Instant::now() + interval;
                idle_until(transport, &mut prober, deadline).await?
            }

            Action::Stop => break,
        };
    }

    let summary = SessionSummary::from_stats(prober.stats());
    debug!(
        samples = summary.samples,
        mean_ms = summary.mean_ms,
        min_ms = summary.min_ms,
        max_ms = summary.max_ms,
        jitter_ms = summary.jitter_ms,
        "Latency session ended"
    );
    Ok(summary)
}

/// Send `text`, returning `false` if the peer has already gone away.
async fn deliver<T: ProbeTransport>(transport: &mut T, text: String) -> Result<bool, SessionError> {
    match transport.send_text(text).await {
        Ok(()) => Ok(true),
        Err(SessionError::PeerClosed) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Wait out the idle interval while still noticing a disconnect.
///
/// Messages arriving here answer no outstanding probe and are dropped.
async fn idle_until<T: ProbeTransport>(
    transport: &mut T,
    prober: &mut Prober,
    deadline: Instant,
) -> Result<Action, SessionError> {
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return prober.handle(Event::IdleElapsed);
            }
            message = transport.recv_text() => match message? {
                Some(text) => trace!(%text, "Ignoring message received while idle"),
                None => return prober.handle(Event::Closed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// In-memory transport backed by channels.
    struct ChannelTransport {
        outgoing: mpsc::UnboundedSender<String>,
        incoming: mpsc::UnboundedReceiver<String>,
    }

    /// Client end of a [`ChannelTransport`].
    struct Peer {
        to_server: mpsc::UnboundedSender<String>,
        from_server: mpsc::UnboundedReceiver<String>,
    }

    fn channel_pair() -> (ChannelTransport, Peer) {
        let (to_server, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_server) = mpsc::unbounded_channel();
        (
            ChannelTransport { outgoing, incoming },
            Peer {
                to_server,
                from_server,
            },
        )
    }

    #[async_trait]
    impl ProbeTransport for ChannelTransport {
        async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
            self.outgoing
                .send(text)
                .map_err(|_| SessionError::PeerClosed)
        }

        async fn recv_text(&mut self) -> Result<Option<String>, SessionError> {
            Ok(self.incoming.recv().await)
        }
    }

    fn config() -> LatencyConfig {
        LatencyConfig {
            interval: Duration::from_millis(100),
            ..LatencyConfig::default()
        }
    }

    fn parse_report(text: &str) -> serde_json::Value {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_reports_latency() {
        let (mut transport, mut peer) = channel_pair();
        let session = tokio::spawn(async move { run_session(&mut transport, &config()).await });

        assert_eq!(peer.from_server.recv().await.unwrap(), "ping");
        tokio::time::sleep(Duration::from_millis(20)).await;
        peer.to_server.send("pong".to_string()).unwrap();

        let report = parse_report(&peer.from_server.recv().await.unwrap());
        assert_eq!(report["ping"], 20.0);
        assert_eq!(report["jitter"], 0.0);

        drop(peer);
        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.samples, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_reply_emits_nothing() {
        let (mut transport, mut peer) = channel_pair();
        let session = tokio::spawn(async move { run_session(&mut transport, &config()).await });

        assert_eq!(peer.from_server.recv().await.unwrap(), "ping");
        peer.to_server.send("not-pong".to_string()).unwrap();

        // Still waiting on the same probe: nothing is sent back
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(peer.from_server.try_recv().is_err());

        peer.to_server.send("pong".to_string()).unwrap();
        let report = parse_report(&peer.from_server.recv().await.unwrap());
        assert_eq!(report["ping"], 5000.0);

        drop(peer);
        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.samples, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_over_whole_session() {
        let (mut transport, mut peer) = channel_pair();
        let session = tokio::spawn(async move { run_session(&mut transport, &config()).await });

        let mut last = serde_json::Value::Null;
        for delay in [10, 20, 30] {
            assert_eq!(peer.from_server.recv().await.unwrap(), "ping");
            tokio::time::sleep(Duration::from_millis(delay)).await;
            peer.to_server.send("pong".to_string()).unwrap();
            last = parse_report(&peer.from_server.recv().await.unwrap());
        }

        assert_eq!(last["ping"], 30.0);
        assert_eq!(last["jitter"], 10.0);

        drop(peer);
        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.samples, 3);
        assert!((summary.jitter_ms - 10.0).abs() < 1e-6);
        assert!((summary.min_ms - 10.0).abs() < 1e-6);
        assert!((summary.max_ms - 30.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_are_spaced_by_interval() {
        let (mut transport, mut peer) = channel_pair();
        let session = tokio::spawn(async move { run_session(&mut transport, &config()).await });

        assert_eq!(peer.from_server.recv().await.unwrap(), "ping");
        peer.to_server.send("pong".to_string()).unwrap();
        peer.from_server.recv().await.unwrap();
        let reported_at = Instant::now();

        assert_eq!(peer.from_server.recv().await.unwrap(), "ping");
        let waited = reported_at.elapsed();
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_millis(102));

        drop(peer);
        session.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_idle_ends_promptly() {
        let (mut transport, mut peer) = channel_pair();
        let config = LatencyConfig {
            interval: Duration::from_secs(3600),
            ..LatencyConfig::default()
        };
        let session = tokio::spawn(async move { run_session(&mut transport, &config).await });

        assert_eq!(peer.from_server.recv().await.unwrap(), "ping");
        peer.to_server.send("pong".to_string()).unwrap();
        peer.from_server.recv().await.unwrap();

        let start = Instant::now();
        drop(peer);
        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.samples, 1);
        assert!(start.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_before_reply() {
        let (mut transport, mut peer) = channel_pair();
        let session = tokio::spawn(async move { run_session(&mut transport, &config()).await });

        assert_eq!(peer.from_server.recv().await.unwrap(), "ping");
        drop(peer);

        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.samples, 0);
        assert_eq!(summary.jitter_ms, 0.0);
    }

    #[tokio::test]
    async fn test_peer_gone_during_send_ends_cleanly() {
        let (mut transport, peer) = channel_pair();
        let Peer {
            to_server,
            from_server,
        } = peer;
        drop(from_server);

        let summary = run_session(&mut transport, &config()).await.unwrap();
        assert_eq!(summary.samples, 0);
        drop(to_server);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_gone_during_report_keeps_samples() {
        let (mut transport, mut peer) = channel_pair();
        let session = tokio::spawn(async move { run_session(&mut transport, &config()).await });

        assert_eq!(peer.from_server.recv().await.unwrap(), "ping");
        // Reply, then stop listening before the report goes out
        peer.to_server.send("pong".to_string()).unwrap();
        let Peer {
            to_server,
            from_server,
        } = peer;
        drop(from_server);

        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.samples, 1);
        drop(to_server);
    }

    /// Transport whose writes fail for a reason other than a disconnect.
    struct BrokenTransport;

    #[async_trait]
    impl ProbeTransport for BrokenTransport {
        async fn send_text(&mut self, _text: String) -> Result<(), SessionError> {
            Err(SessionError::Transport("socket buffer error".to_string()))
        }

        async fn recv_text(&mut self) -> Result<Option<String>, SessionError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_error() {
        let result = run_session(&mut BrokenTransport, &config()).await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
    }
}
