//! Latency prober state machine.
//!
//! The prober owns the session's statistics and decides what the connection
//! should do next. It never touches I/O: the session driver performs each
//! [`Action`] and feeds the outcome back as an [`Event`].
//!
//! ```text
//! AwaitingConnection --Accepted--> ProbeSent --ProbeWritten--> AwaitingReply
//!                                      ^                        |        |
//!                                      |               mismatch |        | match
//!                                      |                  (stay)+        v
//!                                  IdleWait <--ResultSent-- Reporting
//!
//! any state --Closed--> Disconnected
//! ```

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use super::stats::LatencyStats;
use crate::config::LatencyConfig;
use crate::error::SessionError;
use crate::protocols::round_to;

/// Prober state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeState {
    AwaitingConnection,
    /// A probe is being written to the connection.
    ProbeSent,
    /// A probe went out at `sent_at` and no matching reply has arrived yet.
    AwaitingReply { sent_at: Instant },
    /// A round trip completed; its result is being written.
    Reporting,
    IdleWait,
    Disconnected,
}

impl ProbeState {
    pub fn name(&self) -> &'static str {
        match self {
            ProbeState::AwaitingConnection => "awaiting-connection",
            ProbeState::ProbeSent => "probe-sent",
            ProbeState::AwaitingReply { .. } => "awaiting-reply",
            ProbeState::Reporting => "reporting",
            ProbeState::IdleWait => "idle-wait",
            ProbeState::Disconnected => "disconnected",
        }
    }
}

/// Something that happened on the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Accepted,
    /// The probe was handed to the transport; `at` is the send timestamp.
    ProbeWritten { at: Instant },
    /// A text message arrived at `at`.
    Reply { text: String, at: Instant },
    ResultSent,
    IdleElapsed,
    /// The peer went away.
    Closed,
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::Accepted => "accepted",
            Event::ProbeWritten { .. } => "probe-written",
            Event::Reply { .. } => "reply",
            Event::ResultSent => "result-sent",
            Event::IdleElapsed => "idle-elapsed",
            Event::Closed => "closed",
        }
    }
}

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendProbe,
    AwaitReply,
    Emit(ProbeResult),
    Idle(Duration),
    Stop,
}

/// Outcome of one matched round trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub latency_ms: f64,
    pub jitter_ms: f64,
}

impl ProbeResult {
    pub fn report(&self) -> ProbeReport {
        ProbeReport {
            ping: round_to(self.latency_ms, 1),
            jitter: round_to(self.jitter_ms, 1),
        }
    }
}

/// Message sent to the client after each round trip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbeReport {
    pub ping: f64,
    pub jitter: f64,
}

/// Per-connection latency prober.
#[derive(Debug)]
pub struct Prober {
    state: ProbeState,
    stats: LatencyStats,
    interval: Duration,
    ack_token: String,
}

impl Prober {
    pub fn new(config: &LatencyConfig) -> Self {
        Self {
            state: ProbeState::AwaitingConnection,
            stats: LatencyStats::new(),
            interval: config.interval,
            ack_token: config.ack_token.clone(),
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn stats(&self) -> &LatencyStats {
        &self.stats
    }

    /// Apply `event` and return the next action.
    pub fn handle(&mut self, event: Event) -> Result<Action, SessionError> {
        let (next, action) = match (self.state, event) {
            (_, Event::Closed) => (ProbeState::Disconnected, Action::Stop),

            (ProbeState::AwaitingConnection, Event::Accepted)
            | (ProbeState::IdleWait, Event::IdleElapsed) => {
                (ProbeState::ProbeSent, Action::SendProbe)
            }

            (ProbeState::ProbeSent, Event::ProbeWritten { at }) => {
                (ProbeState::AwaitingReply { sent_at: at }, Action::AwaitReply)
            }

            (ProbeState::AwaitingReply { sent_at }, Event::Reply { text, at }) => {
                if text != self.ack_token {
                    // Stray message: keep waiting on the same probe
                    (self.state, Action::AwaitReply)
                } else {
                    let latency_ms = at.saturating_duration_since(sent_at).as_secs_f64() * 1000.0;
                    self.stats.push(latency_ms);
                    let result = ProbeResult {
                        latency_ms,
                        jitter_ms: self.stats.jitter(),
                    };
                    (ProbeState::Reporting, Action::Emit(result))
                }
            }

            (ProbeState::Reporting, Event::ResultSent) => {
                (ProbeState::IdleWait, Action::Idle(self.interval))
            }

            (ProbeState::Disconnected, _) => (ProbeState::Disconnected, Action::Stop),

            (state, event) => {
                return Err(SessionError::InvalidTransition {
                    state: state.name(),
                    event: event.name(),
                })
            }
        };

        self.state = next;
        Ok(action)
    }
}
