use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::telemetry::metrics::values;
use crate::telemetry::Metrics;

/// Upper bound for flushing a close frame to a peer that stopped reading
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a tunnel, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Which side ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    Client,
    Origin,
    Cancelled,
}

enum Step {
    Forward(Message),
    Skip,
    Stop,
}

fn classify(next: Option<Result<Message, WsError>>) -> Step {
    match next {
        Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => Step::Forward(msg),
        // Control frames are answered by each side's own stack
        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => Step::Skip,
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => Step::Stop,
    }
}

/// One relayed WebSocket connection
///
/// Text and binary messages flow both ways in arrival order. The first close,
/// error or end of stream on either side, or cancellation, closes both.
pub struct TunnelSession<C, O> {
    client: C,
    origin: O,
    cancel: CancellationToken,
    state: watch::Sender<TunnelState>,
    metrics: Option<Arc<Metrics>>,
    trace: bool,
}

impl<C, O> TunnelSession<C, O>
where
    C: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send,
    O: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send,
{
    pub fn new(client: C, origin: O, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(TunnelState::Connecting);
        Self { client, origin, cancel, state, metrics: None, trace: false }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Log every state transition at info level
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<TunnelState> {
        self.state.subscribe()
    }

    fn transition(&self, next: TunnelState) {
        if self.trace {
            info!(state = ?next, "Tunnel state");
        } else {
            debug!(state = ?next, "Tunnel state");
        }
        self.state.send_replace(next);
    }

    /// Relay until either side goes away
    pub async fn run(mut self) -> CloseCause {
        self.transition(TunnelState::Open);
        if let Some(ref m) = self.metrics {
            m.record_tunnel_opened();
        }

        let cause = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break CloseCause::Cancelled,
                next = self.client.next() => match classify(next) {
                    Step::Forward(msg) => {
                        if self.origin.send(msg).await.is_err() {
                            break CloseCause::Origin;
                        }
                        self.record(values::DIRECTION_CLIENT_TO_ORIGIN);
                    }
                    Step::Skip => {}
                    Step::Stop => break CloseCause::Client,
                },
                next = self.origin.next() => match classify(next) {
                    Step::Forward(msg) => {
                        if self.client.send(msg).await.is_err() {
                            break CloseCause::Client;
                        }
                        self.record(values::DIRECTION_ORIGIN_TO_CLIENT);
                    }
                    Step::Skip => {}
                    Step::Stop => break CloseCause::Origin,
                },
            }
        };

        self.transition(TunnelState::Closing);
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.client.close()).await;
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.origin.close()).await;
        self.transition(TunnelState::Closed);

        if let Some(ref m) = self.metrics {
            m.record_tunnel_closed();
        }
        debug!(?cause, "Tunnel closed");
        cause
    }

    fn record(&self, direction: &'static str) {
        if let Some(ref m) = self.metrics {
            m.record_tunnel_message(direction);
        }
    }
}
