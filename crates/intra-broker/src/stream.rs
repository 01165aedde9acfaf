//! Websocket stream connector.
//!
//! Owns the push transport: connects, subscribes channels on command,
//! parses inbound frames into `StreamEvent`s, and delivers them over a
//! channel so the feed never blocks on network timing. Reconnects with
//! exponential backoff and re-issues every active subscription after a
//! reconnect.

use crate::error::{BrokerError, BrokerResult};
use crate::message::{parse_message, WireMessage, WireRequest};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use intra_core::{ChannelKind, FillEvent, InstrumentId, OrderBook, QuoteSnapshot};
use std::collections::HashSet;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Stream connector configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Websocket URL.
    pub url: String,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Cap for the backoff delay.
    pub reconnect_max_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60_000,
        }
    }
}

/// Subscription control issued by the allocator/feed side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCommand {
    Subscribe {
        instrument: InstrumentId,
        channel: ChannelKind,
    },
    Unsubscribe {
        instrument: InstrumentId,
        channel: ChannelKind,
    },
}

/// Push event delivered to the feed.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Quote(QuoteSnapshot),
    Book(OrderBook),
    Fill(FillEvent),
    Connected,
    Disconnected,
}

/// Cloneable handle for issuing stream commands.
#[derive(Clone)]
pub struct StreamHandle {
    command_tx: mpsc::Sender<StreamCommand>,
}

impl StreamHandle {
    pub async fn subscribe(
        &self,
        instrument: InstrumentId,
        channel: ChannelKind,
    ) -> BrokerResult<()> {
        self.command_tx
            .send(StreamCommand::Subscribe {
                instrument,
                channel,
            })
            .await
            .map_err(|_| BrokerError::StreamClosed)
    }

    pub async fn unsubscribe(
        &self,
        instrument: InstrumentId,
        channel: ChannelKind,
    ) -> BrokerResult<()> {
        self.command_tx
            .send(StreamCommand::Unsubscribe {
                instrument,
                channel,
            })
            .await
            .map_err(|_| BrokerError::StreamClosed)
    }
}

/// Spawn the stream connector task.
///
/// Returns the command handle and the task join handle. The task exits
/// when `token` is cancelled or the reconnect budget is exhausted.
pub fn spawn_stream(
    config: StreamConfig,
    event_tx: mpsc::Sender<StreamEvent>,
    token: CancellationToken,
) -> (StreamHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(64);
    let handle = StreamHandle { command_tx };
    let join = tokio::spawn(run(config, event_tx, command_rx, token));
    (handle, join)
}

async fn run(
    config: StreamConfig,
    event_tx: mpsc::Sender<StreamEvent>,
    mut command_rx: mpsc::Receiver<StreamCommand>,
    token: CancellationToken,
) {
    // Survives reconnects so subscriptions can be restored.
    let mut active: HashSet<(InstrumentId, ChannelKind)> = HashSet::new();
    let mut attempt = 0u32;

    loop {
        if token.is_cancelled() {
            info!("stream connector shutting down");
            return;
        }

        match connect_async(&config.url).await {
            Ok((ws, _)) => {
                attempt = 0;
                info!(url = %config.url, "stream connected");
                let _ = event_tx.send(StreamEvent::Connected).await;

                let (mut sink, source) = ws.split();
                if let Err(e) = restore_subscriptions(&mut sink, &active).await {
                    warn!(?e, "failed to restore subscriptions, reconnecting");
                } else {
                    session(
                        &mut sink,
                        source,
                        &event_tx,
                        &mut command_rx,
                        &mut active,
                        &token,
                    )
                    .await;
                }

                let _ = event_tx.send(StreamEvent::Disconnected).await;
                if token.is_cancelled() {
                    return;
                }
            }
            Err(e) => {
                error!(?e, url = %config.url, "stream connect failed");
            }
        }

        attempt += 1;
        if config.max_reconnect_attempts > 0 && attempt >= config.max_reconnect_attempts {
            error!(attempt, "reconnect budget exhausted, stream connector exiting");
            return;
        }

        let delay = backoff_delay(&config, attempt);
        warn!(attempt, delay_ms = delay.as_millis() as u64, "stream reconnecting");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = token.cancelled() => return,
        }
    }
}

/// One connected session; returns when the socket drops or shutdown fires.
async fn session(
    sink: &mut WsSink,
    mut source: WsSource,
    event_tx: &mpsc::Sender<StreamEvent>,
    command_rx: &mut mpsc::Receiver<StreamCommand>,
    active: &mut HashSet<(InstrumentId, ChannelKind)>,
    token: &CancellationToken,
) {
    loop {
        tokio::select! {
            () = token.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            command = command_rx.recv() => {
                let Some(command) = command else { return };
                if let Err(e) = apply_command(sink, active, command).await {
                    warn!(?e, "stream command send failed");
                    return;
                }
            }
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_text(&text, event_tx).await,
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("stream closed by peer");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(?e, "stream read error");
                        return;
                    }
                }
            }
        }
    }
}

async fn handle_text(text: &str, event_tx: &mpsc::Sender<StreamEvent>) {
    let event = match parse_message(text) {
        Ok(WireMessage::Quote(quote)) => quote.into_snapshot().map(StreamEvent::Quote),
        Ok(WireMessage::Book(book)) => book.into_order_book().map(StreamEvent::Book),
        Ok(WireMessage::Fill(fill)) => fill.into_fill().map(StreamEvent::Fill),
        Ok(WireMessage::Pong) => return,
        Err(e) => Err(e),
    };

    match event {
        Ok(event) => {
            if event_tx.send(event).await.is_err() {
                debug!("event receiver dropped");
            }
        }
        // A malformed frame is logged and skipped, never fatal.
        Err(e) => warn!(?e, "unparseable stream frame"),
    }
}

async fn apply_command(
    sink: &mut WsSink,
    active: &mut HashSet<(InstrumentId, ChannelKind)>,
    command: StreamCommand,
) -> BrokerResult<()> {
    let request = match &command {
        StreamCommand::Subscribe {
            instrument,
            channel,
        } => {
            active.insert((instrument.clone(), *channel));
            WireRequest::subscribe(instrument, *channel)
        }
        StreamCommand::Unsubscribe {
            instrument,
            channel,
        } => {
            active.remove(&(instrument.clone(), *channel));
            WireRequest::unsubscribe(instrument, *channel)
        }
    };
    send_request(sink, &request).await
}

async fn restore_subscriptions(
    sink: &mut WsSink,
    active: &HashSet<(InstrumentId, ChannelKind)>,
) -> BrokerResult<()> {
    for (instrument, channel) in active {
        send_request(sink, &WireRequest::subscribe(instrument, *channel)).await?;
    }
    if !active.is_empty() {
        info!(count = active.len(), "restored stream subscriptions");
    }
    Ok(())
}

async fn send_request(sink: &mut WsSink, request: &WireRequest) -> BrokerResult<()> {
    let json = serde_json::to_string(request).map_err(|e| BrokerError::Protocol(e.to_string()))?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| BrokerError::Transport(e.to_string()))
}

fn backoff_delay(config: &StreamConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay = config
        .reconnect_base_delay_ms
        .saturating_mul(1u64 << exp)
        .min(config.reconnect_max_delay_ms);
    Duration::from_millis(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StreamConfig {
        StreamConfig {
            url: "wss://example.invalid/stream".to_string(),
            max_reconnect_attempts: 3,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 8000,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let cfg = config();
        assert_eq!(backoff_delay(&cfg, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&cfg, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&cfg, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&cfg, 4), Duration::from_millis(8000));
        assert_eq!(backoff_delay(&cfg, 10), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn test_handle_closed_after_shutdown() {
        let (event_tx, _event_rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let (handle, join) = spawn_stream(config(), event_tx, token.clone());

        token.cancel();
        join.await.unwrap();

        let id = InstrumentId::new("005930").unwrap();
        let result = handle.subscribe(id, ChannelKind::TradeTick).await;
        assert!(matches!(result, Err(BrokerError::StreamClosed)));
    }
}
