//! WebSocket transport for the voyager client.
//!
//! Exactly one socket lives at any time. After connect the transport sends
//! `list`, then drives a select loop over inbound frames, the outbound
//! queue, and a one second heartbeat tick. Twenty seconds of wire silence is
//! a heartbeat timeout: the socket closes and, when policy allows, the
//! transport reconnects on the shared doubling backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use blackhole_core::ReconnectBackoff;
use blackhole_core::constants::{HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT, ROLE_VOYAGER};
use blackhole_core::error::{Error, Result};
use blackhole_core::protocol::{Encoding, Frame};
use url::Url;

use crate::wire::{decode_message, encode_message};

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Host (`ws://host:9527`) or relay base URL.
    pub url: String,
    /// Relay mode: append `role=voyager`, `session`, and `token` to the URL.
    pub relay: bool,
    /// Relay session code; required in relay mode.
    pub session: Option<String>,
    /// Relay bearer token.
    pub token: Option<String>,
    /// Reconnect automatically after a transport loss.
    pub auto_reconnect: bool,
}

/// Events delivered to the coordinator.
#[derive(Debug)]
pub enum TransportEvent {
    /// Socket opened; a `list` request is already on the wire.
    Connected,
    /// A decoded frame arrived.
    Frame { frame: Frame, encoding: Encoding },
    /// Socket closed. `will_retry` reflects the reconnect policy.
    Disconnected {
        reason: Option<String>,
        will_retry: bool,
    },
}

/// Pure heartbeat bookkeeping, driven by an injected clock so the timeout
/// logic is exactly testable.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    last_message_at: Instant,
    last_ping_at: Instant,
}

/// What the transport should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    None,
    /// Five seconds since the last ping: send another.
    SendPing,
    /// Twenty seconds of silence: close and reconnect.
    Timeout { silent_secs: u64 },
}

impl HeartbeatMonitor {
    pub fn new(now: Instant) -> Self {
        Self {
            last_message_at: now,
            last_ping_at: now,
        }
    }

    /// Record any inbound frame, decodable or not.
    pub fn on_message(&mut self, now: Instant) {
        self.last_message_at = now;
    }

    /// Evaluate the timers. The ping cadence is checked first, so a stalled
    /// server still sees pings at 5, 10, 15, and 20 seconds; the timeout
    /// fires on the first tick after that.
    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if now.duration_since(self.last_ping_at) >= HEARTBEAT_INTERVAL {
            self.last_ping_at = now;
            return HeartbeatAction::SendPing;
        }
        let silence = now.duration_since(self.last_message_at);
        if silence >= HEARTBEAT_TIMEOUT {
            return HeartbeatAction::Timeout {
                silent_secs: silence.as_secs(),
            };
        }
        HeartbeatAction::None
    }
}

type SenderSlot = Arc<std::sync::Mutex<Option<mpsc::UnboundedSender<Message>>>>;

/// Handle to the running transport task.
pub struct Transport {
    sender: SenderSlot,
    should_reconnect: Arc<AtomicBool>,
    disconnect_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Transport {
    /// Start the transport; events stream to the returned receiver.
    pub fn connect(config: TransportConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let sender: SenderSlot = Arc::new(std::sync::Mutex::new(None));
        let should_reconnect = Arc::new(AtomicBool::new(true));
        let (disconnect_tx, disconnect_rx) = watch::channel(false);

        let task = tokio::spawn(run(
            config,
            events_tx,
            Arc::clone(&sender),
            Arc::clone(&should_reconnect),
            disconnect_rx,
        ));

        (
            Self {
                sender,
                should_reconnect,
                disconnect_tx,
                task,
            },
            events_rx,
        )
    }

    /// Queue a frame in its preferred encoding. Returns false when offline.
    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send_frame_as(frame, frame.preferred_encoding())
    }

    /// Queue a frame in an explicit encoding (pong echoes).
    pub fn send_frame_as(&self, frame: &Frame, encoding: Encoding) -> bool {
        let msg = match encode_message(frame, encoding) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Failed to encode outbound frame");
                return false;
            }
        };
        let slot = self.sender.lock().expect("sender lock poisoned");
        slot.as_ref().map(|tx| tx.send(msg).is_ok()).unwrap_or(false)
    }

    /// User-triggered disconnect: no reconnect will be attempted.
    pub fn disconnect(&self) {
        self.should_reconnect.store(false, Ordering::SeqCst);
        let _ = self.disconnect_tx.send(true);
    }

    /// Wait for the transport task to finish.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Build the URL to dial. LAN mode uses the base verbatim; relay mode
/// appends `role=voyager`, the mandatory `session`, and the token.
fn build_client_url(config: &TransportConfig) -> Result<Url> {
    let mut url = Url::parse(&config.url).map_err(|e| Error::Transport {
        message: format!("invalid url: {}", e),
    })?;
    if config.relay {
        let session = config.session.as_deref().ok_or_else(|| Error::Config {
            message: "relay mode requires a session code".into(),
        })?;
        let mut query = url.query_pairs_mut();
        query.append_pair("role", ROLE_VOYAGER);
        query.append_pair("session", session);
        if let Some(token) = config.token.as_deref() {
            query.append_pair("token", token);
        }
    }
    Ok(url)
}

async fn run(
    config: TransportConfig,
    events: mpsc::Sender<TransportEvent>,
    sender: SenderSlot,
    should_reconnect: Arc<AtomicBool>,
    mut disconnect_rx: watch::Receiver<bool>,
) {
    let mut backoff = ReconnectBackoff::new();

    let url = match build_client_url(&config) {
        Ok(url) => url,
        Err(e) => {
            let _ = events
                .send(TransportEvent::Disconnected {
                    reason: Some(e.to_string()),
                    will_retry: false,
                })
                .await;
            return;
        }
    };

    loop {
        if *disconnect_rx.borrow() {
            break;
        }

        let mut reason: Option<String> = None;
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(url = %config.url, "Transport connected");
                backoff.reset();

                let (mut sink, mut stream) = ws.split();
                let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
                *sender.lock().expect("sender lock poisoned") = Some(tx);

                let _ = events.send(TransportEvent::Connected).await;

                // Ask for the session list straight away
                match encode_message(&Frame::List, Encoding::Json) {
                    Ok(msg) => {
                        if sink.send(msg).await.is_err() {
                            reason = Some("failed to send list request".into());
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to encode list request"),
                }

                if reason.is_none() {
                    let mut heartbeat = HeartbeatMonitor::new(Instant::now());
                    let mut ticker = tokio::time::interval(Duration::from_secs(1));
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                    loop {
                        tokio::select! {
                            biased;

                            _ = disconnect_rx.changed() => {
                                if *disconnect_rx.borrow() {
                                    let _ = sink.send(Message::Close(None)).await;
                                    break;
                                }
                            }

                            _ = ticker.tick() => {
                                match heartbeat.poll(Instant::now()) {
                                    HeartbeatAction::SendPing => {
                                        if let Ok(msg) = encode_message(&Frame::Ping, Encoding::Json) {
                                            if sink.send(msg).await.is_err() {
                                                reason = Some("ping send failed".into());
                                                break;
                                            }
                                        }
                                    }
                                    HeartbeatAction::Timeout { silent_secs } => {
                                        reason = Some(format!(
                                            "Heartbeat timeout: no data for {}s",
                                            silent_secs
                                        ));
                                        let _ = sink.send(Message::Close(None)).await;
                                        break;
                                    }
                                    HeartbeatAction::None => {}
                                }
                            }

                            out = rx.recv() => {
                                match out {
                                    Some(msg) => {
                                        if sink.send(msg).await.is_err() {
                                            reason = Some("send failed".into());
                                            break;
                                        }
                                    }
                                    None => break,
                                }
                            }

                            msg = stream.next() => {
                                match msg {
                                    Some(Ok(Message::Close(_))) | None => {
                                        reason = Some("connection closed".into());
                                        break;
                                    }
                                    Some(Ok(msg)) => {
                                        heartbeat.on_message(Instant::now());
                                        if let Some((frame, encoding)) = decode_message(&msg) {
                                            let event = TransportEvent::Frame { frame, encoding };
                                            if events.send(event).await.is_err() {
                                                return;
                                            }
                                        }
                                    }
                                    Some(Err(e)) => {
                                        debug!(error = %e, "Transport read error");
                                        reason = Some(e.to_string());
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }

                *sender.lock().expect("sender lock poisoned") = None;
            }
            Err(e) => {
                debug!(error = %e, "Connect failed");
                reason = Some(e.to_string());
            }
        }

        let will_retry = config.auto_reconnect
            && should_reconnect.load(Ordering::SeqCst)
            && !*disconnect_rx.borrow();
        let _ = events
            .send(TransportEvent::Disconnected {
                reason: reason.clone(),
                will_retry,
            })
            .await;
        if let Some(reason) = &reason {
            debug!(reason = %reason, will_retry, "Transport disconnected");
        }

        if !will_retry {
            break;
        }

        let delay = backoff.next_delay();
        debug!(delay_secs = delay.as_secs(), "Reconnect scheduled");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = disconnect_rx.changed() => {
                if *disconnect_rx.borrow() {
                    break;
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> TransportConfig {
        TransportConfig {
            url: url.into(),
            relay: false,
            session: None,
            token: None,
            auto_reconnect: false,
        }
    }

    #[test]
    fn lan_url_is_used_verbatim() {
        let url = build_client_url(&config("ws://192.168.1.10:9527")).unwrap();
        assert_eq!(url.as_str(), "ws://192.168.1.10:9527/");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn relay_url_appends_role_session_token() {
        let mut cfg = config("wss://r.example/ws");
        cfg.relay = true;
        cfg.session = Some("AB12CD".into());
        cfg.token = Some("tok".into());
        let url = build_client_url(&cfg).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://r.example/ws?role=voyager&session=AB12CD&token=tok"
        );
    }

    #[test]
    fn relay_mode_requires_session() {
        let mut cfg = config("wss://r.example/ws");
        cfg.relay = true;
        let err = build_client_url(&cfg).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn heartbeat_pings_every_five_seconds() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(start);

        assert_eq!(hb.poll(start + Duration::from_secs(1)), HeartbeatAction::None);
        assert_eq!(
            hb.poll(start + Duration::from_secs(5)),
            HeartbeatAction::SendPing
        );
        assert_eq!(hb.poll(start + Duration::from_secs(6)), HeartbeatAction::None);
        assert_eq!(
            hb.poll(start + Duration::from_secs(10)),
            HeartbeatAction::SendPing
        );
    }

    #[test]
    fn heartbeat_timeout_after_twenty_seconds_of_silence() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(start);

        // Pings keep going at 5, 10, 15, 20 seconds into the stall
        for t in [5u64, 10, 15, 20] {
            assert_eq!(
                hb.poll(start + Duration::from_secs(t)),
                HeartbeatAction::SendPing,
                "tick at {}s",
                t
            );
        }

        // First tick after the ping window: timeout with the silence length
        match hb.poll(start + Duration::from_secs(21)) {
            HeartbeatAction::Timeout { silent_secs } => assert_eq!(silent_secs, 21),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn heartbeat_inbound_data_resets_timeout() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(start);

        hb.poll(start + Duration::from_secs(5));
        hb.on_message(start + Duration::from_secs(18));

        // 21s after start is only 3s after the last message
        assert_eq!(
            hb.poll(start + Duration::from_secs(21)),
            HeartbeatAction::None
        );
    }

    #[test]
    fn heartbeat_triggers_exactly_one_timeout_per_stall() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(start);

        let mut timeouts = 0;
        for t in 1..=21u64 {
            if matches!(
                hb.poll(start + Duration::from_secs(t)),
                HeartbeatAction::Timeout { .. }
            ) {
                timeouts += 1;
                break; // the transport closes the socket on first timeout
            }
        }
        assert_eq!(timeouts, 1);
    }
}
