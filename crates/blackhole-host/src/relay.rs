//! Relay uplink for the blackhole host.
//!
//! Maintains at most one outbound WebSocket to the configured relay. The
//! relay assigns a short session code on first connect; reconnects present
//! that code back so voyagers keep working across uplink drops. Reconnects
//! follow the shared doubling backoff (2 s to 10 s).

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use blackhole_core::ReconnectBackoff;
use blackhole_core::constants::ROLE_HORIZON;
use blackhole_core::error::{Error, Result};
use blackhole_core::protocol::Frame;
use url::Url;

use crate::controller::{HostEvent, PeerRef};
use crate::wire::decode_message;

/// Relay uplink configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay base URL (`ws://` or `wss://`), query parameters preserved.
    pub url: String,
    /// Bearer token appended to the query when set.
    pub token: Option<String>,
}

/// Uplink connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayState {
    /// No uplink configured or the uplink was stopped.
    #[default]
    Disabled,
    /// Dialing the relay.
    Connecting,
    /// Socket open; frames flow.
    Connected,
    /// Waiting out the backoff before the next attempt.
    Reconnecting,
}

/// Status exposed to the UI via a watch channel.
#[derive(Debug, Clone, Default)]
pub struct RelayStatus {
    pub state: RelayState,
    /// Relay-assigned session code, kept across reconnects.
    pub session_id: Option<String>,
    pub last_error: Option<String>,
}

type SenderSlot = Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>;

/// The host's relay uplink client.
pub struct RelayClient {
    sender: SenderSlot,
    status_rx: watch::Receiver<RelayStatus>,
    stop_tx: watch::Sender<bool>,
    bounce_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl RelayClient {
    /// Start the uplink task.
    pub fn start(config: RelayConfig, events: mpsc::Sender<HostEvent>) -> Self {
        let sender: SenderSlot = Arc::new(Mutex::new(None));
        let (status_tx, status_rx) = watch::channel(RelayStatus::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let (bounce_tx, bounce_rx) = mpsc::channel(1);

        let task_sender = Arc::clone(&sender);
        let task = tokio::spawn(async move {
            run(config, events, status_tx, task_sender, stop_rx, bounce_rx).await;
        });

        Self {
            sender,
            status_rx,
            stop_tx,
            bounce_tx,
            task,
        }
    }

    /// Queue a message to the relay. Dropped silently while disconnected;
    /// WebSockets do not preserve in-flight frames anyway.
    pub fn send(&self, msg: Message) {
        let slot = self.sender.lock().expect("relay sender lock poisoned");
        if let Some(tx) = slot.as_ref() {
            let _ = tx.send(msg);
        }
    }

    /// Watch the uplink state and assigned session id.
    pub fn status(&self) -> watch::Receiver<RelayStatus> {
        self.status_rx.clone()
    }

    /// Drop the current socket and reconnect through the backoff schedule.
    pub fn bounce(&self) {
        let _ = self.bounce_tx.try_send(());
    }

    /// Stop the uplink and wait for the task to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if tokio::time::timeout(std::time::Duration::from_secs(2), self.task)
            .await
            .is_err()
        {
            warn!("Relay task did not stop in time");
        }
    }
}

/// Build the uplink URL: keep the base's query, add `role=horizon`, the
/// previously assigned `session` (reconnects only), and the token.
fn build_uplink_url(base: &str, session: Option<&str>, token: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|e| Error::Transport {
        message: format!("invalid relay url: {}", e),
    })?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("role", ROLE_HORIZON);
        if let Some(session) = session {
            query.append_pair("session", session);
        }
        if let Some(token) = token {
            query.append_pair("token", token);
        }
    }
    Ok(url)
}

async fn run(
    config: RelayConfig,
    events: mpsc::Sender<HostEvent>,
    status_tx: watch::Sender<RelayStatus>,
    sender: SenderSlot,
    mut stop_rx: watch::Receiver<bool>,
    mut bounce_rx: mpsc::Receiver<()>,
) {
    let mut backoff = ReconnectBackoff::new();
    let mut assigned: Option<String> = None;
    let mut last_error: Option<String> = None;

    let set_status = |state: RelayState, assigned: &Option<String>, error: &Option<String>| {
        let _ = status_tx.send(RelayStatus {
            state,
            session_id: assigned.clone(),
            last_error: error.clone(),
        });
    };

    loop {
        if *stop_rx.borrow() {
            break;
        }

        set_status(RelayState::Connecting, &assigned, &last_error);
        let url = match build_uplink_url(&config.url, assigned.as_deref(), config.token.as_deref())
        {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Relay URL rejected");
                last_error = Some(e.to_string());
                break;
            }
        };

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(url = %config.url, "Relay uplink connected");
                backoff.reset();
                last_error = None;
                set_status(RelayState::Connected, &assigned, &last_error);

                let (mut sink, mut stream) = ws.split();
                let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
                *sender.lock().expect("relay sender lock poisoned") = Some(tx);

                loop {
                    tokio::select! {
                        biased;

                        _ = stop_rx.changed() => {
                            if *stop_rx.borrow() {
                                let _ = sink.send(Message::Close(None)).await;
                                *sender.lock().expect("relay sender lock poisoned") = None;
                                set_status(RelayState::Disabled, &assigned, &last_error);
                                return;
                            }
                        }

                        _ = bounce_rx.recv() => {
                            debug!("Relay uplink bounce requested");
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }

                        out = rx.recv() => {
                            match out {
                                Some(msg) => {
                                    if sink.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            }
                        }

                        msg = stream.next() => {
                            match msg {
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(msg)) => {
                                    let Some((frame, encoding)) = decode_message(&msg) else {
                                        continue;
                                    };
                                    if let Frame::SessionAssigned { session_id } = &frame {
                                        info!(session_id = %session_id, "Relay assigned session");
                                        assigned = Some(session_id.clone());
                                        set_status(RelayState::Connected, &assigned, &last_error);
                                        continue;
                                    }
                                    let event = HostEvent::Frame {
                                        peer: PeerRef::Relay,
                                        frame,
                                        encoding,
                                    };
                                    if events.send(event).await.is_err() {
                                        return;
                                    }
                                }
                                Some(Err(e)) => {
                                    debug!(error = %e, "Relay read error");
                                    last_error = Some(e.to_string());
                                    break;
                                }
                            }
                        }
                    }
                }

                *sender.lock().expect("relay sender lock poisoned") = None;
            }
            Err(e) => {
                warn!(error = %e, "Relay connect failed");
                last_error = Some(e.to_string());
            }
        }

        if *stop_rx.borrow() {
            break;
        }

        let delay = backoff.next_delay();
        set_status(RelayState::Reconnecting, &assigned, &last_error);
        debug!(delay_secs = delay.as_secs(), "Relay reconnect scheduled");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    set_status(RelayState::Disabled, &assigned, &last_error);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_url_has_no_session() {
        let url = build_uplink_url("wss://r.example/ws", None, Some("tok")).unwrap();
        assert_eq!(url.as_str(), "wss://r.example/ws?role=horizon&token=tok");
    }

    #[test]
    fn reconnect_url_carries_session() {
        let url = build_uplink_url("wss://r.example/ws", Some("AB12CD"), Some("tok")).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://r.example/ws?role=horizon&session=AB12CD&token=tok"
        );
    }

    #[test]
    fn base_query_params_are_preserved() {
        let url = build_uplink_url("wss://r.example/ws?region=eu", None, None).unwrap();
        assert_eq!(url.as_str(), "wss://r.example/ws?region=eu&role=horizon");
    }

    #[test]
    fn invalid_url_is_a_transport_error() {
        let err = build_uplink_url("not a url", None, None).unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }
}
