//! Host controller: wires the session registry, the LAN listener, and the
//! relay uplink together.
//!
//! All inbound frames from both transports funnel through one event loop,
//! which is the only task touching the registry. PTY output fans out to
//! every current peer: all LAN peers plus the relay when connected. Late
//! joiners do not receive buffered history.

use std::net::SocketAddr;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use blackhole_core::constants::{DEFAULT_LAN_PORT, ERR_PTY_START, ERR_UNSUPPORTED_VERSION};
use blackhole_core::error::{Error, Result};
use blackhole_core::protocol::{Encoding, Frame};

use crate::listener::{LanListener, PeerId};
use crate::registry::{PtySpawner, SessionEvent, SessionRegistry};
use crate::relay::{RelayClient, RelayConfig, RelayStatus};
use crate::wire::encode_message;

/// Which transport a frame arrived on (and where replies go).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRef {
    /// An accepted LAN WebSocket peer.
    Lan(PeerId),
    /// The singular relay uplink.
    Relay,
}

/// Events funneled into the controller loop by the transports.
#[derive(Debug)]
pub enum HostEvent {
    /// A LAN peer completed its handshake; greet it with a session list.
    PeerConnected(PeerId),
    /// A LAN peer went away.
    PeerDisconnected(PeerId),
    /// A decoded frame from either transport.
    Frame {
        peer: PeerRef,
        frame: Frame,
        encoding: Encoding,
    },
}

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Accept LAN peers.
    pub lan_enabled: bool,
    /// LAN listener port (0 lets the OS pick, used by tests).
    pub lan_port: u16,
    /// Relay uplink; `None` disables the relay.
    pub relay: Option<RelayConfig>,
    /// Shell override for new sessions.
    pub shell: Option<String>,
    /// Allow the unauthenticated LAN listener in release builds.
    pub dev_mode: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            lan_enabled: true,
            lan_port: DEFAULT_LAN_PORT,
            relay: None,
            shell: None,
            dev_mode: false,
        }
    }
}

/// Running host controller.
pub struct HostController {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
    lan_addr: Option<SocketAddr>,
    relay_status: Option<watch::Receiver<RelayStatus>>,
}

impl HostController {
    /// Start the controller: registry, LAN listener, output fan-out, relay.
    ///
    /// Each step is reversible; a failure rolls back what already started.
    pub async fn start(config: HostConfig, spawner: Box<dyn PtySpawner>) -> Result<Self> {
        // The LAN listener has no authentication. Debug builds imply dev
        // mode; release builds must opt in explicitly.
        if config.lan_enabled && !config.dev_mode && !cfg!(debug_assertions) {
            return Err(Error::Config {
                message: "LAN listener has no authentication; pass --dev-mode or set \
                          BLACKHOLE_DEV=1 to confirm"
                    .into(),
            });
        }

        let mut registry = SessionRegistry::new(spawner, config.shell.clone());
        let session_events = registry.take_events();

        let (host_tx, host_rx) = mpsc::channel::<HostEvent>(256);

        let listener = if config.lan_enabled {
            match LanListener::bind(config.lan_port, host_tx.clone()).await {
                Ok(listener) => Some(listener),
                Err(e) => {
                    registry.shutdown();
                    return Err(e);
                }
            }
        } else {
            None
        };
        let lan_addr = listener.as_ref().map(|l| l.local_addr());

        let relay = config
            .relay
            .clone()
            .map(|relay_config| RelayClient::start(relay_config, host_tx.clone()));
        let relay_status = relay.as_ref().map(|r| r.status());

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(run(registry, session_events, host_rx, listener, relay, shutdown_rx));

        info!(
            lan = ?lan_addr,
            relay = config.relay.as_ref().map(|r| r.url.as_str()),
            "Host controller started"
        );

        Ok(Self {
            shutdown_tx,
            task,
            lan_addr,
            relay_status,
        })
    }

    /// The bound LAN address, when the listener is enabled.
    pub fn lan_addr(&self) -> Option<SocketAddr> {
        self.lan_addr
    }

    /// Relay status watch, when the relay is configured.
    pub fn relay_status(&self) -> Option<watch::Receiver<RelayStatus>> {
        self.relay_status.clone()
    }

    /// Stop everything in reverse start order and kill all PTYs.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if tokio::time::timeout(std::time::Duration::from_secs(5), self.task)
            .await
            .is_err()
        {
            warn!("Controller loop did not stop in time");
        }
    }
}

/// The controller event loop. Owns the registry and both transports.
async fn run(
    registry: SessionRegistry,
    mut session_events: mpsc::Receiver<SessionEvent>,
    mut host_rx: mpsc::Receiver<HostEvent>,
    listener: Option<LanListener>,
    relay: Option<RelayClient>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                debug!("Controller shutdown requested");
                break;
            }

            event = session_events.recv() => {
                match event {
                    Some(event) => fan_out(event, &listener, &relay),
                    None => {}
                }
            }

            event = host_rx.recv() => {
                match event {
                    Some(event) => handle_event(event, &registry, &listener, &relay).await,
                    None => break,
                }
            }
        }
    }

    // Reverse order teardown: relay, listener, PTYs
    if let Some(relay) = relay {
        relay.stop().await;
    }
    if let Some(listener) = &listener {
        listener.shutdown();
    }
    registry.shutdown();
    info!("Host controller stopped");
}

/// Fan a registry event out to every current peer.
fn fan_out(event: SessionEvent, listener: &Option<LanListener>, relay: &Option<RelayClient>) {
    let frame = match event {
        SessionEvent::Output { session_id, data } => Frame::Stdout { session_id, data },
        SessionEvent::Closed { session_id } => Frame::SessionClosed { session_id },
    };
    let encoding = frame.preferred_encoding();
    let msg = match encode_message(&frame, encoding) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "Failed to encode fan-out frame");
            return;
        }
    };

    if let Some(listener) = listener {
        listener.broadcast(msg.clone());
    }
    if let Some(relay) = relay {
        relay.send(msg);
    }
}

/// Lifecycle frames answered to a LAN peer are also pushed to the relay so
/// remote clients can track sessions they did not create.
fn mirror_to_relay(peer: PeerRef, frame: &Frame, relay: &Option<RelayClient>) {
    if peer == PeerRef::Relay {
        return;
    }
    let Some(relay) = relay else {
        return;
    };
    match encode_message(frame, Encoding::Json) {
        Ok(msg) => relay.send(msg),
        Err(e) => warn!(error = %e, "Failed to encode relay mirror"),
    }
}

/// Send one frame back to the transport a request came from.
fn reply(
    peer: PeerRef,
    frame: &Frame,
    encoding: Encoding,
    listener: &Option<LanListener>,
    relay: &Option<RelayClient>,
) {
    let msg = match encode_message(frame, encoding) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "Failed to encode reply");
            return;
        }
    };
    match peer {
        PeerRef::Lan(peer_id) => {
            if let Some(listener) = listener {
                listener.send_to(peer_id, msg);
            }
        }
        PeerRef::Relay => {
            if let Some(relay) = relay {
                relay.send(msg);
            }
        }
    }
}

async fn handle_event(
    event: HostEvent,
    registry: &SessionRegistry,
    listener: &Option<LanListener>,
    relay: &Option<RelayClient>,
) {
    match event {
        HostEvent::PeerConnected(peer_id) => {
            let frame = Frame::SessionList {
                sessions: registry.list(),
            };
            reply(PeerRef::Lan(peer_id), &frame, Encoding::Json, listener, relay);
        }

        HostEvent::PeerDisconnected(peer_id) => {
            debug!(peer_id, "Peer removed");
        }

        HostEvent::Frame {
            peer,
            frame,
            encoding,
        } => handle_frame(peer, frame, encoding, registry, listener, relay).await,
    }
}

async fn handle_frame(
    peer: PeerRef,
    frame: Frame,
    encoding: Encoding,
    registry: &SessionRegistry,
    listener: &Option<LanListener>,
    relay: &Option<RelayClient>,
) {
    match frame {
        // Liveness: echo the encoding the ping arrived in
        Frame::Ping => {
            reply(peer, &Frame::Pong, encoding, listener, relay);
        }
        Frame::Pong => {}

        Frame::List => {
            let frame = Frame::SessionList {
                sessions: registry.list(),
            };
            reply(peer, &frame, Encoding::Json, listener, relay);
            mirror_to_relay(peer, &frame, relay);
        }

        Frame::Create => match registry.create() {
            Ok(session_id) => {
                let frame = Frame::SessionCreated { session_id };
                reply(peer, &frame, Encoding::Json, listener, relay);
                mirror_to_relay(peer, &frame, relay);
            }
            Err(e) => {
                warn!(error = %e, "Session create failed");
                let frame = Frame::Error {
                    code: ERR_PTY_START.into(),
                    message: e.to_string(),
                };
                reply(peer, &frame, Encoding::Json, listener, relay);
            }
        },

        // Idempotent: closing an unknown id is a no-op. The registry's
        // Closed event drives the session_closed broadcast.
        Frame::Close { session_id } => {
            registry.close(&session_id).await;
        }

        Frame::Stdin { session_id, data } => {
            if let Err(e) = registry.write(&session_id, data).await {
                debug!(session_id = %session_id, error = %e, "Dropping stdin frame");
            }
        }

        Frame::Resize {
            session_id,
            rows,
            cols,
        } => {
            if let Err(e) = registry.resize(&session_id, rows, cols) {
                debug!(session_id = %session_id, error = %e, "Dropping resize frame");
            }
        }

        Frame::Unsupported { version } => {
            warn!(?peer, version, "Peer speaks unsupported protocol version");
            let frame = Frame::Error {
                code: ERR_UNSUPPORTED_VERSION.into(),
                message: "Unsupported protocol version".into(),
            };
            reply(peer, &frame, Encoding::Json, listener, relay);
            match peer {
                PeerRef::Lan(peer_id) => {
                    if let Some(listener) = listener {
                        listener.close_peer(peer_id);
                    }
                }
                PeerRef::Relay => {
                    if let Some(relay) = relay {
                        relay.bounce();
                    }
                }
            }
        }

        // session_assigned is consumed inside the relay client; one arriving
        // from a LAN peer is ignored
        Frame::SessionAssigned { .. } => {}

        // Server-to-client frames and unknown types are ignored on the host
        Frame::Stdout { .. }
        | Frame::SessionList { .. }
        | Frame::SessionCreated { .. }
        | Frame::SessionClosed { .. }
        | Frame::Error { .. }
        | Frame::Unknown => {}
    }
}

// =============================================================================
// Tests
// =============================================================================
