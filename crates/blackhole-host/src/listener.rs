//! LAN WebSocket listener for the blackhole host.
//!
//! Binds a plain WebSocket server on all IPv4 interfaces and maintains the
//! set of accepted peers. Each peer gets a writer task draining an unbounded
//! queue and a reader task that forwards decoded frames into the host
//! controller's inbox. A send failure or read EOF removes the peer.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use blackhole_core::error::Result;

use crate::controller::{HostEvent, PeerRef};
use crate::wire::decode_message;

/// Identifies one accepted LAN peer for scoped replies.
pub type PeerId = u64;

type PeerMap = Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<Message>>>>;

/// WebSocket server owning the LAN peer set.
pub struct LanListener {
    peers: PeerMap,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl LanListener {
    /// Bind on `0.0.0.0:port` and start accepting peers.
    ///
    /// Pass port 0 to let the OS pick (tests); the bound address is
    /// available via [`local_addr`](Self::local_addr).
    pub async fn bind(port: u16, events: mpsc::Sender<HostEvent>) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "LAN listener bound");

        let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));
        let accept_peers = Arc::clone(&peers);

        let accept_task = tokio::spawn(async move {
            let mut next_peer_id: PeerId = 1;
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let peer_id = next_peer_id;
                        next_peer_id += 1;
                        let peers = Arc::clone(&accept_peers);
                        let events = events.clone();
                        tokio::spawn(async move {
                            handle_peer(stream, addr, peer_id, peers, events).await;
                        });
                    }
                    Err(e) => {
                        debug!(error = %e, "Accept error");
                    }
                }
            }
        });

        Ok(Self {
            peers,
            local_addr,
            accept_task,
        })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send one message to every current peer, pruning dead ones.
    pub fn broadcast(&self, msg: Message) {
        let mut peers = self.peers.lock().expect("peer map lock poisoned");
        peers.retain(|peer_id, tx| {
            let alive = tx.send(msg.clone()).is_ok();
            if !alive {
                debug!(peer_id, "Dropping peer with dead send queue");
            }
            alive
        });
    }

    /// Send one message to a single peer. Returns false if it is gone.
    pub fn send_to(&self, peer_id: PeerId, msg: Message) -> bool {
        let peers = self.peers.lock().expect("peer map lock poisoned");
        peers
            .get(&peer_id)
            .map(|tx| tx.send(msg).is_ok())
            .unwrap_or(false)
    }

    /// Close one peer's socket and forget it.
    pub fn close_peer(&self, peer_id: PeerId) {
        let removed = {
            let mut peers = self.peers.lock().expect("peer map lock poisoned");
            peers.remove(&peer_id)
        };
        if let Some(tx) = removed {
            let _ = tx.send(Message::Close(None));
        }
    }

    /// Number of live peers.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().expect("peer map lock poisoned").len()
    }

    /// Stop accepting and disconnect every peer.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        let mut peers = self.peers.lock().expect("peer map lock poisoned");
        for (_, tx) in peers.drain() {
            let _ = tx.send(Message::Close(None));
        }
    }
}

impl Drop for LanListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Per-peer lifecycle: upgrade, register, pump both directions, deregister.
async fn handle_peer(
    stream: TcpStream,
    addr: SocketAddr,
    peer_id: PeerId,
    peers: PeerMap,
    events: mpsc::Sender<HostEvent>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(addr = %addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    info!(peer_id, addr = %addr, "LAN peer connected");

    let (mut sink, mut ws_stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    {
        let mut map = peers.lock().expect("peer map lock poisoned");
        map.insert(peer_id, tx);
    }

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
    });

    // The controller greets every new peer with a scoped session_list
    if events.send(HostEvent::PeerConnected(peer_id)).await.is_err() {
        peers.lock().expect("peer map lock poisoned").remove(&peer_id);
        send_task.abort();
        return;
    }

    while let Some(msg) = ws_stream.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(msg) => {
                if let Some((frame, encoding)) = decode_message(&msg) {
                    let event = HostEvent::Frame {
                        peer: PeerRef::Lan(peer_id),
                        frame,
                        encoding,
                    };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                debug!(peer_id, error = %e, "LAN peer read error");
                break;
            }
        }
    }

    peers.lock().expect("peer map lock poisoned").remove(&peer_id);
    send_task.abort();
    let _ = events.send(HostEvent::PeerDisconnected(peer_id)).await;
    info!(peer_id, addr = %addr, "LAN peer disconnected");
}
