//! Relay uplink tests against an in-process stub relay.
//!
//! The test plays the relay: it accepts the host's outbound socket, inspects
//! the connect URL, assigns a session code, and exercises the frame path and
//! the reconnect contract.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

use blackhole_host::{HostConfig, HostController, RelayConfig, RelayState};
use blackhole_test_utils::EchoPtySpawner;

type ServerWs = WebSocketStream<TcpStream>;

const RECV_TIMEOUT: Duration = Duration::from_secs(15);

/// Accept loop for the stub relay: hands each (connect URI, socket) pair to
/// the test body.
async fn spawn_stub_relay() -> (std::net::SocketAddr, mpsc::Receiver<(String, ServerWs)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (conn_tx, conn_rx) = mpsc::channel(4);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let uri_slot = Arc::new(Mutex::new(String::new()));
            let cb_slot = Arc::clone(&uri_slot);
            let ws = match accept_hdr_async(stream, move |req: &Request, resp: Response| {
                *cb_slot.lock().unwrap() = req.uri().to_string();
                Ok(resp)
            })
            .await
            {
                Ok(ws) => ws,
                Err(_) => continue,
            };
            let uri = uri_slot.lock().unwrap().clone();
            if conn_tx.send((uri, ws)).await.is_err() {
                break;
            }
        }
    });

    (addr, conn_rx)
}

async fn start_relay_host(relay_addr: std::net::SocketAddr) -> HostController {
    let config = HostConfig {
        lan_enabled: false,
        lan_port: 0,
        relay: Some(RelayConfig {
            url: format!("ws://{}", relay_addr),
            token: Some("tok".into()),
        }),
        shell: None,
        dev_mode: true,
    };
    HostController::start(config, Box::new(EchoPtySpawner::new()))
        .await
        .expect("host starts")
}

async fn recv_json(ws: &mut ServerWs) -> serde_json::Value {
    loop {
        let msg = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("frame within deadline")
            .expect("socket open")
            .expect("read ok");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("valid json");
        }
    }
}

#[tokio::test]
async fn assignment_and_reconnect_carry_the_session_code() {
    let (relay_addr, mut connections) = spawn_stub_relay().await;
    let controller = start_relay_host(relay_addr).await;

    // Initial connect: role and token, but no session yet
    let (uri, mut ws) = timeout(RECV_TIMEOUT, connections.recv())
        .await
        .expect("host dials the relay")
        .unwrap();
    assert!(uri.contains("role=horizon"), "uri: {}", uri);
    assert!(uri.contains("token=tok"), "uri: {}", uri);
    assert!(!uri.contains("session="), "uri: {}", uri);

    // Assign a session code; the host exposes it through its status
    ws.send(Message::Text(
        r#"{"v":1,"type":"session_assigned","sessionId":"AB12CD"}"#.into(),
    ))
    .await
    .unwrap();

    let mut status = controller.relay_status().expect("relay configured");
    timeout(RECV_TIMEOUT, async {
        loop {
            {
                let snapshot = status.borrow();
                if snapshot.session_id.as_deref() == Some("AB12CD")
                    && snapshot.state == RelayState::Connected
                {
                    break;
                }
            }
            if status.changed().await.is_err() {
                panic!("status channel closed");
            }
        }
    })
    .await
    .expect("assignment surfaces in status");

    // Force a socket loss; the host reconnects presenting the code
    drop(ws);
    let (uri, _ws) = timeout(RECV_TIMEOUT, connections.recv())
        .await
        .expect("host reconnects after backoff")
        .unwrap();
    assert!(uri.contains("role=horizon"), "uri: {}", uri);
    assert!(uri.contains("session=AB12CD"), "uri: {}", uri);
    assert!(uri.contains("token=tok"), "uri: {}", uri);

    controller.stop().await;
}

#[tokio::test]
async fn relay_peers_get_the_full_frame_set() {
    let (relay_addr, mut connections) = spawn_stub_relay().await;
    let controller = start_relay_host(relay_addr).await;

    let (_uri, mut ws) = timeout(RECV_TIMEOUT, connections.recv())
        .await
        .expect("host dials the relay")
        .unwrap();

    // list -> session_list
    ws.send(Message::Text(r#"{"v":1,"type":"list"}"#.into()))
        .await
        .unwrap();
    let list = recv_json(&mut ws).await;
    assert_eq!(list["type"], "session_list");
    assert_eq!(list["sessions"].as_array().unwrap().len(), 0);

    // create -> session_created
    ws.send(Message::Text(r#"{"v":1,"type":"create"}"#.into()))
        .await
        .unwrap();
    let created = recv_json(&mut ws).await;
    assert_eq!(created["type"], "session_created");
    let session_id = created["sessionId"].as_str().unwrap().to_string();

    // stdin through the relay comes back as a stdout broadcast
    let id = session_id.as_bytes();
    let mut frame = vec![0x01, 0x01];
    frame.extend_from_slice(&(id.len() as u16).to_be_bytes());
    frame.extend_from_slice(id);
    frame.extend_from_slice(b"relay path\n");
    ws.send(Message::Binary(frame)).await.unwrap();

    let stdout = loop {
        let msg = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("stdout within deadline")
            .unwrap()
            .unwrap();
        if let Message::Binary(bytes) = msg {
            break bytes;
        }
    };
    assert_eq!(stdout[1], 0x02, "stdout type code");
    assert!(String::from_utf8_lossy(&stdout).contains("relay path"));

    // ping -> pong on the same transport
    ws.send(Message::Text(r#"{"v":1,"type":"ping"}"#.into()))
        .await
        .unwrap();
    let pong = recv_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");

    controller.stop().await;
}

#[tokio::test]
async fn output_fans_out_to_lan_peers_and_relay() {
    let (relay_addr, mut connections) = spawn_stub_relay().await;

    let config = HostConfig {
        lan_enabled: true,
        lan_port: 0,
        relay: Some(RelayConfig {
            url: format!("ws://{}", relay_addr),
            token: None,
        }),
        shell: None,
        dev_mode: true,
    };
    let controller = HostController::start(config, Box::new(EchoPtySpawner::new()))
        .await
        .expect("host starts");
    let lan_addr = controller.lan_addr().unwrap();

    let (_uri, mut relay_ws) = timeout(RECV_TIMEOUT, connections.recv())
        .await
        .expect("host dials the relay")
        .unwrap();

    // One LAN peer creates a session and types into it
    let (mut lan_ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", lan_addr))
        .await
        .expect("lan peer connects");
    // Skip the greeting
    loop {
        if let Some(Ok(Message::Text(_))) = lan_ws.next().await {
            break;
        }
    }
    lan_ws
        .send(Message::Text(r#"{"type":"create"}"#.into()))
        .await
        .unwrap();
    let session_id = loop {
        if let Some(Ok(Message::Text(text))) = lan_ws.next().await {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            if value["type"] == "session_created" {
                break value["sessionId"].as_str().unwrap().to_string();
            }
        }
    };

    // The LAN-created session is mirrored to the relay for remote clients
    let mirrored = recv_json(&mut relay_ws).await;
    assert_eq!(mirrored["type"], "session_created");
    assert_eq!(mirrored["sessionId"], session_id.as_str());

    let id = session_id.as_bytes();
    let mut frame = vec![0x01, 0x01];
    frame.extend_from_slice(&(id.len() as u16).to_be_bytes());
    frame.extend_from_slice(id);
    frame.extend_from_slice(b"fan-out\n");
    lan_ws.send(Message::Binary(frame)).await.unwrap();

    // Both the LAN peer and the relay receive exactly that payload
    let lan_stdout = timeout(RECV_TIMEOUT, async {
        loop {
            if let Some(Ok(Message::Binary(bytes))) = lan_ws.next().await {
                break bytes;
            }
        }
    })
    .await
    .expect("lan stdout");
    let relay_stdout = timeout(RECV_TIMEOUT, async {
        loop {
            if let Some(Ok(Message::Binary(bytes))) = relay_ws.next().await {
                break bytes;
            }
        }
    })
    .await
    .expect("relay stdout");

    assert_eq!(lan_stdout, relay_stdout);
    assert!(String::from_utf8_lossy(&lan_stdout).contains("fan-out"));

    controller.stop().await;
}
