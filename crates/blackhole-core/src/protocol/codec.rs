//! Dual-encoding codec for blackhole frames.
//!
//! Binary format (data path):
//!
//! ```text
//! byte 0       : protocol version (= 1)
//! byte 1       : frame type code
//! bytes 2..3   : session-id length L, big-endian u16
//! bytes 4..4+L : session-id (UTF-8, may be empty for ping/pong)
//! bytes 4+L..  : payload (type-specific)
//! ```
//!
//! JSON format (control path): an object with a mandatory `"v": 1` field
//! (injected by the encoder) and a `"type"` discriminator.
//!
//! The decoders never panic and never error: malformed input is dropped
//! (`None`), a bad version becomes `Frame::Unsupported`, and a versioned but
//! unrecognized type becomes `Frame::Unknown`.

use bytes::{BufMut, BytesMut};
use serde::Deserialize;
use serde_json::json;

use crate::constants::{
    BINARY_HEADER_LEN, FRAME_PING, FRAME_PONG, FRAME_RESIZE, FRAME_STDIN, FRAME_STDOUT,
    MAX_SESSION_ID_LEN, PROTOCOL_VERSION,
};
use crate::error::{Error, Result};

use super::frame::{Encoding, Frame, WirePayload};

// =============================================================================
// Encoding
// =============================================================================

/// Encode a frame in its preferred encoding.
pub fn encode(frame: &Frame) -> Result<WirePayload> {
    match frame.preferred_encoding() {
        Encoding::Binary => Ok(WirePayload::Binary(encode_binary(frame)?)),
        Encoding::Json => Ok(WirePayload::Text(encode_json(frame)?)),
    }
}

/// Encode a data-path frame (stdin/stdout/resize/ping/pong) as binary.
pub fn encode_binary(frame: &Frame) -> Result<Vec<u8>> {
    let (code, session_id, payload): (u8, &str, Vec<u8>) = match frame {
        Frame::Stdin { session_id, data } => (FRAME_STDIN, session_id, data.clone()),
        Frame::Stdout { session_id, data } => (FRAME_STDOUT, session_id, data.clone()),
        Frame::Resize {
            session_id,
            rows,
            cols,
        } => {
            let mut payload = Vec::with_capacity(4);
            payload.extend_from_slice(&rows.to_be_bytes());
            payload.extend_from_slice(&cols.to_be_bytes());
            (FRAME_RESIZE, session_id, payload)
        }
        Frame::Ping => (FRAME_PING, "", Vec::new()),
        Frame::Pong => (FRAME_PONG, "", Vec::new()),
        other => {
            return Err(Error::Codec {
                message: format!("frame has no binary form: {:?}", other),
            });
        }
    };

    let id_bytes = session_id.as_bytes();
    if id_bytes.len() > MAX_SESSION_ID_LEN {
        return Err(Error::Codec {
            message: format!("session id too long: {} bytes", id_bytes.len()),
        });
    }

    let mut buf = BytesMut::with_capacity(BINARY_HEADER_LEN + id_bytes.len() + payload.len());
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(code);
    buf.put_u16(id_bytes.len() as u16);
    buf.put_slice(id_bytes);
    buf.put_slice(&payload);
    Ok(buf.to_vec())
}

/// Encode a control frame as a JSON text message.
///
/// The `"v": 1` field is always present in the output.
pub fn encode_json(frame: &Frame) -> Result<String> {
    let value = match frame {
        Frame::Ping => json!({"v": 1, "type": "ping"}),
        Frame::Pong => json!({"v": 1, "type": "pong"}),
        Frame::List => json!({"v": 1, "type": "list"}),
        Frame::Create => json!({"v": 1, "type": "create"}),
        Frame::Close { session_id } => {
            json!({"v": 1, "type": "close", "sessionId": session_id})
        }
        Frame::SessionList { sessions } => {
            json!({"v": 1, "type": "session_list", "sessions": sessions})
        }
        Frame::SessionCreated { session_id } => {
            json!({"v": 1, "type": "session_created", "sessionId": session_id})
        }
        Frame::SessionClosed { session_id } => {
            json!({"v": 1, "type": "session_closed", "sessionId": session_id})
        }
        Frame::SessionAssigned { session_id } => {
            json!({"v": 1, "type": "session_assigned", "sessionId": session_id})
        }
        Frame::Error { code, message } => {
            json!({"v": 1, "type": "error", "code": code, "message": message})
        }
        Frame::Unsupported { version } => {
            json!({"v": 1, "type": "unsupported", "version": version})
        }
        other => {
            return Err(Error::Codec {
                message: format!("frame has no JSON form: {:?}", other),
            });
        }
    };
    Ok(value.to_string())
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a raw WebSocket payload, tagging the result with its encoding.
///
/// Returns `None` when the payload is malformed and must be dropped.
pub fn decode_payload(payload: &WirePayload) -> Option<(Frame, Encoding)> {
    match payload {
        WirePayload::Binary(bytes) => decode_binary(bytes).map(|f| (f, Encoding::Binary)),
        WirePayload::Text(text) => decode_text(text).map(|f| (f, Encoding::Json)),
    }
}

/// Decode a binary frame.
///
/// Truncated or malformed input returns `None` (the frame is dropped). A
/// version byte other than 1 yields `Frame::Unsupported`; an unknown type
/// code yields `Frame::Unknown`.
pub fn decode_binary(data: &[u8]) -> Option<Frame> {
    let version = *data.first()?;
    if version != PROTOCOL_VERSION {
        return Some(Frame::Unsupported {
            version: version as u64,
        });
    }
    if data.len() < BINARY_HEADER_LEN {
        return None;
    }

    let code = data[1];
    let id_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let rest = &data[BINARY_HEADER_LEN..];
    if rest.len() < id_len {
        return None;
    }

    let session_id = std::str::from_utf8(&rest[..id_len]).ok()?.to_string();
    let payload = &rest[id_len..];

    match code {
        FRAME_STDIN => Some(Frame::Stdin {
            session_id,
            data: payload.to_vec(),
        }),
        FRAME_STDOUT => Some(Frame::Stdout {
            session_id,
            data: payload.to_vec(),
        }),
        FRAME_RESIZE => {
            if payload.len() != 4 {
                return None;
            }
            let rows = u16::from_be_bytes([payload[0], payload[1]]);
            let cols = u16::from_be_bytes([payload[2], payload[3]]);
            Some(Frame::Resize {
                session_id,
                rows,
                cols,
            })
        }
        FRAME_PING => Some(Frame::Ping),
        FRAME_PONG => Some(Frame::Pong),
        _ => Some(Frame::Unknown),
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    v: Option<u64>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionIdBody {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionListBody {
    sessions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct UnsupportedBody {
    #[serde(default)]
    version: u64,
}

/// Decode a JSON text frame.
///
/// The version field is checked before the type: `v` absent is treated as 1
/// (the encoder injects it), any other value yields `Frame::Unsupported`.
/// An unknown `type` yields `Frame::Unknown`; a known type with a malformed
/// body returns `None` (the frame is dropped).
pub fn decode_text(text: &str) -> Option<Frame> {
    let envelope: Envelope = serde_json::from_str(text).ok()?;

    match envelope.v {
        None | Some(1) => {}
        Some(version) => return Some(Frame::Unsupported { version }),
    }

    let kind = envelope.kind?;
    match kind.as_str() {
        "ping" => Some(Frame::Ping),
        "pong" => Some(Frame::Pong),
        "list" => Some(Frame::List),
        "create" => Some(Frame::Create),
        "close" => serde_json::from_str::<SessionIdBody>(text)
            .ok()
            .map(|b| Frame::Close {
                session_id: b.session_id,
            }),
        "session_list" => serde_json::from_str::<SessionListBody>(text)
            .ok()
            .map(|b| Frame::SessionList {
                sessions: b.sessions,
            }),
        "session_created" => serde_json::from_str::<SessionIdBody>(text)
            .ok()
            .map(|b| Frame::SessionCreated {
                session_id: b.session_id,
            }),
        "session_closed" => serde_json::from_str::<SessionIdBody>(text)
            .ok()
            .map(|b| Frame::SessionClosed {
                session_id: b.session_id,
            }),
        "session_assigned" => serde_json::from_str::<SessionIdBody>(text)
            .ok()
            .map(|b| Frame::SessionAssigned {
                session_id: b.session_id,
            }),
        "error" => serde_json::from_str::<ErrorBody>(text)
            .ok()
            .map(|b| Frame::Error {
                code: b.code,
                message: b.message,
            }),
        "unsupported" => serde_json::from_str::<UnsupportedBody>(text)
            .ok()
            .map(|b| Frame::Unsupported { version: b.version }),
        _ => Some(Frame::Unknown),
    }
}

// =============================================================================
// Tests
// =============================================================================
