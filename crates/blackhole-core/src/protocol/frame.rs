//! Logical frame types shared by both transports.
//!
//! One enum covers both encodings. The data path (`Stdin`, `Stdout`,
//! `Resize`) travels as fixed-header binary frames; control frames travel as
//! JSON objects. `Ping`/`Pong` exist in both spellings and replies echo the
//! spelling they arrived in.

/// Which wire encoding a frame arrived in (or should leave in).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Fixed-header binary WebSocket message.
    Binary,
    /// UTF-8 JSON WebSocket text message.
    Json,
}

/// A raw outgoing WebSocket payload produced by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WirePayload {
    Binary(Vec<u8>),
    Text(String),
}

/// Top-level protocol frame.
///
/// `Unknown` is produced by the decoder for recognizably-versioned frames of
/// an unrecognized type; consumers ignore it, which keeps the protocol
/// forward compatible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Terminal input bytes for one session (client to host).
    Stdin { session_id: String, data: Vec<u8> },
    /// Terminal output bytes for one session (host to client).
    Stdout { session_id: String, data: Vec<u8> },
    /// Terminal resize for one session (client to host).
    Resize {
        session_id: String,
        rows: u16,
        cols: u16,
    },
    /// Liveness probe.
    Ping,
    /// Liveness reply.
    Pong,
    /// Request the current session list.
    List,
    /// Request a new session.
    Create,
    /// Request closing a session.
    Close { session_id: String },
    /// Current session ids in creation order.
    SessionList { sessions: Vec<String> },
    /// A session was created.
    SessionCreated { session_id: String },
    /// A session ended.
    SessionClosed { session_id: String },
    /// Relay-assigned session code for the host uplink.
    SessionAssigned { session_id: String },
    /// Operation failure report.
    Error { code: String, message: String },
    /// The sender saw a protocol version it does not speak.
    Unsupported { version: u64 },
    /// Versioned but unrecognized frame; ignored.
    Unknown,
}

impl Frame {
    /// The encoding this frame is normally produced in.
    ///
    /// Data-path frames are always binary; control frames are always JSON.
    /// `Ping`/`Pong` default to JSON but may be echoed as binary.
    pub fn preferred_encoding(&self) -> Encoding {
        match self {
            Frame::Stdin { .. } | Frame::Stdout { .. } | Frame::Resize { .. } => Encoding::Binary,
            _ => Encoding::Json,
        }
    }

    /// The session id this frame addresses, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Frame::Stdin { session_id, .. }
            | Frame::Stdout { session_id, .. }
            | Frame::Resize { session_id, .. }
            | Frame::Close { session_id }
            | Frame::SessionCreated { session_id }
            | Frame::SessionClosed { session_id }
            | Frame::SessionAssigned { session_id } => Some(session_id),
            _ => None,
        }
    }
}
