//! Conversions between logical frames and WebSocket messages.

use tokio_tungstenite::tungstenite::Message;

use blackhole_core::Result;
use blackhole_core::protocol::{Encoding, Frame, decode_binary, decode_text, encode_binary, encode_json};

/// Encode a frame in the requested encoding, ready to send.
pub(crate) fn encode_message(frame: &Frame, encoding: Encoding) -> Result<Message> {
    Ok(match encoding {
        Encoding::Binary => Message::Binary(encode_binary(frame)?),
        Encoding::Json => Message::Text(encode_json(frame)?),
    })
}

/// Decode an inbound WebSocket message; `None` means drop it silently.
///
/// WebSocket-level ping/pong/close frames are handled by the transport and
/// never reach the frame layer.
pub(crate) fn decode_message(msg: &Message) -> Option<(Frame, Encoding)> {
    match msg {
        Message::Binary(bytes) => decode_binary(bytes).map(|f| (f, Encoding::Binary)),
        Message::Text(text) => decode_text(text).map(|f| (f, Encoding::Json)),
        _ => None,
    }
}
