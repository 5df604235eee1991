//! Protocol and configuration constants for blackhole.

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// Current protocol version. Every frame carries it; anything else is refused.
pub const PROTOCOL_VERSION: u8 = 1;

/// Binary frame type code: terminal input (client to host).
pub const FRAME_STDIN: u8 = 1;

/// Binary frame type code: terminal output (host to client).
pub const FRAME_STDOUT: u8 = 2;

/// Binary frame type code: terminal resize (client to host).
pub const FRAME_RESIZE: u8 = 3;

/// Binary frame type code: liveness ping.
pub const FRAME_PING: u8 = 4;

/// Binary frame type code: liveness pong.
pub const FRAME_PONG: u8 = 5;

/// Fixed binary header length: version byte, type byte, u16 session-id length.
pub const BINARY_HEADER_LEN: usize = 4;

/// Maximum session-id length on the wire (u16 length field).
pub const MAX_SESSION_ID_LEN: usize = u16::MAX as usize;

/// Error code sent when a peer speaks an unsupported protocol version.
pub const ERR_UNSUPPORTED_VERSION: &str = "unsupported_version";

/// Error code sent when the PTY driver fails to start a shell.
pub const ERR_PTY_START: &str = "pty_start_failed";

/// Error code produced by the relay when no host is attached to a session.
pub const ERR_HORIZON_OFFLINE: &str = "horizon_offline";

// =============================================================================
// Network Constants
// =============================================================================

/// Default TCP port for the host's LAN WebSocket listener.
pub const DEFAULT_LAN_PORT: u16 = 9527;

/// Query value identifying the host on a relay connection.
pub const ROLE_HORIZON: &str = "horizon";

/// Query value identifying a client on a relay connection.
pub const ROLE_VOYAGER: &str = "voyager";

// =============================================================================
// Timing Constants
// =============================================================================

/// Interval between client heartbeat pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Silence on the wire after which a transport is declared dead.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(20);

/// First reconnect delay after a transport loss.
pub const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(2);

/// Reconnect delay cap; the doubling schedule clamps here.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Quiescent window for renderer metrics before a resize pass runs.
pub const METRICS_DEBOUNCE: Duration = Duration::from_millis(220);

/// Viewport/inset changes smaller than this are noise, not layout changes.
pub const METRICS_EPSILON_PX: f64 = 0.5;

// =============================================================================
// Terminal Defaults
// =============================================================================

/// Default terminal columns for a fresh session.
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal rows for a fresh session.
pub const DEFAULT_ROWS: u16 = 24;

/// TERM value exported to PTY children.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// PTY read chunk size.
pub const PTY_READ_CHUNK: usize = 4096;

/// Capacity of the bounded channel carrying PTY output into the fan-out task.
pub const PTY_OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Scrollback line cap for an active client-side session view.
pub const SCROLLBACK_LINES: usize = 10_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_constants_are_ordered() {
        assert!(HEARTBEAT_INTERVAL < HEARTBEAT_TIMEOUT);
        assert!(RECONNECT_INITIAL_DELAY < RECONNECT_MAX_DELAY);
    }

    #[test]
    fn frame_type_codes_are_distinct() {
        let codes = [FRAME_STDIN, FRAME_STDOUT, FRAME_RESIZE, FRAME_PING, FRAME_PONG];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn lan_port_is_unprivileged() {
        assert!(DEFAULT_LAN_PORT > 1024);
    }
}
