//! blackhole-voyager: client controller for blackhole hosts.
//!
//! Maintains one WebSocket transport to either a LAN host URL or a relay
//! URL, tracks session lifecycle, forwards keystrokes and resize events, and
//! paces the local terminal renderer through a debounced cell-metrics resize
//! contract.

pub mod cli;
pub mod coordinator;
pub mod emulator;
pub mod metrics;
pub mod modifiers;
pub mod terminal;
pub mod transport;

mod wire;

pub use cli::Cli;
pub use coordinator::{Coordinator, Effect, Event, TimerKind, UserAction};
pub use emulator::{EmulatorFactory, TerminalEmulator};
pub use metrics::{RendererMetrics, ResizeScheduler};
pub use modifiers::{ModifierKey, ModifierState};
pub use transport::{Transport, TransportConfig, TransportEvent};
