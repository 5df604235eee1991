//! blackhole-host: PTY sessions exposed over a LAN WebSocket listener and an
//! outbound relay uplink.
//!
//! The [`HostController`] owns a [`SessionRegistry`] of live PTYs, a
//! [`LanListener`] accepting local peers, and at most one [`RelayClient`]
//! uplink. All inbound frames from both transports funnel through the
//! controller; PTY output fans out to every connected peer.

pub mod cli;
pub mod controller;
pub mod listener;
pub mod pty;
pub mod registry;
pub mod relay;

mod wire;

pub use cli::Cli;
pub use controller::{HostConfig, HostController, HostEvent, PeerRef};
pub use listener::{LanListener, PeerId};
pub use registry::{PtyControl, PtySpawner, RealPtySpawner, SessionEvent, SessionRegistry, SpawnedPty};
pub use relay::{RelayClient, RelayConfig, RelayState, RelayStatus};
