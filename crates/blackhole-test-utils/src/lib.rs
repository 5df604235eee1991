//! Test doubles for blackhole integration tests.
//!
//! Provides a fake PTY spawner that can be driven programmatically (no real
//! processes) and a recording terminal emulator for the client side.

mod fake_emulator;
mod fake_pty;

pub use fake_emulator::{FakeEmulatorFactory, FakeEmulatorState};
pub use fake_pty::{EchoPtySpawner, FakePtyLog};
