//! Session registry for the blackhole host.
//!
//! Owns the mapping from session id to live PTY. The registry is the only
//! mutator of PTY state: writes are serialized per session through its input
//! channel, output is funneled into one cold event stream consumed by the
//! host controller, and a reader observing EOF removes its own session.
//!
//! `list()` returns ids in creation order; that order is the client's
//! default tab order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use blackhole_core::constants::{DEFAULT_COLS, DEFAULT_ROWS, PTY_OUTPUT_CHANNEL_CAPACITY};
use blackhole_core::error::{Error, Result};
use uuid::Uuid;

use crate::pty::{Pty, PtyPump};

/// Control operations on a spawned PTY (resize/kill).
pub trait PtyControl: Send + Sync {
    /// Resize the PTY.
    fn resize(&self, rows: u16, cols: u16) -> Result<()>;

    /// Kill the child process. Must be idempotent.
    fn kill(&self) -> Result<()>;
}

/// Spawned PTY handles and I/O channels.
pub struct SpawnedPty {
    pub control: Box<dyn PtyControl>,
    pub input_tx: mpsc::Sender<Vec<u8>>,
    pub output_rx: mpsc::Receiver<Vec<u8>>,
    /// Child process id, informational only.
    pub child_pid: Option<i32>,
}

/// Abstraction for creating PTY sessions (real PTY or fake for tests).
pub trait PtySpawner: Send + Sync {
    /// Spawn a shell at the requested size.
    fn spawn(&self, rows: u16, cols: u16, shell: Option<&str>) -> Result<SpawnedPty>;
}

/// Default spawner that launches real PTYs.
pub struct RealPtySpawner;

struct RealPtyControl {
    pty: Arc<Pty>,
}

impl PtyControl for RealPtyControl {
    fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.pty.resize(rows, cols)
    }

    fn kill(&self) -> Result<()> {
        self.pty.kill()
    }
}

impl PtySpawner for RealPtySpawner {
    fn spawn(&self, rows: u16, cols: u16, shell: Option<&str>) -> Result<SpawnedPty> {
        let pty = Arc::new(Pty::spawn(rows, cols, shell)?);
        let child_pid = Some(pty.pid());
        let (input_tx, output_rx) = PtyPump::start(pty.clone()).split();

        Ok(SpawnedPty {
            control: Box::new(RealPtyControl { pty }),
            input_tx,
            output_rx,
            child_pid,
        })
    }
}

/// Events surfaced by the registry's cold output stream.
#[derive(Debug)]
pub enum SessionEvent {
    /// PTY produced output for one session, in PTY-read order.
    Output { session_id: String, data: Vec<u8> },
    /// A session ended (explicit close or reader EOF). Emitted exactly once.
    Closed { session_id: String },
}

struct SessionHandle {
    control: Box<dyn PtyControl>,
    input_tx: mpsc::Sender<Vec<u8>>,
}

#[derive(Default)]
struct RegistryInner {
    /// Creation order; entries removed on close.
    order: Vec<String>,
    sessions: HashMap<String, SessionHandle>,
}

impl RegistryInner {
    fn remove(&mut self, session_id: &str) -> Option<SessionHandle> {
        let handle = self.sessions.remove(session_id)?;
        self.order.retain(|id| id != session_id);
        Some(handle)
    }
}

/// The host's session registry.
pub struct SessionRegistry {
    spawner: Box<dyn PtySpawner>,
    shell: Option<String>,
    inner: Arc<Mutex<RegistryInner>>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: Option<mpsc::Receiver<SessionEvent>>,
}

impl SessionRegistry {
    /// Create a registry backed by the given spawner.
    pub fn new(spawner: Box<dyn PtySpawner>, shell: Option<String>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(PTY_OUTPUT_CHANNEL_CAPACITY);
        Self {
            spawner,
            shell,
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Take the single cold event stream. Panics if taken twice.
    pub fn take_events(&mut self) -> mpsc::Receiver<SessionEvent> {
        self.events_rx
            .take()
            .expect("registry event stream already taken")
    }

    /// Create a new session and return its fresh id.
    ///
    /// Ids are never reused; the PTY starts at the default 80x24 and is
    /// resized by the first client resize frame.
    pub fn create(&self) -> Result<String> {
        let spawned = self
            .spawner
            .spawn(DEFAULT_ROWS, DEFAULT_COLS, self.shell.as_deref())?;

        let session_id = Uuid::new_v4().to_string().to_ascii_uppercase();
        info!(
            session_id = %session_id,
            child_pid = spawned.child_pid.unwrap_or(-1),
            "Session created"
        );

        {
            let mut inner = self.inner.lock().expect("registry lock poisoned");
            inner.order.push(session_id.clone());
            inner.sessions.insert(
                session_id.clone(),
                SessionHandle {
                    control: spawned.control,
                    input_tx: spawned.input_tx,
                },
            );
        }

        // Reader task: drain PTY output into the shared event stream. When
        // the output channel closes (EOF), the session removes itself and
        // emits Closed unless an explicit close already won.
        let inner = Arc::clone(&self.inner);
        let events = self.events_tx.clone();
        let id = session_id.clone();
        let mut output_rx = spawned.output_rx;
        tokio::spawn(async move {
            while let Some(data) = output_rx.recv().await {
                if events
                    .send(SessionEvent::Output {
                        session_id: id.clone(),
                        data,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }

            let removed = {
                let mut inner = inner.lock().expect("registry lock poisoned");
                inner.remove(&id)
            };
            if let Some(handle) = removed {
                let _ = handle.control.kill();
                debug!(session_id = %id, "Session reader observed EOF");
                let _ = events.send(SessionEvent::Closed { session_id: id }).await;
            }
        });

        Ok(session_id)
    }

    /// Close a session. Idempotent: closing an unknown id is a no-op.
    pub async fn close(&self, session_id: &str) {
        let removed = {
            let mut inner = self.inner.lock().expect("registry lock poisoned");
            inner.remove(session_id)
        };

        if let Some(handle) = removed {
            if let Err(e) = handle.control.kill() {
                warn!(session_id = %session_id, error = %e, "Kill failed");
            }
            info!(session_id = %session_id, "Session closed");
            let _ = self
                .events_tx
                .send(SessionEvent::Closed {
                    session_id: session_id.to_string(),
                })
                .await;
        }
    }

    /// Session ids in creation order.
    pub fn list(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .order
            .clone()
    }

    /// Whether a session id is registered.
    pub fn contains(&self, session_id: &str) -> bool {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .sessions
            .contains_key(session_id)
    }

    /// Write input bytes to a session's PTY.
    ///
    /// Writes are serialized by the per-session channel, so concurrent
    /// callers observe whole-write granularity.
    pub async fn write(&self, session_id: &str, data: Vec<u8>) -> Result<()> {
        let tx = {
            let inner = self.inner.lock().expect("registry lock poisoned");
            inner
                .sessions
                .get(session_id)
                .map(|h| h.input_tx.clone())
                .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?
        };

        tx.send(data).await.map_err(|_| Error::Pty {
            message: "input channel closed".to_string(),
        })
    }

    /// Resize a session's PTY.
    pub fn resize(&self, session_id: &str, rows: u16, cols: u16) -> Result<()> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        let handle = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        handle.control.resize(rows, cols)
    }

    /// Kill every session, most recent first. Used on controller stop.
    pub fn shutdown(&self) {
        let handles: Vec<(String, SessionHandle)> = {
            let mut inner = self.inner.lock().expect("registry lock poisoned");
            let ids: Vec<String> = inner.order.iter().rev().cloned().collect();
            ids.into_iter()
                .filter_map(|id| inner.remove(&id).map(|h| (id, h)))
                .collect()
        };

        for (id, handle) in handles {
            if let Err(e) = handle.control.kill() {
                warn!(session_id = %id, error = %e, "Kill failed during shutdown");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
