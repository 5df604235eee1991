//! Fake PTY for testing without real terminals.
//!
//! The echo spawner produces sessions whose "shell" reflects every written
//! byte straight back as output, which is enough to exercise the whole
//! stdin/stdout data path end to end.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use blackhole_core::Result;
use blackhole_host::registry::{PtyControl, PtySpawner, SpawnedPty};

/// Shared record of control operations across all fake PTYs of a spawner.
#[derive(Debug, Default)]
pub struct FakePtyLog {
    /// Spawn sizes in order.
    pub spawns: Vec<(u16, u16)>,
    /// Resize calls in order.
    pub resizes: Vec<(u16, u16)>,
    /// Number of kill calls.
    pub kills: usize,
}

struct FakePtyControl {
    log: Arc<Mutex<FakePtyLog>>,
}

impl PtyControl for FakePtyControl {
    fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.log.lock().unwrap().resizes.push((rows, cols));
        Ok(())
    }

    fn kill(&self) -> Result<()> {
        self.log.lock().unwrap().kills += 1;
        Ok(())
    }
}

/// Spawner whose PTYs echo input back as output.
#[derive(Default)]
pub struct EchoPtySpawner {
    log: Arc<Mutex<FakePtyLog>>,
}

impl EchoPtySpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared log handle for assertions.
    pub fn log(&self) -> Arc<Mutex<FakePtyLog>> {
        Arc::clone(&self.log)
    }
}

impl PtySpawner for EchoPtySpawner {
    fn spawn(&self, rows: u16, cols: u16, _shell: Option<&str>) -> Result<SpawnedPty> {
        self.log.lock().unwrap().spawns.push((rows, cols));

        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(64);
        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(64);
        tokio::spawn(async move {
            while let Some(data) = input_rx.recv().await {
                if output_tx.send(data).await.is_err() {
                    break;
                }
            }
        });

        Ok(SpawnedPty {
            control: Box::new(FakePtyControl {
                log: Arc::clone(&self.log),
            }),
            input_tx,
            output_rx,
            child_pid: None,
        })
    }
}
