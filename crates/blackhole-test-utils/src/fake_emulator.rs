//! Recording terminal emulator for client-side tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use blackhole_core::Result;
use blackhole_voyager::{EmulatorFactory, TerminalEmulator};

/// Observable state of one fake emulator.
#[derive(Debug)]
pub struct FakeEmulatorState {
    pub writes: Vec<String>,
    pub resizes: Vec<(u16, u16)>,
    /// Reported laid-out buffer height.
    pub buffer_lines: usize,
    pub selection: Option<String>,
}

impl Default for FakeEmulatorState {
    fn default() -> Self {
        Self {
            writes: Vec::new(),
            resizes: Vec::new(),
            buffer_lines: 24,
            selection: None,
        }
    }
}

struct FakeEmulator {
    state: Arc<Mutex<FakeEmulatorState>>,
}

impl TerminalEmulator for FakeEmulator {
    fn write(&mut self, text: &str) {
        self.state.lock().unwrap().writes.push(text.to_string());
    }

    fn resize(&mut self, cols: u16, rows: u16, _pixel_width: u32, _pixel_height: u32) -> Result<()> {
        self.state.lock().unwrap().resizes.push((cols, rows));
        Ok(())
    }

    fn selection_text(&self) -> Option<String> {
        self.state.lock().unwrap().selection.clone()
    }

    fn buffer_lines(&self) -> usize {
        self.state.lock().unwrap().buffer_lines
    }
}

/// Factory that records every emulator it hands out, keyed by session id.
#[derive(Default)]
pub struct FakeEmulatorFactory {
    states: Arc<Mutex<HashMap<String, Arc<Mutex<FakeEmulatorState>>>>>,
}

impl FakeEmulatorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that shares this factory's records.
    pub fn handle(&self) -> Self {
        Self {
            states: Arc::clone(&self.states),
        }
    }

    /// State of the emulator created for a session, if any.
    pub fn state(&self, session_id: &str) -> Option<Arc<Mutex<FakeEmulatorState>>> {
        self.states.lock().unwrap().get(session_id).cloned()
    }

    /// Session ids that got an emulator, in no particular order.
    pub fn created_sessions(&self) -> Vec<String> {
        self.states.lock().unwrap().keys().cloned().collect()
    }
}

impl EmulatorFactory for FakeEmulatorFactory {
    fn create(&self, session_id: &str) -> Box<dyn TerminalEmulator> {
        let state = Arc::new(Mutex::new(FakeEmulatorState::default()));
        self.states
            .lock()
            .unwrap()
            .insert(session_id.to_string(), Arc::clone(&state));
        Box::new(FakeEmulator { state })
    }
}
