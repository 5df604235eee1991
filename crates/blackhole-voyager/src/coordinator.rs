//! Session & renderer coordinator.
//!
//! A single-threaded reducer living on the UI task: every input is an
//! [`Event`], every externally visible consequence is an [`Effect`]. The
//! coordinator owns the session list, the active id, the per-session
//! emulators, the sticky modifier flags, and the resize scheduler; timers
//! and the socket are driven by whoever runs the loop.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use blackhole_core::constants::METRICS_DEBOUNCE;
use blackhole_core::protocol::{Encoding, Frame};

use crate::emulator::{EmulatorFactory, TerminalEmulator};
use crate::metrics::{RendererMetrics, ResizeScheduler};
use crate::modifiers::{ModifierKey, ModifierState};
use crate::transport::TransportEvent;

/// Timers the coordinator may ask its driver to arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Metrics debounce window elapsed.
    MetricsDebounce,
}

/// User-originated actions from the surrounding UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    /// Keystroke text from the terminal surface.
    Input(String),
    /// Arm a sticky one-shot modifier.
    SetModifier(ModifierKey),
    /// Make a session active.
    SelectSession(String),
    /// Ask the host for a new session.
    CreateSession,
    /// Ask the host to close a session.
    CloseSession(String),
    /// Explicit disconnect; no reconnect follows.
    Disconnect,
}

/// Everything the coordinator reacts to.
#[derive(Debug)]
pub enum Event {
    Transport(TransportEvent),
    Metrics(RendererMetrics),
    Tick(TimerKind),
    User(UserAction),
}

/// Externally visible consequences of one event.
#[derive(Debug, PartialEq, Eq)]
pub enum Effect {
    /// Transmit a frame in the given encoding.
    Send { frame: Frame, encoding: Encoding },
    /// Arm (or re-arm) a timer.
    Schedule(TimerKind, Duration),
    /// Tear the transport down for good.
    Disconnect,
}

impl Effect {
    fn send(frame: Frame) -> Self {
        let encoding = frame.preferred_encoding();
        Effect::Send { frame, encoding }
    }
}

/// The reducer.
pub struct Coordinator {
    factory: Box<dyn EmulatorFactory>,
    sessions: Vec<String>,
    active: Option<String>,
    emulators: HashMap<String, Box<dyn TerminalEmulator>>,
    modifiers: ModifierState,
    scheduler: ResizeScheduler,
    last_error: Option<String>,
}

impl Coordinator {
    pub fn new(factory: Box<dyn EmulatorFactory>) -> Self {
        Self {
            factory,
            sessions: Vec::new(),
            active: None,
            emulators: HashMap::new(),
            modifiers: ModifierState::default(),
            scheduler: ResizeScheduler::new(),
            last_error: None,
        }
    }

    /// Session ids in host order.
    pub fn sessions(&self) -> &[String] {
        &self.sessions
    }

    /// The id keystrokes and resizes are directed at.
    pub fn active_session(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Last user-visible error; cleared on successful connect.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Selection of the active emulator, for copy.
    pub fn selection_text(&self) -> Option<String> {
        let active = self.active.as_ref()?;
        self.emulators.get(active)?.selection_text()
    }

    /// Reduce one event into effects.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::Transport(TransportEvent::Connected) => {
                self.last_error = None;
                Vec::new()
            }
            Event::Transport(TransportEvent::Disconnected { reason, .. }) => {
                if let Some(reason) = reason {
                    if !reason.is_empty() {
                        self.last_error = Some(reason);
                    }
                }
                self.sessions.clear();
                self.emulators.clear();
                self.active = None;
                self.scheduler.reset();
                Vec::new()
            }
            Event::Transport(TransportEvent::Frame { frame, encoding }) => {
                self.on_frame(frame, encoding)
            }
            Event::Metrics(metrics) => {
                if self.scheduler.on_metrics(metrics) {
                    vec![Effect::Schedule(TimerKind::MetricsDebounce, METRICS_DEBOUNCE)]
                } else {
                    Vec::new()
                }
            }
            Event::Tick(TimerKind::MetricsDebounce) => self.run_resize_pass(),
            Event::User(action) => self.on_user(action),
        }
    }

    fn on_frame(&mut self, frame: Frame, encoding: Encoding) -> Vec<Effect> {
        match frame {
            Frame::SessionList { sessions } => {
                self.sessions = sessions;
                let known = self.sessions.clone();
                self.emulators.retain(|id, _| known.contains(id));

                if self.sessions.is_empty() {
                    self.active = None;
                    return vec![Effect::send(Frame::Create)];
                }

                let keep = self
                    .active
                    .as_ref()
                    .map(|id| self.sessions.contains(id))
                    .unwrap_or(false);
                if !keep {
                    self.active = self.sessions.first().cloned();
                }
                if let Some(active) = self.active.clone() {
                    self.ensure_emulator(&active);
                }
                self.schedule_resize_pass()
            }

            Frame::SessionCreated { session_id } => {
                if !self.sessions.contains(&session_id) {
                    self.sessions.push(session_id.clone());
                }
                if self.active.is_none() {
                    self.active = Some(session_id.clone());
                }
                self.ensure_emulator(&session_id);
                self.schedule_resize_pass()
            }

            Frame::SessionClosed { session_id } => {
                let index = self.sessions.iter().position(|id| *id == session_id);
                if let Some(index) = index {
                    self.sessions.remove(index);
                    self.emulators.remove(&session_id);
                    self.scheduler.forget_session(&session_id);

                    if self.active.as_deref() == Some(session_id.as_str()) {
                        self.active = self
                            .sessions
                            .get(index)
                            .or_else(|| self.sessions.last())
                            .cloned();
                        if let Some(active) = self.active.clone() {
                            self.ensure_emulator(&active);
                            return self.schedule_resize_pass();
                        }
                    }
                }
                Vec::new()
            }

            Frame::Stdout { session_id, data } => {
                // Lazily materialize a view on first mention of the id
                self.ensure_emulator(&session_id);
                let text = String::from_utf8_lossy(&data).into_owned();
                if let Some(emulator) = self.emulators.get_mut(&session_id) {
                    emulator.write(&text);
                }
                Vec::new()
            }

            Frame::Error { code, message } => {
                let shown = if message.is_empty() { code } else { message };
                warn!(error = %shown, "Host reported error");
                self.last_error = Some(shown);
                Vec::new()
            }

            // Echo pings in the encoding they arrived in
            Frame::Ping => vec![Effect::Send {
                frame: Frame::Pong,
                encoding,
            }],

            Frame::Unsupported { version } => {
                warn!(version, "Peer speaks unsupported protocol version");
                self.last_error = Some(format!("Unsupported protocol version {}", version));
                Vec::new()
            }

            Frame::Pong
            | Frame::Stdin { .. }
            | Frame::Resize { .. }
            | Frame::List
            | Frame::Create
            | Frame::Close { .. }
            | Frame::SessionAssigned { .. }
            | Frame::Unknown => Vec::new(),
        }
    }

    fn on_user(&mut self, action: UserAction) -> Vec<Effect> {
        match action {
            UserAction::Input(text) => {
                let Some(active) = self.active.clone() else {
                    debug!("Dropping input: no active session");
                    return Vec::new();
                };
                let data = self.modifiers.compose(&text);
                if data.is_empty() {
                    return Vec::new();
                }
                vec![Effect::send(Frame::Stdin {
                    session_id: active,
                    data,
                })]
            }

            UserAction::SetModifier(key) => {
                self.modifiers.set(key);
                Vec::new()
            }

            UserAction::SelectSession(session_id) => {
                if self.sessions.contains(&session_id)
                    && self.active.as_deref() != Some(session_id.as_str())
                {
                    self.active = Some(session_id.clone());
                    self.ensure_emulator(&session_id);
                    return self.schedule_resize_pass();
                }
                Vec::new()
            }

            UserAction::CreateSession => vec![Effect::send(Frame::Create)],

            UserAction::CloseSession(session_id) => {
                vec![Effect::send(Frame::Close { session_id })]
            }

            UserAction::Disconnect => vec![Effect::Disconnect],
        }
    }

    fn ensure_emulator(&mut self, session_id: &str) {
        if !self.emulators.contains_key(session_id) {
            let emulator = self.factory.create(session_id);
            self.emulators.insert(session_id.to_string(), emulator);
        }
    }

    fn schedule_resize_pass(&mut self) -> Vec<Effect> {
        if self.scheduler.request_pass() {
            vec![Effect::Schedule(TimerKind::MetricsDebounce, METRICS_DEBOUNCE)]
        } else {
            Vec::new()
        }
    }

    /// The debounce window elapsed: apply and transmit a resize if the grid
    /// changed. An emulator resize failure is swallowed so the next metrics
    /// tick retries.
    fn run_resize_pass(&mut self) -> Vec<Effect> {
        let Some(active) = self.active.clone() else {
            return Vec::new();
        };
        let lines = self
            .emulators
            .get(&active)
            .map(|e| e.buffer_lines())
            .unwrap_or(0);
        let Some(cmd) = self.scheduler.evaluate(&active, lines) else {
            return Vec::new();
        };

        let Some(emulator) = self.emulators.get_mut(&active) else {
            return Vec::new();
        };
        match emulator.resize(cmd.cols, cmd.rows, cmd.pixel_width, cmd.pixel_height) {
            Ok(()) => {
                self.scheduler.mark_sent(&active, cmd.cols, cmd.rows);
                vec![Effect::send(Frame::Resize {
                    session_id: active,
                    rows: cmd.rows,
                    cols: cmd.cols,
                })]
            }
            Err(e) => {
                warn!(session_id = %active, error = %e, "Emulator resize failed");
                Vec::new()
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use blackhole_core::error::Error;

    #[derive(Default)]
    struct EmulatorLog {
        writes: Vec<String>,
        resizes: Vec<(u16, u16)>,
        lines: usize,
        fail_resize: bool,
    }

    struct RecordingEmulator {
        log: Arc<Mutex<EmulatorLog>>,
    }

    impl TerminalEmulator for RecordingEmulator {
        fn write(&mut self, text: &str) {
            self.log.lock().unwrap().writes.push(text.to_string());
        }
        fn resize(
            &mut self,
            cols: u16,
            rows: u16,
            _pixel_width: u32,
            _pixel_height: u32,
        ) -> blackhole_core::Result<()> {
            let mut log = self.log.lock().unwrap();
            if log.fail_resize {
                return Err(Error::Protocol {
                    message: "resize refused".into(),
                });
            }
            log.resizes.push((cols, rows));
            Ok(())
        }
        fn selection_text(&self) -> Option<String> {
            None
        }
        fn buffer_lines(&self) -> usize {
            self.log.lock().unwrap().lines
        }
    }

    #[derive(Default)]
    struct RecordingFactory {
        logs: Arc<Mutex<HashMap<String, Arc<Mutex<EmulatorLog>>>>>,
    }

    impl RecordingFactory {
        fn log_for(&self, session_id: &str) -> Arc<Mutex<EmulatorLog>> {
            self.logs
                .lock()
                .unwrap()
                .get(session_id)
                .cloned()
                .unwrap_or_else(|| panic!("no emulator created for {}", session_id))
        }
    }

    impl EmulatorFactory for RecordingFactory {
        fn create(&self, session_id: &str) -> Box<dyn TerminalEmulator> {
            let log = Arc::new(Mutex::new(EmulatorLog {
                lines: 24,
                ..EmulatorLog::default()
            }));
            self.logs
                .lock()
                .unwrap()
                .insert(session_id.to_string(), Arc::clone(&log));
            Box::new(RecordingEmulator { log })
        }
    }

    fn coordinator() -> (Coordinator, RecordingFactory) {
        let factory = RecordingFactory::default();
        let handle = RecordingFactory {
            logs: Arc::clone(&factory.logs),
        };
        (Coordinator::new(Box::new(factory)), handle)
    }

    fn frame_event(frame: Frame) -> Event {
        Event::Transport(TransportEvent::Frame {
            frame,
            encoding: frame_encoding(),
        })
    }

    fn frame_encoding() -> Encoding {
        Encoding::Json
    }

    fn metrics_80x24() -> RendererMetrics {
        RendererMetrics {
            viewport_width: 800.0,
            viewport_height: 480.0,
            bottom_inset: 0.0,
            cell_width: 10.0,
            cell_height: 20.0,
            padding_h: 0.0,
            padding_v: 0.0,
        }
    }

    #[test]
    fn empty_session_list_requests_create() {
        let (mut coordinator, _) = coordinator();
        let effects = coordinator.handle(frame_event(Frame::SessionList { sessions: vec![] }));
        assert_eq!(
            effects,
            vec![Effect::Send {
                frame: Frame::Create,
                encoding: Encoding::Json
            }]
        );
        assert_eq!(coordinator.active_session(), None);
    }

    #[test]
    fn session_list_adopts_first_id() {
        let (mut coordinator, factory) = coordinator();
        coordinator.handle(frame_event(Frame::SessionList {
            sessions: vec!["A".into(), "B".into()],
        }));
        assert_eq!(coordinator.active_session(), Some("A"));
        // Emulator exists for the active session
        factory.log_for("A");
    }

    #[test]
    fn session_list_keeps_current_active_if_present() {
        let (mut coordinator, _) = coordinator();
        coordinator.handle(frame_event(Frame::SessionList {
            sessions: vec!["A".into(), "B".into()],
        }));
        coordinator.handle(Event::User(UserAction::SelectSession("B".into())));
        coordinator.handle(frame_event(Frame::SessionList {
            sessions: vec!["B".into(), "C".into()],
        }));
        assert_eq!(coordinator.active_session(), Some("B"));
    }

    #[test]
    fn session_created_appends_and_adopts_when_none_active() {
        let (mut coordinator, _) = coordinator();
        coordinator.handle(frame_event(Frame::SessionCreated {
            session_id: "NEW".into(),
        }));
        assert_eq!(coordinator.sessions(), &["NEW".to_string()]);
        assert_eq!(coordinator.active_session(), Some("NEW"));
    }

    #[test]
    fn session_closed_selects_next_remaining() {
        let (mut coordinator, _) = coordinator();
        coordinator.handle(frame_event(Frame::SessionList {
            sessions: vec!["A".into(), "B".into(), "C".into()],
        }));
        coordinator.handle(Event::User(UserAction::SelectSession("B".into())));

        coordinator.handle(frame_event(Frame::SessionClosed {
            session_id: "B".into(),
        }));
        assert_eq!(coordinator.active_session(), Some("C"));

        coordinator.handle(frame_event(Frame::SessionClosed {
            session_id: "C".into(),
        }));
        assert_eq!(coordinator.active_session(), Some("A"));

        coordinator.handle(frame_event(Frame::SessionClosed {
            session_id: "A".into(),
        }));
        assert_eq!(coordinator.active_session(), None);
    }

    #[test]
    fn stdout_lazily_creates_emulator_and_writes_lossy_utf8() {
        let (mut coordinator, factory) = coordinator();
        let mut data = b"hi ".to_vec();
        data.push(0xff); // invalid UTF-8
        coordinator.handle(frame_event(Frame::Stdout {
            session_id: "GHOST".into(),
            data,
        }));

        let log = factory.log_for("GHOST");
        let writes = log.lock().unwrap().writes.clone();
        assert_eq!(writes, vec![format!("hi {}", char::REPLACEMENT_CHARACTER)]);
    }

    #[test]
    fn input_goes_to_active_session_with_modifiers() {
        let (mut coordinator, _) = coordinator();
        coordinator.handle(frame_event(Frame::SessionList {
            sessions: vec!["A".into()],
        }));

        coordinator.handle(Event::User(UserAction::SetModifier(ModifierKey::Ctrl)));
        let effects = coordinator.handle(Event::User(UserAction::Input("c".into())));
        assert_eq!(
            effects,
            vec![Effect::Send {
                frame: Frame::Stdin {
                    session_id: "A".into(),
                    data: vec![0x03],
                },
                encoding: Encoding::Binary
            }]
        );
    }

    #[test]
    fn input_without_active_session_is_dropped() {
        let (mut coordinator, _) = coordinator();
        assert!(coordinator
            .handle(Event::User(UserAction::Input("x".into())))
            .is_empty());
    }

    #[test]
    fn metrics_then_tick_sends_one_resize() {
        let (mut coordinator, factory) = coordinator();
        coordinator.handle(frame_event(Frame::SessionList {
            sessions: vec!["A".into()],
        }));

        let effects = coordinator.handle(Event::Metrics(metrics_80x24()));
        assert_eq!(
            effects,
            vec![Effect::Schedule(TimerKind::MetricsDebounce, METRICS_DEBOUNCE)]
        );

        let effects = coordinator.handle(Event::Tick(TimerKind::MetricsDebounce));
        assert_eq!(
            effects,
            vec![Effect::Send {
                frame: Frame::Resize {
                    session_id: "A".into(),
                    rows: 24,
                    cols: 80,
                },
                encoding: Encoding::Binary
            }]
        );
        let log = factory.log_for("A");
        assert_eq!(log.lock().unwrap().resizes, vec![(80, 24)]);

        // Identical metrics tick afterwards: no schedule, no frame
        assert!(coordinator.handle(Event::Metrics(metrics_80x24())).is_empty());
        assert!(coordinator
            .handle(Event::Tick(TimerKind::MetricsDebounce))
            .is_empty());
    }

    #[test]
    fn emulator_resize_failure_is_swallowed_and_retried() {
        let (mut coordinator, factory) = coordinator();
        coordinator.handle(frame_event(Frame::SessionList {
            sessions: vec!["A".into()],
        }));
        coordinator.handle(Event::Metrics(metrics_80x24()));

        factory.log_for("A").lock().unwrap().fail_resize = true;
        assert!(coordinator
            .handle(Event::Tick(TimerKind::MetricsDebounce))
            .is_empty());

        // Renderer recovers; the next metrics tick retries the same grid
        factory.log_for("A").lock().unwrap().fail_resize = false;
        let mut nudged = metrics_80x24();
        nudged.viewport_width += 1.0;
        coordinator.handle(Event::Metrics(nudged));
        let effects = coordinator.handle(Event::Tick(TimerKind::MetricsDebounce));
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn ping_is_echoed_in_received_encoding() {
        let (mut coordinator, _) = coordinator();
        let effects = coordinator.handle(Event::Transport(TransportEvent::Frame {
            frame: Frame::Ping,
            encoding: Encoding::Binary,
        }));
        assert_eq!(
            effects,
            vec![Effect::Send {
                frame: Frame::Pong,
                encoding: Encoding::Binary
            }]
        );
    }

    #[test]
    fn error_frames_set_last_error_and_connect_clears_it() {
        let (mut coordinator, _) = coordinator();
        coordinator.handle(frame_event(Frame::Error {
            code: "horizon_offline".into(),
            message: "Horizon is not connected for this session".into(),
        }));
        assert_eq!(
            coordinator.last_error(),
            Some("Horizon is not connected for this session")
        );

        coordinator.handle(Event::Transport(TransportEvent::Connected));
        assert_eq!(coordinator.last_error(), None);
    }

    #[test]
    fn disconnect_clears_sessions_and_keeps_reason() {
        let (mut coordinator, _) = coordinator();
        coordinator.handle(frame_event(Frame::SessionList {
            sessions: vec!["A".into()],
        }));

        coordinator.handle(Event::Transport(TransportEvent::Disconnected {
            reason: Some("Heartbeat timeout: no data for 21s".into()),
            will_retry: true,
        }));
        assert!(coordinator.sessions().is_empty());
        assert_eq!(coordinator.active_session(), None);
        assert_eq!(
            coordinator.last_error(),
            Some("Heartbeat timeout: no data for 21s")
        );
    }

    #[test]
    fn user_disconnect_produces_effect() {
        let (mut coordinator, _) = coordinator();
        assert_eq!(
            coordinator.handle(Event::User(UserAction::Disconnect)),
            vec![Effect::Disconnect]
        );
    }
}
