//! Debounced cell-metrics resize scheduling.
//!
//! A resize frame goes out iff it reflects a new, stable cell grid: metrics
//! notifications are debounced for 220 ms and ignored below a half-pixel
//! threshold, the grid is derived from viewport and cell geometry, and the
//! `(session, cols, rows)` triple is never retransmitted.

use blackhole_core::constants::METRICS_EPSILON_PX;

/// Renderer geometry sampled after layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererMetrics {
    pub viewport_width: f64,
    pub viewport_height: f64,
    /// Keyboard / system bar inset; participates in the change test.
    pub bottom_inset: f64,
    pub cell_width: f64,
    pub cell_height: f64,
    pub padding_h: f64,
    pub padding_v: f64,
}

impl RendererMetrics {
    /// Whether a new sample is a real layout change rather than jitter.
    fn significantly_differs(&self, other: &RendererMetrics) -> bool {
        (self.viewport_width - other.viewport_width).abs() >= METRICS_EPSILON_PX
            || (self.viewport_height - other.viewport_height).abs() >= METRICS_EPSILON_PX
            || (self.bottom_inset - other.bottom_inset).abs() >= METRICS_EPSILON_PX
    }

    /// Derive the cell grid; `None` when the geometry is degenerate.
    pub fn grid(&self) -> Option<(u16, u16)> {
        if self.cell_width <= 0.0 || self.cell_height <= 0.0 {
            return None;
        }
        let cols = ((self.viewport_width - self.padding_h) / self.cell_width).floor();
        let rows = ((self.viewport_height - self.padding_v) / self.cell_height).floor();
        if cols <= 0.0 || rows <= 0.0 {
            return None;
        }
        Some((cols.min(u16::MAX as f64) as u16, rows.min(u16::MAX as f64) as u16))
    }

    /// Viewport pixel size, for emulators that track it.
    pub fn pixel_size(&self) -> (u32, u32) {
        (
            self.viewport_width.max(0.0) as u32,
            self.viewport_height.max(0.0) as u32,
        )
    }
}

/// A resize the coordinator should apply and transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeCommand {
    pub session_id: String,
    pub cols: u16,
    pub rows: u16,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

/// Tracks metrics, the debounce window, and the last transmitted triple.
#[derive(Debug, Default)]
pub struct ResizeScheduler {
    latest: Option<RendererMetrics>,
    pending: bool,
    last_sent: Option<(String, u16, u16)>,
}

impl ResizeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A platform metrics notification arrived. Returns true when a
    /// debounce pass should be (re)scheduled; sub-threshold jitter is
    /// ignored entirely and never restarts the window.
    pub fn on_metrics(&mut self, metrics: RendererMetrics) -> bool {
        match &self.latest {
            Some(prev) if !metrics.significantly_differs(prev) => false,
            _ => {
                self.latest = Some(metrics);
                self.pending = true;
                true
            }
        }
    }

    /// Request a pass with the current metrics (active-session switch,
    /// session lifecycle). Returns false when no metrics were seen yet.
    pub fn request_pass(&mut self) -> bool {
        if self.latest.is_some() {
            self.pending = true;
            true
        } else {
            false
        }
    }

    /// The debounce window elapsed: compute the resize for the active
    /// session, or `None` when nothing should be transmitted.
    ///
    /// `emulator_lines` is the active emulator's laid-out buffer height; a
    /// not-yet-laid-out emulator (0 lines, or fewer than the target rows)
    /// skips the pass.
    pub fn evaluate(&mut self, session_id: &str, emulator_lines: usize) -> Option<ResizeCommand> {
        if !self.pending {
            return None;
        }
        self.pending = false;

        let metrics = self.latest?;
        let (cols, rows) = metrics.grid()?;
        if emulator_lines == 0 || emulator_lines < rows as usize {
            return None;
        }

        if self
            .last_sent
            .as_ref()
            .is_some_and(|(id, c, r)| id == session_id && *c == cols && *r == rows)
        {
            return None;
        }

        let (pixel_width, pixel_height) = metrics.pixel_size();
        Some(ResizeCommand {
            session_id: session_id.to_string(),
            cols,
            rows,
            pixel_width,
            pixel_height,
        })
    }

    /// Record a successfully applied and transmitted resize.
    pub fn mark_sent(&mut self, session_id: &str, cols: u16, rows: u16) {
        self.last_sent = Some((session_id.to_string(), cols, rows));
    }

    /// Forget the transmitted triple for a closed session.
    pub fn forget_session(&mut self, session_id: &str) {
        if self
            .last_sent
            .as_ref()
            .is_some_and(|(id, _, _)| id == session_id)
        {
            self.last_sent = None;
        }
    }

    /// Drop transmission state on disconnect; metrics stay valid.
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.pending = false;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_80x24() -> RendererMetrics {
        // 800x480 viewport, 10x20 cells, no padding: exactly 80x24
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
    fn grid_floors_partial_cells() {
        let mut m = metrics_80x24();
        m.viewport_width = 809.0; // 80.9 cells
        m.padding_v = 5.0; // 23.75 rows
        assert_eq!(m.grid(), Some((80, 23)));
    }

    #[test]
    fn degenerate_geometry_yields_no_grid() {
        let mut m = metrics_80x24();
        m.cell_width = 0.0;
        assert_eq!(m.grid(), None);

        let mut m = metrics_80x24();
        m.viewport_height = 10.0;
        m.padding_v = 30.0;
        assert_eq!(m.grid(), None);
    }

    #[test]
    fn first_metrics_schedule_a_pass() {
        let mut scheduler = ResizeScheduler::new();
        assert!(scheduler.on_metrics(metrics_80x24()));
    }

    #[test]
    fn jitter_below_half_pixel_is_ignored() {
        let mut scheduler = ResizeScheduler::new();
        scheduler.on_metrics(metrics_80x24());
        scheduler.evaluate("S", 24);

        let mut jitter = metrics_80x24();
        jitter.viewport_width += 0.4;
        jitter.bottom_inset += 0.2;
        assert!(!scheduler.on_metrics(jitter));
    }

    #[test]
    fn inset_change_counts_as_layout_change() {
        let mut scheduler = ResizeScheduler::new();
        scheduler.on_metrics(metrics_80x24());
        scheduler.evaluate("S", 24);

        let mut shifted = metrics_80x24();
        shifted.bottom_inset = 260.0; // keyboard came up
        assert!(scheduler.on_metrics(shifted));
    }

    #[test]
    fn evaluate_produces_grid_once() {
        let mut scheduler = ResizeScheduler::new();
        scheduler.on_metrics(metrics_80x24());

        let cmd = scheduler.evaluate("S", 24).expect("first pass resizes");
        assert_eq!((cmd.cols, cmd.rows), (80, 24));
        scheduler.mark_sent("S", cmd.cols, cmd.rows);

        // Identical metrics tick: nothing scheduled, nothing sent
        assert!(!scheduler.on_metrics(metrics_80x24()));
        assert_eq!(scheduler.evaluate("S", 24), None);
    }

    #[test]
    fn same_triple_is_never_retransmitted() {
        let mut scheduler = ResizeScheduler::new();
        scheduler.on_metrics(metrics_80x24());
        let cmd = scheduler.evaluate("S", 24).unwrap();
        scheduler.mark_sent("S", cmd.cols, cmd.rows);

        // A forced pass with unchanged geometry is still suppressed
        assert!(scheduler.request_pass());
        assert_eq!(scheduler.evaluate("S", 24), None);
    }

    #[test]
    fn session_switch_retransmits_for_new_session() {
        let mut scheduler = ResizeScheduler::new();
        scheduler.on_metrics(metrics_80x24());
        let cmd = scheduler.evaluate("A", 24).unwrap();
        scheduler.mark_sent("A", cmd.cols, cmd.rows);

        assert!(scheduler.request_pass());
        let cmd = scheduler.evaluate("B", 24).expect("new session resizes");
        assert_eq!(cmd.session_id, "B");
    }

    #[test]
    fn unlaid_out_emulator_skips_pass() {
        let mut scheduler = ResizeScheduler::new();
        scheduler.on_metrics(metrics_80x24());
        assert_eq!(scheduler.evaluate("S", 0), None);

        // The skipped pass is consumed; a new request is needed
        assert!(scheduler.request_pass());
        assert_eq!(scheduler.evaluate("S", 10), None); // shorter than 24 rows

        assert!(scheduler.request_pass());
        assert!(scheduler.evaluate("S", 24).is_some());
    }

    #[test]
    fn failed_apply_retries_on_next_request() {
        let mut scheduler = ResizeScheduler::new();
        scheduler.on_metrics(metrics_80x24());

        // Command produced but never marked sent (emulator resize failed)
        assert!(scheduler.evaluate("S", 24).is_some());

        assert!(scheduler.request_pass());
        assert!(scheduler.evaluate("S", 24).is_some());
    }

    #[test]
    fn forget_session_clears_triple() {
        let mut scheduler = ResizeScheduler::new();
        scheduler.on_metrics(metrics_80x24());
        let cmd = scheduler.evaluate("S", 24).unwrap();
        scheduler.mark_sent("S", cmd.cols, cmd.rows);

        scheduler.forget_session("S");
        assert!(scheduler.request_pass());
        assert!(scheduler.evaluate("S", 24).is_some());
    }
}
