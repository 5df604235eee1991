//! Local terminal handling for the voyager binary.
//!
//! Provides:
//! - Raw terminal mode setup/restore
//! - Terminal size detection and renderer metrics for the resize contract
//! - A passthrough emulator that renders host output on the local TTY

use std::io::{self, Write};
use std::os::unix::io::AsRawFd;

use tracing::debug;

use blackhole_core::Result;
use blackhole_core::error::Error;

use crate::emulator::{EmulatorFactory, TerminalEmulator};
use crate::metrics::RendererMetrics;

/// Guard that restores terminal settings on drop.
pub struct RawModeGuard {
    fd: i32,
    original: libc::termios,
}

impl RawModeGuard {
    /// Enter raw terminal mode on stdin.
    pub fn enter() -> Result<Self> {
        let fd = io::stdin().as_raw_fd();

        let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
        if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        let original = unsafe { termios.assume_init() };

        let mut raw = original;
        // Input: no break signal, CR->NL mapping, parity, stripping, or XON/XOFF
        raw.c_iflag &= !(libc::BRKINT | libc::ICRNL | libc::INPCK | libc::ISTRIP | libc::IXON);
        // Output: no post-processing
        raw.c_oflag &= !libc::OPOST;
        // Local: no echo, canonical mode, signals, or extended processing
        raw.c_lflag &= !(libc::ECHO | libc::ICANON | libc::IEXTEN | libc::ISIG);
        raw.c_cflag |= libc::CS8;
        // Read returns as soon as one byte is available
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;

        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        debug!("Entered raw terminal mode");
        Ok(Self { fd, original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        unsafe {
            libc::tcsetattr(self.fd, libc::TCSANOW, &self.original);
        }
        debug!("Restored terminal mode");
    }
}

/// Current local terminal size in cells, or the 80x24 default.
pub fn terminal_size() -> (u16, u16) {
    let mut winsize = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let fd = io::stdout().as_raw_fd();
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut winsize) };
    if result == 0 && winsize.ws_col > 0 && winsize.ws_row > 0 {
        (winsize.ws_col, winsize.ws_row)
    } else {
        (
            blackhole_core::constants::DEFAULT_COLS,
            blackhole_core::constants::DEFAULT_ROWS,
        )
    }
}

/// Renderer metrics for a character terminal: one cell is one unit square,
/// no padding, no insets. The resize contract then resolves to the plain
/// cell size.
pub fn tty_metrics() -> RendererMetrics {
    let (cols, rows) = terminal_size();
    RendererMetrics {
        viewport_width: cols as f64,
        viewport_height: rows as f64,
        bottom_inset: 0.0,
        cell_width: 1.0,
        cell_height: 1.0,
        padding_h: 0.0,
        padding_v: 0.0,
    }
}

/// Passthrough emulator: the local TTY is the renderer, so output bytes go
/// straight to stdout and the grid always matches the terminal itself.
pub struct TtyEmulator {
    rows: u16,
}

impl TtyEmulator {
    pub fn new() -> Self {
        let (_, rows) = terminal_size();
        Self { rows }
    }
}

impl Default for TtyEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalEmulator for TtyEmulator {
    fn write(&mut self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn resize(&mut self, _cols: u16, rows: u16, _pixel_width: u32, _pixel_height: u32) -> Result<()> {
        // The local terminal resized itself; just track the height
        self.rows = rows;
        Ok(())
    }

    fn selection_text(&self) -> Option<String> {
        None
    }

    fn buffer_lines(&self) -> usize {
        self.rows as usize
    }
}

/// Factory handing out passthrough emulators.
pub struct TtyEmulatorFactory;

impl EmulatorFactory for TtyEmulatorFactory {
    fn create(&self, _session_id: &str) -> Box<dyn TerminalEmulator> {
        Box::new(TtyEmulator::new())
    }
}
