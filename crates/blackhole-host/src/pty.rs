//! PTY management for host sessions.
//!
//! Handles:
//! - Spawning a PTY running the user's shell
//! - Async I/O between the PTY master and the session registry
//! - Terminal resize events
//!
//! Uses the `nix` crate for Unix PTY support (Linux, macOS) and `AsyncFd`
//! for readiness-driven I/O integration with tokio's reactor.

use std::ffi::CString;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::sync::Arc;

use nix::pty::{Winsize, openpty};
use nix::sys::signal::{Signal, kill};
use nix::unistd::{AccessFlags, ForkResult, Pid, access, close, dup2, execvp, fork, setsid};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use blackhole_core::constants::{DEFAULT_TERM, PTY_OUTPUT_CHANNEL_CAPACITY, PTY_READ_CHUNK};
use blackhole_core::error::{Error, Result};

/// PTY handle for async I/O.
pub struct Pty {
    /// Master PTY file descriptor wrapped for async I/O.
    master: Arc<AsyncFd<std::fs::File>>,
    /// Child process PID.
    child_pid: Pid,
    /// Raw master fd for ioctl operations.
    master_fd: RawFd,
}

impl Pty {
    /// Spawn a new PTY with the given shell.
    ///
    /// `shell` overrides the resolution chain; otherwise `$SHELL` is used,
    /// falling back to `/bin/bash` and then `/bin/sh`. The shell runs as a
    /// login interactive shell (`-i -l`) in the user's home directory with
    /// `TERM=xterm-256color`.
    ///
    /// # Safety
    ///
    /// Uses `fork()`, which is inherently delicate in multi-threaded
    /// programs; nothing between fork and exec allocates or locks.
    pub fn spawn(rows: u16, cols: u16, shell: Option<&str>) -> Result<Self> {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let pty_result = openpty(&winsize, None).map_err(|e| Error::Pty {
            message: format!("failed to open pty: {}", e),
        })?;

        let master_fd = pty_result.master.as_raw_fd();
        let slave_fd = pty_result.slave.as_raw_fd();

        let shell_path = resolve_shell(shell);
        info!(shell = %shell_path, rows, cols, "Spawning shell");

        let shell_cstr = CString::new(shell_path).map_err(|e| Error::Pty {
            message: format!("invalid shell path: {}", e),
        })?;
        let args = [
            shell_cstr.clone(),
            CString::new("-i").expect("static arg"),
            CString::new("-l").expect("static arg"),
        ];

        // SAFETY: fork() in a program that may have running threads; the
        // child only performs async-signal-safe work before execvp.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                drop(pty_result.slave);

                // SAFETY: we own the fd from openpty; forget the OwnedFd to
                // avoid a double close once File takes ownership.
                let master_owned: OwnedFd = pty_result.master;
                let std_file = unsafe { std::fs::File::from_raw_fd(master_owned.as_raw_fd()) };
                std::mem::forget(master_owned);

                set_nonblocking(master_fd)?;

                let async_fd = AsyncFd::new(std_file).map_err(|e| Error::Pty {
                    message: format!("failed to create AsyncFd: {}", e),
                })?;

                Ok(Self {
                    master: Arc::new(async_fd),
                    child_pid: child,
                    master_fd,
                })
            }
            Ok(ForkResult::Child) => {
                // Child: make the PTY slave the controlling terminal
                setsid().map_err(|e| Error::Pty {
                    message: format!("setsid failed: {}", e),
                })?;

                // TIOCSCTTY request type varies by platform
                unsafe {
                    libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);
                }

                dup2(slave_fd, libc::STDIN_FILENO).map_err(|e| Error::Pty {
                    message: format!("dup2 stdin failed: {}", e),
                })?;
                dup2(slave_fd, libc::STDOUT_FILENO).map_err(|e| Error::Pty {
                    message: format!("dup2 stdout failed: {}", e),
                })?;
                dup2(slave_fd, libc::STDERR_FILENO).map_err(|e| Error::Pty {
                    message: format!("dup2 stderr failed: {}", e),
                })?;

                if slave_fd > libc::STDERR_FILENO {
                    let _ = close(slave_fd);
                }
                let _ = close(master_fd);

                // Forked child before exec; nothing else observes the env
                if let Ok(home) = std::env::var("HOME") {
                    let _ = std::env::set_current_dir(home);
                }
                std::env::set_var("TERM", DEFAULT_TERM);

                execvp(&shell_cstr, &args).map_err(|e| Error::Pty {
                    message: format!("execvp failed: {}", e),
                })?;

                // execvp doesn't return on success
                unreachable!()
            }
            Err(e) => Err(Error::Pty {
                message: format!("fork failed: {}", e),
            }),
        }
    }

    /// Resize the PTY via TIOCSWINSZ.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let result = unsafe { libc::ioctl(self.master_fd, libc::TIOCSWINSZ, &winsize) };
        if result == -1 {
            let err = std::io::Error::last_os_error();
            return Err(Error::Pty {
                message: format!("failed to resize pty: {}", err),
            });
        }

        debug!(rows, cols, "PTY resized");
        Ok(())
    }

    /// Write data to the PTY (terminal input from a peer).
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut remaining = data;
        while !remaining.is_empty() {
            let mut guard = self.master.writable().await.map_err(|e| Error::Pty {
                message: format!("failed to wait for pty write readiness: {}", e),
            })?;

            match guard.try_io(|inner| inner.get_ref().write(remaining)) {
                Ok(Ok(n)) => {
                    remaining = &remaining[n..];
                }
                Ok(Err(e)) => {
                    return Err(Error::Pty {
                        message: format!("failed to write to pty: {}", e),
                    });
                }
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Read data from the PTY (terminal output toward peers).
    ///
    /// Returns None on EOF (shell exit); EIO from a closed slave counts.
    pub async fn read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        loop {
            let mut guard = self.master.readable().await.map_err(|e| Error::Pty {
                message: format!("failed to wait for pty read readiness: {}", e),
            })?;

            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(Ok(0)) => return Ok(None),
                Ok(Ok(n)) => return Ok(Some(n)),
                Ok(Err(e)) => {
                    if e.raw_os_error() == Some(libc::EIO) {
                        debug!("PTY read returned EIO (shell likely exited)");
                        return Ok(None);
                    }
                    return Err(Error::Pty {
                        message: format!("failed to read from pty: {}", e),
                    });
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Check if the child process has exited.
    pub fn try_wait(&self) -> Result<Option<i32>> {
        use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};

        match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                info!(exit_code = code, "Shell process exited");
                Ok(Some(code))
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                info!(signal = ?signal, "Shell process killed by signal");
                Ok(Some(128 + signal as i32))
            }
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(_) => Ok(None),
            Err(nix::errno::Errno::ECHILD) => Ok(Some(0)),
            Err(e) => Err(Error::Pty {
                message: format!("failed to check child status: {}", e),
            }),
        }
    }

    /// Kill the child process. Best-effort; a second kill is a no-op.
    pub fn kill(&self) -> Result<()> {
        match kill(self.child_pid, Signal::SIGTERM) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::Pty {
                message: format!("failed to kill child: {}", e),
            }),
        }
    }

    /// Get the child process PID (informational).
    pub fn pid(&self) -> i32 {
        self.child_pid.as_raw()
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        if self.try_wait().ok().flatten().is_none() {
            let _ = self.kill();
        }
    }
}

/// Resolve the shell to run: explicit override, then `$SHELL` if executable,
/// then `/bin/bash`, then `/bin/sh`.
fn resolve_shell(explicit: Option<&str>) -> String {
    if let Some(shell) = explicit {
        if !shell.is_empty() {
            return shell.to_string();
        }
    }
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() && access(shell.as_str(), AccessFlags::X_OK).is_ok() {
            return shell;
        }
    }
    if access("/bin/bash", AccessFlags::X_OK).is_ok() {
        return "/bin/bash".to_string();
    }
    "/bin/sh".to_string()
}

/// Set a file descriptor to non-blocking mode.
fn set_nonblocking(fd: RawFd) -> Result<()> {
    use nix::fcntl::{FcntlArg, OFlag, fcntl};

    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| Error::Pty {
        message: format!("fcntl F_GETFL failed: {}", e),
    })?;

    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;

    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| Error::Pty {
        message: format!("fcntl F_SETFL failed: {}", e),
    })?;

    Ok(())
}

/// I/O pump between one PTY and the registry's channels.
///
/// Spawns one task per direction. The output task ends on PTY EOF, which
/// closes the output channel and signals session teardown upstream.
pub struct PtyPump {
    input_tx: mpsc::Sender<Vec<u8>>,
    output_rx: mpsc::Receiver<Vec<u8>>,
}

impl PtyPump {
    /// Start pumping a PTY.
    pub fn start(pty: Arc<Pty>) -> Self {
        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(PTY_OUTPUT_CHANNEL_CAPACITY);
        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(PTY_OUTPUT_CHANNEL_CAPACITY);

        // Input task (peer -> PTY); writes are serialized by channel order
        let pty_input = pty.clone();
        tokio::spawn(async move {
            while let Some(data) = input_rx.recv().await {
                if let Err(e) = pty_input.write(&data).await {
                    error!(error = %e, "Failed to write to PTY");
                    break;
                }
            }
            debug!("PTY input task ended");
        });

        // Output task (PTY -> peers)
        let pty_output = pty.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; PTY_READ_CHUNK];
            loop {
                match pty_output.read(&mut buf).await {
                    Ok(Some(n)) => {
                        if output_tx.send(buf[..n].to_vec()).await.is_err() {
                            warn!("PTY output channel closed");
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("PTY EOF - shell exited");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "PTY read error");
                        break;
                    }
                }
            }
            debug!("PTY output task ended");
            // Dropping output_tx signals EOF to the registry
        });

        Self {
            input_tx,
            output_rx,
        }
    }

    /// Split into the input sender and output receiver.
    pub fn split(self) -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        (self.input_tx, self.output_rx)
    }
}

// =============================================================================
// Tests
// =============================================================================
