//! blackhole voyager binary entry point.
//!
//! Runs the coordinator as a single-threaded event loop over transport
//! events, local keystrokes, SIGWINCH metrics changes, and the metrics
//! debounce timer. Ctrl-] detaches.

use clap::Parser;
use tokio::io::AsyncReadExt;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{error, info};

use blackhole_voyager::terminal::{RawModeGuard, TtyEmulatorFactory, tty_metrics};
use blackhole_voyager::{Cli, Coordinator, Effect, Event, TimerKind, Transport, TransportEvent, UserAction};

/// Ctrl-]: detach from the host, telnet style.
const DETACH_BYTE: u8 = 0x1d;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_format = cli.log_format.into();
    if let Err(e) = blackhole_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), url = %cli.url, "blackhole-voyager starting");

    let (transport, mut events) = Transport::connect(cli.transport_config());
    let mut coordinator = Coordinator::new(Box::new(TtyEmulatorFactory));

    // Not fatal outside a TTY (tests, pipes); keystrokes just arrive cooked
    let raw_guard = RawModeGuard::enter().ok();

    // Blocking stdin reads on a dedicated task
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(64);
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdin_tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut winch = signal(SignalKind::window_change()).ok();
    let mut debounce_deadline: Option<tokio::time::Instant> = None;

    // Seed the resize contract with the current terminal geometry
    apply(
        &mut coordinator,
        Event::Metrics(tty_metrics()),
        &transport,
        &mut debounce_deadline,
    );

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    None => break,
                    Some(event) => {
                        let finished = matches!(
                            &event,
                            TransportEvent::Disconnected { will_retry: false, .. }
                        );
                        apply(
                            &mut coordinator,
                            Event::Transport(event),
                            &transport,
                            &mut debounce_deadline,
                        );
                        if finished {
                            break;
                        }
                    }
                }
            }

            data = stdin_rx.recv() => {
                match data {
                    None => {
                        apply(
                            &mut coordinator,
                            Event::User(UserAction::Disconnect),
                            &transport,
                            &mut debounce_deadline,
                        );
                    }
                    Some(bytes) => {
                        if bytes.contains(&DETACH_BYTE) {
                            apply(
                                &mut coordinator,
                                Event::User(UserAction::Disconnect),
                                &transport,
                                &mut debounce_deadline,
                            );
                        } else {
                            let text = String::from_utf8_lossy(&bytes).into_owned();
                            apply(
                                &mut coordinator,
                                Event::User(UserAction::Input(text)),
                                &transport,
                                &mut debounce_deadline,
                            );
                        }
                    }
                }
            }

            _ = recv_winch(&mut winch) => {
                apply(
                    &mut coordinator,
                    Event::Metrics(tty_metrics()),
                    &transport,
                    &mut debounce_deadline,
                );
            }

            _ = sleep_until_deadline(debounce_deadline) => {
                debounce_deadline = None;
                apply(
                    &mut coordinator,
                    Event::Tick(TimerKind::MetricsDebounce),
                    &transport,
                    &mut debounce_deadline,
                );
            }
        }
    }

    drop(raw_guard);
    if let Some(err) = coordinator.last_error() {
        error!(error = %err, "Session ended with error");
        eprintln!("blackhole-voyager: {}", err);
    }
    info!("Detached");
}

/// Interpret coordinator effects against the transport and timer state.
fn apply(
    coordinator: &mut Coordinator,
    event: Event,
    transport: &Transport,
    debounce_deadline: &mut Option<tokio::time::Instant>,
) {
    for effect in coordinator.handle(event) {
        match effect {
            Effect::Send { frame, encoding } => {
                transport.send_frame_as(&frame, encoding);
            }
            Effect::Schedule(TimerKind::MetricsDebounce, delay) => {
                *debounce_deadline = Some(tokio::time::Instant::now() + delay);
            }
            Effect::Disconnect => {
                transport.disconnect();
            }
        }
    }
}

async fn recv_winch(winch: &mut Option<tokio::signal::unix::Signal>) {
    match winch.as_mut() {
        Some(signal) => {
            signal.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
