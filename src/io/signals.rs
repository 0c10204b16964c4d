//! Unix signal handling for the twilightr daemon.
//!
//! Signals are translated into scheduler triggers on a dedicated thread:
//!
//! - `SIGINT`, `SIGTERM`, `SIGHUP`: clear the running flag and queue a shutdown
//! - `SIGUSR1`: force a re-evaluation, as if the clock had changed
//! - `SIGUSR2`: reload the configuration file

use anyhow::{Context, Result};
use signal_hook::{
    consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2},
    iterator::Signals,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread;

use crate::scheduler::Trigger;

/// What a received signal asks the daemon to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Shutdown,
    Reevaluate,
    Reload,
    Ignore,
}

/// Map a signal number to its action.
pub fn classify(signal: i32) -> SignalAction {
    match signal {
        SIGINT | SIGTERM | SIGHUP => SignalAction::Shutdown,
        SIGUSR1 => SignalAction::Reevaluate,
        SIGUSR2 => SignalAction::Reload,
        _ => SignalAction::Ignore,
    }
}

/// Signal handling state shared between threads
pub struct SignalState {
    /// Cleared once a termination signal arrives
    pub running: Arc<AtomicBool>,
}

/// Set up signal handling for the daemon.
///
/// Spawns a background thread that turns signals into triggers on
/// `triggers`. `on_reload` runs on that thread for every `SIGUSR2`.
pub fn setup_signal_handler<F>(
    triggers: Sender<Trigger>,
    on_reload: F,
    debug_enabled: bool,
) -> Result<SignalState>
where
    F: Fn() + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP, SIGUSR1, SIGUSR2])
        .context("failed to register signal handlers")?;

    let running_clone = running.clone();

    thread::Builder::new()
        .name("twilightr-signals".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                match classify(sig) {
                    SignalAction::Shutdown => {
                        log_pipe!();
                        log_info!("Received signal {}, shutting down", signal_name(sig));
                        running_clone.store(false, Ordering::SeqCst);
                        let _ = triggers.send(Trigger::Shutdown);
                        break;
                    }
                    SignalAction::Reevaluate => {
                        if debug_enabled {
                            log_pipe!();
                            log_debug!("SIGUSR1 received, forcing re-evaluation");
                        }
                        if triggers.send(Trigger::ClockChanged).is_err() {
                            break;
                        }
                    }
                    SignalAction::Reload => {
                        log_pipe!();
                        log_info!("SIGUSR2 received, reloading configuration");
                        on_reload();
                    }
                    SignalAction::Ignore => {}
                }
            }
        })
        .context("failed to spawn signal handler thread")?;

    Ok(SignalState { running })
}

fn signal_name(signal: i32) -> &'static str {
    match signal {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        SIGHUP => "SIGHUP",
        SIGUSR1 => "SIGUSR1",
        SIGUSR2 => "SIGUSR2",
        _ => "unknown",
    }
}
