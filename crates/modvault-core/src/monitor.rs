//! Game process detection.
//!
//! A play session is observed in two phases: wait for the game process to
//! show up, then wait for it to go away. Each transition needs a few
//! consecutive identical samples so a launcher process that briefly shares
//! the game's name does not end the session early.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use sysinfo::{ProcessRefreshKind, RefreshKind, System};

use crate::config::AppConfig;

/// Process names used when the configuration lists none
pub const DEFAULT_PROCESS_NAMES: &[&str] = &["SpaceMarine2.exe", "Space Marine 2"];

/// Answers "is the game running right now?"
pub trait ProcessProbe {
    fn is_running(&mut self) -> bool;
}

/// [`ProcessProbe`] backed by the system process table.
pub struct SysinfoProbe {
    names: Vec<String>,
    system: System,
}

impl SysinfoProbe {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        Self {
            names,
            system: System::new_with_specifics(
                RefreshKind::new().with_processes(ProcessRefreshKind::new()),
            ),
        }
    }

    /// Uses the configured process names, or the defaults if there are none.
    pub fn from_config(config: &AppConfig) -> Self {
        if config.game_process_names.is_empty() {
            Self::new(DEFAULT_PROCESS_NAMES)
        } else {
            Self::new(&config.game_process_names)
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl ProcessProbe for SysinfoProbe {
    fn is_running(&mut self) -> bool {
        self.system.refresh_processes();
        let running = self
            .system
            .processes()
            .values()
            .any(|process| matches_process_name(&self.names, process.name()));
        tracing::trace!("Game process check: {}", running);
        running
    }
}

/// Case-insensitive match, with or without a trailing `.exe`.
fn matches_process_name(names: &[String], process_name: &str) -> bool {
    let process_name = process_name.to_lowercase();
    let bare = process_name.trim_end_matches(".exe");
    names.iter().any(|name| {
        let name_bare = name.trim_end_matches(".exe");
        process_name == *name || bare == name_bare
    })
}

/// Timing of [`wait_for_session`]
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// How long the game gets to show up
    pub appear_timeout: Duration,
    /// Upper bound on exit checks (about ten hours at the default interval)
    pub max_checks: u32,
    /// Consecutive identical samples needed for a transition
    pub stable_checks: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            appear_timeout: Duration::from_secs(60),
            max_checks: 18_000,
            stable_checks: 2,
        }
    }
}

/// How a monitored session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum SessionWait {
    /// The game ran and then exited
    Exited { checks: u32 },
    /// The game never showed up within the appear timeout
    NeverAppeared,
    /// Still running after `max_checks` exit checks
    GaveUp,
    /// The stop flag was raised
    Stopped,
}

/// Blocks until the game has started and exited again.
pub fn wait_for_session(probe: &mut dyn ProcessProbe, settings: &MonitorSettings) -> SessionWait {
    wait_for_session_with_stop(probe, settings, &AtomicBool::new(false))
}

/// Like [`wait_for_session`], returning early once `stop` is set.
pub fn wait_for_session_with_stop(
    probe: &mut dyn ProcessProbe,
    settings: &MonitorSettings,
    stop: &AtomicBool,
) -> SessionWait {
    let needed = settings.stable_checks.max(1);
    let started = Instant::now();

    tracing::info!("Waiting for the game to start");
    let mut streak = 0;
    loop {
        if stop.load(Ordering::SeqCst) {
            return SessionWait::Stopped;
        }
        if probe.is_running() {
            streak += 1;
            if streak >= needed {
                tracing::info!("Game detected after {}s", started.elapsed().as_secs());
                break;
            }
        } else {
            streak = 0;
        }
        if started.elapsed() >= settings.appear_timeout {
            tracing::warn!(
                "Game did not appear within {}s",
                settings.appear_timeout.as_secs()
            );
            return SessionWait::NeverAppeared;
        }
        std::thread::sleep(settings.poll_interval);
    }

    tracing::info!("Game running, waiting for it to exit");
    let mut checks = 0;
    let mut streak = 0;
    while checks < settings.max_checks {
        if stop.load(Ordering::SeqCst) {
            return SessionWait::Stopped;
        }
        checks += 1;
        if probe.is_running() {
            streak = 0;
        } else {
            streak += 1;
            if streak >= needed {
                tracing::info!("Game exited (checked {} times)", checks);
                return SessionWait::Exited { checks };
            }
        }
        if checks % 30 == 0 {
            tracing::debug!(
                "Still monitoring, about {} min elapsed",
                started.elapsed().as_secs() / 60
            );
        }
        std::thread::sleep(settings.poll_interval);
    }

    tracing::warn!("Stopped monitoring after {} checks", settings.max_checks);
    SessionWait::GaveUp
}
