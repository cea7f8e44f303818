//! # modvault-core
//!
//! Core library for managing a game's mods and mod-play saves.
//!
//! This crate provides the foundational functionality for:
//! - Reconciling the game's active mods directory against a mod vault
//! - Timestamped snapshots of the save directory, with a copy log
//! - Watching the managed directories and delivering batched change events
//! - Detecting the game process and running mod-play sessions around it
//!
//! ## Modules
//!
//! - [`config`] - Configuration file and the managed roots
//! - [`error`] - Error types and Result alias
//! - [`guard`] - Path containment and mod name checks
//! - [`monitor`] - Game process detection
//! - [`mover`] - Moving, copying and removing directory entries
//! - [`session`] - Restore, launch, wait, snapshot
//! - [`snapshot`] - Save snapshots and the copy log
//! - [`tasks`] - Async wrappers for tokio hosts
//! - [`vault`] - Mod vault reconciliation
//! - [`watch`] - Filesystem watch registry
//!
//! ## Example
//!
//! ```no_run
//! use modvault_core::{ConfigStore, ModVault};
//!
//! let store = ConfigStore::load_default()?;
//! let vault = ModVault::from_config(store.config())?;
//!
//! for entry in vault.scan()? {
//!     println!("{} enabled={}", entry.name, entry.is_enabled());
//! }
//!
//! // Keep only ReduxHUD enabled
//! let report = vault.reconcile(["ReduxHUD"])?;
//! println!("{} moved to the vault", report.moved_to_vault.len());
//! # Ok::<(), modvault_core::Error>(())
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod guard;
pub mod monitor;
pub mod mover;
pub mod session;
pub mod snapshot;
pub mod tasks;
pub mod utils;
pub mod vault;
pub mod watch;

// Re-export key types for convenience

// Error types
pub use error::{EntryFailure, Error, Result};

// Config types
pub use config::{AppConfig, ConfigRoot, ConfigStore, DetectedPaths, Platform};

// Vault types
pub use vault::{ModEntry, ModVault, ReconcileReport};

// Snapshot types
pub use snapshot::{CopyEvent, RestoreOutcome, SnapshotCreated, SnapshotInfo, SnapshotManager};

// Watch types
pub use watch::{RootPaths, Subscription, WatchDomain, WatchEvent, WatchEventKind, WatchRegistry};

// Monitor and session types
pub use monitor::{MonitorSettings, ProcessProbe, SessionWait, SysinfoProbe};
pub use session::{LaunchMode, Launcher, ModPlaySession, SessionReport, UriLauncher};

// Shared stats
pub use mover::MirrorStats;
