//! Command parsing and execution
//!
//! Usage:
//!   modvault scan                          List mods in both roots
//!   modvault apply <name>...               Enable exactly these mods
//!   modvault snapshot / restore            Save data snapshots
//!
//! Options:
//!   --json             Output in JSON format
//!   --config <file>    Use another configuration file

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use modvault_core::config::{detect_paths, ConfigStore};
use modvault_core::snapshot::read_copy_events;
use modvault_core::utils::format_size;
use modvault_core::{
    LaunchMode, ModPlaySession, ModVault, RestoreOutcome, SessionWait, SnapshotManager,
    SysinfoProbe, UriLauncher, WatchRegistry,
};

/// CLI command to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Scan,
    Apply { names: Vec<String> },
    Enable { names: Vec<String> },
    Disable { names: Vec<String> },
    Delete { name: String },
    Snapshot,
    Restore,
    Snapshots,
    Log { days: Option<u64> },
    Watch,
    Play { mode: Option<LaunchMode> },
    Config,
    ConfigSet { key: String, value: String },
    Detect { save: bool },
}

/// CLI options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub json: bool,
    pub verbose: bool,
    pub config_path: Option<PathBuf>,
}

/// Parse CLI arguments and return command + options
pub fn parse_args(args: &[String]) -> Result<(CliCommand, CliOptions), String> {
    let mut options = CliOptions::default();
    let mut positional: Vec<String> = Vec::new();
    let mut days: Option<u64> = None;
    let mut mode: Option<LaunchMode> = None;
    let mut save = false;

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "--json" => options.json = true,
            "--verbose" | "-v" => options.verbose = true,
            "--config" => {
                i += 1;
                let value = args.get(i).ok_or("--config requires a file path")?;
                options.config_path = Some(PathBuf::from(value));
            }
            "--days" => {
                i += 1;
                let value = args.get(i).ok_or("--days requires a number")?;
                days = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid number of days: {}", value))?,
                );
            }
            "--mod" => mode = Some(LaunchMode::Mod),
            "--vanilla" => mode = Some(LaunchMode::Vanilla),
            "--save" => save = true,
            _ if arg.starts_with("--") => return Err(format!("Unknown option: {}", arg)),
            _ => positional.push(arg.clone()),
        }
        i += 1;
    }

    let mut rest = positional.into_iter();
    let name = rest
        .next()
        .ok_or("No command specified. Use: scan, apply, snapshot, restore, ...")?;
    let rest: Vec<String> = rest.collect();

    let command = match name.as_str() {
        "scan" => CliCommand::Scan,
        "apply" => CliCommand::Apply { names: rest },
        "enable" | "disable" if rest.is_empty() => {
            return Err(format!("{} requires at least one mod name", name))
        }
        "enable" => CliCommand::Enable { names: rest },
        "disable" => CliCommand::Disable { names: rest },
        "delete" => match rest.as_slice() {
            [name] => CliCommand::Delete { name: name.clone() },
            _ => return Err("delete requires exactly one mod name".to_string()),
        },
        "snapshot" => CliCommand::Snapshot,
        "restore" => CliCommand::Restore,
        "snapshots" => CliCommand::Snapshots,
        "log" => CliCommand::Log { days },
        "watch" => CliCommand::Watch,
        "play" => CliCommand::Play { mode },
        "config" => match rest.as_slice() {
            [] => CliCommand::Config,
            [set, key, value] if set == "set" => CliCommand::ConfigSet {
                key: key.clone(),
                value: value.clone(),
            },
            _ => return Err("Usage: config [set <key> <value>]".to_string()),
        },
        "detect" => CliCommand::Detect { save },
        other => return Err(format!("Unknown command: {}", other)),
    };

    Ok((command, options))
}

/// Run CLI command
pub fn run(command: CliCommand, options: CliOptions) -> anyhow::Result<()> {
    let store = load_store(&options)?;

    match command {
        CliCommand::Scan => run_scan(&store, &options),
        CliCommand::Apply { names } => run_apply(&store, names, &options),
        CliCommand::Enable { names } => {
            let vault = ModVault::from_config(store.config())?;
            let mut desired = vault.enabled_names()?;
            for name in names {
                if !desired.contains(&name) {
                    desired.push(name);
                }
            }
            run_apply(&store, desired, &options)
        }
        CliCommand::Disable { names } => {
            let vault = ModVault::from_config(store.config())?;
            let desired: Vec<String> = vault
                .enabled_names()?
                .into_iter()
                .filter(|n| !names.contains(n))
                .collect();
            run_apply(&store, desired, &options)
        }
        CliCommand::Delete { name } => {
            let vault = ModVault::from_config(store.config())?;
            vault.delete_entry(&name)?;
            if !options.json {
                println!("Deleted {}", name);
            }
            Ok(())
        }
        CliCommand::Snapshot => run_snapshot(&store, &options),
        CliCommand::Restore => run_restore(&store, &options),
        CliCommand::Snapshots => run_snapshots(&store, &options),
        CliCommand::Log { days } => run_log(&store, days, &options),
        CliCommand::Watch => run_watch(&store, &options),
        CliCommand::Play { mode } => run_play(&store, mode, &options),
        CliCommand::Config => run_config(&store, &options),
        CliCommand::ConfigSet { key, value } => {
            let mut store = store;
            let changed = store.update(|cfg| cfg.set(&key, &value))?;
            if changed {
                println!("{} updated in {}", key, store.path().display());
            } else {
                println!("{} unchanged", key);
            }
            Ok(())
        }
        CliCommand::Detect { save } => run_detect(store, save, &options),
    }
}

fn load_store(options: &CliOptions) -> anyhow::Result<ConfigStore> {
    let store = match &options.config_path {
        Some(path) => ConfigStore::load(path),
        None => ConfigStore::load_default(),
    };
    store.context("Failed to load configuration")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_scan(store: &ConfigStore, options: &CliOptions) -> anyhow::Result<()> {
    let vault = ModVault::from_config(store.config())?;
    let entries = vault.scan()?;

    if options.json {
        return print_json(&entries);
    }

    println!("Active: {}", vault.active_root().display());
    println!("Vault:  {}", vault.vault_root().display());
    println!();
    if entries.is_empty() {
        println!("No mods found");
        return Ok(());
    }
    for entry in &entries {
        let state = if entry.is_duplicate() {
            "duplicate"
        } else if entry.is_enabled() {
            "enabled"
        } else {
            "disabled"
        };
        println!("  [{:<9}] {}", state, entry.name);
    }
    let enabled = entries.iter().filter(|e| e.is_enabled()).count();
    println!();
    println!("{} mods, {} enabled", entries.len(), enabled);
    Ok(())
}

fn run_apply(store: &ConfigStore, desired: Vec<String>, options: &CliOptions) -> anyhow::Result<()> {
    let vault = ModVault::from_config(store.config())?;
    let report = vault.reconcile(&desired)?;

    if options.json {
        return print_json(&report);
    }

    if report.is_noop() {
        println!("Already up to date");
    } else {
        for name in &report.moved_to_active {
            println!("  + {}", name);
        }
        for name in &report.moved_to_vault {
            println!("  - {}", name);
        }
        for name in &report.duplicates_removed {
            println!("  ~ {} (duplicate removed)", name);
        }
    }
    if let Some(backup) = &report.backup {
        println!(
            "Backup: {} ({} files, {})",
            backup.path.display(),
            backup.stats.files,
            format_size(backup.stats.bytes)
        );
    }
    Ok(())
}

fn run_snapshot(store: &ConfigStore, options: &CliOptions) -> anyhow::Result<()> {
    let config = store.config();
    let manager = SnapshotManager::from_config(config)?;
    let live = config.require(modvault_core::ConfigRoot::SaveData)?;
    let created = manager.snapshot_now(live)?;

    if options.json {
        return print_json(&created);
    }
    println!(
        "Snapshot {} ({} files, {})",
        created.path.display(),
        created.stats.files,
        format_size(created.stats.bytes)
    );
    Ok(())
}

fn run_restore(store: &ConfigStore, options: &CliOptions) -> anyhow::Result<()> {
    let config = store.config();
    let manager = SnapshotManager::from_config(config)?;
    let live = config.require_set(modvault_core::ConfigRoot::SaveData)?;
    let outcome = manager.restore_latest(live)?;

    if options.json {
        return print_json(&outcome);
    }
    match outcome {
        RestoreOutcome::Restored { snapshot, stats } => println!(
            "Restored {} ({} files, {})",
            snapshot.display(),
            stats.files,
            format_size(stats.bytes)
        ),
        RestoreOutcome::NoSnapshot => println!("No snapshot to restore; saves left as they are"),
        RestoreOutcome::EmptySnapshot { snapshot } => println!(
            "Newest snapshot {} is empty; saves left as they are",
            snapshot.display()
        ),
    }
    Ok(())
}

fn run_snapshots(store: &ConfigStore, options: &CliOptions) -> anyhow::Result<()> {
    let manager = SnapshotManager::from_config(store.config())?;
    let snapshots = manager.list()?;

    if options.json {
        return print_json(&snapshots);
    }
    if snapshots.is_empty() {
        println!("No snapshots in {}", manager.root().display());
        return Ok(());
    }
    for info in &snapshots {
        println!(
            "  {:<24} {:>10} {:>6} files  {}",
            info.name,
            info.size_display(),
            info.stats.files,
            info.age_display()
        );
    }
    Ok(())
}

fn run_log(store: &ConfigStore, days: Option<u64>, options: &CliOptions) -> anyhow::Result<()> {
    let manager = SnapshotManager::from_config(store.config())?;
    let since = days.map(|d| Duration::from_secs(d * 24 * 60 * 60));
    let events = read_copy_events(manager.root(), since)?;

    if options.json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("No copy events");
        return Ok(());
    }
    for event in &events {
        let when = event.ts.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S");
        if event.is_ok() {
            println!(
                "{}  ok     {} files, {} in {} ms -> {}",
                when,
                event.files,
                format_size(event.bytes),
                event.ms,
                event.dest.display()
            );
        } else {
            println!(
                "{}  error  {}",
                when,
                event.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    Ok(())
}

fn run_watch(store: &ConfigStore, options: &CliOptions) -> anyhow::Result<()> {
    let registry = WatchRegistry::default();
    let (_subscription, rx) = registry.channel();
    registry.set_paths(store.config().watch_paths());

    let state = registry.state();
    if state.active.is_empty() {
        anyhow::bail!("No configured directory can be watched");
    }
    eprintln!(
        "Watching {}. Close stdin (Ctrl-D) to stop.",
        state
            .active
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let stop = Arc::new(AtomicBool::new(false));
    let stdin_stop = Arc::clone(&stop);
    std::thread::spawn(move || {
        for _ in std::io::stdin().lock().lines() {}
        stdin_stop.store(true, Ordering::SeqCst);
    });

    while !stop.load(Ordering::SeqCst) {
        let Ok(batch) = rx.recv_timeout(Duration::from_millis(200)) else {
            continue;
        };
        if options.json {
            println!("{}", serde_json::to_string(&batch)?);
            continue;
        }
        for event in batch {
            let path = event
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            println!("{:<8} {:<8} {}", event.domain, format!("{:?}", event.kind), path);
        }
    }
    Ok(())
}

fn run_play(
    store: &ConfigStore,
    mode: Option<LaunchMode>,
    options: &CliOptions,
) -> anyhow::Result<()> {
    let config = store.config();
    let session = ModPlaySession::from_config(config)?;
    let mut launcher = UriLauncher::for_config(config)?;
    let mut probe = SysinfoProbe::from_config(config);

    let report = session.run(mode, &mut launcher, &mut probe)?;

    if options.json {
        return print_json(&report);
    }
    println!("Session mode: {:?}", report.mode);
    match report.wait {
        Some(SessionWait::Exited { .. }) => println!("Game exited after ~{}s", report.duration_secs),
        Some(SessionWait::NeverAppeared) => println!("The game never started"),
        Some(SessionWait::GaveUp) => println!("Stopped waiting for the game to exit"),
        Some(SessionWait::Stopped) | None => {}
    }
    if let Some(created) = &report.snapshot {
        println!("Saves snapshotted to {}", created.path.display());
    }
    Ok(())
}

fn run_config(store: &ConfigStore, options: &CliOptions) -> anyhow::Result<()> {
    if options.json {
        return print_json(&serde_json::json!({
            "path": store.path(),
            "config": store.config(),
        }));
    }

    let config = store.config();
    println!("Configuration: {}", store.path().display());
    println!();
    for root in modvault_core::ConfigRoot::all() {
        println!("  {:<18} {}", root.key(), shown_path(config.root(*root)));
    }
    println!(
        "  {:<18} {}",
        "gameProcessNames",
        config.game_process_names.join(", ")
    );
    println!("  {:<18} {}", "gameRoot", shown_path(&config.game_root));
    println!("  {:<18} {}", "platform", config.platform);
    println!("  {:<18} {}", "steamAppId", config.steam_app_id);
    Ok(())
}

fn shown_path(path: &Path) -> String {
    if path.as_os_str().is_empty() {
        "(not set)".to_string()
    } else {
        path.display().to_string()
    }
}

fn run_detect(mut store: ConfigStore, save: bool, options: &CliOptions) -> anyhow::Result<()> {
    let detected = detect_paths(store.config());
    let saved = if save {
        store.update(|cfg| {
            detected.apply_to(cfg);
            Ok(())
        })?
    } else {
        false
    };

    if options.json {
        return print_json(&serde_json::json!({
            "detected": detected,
            "saved": saved,
        }));
    }

    let show = |path: &Option<PathBuf>| {
        path.as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not found)".to_string())
    };
    println!("  {:<18} {}", "gameRoot", show(&detected.game_root));
    println!("  {:<18} {}", "gameExe", show(&detected.game_exe));
    println!("  {:<18} {}", "activeModsPath", show(&detected.active_mods_path));
    println!("  {:<18} {}", "saveDataPath", show(&detected.save_data_path));
    println!("  {:<18} {}", "platform", detected.platform);
    println!();
    if saved {
        println!("Unset values saved to {}", store.path().display());
    } else if save {
        println!("Nothing new to save");
    } else {
        println!("Run with --save to fill unset configuration values");
    }
    Ok(())
}

/// Print CLI help
pub fn print_help() {
    println!("modvault v{}", env!("CARGO_PKG_VERSION"));
    println!("Manage game mods and mod-play save data");
    println!();
    println!("USAGE:");
    println!("    modvault <command> [options]");
    println!();
    println!("COMMANDS:");
    println!("    scan                        List mods in the active dir and the vault");
    println!("    apply <name>...             Enable exactly these mods");
    println!("    enable <name>...            Enable mods, keeping the others");
    println!("    disable <name>...           Disable mods");
    println!("    delete <name>               Permanently delete a mod");
    println!("    snapshot                    Copy the save dir into a new snapshot");
    println!("    restore                     Restore the newest snapshot into the save dir");
    println!("    snapshots                   List snapshots");
    println!("    log [--days N]              Show the snapshot copy log");
    println!("    watch                       Print filesystem changes until stdin closes");
    println!("    play [--mod|--vanilla]      Launch the game, swapping saves for mod play");
    println!("    config                      Show the configuration");
    println!("    config set <key> <value>    Change a configuration value");
    println!("    detect [--save]             Find the game install and save directory");
    println!();
    println!("OPTIONS:");
    println!("    --json                      Output in JSON format");
    println!("    --config <file>             Use this configuration file");
    println!("    --verbose, -v               Debug logging on stderr");
    println!("    --help, -h                  Show this help message");
    println!();
    println!("EXAMPLES:");
    println!("    modvault scan --json");
    println!("    modvault apply ReduxHUD");
    println!("    modvault config set saveDataPath ~/Saves/SM2");
    println!("    modvault log --days 7");
    println!("    modvault config set platform epic");
}
