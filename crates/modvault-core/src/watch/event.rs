//! Watch domains, events and the mapping from raw `notify` events.

use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use notify::EventKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A watched root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WatchDomain {
    /// The active mods directory
    Mods,
    /// The snapshot store
    ModPlay,
    /// The backup root
    Backup,
}

impl WatchDomain {
    pub const ALL: [WatchDomain; 3] = [Self::Mods, Self::ModPlay, Self::Backup];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Mods => 0,
            Self::ModPlay => 1,
            Self::Backup => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mods => "mods",
            Self::ModPlay => "modPlay",
            Self::Backup => "backup",
        }
    }
}

impl fmt::Display for WatchDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    Added,
    Removed,
    Changed,
    /// The domain's view may be stale; observers should rescan it
    Refresh,
}

/// A single filesystem change, or a refresh hint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub domain: WatchDomain,
    pub kind: WatchEventKind,
    /// `None` for [`WatchEventKind::Refresh`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub at: DateTime<Utc>,
}

impl WatchEvent {
    pub fn new(domain: WatchDomain, kind: WatchEventKind, path: PathBuf) -> Self {
        Self {
            domain,
            kind,
            path: Some(path),
            at: Utc::now(),
        }
    }

    pub fn refresh(domain: WatchDomain) -> Self {
        Self {
            domain,
            kind: WatchEventKind::Refresh,
            path: None,
            at: Utc::now(),
        }
    }

    pub fn is_refresh(&self) -> bool {
        self.kind == WatchEventKind::Refresh
    }

    /// Same domain, kind and path; the timestamp is not compared.
    pub fn same_change(&self, other: &WatchEvent) -> bool {
        self.domain == other.domain && self.kind == other.kind && self.path == other.path
    }
}

/// Root directory per domain.
///
/// In [`merged`](Self::merged), `None` keeps the current value and an empty
/// path clears the domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootPaths {
    pub mods: Option<PathBuf>,
    pub mod_play: Option<PathBuf>,
    pub backup: Option<PathBuf>,
}

impl RootPaths {
    /// Configured, non-empty root for `domain`.
    pub fn get(&self, domain: WatchDomain) -> Option<&Path> {
        let slot = match domain {
            WatchDomain::Mods => &self.mods,
            WatchDomain::ModPlay => &self.mod_play,
            WatchDomain::Backup => &self.backup,
        };
        slot.as_deref()
            .filter(|p| !p.to_string_lossy().trim().is_empty())
    }

    fn slot_mut(&mut self, domain: WatchDomain) -> &mut Option<PathBuf> {
        match domain {
            WatchDomain::Mods => &mut self.mods,
            WatchDomain::ModPlay => &mut self.mod_play,
            WatchDomain::Backup => &mut self.backup,
        }
    }

    /// `self` with every `Some` field of `next` applied.
    pub fn merged(&self, next: &RootPaths) -> RootPaths {
        let mut out = self.clone();
        for domain in WatchDomain::ALL {
            let incoming = match domain {
                WatchDomain::Mods => &next.mods,
                WatchDomain::ModPlay => &next.mod_play,
                WatchDomain::Backup => &next.backup,
            };
            if let Some(path) = incoming {
                *out.slot_mut(domain) = Some(path.clone());
            }
        }
        out
    }

    /// Domains whose effective root differs between `self` and `other`.
    pub fn changed_domains(&self, other: &RootPaths) -> Vec<WatchDomain> {
        WatchDomain::ALL
            .into_iter()
            .filter(|d| self.get(*d) != other.get(*d))
            .collect()
    }
}

/// Maps a raw `notify` event to (kind, path) pairs.
///
/// Access events and unknown kinds yield nothing. A rename reported with both
/// ends becomes a removal of the old path and an addition of the new one.
pub(crate) fn translate(kind: &EventKind, paths: Vec<PathBuf>) -> Vec<(WatchEventKind, PathBuf)> {
    match kind {
        EventKind::Create(_) => tag(WatchEventKind::Added, paths),
        EventKind::Remove(_) => tag(WatchEventKind::Removed, paths),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => tag(WatchEventKind::Removed, paths),
            RenameMode::To => tag(WatchEventKind::Added, paths),
            RenameMode::Both => {
                let mut out = Vec::with_capacity(paths.len());
                let mut iter = paths.into_iter();
                if let Some(from) = iter.next() {
                    out.push((WatchEventKind::Removed, from));
                }
                out.extend(iter.map(|to| (WatchEventKind::Added, to)));
                out
            }
            // Platforms that do not say which end this is
            _ => paths
                .into_iter()
                .map(|p| {
                    let kind = if p.exists() {
                        WatchEventKind::Added
                    } else {
                        WatchEventKind::Removed
                    };
                    (kind, p)
                })
                .collect(),
        },
        EventKind::Modify(_) | EventKind::Any => tag(WatchEventKind::Changed, paths),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}

fn tag(kind: WatchEventKind, paths: Vec<PathBuf>) -> Vec<(WatchEventKind, PathBuf)> {
    paths.into_iter().map(|p| (kind, p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};

    #[test]
    fn test_translate_kinds() {
        let p = || vec![PathBuf::from("/m/a")];
        assert_eq!(
            translate(&EventKind::Create(CreateKind::Folder), p()),
            vec![(WatchEventKind::Added, PathBuf::from("/m/a"))]
        );
        assert_eq!(
            translate(&EventKind::Remove(RemoveKind::File), p())[0].0,
            WatchEventKind::Removed
        );
        assert_eq!(
            translate(&EventKind::Modify(ModifyKind::Data(DataChange::Content)), p())[0].0,
            WatchEventKind::Changed
        );
        assert!(translate(&EventKind::Access(AccessKind::Any), p()).is_empty());
    }

    #[test]
    fn test_translate_rename_both() {
        let out = translate(
            &EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            vec![PathBuf::from("/m/old"), PathBuf::from("/m/new")],
        );
        assert_eq!(
            out,
            vec![
                (WatchEventKind::Removed, PathBuf::from("/m/old")),
                (WatchEventKind::Added, PathBuf::from("/m/new")),
            ]
        );
    }

    #[test]
    fn test_root_paths_merge() {
        let current = RootPaths {
            mods: Some(PathBuf::from("/a")),
            mod_play: Some(PathBuf::from("/b")),
            backup: None,
        };
        let next = RootPaths {
            mods: None,
            mod_play: Some(PathBuf::new()),
            backup: Some(PathBuf::from("/c")),
        };

        let merged = current.merged(&next);
        assert_eq!(merged.get(WatchDomain::Mods), Some(Path::new("/a")));
        assert_eq!(merged.get(WatchDomain::ModPlay), None);
        assert_eq!(merged.get(WatchDomain::Backup), Some(Path::new("/c")));
        assert_eq!(
            current.changed_domains(&merged),
            vec![WatchDomain::ModPlay, WatchDomain::Backup]
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = WatchEvent::refresh(WatchDomain::ModPlay);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["domain"], "modPlay");
        assert_eq!(json["kind"], "refresh");
        assert!(json.get("path").is_none());
    }
}
