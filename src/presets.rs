//! Watches a directory of named preset files and enumerates them for menus.

use crossbeam_channel::{unbounded, Receiver};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A named preset file, grouped by its subdirectory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetEntry {
    pub display_name: String,
    pub filename: PathBuf,
}

/// Flat ordered list of preset files under `dir`, grouped by subdirectory.
/// Display names are relative paths without extension, joined with " / ".
pub fn group_presets(dir: &Path) -> Vec<PresetEntry> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = match path.strip_prefix(dir) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let mut parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if let Some(last) = parts.last_mut() {
            if let Some(stem) = Path::new(last).file_stem().and_then(|s| s.to_str()) {
                *last = stem.to_string();
            }
        }
        entries.push(PresetEntry {
            display_name: parts.join(" / "),
            filename: path.to_path_buf(),
        });
    }
    entries
}

/// Raised whenever the set or content of preset files changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Update;

pub struct PresetWatcher {
    _watcher: RecommendedWatcher,
    updates: Receiver<Update>,
}

impl PresetWatcher {
    pub fn new(dir: &Path) -> Result<Self, notify::Error> {
        let (tx, rx) = unbounded();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        tx.send(Update).ok();
                    }
                }
            },
            Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::Recursive)?;
        Ok(Self {
            _watcher: watcher,
            updates: rx,
        })
    }

    /// Channel of change notifications; consumers typically drain it and
    /// re-enumerate via [`group_presets`].
    pub fn updates(&self) -> &Receiver<Update> {
        &self.updates
    }

    /// True if anything changed since the last call; drains the queue.
    pub fn take_update(&self) -> bool {
        let mut seen = false;
        while self.updates.try_recv().is_ok() {
            seen = true;
        }
        seen
    }
}
