//! Keeps the command registry in sync with the scripts directory.
//!
//! The loader is a plain state machine over [`FileEvent`]s. The directory
//! monitor feeds it events from the filesystem watcher; tests feed it
//! synthetic ones.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::types::{command_name, ScriptFile, ScriptType, SyncResult};
use crate::command::{CommandRegistry, ScriptCommand};
use crate::Result;

/// A change to one path below the scripts directory.
///
/// Paths may be absolute (inside the scripts directory) or relative to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

/// What applying an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A new script was discovered and its command registered.
    Registered {
        command: ScriptCommand,
        replaced: Option<ScriptCommand>,
    },
    /// A tracked script changed on disk.
    Updated(PathBuf),
    /// A tracked script went away.
    Removed {
        path: PathBuf,
        /// Whether its command was still registered to it.
        unregistered: bool,
        /// Another script now serving the same command name.
        fallback: Option<ScriptCommand>,
    },
}

#[derive(Debug, Clone)]
struct Tracked {
    file: ScriptFile,
    /// Discovery order, used to pick a replacement on removal.
    seq: u64,
}

/// Tracks the scripts below one directory and their command registrations.
pub struct ScriptLoader {
    scripts_dir: PathBuf,
    canonical_dir: Option<PathBuf>,
    recursive: bool,
    registry: Arc<dyn CommandRegistry>,
    files: HashMap<PathBuf, Tracked>,
    next_seq: u64,
}

impl ScriptLoader {
    pub fn new<P: AsRef<Path>>(
        scripts_dir: P,
        recursive: bool,
        registry: Arc<dyn CommandRegistry>,
    ) -> Self {
        let scripts_dir = scripts_dir.as_ref().to_path_buf();
        Self {
            canonical_dir: fs::canonicalize(&scripts_dir).ok(),
            scripts_dir,
            recursive,
            registry,
            files: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn registry(&self) -> &Arc<dyn CommandRegistry> {
        &self.registry
    }

    /// Ensure the scripts directory exists.
    pub fn ensure_scripts_dir(&mut self) -> Result<()> {
        if !self.scripts_dir.exists() {
            fs::create_dir_all(&self.scripts_dir)?;
            info!("Created scripts directory {}", self.scripts_dir.display());
        }
        self.canonical_dir = fs::canonicalize(&self.scripts_dir).ok();
        Ok(())
    }

    /// Tracked scripts, sorted by path.
    pub fn files(&self) -> Vec<&ScriptFile> {
        let mut files: Vec<&ScriptFile> = self.files.values().map(|t| &t.file).collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    /// The tracked script at `path` (relative to the scripts directory).
    pub fn get(&self, path: &Path) -> Option<&ScriptFile> {
        self.files.get(path).map(|t| &t.file)
    }

    /// Walk the whole directory and reconcile the tracked set with it.
    ///
    /// Files are visited in sorted path order, so with colliding command
    /// names the last path in that order wins.
    pub fn scan(&mut self) -> SyncResult {
        let mut result = SyncResult::default();
        if self.canonical_dir.is_none() {
            self.canonical_dir = fs::canonicalize(&self.scripts_dir).ok();
        }

        let mut found = Vec::new();
        let mut failed_dirs = Vec::new();
        if self.scripts_dir.is_dir() {
            let root = self.scripts_dir.clone();
            let mut walk = Walk {
                found: &mut found,
                failed_dirs: &mut failed_dirs,
                visited: HashSet::new(),
                result: &mut result,
            };
            self.collect_scripts(&root, &mut walk);
        } else {
            warn!(
                "Scripts directory {} does not exist",
                self.scripts_dir.display()
            );
        }

        let gone: Vec<PathBuf> = {
            let found_set: HashSet<&PathBuf> = found.iter().collect();
            self.files
                .keys()
                .filter(|path| !found_set.contains(path))
                .filter(|path| !failed_dirs.iter().any(|dir| path.starts_with(dir)))
                .cloned()
                .collect()
        };

        for path in found {
            let previous = self.files.get(&path).map(|t| t.file.modified);
            match self.discover(&path) {
                Some(Transition::Registered { .. }) => result.added += 1,
                Some(Transition::Updated(_))
                    if previous != self.files.get(&path).map(|t| t.file.modified) =>
                {
                    result.updated += 1
                }
                _ => {}
            }
        }

        result.removed = self.remove_paths(gone).len();

        debug!(
            "Scan of {}: {} added, {} updated, {} removed, {} errors",
            self.scripts_dir.display(),
            result.added,
            result.updated,
            result.removed,
            result.errors.len()
        );
        result
    }

    /// Apply one filesystem event.
    pub fn apply(&mut self, event: FileEvent) -> Vec<Transition> {
        match event {
            FileEvent::Created(path) => self.on_created(&path),
            FileEvent::Modified(path) => self.on_modified(&path),
            FileEvent::Removed(path) => self.on_removed(&path),
        }
    }

    fn on_created(&mut self, path: &Path) -> Vec<Transition> {
        let Some(rel) = self.relative(path).filter(|p| !p.as_os_str().is_empty()) else {
            return Vec::new();
        };
        let full = self.scripts_dir.join(&rel);

        if full.is_dir() {
            if !self.recursive {
                return Vec::new();
            }
            let mut found = Vec::new();
            let mut walk = Walk {
                found: &mut found,
                failed_dirs: &mut Vec::new(),
                // a link back to the root must not re-walk it
                visited: self.canonical_dir.iter().cloned().collect(),
                result: &mut SyncResult::default(),
            };
            self.collect_scripts(&full, &mut walk);
            return found
                .iter()
                .filter_map(|script| self.discover(script))
                .collect();
        }

        if full.is_file() && self.accepts(&rel) {
            return self.discover(&rel).into_iter().collect();
        }
        Vec::new()
    }

    fn on_modified(&mut self, path: &Path) -> Vec<Transition> {
        let Some(rel) = self.relative(path).filter(|p| !p.as_os_str().is_empty()) else {
            return Vec::new();
        };
        let full = self.scripts_dir.join(&rel);

        if self.files.contains_key(&rel) && !full.exists() {
            return self.remove_paths(vec![rel]);
        }
        if full.is_file() && self.accepts(&rel) {
            return self.discover(&rel).into_iter().collect();
        }
        Vec::new()
    }

    fn on_removed(&mut self, path: &Path) -> Vec<Transition> {
        let Some(rel) = self.relative(path) else {
            return Vec::new();
        };

        if self.files.contains_key(&rel) {
            return self.remove_paths(vec![rel]);
        }

        // A directory: drop everything tracked below it.
        let below: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|tracked| tracked.starts_with(&rel))
            .cloned()
            .collect();
        self.remove_paths(below)
    }

    /// Track a script file, registering its command on first sight.
    fn discover(&mut self, rel: &Path) -> Option<Transition> {
        let script_type = ScriptType::from_path(rel)?;
        let name = command_name(rel)?;
        let modified = self.modified_time(rel);

        if let Some(tracked) = self.files.get_mut(rel) {
            tracked.file.modified = modified;
            debug!("Script {} changed", rel.display());
            return Some(Transition::Updated(rel.to_path_buf()));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.files.insert(
            rel.to_path_buf(),
            Tracked {
                file: ScriptFile {
                    path: rel.to_path_buf(),
                    script_type,
                    modified,
                },
                seq,
            },
        );

        let command = ScriptCommand {
            name,
            file: rel.to_path_buf(),
            script_type,
        };
        let replaced = self
            .registry
            .register(command.clone())
            .filter(|previous| previous.file != command.file);

        if let Some(previous) = &replaced {
            warn!(
                "Command {} from {} replaces the one from {}",
                command.name,
                command.file.display(),
                previous.file.display()
            );
        }
        info!(
            "Registered {} command {} from {}",
            script_type,
            command.name,
            command.file.display()
        );

        Some(Transition::Registered { command, replaced })
    }

    /// Stop tracking `paths`, unregistering their commands where still active.
    fn remove_paths(&mut self, mut paths: Vec<PathBuf>) -> Vec<Transition> {
        paths.sort();
        let removed: Vec<ScriptFile> = paths
            .iter()
            .filter_map(|path| self.files.remove(path))
            .map(|tracked| tracked.file)
            .collect();

        let mut transitions = Vec::with_capacity(removed.len());
        for file in removed {
            let name = file.command_name();
            let unregistered = self.registry.unregister(&name, &file.path);
            let fallback = if unregistered {
                info!("Unregistered command {} ({} removed)", name, file.path.display());
                self.register_fallback(&name)
            } else {
                debug!(
                    "Script {} removed; command {} is served by another file",
                    file.path.display(),
                    name
                );
                None
            };
            transitions.push(Transition::Removed {
                path: file.path,
                unregistered,
                fallback,
            });
        }
        transitions
    }

    /// Register the most recently discovered script still answering to `name`.
    fn register_fallback(&self, name: &str) -> Option<ScriptCommand> {
        let key = self.registry.command_key(name);
        let candidate = self
            .files
            .values()
            .filter(|t| self.registry.command_key(&t.file.command_name()) == key)
            .max_by_key(|t| t.seq)?;

        let command = ScriptCommand {
            name: candidate.file.command_name(),
            file: candidate.file.path.clone(),
            script_type: candidate.file.script_type,
        };
        self.registry.register(command.clone());
        info!(
            "Command {} now served by {}",
            command.name,
            command.file.display()
        );
        Some(command)
    }

    /// Gather script paths below `dir`.
    ///
    /// Directories are keyed by canonical path, so a symlink cycle is
    /// walked once.
    fn collect_scripts(&self, dir: &Path, walk: &mut Walk<'_>) {
        if let Ok(canonical) = fs::canonicalize(dir) {
            if !walk.visited.insert(canonical) {
                debug!("Skipping {}: directory already visited", dir.display());
                return;
            }
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                walk.result
                    .errors
                    .push((dir.display().to_string(), e.to_string()));
                if let Some(rel) = self.relative(dir) {
                    walk.failed_dirs.push(rel);
                }
                return;
            }
        };

        let mut paths: Vec<PathBuf> = entries.flatten().map(|entry| entry.path()).collect();
        paths.sort();

        for path in paths {
            if path.is_dir() {
                if self.recursive {
                    self.collect_scripts(&path, walk);
                }
            } else if ScriptType::from_path(&path).is_some() {
                if let Some(rel) = self.relative(&path) {
                    walk.found.push(rel);
                }
            }
        }
    }

    /// Whether a relative path is in scope for this loader.
    fn accepts(&self, rel: &Path) -> bool {
        ScriptType::from_path(rel).is_some() && (self.recursive || rel.components().count() == 1)
    }

    /// Express `path` relative to the scripts directory.
    ///
    /// Returns `None` for paths outside it.
    fn relative(&self, path: &Path) -> Option<PathBuf> {
        let rel = if let Ok(rel) = path.strip_prefix(&self.scripts_dir) {
            rel.to_path_buf()
        } else if let Some(rel) = self
            .canonical_dir
            .as_deref()
            .and_then(|dir| path.strip_prefix(dir).ok())
        {
            rel.to_path_buf()
        } else if path.is_relative() {
            path.to_path_buf()
        } else {
            return None;
        };

        let inside = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        inside.then_some(rel)
    }

    fn modified_time(&self, rel: &Path) -> Option<DateTime<Utc>> {
        fs::metadata(self.scripts_dir.join(rel))
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from)
    }
}

struct Walk<'a> {
    found: &'a mut Vec<PathBuf>,
    failed_dirs: &'a mut Vec<PathBuf>,
    visited: HashSet<PathBuf>,
    result: &'a mut SyncResult,
}
