//! Command registry shared between the directory monitor and dispatch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::script::ScriptType;

/// A command backed by one script file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCommand {
    /// Command name as derived from the file name.
    pub name: String,
    /// Script path relative to the scripts directory.
    pub file: PathBuf,
    pub script_type: ScriptType,
}

/// Maps command names to script commands.
///
/// Implementations must be safe to call from the watcher thread while
/// commands are being dispatched.
pub trait CommandRegistry: Send + Sync {
    /// Register `command`, returning the registration it replaced.
    fn register(&self, command: ScriptCommand) -> Option<ScriptCommand>;

    /// Remove the registration for `name` only if it still points at `file`.
    ///
    /// Returns whether anything was removed.
    fn unregister(&self, name: &str, file: &Path) -> bool;

    fn lookup(&self, name: &str) -> Option<ScriptCommand>;

    /// Registered command names, sorted.
    fn names(&self) -> Vec<String>;

    /// Key under which `name` is stored; names with equal keys collide.
    fn command_key(&self, name: &str) -> String {
        name.to_string()
    }
}

/// In-process registry guarded by a read-write lock.
#[derive(Debug, Default)]
pub struct InMemoryCommandRegistry {
    commands: RwLock<HashMap<String, ScriptCommand>>,
    case_sensitive: bool,
}

impl InMemoryCommandRegistry {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
            case_sensitive,
        }
    }

    pub fn len(&self) -> usize {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CommandRegistry for InMemoryCommandRegistry {
    fn register(&self, command: ScriptCommand) -> Option<ScriptCommand> {
        let key = self.command_key(&command.name);
        self.commands
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, command)
    }

    fn unregister(&self, name: &str, file: &Path) -> bool {
        let key = self.command_key(name);
        let mut commands = self.commands.write().unwrap_or_else(PoisonError::into_inner);
        match commands.get(&key) {
            Some(existing) if existing.file == file => {
                commands.remove(&key);
                true
            }
            _ => false,
        }
    }

    fn lookup(&self, name: &str) -> Option<ScriptCommand> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.command_key(name))
            .cloned()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    fn command_key(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }
}
