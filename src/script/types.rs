//! Script types and data structures.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bridge::{BlockPos, SessionHandle};

/// Identifies which interpreter backend a script belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Lua,
    Rhai,
}

impl ScriptType {
    /// Every supported script type.
    pub const ALL: [ScriptType; 2] = [ScriptType::Lua, ScriptType::Rhai];

    /// Map a file extension (without the dot, any case) to a script type.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "lua" => Some(ScriptType::Lua),
            "rhai" => Some(ScriptType::Rhai),
            _ => None,
        }
    }

    /// Infer the script type of a path from its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Canonical file extension.
    pub fn extension(self) -> &'static str {
        match self {
            ScriptType::Lua => "lua",
            ScriptType::Rhai => "rhai",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptType::Lua => f.write_str("LUA"),
            ScriptType::Rhai => f.write_str("RHAI"),
        }
    }
}

/// Derive a command name from a script path (file name without extension).
pub fn command_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// One script on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFile {
    /// File path relative to the scripts directory.
    pub path: PathBuf,
    /// Backend inferred from the extension at discovery.
    pub script_type: ScriptType,
    /// Last observed modification time.
    pub modified: Option<DateTime<Utc>>,
}

impl ScriptFile {
    /// Command name this script is registered under.
    pub fn command_name(&self) -> String {
        command_name(&self.path).unwrap_or_default()
    }
}

/// Host callable exposed to scripts.
///
/// Arguments arrive already converted to [`ScriptValue`]; an `Err` is raised
/// inside the script as a runtime error.
#[derive(Clone)]
pub struct HostFunction(
    Arc<dyn Fn(Vec<ScriptValue>) -> Result<ScriptValue, String> + Send + Sync>,
);

impl HostFunction {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Vec<ScriptValue>) -> Result<ScriptValue, String> + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    pub fn call(&self, args: Vec<ScriptValue>) -> Result<ScriptValue, String> {
        (self.0)(args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostFunction")
    }
}

/// A value that can be bound into a script's global scope.
///
/// Host object graphs are never exposed directly; positions and sessions
/// cross as opaque read-only handles.
#[derive(Debug, Clone, Default)]
pub enum ScriptValue {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    /// An ordered sequence. Lua tables convert back through their
    /// sequence part only, so keyed entries are dropped. Rhai refuses a
    /// list that holds a function anywhere inside it.
    List(Vec<ScriptValue>),
    Position(BlockPos),
    Session(SessionHandle),
    Function(HostFunction),
}

impl ScriptValue {
    pub fn is_nil(&self) -> bool {
        matches!(self, ScriptValue::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ScriptValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Boolean(value)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        ScriptValue::Integer(value)
    }
}

impl From<i32> for ScriptValue {
    fn from(value: i32) -> Self {
        ScriptValue::Integer(value.into())
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Number(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::Text(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::Text(value)
    }
}

impl From<BlockPos> for ScriptValue {
    fn from(value: BlockPos) -> Self {
        ScriptValue::Position(value)
    }
}

impl From<SessionHandle> for ScriptValue {
    fn from(value: SessionHandle) -> Self {
        ScriptValue::Session(value)
    }
}

impl From<HostFunction> for ScriptValue {
    fn from(value: HostFunction) -> Self {
        ScriptValue::Function(value)
    }
}

impl<T: Into<ScriptValue>> From<Option<T>> for ScriptValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ScriptValue::Nil, Into::into)
    }
}

impl<T: Into<ScriptValue>> From<Vec<T>> for ScriptValue {
    fn from(value: Vec<T>) -> Self {
        ScriptValue::List(value.into_iter().map(Into::into).collect())
    }
}

/// Result of scanning the scripts directory.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// Number of scripts discovered.
    pub added: usize,
    /// Number of scripts whose modification time changed.
    pub updated: usize,
    /// Number of scripts no longer on disk.
    pub removed: usize,
    /// Entries that could not be read (path, error).
    pub errors: Vec<(String, String)>,
}

impl SyncResult {
    /// Check if any changes were made.
    pub fn has_changes(&self) -> bool {
        self.added > 0 || self.updated > 0 || self.removed > 0
    }
}
