//! Error types for scripthost.

use std::path::PathBuf;

use thiserror::Error;

use crate::bridge::ResolveError;
use crate::script::ScriptType;

/// Common error type for scripthost.
#[derive(Error, Debug)]
pub enum ScriptHostError {
    /// The referenced script does not exist under the scripts root.
    #[error("script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    /// Compile-time or runtime fault inside a script.
    ///
    /// Interpreter errors and panics raised while a script runs both end up
    /// here; nothing originating in a script unwinds past the engine.
    #[error("script error in {name}: {message}")]
    Script { name: String, message: String },

    /// Script path is absolute or leaves the scripts root.
    #[error("invalid script path: {}", .0.display())]
    InvalidPath(PathBuf),

    /// The command sender could not be resolved to a session or position.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The embedded interpreter for a script type could not be created.
    #[error("{script_type} engine failed to initialize: {message}")]
    EngineInitialization {
        script_type: ScriptType,
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem watcher error.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ScriptHostError {
    /// Whether this error carries a message meant for the command sender
    /// rather than the server log.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, ScriptHostError::Resolve(_))
    }
}

/// Result type alias for scripthost operations.
pub type Result<T> = std::result::Result<T, ScriptHostError>;
