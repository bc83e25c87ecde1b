//! The contract every interpreter backend implements.
//!
//! Engines keep their global scope between calls: a global defined by one
//! script is visible to every later script run on the same engine. Scripts
//! run synchronously on the calling thread with no time limit, so a script
//! that never returns stalls its caller.

use std::any::Any;
use std::fs;
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, error};

use super::types::{ScriptType, ScriptValue};
use crate::{Result, ScriptHostError};

/// An embedded interpreter for one [`ScriptType`].
pub trait ScriptEngine: Send + Sync {
    /// Which backend this is.
    fn script_type(&self) -> ScriptType;

    /// Compile and run a snippet in the engine's global scope.
    fn execute_inline(&self, source: &str) -> Result<()>;

    /// Read a script relative to the scripts root and run it.
    fn execute_file(&self, path: &Path) -> Result<()>;

    /// Bind a value under `name` in the global scope, replacing any
    /// previous binding.
    fn set_value(&self, name: &str, value: ScriptValue) -> Result<()>;
}

/// Join `path` onto `root`, refusing absolute paths and `..` components.
pub fn resolve_script_path(root: &Path, path: &Path) -> Result<PathBuf> {
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || path.as_os_str().is_empty() {
        return Err(ScriptHostError::InvalidPath(path.to_path_buf()));
    }
    Ok(root.join(path))
}

/// Remove a leading UTF-8 byte-order mark.
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// Read a script's source text, without any byte-order mark.
pub fn read_script_source(root: &Path, path: &Path) -> Result<String> {
    let full_path = resolve_script_path(root, path)?;
    match fs::read_to_string(&full_path) {
        Ok(text) => Ok(strip_bom(&text).to_string()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(ScriptHostError::ScriptNotFound(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Run one script body, containing both interpreter errors and panics.
///
/// Failures are logged once, naming the script, and come back as
/// [`ScriptHostError::Script`].
pub(crate) fn run_guarded<F>(script_type: ScriptType, name: &str, run: F) -> Result<()>
where
    F: FnOnce() -> std::result::Result<(), String>,
{
    debug!("Starting {} script {} ...", script_type, name);

    let message = match panic::catch_unwind(AssertUnwindSafe(run)) {
        Ok(Ok(())) => {
            debug!("{} script {} ended.", script_type, name);
            return Ok(());
        }
        Ok(Err(message)) => message,
        Err(payload) => format!("panic: {}", panic_message(payload.as_ref())),
    };

    error!(
        script = %name,
        "{} script {} failed: {}",
        script_type, name, message
    );
    Err(ScriptHostError::Script {
        name: name.to_string(),
        message,
    })
}

/// Update a global binding, containing interpreter errors and panics.
///
/// Failures are logged once and come back as [`ScriptHostError::Script`]
/// named after the binding.
pub(crate) fn guard_binding<F>(script_type: ScriptType, name: &str, bind: F) -> Result<()>
where
    F: FnOnce() -> std::result::Result<(), String>,
{
    let message = match panic::catch_unwind(AssertUnwindSafe(bind)) {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(message)) => message,
        Err(payload) => format!("panic: {}", panic_message(payload.as_ref())),
    };

    error!("Failed to bind {} global {}: {}", script_type, name, message);
    Err(ScriptHostError::Script {
        name: name.to_string(),
        message,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
