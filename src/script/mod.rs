//! Script engines and the script-directory lifecycle.
//!
//! Commands are backed by script files in the scripts directory. Each
//! supported language has one process-wide interpreter; the directory
//! monitor keeps command registrations in step with the files on disk.

pub mod api;
pub mod engine;
pub mod loader;
pub mod lua_engine;
pub mod monitor;
pub mod registry;
pub mod rhai_engine;
pub mod service;
pub mod types;

pub use api::ScriptContext;
pub use engine::{read_script_source, resolve_script_path, strip_bom, ScriptEngine};
pub use loader::{FileEvent, ScriptLoader, Transition};
pub use lua_engine::LuaEngine;
pub use monitor::ScriptDirectoryMonitor;
pub use registry::EngineRegistry;
pub use rhai_engine::RhaiEngine;
pub use service::{CommandOutcome, ScriptService};
pub use types::{command_name, HostFunction, ScriptFile, ScriptType, ScriptValue, SyncResult};
