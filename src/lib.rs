//! scripthost - runtime scripting for a long-running game server.
//!
//! Operators drop Lua or Rhai scripts into a directory; each file becomes a
//! server command named after it, and edits take effect without a restart.

pub mod bridge;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod script;

pub use bridge::{
    resolve_position, resolve_precise_position, resolve_session, BlockPos, CommandSender,
    ResolveError, ServerPos, SessionHandle, WorldPos, WorldView, FIXED_POINT_SCALE,
};
pub use command::{CommandRegistry, InMemoryCommandRegistry, ScriptCommand};
pub use config::Config;
pub use error::{Result, ScriptHostError};
pub use script::{
    CommandOutcome, EngineRegistry, HostFunction, ScriptEngine, ScriptService, ScriptType,
    ScriptValue,
};
