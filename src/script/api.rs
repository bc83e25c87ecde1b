//! Values bound into a script for one command invocation.

use crate::bridge::{
    resolve_session, session_position, BlockPos, CommandSender, ResolveError, SessionHandle,
    WorldView,
};
use crate::Result;

use super::engine::ScriptEngine;
use super::types::ScriptValue;

pub const COMMAND: &str = "command";
pub const SENDER: &str = "sender";
pub const ARGS: &str = "args";
pub const SESSION: &str = "session";
pub const POSITION: &str = "position";

/// Per-invocation context handed to a command script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptContext {
    /// Name the command was invoked as.
    pub command: String,
    pub sender_name: String,
    pub args: Vec<String>,
    /// Live session of a player sender; `None` for the console.
    pub session: Option<SessionHandle>,
    /// Block the player stands in; `None` for the console.
    pub position: Option<BlockPos>,
}

impl ScriptContext {
    /// Build the context for `sender`.
    ///
    /// Players must have a live session and a known position; console
    /// senders get neither.
    pub fn resolve(
        command: &str,
        sender: &CommandSender,
        args: &[String],
        world: &dyn WorldView,
    ) -> std::result::Result<Self, ResolveError> {
        let (session, position) = if sender.is_console() {
            (None, None)
        } else {
            let session = resolve_session(sender)?;
            let position = session_position(session, world)?;
            (Some(session.clone()), Some(position))
        };

        Ok(Self {
            command: command.to_string(),
            sender_name: sender.name().to_string(),
            args: args.to_vec(),
            session,
            position,
        })
    }

    /// Bind every value into the engine's global scope.
    ///
    /// Absent values are bound as nil so nothing leaks from the previous
    /// invocation.
    pub fn bind(&self, engine: &dyn ScriptEngine) -> Result<()> {
        engine.set_value(COMMAND, self.command.as_str().into())?;
        engine.set_value(SENDER, self.sender_name.as_str().into())?;
        engine.set_value(ARGS, self.args.clone().into())?;
        engine.set_value(SESSION, ScriptValue::from(self.session.clone()))?;
        engine.set_value(POSITION, ScriptValue::from(self.position))?;
        Ok(())
    }
}
