//! Resolution of command senders into values that can cross the script
//! boundary.
//!
//! Everything here is pure: the host world is only read through
//! [`WorldView`], and failures come back as [`ResolveError`] with a message
//! meant for the player who issued the command.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Fixed-point scale of server-side entity positions (1 block = 32 units).
pub const FIXED_POINT_SCALE: f32 = 32.0;

/// Integer block coordinate in the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.z)
    }
}

/// Precise world position in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WorldPos {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl WorldPos {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// The block containing this position.
    ///
    /// Floors every axis so that -0.5 lands in block -1. Casting with `as`
    /// would truncate toward zero and put it in block 0.
    pub fn to_block(self) -> BlockPos {
        BlockPos {
            x: self.x.floor() as i32,
            y: self.y.floor() as i32,
            z: self.z.floor() as i32,
        }
    }
}

/// Entity position as tracked by the server, in fixed-point units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ServerPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn to_world(self) -> WorldPos {
        WorldPos {
            x: self.x as f32 / FIXED_POINT_SCALE,
            y: self.y as f32 / FIXED_POINT_SCALE,
            z: self.z as f32 / FIXED_POINT_SCALE,
        }
    }
}

/// A live client session, as handed to scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionHandle {
    /// Entity id of the player controlled by this session.
    pub entity_id: i32,
    pub player_name: String,
    /// Platform account identifier (e.g. a Steam id).
    pub platform_id: String,
}

/// Who issued a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSender {
    /// Server console or another local operator channel.
    Console,
    /// A player; `session` is `None` once the client has disconnected.
    Player {
        name: String,
        session: Option<SessionHandle>,
    },
}

impl CommandSender {
    /// Display name of the sender.
    pub fn name(&self) -> &str {
        match self {
            CommandSender::Console => "console",
            CommandSender::Player { name, .. } => name,
        }
    }

    pub fn is_console(&self) -> bool {
        matches!(self, CommandSender::Console)
    }
}

/// Read access to live entity state.
pub trait WorldView {
    /// Server-side position of the player entity, if it is in the world.
    fn player_position(&self, entity_id: i32) -> Option<ServerPos>;
}

/// Failure to resolve a sender, phrased for the sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Unable to get your remote client info. You must be logged in as a regular player.")]
    SenderNotConnected,

    #[error("Unable to get your position.")]
    PositionUnavailable,
}

/// Returns the live session of the sender.
pub fn resolve_session(sender: &CommandSender) -> Result<&SessionHandle, ResolveError> {
    match sender {
        CommandSender::Player {
            session: Some(session),
            ..
        } => Ok(session),
        _ => Err(ResolveError::SenderNotConnected),
    }
}

/// Returns the precise world position of the session's player entity.
pub fn session_precise_position(
    session: &SessionHandle,
    world: &dyn WorldView,
) -> Result<WorldPos, ResolveError> {
    world
        .player_position(session.entity_id)
        .map(ServerPos::to_world)
        .ok_or(ResolveError::PositionUnavailable)
}

/// Returns the block the session's player entity stands in.
pub fn session_position(
    session: &SessionHandle,
    world: &dyn WorldView,
) -> Result<BlockPos, ResolveError> {
    session_precise_position(session, world).map(WorldPos::to_block)
}

/// Returns the precise world position of the sender.
pub fn resolve_precise_position(
    sender: &CommandSender,
    world: &dyn WorldView,
) -> Result<WorldPos, ResolveError> {
    session_precise_position(resolve_session(sender)?, world)
}

/// Returns the block position of the sender.
pub fn resolve_position(
    sender: &CommandSender,
    world: &dyn WorldView,
) -> Result<BlockPos, ResolveError> {
    session_position(resolve_session(sender)?, world)
}
