//! Lazily created, process-lifetime engines keyed by [`ScriptType`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tracing::{error, info, warn};

use super::engine::ScriptEngine;
use super::lua_engine::LuaEngine;
use super::rhai_engine::RhaiEngine;
use super::types::ScriptType;
use crate::config::LuaConfig;
use crate::{Result, ScriptHostError};

/// Outcome of the one initialization attempt for an engine.
///
/// A failure is kept so that later accesses fail fast with the same message
/// instead of retrying the interpreter setup.
type Slot<E> = std::result::Result<Arc<E>, String>;

static GLOBAL: OnceLock<Arc<EngineRegistry>> = OnceLock::new();

/// One engine per script type, each created on first access.
pub struct EngineRegistry {
    scripts_root: PathBuf,
    lua_config: LuaConfig,
    lua: OnceLock<Slot<LuaEngine>>,
    rhai: OnceLock<Slot<RhaiEngine>>,
}

impl EngineRegistry {
    pub fn new<P: Into<PathBuf>>(scripts_root: P, lua_config: LuaConfig) -> Self {
        Self {
            scripts_root: scripts_root.into(),
            lua_config,
            lua: OnceLock::new(),
            rhai: OnceLock::new(),
        }
    }

    /// Install the process-wide registry, or return the one already installed.
    pub fn install_global(registry: EngineRegistry) -> Arc<EngineRegistry> {
        let requested_root = registry.scripts_root.clone();
        let installed = GLOBAL.get_or_init(|| Arc::new(registry));
        if installed.scripts_root != requested_root {
            warn!(
                "Engine registry already installed for {}, ignoring {}",
                installed.scripts_root.display(),
                requested_root.display()
            );
        }
        Arc::clone(installed)
    }

    /// The process-wide registry, if installed.
    pub fn global() -> Option<Arc<EngineRegistry>> {
        GLOBAL.get().cloned()
    }

    pub fn scripts_root(&self) -> &Path {
        &self.scripts_root
    }

    /// The Lua engine, created on first call.
    pub fn lua(&self) -> Result<Arc<LuaEngine>> {
        Self::get_or_create(&self.lua, ScriptType::Lua, || {
            LuaEngine::new(&self.scripts_root, &self.lua_config)
        })
    }

    /// The Rhai engine, created on first call.
    pub fn rhai(&self) -> Result<Arc<RhaiEngine>> {
        Self::get_or_create(&self.rhai, ScriptType::Rhai, || {
            RhaiEngine::new(&self.scripts_root)
        })
    }

    /// The engine for `script_type`, created on first call.
    pub fn engine(&self, script_type: ScriptType) -> Result<Arc<dyn ScriptEngine>> {
        let engine: Arc<dyn ScriptEngine> = match script_type {
            ScriptType::Lua => self.lua()?,
            ScriptType::Rhai => self.rhai()?,
        };
        Ok(engine)
    }

    /// Whether the engine for `script_type` has been created successfully.
    pub fn is_initialized(&self, script_type: ScriptType) -> bool {
        match script_type {
            ScriptType::Lua => matches!(self.lua.get(), Some(Ok(_))),
            ScriptType::Rhai => matches!(self.rhai.get(), Some(Ok(_))),
        }
    }

    fn get_or_create<E, F>(
        cell: &OnceLock<Slot<E>>,
        script_type: ScriptType,
        create: F,
    ) -> Result<Arc<E>>
    where
        F: FnOnce() -> Result<E>,
    {
        let slot = cell.get_or_init(|| match create() {
            Ok(engine) => {
                info!("{} script engine initialized", script_type);
                Ok(Arc::new(engine))
            }
            Err(e) => {
                error!(
                    "{} script engine could not be initialized; {} scripts are disabled: {}",
                    script_type, script_type, e
                );
                Err(e.to_string())
            }
        });

        slot.clone()
            .map_err(|message| ScriptHostError::EngineInitialization {
                script_type,
                message,
            })
    }
}
