//! The scripting subsystem: engines, command registrations and dispatch.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use super::api::ScriptContext;
use super::loader::ScriptLoader;
use super::monitor::ScriptDirectoryMonitor;
use super::registry::EngineRegistry;
use super::types::{ScriptType, ScriptValue};
use crate::bridge::{CommandSender, WorldView};
use crate::command::{CommandRegistry, InMemoryCommandRegistry, ScriptCommand};
use crate::config::{Config, ScriptsConfig};
use crate::{Result, ScriptHostError};

/// How a command invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The script ran to completion.
    Completed,
    /// The sender could not be resolved; the message is meant for them.
    Rejected(String),
    /// The script or its engine failed; details are in the log.
    Failed(String),
    /// No script is registered under that name.
    Unknown,
}

/// Owns the script engines and keeps commands in sync with the scripts
/// directory.
pub struct ScriptService {
    engines: Arc<EngineRegistry>,
    commands: Arc<dyn CommandRegistry>,
    monitor: Mutex<Option<ScriptDirectoryMonitor>>,
    /// Serializes binding and execution, since bindings live in the
    /// engine's global scope.
    execution: Mutex<()>,
}

impl ScriptService {
    /// Start the subsystem with the process-wide engines.
    pub fn start(config: &Config) -> Result<Self> {
        let engines = EngineRegistry::install_global(EngineRegistry::new(
            config.scripts.directory_path(),
            config.lua.clone(),
        ));
        let commands = Arc::new(InMemoryCommandRegistry::new(
            config.scripts.case_sensitive_commands,
        ));
        Self::start_with(&config.scripts, engines, commands)
    }

    /// Start the subsystem with explicit engines and command registry.
    ///
    /// The initial directory scan has completed when this returns.
    pub fn start_with(
        config: &ScriptsConfig,
        engines: Arc<EngineRegistry>,
        commands: Arc<dyn CommandRegistry>,
    ) -> Result<Self> {
        let loader = ScriptLoader::new(
            config.directory_path(),
            config.recursive,
            Arc::clone(&commands),
        );
        let monitor = ScriptDirectoryMonitor::start(loader, config)?;
        info!(
            "Script service started with {} commands",
            commands.names().len()
        );

        Ok(Self {
            engines,
            commands,
            monitor: Mutex::new(Some(monitor)),
            execution: Mutex::new(()),
        })
    }

    pub fn engines(&self) -> &Arc<EngineRegistry> {
        &self.engines
    }

    pub fn command_registry(&self) -> &Arc<dyn CommandRegistry> {
        &self.commands
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<String> {
        self.commands.names()
    }

    pub fn lookup(&self, name: &str) -> Option<ScriptCommand> {
        self.commands.lookup(name)
    }

    /// Run the script registered under `name` on behalf of `sender`.
    pub fn dispatch(
        &self,
        name: &str,
        sender: &CommandSender,
        args: &[String],
        world: &dyn WorldView,
    ) -> CommandOutcome {
        let Some(command) = self.commands.lookup(name) else {
            debug!("No script command named {}", name);
            return CommandOutcome::Unknown;
        };

        let context = match ScriptContext::resolve(&command.name, sender, args, world) {
            Ok(context) => context,
            Err(e) => {
                debug!(
                    "Command {} rejected for {}: {}",
                    command.name,
                    sender.name(),
                    e
                );
                return CommandOutcome::Rejected(e.to_string());
            }
        };

        // Initialization failures were logged when the engine was first requested.
        let engine = match self.engines.engine(command.script_type) {
            Ok(engine) => engine,
            Err(e) => return CommandOutcome::Failed(e.to_string()),
        };

        debug!(
            "{} runs {} command {} ({})",
            sender.name(),
            command.script_type,
            command.name,
            command.file.display()
        );
        let result = {
            let _guard = self.execution.lock().unwrap_or_else(PoisonError::into_inner);
            context
                .bind(engine.as_ref())
                .and_then(|()| engine.execute_file(&command.file))
        };

        match result {
            Ok(()) => CommandOutcome::Completed,
            // Already logged by the engine.
            Err(e @ ScriptHostError::Script { .. }) => CommandOutcome::Failed(e.to_string()),
            Err(e @ ScriptHostError::ScriptNotFound(_)) => {
                warn!("Command {} is registered but {}", command.name, e);
                CommandOutcome::Failed(e.to_string())
            }
            Err(e) => {
                error!("Command {} failed: {}", command.name, e);
                CommandOutcome::Failed(e.to_string())
            }
        }
    }

    /// Run a snippet on the engine for `script_type`.
    pub fn execute_inline(&self, script_type: ScriptType, source: &str) -> Result<()> {
        let engine = self.engines.engine(script_type)?;
        let _guard = self.execution.lock().unwrap_or_else(PoisonError::into_inner);
        engine.execute_inline(source)
    }

    /// Bind a value, typically a host function, into one engine's global scope.
    pub fn set_global(&self, script_type: ScriptType, name: &str, value: ScriptValue) -> Result<()> {
        let engine = self.engines.engine(script_type)?;
        let _guard = self.execution.lock().unwrap_or_else(PoisonError::into_inner);
        engine.set_value(name, value)
    }

    pub fn is_watching(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(ScriptDirectoryMonitor::is_watching)
    }

    /// Stop watching the scripts directory.
    ///
    /// Registered commands stay available; engines live for the process.
    pub fn shutdown(&self) {
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut monitor) = monitor {
            monitor.stop();
            info!("Script service stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ServerPos, SessionHandle};
    use crate::config::LuaConfig;
    use crate::script::types::HostFunction;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    struct FixedWorld;

    impl WorldView for FixedWorld {
        fn player_position(&self, _entity_id: i32) -> Option<ServerPos> {
            Some(ServerPos::new(-16, 320, 124))
        }
    }

    fn service(dir: &TempDir) -> ScriptService {
        let config = ScriptsConfig {
            directory: dir.path().display().to_string(),
            watch: false,
            ..ScriptsConfig::default()
        };
        let engines = Arc::new(EngineRegistry::new(dir.path(), LuaConfig::default()));
        ScriptService::start_with(&config, engines, Arc::new(InMemoryCommandRegistry::new(false)))
            .unwrap()
    }

    fn player() -> CommandSender {
        CommandSender::Player {
            name: "alice".to_string(),
            session: Some(SessionHandle {
                entity_id: 7,
                player_name: "alice".to_string(),
                platform_id: "Steam_1".to_string(),
            }),
        }
    }

    #[test]
    fn test_dispatch_unknown_command() {
        let dir = tempdir().unwrap();
        let service = service(&dir);
        assert_eq!(
            service.dispatch("heal", &CommandSender::Console, &[], &FixedWorld),
            CommandOutcome::Unknown
        );
    }

    #[test]
    fn test_dispatch_lua_command() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("heal.lua"),
            "healed = sender .. ':' .. args[1] .. ':' .. tostring(position)",
        )
        .unwrap();
        let service = service(&dir);
        assert_eq!(service.commands(), vec!["heal"]);

        let outcome = service.dispatch("HEAL", &player(), &["5".to_string()], &FixedWorld);
        assert_eq!(outcome, CommandOutcome::Completed);

        let healed: String = service.engines().lua().unwrap().get_global("healed").unwrap();
        assert_eq!(healed, "alice:5:-1, 10, 3");
    }

    #[test]
    fn test_dispatch_rhai_command() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("kick.rhai"),
            "let kicked = args[0]; if sender != \"console\" { throw \"sender\"; }",
        )
        .unwrap();
        let service = service(&dir);

        let outcome = service.dispatch(
            "kick",
            &CommandSender::Console,
            &["bob".to_string()],
            &FixedWorld,
        );
        assert_eq!(outcome, CommandOutcome::Completed);
        assert_eq!(
            service.engines().rhai().unwrap().get_value::<String>("kicked"),
            Some("bob".to_string())
        );
    }

    #[test]
    fn test_dispatch_rhai_script_that_pins_a_context_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("pin.rhai"), "const sender = \"pinned\";").unwrap();
        let service = service(&dir);

        for _ in 0..2 {
            assert_eq!(
                service.dispatch("pin", &CommandSender::Console, &[], &FixedWorld),
                CommandOutcome::Completed
            );
        }
        // the host is still serving Rhai commands afterwards
        service
            .execute_inline(ScriptType::Rhai, "let after = sender;")
            .unwrap();
    }

    #[test]
    fn test_dispatch_rejects_disconnected_player() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("heal.lua"), "").unwrap();
        let service = service(&dir);
        let sender = CommandSender::Player {
            name: "bob".to_string(),
            session: None,
        };

        match service.dispatch("heal", &sender, &[], &FixedWorld) {
            CommandOutcome::Rejected(message) => {
                assert!(message.contains("remote client info"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_failing_script() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.lua"), "this is not lua").unwrap();
        let service = service(&dir);

        match service.dispatch("broken", &CommandSender::Console, &[], &FixedWorld) {
            CommandOutcome::Failed(message) => assert!(message.contains("broken.lua")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // The engine is still usable afterwards.
        service
            .execute_inline(ScriptType::Lua, "assert(1 + 1 == 2)")
            .unwrap();
    }

    #[test]
    fn test_dispatch_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("heal.lua");
        fs::write(&path, "").unwrap();
        let service = service(&dir);
        fs::remove_file(path).unwrap();

        assert!(matches!(
            service.dispatch("heal", &CommandSender::Console, &[], &FixedWorld),
            CommandOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_set_global_host_function() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ping.lua"), "notify('pong')").unwrap();
        let service = service(&dir);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        service
            .set_global(
                ScriptType::Lua,
                "notify",
                ScriptValue::Function(HostFunction::new(move |args| {
                    assert_eq!(args[0].as_str(), Some("pong"));
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(ScriptValue::Nil)
                })),
            )
            .unwrap();

        for _ in 0..2 {
            assert_eq!(
                service.dispatch("ping", &CommandSender::Console, &[], &FixedWorld),
                CommandOutcome::Completed
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_shutdown() {
        let dir = tempdir().unwrap();
        let service = service(&dir);
        assert!(!service.is_watching());
        service.shutdown();
        service.shutdown();
    }
}
