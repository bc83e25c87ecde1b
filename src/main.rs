use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use scripthost::{
    CommandOutcome, CommandSender, Config, ScriptService, ScriptType, ServerPos, WorldView,
};

/// The console host has no world; player positions are never available.
struct ConsoleWorld;

impl WorldView for ConsoleWorld {
    fn player_position(&self, _entity_id: i32) -> Option<ServerPos> {
        None
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    // Load configuration
    let config = match Config::load_with_env(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {config_path}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    // Initialize logging
    if let Err(e) = scripthost::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        scripthost::logging::init_console_only(&config.logging.level);
    }

    info!("scripthost starting");
    let service = match ScriptService::start(&config) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to start script service: {}", e);
            std::process::exit(1);
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&service, &line),
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read console input: {}", e);
                    break;
                }
            }
        }
    }

    service.shutdown();
}

fn handle_line(service: &ScriptService, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    if let Some(code) = line.strip_prefix("!lua ") {
        run_inline(service, ScriptType::Lua, code);
        return;
    }
    if let Some(code) = line.strip_prefix("!rhai ") {
        run_inline(service, ScriptType::Rhai, code);
        return;
    }
    if line == "!commands" {
        println!("{}", service.commands().join(", "));
        return;
    }

    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        return;
    };
    let args: Vec<String> = parts.map(str::to_string).collect();

    match service.dispatch(name, &CommandSender::Console, &args, &ConsoleWorld) {
        CommandOutcome::Completed => {}
        CommandOutcome::Rejected(message) => println!("{message}"),
        CommandOutcome::Failed(message) => println!("Command {name} failed: {message}"),
        CommandOutcome::Unknown => println!("Unknown command: {name}"),
    }
}

fn run_inline(service: &ScriptService, script_type: ScriptType, code: &str) {
    if let Err(e) = service.execute_inline(script_type, code) {
        println!("{e}");
    }
}
