//! Rhai backend.
//!
//! Rhai has no mutable global table, so persistence is rebuilt from two
//! pieces: a long-lived [`Scope`] that keeps top-level `let` variables, and
//! an AST holding every function defined so far, merged into each new run.
//! The scope is compacted after every run so a name that is re-declared on
//! each dispatch keeps a single slot.
//!
//! Host functions are registered once per name as dispatchers over a shared
//! table. Rebinding the name to a plain value removes the table entry, after
//! which calling it raises a script error.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};

use rhai::{Dynamic, Engine, EvalAltResult, Scope, AST, INT};
use tracing::{debug, info};

use super::engine::{guard_binding, read_script_source, run_guarded, ScriptEngine};
use super::types::{HostFunction, ScriptType, ScriptValue};
use crate::bridge::{BlockPos, SessionHandle};
use crate::logging::SCRIPT_TARGET;
use crate::Result;

type HostTable = Arc<RwLock<HashMap<String, HostFunction>>>;

struct RhaiState {
    engine: Engine,
    scope: Scope<'static>,
    functions: AST,
    host_functions: HostTable,
    registered: HashSet<String>,
}

/// Rhai script engine.
pub struct RhaiEngine {
    state: Mutex<RhaiState>,
    scripts_root: PathBuf,
}

impl RhaiEngine {
    /// Create an engine with `print`/`debug` routed to the host log.
    pub fn new<P: Into<PathBuf>>(scripts_root: P) -> Result<Self> {
        let mut engine = Engine::new();

        engine.on_print(|text| info!(target: SCRIPT_TARGET, "{}", text));
        engine.on_debug(|text, source, pos| {
            debug!(target: SCRIPT_TARGET, "{} @ {:?}: {}", source.unwrap_or("inline"), pos, text)
        });

        engine
            .register_type_with_name::<BlockPos>("Position")
            .register_get("x", |p: &mut BlockPos| p.x as INT)
            .register_get("y", |p: &mut BlockPos| p.y as INT)
            .register_get("z", |p: &mut BlockPos| p.z as INT)
            .register_fn("to_string", |p: &mut BlockPos| p.to_string());

        engine
            .register_type_with_name::<SessionHandle>("Session")
            .register_get("entity_id", |s: &mut SessionHandle| s.entity_id as INT)
            .register_get("name", |s: &mut SessionHandle| s.player_name.clone())
            .register_get("platform_id", |s: &mut SessionHandle| s.platform_id.clone())
            .register_fn("to_string", |s: &mut SessionHandle| {
                format!("{} ({})", s.player_name, s.entity_id)
            });

        Ok(Self {
            state: Mutex::new(RhaiState {
                engine,
                scope: Scope::new(),
                functions: AST::empty(),
                host_functions: HostTable::default(),
                registered: HashSet::new(),
            }),
            scripts_root: scripts_root.into(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RhaiState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, name: &str, source: &str) -> Result<()> {
        run_guarded(ScriptType::Rhai, name, || {
            let mut guard = self.lock();
            let state = &mut *guard;

            let mut ast = state.engine.compile(source).map_err(|e| e.to_string())?;
            ast.set_source(name);
            let merged = state.functions.merge(&ast);

            let outcome = state
                .engine
                .run_ast_with_scope(&mut state.scope, &merged)
                .map_err(|e| e.to_string());
            compact_scope(&mut state.scope, None);
            outcome?;
            state.functions = merged.clone_functions_only();
            Ok(())
        })
    }

    /// Read a top-level variable left in scope by earlier scripts.
    pub fn get_value<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Option<T> {
        self.lock().scope.get_value(name)
    }

    #[cfg(test)]
    fn scope_len(&self) -> usize {
        self.lock().scope.len()
    }

    /// Scripts root that `execute_file` paths are resolved against.
    pub fn scripts_root(&self) -> &Path {
        &self.scripts_root
    }
}

impl ScriptEngine for RhaiEngine {
    fn script_type(&self) -> ScriptType {
        ScriptType::Rhai
    }

    fn execute_inline(&self, source: &str) -> Result<()> {
        self.run("inline", source)
    }

    fn execute_file(&self, path: &Path) -> Result<()> {
        let source = read_script_source(&self.scripts_root, path)?;
        self.run(&path.display().to_string(), &source)
    }

    fn set_value(&self, name: &str, value: ScriptValue) -> Result<()> {
        guard_binding(ScriptType::Rhai, name, || {
            if let ScriptValue::List(items) = &value {
                if items.iter().any(contains_function) {
                    return Err(format!("{name}: functions cannot be bound inside a list"));
                }
            }

            let mut guard = self.lock();
            let state = &mut *guard;

            // a stale entry may be a script `const`, which the scope
            // refuses to overwrite in place
            compact_scope(&mut state.scope, Some(name));

            match value {
                ScriptValue::Function(func) => {
                    host_table_write(&state.host_functions).insert(name.to_string(), func);
                    if state.registered.insert(name.to_string()) {
                        register_host_function(&mut state.engine, name, &state.host_functions);
                    }
                }
                other => {
                    host_table_write(&state.host_functions).remove(name);
                    state.scope.push_dynamic(name.to_string(), to_dynamic(other));
                }
            }
            Ok(())
        })
    }
}

/// Keep only the newest entry for every name, dropping `remove` entirely.
///
/// Constness of the surviving entries is preserved.
fn compact_scope(scope: &mut Scope<'static>, remove: Option<&str>) {
    let entries: Vec<(String, bool, Dynamic)> = scope
        .iter_raw()
        .map(|(name, constant, value)| (name.to_string(), constant, value.clone()))
        .collect();

    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(entries.len());
    for (name, constant, value) in entries.into_iter().rev() {
        if remove == Some(name.as_str()) || !seen.insert(name.clone()) {
            continue;
        }
        kept.push((name, constant, value));
    }

    let mut compacted = Scope::new();
    for (name, constant, value) in kept.into_iter().rev() {
        if constant {
            compacted.push_constant_dynamic(name, value);
        } else {
            compacted.push_dynamic(name, value);
        }
    }
    *scope = compacted;
}

fn host_table_write(table: &HostTable) -> RwLockWriteGuard<'_, HashMap<String, HostFunction>> {
    table.write().unwrap_or_else(PoisonError::into_inner)
}

/// Register dispatchers under `name` for zero to three arguments.
///
/// Each call looks the current binding up in `table`, so rebinding the name
/// never needs the engine to unregister anything.
fn register_host_function(engine: &mut Engine, name: &str, table: &HostTable) {
    let (t, n) = (Arc::clone(table), name.to_string());
    engine.register_fn(name, move || call_host(&t, &n, Vec::new()));
    let (t, n) = (Arc::clone(table), name.to_string());
    engine.register_fn(name, move |a: Dynamic| call_host(&t, &n, vec![a]));
    let (t, n) = (Arc::clone(table), name.to_string());
    engine.register_fn(name, move |a: Dynamic, b: Dynamic| call_host(&t, &n, vec![a, b]));
    let (t, n) = (Arc::clone(table), name.to_string());
    engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic| {
        call_host(&t, &n, vec![a, b, c])
    });
}

fn call_host(
    table: &HostTable,
    name: &str,
    args: Vec<Dynamic>,
) -> std::result::Result<Dynamic, Box<EvalAltResult>> {
    let func = table
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned();
    let Some(func) = func else {
        return Err(format!("{name} is no longer bound to a function").into());
    };

    let args = args.iter().map(from_dynamic).collect();
    let result = func.call(args)?;
    if contains_function(&result) {
        return Err(format!("{name} returned a function, which Rhai cannot hold").into());
    }
    Ok(to_dynamic(result))
}

fn contains_function(value: &ScriptValue) -> bool {
    match value {
        ScriptValue::Function(_) => true,
        ScriptValue::List(items) => items.iter().any(contains_function),
        _ => false,
    }
}

/// Functions have no Rhai value form; callers reject them before converting.
fn to_dynamic(value: ScriptValue) -> Dynamic {
    match value {
        ScriptValue::Nil | ScriptValue::Function(_) => Dynamic::UNIT,
        ScriptValue::Boolean(b) => Dynamic::from(b),
        ScriptValue::Integer(i) => Dynamic::from(i),
        ScriptValue::Number(n) => Dynamic::from(n),
        ScriptValue::Text(s) => Dynamic::from(s),
        ScriptValue::List(items) => {
            Dynamic::from_array(items.into_iter().map(to_dynamic).collect())
        }
        ScriptValue::Position(pos) => Dynamic::from(pos),
        ScriptValue::Session(session) => Dynamic::from(session),
    }
}

fn from_dynamic(value: &Dynamic) -> ScriptValue {
    if value.is_unit() {
        return ScriptValue::Nil;
    }
    if let Ok(b) = value.as_bool() {
        return ScriptValue::Boolean(b);
    }
    if let Ok(i) = value.as_int() {
        return ScriptValue::Integer(i);
    }
    if let Ok(n) = value.as_float() {
        return ScriptValue::Number(n);
    }
    if value.is_string() {
        return ScriptValue::Text(value.to_string());
    }
    if value.is_array() {
        let items = value.clone().into_array().unwrap_or_default();
        return ScriptValue::List(items.iter().map(from_dynamic).collect());
    }
    if let Some(pos) = value.clone().try_cast::<BlockPos>() {
        return ScriptValue::Position(pos);
    }
    if let Some(session) = value.clone().try_cast::<SessionHandle>() {
        return ScriptValue::Session(session);
    }
    ScriptValue::Text(value.to_string())
}
