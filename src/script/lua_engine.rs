//! Lua backend built on mlua.

use std::path::{Path, PathBuf};

use mlua::{
    FromLua, IntoLua, Lua, LuaOptions, MetaMethod, StdLib, UserData, UserDataFields,
    UserDataMethods, Value, Variadic,
};
use tracing::info;

use super::engine::{guard_binding, read_script_source, run_guarded, ScriptEngine};
use super::types::{ScriptType, ScriptValue};
use crate::bridge::{BlockPos, SessionHandle};
use crate::config::LuaConfig;
use crate::logging::SCRIPT_TARGET;
use crate::{Result, ScriptHostError};

/// Globals removed when the sandbox is enabled.
const SANDBOXED_GLOBALS: &[&str] = &[
    "os",
    "io",
    "loadfile",
    "dofile",
    "load",
    "require",
    "package",
    "debug",
    "collectgarbage",
];

/// Lua script engine.
pub struct LuaEngine {
    lua: Lua,
    scripts_root: PathBuf,
}

impl LuaEngine {
    /// Create a Lua state with the host `print` installed.
    pub fn new<P: Into<PathBuf>>(scripts_root: P, config: &LuaConfig) -> Result<Self> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())
            .map_err(|e| init_error(format!("failed to create Lua state: {e}")))?;

        if config.sandbox {
            Self::apply_sandbox(&lua)?;
        }
        Self::register_print(&lua)
            .map_err(|e| init_error(format!("failed to register print: {e}")))?;

        Ok(Self {
            lua,
            scripts_root: scripts_root.into(),
        })
    }

    /// Remove filesystem, process and loader access from the global scope.
    fn apply_sandbox(lua: &Lua) -> Result<()> {
        let globals = lua.globals();
        for name in SANDBOXED_GLOBALS {
            globals
                .set(*name, Value::Nil)
                .map_err(|e| init_error(format!("failed to disable {name}: {e}")))?;
        }
        Ok(())
    }

    /// Replace `print` with one that writes to the host log.
    fn register_print(lua: &Lua) -> mlua::Result<()> {
        let print = lua.create_function(|_, values: Variadic<Value>| {
            if values.is_empty() {
                return Ok(());
            }
            let output: String = values.iter().map(display_value).collect();
            info!(target: SCRIPT_TARGET, "{}", output);
            Ok(())
        })?;
        lua.globals().set("print", print)
    }

    fn exec(&self, chunk_name: &str, source: &str) -> std::result::Result<(), String> {
        self.lua
            .load(source)
            .set_name(chunk_name)
            .exec()
            .map_err(|e| e.to_string())
    }

    /// Read a global value from the Lua environment.
    pub fn get_global<V: FromLua>(&self, name: &str) -> Result<V> {
        self.lua
            .globals()
            .get(name)
            .map_err(|e| ScriptHostError::Script {
                name: name.to_string(),
                message: format!("failed to get global: {e}"),
            })
    }

    /// Scripts root that `execute_file` paths are resolved against.
    pub fn scripts_root(&self) -> &Path {
        &self.scripts_root
    }

    /// Get a reference to the underlying Lua instance.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }
}

impl ScriptEngine for LuaEngine {
    fn script_type(&self) -> ScriptType {
        ScriptType::Lua
    }

    fn execute_inline(&self, source: &str) -> Result<()> {
        run_guarded(ScriptType::Lua, "inline", || self.exec("=inline", source))
    }

    fn execute_file(&self, path: &Path) -> Result<()> {
        let source = read_script_source(&self.scripts_root, path)?;
        let name = path.display().to_string();
        run_guarded(ScriptType::Lua, &name, || {
            self.exec(&format!("@{name}"), &source)
        })
    }

    fn set_value(&self, name: &str, value: ScriptValue) -> Result<()> {
        guard_binding(ScriptType::Lua, name, || {
            self.lua
                .globals()
                .set(name, value)
                .map_err(|e| format!("failed to set global: {e}"))
        })
    }
}

fn init_error(message: String) -> ScriptHostError {
    ScriptHostError::EngineInitialization {
        script_type: ScriptType::Lua,
        message,
    }
}

/// Text of a value as `tostring` would produce it, or a fixed fallback
/// when `__tostring` fails.
fn display_value(value: &Value) -> String {
    value.to_string().unwrap_or_else(|_| fallback_string(value))
}

fn fallback_string(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy(),
        Value::Table(_) => "[table]".to_string(),
        Value::Function(_) => "[function]".to_string(),
        Value::Thread(_) => "[thread]".to_string(),
        Value::UserData(_) => "[userdata]".to_string(),
        Value::LightUserData(_) => "[lightuserdata]".to_string(),
        Value::Error(e) => format!("[error: {}]", e),
        _ => "[unknown]".to_string(),
    }
}

impl IntoLua for ScriptValue {
    fn into_lua(self, lua: &Lua) -> mlua::Result<Value> {
        match self {
            ScriptValue::Nil => Ok(Value::Nil),
            ScriptValue::Boolean(b) => Ok(Value::Boolean(b)),
            ScriptValue::Integer(i) => Ok(Value::Integer(i)),
            ScriptValue::Number(n) => Ok(Value::Number(n)),
            ScriptValue::Text(s) => lua.create_string(&s).map(Value::String),
            ScriptValue::List(items) => {
                let table = lua.create_table()?;
                for (i, item) in items.into_iter().enumerate() {
                    table.raw_set(i + 1, item)?;
                }
                Ok(Value::Table(table))
            }
            ScriptValue::Position(pos) => lua.create_userdata(pos).map(Value::UserData),
            ScriptValue::Session(session) => lua.create_userdata(session).map(Value::UserData),
            ScriptValue::Function(func) => {
                let f = lua.create_function(move |_, args: Variadic<Value>| {
                    let args = args.iter().map(from_lua_value).collect();
                    func.call(args).map_err(mlua::Error::RuntimeError)
                })?;
                Ok(Value::Function(f))
            }
        }
    }
}

/// Convert a Lua value handed to a host function back into a [`ScriptValue`].
///
/// Tables cross as their sequence part `t[1]..t[n]`; keyed entries and
/// anything after the first hole are dropped.
fn from_lua_value(value: &Value) -> ScriptValue {
    match value {
        Value::Nil => ScriptValue::Nil,
        Value::Boolean(b) => ScriptValue::Boolean(*b),
        Value::Integer(i) => ScriptValue::Integer(*i),
        Value::Number(n) => ScriptValue::Number(*n),
        Value::String(s) => ScriptValue::Text(s.to_string_lossy()),
        Value::Table(table) => ScriptValue::List(
            table
                .clone()
                .sequence_values::<Value>()
                .filter_map(|v| v.ok())
                .map(|v| from_lua_value(&v))
                .collect(),
        ),
        Value::UserData(ud) => {
            if let Ok(pos) = ud.borrow::<BlockPos>() {
                ScriptValue::Position(*pos)
            } else if let Ok(session) = ud.borrow::<SessionHandle>() {
                ScriptValue::Session(session.clone())
            } else {
                ScriptValue::Text(fallback_string(value))
            }
        }
        other => ScriptValue::Text(display_value(other)),
    }
}

impl UserData for BlockPos {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("x", |_, this| Ok(this.x));
        fields.add_field_method_get("y", |_, this| Ok(this.y));
        fields.add_field_method_get("z", |_, this| Ok(this.z));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.to_string()));
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: mlua::AnyUserData| {
            Ok(other.borrow::<BlockPos>().is_ok_and(|o| *o == *this))
        });
    }
}

impl UserData for SessionHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("entity_id", |_, this| Ok(this.entity_id));
        fields.add_field_method_get("name", |_, this| Ok(this.player_name.clone()));
        fields.add_field_method_get("platform_id", |_, this| Ok(this.platform_id.clone()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("{} ({})", this.player_name, this.entity_id))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::types::HostFunction;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn create_engine(root: &Path) -> LuaEngine {
        LuaEngine::new(root, &LuaConfig::default()).unwrap()
    }

    #[test]
    fn test_basic_execution() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());
        engine.execute_inline("x = 1 + 2").unwrap();

        let result: i32 = engine.get_global("x").unwrap();
        assert_eq!(result, 3);
    }

    #[test]
    fn test_script_type() {
        let dir = tempdir().unwrap();
        assert_eq!(create_engine(dir.path()).script_type(), ScriptType::Lua);
    }

    #[test]
    fn test_globals_persist_between_calls() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());

        engine
            .execute_inline("function greet(n) return 'hi ' .. n end; counter = 1")
            .unwrap();
        engine
            .execute_inline("counter = counter + 1; greeting = greet('bob')")
            .unwrap();

        assert_eq!(engine.get_global::<i64>("counter").unwrap(), 2);
        assert_eq!(engine.get_global::<String>("greeting").unwrap(), "hi bob");
    }

    #[test]
    fn test_sandbox_removes_os_and_io() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());
        assert!(engine.execute_inline("os.execute('ls')").is_err());
        assert!(engine.execute_inline("io.open('/etc/passwd', 'r')").is_err());
        assert!(engine.execute_inline("require('os')").is_err());
        assert!(engine.execute_inline("dofile('x.lua')").is_err());
    }

    #[test]
    fn test_sandbox_disabled() {
        let dir = tempdir().unwrap();
        let engine = LuaEngine::new(dir.path(), &LuaConfig { sandbox: false }).unwrap();
        engine.execute_inline("has_os = os ~= nil").unwrap();
        assert!(engine.get_global::<bool>("has_os").unwrap());
    }

    #[test]
    fn test_syntax_error() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());
        let result = engine.execute_inline("this is not valid lua");
        assert!(matches!(result, Err(ScriptHostError::Script { .. })));
    }

    #[test]
    fn test_runtime_error() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());
        let err = engine.execute_inline("error('test error')").unwrap_err();
        assert!(err.to_string().contains("test error"));
    }

    #[test]
    fn test_engine_usable_after_error() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());
        assert!(engine.execute_inline("x = nil; y = x.field").is_err());
        engine.execute_inline("z = 5").unwrap();
        assert_eq!(engine.get_global::<i32>("z").unwrap(), 5);
    }

    #[test]
    fn test_print_forwards_to_log() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());
        assert!(engine.execute_inline(r#"print("Hello", 1, nil, true)"#).is_ok());
        assert!(engine.execute_inline("print()").is_ok());
    }

    #[test]
    fn test_print_survives_failing_tostring() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());
        let result = engine.execute_inline(
            r#"
            local t = setmetatable({}, { __tostring = function() error("nope") end })
            print("value: ", t)
            "#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_display_value_fallback() {
        assert_eq!(fallback_string(&Value::Nil), "nil");
        assert_eq!(fallback_string(&Value::Integer(7)), "7");
        assert_eq!(fallback_string(&Value::Boolean(false)), "false");
    }

    #[test]
    fn test_execute_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("heal.lua"), "healed = 100").unwrap();

        let engine = create_engine(dir.path());
        engine.execute_file(Path::new("heal.lua")).unwrap();
        assert_eq!(engine.get_global::<i32>("healed").unwrap(), 100);
    }

    #[test]
    fn test_execute_file_in_subdirectory() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("admin")).unwrap();
        fs::write(dir.path().join("admin").join("kick.lua"), "kicked = true").unwrap();

        let engine = create_engine(dir.path());
        engine.execute_file(Path::new("admin/kick.lua")).unwrap();
        assert!(engine.get_global::<bool>("kicked").unwrap());
    }

    #[test]
    fn test_execute_file_with_utf8_bom() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bom.lua"), b"\xEF\xBB\xBFvalue = 42").unwrap();

        let engine = create_engine(dir.path());
        engine.execute_file(Path::new("bom.lua")).unwrap();
        assert_eq!(engine.get_global::<i32>("value").unwrap(), 42);
    }

    #[test]
    fn test_execute_file_missing() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());
        let result = engine.execute_file(Path::new("missing.lua"));
        assert!(matches!(result, Err(ScriptHostError::ScriptNotFound(_))));
    }

    #[test]
    fn test_execute_file_rejects_parent_path() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());
        let result = engine.execute_file(Path::new("../outside.lua"));
        assert!(matches!(result, Err(ScriptHostError::InvalidPath(_))));
    }

    #[test]
    fn test_execute_file_error_names_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.lua"), "if then end").unwrap();

        let engine = create_engine(dir.path());
        match engine.execute_file(Path::new("broken.lua")) {
            Err(ScriptHostError::Script { name, message }) => {
                assert_eq!(name, "broken.lua");
                assert!(message.contains("broken.lua"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_set_value_primitives() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());

        engine.set_value("n", ScriptValue::Integer(42)).unwrap();
        engine.set_value("s", "hello".into()).unwrap();
        engine.set_value("f", ScriptValue::Number(1.5)).unwrap();
        engine
            .execute_inline("result = s .. ':' .. tostring(n + 1) .. ':' .. tostring(f * 2)")
            .unwrap();

        assert_eq!(engine.get_global::<String>("result").unwrap(), "hello:43:3.0");
    }

    #[test]
    fn test_set_value_overwrites() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());

        engine.set_value("target", "first".into()).unwrap();
        engine.set_value("target", ScriptValue::Integer(2)).unwrap();
        assert_eq!(engine.get_global::<i64>("target").unwrap(), 2);

        engine.set_value("target", ScriptValue::Nil).unwrap();
        engine.execute_inline("is_nil = target == nil").unwrap();
        assert!(engine.get_global::<bool>("is_nil").unwrap());
    }

    #[test]
    fn test_set_value_list() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());

        engine.set_value("args", vec!["a", "b", "c"].into()).unwrap();
        engine.execute_inline("count = #args; second = args[2]").unwrap();

        assert_eq!(engine.get_global::<i32>("count").unwrap(), 3);
        assert_eq!(engine.get_global::<String>("second").unwrap(), "b");
    }

    #[test]
    fn test_set_value_position() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());

        engine
            .set_value("position", BlockPos::new(-1, 10, 3).into())
            .unwrap();
        engine
            .execute_inline("px = position.x; py = position.y; label = tostring(position)")
            .unwrap();

        assert_eq!(engine.get_global::<i32>("px").unwrap(), -1);
        assert_eq!(engine.get_global::<i32>("py").unwrap(), 10);
        assert_eq!(engine.get_global::<String>("label").unwrap(), "-1, 10, 3");
    }

    #[test]
    fn test_set_value_session() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());

        let session = SessionHandle {
            entity_id: 171,
            player_name: "alice".to_string(),
            platform_id: "Steam_1".to_string(),
        };
        engine.set_value("session", session.into()).unwrap();
        engine
            .execute_inline("who = session.name; id = session.entity_id")
            .unwrap();

        assert_eq!(engine.get_global::<String>("who").unwrap(), "alice");
        assert_eq!(engine.get_global::<i32>("id").unwrap(), 171);
    }

    #[test]
    fn test_set_value_function() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());

        let add = HostFunction::new(|args| match (args.first(), args.get(1)) {
            (Some(ScriptValue::Integer(a)), Some(ScriptValue::Integer(b))) => {
                Ok(ScriptValue::Integer(a + b))
            }
            _ => Err("add expects two integers".to_string()),
        });
        engine.set_value("add", add.into()).unwrap();
        engine.execute_inline("result = add(3, 4)").unwrap();
        assert_eq!(engine.get_global::<i32>("result").unwrap(), 7);

        let err = engine.execute_inline("add('x')").unwrap_err();
        assert!(err.to_string().contains("add expects two integers"));
    }

    #[test]
    fn test_host_function_receives_handles() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let record = HostFunction::new(move |args| {
            sink.lock().unwrap().extend(args);
            Ok(ScriptValue::Nil)
        });

        engine.set_value("record", record.into()).unwrap();
        engine
            .set_value("position", BlockPos::new(4, 5, 6).into())
            .unwrap();
        engine.execute_inline("record(position, {1, 2}, 'x')").unwrap();

        let seen = seen.lock().unwrap();
        assert!(matches!(seen[0], ScriptValue::Position(p) if p == BlockPos::new(4, 5, 6)));
        assert!(matches!(&seen[1], ScriptValue::List(items) if items.len() == 2));
        assert_eq!(seen[2].as_str(), Some("x"));
    }

    #[test]
    fn test_host_function_receives_table_sequence_only() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let record = HostFunction::new(move |args| {
            sink.lock().unwrap().extend(args);
            Ok(ScriptValue::Nil)
        });
        engine.set_value("record", record.into()).unwrap();
        engine
            .execute_inline("record({'a', 'b', key = 'dropped'}, {name = 'only'})")
            .unwrap();

        let seen = seen.lock().unwrap();
        match &seen[0] {
            ScriptValue::List(items) => {
                let texts: Vec<_> = items.iter().filter_map(ScriptValue::as_str).collect();
                assert_eq!(texts, vec!["a", "b"]);
            }
            other => panic!("unexpected value: {other:?}"),
        }
        assert!(matches!(&seen[1], ScriptValue::List(items) if items.is_empty()));
    }

    #[test]
    fn test_set_value_nested_function_stays_callable() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());

        let nested = ScriptValue::List(vec![
            HostFunction::new(|_| Ok(ScriptValue::Integer(9))).into(),
        ]);
        engine.set_value("handlers", nested).unwrap();
        engine.execute_inline("result = handlers[1]()").unwrap();
        assert_eq!(engine.get_global::<i32>("result").unwrap(), 9);
    }

    #[test]
    fn test_panicking_host_function_is_contained() {
        let dir = tempdir().unwrap();
        let engine = create_engine(dir.path());

        let explode = HostFunction::new(|_| panic!("host function exploded"));
        engine.set_value("explode", explode.into()).unwrap();

        let result = engine.execute_inline("explode()");
        assert!(matches!(result, Err(ScriptHostError::Script { .. })));
    }
}
