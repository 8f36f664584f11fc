// One Lua interpreter plus the bundled module loader.
//
// Every runtime owns its own `mlua::Lua`; nothing here is shared between
// threads. Function values cannot move between interpreters, so response
// handlers leave a runtime as bytecode (`PortableHandler`) and are loaded
// again by whichever runtime calls them.

use crate::error::{GsharerError, Result};
use crate::scripts::{module_candidates, EmbeddedScripts, BOOTSTRAP_SCRIPT, GLOBALS_SCRIPT};
use mlua::{ChunkMode, Function, Lua, LuaOptions, LuaSerdeExt, StdLib, Table, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Global table created by the bootstrap script.
pub const NAMESPACE: &str = "gsharer";

pub struct ScriptRuntime {
    lua: Lua,
    scripts: Arc<EmbeddedScripts>,
}

impl ScriptRuntime {
    /// Runtime backed by the scripts compiled into the binary.
    pub fn new() -> Result<Self> {
        Self::with_scripts(Arc::new(EmbeddedScripts::bundled()))
    }

    pub fn with_scripts(scripts: Arc<EmbeddedScripts>) -> Result<Self> {
        // SAFETY: only the safe standard libraries are opened. The state is
        // left unmarked so precompiled response handlers can be loaded.
        let lua = unsafe { Lua::unsafe_new_with(StdLib::ALL_SAFE, LuaOptions::new()) };
        let runtime = Self { lua, scripts };
        runtime.bootstrap().map_err(|err| match err {
            GsharerError::Init(_) => err,
            other => GsharerError::Init(other.to_string()),
        })?;
        Ok(runtime)
    }

    fn bootstrap(&self) -> Result<()> {
        self.exec_resource(BOOTSTRAP_SCRIPT)?;

        let namespace: Table = self.lua.globals().get(NAMESPACE).map_err(|err| {
            GsharerError::Init(format!(
                "{BOOTSTRAP_SCRIPT} did not create the `{NAMESPACE}` table: {err}"
            ))
        })?;
        let install = |name: &str, function: mlua::Result<Function>| {
            function
                .and_then(|f| namespace.set(name, f))
                .map_err(|err| GsharerError::Init(format!("could not install {name}: {err}")))
        };
        install("_embedded_loader", self.embedded_searcher())?;
        install("_json_decode", json_decode(&self.lua))?;

        self.exec_resource(GLOBALS_SCRIPT)
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Find and compile the resource backing a dotted module name.
    ///
    /// Returns the compiled chunk and the resource path it came from. When no
    /// candidate exists the error is always [`GsharerError::ModuleNotFound`],
    /// so other loaders can be tried; a candidate that exists but fails to
    /// compile reports [`GsharerError::Syntax`] or [`GsharerError::Memory`].
    pub fn resolve_module(&self, module: &str) -> Result<(Function, String)> {
        load_module(&self.lua, &self.scripts, module)
    }

    /// Compile a bundled resource by exact path.
    pub fn load_resource(&self, path: &str) -> Result<Function> {
        let source = self
            .scripts
            .get(path)
            .ok_or_else(|| GsharerError::ModuleNotFound {
                module: path.to_string(),
                searched: vec![path.to_string()],
            })?;
        compile(&self.lua, path, source)
    }

    /// Compile and run a bundled resource, discarding its results.
    pub fn exec_resource(&self, path: &str) -> Result<()> {
        self.load_resource(path)?
            .call::<()>(())
            .map_err(|err| GsharerError::config_load(format!("{path}: {err}")))
    }

    /// Compile source that did not come from the bundled set.
    pub fn load_source(&self, chunk: &str, source: &str) -> Result<Function> {
        compile(&self.lua, chunk, source)
    }

    /// Lua searcher: `(module) -> loader, path` or a not-found message.
    fn embedded_searcher(&self) -> mlua::Result<Function> {
        let scripts = Arc::clone(&self.scripts);
        self.lua.create_function(move |lua, module: String| {
            match load_module(lua, &scripts, &module) {
                Ok((loader, path)) => Ok((Value::Function(loader), Some(path))),
                Err(GsharerError::ModuleNotFound { searched, .. }) => {
                    let message = format!("no embedded resource '{}'", searched.join("' or '"));
                    Ok((Value::String(lua.create_string(&message)?), None))
                }
                Err(err) => Err(mlua::Error::RuntimeError(err.to_string())),
            }
        })
    }
}

impl fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("scripts", &self.scripts.paths().count())
            .finish_non_exhaustive()
    }
}

fn load_module(lua: &Lua, scripts: &EmbeddedScripts, module: &str) -> Result<(Function, String)> {
    let candidates = module_candidates(module);
    for path in &candidates {
        if let Some(source) = scripts.get(path) {
            debug!(module, path = %path, "resolved embedded module");
            let loader = compile(lua, path, source)?;
            return Ok((loader, path.clone()));
        }
    }
    Err(GsharerError::ModuleNotFound {
        module: module.to_string(),
        searched: candidates.to_vec(),
    })
}

fn compile(lua: &Lua, chunk: &str, source: &str) -> Result<Function> {
    lua.load(source)
        .set_name(chunk)
        .set_mode(ChunkMode::Text)
        .into_function()
        .map_err(|err| load_error(chunk, err))
}

fn load_error(chunk: &str, err: mlua::Error) -> GsharerError {
    match err {
        mlua::Error::SyntaxError { message, .. } => GsharerError::Syntax {
            chunk: chunk.to_string(),
            message,
        },
        mlua::Error::MemoryError(message) => GsharerError::Memory {
            chunk: chunk.to_string(),
            message,
        },
        other => GsharerError::config_load(format!("{chunk}: {other}")),
    }
}

fn json_decode(lua: &Lua) -> mlua::Result<Function> {
    lua.create_function(|lua, text: String| {
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(mlua::Error::external)?;
        lua.to_value(&value)
    })
}

/// A Lua function carried as bytecode so it can be called from another runtime.
///
/// Upvalues are not preserved. Lua binds the first upvalue of a loaded chunk
/// to the globals table, which covers handlers that only touch globals.
#[derive(Clone, PartialEq, Eq)]
pub struct PortableHandler {
    bytecode: Vec<u8>,
    origin: String,
}

impl PortableHandler {
    /// Dump `function` while its producing runtime is still alive.
    pub fn capture(function: &Function, origin: impl Into<String>) -> Result<Self> {
        let origin = origin.into();
        let bytecode = function.dump(false);
        if bytecode.is_empty() {
            return Err(GsharerError::type_mismatch(
                origin,
                "a Lua function",
                "a host function",
            ));
        }
        Ok(Self { bytecode, origin })
    }

    pub fn from_bytecode(bytecode: Vec<u8>, origin: impl Into<String>) -> Self {
        Self {
            bytecode,
            origin: origin.into(),
        }
    }

    /// Where the handler was captured from, e.g. `response`.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Load the bytecode as a fresh function in `runtime`.
    pub fn rehydrate(&self, runtime: &ScriptRuntime) -> Result<Function> {
        runtime
            .lua()
            .load(self.bytecode.as_slice())
            .set_name(&self.origin)
            .set_mode(ChunkMode::Binary)
            .into_function()
            .map_err(|err| GsharerError::HandlerLoad(format!("{}: {err}", self.origin)))
    }
}

impl fmt::Debug for PortableHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortableHandler")
            .field("origin", &self.origin)
            .field("bytes", &self.bytecode.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime_with(extra: &[(&str, &str)]) -> ScriptRuntime {
        let scripts = extra
            .iter()
            .fold(EmbeddedScripts::bundled(), |scripts, (path, source)| {
                scripts.with_file(*path, *source)
            });
        ScriptRuntime::with_scripts(Arc::new(scripts)).expect("runtime should initialize")
    }

    #[test]
    fn initializes_and_evaluates() {
        let runtime = ScriptRuntime::new().expect("runtime should initialize");
        let sum: i64 = runtime.lua().load("return 1 + 1").eval().unwrap();
        assert_eq!(sum, 2);
        let kind: String = runtime.lua().load("return type(gsharer.util.trim)").eval().unwrap();
        assert_eq!(kind, "function");
    }

    #[test]
    fn broken_bootstrap_is_an_init_error() {
        let scripts = EmbeddedScripts::bundled().with_file(BOOTSTRAP_SCRIPT, "gsharer = {");
        let err = ScriptRuntime::with_scripts(Arc::new(scripts)).unwrap_err();
        assert!(matches!(err, GsharerError::Init(_)), "got {err:?}");
    }

    #[test]
    fn flat_file_wins_over_init() {
        let runtime = runtime_with(&[
            ("lua/a/b.lua", "return 'flat'"),
            ("lua/a/b/init.lua", "return 'init'"),
        ]);
        let (loader, path) = runtime.resolve_module("a.b").unwrap();
        assert_eq!(path, "lua/a/b.lua");
        assert_eq!(loader.call::<String>(()).unwrap(), "flat");
    }

    #[test]
    fn falls_back_to_init_file() {
        let runtime = runtime_with(&[("lua/a/b/init.lua", "return 'init'")]);
        let (loader, path) = runtime.resolve_module("a.b").unwrap();
        assert_eq!(path, "lua/a/b/init.lua");
        assert_eq!(loader.call::<String>(()).unwrap(), "init");
    }

    #[test]
    fn missing_module_is_not_found_even_next_to_broken_files() {
        let runtime = runtime_with(&[("lua/a/c.lua", "return {")]);
        let err = runtime.resolve_module("a.b").unwrap_err();
        match err {
            GsharerError::ModuleNotFound { module, searched } => {
                assert_eq!(module, "a.b");
                assert_eq!(searched, vec!["lua/a/b.lua", "lua/a/b/init.lua"]);
            }
            other => panic!("expected ModuleNotFound, got {other:?}"),
        }
    }

    #[test]
    fn broken_module_reports_syntax_error() {
        let runtime = runtime_with(&[("lua/a/b.lua", "return {")]);
        let err = runtime.resolve_module("a.b").unwrap_err();
        assert!(matches!(err, GsharerError::Syntax { .. }), "got {err:?}");
    }

    #[test]
    fn require_uses_embedded_modules() {
        let runtime = runtime_with(&[("lua/demo/init.lua", "return { answer = 42 }")]);
        let answer: i64 = runtime
            .lua()
            .load("return require('demo').answer")
            .eval()
            .unwrap();
        assert_eq!(answer, 42);

        let err = runtime
            .lua()
            .load("return require('nope.nothing')")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("no embedded resource 'lua/nope/nothing.lua'"));
    }

    #[test]
    fn json_helper_decodes_objects() {
        let runtime = ScriptRuntime::new().unwrap();
        let url: String = runtime
            .lua()
            .load(r#"return gsharer.util.json_decode('{"url":"https://x.test/a"}').url"#)
            .eval()
            .unwrap();
        assert_eq!(url, "https://x.test/a");
    }

    #[test]
    fn handler_moves_between_runtimes() {
        let producer = ScriptRuntime::new().unwrap();
        let function: Function = producer
            .lua()
            .load("return function(body) return gsharer.util.trim(body) .. '!' end")
            .eval()
            .unwrap();
        let handler = PortableHandler::capture(&function, "response").unwrap();
        drop(function);
        drop(producer);

        let consumer = ScriptRuntime::new().unwrap();
        let rehydrated = handler.rehydrate(&consumer).unwrap();
        let out: String = rehydrated.call("  done \n").unwrap();
        assert_eq!(out, "done!");
    }

    #[test]
    fn host_functions_cannot_be_captured() {
        let runtime = ScriptRuntime::new().unwrap();
        let host: Function = runtime.lua().load("return print").eval().unwrap();
        let err = PortableHandler::capture(&host, "response").unwrap_err();
        assert!(matches!(err, GsharerError::TypeMismatch { .. }));
    }

    #[test]
    fn invalid_bytecode_fails_to_load() {
        let runtime = ScriptRuntime::new().unwrap();
        let handler = PortableHandler::from_bytecode(b"not bytecode".to_vec(), "response");
        let err = handler.rehydrate(&runtime).unwrap_err();
        assert!(matches!(err, GsharerError::HandlerLoad(_)), "got {err:?}");
    }
}
