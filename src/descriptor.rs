// Destination descriptors and the resolver that asks a script for them.
//
// The table a destination script returns is copied once into a
// `ScriptTable` (strings, booleans, nested tables and captured functions)
// and then validated into a `Descriptor`. Nothing past that point looks at
// untyped script values.

use crate::config::{ResolverConfig, ScriptSource};
use crate::error::{GsharerError, Result};
use crate::interpret::ResponseHandler;
use crate::runtime::{PortableHandler, ScriptRuntime};
use crate::scripts::DEFAULT_CONFIG_SCRIPT;
use mlua::{Function, Table, Value, Variadic};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use tracing::debug;

pub const DEFAULT_METHOD: &str = "POST";

/// Nested tables deeper than this are rejected rather than walked.
const MAX_TABLE_DEPTH: usize = 16;

/// A value copied out of a script table.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// Strings, and numbers converted to their decimal text.
    Text(String),
    Bool(bool),
    Table(ScriptTable),
    Function(PortableHandler),
}

impl ScriptValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptValue::Text(_) => "string",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Table(_) => "table",
            ScriptValue::Function(_) => "function",
        }
    }
}

/// String-keyed snapshot of a script table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptTable(BTreeMap<String, ScriptValue>);

impl ScriptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `table` out of the runtime, dumping any functions to bytecode.
    pub fn from_lua(table: &Table) -> Result<Self> {
        Self::convert(table, "", 0)
    }

    fn convert(table: &Table, prefix: &str, depth: usize) -> Result<Self> {
        if depth > MAX_TABLE_DEPTH {
            return Err(GsharerError::type_mismatch(
                prefix,
                "a table nested at most 16 levels deep",
                "a deeper (or cyclic) table",
            ));
        }

        let mut entries = BTreeMap::new();
        for pair in table.pairs::<Value, Value>() {
            let (key, value) = pair.map_err(|err| GsharerError::config_load(err.to_string()))?;
            let key = match key {
                Value::String(s) => String::from_utf8_lossy(&s.as_bytes()).into_owned(),
                Value::Integer(n) => n.to_string(),
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(GsharerError::type_mismatch(
                        join_path(prefix, "<key>"),
                        "a string or number key",
                        other.type_name(),
                    ))
                }
            };
            let path = join_path(prefix, &key);

            let converted = match value {
                Value::String(s) => {
                    ScriptValue::Text(String::from_utf8_lossy(&s.as_bytes()).into_owned())
                }
                Value::Integer(n) => ScriptValue::Text(n.to_string()),
                Value::Number(n) => ScriptValue::Text(n.to_string()),
                Value::Boolean(b) => ScriptValue::Bool(b),
                Value::Table(inner) => ScriptValue::Table(Self::convert(&inner, &path, depth + 1)?),
                Value::Function(function) => {
                    ScriptValue::Function(PortableHandler::capture(&function, path.clone())?)
                }
                other => {
                    return Err(GsharerError::type_mismatch(
                        path,
                        "a string, number, boolean, table or function",
                        other.type_name(),
                    ))
                }
            };
            entries.insert(key, converted);
        }
        Ok(Self(entries))
    }

    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ScriptValue)> {
        self.0.iter()
    }

    /// Walk `path` one key at a time.
    pub fn lookup(&self, path: &[&str]) -> std::result::Result<&ScriptValue, LookupMiss> {
        let (first, rest) = match path.split_first() {
            Some(split) => split,
            None => {
                return Err(LookupMiss::Missing {
                    segment: String::new(),
                    path: String::new(),
                })
            }
        };

        let mut current = self.get(first).ok_or_else(|| LookupMiss::missing(first, &[]))?;
        for (walked, segment) in rest.iter().enumerate() {
            let parents = &path[..=walked];
            current = match current {
                ScriptValue::Table(table) => table
                    .get(segment)
                    .ok_or_else(|| LookupMiss::missing(segment, parents))?,
                other => {
                    return Err(LookupMiss::Mismatch {
                        path: parents.join("."),
                        expected: "table",
                        found: other.kind(),
                    })
                }
            };
        }
        Ok(current)
    }
}

impl FromIterator<(String, ScriptValue)> for ScriptTable {
    fn from_iter<I: IntoIterator<Item = (String, ScriptValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Why [`nested_get`] fell back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupMiss {
    /// `segment` was absent; `path` is the full dotted path up to and including it.
    Missing { segment: String, path: String },
    /// A value sat at `path` but had the wrong type.
    Mismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl LookupMiss {
    fn missing(segment: &str, parents: &[&str]) -> Self {
        let mut path: Vec<&str> = parents.to_vec();
        path.push(segment);
        Self::Missing {
            segment: segment.to_string(),
            path: path.join("."),
        }
    }

    /// The missing key, if this was an absence rather than a mismatch.
    pub fn missing_segment(&self) -> Option<&str> {
        match self {
            Self::Missing { segment, .. } => Some(segment),
            Self::Mismatch { .. } => None,
        }
    }

    fn into_error(self) -> GsharerError {
        match self {
            Self::Missing { path, .. } => GsharerError::MissingField(path),
            Self::Mismatch {
                path,
                expected,
                found,
            } => GsharerError::type_mismatch(path, expected, found),
        }
    }
}

/// Types [`nested_get`] can return.
pub trait FromScriptValue: Sized {
    const EXPECTED: &'static str;
    fn from_script_value(value: &ScriptValue) -> Option<Self>;
}

impl FromScriptValue for String {
    const EXPECTED: &'static str = "string";

    fn from_script_value(value: &ScriptValue) -> Option<Self> {
        match value {
            ScriptValue::Text(text) => Some(text.clone()),
            _ => None,
        }
    }
}

impl FromScriptValue for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_script_value(value: &ScriptValue) -> Option<Self> {
        match value {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromScriptValue for ScriptTable {
    const EXPECTED: &'static str = "table";

    fn from_script_value(value: &ScriptValue) -> Option<Self> {
        match value {
            ScriptValue::Table(table) => Some(table.clone()),
            _ => None,
        }
    }
}

impl FromScriptValue for PortableHandler {
    const EXPECTED: &'static str = "function";

    fn from_script_value(value: &ScriptValue) -> Option<Self> {
        match value {
            ScriptValue::Function(handler) => Some(handler.clone()),
            _ => None,
        }
    }
}

/// Value at `path` if present and of type `T`, else `fallback`.
///
/// The second element says why the fallback was used. Callers with a sensible
/// default can ignore it; required fields turn it into an error.
pub fn nested_get<T: FromScriptValue>(
    table: &ScriptTable,
    path: &[&str],
    fallback: T,
) -> (T, Option<LookupMiss>) {
    if path.is_empty() {
        return (fallback, None);
    }
    match table.lookup(path) {
        Ok(value) => match T::from_script_value(value) {
            Some(found) => (found, None),
            None => (
                fallback,
                Some(LookupMiss::Mismatch {
                    path: path.join("."),
                    expected: T::EXPECTED,
                    found: value.kind(),
                }),
            ),
        },
        Err(miss) => (fallback, Some(miss)),
    }
}

/// Optional field: absence means the default, a wrong type is an error.
fn optional<T: FromScriptValue>(table: &ScriptTable, path: &[&str], default: T) -> Result<T> {
    match nested_get(table, path, default) {
        (value, None) => Ok(value),
        (value, Some(LookupMiss::Missing { .. })) => Ok(value),
        (_, Some(miss)) => Err(miss.into_error()),
    }
}

/// Required field: absence and wrong types are both errors.
fn required<T: FromScriptValue + Default>(table: &ScriptTable, path: &[&str]) -> Result<T> {
    match nested_get(table, path, T::default()) {
        (value, None) => Ok(value),
        (_, Some(miss)) => Err(miss.into_error()),
    }
}

/// The request half of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestTemplate {
    pub method: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub file_form_name: String,
    /// Extra text fields. Receivers key by name, so order carries no meaning.
    pub arguments: BTreeMap<String, String>,
}

/// How to upload to one destination and read its answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub name: String,
    pub request: RequestTemplate,
    pub response: ResponseHandler,
}

impl Descriptor {
    /// Validate a script table. `destination` is the fallback for `name`.
    pub fn from_table(table: &ScriptTable, destination: &str) -> Result<Self> {
        let name = optional(table, &["name"], destination.to_string())?;
        // Checked on its own so a non-table `request` is reported as such.
        optional(table, &["request"], ScriptTable::new())?;

        let method = optional(table, &["request", "method"], DEFAULT_METHOD.to_string())?;
        let url: String = required(table, &["request", "URL"])?;
        let file_form_name: String = required(table, &["request", "file_form_name"])?;
        if url.is_empty() {
            return Err(GsharerError::MissingField("request.URL".into()));
        }
        if file_form_name.is_empty() {
            return Err(GsharerError::MissingField("request.file_form_name".into()));
        }

        let raw_arguments = optional(table, &["request", "arguments"], ScriptTable::new())?;
        let mut arguments = BTreeMap::new();
        for (key, value) in raw_arguments.iter() {
            match value {
                ScriptValue::Text(text) => {
                    arguments.insert(key.clone(), text.clone());
                }
                other => {
                    return Err(GsharerError::type_mismatch(
                        format!("request.arguments.{key}"),
                        "string",
                        other.kind(),
                    ))
                }
            }
        }

        let response = match table.get("response") {
            None => ResponseHandler::Identity,
            Some(ScriptValue::Function(handler)) => ResponseHandler::Script(handler.clone()),
            Some(other) => {
                return Err(GsharerError::type_mismatch("response", "function", other.kind()))
            }
        };

        Ok(Self {
            name,
            request: RequestTemplate {
                method,
                url,
                file_form_name,
                arguments,
            },
            response,
        })
    }
}

/// Calls the destination function to get a [`Descriptor`].
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    source: ScriptSource,
}

impl ConfigResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            source: config.script.clone(),
        }
    }

    /// Call `destination_fn(destination, names...)` and validate what it returns.
    pub fn resolve(
        &self,
        runtime: &ScriptRuntime,
        destination: &str,
        names: &[String],
    ) -> Result<Descriptor> {
        if destination.is_empty() {
            return Err(GsharerError::config_load("destination name is empty"));
        }
        if names.is_empty() {
            return Err(GsharerError::EmptyJob);
        }

        let entry = self.load_entry(runtime)?;
        let args: Variadic<String> = std::iter::once(destination.to_string())
            .chain(names.iter().cloned())
            .collect();
        let returned: Value = entry.call(args).map_err(|err| {
            GsharerError::config_load(format!("destination '{destination}' raised: {err}"))
        })?;

        let table = match returned {
            Value::Table(table) => table,
            other => {
                return Err(GsharerError::type_mismatch(
                    "<descriptor>",
                    "table",
                    other.type_name(),
                ))
            }
        };
        let descriptor = Descriptor::from_table(&ScriptTable::from_lua(&table)?, destination)?;
        debug!(
            destination,
            method = %descriptor.request.method,
            url = %descriptor.request.url,
            "resolved destination descriptor"
        );
        Ok(descriptor)
    }

    /// Evaluate the configured script; it must return the destination function.
    fn load_entry(&self, runtime: &ScriptRuntime) -> Result<Function> {
        let (chunk, loaded) = match &self.source {
            ScriptSource::Bundled => (
                DEFAULT_CONFIG_SCRIPT.to_string(),
                runtime.load_resource(DEFAULT_CONFIG_SCRIPT),
            ),
            ScriptSource::External(path) => {
                let chunk = path.display().to_string();
                let source = fs::read_to_string(path).map_err(|err| {
                    GsharerError::config_load(format!("could not read {chunk}: {err}"))
                })?;
                let loaded = runtime.load_source(&chunk, &source);
                (chunk, loaded)
            }
        };
        let script = loaded.map_err(|err| GsharerError::config_load(err.to_string()))?;

        match script.call::<Value>(()) {
            Ok(Value::Function(entry)) => Ok(entry),
            Ok(other) => Err(GsharerError::config_load(format!(
                "{chunk} returned a {}, expected a function",
                other.type_name()
            ))),
            Err(err) => Err(GsharerError::config_load(format!("{chunk}: {err}"))),
        }
    }
}
