// Lua resources compiled into the binary.
//
// Paths are relative to the crate root (`lua/gsharer/init.lua`), which is
// also how the module loader spells them when it probes for a module.

use std::borrow::Cow;
use std::collections::BTreeMap;

/// Directory every bundled script lives under.
pub const SCRIPT_ROOT: &str = "lua";
pub const SCRIPT_EXT: &str = "lua";

/// Creates the `gsharer` namespace table.
pub const BOOTSTRAP_SCRIPT: &str = "lua/gsharer/init.lua";
/// Installs the module searcher and helpers once host functions exist.
pub const GLOBALS_SCRIPT: &str = "lua/gsharer/load_globals.lua";
/// Destination function used when the user has no config script.
pub const DEFAULT_CONFIG_SCRIPT: &str = "lua/gsharer/default_config.lua";

const BUNDLED: &[(&str, &str)] = &[
    (BOOTSTRAP_SCRIPT, include_str!("../lua/gsharer/init.lua")),
    (GLOBALS_SCRIPT, include_str!("../lua/gsharer/load_globals.lua")),
    (
        DEFAULT_CONFIG_SCRIPT,
        include_str!("../lua/gsharer/default_config.lua"),
    ),
    (
        "lua/gsharer/destinations/init.lua",
        include_str!("../lua/gsharer/destinations/init.lua"),
    ),
    (
        "lua/gsharer/destinations/litterbox.lua",
        include_str!("../lua/gsharer/destinations/litterbox.lua"),
    ),
    (
        "lua/gsharer/destinations/catbox.lua",
        include_str!("../lua/gsharer/destinations/catbox.lua"),
    ),
    (
        "lua/gsharer/destinations/nullpointer.lua",
        include_str!("../lua/gsharer/destinations/nullpointer.lua"),
    ),
];

/// Read-only set of script resources addressed by path.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedScripts {
    files: BTreeMap<String, Cow<'static, str>>,
}

impl EmbeddedScripts {
    /// The scripts shipped inside the binary.
    pub fn bundled() -> Self {
        let files = BUNDLED
            .iter()
            .map(|(path, source)| (path.to_string(), Cow::Borrowed(*source)))
            .collect();
        Self { files }
    }

    /// Add or replace a resource. Used by tests and by callers layering
    /// extra modules on top of the bundled set.
    pub fn with_file(mut self, path: impl Into<String>, source: impl Into<String>) -> Self {
        self.files.insert(path.into(), Cow::Owned(source.into()));
        self
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|source| source.as_ref())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

/// Resource paths probed for a dotted module name, in probe order:
/// `a.b` -> `lua/a/b.lua`, then `lua/a/b/init.lua`.
pub fn module_candidates(module: &str) -> [String; 2] {
    let base = format!("{}/{}", SCRIPT_ROOT, module.replace('.', "/"));
    [
        format!("{base}.{SCRIPT_EXT}"),
        format!("{base}/init.{SCRIPT_EXT}"),
    ]
}
