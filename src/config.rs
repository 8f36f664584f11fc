// Explicit configuration handed to the resolver and the worker pool.
//
// Nothing here is global: the binary builds these values from the command
// line and passes them into each constructor.

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR_NAME: &str = "gsharer";
pub const CONFIG_FILE_NAME: &str = "main.lua";

/// Default worker count when the caller does not pick one.
pub const DEFAULT_THREADS: usize = 4;

/// Where the destination function comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScriptSource {
    /// `lua/gsharer/default_config.lua` compiled into the binary.
    #[default]
    Bundled,
    /// A user script that returns the destination function.
    External(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct ResolverConfig {
    pub script: ScriptSource,
}

impl ResolverConfig {
    pub fn new(script: ScriptSource) -> Self {
        Self { script }
    }

    /// Pick the user's script if one was given or exists in the config dir.
    pub fn discover(explicit: Option<&Path>) -> Self {
        let script = discover_config_script(explicit)
            .map(ScriptSource::External)
            .unwrap_or_default();
        Self { script }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on workers; the pool never starts more workers than jobs.
    pub threads: usize,
    /// Per-request timeout. `None` lets large uploads run as long as needed.
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
    /// Honour `HTTP_PROXY`/`HTTPS_PROXY` from the environment.
    pub proxy_from_env: bool,
}

impl PoolConfig {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            ..Self::default()
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            request_timeout: None,
            user_agent: format!("gsharer/{}", env!("CARGO_PKG_VERSION")),
            proxy_from_env: true,
        }
    }
}

/// `<config dir>/gsharer/main.lua`, whether or not it exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Resolve the destination script to use.
///
/// An explicit path always wins, even if it does not exist yet (loading will
/// then fail loudly). Otherwise the default location is used only when a file
/// is actually there.
pub fn discover_config_script(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    default_config_path().filter(|path| path.is_file())
}
