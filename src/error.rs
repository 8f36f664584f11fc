// Error types shared by every part of the uploader.
//
// Script errors are flattened into strings when they leave the runtime so
// the enum stays `Send + Sync` and can travel back from worker threads.

use thiserror::Error;

/// Main error type for gsharer
#[derive(Error, Debug)]
pub enum GsharerError {
    /// Bootstrap scripts failed while a runtime was being set up
    #[error("Script runtime failed to initialize: {0}")]
    Init(String),

    /// No bundled resource matched a module name
    #[error("Module '{module}' not found (searched {})", .searched.join(", "))]
    ModuleNotFound {
        module: String,
        searched: Vec<String>,
    },

    /// A script chunk did not compile
    #[error("Syntax error in {chunk}: {message}")]
    Syntax { chunk: String, message: String },

    /// The interpreter ran out of memory while loading a chunk
    #[error("Memory error while loading {chunk}: {message}")]
    Memory { chunk: String, message: String },

    /// The destination script could not be loaded or evaluated
    #[error("Failed to load destination config: {0}")]
    ConfigLoad(String),

    /// A required descriptor field is absent
    #[error("Missing required field '{0}'")]
    MissingField(String),

    /// A descriptor field exists but has the wrong shape
    #[error("Field '{field}' should be {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: String,
    },

    /// The descriptor produced a method or URL the HTTP layer rejects
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Can't form a request with nothing to upload")]
    EmptyJob,

    #[error("Network error: {0}")]
    Network(String),

    /// Destination answered with a status of 300 or above
    #[error("Destination responded with status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Response handler failed: {0}")]
    HandlerInvocation(String),

    #[error("Response handler could not be loaded: {0}")]
    HandlerLoad(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for gsharer operations
pub type Result<T> = std::result::Result<T, GsharerError>;

impl GsharerError {
    /// Create a config load error
    pub fn config_load(msg: impl Into<String>) -> Self {
        Self::ConfigLoad(msg.into())
    }

    /// Create a type mismatch error for a dotted field path
    pub fn type_mismatch(
        field: impl Into<String>,
        expected: &'static str,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected,
            found: found.into(),
        }
    }
}
