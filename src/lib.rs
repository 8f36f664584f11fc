// Library root
// -----------
// Everything the `gsharer` binary does lives here; `main.rs` only parses the
// command line and sets up logging.
//
// Module responsibilities:
// - `runtime`: one Lua interpreter with the bundled module loader, plus
//   `PortableHandler` for moving response handlers between interpreters.
// - `scripts`: the Lua resources compiled into the binary.
// - `descriptor`: asks the destination script for a `Descriptor` and
//   validates the table it returns.
// - `multipart` / `job`: turn a descriptor and input streams into an
//   `UploadJob` with a fully buffered body.
// - `pool`: worker threads, each with its own runtime and HTTP client.
// - `interpret`: turns a response into the printed result line.
// - `commands` / `cli` / `ui`: the command line surface, progress bars and
//   confirmation prompt.
// - `config`, `error`, `logging`: ambient plumbing.
pub mod cli;
pub mod commands;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod interpret;
pub mod job;
pub mod logging;
pub mod multipart;
pub mod pool;
pub mod runtime;
pub mod scripts;
pub mod ui;

pub use config::{PoolConfig, ResolverConfig, ScriptSource};
pub use descriptor::{ConfigResolver, Descriptor, RequestTemplate};
pub use error::{GsharerError, Result};
pub use interpret::{ResponseHandler, ResponseInterpreter};
pub use job::{build_job, NamedStream, UploadJob};
pub use pool::{JobOutcome, Worker, WorkerPool};
pub use runtime::{PortableHandler, ScriptRuntime};
