use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// gsharer - upload files to destinations described by Lua scripts
#[derive(Parser, Debug)]
#[command(name = "gsharer")]
#[command(about = "Upload files to destinations described by Lua scripts")]
#[command(version)]
pub struct Cli {
    /// Log level: 0=ERROR, 1=WARN, 2=INFO, 3+=DEBUG (RUST_LOG overrides)
    #[arg(short, long, default_value_t = 2, env = "GSHARER_VERBOSE", global = true)]
    pub verbose: u8,

    /// Destination script to use instead of <config dir>/gsharer/main.lua
    #[arg(long, env = "GSHARER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload one file from stdin or all the files from the argument list
    File(FileArgs),
    /// Print the destination script location
    Config,
    /// Print the destination script location (credentials live there too)
    Auth,
}

#[derive(Args, Debug)]
pub struct FileArgs {
    /// Where to upload to
    #[arg(short, long, default_value = "auto")]
    pub destination: String,

    /// Limits the amount of threads made when #files > #threads
    #[arg(short, long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    pub threads: u32,

    /// Filename to upload stdin data under (required when no files are given)
    #[arg(long)]
    pub name: Option<String>,

    /// Fail if any argument can't be uploaded (missing file, rejected request, ...)
    #[arg(short, long)]
    pub strict: bool,

    /// Show every request and ask before uploading anything
    #[arg(short, long)]
    pub confirm: bool,

    /// Maximum number of files sent in one request
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub batch: u32,

    /// Files to upload; stdin is read when none are given
    pub files: Vec<PathBuf>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
