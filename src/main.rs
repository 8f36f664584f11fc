// Entrypoint for the CLI application.
// - Keeps `main` small: parse arguments, set up logging, hand off to `commands`.
// - Returns `anyhow::Result` so failures print with their context chain.

use gsharer::cli::{Cli, Commands};
use gsharer::{commands, logging};

fn main() -> anyhow::Result<()> {
    let Cli {
        verbose,
        config,
        command,
    } = Cli::parse_args();
    logging::init_logging(verbose);

    match command {
        Commands::File(args) => commands::run_file(config.as_deref(), args),
        Commands::Config | Commands::Auth => {
            println!("{}", commands::describe_config_path(config.as_deref()));
            Ok(())
        }
    }
}
