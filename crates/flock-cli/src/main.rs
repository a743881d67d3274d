use clap::Parser;
use colored::*;
use std::process;

use flock_cli::{commands, Cli, CliError, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    if let Err(e) = execute_command(cli.command).await {
        eprintln!("{} {}", "Error:".red(), e);
        process::exit(1);
    }
}

async fn execute_command(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Run { config, root, namespaces } => {
            commands::run(config, root, namespaces).await
        }
        Commands::Inspect { root, extension, multiplier, json, namespace } => {
            commands::inspect(&root, &extension, multiplier, &namespace, json)
        }
        Commands::InitConfig { file, force } => {
            commands::init_config(&file, force)
        }
    }
}

fn setup_logging(verbose: bool, quiet: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    if quiet {
        return; // No logging in quiet mode
    }

    let level = if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
