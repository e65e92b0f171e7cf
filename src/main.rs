use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cubby::cli;

#[derive(Parser)]
#[command(name = cubby::APP_NAME)]
#[command(version = cubby::VERSION)]
#[command(about = "Minimal OCI-compatible container runtime", long_about = None)]
struct Cli {
    /// Enable JSON format logging
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull a remote image and write a runtime bundle to disk
    Pull {
        image: String,
        bundle: PathBuf,
    },
    /// Create a container from a runtime bundle on disk
    Create {
        container_id: String,
        bundle: PathBuf,
    },
    /// Run a container from a runtime bundle on disk
    Run {
        container_id: String,
        bundle: PathBuf,
    },
    /// Internal re-exec target, runs the container setup inside the new
    /// namespaces (do not invoke manually)
    #[command(hide = true)]
    Child {
        bundle: PathBuf,
    },
}

fn init_logging(json: bool, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("CUBBY_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.json, cli.verbose);

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Commands::Pull { image, bundle } => cli::pull::pull(&image, &bundle).map_err(Into::into),
        Commands::Create {
            container_id,
            bundle,
        } => cli::create::create(&container_id, &bundle).map_err(Into::into),
        Commands::Run {
            container_id,
            bundle,
        } => cli::run::run(&container_id, &bundle).map_err(Into::into),
        Commands::Child { bundle } => cli::child::child(&bundle).map_err(Into::into),
    };

    if let Err(err) = result {
        tracing::error!(%err, "command failure");
        std::process::exit(1);
    }
}
