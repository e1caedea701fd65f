//! wavemesh - wireless network emulation testbed
//!
//! Builds access points, stations and ad hoc networks from a TOML file.

mod cli;

use cli::{Cli, Commands};
use nix::unistd::Uid;
use tracing_subscriber::EnvFilter;
use wavemesh::error::{Error, Result};
use wavemesh::{SystemEngine, Testbed, manifest, testbed};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match cli.command {
        // Commands that don't require config
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
            Ok(())
        }

        Commands::Check => {
            let config = manifest::load(&cli.config)?;
            testbed::check(&config);
            Ok(())
        }

        Commands::Up { hold, json } => {
            require_root()?;
            let config = manifest::load(&cli.config)?;
            let mut bed = Testbed::new(config, SystemEngine::new());

            if let Err(e) = bed.up() {
                // Leave nothing half-built behind
                if let Err(cleanup) = bed.down() {
                    eprintln!("Warning: cleanup after failed start: {}", cleanup);
                }
                return Err(e);
            }
            bed.print_status(json)?;

            if hold {
                println!("\nTopology is up. Press Enter to tear it down.");
                let mut line = String::new();
                std::io::stdin().read_line(&mut line)?;
                bed.down()?;
            }
            Ok(())
        }

        Commands::Down => {
            require_root()?;
            let config = manifest::load(&cli.config)?;
            testbed::purge(&config, &mut SystemEngine::new())?;
            println!("Topology removed.");
            Ok(())
        }
    }
}

/// RUST_LOG wins; otherwise `--verbose` selects debug output
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn require_root() -> Result<()> {
    if Uid::effective().is_root() {
        Ok(())
    } else {
        Err(Error::PermissionDenied(
            "namespaces and radios can only be managed as root".into(),
        ))
    }
}
