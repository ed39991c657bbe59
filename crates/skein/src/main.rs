use std::path::PathBuf;

use clap::Parser;
use log::error;

use skein::{bundle_vm, config::Config, orchestrator, watcher};

/// CLI arguments for the skein binary.
#[derive(Parser, Debug)]
#[command(
    name = "skein",
    version,
    about = "Bundle a TypeScript entry module and run its default export"
)]
struct Cli {
    /// Entry module to bundle.
    #[arg(value_name = "ENTRY")]
    entry: PathBuf,

    /// Print the bundled JavaScript instead of executing it.
    #[arg(long)]
    emit: bool,

    /// Bypass the HTTP cache on read and fetch fresh from the network.
    #[arg(long)]
    reload: bool,

    /// Re-bundle and re-run when a referenced local file changes.
    #[arg(short, long)]
    watch: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let config = Config {
        reload: cli.reload,
        ..Config::default()
    };

    if let Err(err) = run(&cli, &config) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let output = orchestrator::bundle_entry(&cli.entry, config)?;

    if cli.emit {
        print!("{}", output.bundle.code);
        return Ok(());
    }

    bundle_vm::run(&output.bundle.executable())?;

    if cli.watch {
        let entry = cli.entry.clone();
        let config = config.clone();
        watcher::watch_and_rerun(output.watch_files, config.watch_debounce, move || {
            match orchestrator::bundle_entry(&entry, &config) {
                Ok(output) => {
                    if let Err(err) = bundle_vm::run(&output.bundle.executable()) {
                        error!("run failed: {err:#}");
                    }
                    output.watch_files
                }
                Err(err) => {
                    // Keep watching with the old set; the next edit may fix it.
                    error!("bundle failed: {err}");
                    Vec::new()
                }
            }
        })?;
    }

    Ok(())
}
