use std::path::{Path, PathBuf};
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use mobitic::{AppConfig, Pipeline};

const DEFAULT_CONFIG_FILE: &str = "mobitic.toml";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration; `mobitic.toml` is used when present, defaults otherwise
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the BPE census and the IRIS boundaries
    Download {
        /// Download again even when the files exist
        #[arg(long)]
        force: bool,
    },
    /// Filter, reproject and categorize the raw inputs into GeoJSON artifacts
    Prepare,
    /// Build the interactive HTML map from the prepared artifacts
    Render,
    /// download, prepare and render
    Run {
        #[arg(long)]
        force: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from_file(path),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            AppConfig::load_from_file(Path::new(DEFAULT_CONFIG_FILE))
        }
        None => {
            log::info!("No configuration file, using defaults");
            let config = AppConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    log::info!(
        "Region {} (departments {})",
        config.region.label,
        config.region.departments.join(", ")
    );
    let pipeline = Pipeline::new(config);

    match cli.command {
        Commands::Download { force } => pipeline.download(force)?,
        Commands::Prepare => {
            let prepared = pipeline.prepare()?;
            log::info!(
                "Prepared {} facilities ({} excluded) and {} zones ({} excluded)",
                prepared.facilities.len(),
                prepared.excluded_facilities,
                prepared.zones.len(),
                prepared.excluded_zones
            );
        }
        Commands::Render => {
            let output = pipeline.render()?;
            log::info!("Map written to {}", output.display());
        }
        Commands::Run { force } => {
            let output = pipeline.run(force)?;
            log::info!("Map written to {}", output.display());
        }
    }
    Ok(())
}

fn main() {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    if let Err(err) = execute(cli) {
        log::error!("{}", err);
        for cause in err.chain().skip(1) {
            log::error!("  caused by: {}", cause);
        }
        process::exit(1);
    }
}
