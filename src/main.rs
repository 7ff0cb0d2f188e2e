use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use photo_sorter::config::Config;
use photo_sorter::geocode::create_geocoding_service;
use photo_sorter::ingest::{IngestSummary, Ingestor};
use photo_sorter::watch::InputWatcher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(author, version, about = "Sort photos into by-date and by-location folders")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Increase verbosity (-v=DEBUG, -vv=TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// Folder to watch for new photos and archives
    #[arg(short, long, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Folder receiving the ByDate and ByLocation trees
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process existing files, then watch for new ones until 'q' is entered (default)
    Run(RunArgs),

    /// Process the files already in the input folder and exit
    Scan(RunArgs),

    /// Initialize with a default config file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,

        /// Path to config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Some(Commands::Init { force, config }) => init_config(&config, force),
        Some(Commands::Scan(args)) => {
            let ingestor = prepare(&args)?;
            let summary = process_backlog(&ingestor).await;
            print_summary(&summary);
            Ok(())
        }
        Some(Commands::Run(args)) => run(&args).await,
        None => run(&cli.run).await,
    }
}

fn setup_logging(verbosity: u8, quiet: bool) {
    let level = match (quiet, verbosity) {
        (true, _) => log::LevelFilter::Warn,
        (false, 0) => log::LevelFilter::Info,
        (false, 1) => log::LevelFilter::Debug,
        (false, _) => log::LevelFilter::Trace,
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_str()))
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Seconds))
        .init();
}

fn init_config(config_path_opt: &Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = Config::get_config_path(config_path_opt);

    if config_path.exists() && !force {
        println!("Config file already exists at {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    let config = Config::default();
    config
        .save_to_file(&config_path)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    println!("Created config file at {}", config_path.display());
    Ok(())
}

fn load_config(args: &RunArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found at {}. Run 'photo-sorter init' to create one.",
                    path.display()
                );
            }
            Config::load_from_file(path)?
        }
        None => {
            let default_path = Config::get_config_path(&None);
            if default_path.exists() {
                Config::load_from_file(&default_path)?
            } else {
                Config::default()
            }
        }
    };

    if let Some(input) = &args.input {
        config.input_dir = input.clone();
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }

    Ok(config)
}

/// Loads the config, creates both folders and builds the ingestor
fn prepare(args: &RunArgs) -> Result<Ingestor> {
    let mut config = load_config(args)?;

    // checked before anything is created, so a rejected output leaves no folder behind
    let input_dir = resolve(&config.input_dir)?;
    let output_dir = resolve(&config.output_dir)?;
    if output_dir.starts_with(&input_dir) {
        anyhow::bail!(
            "Output folder {} must not be inside the input folder {}",
            output_dir.display(),
            input_dir.display()
        );
    }

    for dir in [&input_dir, &output_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    config.input_dir = input_dir;
    config.output_dir = output_dir;

    println!("Input: {}", config.input_dir.display());
    println!("Output: {}", config.output_dir.display());

    let geocoder = create_geocoding_service(&config)?;
    Ok(Ingestor::new(Arc::new(config), geocoder))
}

/// Absolute form of `path` with symlinks resolved, for paths that may not exist yet
fn resolve(path: &Path) -> Result<PathBuf> {
    let absolute =
        std::path::absolute(path).with_context(|| format!("Failed to resolve {}", path.display()))?;

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = std::fs::canonicalize(existing)
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    resolved.extend(missing.iter().rev());
    Ok(resolved)
}

async fn process_backlog(ingestor: &Ingestor) -> IngestSummary {
    let input = ingestor.config().input_dir.clone();
    info!("Processing existing files in {}", input.display());
    ingestor.dispatch_tree(&input).await
}

fn print_summary(summary: &IngestSummary) {
    println!(
        "Done: {} photos placed, {} archives expanded, {} skipped, {} failed",
        summary.photos, summary.archives, summary.skipped, summary.failed
    );
}

async fn run(args: &RunArgs) -> Result<()> {
    let ingestor = prepare(args)?;

    // events arriving during the backlog scan queue up until the watch loop starts
    let config = ingestor.config();
    let mut watcher = InputWatcher::start(&config.input_dir, config.readable_delay())?;

    let summary = process_backlog(&ingestor).await;
    print_summary(&summary);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();

    println!("Watching for new files. Enter 'q' to quit.");
    loop {
        tokio::select! {
            Some(path) = watcher.next_path() => {
                let ingestor = ingestor.clone();
                in_flight.spawn(async move {
                    ingestor.dispatch(path.clone()).await;
                    path
                });
            }
            line = stdin.next_line() => match line {
                Ok(Some(line)) if line.trim().eq_ignore_ascii_case("q") => break,
                Ok(Some(_)) => {}
                Ok(None) => {
                    info!("Input closed, shutting down");
                    break;
                }
                Err(e) => {
                    error!("Failed to read from stdin: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
            Some(joined) = in_flight.join_next() => match joined {
                Ok(path) => watcher.forget(&path),
                Err(e) => error!("Ingestion task panicked: {e}"),
            },
        }
    }

    if !in_flight.is_empty() {
        warn!("Stopping with {} files still in progress", in_flight.len());
    }
    Ok(())
}
