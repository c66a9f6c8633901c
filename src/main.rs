//! Main entry point for the EPUB translator CLI

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use epub_translator::cli::commands::{self, Commands};
use epub_translator::core::config::AppConfig;

/// EPUB translator - local machine translation server and book converters
#[derive(Parser, Debug)]
#[command(name = "epub-translator", version, about, long_about = None)]
struct Args {
    /// Config file (YAML, JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    let crate_name = env!("CARGO_PKG_NAME").replace('-', "_");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}={},tower_http={}", crate_name, log_level, log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load(args.config.as_deref())?;

    // Execute command
    match args.command {
        Some(Commands::Serve {
            host,
            port,
            model_dir,
        }) => {
            commands::handle_serve(config, host, port, model_dir).await?;
        }
        Some(Commands::Extract {
            input,
            output,
            no_images,
        }) => {
            commands::handle_extract(&config.extract, input, output, no_images).await?;
        }
        Some(Commands::Build {
            input,
            output,
            title,
            author,
            language,
            split,
        }) => {
            let metadata = commands::book_metadata(&input, title, author, language).await?;
            commands::handle_build(input, output, metadata, split).await?;
        }
        Some(Commands::Translate {
            input,
            output,
            endpoint,
            concurrency,
        }) => {
            commands::handle_translate(config.client, input, output, endpoint, concurrency).await?;
        }
        Some(Commands::Clean { input, output }) => {
            commands::handle_clean(input, output).await?;
        }
        Some(Commands::Check { endpoint }) => {
            commands::handle_check(config.client, endpoint).await?;
        }
        Some(Commands::Config) => {
            commands::handle_config(&config)?;
        }
        None => {
            println!("Please specify a command. Use --help for more information.");
        }
    }

    Ok(())
}
