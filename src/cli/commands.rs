//! CLI command definitions and handlers

use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::core::client::TranslationClient;
use crate::core::config::{AppConfig, ClientConfig, ExtractConfig, ServerConfig};
use crate::core::engine::ModelHost;
use crate::processors::builder::{BookMetadata, EpubBuilder};
use crate::processors::cleaner;
use crate::processors::epub::{is_epub, EpubExtractor};
use crate::processors::text::{self, ChapterSplit};
use crate::server::api::run_server;

/// Commands for the EPUB translator
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load the model and serve the translation API
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory holding the ONNX graphs and tokenizer.json (overrides config)
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },

    /// Convert ePub files to the tagged text format
    Extract {
        /// Input ePub file or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Output text file, or directory when the input is a directory
        #[arg(short, long)]
        output: PathBuf,

        /// Skip image extraction
        #[arg(long)]
        no_images: bool,
    },

    /// Package a tagged text file as an ePub
    Build {
        /// Input text file
        #[arg(short, long)]
        input: PathBuf,

        /// Output ePub file
        #[arg(short, long)]
        output: PathBuf,

        /// Book title (default: metadata sidecar, then input file name)
        #[arg(long)]
        title: Option<String>,

        /// Book author (default: metadata sidecar, then "Unknown")
        #[arg(long)]
        author: Option<String>,

        /// Book language code (default: metadata sidecar, then "vi")
        #[arg(long)]
        language: Option<String>,

        /// How chapters are delimited in the input
        #[arg(long, value_enum, default_value_t = ChapterSplit::Blank)]
        split: ChapterSplit,
    },

    /// Translate a tagged text file through a running server
    Translate {
        /// Input text file
        #[arg(short, long)]
        input: PathBuf,

        /// Output text file
        #[arg(short, long)]
        output: PathBuf,

        /// Server base URL (overrides config)
        #[arg(long)]
        endpoint: Option<String>,

        /// Maximum requests in flight (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Clean up translated text
    Clean {
        /// Input text file
        #[arg(short, long)]
        input: PathBuf,

        /// Output text file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Check that a translation server is reachable
    Check {
        /// Server base URL (overrides config)
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

fn progress_bar(len: u64) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

/// Handle serve command
pub async fn handle_serve(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
    model_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(model_dir) = model_dir {
        config.model.model_dir = model_dir;
    }
    let ServerConfig { host: default_host, port: default_port } = config.server;
    let host = host.unwrap_or(default_host);
    let port = port.unwrap_or(default_port);

    config.model.validate()?;

    info!("Loading model {} from {}", config.model.name, config.model.model_dir.display());
    let start_time = Instant::now();
    let model_config = config.model.clone();
    let engine = tokio::task::spawn_blocking(move || ModelHost::load(&model_config)).await??;
    info!("Model loaded in {:?}", start_time.elapsed());

    println!("🚀 Server starting on http://{}:{}", host, port);
    println!("📄 OpenAPI document: http://{}:{}/api-docs/openapi.json", host, port);

    run_server(engine, &host, port).await
}

/// Output path for one book of a directory extraction: `<out>/<stem>/<stem>.txt`
fn text_output_for(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());
    output_dir.join(&stem).join(format!("{}.txt", stem))
}

/// Handle extract command
pub async fn handle_extract(
    extract_config: &ExtractConfig,
    input: PathBuf,
    output: PathBuf,
    no_images: bool,
) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let extractor = EpubExtractor::new(!no_images).with_image_filter(extract_config);

    info!("Starting ePub extraction");
    info!("Input: {}", input.display());
    info!("Output: {}", output.display());

    if input.is_file() {
        if !is_epub(&input) {
            warn!("{} does not have an .epub extension", input.display());
        }
        let stats = extractor.extract_to_text(&input, &output).await?;
        println!("\n✅ Extraction completed!");
        println!("   Chapters: {}", stats.chapters);
        println!("   Blocks: {}", stats.blocks);
        println!("   Images: {}", stats.images);
        return Ok(());
    }

    let files = extractor.find_epub_files(&input)?;
    if files.is_empty() {
        anyhow::bail!("No ePub files found in {}", input.display());
    }

    let pb = progress_bar(files.len() as u64)?;
    let mut processed = 0;
    let mut failed = 0;

    for file_path in files {
        pb.set_message(format!("Processing: {}", file_path.display()));
        let target = text_output_for(&file_path, &output);

        match extractor.extract_to_text(&file_path, &target).await {
            Ok(_) => processed += 1,
            Err(e) => {
                failed += 1;
                pb.println(format!("Error processing {}: {}", file_path.display(), e));
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message("Completed");

    let duration = start_time.elapsed();
    info!("Completed: {} processed, {} failed in {:?}", processed, failed, duration);

    println!("\n✅ Extraction completed!");
    println!("   Processed: {}", processed);
    println!("   Failed: {}", failed);
    println!("   Time: {:?}", duration);

    Ok(())
}

/// Handle build command
pub async fn handle_build(
    input: PathBuf,
    output: PathBuf,
    metadata: BookMetadata,
    split: ChapterSplit,
) -> anyhow::Result<()> {
    info!("Building {} from {}", output.display(), input.display());

    let document = text::read_file(&input, split).await?;
    let image_root = input
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let builder = EpubBuilder::new(metadata);
    let stats = tokio::task::spawn_blocking(move || builder.build(&document, &image_root, &output))
        .await??;

    println!("\n✅ ePub created!");
    println!("   Chapters: {}", stats.chapters);
    println!("   Images: {}", stats.images);

    Ok(())
}

/// Default book title: the input's file stem
pub fn default_title(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| BookMetadata::default().title)
}

/// Package metadata for `build`: flags first, then the input's metadata
/// sidecar, then built-in defaults
pub async fn book_metadata(
    input: &Path,
    title: Option<String>,
    author: Option<String>,
    language: Option<String>,
) -> anyhow::Result<BookMetadata> {
    let info = text::read_info(input).await?.unwrap_or_default();
    if !info.is_empty() {
        info!("Using metadata from {}", text::info_path(input).display());
    }
    let defaults = BookMetadata::default();

    Ok(BookMetadata {
        title: title.or(info.title).unwrap_or_else(|| default_title(input)),
        author: author.or(info.creator).unwrap_or(defaults.author),
        language: language.or(info.language).unwrap_or(defaults.language),
        identifier: None,
        publisher: info.publisher,
        date: info.date,
    })
}

/// Handle translate command
pub async fn handle_translate(
    mut client_config: ClientConfig,
    input: PathBuf,
    output: PathBuf,
    endpoint: Option<String>,
    concurrency: Option<usize>,
) -> anyhow::Result<()> {
    if let Some(endpoint) = endpoint {
        client_config.endpoint = endpoint;
    }
    if let Some(concurrency) = concurrency {
        client_config.max_concurrent = concurrency;
    }

    let start_time = Instant::now();
    let client = TranslationClient::new(client_config)?;
    let model = client.health().await?;
    info!("Translating with model {}", model);

    let mut document = text::read_file(&input, ChapterSplit::Blank).await?;
    let total = TranslationClient::pending_blocks(&document);
    if total == 0 {
        anyhow::bail!("No text to translate in {}", input.display());
    }

    let pb = progress_bar(total as u64)?;
    pb.set_message(format!("Translating: {}", input.display()));
    let stats = client
        .translate_document(&mut document, |done| pb.set_position(done as u64))
        .await;
    pb.finish_with_message("Completed");

    text::write_file(&output, &document).await?;

    // The text is no longer in the source language
    if let Some(mut info) = text::read_info(&input).await? {
        info.language = None;
        text::write_info(&output, &info).await?;
    }

    let duration = start_time.elapsed();
    info!(
        "Completed: {} translated, {} failed in {:?}",
        stats.translated, stats.failed, duration
    );

    println!("\n✅ Translation completed!");
    println!("   Translated: {}", stats.translated);
    println!("   Failed: {}", stats.failed);
    println!("   Time: {:?}", duration);

    Ok(())
}

/// Handle clean command
pub async fn handle_clean(input: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    cleaner::clean_file(&input, &output).await?;
    println!("✅ Cleaned text saved to {}", output.display());
    Ok(())
}

/// Handle check command
pub async fn handle_check(mut client_config: ClientConfig, endpoint: Option<String>) -> anyhow::Result<()> {
    if let Some(endpoint) = endpoint {
        client_config.endpoint = endpoint;
    }
    let url = client_config.endpoint.clone();
    let client = TranslationClient::new(client_config)?;

    match client.health().await {
        Ok(model) => {
            println!("✅ Server at {} is healthy (model: {})", url, model);
            Ok(())
        }
        Err(e) => {
            println!("❌ Server at {} is not reachable", url);
            Err(e.into())
        }
    }
}

/// Handle config command
pub fn handle_config(config: &AppConfig) -> anyhow::Result<()> {
    print!("{}", config.to_yaml()?);
    Ok(())
}
