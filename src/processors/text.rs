//! Intermediate plain-text format
//!
//! One block per line as `TAG: text`; chapters separated by blank lines.
//!
//! ```text
//! TITLE: Chapter 1
//! H1: Prologue
//! P: First paragraph.
//! IMAGE: images/cover.jpg
//!
//! TITLE: Chapter 2
//! P: ...
//! ```
//!
//! Book metadata travels next to the text as `<stem>.meta.json`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{Block, BlockKind, BookInfo, Chapter, Document};

/// How a flat text file is cut into chapters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChapterSplit {
    /// One or more blank lines end a chapter
    #[default]
    Blank,
    /// Every `H1` line starts a new chapter; blank lines are ignored
    Heading,
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"^(TITLE|H1|H2|H3|P|IMAGE):\s?(.*)$").expect("valid tag regex")
    })
}

/// Parse a single non-blank line; untagged lines are paragraphs
pub fn parse_line(line: &str) -> Block {
    let line = line.trim();
    match tag_regex().captures(line) {
        Some(caps) => {
            let kind = caps[1].parse().unwrap_or(BlockKind::Paragraph);
            Block::new(kind, caps[2].trim())
        }
        None => Block::paragraph(line),
    }
}

/// Parse a whole file body
pub fn parse(content: &str, split: ChapterSplit) -> Document {
    let mut chapters = Vec::new();
    let mut current = Chapter::default();

    for line in content.lines() {
        if line.trim().is_empty() {
            if split == ChapterSplit::Blank && !current.is_empty() {
                chapters.push(std::mem::take(&mut current));
            }
            continue;
        }

        let block = parse_line(line);
        if block.text.is_empty() {
            continue;
        }

        if split == ChapterSplit::Heading
            && block.kind == BlockKind::Heading1
            && !current.is_empty()
        {
            // TITLE lines right before the heading belong to the new chapter
            let keep = current
                .blocks
                .iter()
                .rposition(|b| b.kind != BlockKind::Title)
                .map_or(0, |i| i + 1);
            let carried = current.blocks.split_off(keep);
            if !current.is_empty() {
                chapters.push(std::mem::take(&mut current));
            }
            current.blocks = carried;
        }

        current.blocks.push(block);
    }

    if !current.is_empty() {
        chapters.push(current);
    }

    Document::new(chapters)
}

/// Render a document; the output parses back to the same chapters with
/// [`ChapterSplit::Blank`].
pub fn render(document: &Document) -> String {
    let mut out = String::new();

    for chapter in document.chapters.iter().filter(|c| !c.is_empty()) {
        if !out.is_empty() {
            out.push('\n');
        }
        for block in &chapter.blocks {
            out.push_str(block.kind.tag());
            out.push_str(": ");
            // A block is always a single line
            out.push_str(&block.text.split_whitespace().collect::<Vec<_>>().join(" "));
            out.push('\n');
        }
    }

    out
}

/// Read and parse a text file
pub async fn read_file(path: &Path, split: ChapterSplit) -> Result<Document> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| TranslationError::FileError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    Ok(parse(&content, split))
}

/// Render and write a text file, creating parent directories
pub async fn write_file(path: &Path, document: &Document) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TranslationError::FileError {
                    path: parent.display().to_string(),
                    message: e.to_string(),
                })?;
        }
    }

    tokio::fs::write(path, render(document))
        .await
        .map_err(|e| TranslationError::FileError {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

/// Sidecar metadata path for a text file: `book.txt` -> `book.meta.json`
pub fn info_path(text_path: &Path) -> PathBuf {
    text_path.with_extension("meta.json")
}

/// Read the metadata sidecar of `text_path`, if there is one
pub async fn read_info(text_path: &Path) -> Result<Option<BookInfo>> {
    let path = info_path(text_path);
    if !path.exists() {
        return Ok(None);
    }

    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| TranslationError::FileError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    Ok(Some(serde_json::from_str(&content)?))
}

/// Write the metadata sidecar of `text_path`
pub async fn write_info(text_path: &Path, info: &BookInfo) -> Result<()> {
    let path = info_path(text_path);
    tokio::fs::write(&path, serde_json::to_string_pretty(info)?)
        .await
        .map_err(|e| TranslationError::FileError {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}
