//! Core data models for translation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Kind of a single line of document text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// Document `<title>`
    Title,
    /// `<h1>`
    Heading1,
    /// `<h2>`
    Heading2,
    /// `<h3>`
    Heading3,
    /// `<p>`
    Paragraph,
    /// Image reference, text holds a relative path
    Image,
}

impl BlockKind {
    /// Tag used by the intermediate text format
    pub fn tag(&self) -> &'static str {
        match self {
            BlockKind::Title => "TITLE",
            BlockKind::Heading1 => "H1",
            BlockKind::Heading2 => "H2",
            BlockKind::Heading3 => "H3",
            BlockKind::Paragraph => "P",
            BlockKind::Image => "IMAGE",
        }
    }

    /// Blocks that carry translatable text
    pub fn is_text(&self) -> bool {
        !matches!(self, BlockKind::Image)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for BlockKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TITLE" => Ok(BlockKind::Title),
            "H1" => Ok(BlockKind::Heading1),
            "H2" => Ok(BlockKind::Heading2),
            "H3" => Ok(BlockKind::Heading3),
            "P" => Ok(BlockKind::Paragraph),
            "IMAGE" => Ok(BlockKind::Image),
            _ => Err(()),
        }
    }
}

/// One line of document text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub kind: BlockKind,
    pub text: String,
}

impl Block {
    pub fn new(kind: BlockKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::new(BlockKind::Paragraph, text)
    }
}

/// A chapter: the blocks of one EPUB content document, in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub blocks: Vec<Block>,
}

impl Chapter {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Title used for navigation: the `TITLE` block, else the first heading
    pub fn title(&self) -> Option<&str> {
        self.blocks
            .iter()
            .find(|b| b.kind == BlockKind::Title)
            .or_else(|| self.blocks.iter().find(|b| b.kind == BlockKind::Heading1))
            .map(|b| b.text.as_str())
    }

    /// Paragraph texts in order
    pub fn paragraphs(&self) -> impl Iterator<Item = &str> {
        self.blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Paragraph)
            .map(|b| b.text.as_str())
    }
}

/// Document text: ordered chapters extracted from or destined for an EPUB
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub chapters: Vec<Chapter>,
}

impl Document {
    pub fn new(chapters: Vec<Chapter>) -> Self {
        Self { chapters }
    }

    pub fn block_count(&self) -> usize {
        self.chapters.iter().map(|c| c.blocks.len()).sum()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.chapters.iter().flat_map(|c| c.blocks.iter())
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut Block> {
        self.chapters.iter_mut().flat_map(|c| c.blocks.iter_mut())
    }
}

/// Package metadata carried from a source EPUB to the rebuilt one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl BookInfo {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Body of `POST /translate`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TranslationRequest {
    /// Text to translate, must not be blank
    pub text: String,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Successful `POST /translate` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TranslationResponse {
    pub source_text: String,
    pub translated_text: String,
}

/// `GET /health` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
}

impl HealthResponse {
    pub fn healthy(model: impl Into<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            model: model.into(),
        }
    }
}

/// Error body shared by every non-2xx response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_kind_tags_parse_back() {
        for kind in [
            BlockKind::Title,
            BlockKind::Heading1,
            BlockKind::Heading2,
            BlockKind::Heading3,
            BlockKind::Paragraph,
            BlockKind::Image,
        ] {
            assert_eq!(kind.tag().parse::<BlockKind>(), Ok(kind));
        }
        assert!("H4".parse::<BlockKind>().is_err());
    }

    #[test]
    fn test_chapter_title_prefers_title_block() {
        let chapter = Chapter::new(vec![
            Block::new(BlockKind::Heading1, "Heading"),
            Block::new(BlockKind::Title, "Title"),
        ]);
        assert_eq!(chapter.title(), Some("Title"));

        let chapter = Chapter::new(vec![Block::new(BlockKind::Heading1, "Heading")]);
        assert_eq!(chapter.title(), Some("Heading"));

        let chapter = Chapter::new(vec![Block::paragraph("text")]);
        assert_eq!(chapter.title(), None);
    }

    #[test]
    fn test_health_response_payload() {
        let health = HealthResponse::healthy("nllb");
        assert_eq!(
            serde_json::to_value(&health).unwrap(),
            serde_json::json!({"status": "healthy", "model": "nllb"})
        );
    }
}
