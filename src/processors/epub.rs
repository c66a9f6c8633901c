//! EPUB → text extraction

use epub::doc::EpubDoc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::config::ExtractConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{Block, BlockKind, BookInfo, Chapter, Document};
use crate::processors::markup::{extract_blocks, package_metadata, resolve_href, RawBlock};
use crate::processors::text;

/// Directory, next to the text file, that receives extracted images
pub const IMAGES_DIR: &str = "images";

/// An image pulled out of the container
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    /// Path relative to the text file, as written on the `IMAGE` line
    pub relative_path: String,
    pub data: Vec<u8>,
}

/// Result of reading one EPUB
#[derive(Debug, Clone, Default)]
pub struct ExtractedBook {
    pub info: BookInfo,
    pub document: Document,
    pub images: Vec<ExtractedImage>,
}

/// Counters reported after an extraction run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub chapters: usize,
    pub blocks: usize,
    pub images: usize,
}

/// Reads EPUB spine documents into [`Document`] text
#[derive(Debug, Clone)]
pub struct EpubExtractor {
    with_images: bool,
    min_image_width: u32,
    min_image_height: u32,
}

impl Default for EpubExtractor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EpubExtractor {
    /// Create a new extractor; `with_images` keeps `IMAGE` blocks and their bytes
    pub fn new(with_images: bool) -> Self {
        let defaults = ExtractConfig::default();
        Self {
            with_images,
            min_image_width: defaults.min_image_width,
            min_image_height: defaults.min_image_height,
        }
    }

    /// Skip images whose declared size is below `config`'s minimum
    pub fn with_image_filter(mut self, config: &ExtractConfig) -> Self {
        self.min_image_width = config.min_image_width;
        self.min_image_height = config.min_image_height;
        self
    }

    /// Find ePub files in directory
    pub fn find_epub_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(TranslationError::FileError {
                path: dir.display().to_string(),
                message: "Not a directory".to_string(),
            });
        }

        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() && is_epub(path) {
                files.push(path.to_path_buf());
            }
        }

        Ok(files)
    }

    /// Read the spine of `input` in order
    pub fn read(&self, input: &Path) -> Result<ExtractedBook> {
        debug!("Opening ePub: {}", input.display());

        let mut doc = EpubDoc::new(input).map_err(|e| TranslationError::InvalidFormat {
            format: format!("{}: {}", input.display(), e),
        })?;

        let mut book = ExtractedBook::default();
        let root_file = doc.root_file.clone();
        match doc.get_resource_by_path(&root_file) {
            Some(opf) => book.info = package_metadata(&String::from_utf8_lossy(&opf)),
            None => warn!("Package document not readable: {}", root_file.display()),
        }
        debug!(info = ?book.info, "Book metadata");

        // archive path -> relative path already assigned
        let mut seen_images: HashMap<String, String> = HashMap::new();
        // md5 of the bytes -> relative path of the first copy
        let mut seen_hashes: HashMap<String, String> = HashMap::new();

        loop {
            let current_path = doc
                .get_current_path()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();

            if let Some((content, _mime)) = doc.get_current_str() {
                let mut chapter = Chapter::default();

                for raw in extract_blocks(&content) {
                    match raw {
                        RawBlock::Text(kind, text) => chapter.blocks.push(Block::new(kind, text)),
                        RawBlock::Image(_) if !self.with_images => {}
                        RawBlock::Image(image) => {
                            if image.is_smaller_than(self.min_image_width, self.min_image_height) {
                                debug!(
                                    width = ?image.width,
                                    height = ?image.height,
                                    "Skipping small image: {}",
                                    image.src
                                );
                                continue;
                            }

                            let Some(archive_path) = resolve_href(&current_path, &image.src) else {
                                debug!("Skipping external image: {}", image.src);
                                continue;
                            };

                            if let Some(relative) = seen_images.get(&archive_path) {
                                chapter.blocks.push(Block::new(BlockKind::Image, relative.clone()));
                                continue;
                            }

                            let Some(data) = doc.get_resource_by_path(&archive_path) else {
                                warn!("Image not found in EPUB: {}. Skipping.", image.src);
                                continue;
                            };

                            let hash = format!("{:x}", md5::compute(&data));
                            if let Some(relative) = seen_hashes.get(&hash).cloned() {
                                debug!("Duplicate image {} reuses {}", archive_path, relative);
                                seen_images.insert(archive_path, relative.clone());
                                chapter.blocks.push(Block::new(BlockKind::Image, relative));
                                continue;
                            }

                            let relative = image_name(&archive_path, &seen_images);
                            seen_images.insert(archive_path, relative.clone());
                            seen_hashes.insert(hash, relative.clone());
                            chapter.blocks.push(Block::new(BlockKind::Image, relative.clone()));
                            book.images.push(ExtractedImage {
                                relative_path: relative,
                                data,
                            });
                        }
                    }
                }

                if chapter.is_empty() {
                    debug!("Skipping empty document: {}", current_path);
                } else {
                    debug!(
                        document = %current_path,
                        blocks = chapter.blocks.len(),
                        "Parsed document"
                    );
                    book.document.chapters.push(chapter);
                }
            }

            if !doc.go_next() {
                break;
            }
        }

        Ok(book)
    }

    /// Convert `input` to the text format at `output`; images land in
    /// `images/` next to `output`.
    pub async fn extract_to_text(&self, input: &Path, output: &Path) -> Result<ExtractStats> {
        info!("Extracting {} -> {}", input.display(), output.display());

        let extractor = self.clone();
        let source = input.to_path_buf();
        let book = tokio::task::spawn_blocking(move || extractor.read(&source))
            .await
            .map_err(|e| TranslationError::InternalError(e.to_string()))??;

        text::write_file(output, &book.document).await?;
        if !book.info.is_empty() {
            text::write_info(output, &book.info).await?;
        }

        let base = output.parent().unwrap_or_else(|| Path::new(""));
        for image in &book.images {
            let path = base.join(&image.relative_path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &image.data)
                .await
                .map_err(|e| TranslationError::FileError {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
        }

        let stats = ExtractStats {
            chapters: book.document.chapters.len(),
            blocks: book.document.block_count(),
            images: book.images.len(),
        };
        info!(
            chapters = stats.chapters,
            blocks = stats.blocks,
            images = stats.images,
            "Generated TXT file at {}",
            output.display()
        );

        Ok(stats)
    }
}

/// Check if file is an EPUB by extension
pub fn is_epub(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("epub"))
        .unwrap_or(false)
}

/// `images/<name>`, prefixed with a counter when another archive path
/// already took the name
fn image_name(archive_path: &str, taken: &HashMap<String, String>) -> String {
    let file_name = archive_path.rsplit('/').next().unwrap_or(archive_path);
    let candidate = format!("{}/{}", IMAGES_DIR, file_name);
    if taken.values().any(|name| *name == candidate) {
        format!("{}/{:03}-{}", IMAGES_DIR, taken.len(), file_name)
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::builder::{BookMetadata, EpubBuilder};

    fn sample_document() -> Document {
        Document::new(vec![
            Chapter::new(vec![
                Block::new(BlockKind::Title, "Chapter 1"),
                Block::new(BlockKind::Heading1, "Prologue"),
                Block::paragraph("First paragraph."),
                Block::paragraph("Second & <third>."),
            ]),
            Chapter::new(vec![
                Block::new(BlockKind::Title, "Chapter 2"),
                Block::new(BlockKind::Heading2, "Part"),
                Block::paragraph("こんにちは"),
            ]),
            Chapter::new(vec![
                Block::new(BlockKind::Title, "Afterword"),
                Block::paragraph("Fin."),
            ]),
        ])
    }

    fn write_sample_epub(dir: &Path) -> PathBuf {
        let path = dir.join("book.epub");
        EpubBuilder::new(BookMetadata::default())
            .build(&sample_document(), dir, &path)
            .unwrap();
        path
    }

    #[test]
    fn test_read_preserves_chapters_and_paragraph_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample_epub(dir.path());

        let book = EpubExtractor::default().read(&path).unwrap();
        let original = sample_document();

        assert_eq!(book.document.chapters.len(), original.chapters.len());
        for (read, expected) in book.document.chapters.iter().zip(&original.chapters) {
            assert_eq!(
                read.paragraphs().collect::<Vec<_>>(),
                expected.paragraphs().collect::<Vec<_>>()
            );
            assert_eq!(read.title(), expected.title());
        }
    }

    #[tokio::test]
    async fn test_text_roundtrip_through_epub() {
        let dir = tempfile::tempdir().unwrap();
        let epub_path = write_sample_epub(dir.path());
        let txt_path = dir.path().join("out").join("book.txt");

        let stats = EpubExtractor::default()
            .extract_to_text(&epub_path, &txt_path)
            .await
            .unwrap();
        assert_eq!(stats.chapters, 3);

        let doc = text::read_file(&txt_path, text::ChapterSplit::Blank).await.unwrap();
        let rebuilt = dir.path().join("rebuilt.epub");
        EpubBuilder::new(BookMetadata::default())
            .build(&doc, txt_path.parent().unwrap(), &rebuilt)
            .unwrap();

        let reread = EpubExtractor::default().read(&rebuilt).unwrap().document;
        assert_eq!(reread.chapters.len(), 3);
        let paragraphs: Vec<&str> = reread.chapters.iter().flat_map(|c| c.paragraphs()).collect();
        assert_eq!(
            paragraphs,
            vec!["First paragraph.", "Second & <third>.", "こんにちは", "Fin."]
        );
    }

    #[tokio::test]
    async fn test_images_are_extracted_next_to_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images").join("p001.png"), b"\x89PNG fake").unwrap();

        let doc = Document::new(vec![Chapter::new(vec![
            Block::new(BlockKind::Title, "Illustrated"),
            Block::new(BlockKind::Image, "images/p001.png"),
            Block::paragraph("Caption."),
        ])]);
        let epub_path = dir.path().join("illustrated.epub");
        EpubBuilder::new(BookMetadata::default())
            .build(&doc, dir.path(), &epub_path)
            .unwrap();

        let out_dir = dir.path().join("out");
        let txt_path = out_dir.join("illustrated.txt");
        let stats = EpubExtractor::default()
            .extract_to_text(&epub_path, &txt_path)
            .await
            .unwrap();

        assert_eq!(stats.images, 1);
        assert_eq!(
            std::fs::read(out_dir.join("images").join("p001.png")).unwrap(),
            b"\x89PNG fake"
        );
        let content = std::fs::read_to_string(&txt_path).unwrap();
        assert!(content.contains("IMAGE: images/p001.png\nP: Caption."));
    }

    #[test]
    fn test_read_without_images_drops_image_blocks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images").join("a.jpg"), b"jpeg").unwrap();

        let doc = Document::new(vec![Chapter::new(vec![
            Block::new(BlockKind::Image, "images/a.jpg"),
            Block::paragraph("Text."),
        ])]);
        let epub_path = dir.path().join("book.epub");
        EpubBuilder::new(BookMetadata::default())
            .build(&doc, dir.path(), &epub_path)
            .unwrap();

        let book = EpubExtractor::new(false).read(&epub_path).unwrap();
        assert!(book.images.is_empty());
        assert!(book.document.blocks().all(|b| b.kind != BlockKind::Image));
    }

    #[test]
    fn test_read_invalid_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.epub");
        std::fs::write(&path, b"not a zip").unwrap();

        assert!(matches!(
            EpubExtractor::default().read(&path),
            Err(TranslationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_find_epub_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("a.epub"), b"").unwrap();
        std::fs::write(dir.path().join("nested").join("b.EPUB"), b"").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"").unwrap();

        let files = EpubExtractor::default().find_epub_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(EpubExtractor::default().find_epub_files(&dir.path().join("c.txt")).is_err());
    }

    /// Hand-written container with sized `<img>` tags, which the builder never emits
    fn write_sized_image_epub(path: &Path) {
        use std::io::Write;
        use zip::write::FileOptions;

        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let stored = FileOptions::default().compression_method(zip::CompressionMethod::Stored);

        let entries: [(&str, &[u8]); 7] = [
            ("mimetype", b"application/epub+zip"),
            (
                "META-INF/container.xml",
                br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
            ),
            (
                "OEBPS/content.opf",
                br#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="id">urn:uuid:sized</dc:identifier>
    <dc:title>Sized</dc:title>
    <dc:language>ja</dc:language>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="c1" href="c1.xhtml" media-type="application/xhtml+xml"/>
    <item id="i1" href="icon.png" media-type="image/png"/>
    <item id="i2" href="big.png" media-type="image/png"/>
  </manifest>
  <spine toc="ncx"><itemref idref="c1"/></spine>
</package>"#,
            ),
            (
                "OEBPS/toc.ncx",
                br#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head/><docTitle><text>Sized</text></docTitle>
  <navMap><navPoint id="n1" playOrder="1"><navLabel><text>One</text></navLabel><content src="c1.xhtml"/></navPoint></navMap>
</ncx>"#,
            ),
            (
                "OEBPS/c1.xhtml",
                br#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>One</title></head>
<body>
  <p><img src="icon.png" width="16" height="16" alt=""/>Hello</p>
  <p><img src="big.png" width="600px" height="800px" alt=""/></p>
</body></html>"#,
            ),
            ("OEBPS/icon.png", b"small png"),
            ("OEBPS/big.png", b"big png"),
        ];

        for (name, data) in entries {
            zip.start_file(name, stored).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_small_images_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sized.epub");
        write_sized_image_epub(&path);

        let book = EpubExtractor::default().read(&path).unwrap();
        assert_eq!(book.images.len(), 1);
        assert_eq!(book.images[0].relative_path, "images/big.png");
        let texts: Vec<&str> = book.document.blocks().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, vec!["One", "Hello", "images/big.png"]);

        let unfiltered = EpubExtractor::default()
            .with_image_filter(&ExtractConfig {
                min_image_width: 0,
                min_image_height: 0,
            })
            .read(&path)
            .unwrap();
        assert_eq!(unfiltered.images.len(), 2);
    }

    #[test]
    fn test_identical_images_are_written_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images").join("a.png"), b"same bytes").unwrap();
        std::fs::write(dir.path().join("images").join("b.png"), b"same bytes").unwrap();

        let doc = Document::new(vec![Chapter::new(vec![
            Block::new(BlockKind::Image, "images/a.png"),
            Block::paragraph("Between."),
            Block::new(BlockKind::Image, "images/b.png"),
        ])]);
        let epub_path = dir.path().join("dupes.epub");
        EpubBuilder::new(BookMetadata::default())
            .build(&doc, dir.path(), &epub_path)
            .unwrap();

        let book = EpubExtractor::default().read(&epub_path).unwrap();
        assert_eq!(book.images.len(), 1);
        let images: Vec<&str> = book
            .document
            .blocks()
            .filter(|b| b.kind == BlockKind::Image)
            .map(|b| b.text.as_str())
            .collect();
        assert_eq!(images, vec!["images/a.png", "images/a.png"]);
    }

    #[tokio::test]
    async fn test_metadata_is_read_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let epub_path = dir.path().join("meta.epub");
        let metadata = BookMetadata {
            title: "魔法の本".to_string(),
            author: "山田 太郎".to_string(),
            language: "ja".to_string(),
            publisher: Some("文庫".to_string()),
            ..BookMetadata::default()
        };
        EpubBuilder::new(metadata)
            .build(&sample_document(), dir.path(), &epub_path)
            .unwrap();

        let txt_path = dir.path().join("out").join("meta.txt");
        EpubExtractor::default()
            .extract_to_text(&epub_path, &txt_path)
            .await
            .unwrap();

        let info = text::read_info(&txt_path).await.unwrap().unwrap();
        assert_eq!(info.title.as_deref(), Some("魔法の本"));
        assert_eq!(info.creator.as_deref(), Some("山田 太郎"));
        assert_eq!(info.language.as_deref(), Some("ja"));
        assert_eq!(info.publisher.as_deref(), Some("文庫"));
        assert_eq!(info.date, None);
    }

    #[test]
    fn test_image_name_dedupes() {
        let mut taken = HashMap::new();
        assert_eq!(image_name("OEBPS/Images/a.jpg", &taken), "images/a.jpg");

        taken.insert("OEBPS/Images/a.jpg".to_string(), "images/a.jpg".to_string());
        assert_eq!(image_name("OEBPS/Images/b.jpg", &taken), "images/b.jpg");
        assert_eq!(image_name("OEBPS/Other/a.jpg", &taken), "images/001-a.jpg");
    }
}
