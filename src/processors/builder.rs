//! Text → EPUB packaging
//!
//! Writes a minimal EPUB 3 container with an NCX for older readers:
//!
//! ```text
//! mimetype                      (stored, first entry)
//! META-INF/container.xml
//! OEBPS/content.opf
//! OEBPS/nav.xhtml
//! OEBPS/toc.ncx
//! OEBPS/style/nav.css
//! OEBPS/text/chapter_0001.xhtml
//! OEBPS/images/...
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{BlockKind, Chapter, Document};
use crate::processors::markup::escape_xml;

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

const STYLESHEET: &str = r#"@page { margin: 0px; }
h1 {
    font-size: 2em;
    font-weight: bold;
    text-align: left;
    margin-top: 2em;
    page-break-before: always;
}
div.image { text-align: center; }
div.image img { max-width: 100%; }
"#;

/// Package metadata written into the OPF
#[derive(Debug, Clone)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    pub language: String,
    /// `urn:uuid:` identifier; generated when `None`
    pub identifier: Option<String>,
    pub publisher: Option<String>,
    pub date: Option<String>,
}

impl Default for BookMetadata {
    fn default() -> Self {
        Self {
            title: "Untitled".to_string(),
            author: "Unknown".to_string(),
            language: "vi".to_string(),
            identifier: None,
            publisher: None,
            date: None,
        }
    }
}

/// Counters reported after a build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub chapters: usize,
    pub images: usize,
}

struct EmbeddedImage {
    /// Path relative to `OEBPS/`
    href: String,
    media_type: &'static str,
    data: Vec<u8>,
}

/// Packages a [`Document`] as an EPUB
#[derive(Debug, Clone)]
pub struct EpubBuilder {
    metadata: BookMetadata,
}

impl EpubBuilder {
    pub fn new(metadata: BookMetadata) -> Self {
        Self { metadata }
    }

    /// Write `document` to `output`. `IMAGE` paths are resolved against
    /// `image_root`; missing images are skipped with a warning.
    pub fn build(&self, document: &Document, image_root: &Path, output: &Path) -> Result<BuildStats> {
        if document.chapters.iter().all(Chapter::is_empty) {
            return Err(TranslationError::InvalidFormat {
                format: "document has no chapters".to_string(),
            });
        }

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(output).map_err(|e| TranslationError::FileError {
            path: output.display().to_string(),
            message: e.to_string(),
        })?;

        let stats = self.write(document, image_root, file)?;
        info!(
            chapters = stats.chapters,
            images = stats.images,
            "eBook created successfully: {}",
            output.display()
        );
        Ok(stats)
    }

    /// Write the container to any seekable sink
    pub fn write<W: Write + Seek>(
        &self,
        document: &Document,
        image_root: &Path,
        writer: W,
    ) -> Result<BuildStats> {
        let chapters: Vec<&Chapter> = document.chapters.iter().filter(|c| !c.is_empty()).collect();
        let (images, image_hrefs) = collect_images(&chapters, image_root);

        let identifier = self
            .metadata
            .identifier
            .clone()
            .unwrap_or_else(|| format!("urn:uuid:{}", uuid::Uuid::new_v4()));

        let mut zip = ZipWriter::new(writer);
        let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

        // Readers sniff the first entry, it must be uncompressed
        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(CONTAINER_XML.as_bytes())?;

        zip.start_file("OEBPS/content.opf", deflated)?;
        zip.write_all(self.package_document(&identifier, chapters.len(), &images).as_bytes())?;

        zip.start_file("OEBPS/nav.xhtml", deflated)?;
        zip.write_all(self.nav_document(&chapters).as_bytes())?;

        zip.start_file("OEBPS/toc.ncx", deflated)?;
        zip.write_all(self.ncx_document(&identifier, &chapters).as_bytes())?;

        zip.start_file("OEBPS/style/nav.css", deflated)?;
        zip.write_all(STYLESHEET.as_bytes())?;

        for (index, chapter) in chapters.iter().enumerate() {
            let name = format!("OEBPS/text/{}.xhtml", chapter_id(index));
            debug!("Writing {}", name);
            zip.start_file(name, deflated)?;
            zip.write_all(self.chapter_document(index, chapter, &image_hrefs).as_bytes())?;
        }

        for image in &images {
            zip.start_file(format!("OEBPS/{}", image.href), deflated)?;
            zip.write_all(&image.data)?;
        }

        zip.finish()?;

        Ok(BuildStats {
            chapters: chapters.len(),
            images: images.len(),
        })
    }

    fn package_document(
        &self,
        identifier: &str,
        chapter_count: usize,
        images: &[EmbeddedImage],
    ) -> String {
        let modified = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let lang = escape_xml(&self.metadata.language);

        let mut manifest = String::from(
            "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n\
             \x20   <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n\
             \x20   <item id=\"style_nav\" href=\"style/nav.css\" media-type=\"text/css\"/>\n",
        );
        let mut spine = String::new();

        let mut optional = String::new();
        if let Some(publisher) = &self.metadata.publisher {
            optional.push_str(&format!("    <dc:publisher>{}</dc:publisher>\n", escape_xml(publisher)));
        }
        if let Some(date) = &self.metadata.date {
            optional.push_str(&format!("    <dc:date>{}</dc:date>\n", escape_xml(date)));
        }

        for index in 0..chapter_count {
            let id = chapter_id(index);
            manifest.push_str(&format!(
                "    <item id=\"{id}\" href=\"text/{id}.xhtml\" media-type=\"application/xhtml+xml\"/>\n"
            ));
            spine.push_str(&format!("    <itemref idref=\"{id}\"/>\n"));
        }

        for (index, image) in images.iter().enumerate() {
            manifest.push_str(&format!(
                "    <item id=\"image_{:04}\" href=\"{}\" media-type=\"{}\"/>\n",
                index + 1,
                escape_xml(&image.href),
                image.media_type
            ));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="book-id" xml:lang="{lang}">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{identifier}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:language>{lang}</dc:language>
    <dc:creator>{author}</dc:creator>
{optional}    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
            identifier = escape_xml(identifier),
            title = escape_xml(&self.metadata.title),
            author = escape_xml(&self.metadata.author),
        )
    }

    fn nav_document(&self, chapters: &[&Chapter]) -> String {
        let mut items = String::new();
        for (index, chapter) in chapters.iter().enumerate() {
            items.push_str(&format!(
                "      <li><a href=\"text/{}.xhtml\">{}</a></li>\n",
                chapter_id(index),
                escape_xml(&chapter_label(index, chapter))
            ));
        }

        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <title>{title}</title>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <ol>
{items}    </ol>
  </nav>
</body>
</html>
"#,
            title = escape_xml(&self.metadata.title),
        )
    }

    fn ncx_document(&self, identifier: &str, chapters: &[&Chapter]) -> String {
        let mut points = String::new();
        for (index, chapter) in chapters.iter().enumerate() {
            points.push_str(&format!(
                "    <navPoint id=\"navpoint_{n}\" playOrder=\"{n}\">\n\
                 \x20     <navLabel><text>{label}</text></navLabel>\n\
                 \x20     <content src=\"text/{id}.xhtml\"/>\n\
                 \x20   </navPoint>\n",
                n = index + 1,
                label = escape_xml(&chapter_label(index, chapter)),
                id = chapter_id(index),
            ));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{identifier}"/>
  </head>
  <docTitle><text>{title}</text></docTitle>
  <navMap>
{points}  </navMap>
</ncx>
"#,
            identifier = escape_xml(identifier),
            title = escape_xml(&self.metadata.title),
        )
    }

    fn chapter_document(
        &self,
        index: usize,
        chapter: &Chapter,
        image_hrefs: &HashMap<String, String>,
    ) -> String {
        let mut body = String::new();

        let titles = chapter.blocks.iter().filter(|b| b.kind == BlockKind::Title).count();
        if titles > 1 {
            warn!(
                chapter = index + 1,
                "{} TITLE blocks in one chapter, only the first is used",
                titles
            );
        }

        for block in &chapter.blocks {
            let text = escape_xml(&block.text);
            match block.kind {
                // Goes into <head>
                BlockKind::Title => {}
                BlockKind::Heading1 => body.push_str(&format!("  <h1>{}</h1>\n", text)),
                BlockKind::Heading2 => body.push_str(&format!("  <h2>{}</h2>\n", text)),
                BlockKind::Heading3 => body.push_str(&format!("  <h3>{}</h3>\n", text)),
                BlockKind::Paragraph => body.push_str(&format!("  <p>{}</p>\n", text)),
                BlockKind::Image => {
                    if let Some(href) = image_hrefs.get(&block.text) {
                        body.push_str(&format!(
                            "  <div class=\"image\"><img src=\"../{}\" alt=\"\"/></div>\n",
                            escape_xml(href)
                        ));
                    }
                }
            }
        }

        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="../style/nav.css"/>
</head>
<body>
{body}</body>
</html>
"#,
            lang = escape_xml(&self.metadata.language),
            title = escape_xml(&chapter_label(index, chapter)),
        )
    }
}

fn chapter_id(index: usize) -> String {
    format!("chapter_{:04}", index + 1)
}

fn chapter_label(index: usize, chapter: &Chapter) -> String {
    chapter
        .title()
        .map(str::to_string)
        .unwrap_or_else(|| format!("Chapter {}", index + 1))
}

/// Load every image referenced by an `IMAGE` block once. Returns the images
/// and a map from the block text to the href inside `OEBPS/`.
fn collect_images(
    chapters: &[&Chapter],
    image_root: &Path,
) -> (Vec<EmbeddedImage>, HashMap<String, String>) {
    let mut images = Vec::new();
    let mut hrefs: HashMap<String, String> = HashMap::new();

    for block in chapters
        .iter()
        .flat_map(|c| c.blocks.iter())
        .filter(|b| b.kind == BlockKind::Image)
    {
        if hrefs.contains_key(&block.text) {
            continue;
        }

        let Some(media_type) = image_media_type(&block.text) else {
            warn!("Unsupported image type, skipping: {}", block.text);
            continue;
        };

        let path = image_root.join(&block.text);
        match std::fs::read(&path) {
            Ok(data) => {
                let file_name = Path::new(&block.text)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| block.text.clone());
                let mut href = format!("images/{}", file_name);
                if hrefs.values().any(|taken| *taken == href) {
                    href = format!("images/{:03}-{}", images.len(), file_name);
                }
                hrefs.insert(block.text.clone(), href.clone());
                images.push(EmbeddedImage {
                    href,
                    media_type,
                    data,
                });
            }
            Err(e) => warn!("Image not found: {} ({})", path.display(), e),
        }
    }

    (images, hrefs)
}

fn image_media_type(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_string_lossy().to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "svg" => Some("image/svg+xml"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
