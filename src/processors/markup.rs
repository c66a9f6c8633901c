//! Regex-based XHTML helpers shared by the EPUB reader and writer

use regex::{Captures, Regex};
use std::sync::OnceLock;

use crate::core::models::{BlockKind, BookInfo};

/// An `<img>`/`<image>` reference as written in the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// `src` / `xlink:href` value
    pub src: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ImageRef {
    /// Whether a declared dimension falls below the minimum. Undeclared
    /// dimensions never count as too small.
    pub fn is_smaller_than(&self, min_width: u32, min_height: u32) -> bool {
        self.width.is_some_and(|w| w < min_width) || self.height.is_some_and(|h| h < min_height)
    }
}

/// A block found in a content document, before image paths are resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawBlock {
    Text(BlockKind, String),
    Image(ImageRef),
}

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("valid regex"))
        }
    };
}

static_regex!(
    block_regex,
    r"(?is)<(title|h[1-3]|p)\b[^>]*>(.*?)</(?:title|h[1-3]|p)\s*>|<(?:img|image)\b[^>]*>"
);
static_regex!(image_regex, r"(?is)<(?:img|image)\b[^>]*>");
static_regex!(
    image_src_regex,
    r#"(?is)\s(?:src|xlink:href|href)\s*=\s*["']([^"']+)["']"#
);
static_regex!(
    image_width_regex,
    r#"(?is)\s(?:data-)?width\s*=\s*["']([^"']+)["']"#
);
static_regex!(
    image_height_regex,
    r#"(?is)\s(?:data-)?height\s*=\s*["']([^"']+)["']"#
);
static_regex!(
    dc_regex,
    r"(?is)<dc:(title|creator|publisher|date|language)\b[^>]*>(.*?)</dc:(?:title|creator|publisher|date|language)\s*>"
);
static_regex!(ruby_regex, r"(?is)<(rt|rp)\b[^>]*>.*?</(?:rt|rp)\s*>");
static_regex!(break_regex, r"(?i)<br\b[^>]*>");
static_regex!(tag_regex, r"(?s)<[^>]*>");
static_regex!(entity_regex, r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);");

/// Walk a content document and return its title, headings, paragraphs and
/// images in document order. Blocks with no text are dropped.
pub fn extract_blocks(html: &str) -> Vec<RawBlock> {
    let mut blocks = Vec::new();

    for caps in block_regex().captures_iter(html) {
        let Some(tag) = caps.get(1) else {
            if let Some(image) = image_ref(&caps[0]) {
                blocks.push(RawBlock::Image(image));
            }
            continue;
        };

        let kind = match tag.as_str().to_ascii_lowercase().as_str() {
            "title" => BlockKind::Title,
            "h1" => BlockKind::Heading1,
            "h2" => BlockKind::Heading2,
            "h3" => BlockKind::Heading3,
            _ => BlockKind::Paragraph,
        };

        let inner = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

        // Illustrations usually sit inside a paragraph of their own
        for image in image_regex().find_iter(inner) {
            if let Some(image) = image_ref(image.as_str()) {
                blocks.push(RawBlock::Image(image));
            }
        }

        let text = inner_text(inner);
        if !text.is_empty() {
            blocks.push(RawBlock::Text(kind, text));
        }
    }

    blocks
}

fn image_ref(tag: &str) -> Option<ImageRef> {
    let src = image_src_regex()
        .captures(tag)
        .map(|caps| decode_entities(caps[1].trim()))
        .filter(|src| !src.is_empty())?;

    Some(ImageRef {
        src,
        width: dimension(image_width_regex(), tag),
        height: dimension(image_height_regex(), tag),
    })
}

/// `"300"`, `"300px"` or `"300.5"`; percentages and junk are ignored
fn dimension(re: &Regex, tag: &str) -> Option<u32> {
    let caps = re.captures(tag)?;
    let value = caps[1].trim();
    let value = value.strip_suffix("px").unwrap_or(value).trim();
    let parsed: f64 = value.parse().ok()?;
    (parsed.is_finite() && parsed >= 0.0).then(|| parsed as u32)
}

/// Dublin Core fields of an OPF package document; the first occurrence of
/// each field wins
pub fn package_metadata(opf: &str) -> BookInfo {
    let mut info = BookInfo::default();

    for caps in dc_regex().captures_iter(opf) {
        let value = inner_text(&caps[2]);
        if value.is_empty() {
            continue;
        }
        let slot = match caps[1].to_ascii_lowercase().as_str() {
            "title" => &mut info.title,
            "creator" => &mut info.creator,
            "publisher" => &mut info.publisher,
            "date" => &mut info.date,
            _ => &mut info.language,
        };
        slot.get_or_insert(value);
    }

    info
}

/// Plain text of an XHTML fragment. Ruby readings are dropped, `<br>` becomes
/// a space, other tags are removed without a gap so CJK text stays joined.
pub fn inner_text(fragment: &str) -> String {
    let without_ruby = ruby_regex().replace_all(fragment, "");
    let with_breaks = break_regex().replace_all(&without_ruby, " ");
    let without_tags = tag_regex().replace_all(&with_breaks, "");
    let decoded = decode_entities(&without_tags);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode numeric and common named character references
pub fn decode_entities(text: &str) -> String {
    entity_regex()
        .replace_all(text, |caps: &Captures| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(entity)
            };

            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "copy" => '©',
        _ => return None,
    };
    Some(c)
}

/// Escape text for XML element content and attribute values
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Resolve an `href` found in the document at `base` (an archive path such as
/// `OEBPS/Text/ch1.xhtml`) to an archive path. External and inline references
/// return `None`.
pub fn resolve_href(base: &str, href: &str) -> Option<String> {
    let href = href.split(['#', '?']).next().unwrap_or_default();
    if href.is_empty() || href.contains("://") || href.starts_with("data:") {
        return None;
    }

    let mut parts: Vec<&str> = if href.starts_with('/') {
        Vec::new()
    } else {
        let mut dir: Vec<&str> = base.split('/').collect();
        dir.pop();
        dir
    };

    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    Some(parts.into_iter().filter(|p| !p.is_empty()).collect::<Vec<_>>().join("/"))
}
