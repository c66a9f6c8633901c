//! Post-translation text cleanup

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

use crate::core::errors::{Result, TranslationError};

/// Consecutive blank lines kept in the output
const MAX_BLANK_RUN: usize = 2;

fn italic_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<i>(.*?)</i>").expect("valid regex"))
}

fn open_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(\w+)>").expect("valid regex"))
}

fn close_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</(\w+)>").expect("valid regex"))
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

fn dots_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\.+$").expect("valid regex"))
}

/// Clean one input line: italics become quoted dialogue, block tags break the
/// line and other markup is dropped. `<p>a</p><p>b</p>` yields two pieces.
pub fn clean_line(line: &str) -> Vec<String> {
    let line = line.trim();
    let quoted = italic_regex().replace_all(line, "\"$1\"");
    let opened = open_tag_regex().replace_all(&quoted, "<$1>\n");
    let closed = close_tag_regex().replace_all(&opened, "\n</$1>");
    let stripped = tag_regex().replace_all(&closed, "");

    let pieces: Vec<String> = stripped
        .split('\n')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(String::from)
        .collect();

    if pieces.is_empty() {
        vec![String::new()]
    } else {
        pieces
    }
}

/// Clean a whole text body. Lines that end up empty or made only of dots
/// count as blank, and runs of blank lines are capped.
pub fn clean(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut blank_run = 0;

    for cleaned in content.lines().flat_map(clean_line) {
        if cleaned.is_empty() || dots_regex().is_match(&cleaned) {
            blank_run += 1;
            if blank_run <= MAX_BLANK_RUN {
                out.push('\n');
            }
            continue;
        }

        blank_run = 0;
        out.push_str(&cleaned);
        out.push('\n');
    }

    out
}

/// Clean `input` into `output`
pub async fn clean_file(input: &Path, output: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(input)
        .await
        .map_err(|e| TranslationError::FileError {
            path: input.display().to_string(),
            message: e.to_string(),
        })?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    tokio::fs::write(output, clean(&content))
        .await
        .map_err(|e| TranslationError::FileError {
            path: output.display().to_string(),
            message: e.to_string(),
        })?;

    info!("Cleaned text saved to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_line() {
        assert_eq!(clean_line("<i>a</i> và <i>b</i>"), vec!["\"a\" và \"b\""]);
        assert_eq!(clean_line("   "), vec![""]);
    }

    #[test]
    fn test_block_tags_split_lines() {
        assert_eq!(
            clean("<p>Xin chào</p><p>Tạm biệt</p>\n"),
            "Xin chào\nTạm biệt\n"
        );
        assert_eq!(
            clean_line("  P: <i>Xin chào</i>, <b>bạn</b>  "),
            vec!["P: \"Xin chào\",", "bạn"]
        );
    }

    #[test]
    fn test_clean_caps_blank_runs_and_drops_dots() {
        let input = "P: one\n\n...\n\n<br/>\nP: two\n";
        assert_eq!(clean(input), "P: one\n\n\nP: two\n");
    }

    #[test]
    fn test_clean_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.txt");
        let output = dir.path().join("cleaned").join("out.txt");
        std::fs::write(&input, "P: <i>hi</i>\n").unwrap();

        tokio_test::block_on(clean_file(&input, &output)).unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "P: \"hi\"\n");
    }
}
