//! Markdown-aware chunking.
//!
//! Splits at headers (up to a configurable level), packs sections up to
//! the target size, and splits oversized sections at paragraph
//! boundaries. Fenced code blocks, tables, and lists are atomic when
//! the corresponding preserve flag is set — an atomic element larger
//! than the target stays in one oversize chunk rather than being cut.
//! Markdown chunks carry no overlap.

use anyhow::{bail, Result};

use crate::config::{ChunkingConfig, MarkdownConfig};
use crate::models::{Document, DocumentChunk};

use super::{advance_chars, make_chunk, text_density, ChunkingStrategy};

pub struct MarkdownAwareChunking {
    target_size: usize,
    min_size: usize,
    options: MarkdownConfig,
    preserve_metadata: bool,
}

/// A header-delimited region of the document. The text before the
/// first header forms an untitled preamble section.
#[derive(Debug)]
struct Section {
    start: usize,
    end: usize,
    title: Option<String>,
    level: usize,
}

fn header_level(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ') {
        Some((hashes, trimmed[hashes..].trim()))
    } else {
        None
    }
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 1 && t.starts_with('|') && t.ends_with('|')
}

fn is_list_item(line: &str) -> bool {
    let t = line.trim_start();
    if t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ") {
        return true;
    }
    let digits = t.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && (t[digits..].starts_with(". ") || t[digits..].starts_with(") "))
}

fn has_markdown_features(content: &str) -> bool {
    content.lines().any(|line| {
        is_fence(line) || header_level(line).is_some() || is_table_row(line) || is_list_item(line)
    })
}

impl MarkdownAwareChunking {
    pub fn new(target_size: usize, min_size: usize, options: MarkdownConfig) -> Result<Self> {
        if target_size == 0 {
            bail!("markdown-aware chunking requires a positive target_size");
        }
        if min_size >= target_size {
            bail!(
                "markdown-aware min_size ({min_size}) must be smaller than target_size ({target_size})"
            );
        }
        if !(1..=6).contains(&options.max_header_level) {
            bail!("markdown-aware max_header_level must be in [1, 6]");
        }
        Ok(Self {
            target_size,
            min_size,
            options,
            preserve_metadata: true,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        let mut strategy = Self::new(
            config.target_chunk_size,
            config.min_chunk_size,
            config.markdown.clone(),
        )?;
        strategy.preserve_metadata = config.preserve_metadata;
        Ok(strategy)
    }

    /// Split the content at headers up to `max_header_level`, ignoring
    /// header-lookalikes inside code fences.
    fn split_sections(&self, content: &str) -> Vec<Section> {
        let mut headers: Vec<(usize, usize, String)> = Vec::new();
        if self.options.respect_headers {
            let mut in_fence = false;
            let mut offset = 0usize;
            for line in content.split_inclusive('\n') {
                let line_start = offset;
                offset += line.len();
                if is_fence(line) {
                    in_fence = !in_fence;
                    continue;
                }
                if in_fence {
                    continue;
                }
                if let Some((level, title)) = header_level(line) {
                    if level <= self.options.max_header_level {
                        headers.push((line_start, level, title.to_string()));
                    }
                }
            }
        }

        if headers.is_empty() {
            return vec![Section {
                start: 0,
                end: content.len(),
                title: None,
                level: 0,
            }];
        }

        let mut sections = Vec::new();
        if headers[0].0 > 0 {
            sections.push(Section {
                start: 0,
                end: headers[0].0,
                title: None,
                level: 0,
            });
        }
        for (i, (start, level, title)) in headers.iter().enumerate() {
            let end = headers.get(i + 1).map(|h| h.0).unwrap_or(content.len());
            sections.push(Section {
                start: *start,
                end,
                title: Some(title.clone()),
                level: *level,
            });
        }
        sections
    }

    /// Paragraph byte ranges within `[start, end)`, splitting at blank
    /// lines outside code fences. Blank runs attach to the preceding
    /// paragraph so the ranges partition the region.
    fn paragraph_ranges(&self, content: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut para_start = start;
        let mut in_fence = false;
        let mut prev_blank = false;
        let mut offset = start;

        for line in content[start..end].split_inclusive('\n') {
            let line_start = offset;
            offset += line.len();
            if self.options.preserve_code_blocks && is_fence(line) {
                // an opening fence after a blank run starts its own
                // paragraph, keeping the block separable from prose
                if !in_fence && prev_blank && line_start > para_start {
                    ranges.push((para_start, line_start));
                    para_start = line_start;
                }
                in_fence = !in_fence;
                prev_blank = false;
                continue;
            }
            if in_fence {
                prev_blank = false;
                continue;
            }
            if line.trim().is_empty() {
                prev_blank = true;
                continue;
            }
            if prev_blank && line_start > para_start {
                ranges.push((para_start, line_start));
                para_start = line_start;
            }
            prev_blank = false;
        }
        if para_start < end {
            ranges.push((para_start, end));
        }
        ranges
    }

    fn is_protected(&self, content: &str, start: usize) -> bool {
        let first_line = content[start..].lines().next().unwrap_or("");
        (self.options.preserve_code_blocks && is_fence(first_line))
            || (self.options.preserve_tables && is_table_row(first_line))
            || (self.options.preserve_lists && is_list_item(first_line))
    }

    /// Split an oversized region at paragraph boundaries; hard-split
    /// unprotected paragraphs that alone exceed the target.
    fn split_oversized(&self, content: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
        let mut pieces = Vec::new();
        let mut piece_start = start;
        let mut piece_len = 0usize;

        for (para_start, para_end) in self.paragraph_ranges(content, start, end) {
            let para_len = para_end - para_start;
            if piece_len >= self.min_size && piece_len + para_len > self.target_size {
                pieces.push((piece_start, para_start));
                piece_start = para_start;
                piece_len = 0;
            }
            if para_len > self.target_size && !self.is_protected(content, para_start) {
                // hard split, folding any pending short piece into the
                // first window
                let mut p = piece_start;
                while p < para_end {
                    let q = advance_chars(content, p, self.target_size).min(para_end);
                    pieces.push((p, q));
                    p = q;
                }
                piece_start = para_end;
                piece_len = 0;
                continue;
            }
            piece_len += para_len;
        }
        if piece_len > 0 {
            pieces.push((piece_start, end));
        } else if piece_start < end {
            match pieces.last_mut() {
                Some(last) => last.1 = end,
                None => pieces.push((piece_start, end)),
            }
        }
        pieces
    }

    fn chunk_quality(&self, text: &str, has_title: bool) -> f64 {
        let chars = text.chars().count() as f64;
        let size_fit =
            (1.0 - (chars - self.target_size as f64).abs() / self.target_size as f64).clamp(0.0, 1.0);
        let structure = if has_title { 1.0 } else { 0.6 };
        0.4 * size_fit + 0.3 * structure + 0.3 * text_density(text)
    }
}

impl ChunkingStrategy for MarkdownAwareChunking {
    fn chunk(&self, document: &Document) -> Result<Vec<DocumentChunk>> {
        let content = &document.content;
        if content.is_empty() {
            return Ok(Vec::new());
        }

        let sections = self.split_sections(content);

        // pack adjacent sections up to the target size
        let mut ranges: Vec<(usize, usize, Option<String>, usize)> = Vec::new();
        let mut start = sections[0].start;
        let mut end = sections[0].end;
        let mut title = sections[0].title.clone();
        let mut level = sections[0].level;
        for section in &sections[1..] {
            let section_len = section.end - section.start;
            if (end - start) + section_len > self.target_size && (end - start) >= self.min_size {
                ranges.push((start, end, title.take(), level));
                start = section.start;
                end = section.end;
                title = section.title.clone();
                level = section.level;
            } else {
                end = section.end;
                if title.is_none() {
                    title = section.title.clone();
                    level = section.level;
                }
            }
        }
        ranges.push((start, end, title, level));

        let mut chunks = Vec::new();
        for (range_start, range_end, range_title, range_level) in ranges {
            let pieces = if range_end - range_start > self.target_size {
                self.split_oversized(content, range_start, range_end)
            } else {
                vec![(range_start, range_end)]
            };
            for (piece_start, piece_end) in pieces {
                let quality =
                    self.chunk_quality(&content[piece_start..piece_end], range_title.is_some());
                let mut chunk = make_chunk(
                    document,
                    chunks.len(),
                    piece_start,
                    piece_end,
                    self.name(),
                    Some(quality),
                    self.preserve_metadata,
                );
                if let Some(section_title) = &range_title {
                    chunk
                        .metadata
                        .insert("section_title".to_string(), section_title.clone());
                    chunk
                        .metadata
                        .insert("header_level".to_string(), range_level.to_string());
                }
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    fn chunk_size(&self) -> usize {
        self.target_size
    }

    fn overlap_size(&self) -> usize {
        0
    }

    fn min_chunk_size(&self) -> usize {
        self.min_size
    }

    fn name(&self) -> &'static str {
        "markdown_aware"
    }

    fn description(&self) -> String {
        format!(
            "Header-aligned sections packed to {} chars (headers up to level {})",
            self.target_size, self.options.max_header_level
        )
    }

    fn estimate_quality(&self, document: &Document) -> f64 {
        let content = &document.content;
        if content.is_empty() {
            return 0.0;
        }
        let sections = self.split_sections(content);
        let has_headers = sections.iter().any(|s| s.title.is_some());
        let has_code = content.lines().any(is_fence);

        let structure = (sections.len() as f64 / 10.0).min(1.0);
        let header_score = if has_headers { 1.0 } else { 0.3 };
        let code_score = if has_code && self.options.preserve_code_blocks {
            1.0
        } else {
            0.8
        };
        let chars = content.chars().count() as f64;
        let length_score = (chars / self.target_size as f64).min(1.0);

        structure * 0.3 + header_score * 0.3 + code_score * 0.2 + length_score * 0.2
    }

    fn is_suitable_for(&self, document: &Document) -> bool {
        document.content.chars().count() >= 500 && has_markdown_features(&document.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentType;

    fn doc(content: &str) -> Document {
        Document::new(content, DocumentType::Markdown).with_id("doc1")
    }

    fn sample_doc() -> String {
        let mut s = String::from("Intro paragraph before any header.\n\n");
        for i in 0..8 {
            s.push_str(&format!("## Section {i}\n\n"));
            s.push_str(&format!("Body of section {i}. ").repeat(10).as_str());
            s.push_str("\n\n");
        }
        s
    }

    #[test]
    fn test_empty_content_yields_no_chunks() {
        let strategy = MarkdownAwareChunking::new(800, 150, MarkdownConfig::default()).unwrap();
        assert!(strategy.chunk(&doc("")).unwrap().is_empty());
    }

    #[test]
    fn test_chunks_start_at_headers() {
        let content = sample_doc();
        let strategy = MarkdownAwareChunking::new(400, 100, MarkdownConfig::default()).unwrap();
        let chunks = strategy.chunk(&doc(&content)).unwrap();

        assert!(chunks.len() > 1);
        // every chunk after the preamble starts on a header line
        for c in &chunks[1..] {
            assert!(
                c.content.trim_start().starts_with("##"),
                "chunk does not start at a header: {:?}",
                &c.content[..40.min(c.content.len())]
            );
        }
    }

    #[test]
    fn test_preamble_is_covered() {
        let content = sample_doc();
        let strategy = MarkdownAwareChunking::new(400, 100, MarkdownConfig::default()).unwrap();
        let chunks = strategy.chunk(&doc(&content)).unwrap();
        assert_eq!(chunks[0].start_offset, 0);
        assert!(chunks[0].content.starts_with("Intro paragraph"));
    }

    #[test]
    fn test_coverage_without_gaps() {
        let content = sample_doc();
        let strategy = MarkdownAwareChunking::new(500, 100, MarkdownConfig::default()).unwrap();
        let chunks = strategy.chunk(&doc(&content)).unwrap();

        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks.last().unwrap().end_offset, content.len());
        for pair in chunks.windows(2) {
            assert_eq!(
                pair[1].start_offset, pair[0].end_offset,
                "markdown chunks must tile the content"
            );
        }
    }

    #[test]
    fn test_section_titles_recorded() {
        let content = sample_doc();
        let strategy = MarkdownAwareChunking::new(400, 100, MarkdownConfig::default()).unwrap();
        let chunks = strategy.chunk(&doc(&content)).unwrap();
        let titled = chunks
            .iter()
            .filter(|c| c.metadata.contains_key("section_title"))
            .count();
        assert!(titled > 0);
        assert!(chunks
            .iter()
            .any(|c| c.metadata.get("section_title").map(String::as_str) == Some("Section 0")));
    }

    #[test]
    fn test_code_fence_stays_whole() {
        let fence_body = "let x = compute();\n".repeat(40);
        let content = format!(
            "# Top\n\nShort intro.\n\n```rust\n{fence_body}```\n\nAfter the code.\n"
        );
        let strategy = MarkdownAwareChunking::new(300, 50, MarkdownConfig::default()).unwrap();
        let chunks = strategy.chunk(&doc(&content)).unwrap();

        let with_fence: Vec<_> = chunks.iter().filter(|c| c.content.contains("```")).collect();
        for c in &with_fence {
            assert_eq!(
                c.content.matches("```").count() % 2,
                0,
                "a code fence was split across chunks"
            );
        }
    }

    #[test]
    fn test_headers_inside_fences_are_ignored() {
        let content = format!(
            "# Real\n\n{}\n```text\n# not a header\n```\n{}\n",
            "Filler sentence here. ".repeat(20),
            "More filler text. ".repeat(20)
        );
        let strategy = MarkdownAwareChunking::new(2000, 100, MarkdownConfig::default()).unwrap();
        let chunks = strategy.chunk(&doc(&content)).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_deep_headers_do_not_split() {
        let content = format!(
            "# Top\n\n{}\n\n#### Deep heading\n\n{}",
            "Some text. ".repeat(30),
            "More text. ".repeat(30)
        );
        let options = MarkdownConfig {
            max_header_level: 3,
            ..MarkdownConfig::default()
        };
        let strategy = MarkdownAwareChunking::new(2000, 100, options).unwrap();
        let chunks = strategy.chunk(&doc(&content)).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_headerless_text_splits_on_paragraphs() {
        let content = (0..12)
            .map(|i| format!("Paragraph {i} with enough words to matter. ").repeat(3))
            .collect::<Vec<_>>()
            .join("\n\n");
        let strategy = MarkdownAwareChunking::new(400, 100, MarkdownConfig::default()).unwrap();
        let chunks = strategy.chunk(&doc(&content)).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(chunks.last().unwrap().end_offset, content.len());
    }

    #[test]
    fn test_deterministic_output() {
        let content = sample_doc();
        let strategy = MarkdownAwareChunking::new(500, 100, MarkdownConfig::default()).unwrap();
        assert_eq!(
            strategy.chunk(&doc(&content)).unwrap(),
            strategy.chunk(&doc(&content)).unwrap()
        );
    }

    #[test]
    fn test_suitability_requires_markdown_features() {
        let strategy = MarkdownAwareChunking::new(800, 150, MarkdownConfig::default()).unwrap();
        assert!(strategy.is_suitable_for(&doc(&sample_doc())));
        assert!(!strategy.is_suitable_for(&doc(&"plain text without structure ".repeat(30))));
        assert!(!strategy.is_suitable_for(&doc("# Short\n\ntiny")));
    }

    #[test]
    fn test_feature_detection_per_element() {
        assert!(has_markdown_features("# heading\n"));
        assert!(has_markdown_features("```\ncode only\n```\n"));
        assert!(has_markdown_features("| a | b |\n"));
        assert!(has_markdown_features("- item\n"));
        assert!(has_markdown_features("1. numbered\n"));
        assert!(!has_markdown_features("plain prose, nothing else\n"));
    }

    #[test]
    fn test_estimate_rewards_structure() {
        let strategy = MarkdownAwareChunking::new(800, 150, MarkdownConfig::default()).unwrap();
        let structured = strategy.estimate_quality(&doc(&sample_doc()));
        let flat = strategy.estimate_quality(&doc(&"flat prose here ".repeat(100)));
        assert!(structured > flat);
        assert_eq!(strategy.estimate_quality(&doc("")), 0.0);
    }

    #[test]
    fn test_construction_validation() {
        assert!(MarkdownAwareChunking::new(0, 0, MarkdownConfig::default()).is_err());
        assert!(MarkdownAwareChunking::new(100, 100, MarkdownConfig::default()).is_err());
        let bad = MarkdownConfig {
            max_header_level: 7,
            ..MarkdownConfig::default()
        };
        assert!(MarkdownAwareChunking::new(800, 100, bad).is_err());
    }
}
