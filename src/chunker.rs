//! Deterministic Markdown chunker.
//!
//! Splits a file into an ordered sequence of [`Chunk`]s. Markdown is parsed
//! into top-level blocks; a heading stack yields the `" > "`-joined
//! breadcrumb for each section, and blocks accumulate into chunks bounded by
//! `min_chunk_chars`/`max_chunk_chars`. Fenced code blocks are never split:
//! an oversized fence becomes a chunk of its own.
//!
//! Chunk identity is a pure function of the file's normalized relative path
//! and the emission index, so identical bytes always produce identical
//! `chunk_id`s across runs and machines.

use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag};
use sha2::{Digest, Sha256};

use crate::models::Chunk;

#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub max_chunk_chars: usize,
    pub min_chunk_chars: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1200,
            min_chunk_chars: 200,
        }
    }
}

/// Normalize a relative path for chunk identity: forward slashes, no leading
/// separator.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

/// `sha256(normalized_path :: chunk_index)` as lowercase hex.
pub fn make_chunk_id(path: &str, chunk_index: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_path(path).as_bytes());
    hasher.update(b"::");
    hasher.update(chunk_index.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Chunk a file, dispatching on extension: Markdown gets heading-aware
/// sectioning, everything else is a single section split on blank lines.
pub fn chunk_file(text: &str, relative_path: &str, params: ChunkParams) -> Vec<Chunk> {
    let lower = relative_path.to_ascii_lowercase();
    if lower.ends_with(".md") || lower.ends_with(".markdown") {
        chunk_markdown(text, relative_path, params)
    } else {
        chunk_plain_text(text, relative_path, params)
    }
}

/// One top-level block of the source document.
enum BlockItem {
    /// A heading with its level and inline text.
    Heading(u8, String),
    /// Any other block, carried as a verbatim source slice (code fences
    /// included, fences and all).
    Body(String),
}

pub fn chunk_markdown(text: &str, relative_path: &str, params: ChunkParams) -> Vec<Chunk> {
    let blocks = collect_blocks(text);

    // Sections: (heading_path, accumulated block texts). The leading section
    // holds content before the first heading.
    let mut heading_stack: Vec<(u8, String)> = Vec::new();
    let mut sections: Vec<(String, Vec<String>)> = vec![(String::new(), Vec::new())];

    for block in blocks {
        match block {
            BlockItem::Heading(level, heading_text) => {
                heading_stack.retain(|(l, _)| *l < level);
                heading_stack.push((level, heading_text));
                let heading_path = heading_stack
                    .iter()
                    .filter(|(_, t)| !t.is_empty())
                    .map(|(_, t)| t.as_str())
                    .collect::<Vec<_>>()
                    .join(" > ");
                sections.push((heading_path, Vec::new()));
            }
            BlockItem::Body(content) => {
                let trimmed = content.trim();
                if !trimmed.is_empty() {
                    sections.last_mut().unwrap().1.push(trimmed.to_string());
                }
            }
        }
    }

    emit_sections(&sections, relative_path, params)
}

/// Non-Markdown text: a single section with an empty heading path, split on
/// blank lines so the size bounds still apply.
pub fn chunk_plain_text(text: &str, relative_path: &str, params: ChunkParams) -> Vec<Chunk> {
    let parts: Vec<String> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    let sections = vec![(String::new(), parts)];
    emit_sections(&sections, relative_path, params)
}

/// Walk the Markdown event stream and collect top-level blocks as verbatim
/// source slices, extracting inline text for headings.
fn collect_blocks(text: &str) -> Vec<BlockItem> {
    let parser = Parser::new_ext(text, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH);
    let mut blocks = Vec::new();
    let mut depth: usize = 0;
    let mut top_level: Option<(Option<u8>, std::ops::Range<usize>)> = None;
    let mut heading_text = String::new();

    for (event, range) in parser.into_offset_iter() {
        match event {
            Event::Start(tag) => {
                if depth == 0 {
                    let heading_level = match &tag {
                        Tag::Heading { level, .. } => Some(heading_level_to_u8(*level)),
                        _ => None,
                    };
                    top_level = Some((heading_level, range));
                    heading_text.clear();
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some((heading_level, range)) = top_level.take() {
                        match heading_level {
                            Some(level) => blocks.push(BlockItem::Heading(
                                level,
                                heading_text.trim().to_string(),
                            )),
                            None => blocks.push(BlockItem::Body(text[range].to_string())),
                        }
                    }
                }
            }
            Event::Text(t) | Event::Code(t) => {
                if matches!(top_level, Some((Some(_), _))) {
                    heading_text.push_str(&t);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if matches!(top_level, Some((Some(_), _))) {
                    heading_text.push(' ');
                }
            }
            _ => {}
        }
    }

    blocks
}

fn heading_level_to_u8(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Aggregate section parts into chunks with contiguous indices starting at 0.
///
/// Within a section, parts join on blank lines until the next part would push
/// the buffer past `max_chunk_chars`; the buffer is then emitted if it has
/// reached `min_chunk_chars`, otherwise discarded. A single part larger than
/// `max_chunk_chars` (an indivisible code fence, typically) is emitted alone.
fn emit_sections(
    sections: &[(String, Vec<String>)],
    relative_path: &str,
    params: ChunkParams,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;

    let mut push_chunk = |heading_path: &str, content: &str, chunk_index: &mut i64| {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return;
        }
        chunks.push(Chunk {
            chunk_id: make_chunk_id(relative_path, *chunk_index),
            chunk_index: *chunk_index,
            heading_path: heading_path.to_string(),
            content: trimmed.to_string(),
            token_count: trimmed.split_whitespace().count() as i64,
        });
        *chunk_index += 1;
    };

    for (heading_path, parts) in sections {
        if parts.is_empty() {
            continue;
        }

        let mut current = String::new();
        for part in parts {
            let proposal_len = if current.is_empty() {
                part.len()
            } else {
                current.len() + 2 + part.len()
            };

            if proposal_len <= params.max_chunk_chars {
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(part);
                continue;
            }

            if current.len() >= params.min_chunk_chars {
                push_chunk(heading_path, &current, &mut chunk_index);
            }
            current = part.clone();
        }

        if current.trim().len() >= params.min_chunk_chars {
            push_chunk(heading_path, &current, &mut chunk_index);
        }
    }

    chunks
}
