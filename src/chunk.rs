//! Splits reassembled documents into retrieval-sized chunks.
//!
//! Splitting produces [`RawChunk`]s with an untyped metadata map, the shape
//! any external splitter would hand back. [`reconcile`] then maps the keys it
//! knows into [`ChunkMetadata`] and drops the rest.

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use serde_json::{Map, Value};

use crate::formats::{Chunk, ChunkMetadata, Frontmatter};

pub const DEFAULT_CHUNK_SIZE: usize = 2000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub content: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct Heading {
    level: u8,
    title: String,
    /// Byte offset of the start of the heading's line.
    line_start: usize,
}

/// Splits a Markdown body at its headings, then windows sections longer than
/// `chunk_size` characters on line boundaries with `overlap` characters of
/// carried-over context.
///
/// Sections holding nothing but their heading are not emitted; they still
/// appear in the breadcrumb of the sections below them.
pub fn split_markdown(body: &str, chunk_size: usize, overlap: usize) -> Vec<RawChunk> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size.saturating_sub(1));
    let headings = find_headings(body);

    let mut boundaries = headings.iter().map(|h| h.line_start).collect::<Vec<_>>();
    boundaries.push(body.len());

    let mut chunks = Vec::new();
    let mut trail: Vec<(u8, String)> = Vec::new();

    let preamble_end = boundaries[0];
    emit_section(body, 0, preamble_end, None, &trail, chunk_size, overlap, &mut chunks);

    for (idx, heading) in headings.iter().enumerate() {
        while trail.last().is_some_and(|(level, _)| *level >= heading.level) {
            trail.pop();
        }
        trail.push((heading.level, heading.title.clone()));
        emit_section(
            body,
            heading.line_start,
            boundaries[idx + 1],
            Some(heading),
            &trail,
            chunk_size,
            overlap,
            &mut chunks,
        );
    }

    chunks
}

fn find_headings(body: &str) -> Vec<Heading> {
    let mut headings = Vec::new();
    let mut current: Option<Heading> = None;

    for (event, range) in Parser::new(body).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                let line_start = body[..range.start].rfind('\n').map_or(0, |i| i + 1);
                current = Some(Heading {
                    level: level as u8,
                    title: String::new(),
                    line_start,
                });
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(heading) = current.as_mut() {
                    heading.title.push_str(&text);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(mut heading) = current.take() {
                    heading.title = heading.title.trim().to_owned();
                    headings.push(heading);
                }
            }
            _ => {}
        }
    }

    headings
}

#[allow(clippy::too_many_arguments)]
fn emit_section(
    body: &str,
    start: usize,
    end: usize,
    heading: Option<&Heading>,
    trail: &[(u8, String)],
    chunk_size: usize,
    overlap: usize,
    out: &mut Vec<RawChunk>,
) {
    let first_line = body[..start].matches('\n').count() + 1;
    let lines = body[start..end]
        .lines()
        .enumerate()
        .map(|(offset, line)| (first_line + offset, line))
        .collect::<Vec<_>>();

    let content_lines = if heading.is_some() { &lines[1.min(lines.len())..] } else { &lines[..] };
    if content_lines.iter().all(|(_, line)| line.trim().is_empty()) {
        return;
    }

    let mut lines = lines;
    while lines.last().is_some_and(|(_, line)| line.trim().is_empty()) {
        lines.pop();
    }
    while lines.first().is_some_and(|(_, line)| line.trim().is_empty()) {
        lines.remove(0);
    }

    for (from, to, content) in windows(&lines, chunk_size, overlap) {
        let mut metadata = Map::new();
        metadata.insert(
            "loc".to_owned(),
            serde_json::json!({ "lines": { "from": from, "to": to } }),
        );
        match heading {
            Some(heading) => {
                metadata.insert("level".to_owned(), Value::from(heading.level));
                metadata.insert("title".to_owned(), Value::from(heading.title.clone()));
            }
            None => {
                metadata.insert("level".to_owned(), Value::from(0));
                metadata.insert("title".to_owned(), Value::from(""));
            }
        }
        if trail.len() >= 2 {
            let parent = &trail[trail.len() - 2].1;
            metadata.insert("parent_title".to_owned(), Value::from(parent.clone()));
        }
        metadata.insert(
            "breadcrumb".to_owned(),
            Value::from(trail.iter().map(|(_, t)| t.clone()).collect::<Vec<_>>()),
        );
        out.push(RawChunk { content, metadata });
    }
}

/// Groups numbered lines into windows of at most `chunk_size` characters.
/// Lines longer than a window are cut at character boundaries.
fn windows(lines: &[(usize, &str)], chunk_size: usize, overlap: usize) -> Vec<(usize, usize, String)> {
    let mut pieces: Vec<(usize, String)> = Vec::with_capacity(lines.len());
    for (number, line) in lines {
        let chars = line.chars().collect::<Vec<_>>();
        if chars.len() <= chunk_size {
            pieces.push((*number, (*line).to_owned()));
            continue;
        }
        for part in chars.chunks(chunk_size) {
            pieces.push((*number, part.iter().collect()));
        }
    }

    let cost = |piece: &(usize, String)| piece.1.chars().count() + 1;
    let mut out = Vec::new();
    let mut start = 0;
    while start < pieces.len() {
        let mut end = start;
        let mut size = 0;
        while end < pieces.len() {
            let len = cost(&pieces[end]);
            if end > start && size + len > chunk_size + 1 {
                break;
            }
            size += len;
            end += 1;
        }

        let text = pieces[start..end]
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        out.push((pieces[start].0, pieces[end - 1].0, text));
        if end >= pieces.len() {
            break;
        }

        let mut next = end;
        let mut carried = 0;
        while next > start + 1 {
            let len = cost(&pieces[next - 1]);
            if carried + len > overlap {
                break;
            }
            carried += len;
            next -= 1;
        }
        start = next;
    }
    out
}

pub fn chunk_id(disease_id: &str, index: usize) -> String {
    format!("{disease_id}_chunk_{index:03}")
}

/// Builds a typed chunk from a raw one. Document-level fields come from the
/// frontmatter; every recognised metadata key is mapped onto a named field and
/// anything else is logged and dropped.
pub fn reconcile(raw: RawChunk, front: &Frontmatter, index: usize) -> Chunk {
    let id = chunk_id(&front.disease_id, index);
    let mut metadata = ChunkMetadata {
        disease_id: front.disease_id.clone(),
        disease_name: front.disease_name.clone(),
        disease_name_en: front.disease_name_en.clone(),
        category: front.category,
        source: front.source.clone(),
        source_url: front.source_url.clone(),
        collected_date: front.collected_date.clone(),
        level: 0,
        title: String::new(),
        parent_title: None,
        breadcrumb: Vec::new(),
        line_from: None,
        line_to: None,
        tags: front.tags.clone(),
    };

    for (key, value) in raw.metadata {
        let recognised = match key.as_str() {
            "loc" => {
                metadata.line_from = value
                    .pointer("/lines/from")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize);
                metadata.line_to = value
                    .pointer("/lines/to")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize);
                metadata.line_from.is_some()
            }
            "level" => match value.as_u64().and_then(|n| u8::try_from(n).ok()) {
                Some(level) => {
                    metadata.level = level;
                    true
                }
                None => false,
            },
            "title" => match value.as_str() {
                Some(title) => {
                    metadata.title = title.to_owned();
                    true
                }
                None => false,
            },
            "parent_title" => {
                metadata.parent_title = value.as_str().map(str::to_owned);
                metadata.parent_title.is_some()
            }
            "breadcrumb" => match value.as_array() {
                Some(items) => {
                    metadata.breadcrumb = items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect();
                    true
                }
                None => false,
            },
            _ => {
                tracing::warn!(chunk_id = %id, key = %key, "dropping unrecognised chunk metadata");
                continue;
            }
        };
        if !recognised {
            tracing::warn!(chunk_id = %id, key = %key, value = %value, "chunk metadata has unexpected shape");
        }
    }

    Chunk {
        id,
        content: raw.content,
        metadata,
    }
}

/// Frontmatter plus typed chunks of one reassembled document.
pub fn chunk_document(
    contents: &str,
    chunk_size: usize,
    overlap: usize,
) -> anyhow::Result<(Frontmatter, Vec<Chunk>)> {
    let (front, body) = crate::frontmatter::split(contents)?;
    let chunks = split_markdown(body, chunk_size, overlap)
        .into_iter()
        .enumerate()
        .map(|(index, raw)| reconcile(raw, &front, index))
        .collect();
    Ok((front, chunks))
}
