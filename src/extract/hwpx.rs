//! HWPX extraction: a ZIP package whose body is split into
//! `Contents/sectionN.xml` files.

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::io::{Cursor, Read};
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use super::{Capabilities, DocumentFormat, ExtractError, ExtractResult, ExtractionOutcome};

pub const NO_TEXT_MESSAGE: &str = "HWPX: No text content found in sections.";
pub const INVALID_MESSAGE: &str = "HWPX: Invalid file format.";

static SECTION_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Contents/section(\d+)\.xml$").expect("valid section pattern"));

pub fn extract(bytes: &[u8], _caps: &Capabilities) -> ExtractionOutcome {
    let mut archive = match ZipArchive::new(Cursor::new(bytes)) {
        Ok(archive) => archive,
        Err(ZipError::InvalidArchive(_)) | Err(ZipError::Io(_)) => {
            return ExtractionOutcome::Invalid(INVALID_MESSAGE.to_string())
        }
        Err(e) => return ExtractionOutcome::failed(DocumentFormat::Hwpx, e),
    };

    let parts = collect_sections(&mut archive);
    if parts.is_empty() {
        ExtractionOutcome::empty(NO_TEXT_MESSAGE)
    } else {
        ExtractionOutcome::Text(parts.join("\n"))
    }
}

/// Section entry names ordered by their numeric index.
pub fn section_entries<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut sections: Vec<(u64, String)> = names
        .filter_map(|name| {
            let caps = SECTION_ENTRY.captures(name)?;
            let index = caps[1].parse::<u64>().ok()?;
            Some((index, name.to_string()))
        })
        .collect();
    sections.sort();
    sections.into_iter().map(|(_, name)| name).collect()
}

fn collect_sections<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> Vec<String> {
    let names = section_entries(archive.file_names());
    let mut parts = Vec::new();

    for name in names {
        match read_section(archive, &name) {
            Ok(strings) => parts.extend(strings),
            Err(e) => debug!(target: "hwpx", section = %name, "Skipping unreadable section: {}", e),
        }
    }
    parts
}

fn read_section<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> ExtractResult<Vec<String>> {
    let mut buf = Vec::new();
    archive.by_name(name)?.read_to_end(&mut buf)?;
    let xml = String::from_utf8(buf).map_err(|e| ExtractError::malformed(e.to_string()))?;
    section_strings(&xml)
}

#[derive(Debug, Default)]
struct Node {
    text: String,
    tail: String,
    children: Vec<usize>,
}

/// Parses one section into a tree, then collects every element's text and
/// tail (trimmed, non-blank) in pre-order. Any parse error rejects the whole
/// section.
pub fn section_strings(xml: &str) -> ExtractResult<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut nodes: Vec<Node> = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut root: Option<usize> = None;

    loop {
        match reader.read_event()? {
            Event::Start(_) => {
                let id = add_node(&mut nodes, &open, &mut root)?;
                open.push(id);
            }
            Event::Empty(_) => {
                add_node(&mut nodes, &open, &mut root)?;
            }
            Event::End(_) => {
                if open.pop().is_none() {
                    return Err(ExtractError::malformed("unexpected closing tag"));
                }
            }
            Event::Text(t) => append_text(&mut nodes, &open, &t.unescape()?)?,
            Event::CData(c) => {
                let raw = c.into_inner();
                append_text(&mut nodes, &open, &String::from_utf8_lossy(&raw))?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !open.is_empty() {
        return Err(ExtractError::malformed("unclosed element at end of section"));
    }
    let Some(root) = root else {
        return Err(ExtractError::malformed("section has no root element"));
    };

    let mut out = Vec::new();
    let mut pending = vec![root];
    while let Some(id) = pending.pop() {
        let node = &nodes[id];
        for s in [&node.text, &node.tail] {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
        pending.extend(node.children.iter().rev());
    }
    Ok(out)
}

fn add_node(nodes: &mut Vec<Node>, open: &[usize], root: &mut Option<usize>) -> ExtractResult<usize> {
    let id = nodes.len();
    nodes.push(Node::default());
    match open.last() {
        Some(&parent) => nodes[parent].children.push(id),
        None if root.is_none() => *root = Some(id),
        None => return Err(ExtractError::malformed("content after the root element")),
    }
    Ok(id)
}

/// Text belongs to the open element until it has a child; after that it is
/// the tail of the most recent child.
fn append_text(nodes: &mut [Node], open: &[usize], text: &str) -> ExtractResult<()> {
    let Some(&current) = open.last() else {
        if text.trim().is_empty() {
            return Ok(());
        }
        return Err(ExtractError::malformed("text outside the root element"));
    };
    match nodes[current].children.last().copied() {
        Some(child) => nodes[child].tail.push_str(text),
        None => nodes[current].text.push_str(text),
    }
    Ok(())
}
