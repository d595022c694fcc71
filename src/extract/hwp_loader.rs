//! Record-level reader for HWP 5.0 documents.
//!
//! An HWP 5.0 file is an OLE compound file. `FileHeader` carries a signature
//! and property flags; every `BodyText/SectionN` stream is a sequence of
//! records, raw-deflated when the document is compressed. Paragraph text lives
//! in `HWPTAG_PARA_TEXT` records as UTF-16LE with embedded control codes.

use cfb::CompoundFile;
use flate2::read::DeflateDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::hwp::{body_section_stream, ENCRYPTED_STREAM};
use super::{ExtractError, ExtractResult};

const FILE_HEADER_STREAM: &str = "FileHeader";
const SIGNATURE: &[u8] = b"HWP Document File";

const FLAG_COMPRESSED: u32 = 1 << 0;
const FLAG_PASSWORD: u32 = 1 << 1;
const FLAG_DISTRIBUTION: u32 = 1 << 2;

const HWPTAG_BEGIN: u16 = 0x010;
const HWPTAG_PARA_TEXT: u16 = HWPTAG_BEGIN + 51;

/// Size field value announcing a 32-bit extended size.
const EXTENDED_SIZE_MARKER: usize = 0xFFF;

/// Width in code units of an inline or extended control character.
const CONTROL_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    pub properties: u32,
}

impl FileHeader {
    pub fn parse(raw: &[u8]) -> ExtractResult<Self> {
        if raw.len() < 40 || !raw.starts_with(SIGNATURE) {
            return Err(ExtractError::malformed("missing HWP 5.0 file signature"));
        }
        let version = u32::from_le_bytes([raw[32], raw[33], raw[34], raw[35]]);
        let properties = u32::from_le_bytes([raw[36], raw[37], raw[38], raw[39]]);
        Ok(Self {
            version,
            properties,
        })
    }

    pub fn compressed(&self) -> bool {
        self.properties & FLAG_COMPRESSED != 0
    }

    pub fn password_protected(&self) -> bool {
        self.properties & FLAG_PASSWORD != 0
    }

    /// Distribution documents keep their body encrypted under `ViewText`.
    pub fn distribution(&self) -> bool {
        self.properties & FLAG_DISTRIBUTION != 0
    }
}

/// Reads an HWP file from disk into one text block per body section.
pub struct HwpLoader {
    path: PathBuf,
}

impl HwpLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> ExtractResult<Vec<String>> {
        let file = File::open(&self.path)?;
        let mut comp = CompoundFile::open(file)?;

        if comp.is_stream(ENCRYPTED_STREAM) {
            return Err(ExtractError::malformed("document is DRM-encrypted"));
        }

        let header = FileHeader::parse(&read_stream(&mut comp, FILE_HEADER_STREAM)?)?;
        if header.password_protected() {
            return Err(ExtractError::malformed("document is password-protected"));
        }
        if header.distribution() {
            return Err(ExtractError::malformed("distribution documents are not supported"));
        }
        debug!(target: "hwp", version = header.version, compressed = header.compressed(), "Parsed HWP file header");

        let mut blocks = Vec::new();
        let mut index = 0;
        loop {
            let name = body_section_stream(index);
            if !comp.is_stream(&name) {
                break;
            }
            let raw = read_stream(&mut comp, &name)?;
            let records = if header.compressed() {
                inflate(&raw)?
            } else {
                raw
            };
            let paragraphs = section_paragraphs(&records);
            debug!(target: "hwp", section = index, paragraphs = paragraphs.len(), "Decoded body section");
            blocks.push(paragraphs.join("\n"));
            index += 1;
        }
        Ok(blocks)
    }
}

fn read_stream(comp: &mut CompoundFile<File>, name: &str) -> ExtractResult<Vec<u8>> {
    let mut stream = comp.open_stream(name)?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    Ok(buf)
}

fn inflate(raw: &[u8]) -> ExtractResult<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(raw).read_to_end(&mut out)?;
    Ok(out)
}

/// A record header split into its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordHeader {
    tag: u16,
    size: usize,
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Trimmed, non-blank paragraph texts of one decompressed section. A record
/// running past the end of the stream ends the walk.
pub fn section_paragraphs(records: &[u8]) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut offset = 0;

    while let Some(word) = read_u32(records, offset) {
        offset += 4;
        let mut header = RecordHeader {
            tag: (word & 0x3FF) as u16,
            size: (word >> 20) as usize,
        };
        if header.size == EXTENDED_SIZE_MARKER {
            match read_u32(records, offset) {
                Some(size) => header.size = size as usize,
                None => break,
            }
            offset += 4;
        }
        let Some(payload) = records.get(offset..offset + header.size) else {
            break;
        };
        if header.tag == HWPTAG_PARA_TEXT {
            let text = decode_para_text(payload);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                paragraphs.push(trimmed.to_string());
            }
        }
        offset += header.size;
    }
    paragraphs
}

/// Decodes a `PARA_TEXT` payload, dropping control characters.
///
/// Codes 0, 10, 13 and 24–31 occupy one unit; every other code below 32 is an
/// inline or extended control spanning eight units (tab is an inline control).
pub fn decode_para_text(payload: &[u8]) -> String {
    let units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    let mut out: Vec<u16> = Vec::with_capacity(units.len());
    let mut i = 0;
    while i < units.len() {
        let unit = units[i];
        if unit >= 32 {
            out.push(unit);
            i += 1;
            continue;
        }
        match unit {
            9 => {
                out.push(u16::from(b'\t'));
                i += CONTROL_WIDTH;
            }
            10 => {
                out.push(u16::from(b'\n'));
                i += 1;
            }
            30 | 31 => {
                out.push(u16::from(b' '));
                i += 1;
            }
            0 | 13 | 24..=29 => i += 1,
            _ => i += CONTROL_WIDTH,
        }
    }
    String::from_utf16_lossy(&out)
}
