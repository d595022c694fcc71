//! ZIP attachments: pick the single most relevant document and extract it.

use encoding_rs::EUC_KR;
use std::io::{Cursor, Read};
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use super::{
    base_name, extension_of, extract_inner, Capabilities, DocumentFormat, ExtractError,
    ExtractResult, ExtractionOutcome,
};

/// Base-name markers of the documents a bid evaluation actually needs:
/// 제안요청서 (proposal request) and 과업지시서 (task order).
pub const PRIORITY_KEYWORDS: [&str; 2] = ["제안요청서", "과업지시서"];

const MACOS_METADATA_PREFIX: &str = "__MACOSX";
const LISTED_NAMES_LIMIT: usize = 10;

/// One file inside an archive, as listed by the central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub index: usize,
    pub name: String,
    pub extension: String,
}

impl ArchiveEntry {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        let name = name.into();
        let extension = extension_of(&name);
        Self {
            index,
            name,
            extension,
        }
    }

    fn is_selectable(&self) -> bool {
        !self.name.starts_with(MACOS_METADATA_PREFIX)
            && !base_name(&self.name).starts_with('.')
            && !self.name.ends_with('/')
    }

    fn has_extension(&self, extensions: &[&str]) -> bool {
        extensions.contains(&self.extension.as_str())
    }
}

/// Selection tiers, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityTier {
    NamedProposal,
    HwpFamily,
    OtherDocument,
}

impl PriorityTier {
    pub const ORDER: [PriorityTier; 3] = [
        PriorityTier::NamedProposal,
        PriorityTier::HwpFamily,
        PriorityTier::OtherDocument,
    ];

    fn admits(self, entry: &ArchiveEntry) -> bool {
        match self {
            PriorityTier::NamedProposal => {
                let base = base_name(&entry.name);
                PRIORITY_KEYWORDS.iter().any(|k| base.contains(k))
            }
            PriorityTier::HwpFamily => entry.has_extension(&[".hwp", ".hwpx"]),
            PriorityTier::OtherDocument => entry.has_extension(&[".docx", ".pdf"]),
        }
    }
}

/// Picks the best entry: first match of the first non-empty tier, in listing
/// order. Directories, `__MACOSX` metadata and hidden files never qualify.
pub fn select_best_entry(entries: &[ArchiveEntry]) -> Option<&ArchiveEntry> {
    let candidates: Vec<&ArchiveEntry> = entries.iter().filter(|e| e.is_selectable()).collect();

    PriorityTier::ORDER.into_iter().find_map(|tier| {
        candidates
            .iter()
            .find(|e| tier.admits(e))
            .map(|e| {
                debug!(target: "archive", entry = %e.name, tier = ?tier, "Selected archive entry");
                *e
            })
    })
}

/// Lists entries in central-directory order.
///
/// Names written without the UTF-8 flag by Korean archivers are CP949; those
/// are decoded as such when the raw bytes are not valid UTF-8.
pub fn list_entries<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
) -> ExtractResult<Vec<ArchiveEntry>> {
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive.by_index_raw(index)?;
        let name = decode_entry_name(file.name_raw()).unwrap_or_else(|| file.name().to_string());
        entries.push(ArchiveEntry::new(index, name));
    }
    Ok(entries)
}

fn decode_entry_name(raw: &[u8]) -> Option<String> {
    if let Ok(name) = std::str::from_utf8(raw) {
        return Some(name.to_string());
    }
    let (decoded, _, had_errors) = EUC_KR.decode(raw);
    if had_errors {
        None
    } else {
        Some(decoded.into_owned())
    }
}

/// Returns the selected entry's name and decompressed bytes, `None` when no
/// entry qualifies.
pub fn resolve(bytes: &[u8]) -> ExtractResult<Option<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let entries = list_entries(&mut archive)?;
    match select_best_entry(&entries) {
        Some(entry) => {
            let inner = read_entry(&mut archive, entry.index)?;
            Ok(Some((entry.name.clone(), inner)))
        }
        None => Ok(None),
    }
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
) -> ExtractResult<Vec<u8>> {
    let mut file = archive.by_index(index)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn extract(bytes: &[u8], caps: &Capabilities) -> ExtractionOutcome {
    match resolve(bytes) {
        Ok(Some((entry, inner_bytes))) => {
            info!(target: "archive", entry = %entry, size = inner_bytes.len(), "Extracting document from archive");
            let inner = extract_inner(&inner_bytes, &extension_of(&entry), caps);
            ExtractionOutcome::Nested {
                entry,
                inner: Box::new(inner),
            }
        }
        Ok(None) => no_candidate(bytes),
        Err(ExtractError::Zip(ZipError::InvalidArchive(_)))
        | Err(ExtractError::Zip(ZipError::Io(_))) => {
            ExtractionOutcome::Invalid("ZIP: Invalid or corrupted archive.".to_string())
        }
        Err(e) => {
            warn!(target: "archive", "Failed to resolve archive: {}", e);
            ExtractionOutcome::failed(DocumentFormat::Zip, e)
        }
    }
}

fn no_candidate(bytes: &[u8]) -> ExtractionOutcome {
    let entries = match ZipArchive::new(Cursor::new(bytes))
        .map_err(ExtractError::from)
        .and_then(|mut archive| list_entries(&mut archive))
    {
        Ok(entries) => entries,
        Err(e) => return ExtractionOutcome::failed(DocumentFormat::Zip, e),
    };
    let listed: Vec<&str> = entries
        .iter()
        .take(LISTED_NAMES_LIMIT)
        .map(|e| e.name.as_str())
        .collect();
    info!(target: "archive", entries = entries.len(), "No suitable document in archive");
    ExtractionOutcome::empty(format!(
        "ZIP: No suitable document found. Files in archive: {}",
        listed.join(", ")
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    pub(crate) fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            if name.ends_with('/') {
                writer
                    .add_directory(name.trim_end_matches('/'), SimpleFileOptions::default())
                    .unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn entries(names: &[&str]) -> Vec<ArchiveEntry> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| ArchiveEntry::new(i, *n))
            .collect()
    }

    #[test]
    fn named_proposal_beats_hwp_and_pdf() {
        let list = entries(&["a.pdf", "b.hwp", "첨부/2024_제안요청서_최종.pdf"]);
        assert_eq!(
            select_best_entry(&list).map(|e| e.name.as_str()),
            Some("첨부/2024_제안요청서_최종.pdf")
        );

        let list = entries(&["b.hwpx", "과업지시서.docx"]);
        assert_eq!(
            select_best_entry(&list).map(|e| e.name.as_str()),
            Some("과업지시서.docx")
        );
    }

    #[test]
    fn hwp_family_beats_other_documents() {
        let list = entries(&["report.pdf", "spec.docx", "공고문.HWPX", "별지.hwp"]);
        assert_eq!(select_best_entry(&list).map(|e| e.name.as_str()), Some("공고문.HWPX"));
    }

    #[test]
    fn metadata_and_hidden_entries_are_never_selected() {
        let list = entries(&[
            "__MACOSX/._제안요청서.hwp",
            "docs/.제안요청서.hwp",
            "docs/",
            "notes.txt",
            "budget.pdf",
        ]);
        assert_eq!(select_best_entry(&list).map(|e| e.name.as_str()), Some("budget.pdf"));
    }

    #[test]
    fn nothing_selectable_yields_none() {
        let list = entries(&["readme.txt", "data.xlsx", "__MACOSX/a.pdf"]);
        assert!(select_best_entry(&list).is_none());
    }

    #[test]
    fn keyword_must_be_in_base_name() {
        let list = entries(&["제안요청서/image.png", "other.pdf"]);
        assert_eq!(select_best_entry(&list).map(|e| e.name.as_str()), Some("other.pdf"));
    }

    #[test]
    fn invalid_bytes_are_reported_as_corrupted() {
        let caps = Capabilities::compiled();
        for bytes in [&b""[..], &b"definitely not a zip"[..]] {
            assert_eq!(
                extract(bytes, &caps).to_string(),
                "ZIP: Invalid or corrupted archive."
            );
        }
    }

    #[test]
    fn lists_first_ten_names_when_nothing_qualifies() {
        let names: Vec<String> = (0..12).map(|i| format!("img{:02}.png", i)).collect();
        let files: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b"x"[..])).collect();
        let zip = build_zip(&files);
        let text = extract(&zip, &Capabilities::compiled()).to_string();
        assert!(text.starts_with("ZIP: No suitable document found. Files in archive: img00.png, "));
        assert!(text.ends_with("img09.png"));
        assert!(!text.contains("img10.png"));
    }

    #[test]
    fn nested_archive_is_not_unwrapped_twice() {
        let inner = build_zip(&[("a.pdf", b"%PDF-1.4")]);
        let outer = build_zip(&[("제안요청서.zip", &inner)]);
        let outcome = extract(&outer, &Capabilities::compiled());
        assert_eq!(
            outcome.to_string(),
            "[Extracted from ZIP: 제안요청서.zip]\n\nZIP: Unsupported inner file format: .zip"
        );
    }

    #[test]
    fn resolve_returns_selected_bytes() {
        let zip = build_zip(&[("notes.txt", b"skip"), ("spec.docx", b"docx-bytes")]);
        let (name, bytes) = resolve(&zip).unwrap().unwrap();
        assert_eq!(name, "spec.docx");
        assert_eq!(bytes, b"docx-bytes");
    }

    #[test]
    fn cp949_entry_names_are_decoded() {
        let (raw, _, _) = EUC_KR.encode("제안요청서.hwp");
        assert_eq!(decode_entry_name(&raw).as_deref(), Some("제안요청서.hwp"));
        assert_eq!(decode_entry_name(b"plain.pdf").as_deref(), Some("plain.pdf"));
    }

    #[test]
    fn forged_entry_size_does_not_reserve_memory() {
        let mut zip = build_zip(&[("report.pdf", b"%PDF-1.4 tiny body")]);
        let central = zip
            .windows(4)
            .position(|w| w == b"PK\x01\x02")
            .unwrap();
        zip[22..26].copy_from_slice(&0xFFFF_FFFEu32.to_le_bytes());
        zip[central + 24..central + 28].copy_from_slice(&0xFFFF_FFFEu32.to_le_bytes());

        let text = extract(&zip, &Capabilities::compiled()).to_string();
        assert!(!text.is_empty());
    }
}
