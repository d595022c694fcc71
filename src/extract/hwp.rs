//! HWP (Hangul word processor, compound-binary) extraction.
//!
//! Two strategies, tried in order:
//! 1. the record-level loader in [`super::hwp_loader`], which understands the
//!    compressed section format and yields clean paragraphs;
//! 2. a raw scan of the OLE streams that salvages whatever readable runs the
//!    preview and body streams contain.
//!
//! The loader falls through silently on any fault or blank result.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Backend, Capabilities, ExtractionOutcome};

pub const PROTECTED_MESSAGE: &str = "HWP Protected: This file is encrypted.";
pub const UNRECOVERABLE_MESSAGE: &str =
    "HWP: Could not extract text. File may use unsupported encoding.";
pub const UNAVAILABLE_MESSAGE: &str = "HWP extraction requires cfb library.";

pub const ENCRYPTED_STREAM: &str = "EncryptedPackage";
pub const PREVIEW_STREAM: &str = "PrvText";

pub fn body_section_stream(index: usize) -> String {
    format!("BodyText/Section{}", index)
}

/// Readable runs kept from raw body streams: Hangul syllables, ASCII
/// alphanumerics, whitespace and common punctuation.
static READABLE_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[\x{AC00}-\x{D7A3}a-zA-Z0-9\s.,!?@#$%^&*()_+=\-\[\]{}|;:'"<>/\\]+"#)
        .expect("valid readable-run pattern")
});

pub fn extract(bytes: &[u8], caps: &Capabilities) -> ExtractionOutcome {
    let has_loader = caps.has(Backend::HwpLoader);
    let has_ole = caps.has(Backend::HwpOle);

    if !has_loader && !has_ole {
        return ExtractionOutcome::Unavailable(UNAVAILABLE_MESSAGE.to_string());
    }

    if has_loader {
        if let Some(text) = loader::extract(bytes) {
            return ExtractionOutcome::Text(text);
        }
    }

    if !has_ole {
        return ExtractionOutcome::Unavailable(UNAVAILABLE_MESSAGE.to_string());
    }
    ole::extract(bytes)
}

/// Decodes UTF-16LE, dropping undecodable units the way a lenient decoder
/// with an "ignore" policy would.
pub fn decode_utf16le(bytes: &[u8]) -> String {
    let (decoded, _) = encoding_rs::UTF_16LE.decode_without_bom_handling(bytes);
    decoded.replace('\u{FFFD}', "")
}

/// Readable runs of a decoded body stream, in order.
pub fn readable_runs(decoded: &str) -> Vec<String> {
    READABLE_RUN
        .find_iter(decoded)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(feature = "hwp-loader")]
pub(crate) mod loader {
    use std::io::Write;
    use std::path::Path;
    use tracing::{debug, warn};

    use crate::extract::hwp_loader::HwpLoader;
    use crate::extract::ExtractResult;

    pub fn extract(bytes: &[u8]) -> Option<String> {
        extract_in(bytes, &std::env::temp_dir())
    }

    /// Runs the loader on a scoped temp copy inside `dir`. The file is removed
    /// when the handle drops, whichever way this function exits.
    pub(crate) fn extract_in(bytes: &[u8], dir: &Path) -> Option<String> {
        match load_via_temp_file(bytes, dir) {
            Ok(blocks) => {
                let parts: Vec<String> = blocks.into_iter().filter(|b| !b.trim().is_empty()).collect();
                if parts.is_empty() {
                    debug!(target: "hwp", "HWP loader returned no text, falling back to stream scan");
                    None
                } else {
                    Some(parts.join("\n\n"))
                }
            }
            Err(e) => {
                warn!(target: "hwp", "HWP loader failed, falling back to stream scan: {}", e);
                None
            }
        }
    }

    fn load_via_temp_file(bytes: &[u8], dir: &Path) -> ExtractResult<Vec<String>> {
        let mut temp = tempfile::Builder::new()
            .prefix("nara-extract-")
            .suffix(".hwp")
            .tempfile_in(dir)?;
        temp.write_all(bytes)?;
        temp.flush()?;

        let blocks = HwpLoader::new(temp.path()).load();

        if let Err(e) = temp.close() {
            warn!(target: "hwp", "Failed to remove temporary HWP file: {}", e);
        }
        blocks
    }
}

#[cfg(not(feature = "hwp-loader"))]
mod loader {
    pub fn extract(_bytes: &[u8]) -> Option<String> {
        None
    }
}

#[cfg(feature = "hwp-ole")]
mod ole {
    use cfb::CompoundFile;
    use std::io::{Cursor, Read};
    use tracing::debug;

    use super::{
        body_section_stream, decode_utf16le, readable_runs, ENCRYPTED_STREAM, PREVIEW_STREAM,
        PROTECTED_MESSAGE, UNRECOVERABLE_MESSAGE,
    };
    use crate::extract::{DocumentFormat, ExtractResult, ExtractionOutcome};

    pub fn extract(bytes: &[u8]) -> ExtractionOutcome {
        match scan_streams(bytes) {
            Ok(outcome) => outcome,
            Err(e) => ExtractionOutcome::failed(DocumentFormat::Hwp, e),
        }
    }

    fn scan_streams(bytes: &[u8]) -> ExtractResult<ExtractionOutcome> {
        let mut comp = CompoundFile::open(Cursor::new(bytes))?;

        if comp.is_stream(ENCRYPTED_STREAM) {
            return Ok(ExtractionOutcome::Protected(PROTECTED_MESSAGE.to_string()));
        }

        let mut parts = Vec::new();

        if comp.is_stream(PREVIEW_STREAM) {
            match read_stream(&mut comp, PREVIEW_STREAM) {
                Ok(raw) => {
                    let preview = decode_utf16le(&raw).replace('\0', "");
                    if !preview.trim().is_empty() {
                        parts.push(preview);
                    }
                }
                Err(e) => debug!(target: "hwp", "Unreadable preview stream: {}", e),
            }
        }

        let mut index = 0;
        loop {
            let name = body_section_stream(index);
            if !comp.is_stream(&name) {
                break;
            }
            match read_stream(&mut comp, &name) {
                Ok(raw) => parts.extend(readable_runs(&decode_utf16le(&raw))),
                Err(e) => debug!(target: "hwp", section = index, "Unreadable body section: {}", e),
            }
            index += 1;
        }

        if parts.is_empty() {
            Ok(ExtractionOutcome::empty(UNRECOVERABLE_MESSAGE))
        } else {
            Ok(ExtractionOutcome::Text(parts.join("\n")))
        }
    }

    fn read_stream(comp: &mut CompoundFile<Cursor<&[u8]>>, name: &str) -> ExtractResult<Vec<u8>> {
        let mut stream = comp.open_stream(name)?;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(not(feature = "hwp-ole"))]
mod ole {
    use super::UNAVAILABLE_MESSAGE;
    use crate::extract::ExtractionOutcome;

    pub fn extract(_bytes: &[u8]) -> ExtractionOutcome {
        ExtractionOutcome::Unavailable(UNAVAILABLE_MESSAGE.to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn utf16le(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn readable_runs_keep_hangul_and_ascii_only() {
        let decoded = "제안\u{4E00}\u{4E01}요청 v1.0\u{0001}끝!";
        assert_eq!(readable_runs(decoded), vec!["제안", "요청 v1.0", "끝!"]);
    }

    #[test]
    fn decode_drops_undecodable_units() {
        let mut bytes = utf16le("가");
        bytes.extend_from_slice(&[0x00, 0xD8]); // lone high surrogate
        bytes.extend(utf16le("나"));
        bytes.push(0x41); // dangling odd byte
        assert_eq!(decode_utf16le(&bytes), "가나");
    }

    #[cfg(any(feature = "hwp-ole", feature = "hwp-loader"))]
    pub(crate) fn build_compound(streams: &[(&str, &[u8])]) -> Vec<u8> {
        use cfb::CompoundFile;
        use std::io::{Cursor, Write};

        let mut comp = CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        for (path, data) in streams {
            if let Some((storage, _)) = path.rsplit_once('/') {
                if !comp.is_storage(storage) {
                    comp.create_storage(storage).unwrap();
                }
            }
            let mut stream = comp.create_stream(path).unwrap();
            stream.write_all(data).unwrap();
        }
        comp.flush().unwrap();
        comp.into_inner().into_inner()
    }

    #[cfg(feature = "hwp-ole")]
    mod stream_scan {
        use super::super::*;
        use super::{build_compound, utf16le};

        fn ole_only() -> Capabilities {
            Capabilities::compiled().without(Backend::HwpLoader)
        }

        #[test]
        fn encrypted_package_short_circuits() {
            let bytes = build_compound(&[
                (ENCRYPTED_STREAM, b"opaque"),
                (PREVIEW_STREAM, &utf16le("미리보기")),
            ]);
            assert_eq!(
                extract(&bytes, &ole_only()),
                ExtractionOutcome::Protected(PROTECTED_MESSAGE.to_string())
            );
            // The loader refuses encrypted containers too, so the sentinel is stable.
            assert_eq!(extract(&bytes, &Capabilities::compiled()).to_string(), PROTECTED_MESSAGE);
        }

        #[test]
        fn preview_and_sequential_sections_are_recovered() {
            let preview = utf16le("사업 개요\0");
            let section0 = utf16le("첫번째 구간");
            let section1 = utf16le("두번째\u{4E00}구간");
            let section3 = utf16le("건너뛴 구간");
            let bytes = build_compound(&[
                (PREVIEW_STREAM, &preview),
                ("BodyText/Section0", &section0),
                ("BodyText/Section1", &section1),
                ("BodyText/Section3", &section3),
            ]);
            let text = extract(&bytes, &ole_only()).to_string();
            assert_eq!(text, "사업 개요\n첫번째 구간\n두번째\n구간");
        }

        #[test]
        fn nothing_readable_reports_unsupported_encoding() {
            let bytes = build_compound(&[("BodyText/Section0", &[0x00, 0x4E, 0x01, 0x4E])]);
            assert_eq!(extract(&bytes, &ole_only()).to_string(), UNRECOVERABLE_MESSAGE);
        }

        #[test]
        fn non_compound_bytes_report_failure() {
            let text = extract(b"plain text pretending to be hwp", &ole_only()).to_string();
            assert!(text.starts_with("HWP extraction failed: "), "{}", text);
        }
    }
}
