//! Document text extraction.
//!
//! [`extract`] is the single entry point: it maps the declared filename's
//! extension to a per-format extractor through a fixed table and always
//! returns text. Failures are rendered as human-readable notices, never
//! propagated.

pub mod archive;
pub mod capabilities;
#[cfg(feature = "xlsx")]
pub mod compound;
pub mod docx;
pub mod error;
pub mod hwp;
#[cfg(feature = "hwp-loader")]
pub mod hwp_loader;
pub mod hwpx;
pub mod pdf;
pub mod xlsx;

use std::fmt;
use tracing::{debug, info};

pub use capabilities::{Backend, Capabilities};
pub use error::{ExtractError, ExtractResult};

/// Formats the dispatcher knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Zip,
    Hwp,
    Hwpx,
    Pdf,
    Docx,
    Xlsx,
    Xls,
}

type ExtractFn = fn(&[u8], &Capabilities) -> ExtractionOutcome;

/// Extension → format.
const DISPATCH_TABLE: &[(&str, DocumentFormat)] = &[
    (".zip", DocumentFormat::Zip),
    (".hwp", DocumentFormat::Hwp),
    (".hwpx", DocumentFormat::Hwpx),
    (".pdf", DocumentFormat::Pdf),
    (".docx", DocumentFormat::Docx),
    (".xlsx", DocumentFormat::Xlsx),
    (".xls", DocumentFormat::Xls),
];

impl DocumentFormat {
    /// Looks up an already-lowercased extension (with its leading dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        DISPATCH_TABLE
            .iter()
            .find(|(candidate, _)| *candidate == ext)
            .map(|(_, format)| *format)
    }

    pub fn label(self) -> &'static str {
        match self {
            DocumentFormat::Zip => "ZIP",
            DocumentFormat::Hwp => "HWP",
            DocumentFormat::Hwpx => "HWPX",
            DocumentFormat::Pdf => "PDF",
            DocumentFormat::Docx => "DOCX",
            DocumentFormat::Xlsx | DocumentFormat::Xls => "XLSX",
        }
    }

    fn extractor(self) -> ExtractFn {
        match self {
            DocumentFormat::Zip => archive::extract,
            DocumentFormat::Hwp => hwp::extract,
            DocumentFormat::Hwpx => hwpx::extract,
            DocumentFormat::Pdf => pdf::extract,
            DocumentFormat::Docx => docx::extract,
            DocumentFormat::Xlsx => xlsx::extract,
            DocumentFormat::Xls => xlsx::extract_legacy,
        }
    }
}

/// Tagged result of one extraction. `Display` yields the exact text handed to
/// callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Text(String),
    /// Result of the single document picked out of an archive.
    Nested {
        entry: String,
        inner: Box<ExtractionOutcome>,
    },
    /// Parsed fine, nothing to show.
    Empty(String),
    Protected(String),
    /// Container is not what its extension claims.
    Invalid(String),
    /// Backend slot is empty in the registry.
    Unavailable(String),
    Unsupported {
        extension: String,
        url: String,
    },
    UnsupportedInner {
        extension: String,
    },
    Failed {
        format: DocumentFormat,
        message: String,
    },
}

impl ExtractionOutcome {
    pub fn empty(reason: impl Into<String>) -> Self {
        Self::Empty(reason.into())
    }

    pub fn failed(format: DocumentFormat, err: impl fmt::Display) -> Self {
        Self::Failed {
            format,
            message: err.to_string(),
        }
    }

    /// True when real document text was recovered.
    pub fn has_text(&self) -> bool {
        match self {
            ExtractionOutcome::Text(_) => true,
            ExtractionOutcome::Nested { inner, .. } => inner.has_text(),
            _ => false,
        }
    }
}

impl fmt::Display for ExtractionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionOutcome::Text(text) => f.write_str(text),
            ExtractionOutcome::Nested { entry, inner } => {
                write!(f, "[Extracted from ZIP: {}]\n\n{}", entry, inner)
            }
            ExtractionOutcome::Empty(reason)
            | ExtractionOutcome::Protected(reason)
            | ExtractionOutcome::Invalid(reason)
            | ExtractionOutcome::Unavailable(reason) => f.write_str(reason),
            ExtractionOutcome::Unsupported { extension, url } => write!(
                f,
                "Unsupported file format: {}. Please check the manual link: {}",
                extension, url
            ),
            ExtractionOutcome::UnsupportedInner { extension } => {
                write!(f, "ZIP: Unsupported inner file format: {}", extension)
            }
            ExtractionOutcome::Failed { format, message } => {
                write!(f, "{} extraction failed: {}", format.label(), message)
            }
        }
    }
}

/// An attachment as handed over by the fetcher.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub bytes: Vec<u8>,
    pub filename: String,
    /// Only echoed back in notices.
    pub url: String,
}

impl RawDocument {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
            url: url.into(),
        }
    }

    pub fn extract(&self) -> String {
        extract(&self.bytes, &self.filename, &self.url)
    }
}

/// Lowercased extension of the final path component, including the dot.
///
/// A name whose only dot is the first or the last character has no extension,
/// so `.hidden` and `archive.` both yield `""`.
pub fn extension_of(name: &str) -> String {
    let base = base_name(name);
    match base.rfind('.') {
        Some(i) if i > 0 && i < base.len() - 1 => base[i..].to_lowercase(),
        _ => String::new(),
    }
}

/// Final `/`-separated component of a path.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Extracts text using the process-wide backend registry.
pub fn extract(bytes: &[u8], filename: &str, url: &str) -> String {
    let outcome = extract_outcome(bytes, filename, url, &capabilities::current());
    if !outcome.has_text() {
        info!(target: "extract", filename = %filename, "No document text recovered: {}", outcome);
    }
    outcome.to_string()
}

/// Dispatches on the extension of `filename`.
pub fn extract_outcome(
    bytes: &[u8],
    filename: &str,
    url: &str,
    caps: &Capabilities,
) -> ExtractionOutcome {
    let ext = extension_of(filename);
    match DocumentFormat::from_extension(&ext) {
        Some(format) => {
            debug!(target: "extract", filename = %filename, size = bytes.len(), format = format.label(), "Dispatching extraction");
            (format.extractor())(bytes, caps)
        }
        None => ExtractionOutcome::Unsupported {
            extension: ext,
            url: url.to_string(),
        },
    }
}

/// Dispatch used for a document picked out of an archive. Archives and `.xls`
/// are not accepted here, which bounds recursion to a single extra hop.
pub(crate) fn extract_inner(bytes: &[u8], ext: &str, caps: &Capabilities) -> ExtractionOutcome {
    let format = match ext {
        ".hwp" => DocumentFormat::Hwp,
        ".hwpx" => DocumentFormat::Hwpx,
        ".pdf" => DocumentFormat::Pdf,
        ".docx" => DocumentFormat::Docx,
        ".xlsx" => DocumentFormat::Xlsx,
        _ => {
            return ExtractionOutcome::UnsupportedInner {
                extension: ext.to_string(),
            }
        }
    };
    (format.extractor())(bytes, caps)
}
