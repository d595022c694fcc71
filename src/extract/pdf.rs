// PDF page text. Two engines:
// - lopdf, page by page, so a page that fails or panics is simply skipped;
// - pdf-extract by pages, used when lopdf recovers nothing (it copes better
//   with CID fonts and ToUnicode maps, common in Korean documents).
// Both run behind catch_unwind: malformed PDFs can make either one panic.

use super::{Backend, Capabilities, ExtractionOutcome};

pub const NO_TEXT_MESSAGE: &str = "PDF: No extractable text found (may be image-based).";
pub const UNAVAILABLE_MESSAGE: &str = "PDF extraction requires pdf-extract library.";

pub fn extract(bytes: &[u8], caps: &Capabilities) -> ExtractionOutcome {
    if !caps.has(Backend::Pdf) {
        return ExtractionOutcome::Unavailable(UNAVAILABLE_MESSAGE.to_string());
    }
    backend::extract(bytes)
}

/// Formats non-blank pages as `[Page N]` blocks separated by a blank line.
/// Returns `None` when every page is blank.
pub fn render_pages(pages: impl IntoIterator<Item = (u32, String)>) -> Option<String> {
    let blocks: Vec<String> = pages
        .into_iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(number, text)| format!("[Page {}]\n{}", number, text))
        .collect();
    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n"))
    }
}

#[cfg(feature = "pdf")]
mod backend {
    use lopdf::Document;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use tracing::{debug, warn};

    use super::{render_pages, NO_TEXT_MESSAGE};
    use crate::extract::{DocumentFormat, ExtractError, ExtractResult, ExtractionOutcome};

    pub fn extract(bytes: &[u8]) -> ExtractionOutcome {
        let load_error = match lopdf_pages(bytes) {
            Ok(pages) => {
                if let Some(text) = render_pages(pages) {
                    return ExtractionOutcome::Text(text);
                }
                debug!(target: "pdf", "lopdf recovered no text, trying pdf-extract");
                None
            }
            Err(e) => {
                debug!(target: "pdf", "lopdf could not load document: {}", e);
                Some(e)
            }
        };

        match pdf_extract_pages(bytes) {
            Ok(pages) => match render_pages(pages) {
                Some(text) => ExtractionOutcome::Text(text),
                None => ExtractionOutcome::empty(NO_TEXT_MESSAGE),
            },
            Err(e) => match load_error {
                Some(load_error) => {
                    warn!(target: "pdf", "PDF could not be parsed by either engine: {}", e);
                    ExtractionOutcome::failed(DocumentFormat::Pdf, load_error)
                }
                None => ExtractionOutcome::empty(NO_TEXT_MESSAGE),
            },
        }
    }

    fn lopdf_pages(bytes: &[u8]) -> ExtractResult<Vec<(u32, String)>> {
        let doc = catch_unwind(AssertUnwindSafe(|| Document::load_mem(bytes)))
            .map_err(ExtractError::from_panic)??;

        let mut pages = Vec::new();
        for number in doc.get_pages().into_keys() {
            match catch_unwind(AssertUnwindSafe(|| doc.extract_text(&[number]))) {
                Ok(Ok(text)) => pages.push((number, text)),
                Ok(Err(e)) => debug!(target: "pdf", page = number, "Skipping page: {}", e),
                Err(payload) => {
                    warn!(target: "pdf", page = number, "Skipping page after decoder panic: {}", ExtractError::from_panic(payload))
                }
            }
        }
        Ok(pages)
    }

    fn pdf_extract_pages(bytes: &[u8]) -> ExtractResult<Vec<(u32, String)>> {
        let pages = catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(bytes)
        }))
        .map_err(ExtractError::from_panic)?
        .map_err(|e| ExtractError::malformed(e.to_string()))?;

        Ok(pages
            .into_iter()
            .zip(1u32..)
            .map(|(text, number)| (number, text))
            .collect())
    }
}

#[cfg(not(feature = "pdf"))]
mod backend {
    use super::UNAVAILABLE_MESSAGE;
    use crate::extract::ExtractionOutcome;

    pub fn extract(_bytes: &[u8]) -> ExtractionOutcome {
        ExtractionOutcome::Unavailable(UNAVAILABLE_MESSAGE.to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn renders_only_non_blank_pages() {
        let pages = vec![
            (1, "첫 페이지".to_string()),
            (2, "  \n ".to_string()),
            (3, "셋째".to_string()),
        ];
        assert_eq!(
            render_pages(pages).as_deref(),
            Some("[Page 1]\n첫 페이지\n\n[Page 3]\n셋째")
        );
        assert_eq!(render_pages(vec![(1, String::new())]), None);
    }

    #[test]
    fn missing_backend_is_reported() {
        let caps = Capabilities::compiled().without(Backend::Pdf);
        assert_eq!(extract(b"%PDF-1.7", &caps).to_string(), UNAVAILABLE_MESSAGE);
    }

    #[cfg(feature = "pdf")]
    pub(crate) fn build_pdf(pages: &[&str]) -> Vec<u8> {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in pages {
            let mut operations = Vec::new();
            if !text.is_empty() {
                operations.extend([
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ]);
            }
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(Object::from(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[cfg(feature = "pdf")]
    #[test]
    fn marks_pages_and_skips_blank_ones() {
        let pdf = build_pdf(&["Scope of work", "", "Evaluation criteria"]);
        let text = extract(&pdf, &Capabilities::compiled()).to_string();
        assert!(text.starts_with("[Page 1]\n"), "{}", text);
        assert!(text.contains("Scope of work"));
        assert!(text.contains("\n\n[Page 3]\n"));
        assert!(!text.contains("[Page 2]"));
        assert!(text.contains("Evaluation criteria"));
    }

    #[cfg(feature = "pdf")]
    #[test]
    fn textless_pdf_is_reported_as_image_based() {
        let pdf = build_pdf(&["", ""]);
        assert_eq!(
            extract(&pdf, &Capabilities::compiled()).to_string(),
            NO_TEXT_MESSAGE
        );
    }

    #[cfg(feature = "pdf")]
    #[test]
    fn pdf_inside_zip_is_labelled_with_its_entry() {
        use crate::extract::archive::tests::build_zip;

        let pdf = build_pdf(&["Task order"]);
        let zip = build_zip(&[("notes.txt", b"skip"), ("report.pdf", &pdf)]);
        let caps = Capabilities::compiled();

        let text = crate::extract::extract_outcome(&zip, "bundle.zip", "", &caps).to_string();
        let expected_inner = extract(&pdf, &caps).to_string();
        assert_eq!(text, format!("[Extracted from ZIP: report.pdf]\n\n{}", expected_inner));
        assert!(expected_inner.contains("Task order"));
    }

    #[cfg(feature = "pdf")]
    #[test]
    fn garbage_is_a_failure_not_a_panic() {
        let text = extract(b"%PDF-1.4\nthis is not really a pdf", &Capabilities::compiled()).to_string();
        assert!(
            text.starts_with("PDF extraction failed: ") || text == NO_TEXT_MESSAGE,
            "{}",
            text
        );
    }
}
