//! DOCX extraction: body paragraphs first, then one line per table row.

use super::{Backend, Capabilities, ExtractionOutcome};

pub const NO_TEXT_MESSAGE: &str = "DOCX: No text content found.";
pub const UNAVAILABLE_MESSAGE: &str = "DOCX extraction requires quick-xml library.";

pub fn extract(bytes: &[u8], caps: &Capabilities) -> ExtractionOutcome {
    if !caps.has(Backend::Docx) {
        return ExtractionOutcome::Unavailable(UNAVAILABLE_MESSAGE.to_string());
    }
    backend::extract(bytes)
}

#[cfg(feature = "docx")]
mod backend {
    use quick_xml::events::Event;
    use quick_xml::Reader;
    use std::io::{Cursor, Read};
    use tracing::debug;
    use zip::ZipArchive;

    use super::NO_TEXT_MESSAGE;
    use crate::extract::{DocumentFormat, ExtractError, ExtractResult, ExtractionOutcome};

    const DOCUMENT_PART: &str = "word/document.xml";

    pub fn extract(bytes: &[u8]) -> ExtractionOutcome {
        match document_lines(bytes) {
            Ok(lines) if lines.is_empty() => ExtractionOutcome::empty(NO_TEXT_MESSAGE),
            Ok(lines) => ExtractionOutcome::Text(lines.join("\n")),
            Err(e) => ExtractionOutcome::failed(DocumentFormat::Docx, e),
        }
    }

    fn document_lines(bytes: &[u8]) -> ExtractResult<Vec<String>> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut buf = Vec::new();
        archive.by_name(DOCUMENT_PART)?.read_to_end(&mut buf)?;
        let xml = String::from_utf8(buf).map_err(|e| ExtractError::malformed(e.to_string()))?;
        body_lines(&xml)
    }

    /// Walks `word/document.xml`.
    ///
    /// Only outermost paragraphs count: paragraphs nested in text boxes or in
    /// tables inside table cells are left out. A cell's text is its own
    /// paragraphs joined by newlines.
    #[derive(Debug, Default)]
    struct BodyWalker {
        paragraphs: Vec<String>,
        rows: Vec<String>,
        para_depth: usize,
        table_depth: usize,
        run_depth: usize,
        in_text: bool,
        paragraph: String,
        cell: Vec<String>,
        row: Vec<String>,
    }

    impl BodyWalker {
        fn collecting(&self) -> bool {
            self.para_depth == 1 && self.table_depth <= 1
        }

        fn in_top_table(&self) -> bool {
            self.table_depth == 1 && self.para_depth == 0
        }

        fn start(&mut self, name: &[u8]) {
            match name {
                b"w:tbl" => self.table_depth += 1,
                b"w:tr" if self.in_top_table() => self.row.clear(),
                b"w:tc" if self.in_top_table() => self.cell.clear(),
                b"w:p" => {
                    self.para_depth += 1;
                    if self.para_depth == 1 {
                        self.paragraph.clear();
                    }
                }
                b"w:r" => self.run_depth += 1,
                b"w:t" => self.in_text = true,
                _ => {}
            }
        }

        fn empty(&mut self, name: &[u8]) {
            match name {
                b"w:p" => {
                    self.start(name);
                    self.end(name);
                }
                b"w:tab" if self.run_depth > 0 && self.collecting() => self.paragraph.push('\t'),
                b"w:br" | b"w:cr" if self.run_depth > 0 && self.collecting() => {
                    self.paragraph.push('\n')
                }
                _ => {}
            }
        }

        fn end(&mut self, name: &[u8]) {
            match name {
                b"w:t" => self.in_text = false,
                b"w:r" => self.run_depth = self.run_depth.saturating_sub(1),
                b"w:p" => {
                    if self.para_depth == 1 {
                        self.finish_paragraph();
                    }
                    self.para_depth = self.para_depth.saturating_sub(1);
                }
                b"w:tc" if self.in_top_table() => {
                    let text = self.cell.join("\n");
                    self.row.push(text);
                }
                b"w:tr" if self.in_top_table() => {
                    let cells: Vec<&str> = self
                        .row
                        .iter()
                        .map(|c| c.trim())
                        .filter(|c| !c.is_empty())
                        .collect();
                    if !cells.is_empty() {
                        self.rows.push(cells.join(" | "));
                    }
                }
                b"w:tbl" => self.table_depth = self.table_depth.saturating_sub(1),
                _ => {}
            }
        }

        fn text(&mut self, text: &str) {
            if self.in_text && self.collecting() {
                self.paragraph.push_str(text);
            }
        }

        fn finish_paragraph(&mut self) {
            let text = std::mem::take(&mut self.paragraph);
            match self.table_depth {
                0 => {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        self.paragraphs.push(trimmed.to_string());
                    }
                }
                1 => self.cell.push(text),
                _ => {}
            }
        }

        fn into_lines(self) -> Vec<String> {
            let mut lines = self.paragraphs;
            lines.extend(self.rows);
            lines
        }
    }

    pub(super) fn body_lines(xml: &str) -> ExtractResult<Vec<String>> {
        let mut reader = Reader::from_str(xml);
        let mut walker = BodyWalker::default();

        loop {
            match reader.read_event()? {
                Event::Start(e) => walker.start(e.name().as_ref()),
                Event::Empty(e) => walker.empty(e.name().as_ref()),
                Event::End(e) => walker.end(e.name().as_ref()),
                Event::Text(t) => walker.text(&t.unescape()?),
                Event::Eof => break,
                _ => {}
            }
        }

        debug!(target: "docx", paragraphs = walker.paragraphs.len(), rows = walker.rows.len(), "Walked document body");
        Ok(walker.into_lines())
    }
}

#[cfg(not(feature = "docx"))]
mod backend {
    use super::UNAVAILABLE_MESSAGE;
    use crate::extract::ExtractionOutcome;

    pub fn extract(_bytes: &[u8]) -> ExtractionOutcome {
        ExtractionOutcome::Unavailable(UNAVAILABLE_MESSAGE.to_string())
    }
}

#[cfg(all(test, feature = "docx"))]
mod tests {
    use super::backend::body_lines;
    use super::*;
    use crate::extract::archive::tests::build_zip;

    fn document(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        )
    }

    fn docx(body: &str) -> Vec<u8> {
        build_zip(&[
            ("[Content_Types].xml", b"<Types/>"),
            ("word/document.xml", document(body).as_bytes()),
        ])
    }

    #[test]
    fn paragraphs_come_before_table_rows() {
        let body = r#"
            <w:p><w:r><w:t>1. 사업 개요</w:t></w:r></w:p>
            <w:tbl>
              <w:tr>
                <w:tc><w:p><w:r><w:t>항목</w:t></w:r></w:p></w:tc>
                <w:tc><w:p><w:r><w:t> 내용 </w:t></w:r></w:p></w:tc>
              </w:tr>
              <w:tr>
                <w:tc><w:p/></w:tc>
                <w:tc><w:p><w:r><w:t>   </w:t></w:r></w:p></w:tc>
              </w:tr>
              <w:tr>
                <w:tc><w:p><w:r><w:t>기간</w:t></w:r></w:p><w:p><w:r><w:t>12개월</w:t></w:r></w:p></w:tc>
                <w:tc><w:p/></w:tc>
              </w:tr>
            </w:tbl>
            <w:p><w:r><w:t xml:space="preserve">  2. 과업 범위  </w:t></w:r></w:p>
            <w:p><w:r><w:t>   </w:t></w:r></w:p>"#;
        assert_eq!(
            body_lines(&document(body)).unwrap(),
            vec!["1. 사업 개요", "2. 과업 범위", "항목 | 내용", "기간\n12개월"]
        );
    }

    #[test]
    fn runs_tabs_and_breaks_join_within_a_paragraph() {
        let body = r#"<w:p>
            <w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr>
            <w:r><w:t>예산</w:t></w:r><w:r><w:tab/><w:t>1억원</w:t></w:r>
            <w:r><w:br/><w:t>부가세 포함 &amp; 별도</w:t></w:r>
            <w:r><w:instrText>PAGE</w:instrText></w:r>
        </w:p>"#;
        assert_eq!(
            body_lines(&document(body)).unwrap(),
            vec!["예산\t1억원\n부가세 포함 & 별도"]
        );
    }

    #[test]
    fn nested_tables_and_text_boxes_are_left_out() {
        let body = r#"
            <w:p><w:r><w:t>본문</w:t></w:r><w:r><w:txbxContent><w:p><w:r><w:t>글상자</w:t></w:r></w:p></w:txbxContent></w:r></w:p>
            <w:tbl><w:tr>
              <w:tc><w:p><w:r><w:t>바깥</w:t></w:r></w:p>
                <w:tbl><w:tr><w:tc><w:p><w:r><w:t>안쪽</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
              </w:tc>
            </w:tr></w:tbl>"#;
        assert_eq!(body_lines(&document(body)).unwrap(), vec!["본문", "바깥"]);
    }

    #[test]
    fn extracts_from_package() {
        let bytes = docx(r#"<w:p><w:r><w:t>제안요청서</w:t></w:r></w:p>"#);
        assert_eq!(extract(&bytes, &Capabilities::compiled()).to_string(), "제안요청서");
    }

    #[test]
    fn empty_body_reports_no_text() {
        let bytes = docx("<w:p/><w:sectPr/>");
        assert_eq!(extract(&bytes, &Capabilities::compiled()).to_string(), NO_TEXT_MESSAGE);
    }

    #[test]
    fn missing_document_part_is_a_failure() {
        let bytes = build_zip(&[("word/styles.xml", b"<w:styles/>")]);
        let text = extract(&bytes, &Capabilities::compiled()).to_string();
        assert!(text.starts_with("DOCX extraction failed: "), "{}", text);

        let text = extract(b"not a zip", &Capabilities::compiled()).to_string();
        assert!(text.starts_with("DOCX extraction failed: "), "{}", text);
    }
}
