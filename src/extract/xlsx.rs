//! Spreadsheet extraction. `.xlsx` is read as an Office Open XML package
//! only; `.xls` goes through the BIFF reader once its compound container has
//! passed [`compound::check_layout`](super::compound). Each sheet becomes a
//! `[Sheet: name]` block of ` | `-joined rows.

use super::{Backend, Capabilities, ExtractionOutcome};

pub const NO_DATA_MESSAGE: &str = "XLSX: No data found.";
pub const UNAVAILABLE_MESSAGE: &str = "XLSX extraction requires calamine library.";

/// Rows past this absolute (zero-based) index are never read.
pub const MAX_ROWS: u32 = 500;

pub fn extract(bytes: &[u8], caps: &Capabilities) -> ExtractionOutcome {
    if !caps.has(Backend::Xlsx) {
        return ExtractionOutcome::Unavailable(UNAVAILABLE_MESSAGE.to_string());
    }
    backend::extract(bytes)
}

/// `.xls` entry point. Zip-packaged workbooks saved under the old extension
/// are still read as `.xlsx`.
pub fn extract_legacy(bytes: &[u8], caps: &Capabilities) -> ExtractionOutcome {
    if !caps.has(Backend::Xlsx) {
        return ExtractionOutcome::Unavailable(UNAVAILABLE_MESSAGE.to_string());
    }
    backend::extract_legacy(bytes)
}

/// Builds a sheet block; `None` when no row had a value.
pub fn render_sheet(name: &str, rows: impl IntoIterator<Item = Vec<String>>) -> Option<String> {
    let mut lines = vec![format!("[Sheet: {}]", name)];
    lines.extend(
        rows.into_iter()
            .filter(|cells| !cells.is_empty())
            .map(|cells| cells.join(" | ")),
    );
    if lines.len() > 1 {
        Some(lines.join("\n"))
    } else {
        None
    }
}

#[cfg(feature = "xlsx")]
mod backend {
    use calamine::{open_workbook_from_rs, Data, ExcelDateTime, Range, Reader, Xls, Xlsx};
    use std::io::{Cursor, Read, Seek};
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use tracing::debug;

    use super::{render_sheet, MAX_ROWS, NO_DATA_MESSAGE};
    use crate::extract::{compound, DocumentFormat, ExtractError, ExtractResult, ExtractionOutcome};

    pub fn extract(bytes: &[u8]) -> ExtractionOutcome {
        render(guarded(|| read_xlsx(bytes)))
    }

    pub fn extract_legacy(bytes: &[u8]) -> ExtractionOutcome {
        render(guarded(|| {
            if bytes.starts_with(b"PK") {
                return read_xlsx(bytes);
            }
            compound::check_layout(bytes)?;
            let workbook: Xls<_> =
                open_workbook_from_rs(Cursor::new(bytes.to_vec())).map_err(calamine::Error::from)?;
            sheet_blocks(workbook)
        }))
    }

    fn read_xlsx(bytes: &[u8]) -> ExtractResult<Vec<String>> {
        let workbook: Xlsx<_> =
            open_workbook_from_rs(Cursor::new(bytes.to_vec())).map_err(calamine::Error::from)?;
        sheet_blocks(workbook)
    }

    fn guarded(read: impl FnOnce() -> ExtractResult<Vec<String>>) -> ExtractResult<Vec<String>> {
        catch_unwind(AssertUnwindSafe(read)).map_err(ExtractError::from_panic)?
    }

    fn render(blocks: ExtractResult<Vec<String>>) -> ExtractionOutcome {
        match blocks {
            Ok(blocks) if blocks.is_empty() => ExtractionOutcome::empty(NO_DATA_MESSAGE),
            Ok(blocks) => ExtractionOutcome::Text(blocks.join("\n\n")),
            Err(e) => ExtractionOutcome::failed(DocumentFormat::Xlsx, e),
        }
    }

    fn sheet_blocks<RS, R>(mut workbook: R) -> ExtractResult<Vec<String>>
    where
        RS: Read + Seek,
        R: Reader<RS>,
        calamine::Error: From<R::Error>,
    {
        let mut blocks = Vec::new();
        for name in workbook.sheet_names().to_vec() {
            let range = workbook
                .worksheet_range(&name)
                .map_err(calamine::Error::from)?;
            debug!(target: "xlsx", sheet = %name, size = ?range.get_size(), "Read worksheet");
            if let Some(block) = render_sheet(&name, leading_rows(&range)) {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    /// Non-empty cell values of every row above [`MAX_ROWS`], counted from the
    /// top of the sheet rather than from the first used row.
    fn leading_rows(range: &Range<Data>) -> Vec<Vec<String>> {
        let first_row = range.start().map(|(row, _)| row).unwrap_or(0);
        range
            .rows()
            .zip(first_row..MAX_ROWS)
            .map(|(cells, _)| cells.iter().filter_map(cell_text).collect())
            .collect()
    }

    pub(super) fn cell_text(cell: &Data) -> Option<String> {
        match cell {
            Data::Empty => None,
            Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
            Data::Bool(true) => Some("True".to_string()),
            Data::Bool(false) => Some("False".to_string()),
            Data::DateTime(moment) => Some(date_text(moment)),
            other => Some(other.to_string()),
        }
    }

    /// Date cells as `YYYY-MM-DD HH:MM:SS`; time-only values (serial below one
    /// day) as `HH:MM:SS`.
    fn date_text(moment: &ExcelDateTime) -> String {
        match moment.as_datetime() {
            Some(dt) if moment.as_f64() < 1.0 => dt.format("%H:%M:%S").to_string(),
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => moment.as_f64().to_string(),
        }
    }
}

#[cfg(not(feature = "xlsx"))]
mod backend {
    use super::UNAVAILABLE_MESSAGE;
    use crate::extract::ExtractionOutcome;

    pub fn extract(_bytes: &[u8]) -> ExtractionOutcome {
        ExtractionOutcome::Unavailable(UNAVAILABLE_MESSAGE.to_string())
    }

    pub fn extract_legacy(_bytes: &[u8]) -> ExtractionOutcome {
        ExtractionOutcome::Unavailable(UNAVAILABLE_MESSAGE.to_string())
    }
}
