use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::mcp::types::{CallToolResult, ToolAnnotations, ToolDefinition};
use crate::utils::content_guard::limit_extracted_text;
use crate::utils::fetch::{extract_text_from_url, Downloader};

pub static ANALYZE_BID_DETAIL_TOOL_DEFINITION: Lazy<ToolDefinition> = Lazy::new(|| ToolDefinition {
    name: "analyze-bid-detail".to_string(),
    description: "Download a bid attachment (RFP / 제안요청서) and extract its text for strategic analysis. \
        Supports HWP, HWPX, PDF, DOCX, XLSX and ZIP files. Inside a ZIP the document is picked by priority: \
        제안요청서 > 과업지시서 > .hwp/.hwpx > .docx/.pdf."
        .to_string(),
    input_schema: json!({
        "type": "object",
        "properties": {
            "file_url": {
                "type": "string",
                "description": "Attachment download URL (ntceSpecDocUrl1 from search results)"
            },
            "filename": {
                "type": "string",
                "description": "Attachment filename (ntceSpecFileNm1 from search results); its extension selects the extractor"
            },
            "department_profile": {
                "type": "string",
                "description": "Optional description of your team. When given, the response includes prompts for fit score, core tasks, winning strategy and risk factors"
            },
            "maxLength": {
                "type": "integer",
                "description": "Maximum length in bytes of the extracted text (default: unlimited)",
                "minimum": 1000
            }
        },
        "required": ["file_url", "filename"]
    }),
    annotations: Some(ToolAnnotations {
        title: Some("Analyze Bid Detail".to_string()),
        read_only_hint: Some(true),
        open_world_hint: Some(true),
    }),
});

#[derive(Debug, Default, Deserialize)]
struct AnalyzeBidDetailParams {
    #[serde(default)]
    file_url: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    department_profile: Option<String>,
    #[serde(default, rename = "maxLength")]
    max_length: Option<usize>,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, String> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(format!("❌ Error: '{}' parameter is required", name)),
    }
}

/// Assembles the tool response around the extracted text.
pub fn render_report(file_url: &str, filename: &str, department_profile: Option<&str>, text: &str) -> String {
    let rule = "=".repeat(80);
    let mut lines: Vec<String> = vec![
        "# 📄 Bid Document Analysis".to_string(),
        String::new(),
        format!("**File:** {}", filename),
        format!("**Source:** {}", file_url),
        String::new(),
    ];

    if let Some(profile) = department_profile.filter(|p| !p.is_empty()) {
        lines.extend([
            format!("📋 **Department Profile:** {}", profile),
            String::new(),
            rule.clone(),
            String::new(),
            "**Instructions for Strategic Analysis:**".to_string(),
            format!(
                "Based on the extracted text below, analyze this project from the perspective of '{}':",
                profile
            ),
            "1. **Fit Score (0-100):** How well does this project match the team's skills?".to_string(),
            "2. **Core Tasks:** List only tasks that this team would perform".to_string(),
            "3. **Winning Strategy:** Suggest 3 specific approaches to appeal to the client".to_string(),
            "4. **Risk Factors:** Identify risky clauses (tech stack, timeline, penalties)".to_string(),
            String::new(),
            rule,
        ]);
    }

    lines.extend([
        String::new(),
        "## Extracted Document Content:".to_string(),
        String::new(),
        text.to_string(),
    ]);
    lines.join("\n")
}

pub struct AnalyzeBidDetailTool {
    downloader: Downloader,
}

impl AnalyzeBidDetailTool {
    pub fn new(downloader: Downloader) -> Self {
        Self { downloader }
    }

    pub async fn execute(&self, arguments: Option<serde_json::Value>) -> CallToolResult {
        let params = match arguments {
            Some(args) => match serde_json::from_value::<AnalyzeBidDetailParams>(args) {
                Ok(params) => params,
                Err(e) => {
                    error!("Invalid analyze-bid-detail parameters: {}", e);
                    return CallToolResult::error(format!("Invalid parameters: {}", e));
                }
            },
            None => AnalyzeBidDetailParams::default(),
        };

        let file_url = match required(&params.file_url, "file_url") {
            Ok(v) => v,
            Err(message) => return CallToolResult::error(message),
        };
        let filename = match required(&params.filename, "filename") {
            Ok(v) => v,
            Err(message) => return CallToolResult::error(message),
        };

        if let Err(e) = url::Url::parse(file_url) {
            return CallToolResult::error(format!(
                "❌ Failed to analyze bid document: Invalid URL: {}\n\nManual link: {}",
                e, file_url
            ));
        }

        info!(
            "Analyzing bid attachment: {} ({}, maxLength: {:?})",
            filename, file_url, params.max_length
        );

        let text = extract_text_from_url(&self.downloader, file_url, filename).await;
        let text = limit_extracted_text(&text, params.max_length);

        CallToolResult::success(render_report(
            file_url,
            filename,
            params.department_profile.as_deref(),
            &text,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::fetch::DownloadConfig;

    fn tool() -> AnalyzeBidDetailTool {
        AnalyzeBidDetailTool::new(Downloader::new(&DownloadConfig::default()).unwrap())
    }

    fn text_of(result: &CallToolResult) -> &str {
        &result.content[0].text
    }

    #[test]
    fn report_without_profile() {
        let report = render_report("https://example.org/a.hwp", "a.hwp", None, "본문");
        assert_eq!(
            report,
            "# 📄 Bid Document Analysis\n\n**File:** a.hwp\n**Source:** https://example.org/a.hwp\n\n\n## Extracted Document Content:\n\n본문"
        );
    }

    #[test]
    fn report_with_profile_frames_instructions() {
        let report = render_report("u", "f.pdf", Some("AI 개발팀"), "text");
        let rule = "=".repeat(80);
        assert!(report.contains("📋 **Department Profile:** AI 개발팀\n\n"));
        assert!(report.contains("from the perspective of 'AI 개발팀':"));
        assert_eq!(report.matches(&rule).count(), 2);
        assert!(report.contains(&format!("{}\n\n## Extracted Document Content:\n\ntext", rule)));
    }

    #[test]
    fn empty_profile_is_ignored() {
        assert_eq!(
            render_report("u", "f", Some(""), "t"),
            render_report("u", "f", None, "t")
        );
    }

    #[tokio::test]
    async fn missing_parameters_are_reported_in_order() {
        let result = tool().execute(None).await;
        assert_eq!(result.is_error, Some(true));
        assert_eq!(text_of(&result), "❌ Error: 'file_url' parameter is required");

        let result = tool()
            .execute(Some(json!({ "file_url": "https://example.org/x.hwp", "filename": "" })))
            .await;
        assert_eq!(text_of(&result), "❌ Error: 'filename' parameter is required");
    }

    #[tokio::test]
    async fn malformed_url_fails_with_manual_link() {
        let result = tool()
            .execute(Some(json!({ "file_url": "nara/attach.hwp", "filename": "attach.hwp" })))
            .await;
        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).starts_with("❌ Failed to analyze bid document: Invalid URL: "));
        assert!(text_of(&result).ends_with("\n\nManual link: nara/attach.hwp"));
    }
}
