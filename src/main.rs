use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod extract;
mod mcp;
mod tools;
mod utils;

use extract::capabilities::{self, Backend, Capabilities};
use mcp::server::McpServer;
use utils::fetch::{DownloadConfig, Downloader};

/// Prints a formatted box with the given lines
/// Empty strings create empty lines, other strings are centered within the box
fn print_box(lines: &[String]) {
    const BOX_WIDTH: usize = 60; // Total width including borders
    const CONTENT_WIDTH: usize = BOX_WIDTH - 4; // Width for content (excluding "║  " and "  ║")

    eprintln!("\n\x1b[36m╔{}╗", "═".repeat(BOX_WIDTH - 2));

    for line in lines {
        if line.is_empty() {
            eprintln!("║{}║", " ".repeat(BOX_WIDTH - 2));
            continue;
        }

        let visible_len = strip_ansi_codes(line).chars().count();
        if visible_len < CONTENT_WIDTH {
            let total_padding = CONTENT_WIDTH - visible_len;
            let left_padding = total_padding / 2;
            let right_padding = total_padding - left_padding;

            eprintln!(
                "║  {}{}{}\x1b[36m║",
                " ".repeat(left_padding),
                line,
                " ".repeat(right_padding)
            );
        } else {
            eprintln!("║  {}\x1b[36m  ║", line);
        }
    }

    eprintln!("╚{}╝\x1b[0m\n", "═".repeat(BOX_WIDTH - 2));
}

/// Strips ANSI escape codes to calculate visible text length
fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::new();
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            if chars.next() == Some('[') {
                for c in chars.by_ref() {
                    if c.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

fn banner_lines(caps: &Capabilities) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        "\x1b[1m\x1b[31m Nara Extract: Bid Attachment Reader \x1b[0m".to_string(),
        String::new(),
        "\x1b[0m HWP · HWPX · PDF · DOCX · XLSX · ZIP \x1b[0m".to_string(),
        String::new(),
    ];
    for backend in Backend::ALL {
        let line = if caps.has(backend) {
            format!("\x1b[32m✓\x1b[0m {:<12}", backend.name())
        } else if backend.compiled_in() {
            format!("\x1b[33m–\x1b[0m {:<12}", format!("{} (off)", backend.name()))
        } else {
            format!("\x1b[90m✗ {:<12}\x1b[0m", backend.name())
        };
        lines.push(line);
    }
    lines.push(String::new());
    lines
}

fn cli() -> Command {
    Command::new("nara-extract")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A Model Context Protocol server that extracts text from bid attachments")
        .long_about(
            "This MCP server provides the following tool:\n\
            - analyze-bid-detail: Download a procurement attachment (HWP, HWPX, PDF, DOCX, XLSX, ZIP) \
            and return its text, optionally framed with strategic-analysis prompts\n\n\
            With --file, a local document is extracted once and printed to stdout instead.",
        )
        .arg(
            Arg::new("download-timeout")
                .long("download-timeout")
                .value_name("SECONDS")
                .help("Timeout for attachment downloads")
                .env("NARA_DOWNLOAD_TIMEOUT")
                .default_value("60")
                .value_parser(value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("max-download-mb")
                .long("max-download-mb")
                .value_name("MB")
                .help("Largest attachment accepted, in MiB")
                .env("NARA_MAX_DOWNLOAD_MB")
                .default_value("100")
                .value_parser(value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("disable-backend")
                .long("disable-backend")
                .value_name("NAME")
                .help("Disable an extraction backend (hwp-loader, hwp-ole, pdf, docx, xlsx); repeatable")
                .env("NARA_DISABLED_BACKENDS")
                .value_delimiter(',')
                .value_parser(value_parser!(Backend))
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("file")
                .long("file")
                .value_name("PATH")
                .help("Extract a local document, print its text and exit")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .help("Suppress the startup banner and non-error logs (for MCP clients)")
                .action(ArgAction::SetTrue),
        )
}

fn init_tracing(quiet: bool) {
    // stdout is reserved for JSON-RPC
    let default_level = if quiet { "error" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

/// Compiled-in backends minus the ones switched off on the command line.
fn resolve_capabilities(matches: &ArgMatches) -> Capabilities {
    let mut caps = Capabilities::compiled();
    if let Some(disabled) = matches.get_many::<Backend>("disable-backend") {
        for backend in disabled.copied() {
            if !backend.compiled_in() {
                warn!(backend = %backend, "Backend is not compiled into this build");
            }
            caps = caps.without(backend);
        }
    }
    caps
}

fn download_config(matches: &ArgMatches) -> DownloadConfig {
    let defaults = DownloadConfig::default();
    let timeout = matches
        .get_one::<u64>("download-timeout")
        .map(|s| Duration::from_secs(*s))
        .unwrap_or(defaults.timeout);
    let max_bytes = matches
        .get_one::<u64>("max-download-mb")
        .map(|mb| mb.saturating_mul(1024 * 1024))
        .unwrap_or(defaults.max_bytes);
    DownloadConfig { timeout, max_bytes }
}

async fn extract_local_file(path: PathBuf) -> Result<()> {
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path.to_string_lossy().into_owned();
    info!(file = %filename, size = bytes.len(), "Extracting local document");

    let text = tokio::task::spawn_blocking(move || extract::extract(&bytes, &filename, ""))
        .await
        .context("extraction task failed")?;
    println!("{}", text);
    Ok(())
}

async fn run(matches: ArgMatches) -> Result<()> {
    let caps = capabilities::install(resolve_capabilities(&matches));
    let enabled: Vec<&str> = caps.available().into_iter().map(|b| b.name()).collect();
    info!(backends = %enabled.join(", "), "Backend registry installed");

    if let Some(path) = matches.get_one::<PathBuf>("file") {
        return extract_local_file(path.clone()).await;
    }

    if !matches.get_flag("quiet") {
        print_box(&banner_lines(&caps));
    }

    let config = download_config(&matches);
    info!(
        timeout_secs = config.timeout.as_secs(),
        max_bytes = config.max_bytes,
        "Download settings"
    );
    let downloader = Downloader::new(&config).context("failed to build HTTP client")?;

    info!("Starting MCP server...");
    let mut server = McpServer::new(downloader);
    server.start().await
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("quiet"));

    if let Err(e) = run(matches).await {
        error!("{:#}", e);
        process::exit(1);
    }
}
