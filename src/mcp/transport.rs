use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use tokio::io::BufReader;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error};

use super::types::{McpMessage, McpNotification, McpRequest, McpResponse};

/// Newline-delimited JSON-RPC over stdin/stdout. Logs go to stderr, so stdout
/// carries nothing but responses.
pub struct StdioTransport {
    reader: FramedRead<BufReader<tokio::io::Stdin>, LinesCodec>,
    writer: FramedWrite<tokio::io::Stdout, LinesCodec>,
}

impl StdioTransport {
    pub fn new() -> Self {
        let reader = FramedRead::new(BufReader::new(tokio::io::stdin()), LinesCodec::new());
        let writer = FramedWrite::new(tokio::io::stdout(), LinesCodec::new());
        Self { reader, writer }
    }

    /// Next message, or `None` once stdin is closed. Blank lines are skipped.
    pub async fn read_message(&mut self) -> Result<Option<McpMessage>> {
        loop {
            match self.reader.next().await {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    debug!("Received: {}", line);
                    return parse_message(&line).map(Some);
                }
                Some(Err(e)) => {
                    error!("Error reading from stdin: {}", e);
                    return Err(anyhow!("Transport error: {}", e));
                }
                None => {
                    debug!("EOF reached");
                    return Ok(None);
                }
            }
        }
    }

    pub async fn write_response(&mut self, response: McpResponse) -> Result<()> {
        let json = serde_json::to_string(&response)?;
        debug!("Sending: {}", json);
        self.writer.send(json).await?;
        Ok(())
    }
}

/// A line with an `id` is a request, anything else a notification.
pub fn parse_message(line: &str) -> Result<McpMessage> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
        error!("Failed to parse JSON: {}", e);
        anyhow!("Invalid JSON: {}", e)
    })?;

    let Some(obj) = value.as_object() else {
        error!("Invalid JSON-RPC message structure");
        return Err(anyhow!("Invalid JSON-RPC message structure"));
    };

    if obj.contains_key("id") {
        serde_json::from_value::<McpRequest>(value)
            .map(McpMessage::Request)
            .map_err(|e| {
                error!("Failed to parse request: {}", e);
                anyhow!("Invalid JSON-RPC request: {}", e)
            })
    } else {
        serde_json::from_value::<McpNotification>(value)
            .map(McpMessage::Notification)
            .map_err(|e| {
                error!("Failed to parse notification: {}", e);
                anyhow!("Invalid JSON-RPC notification: {}", e)
            })
    }
}
