//! Stdio transport
//!
//! Newline-delimited JSON-RPC over stdin/stdout for single-tenant use. All
//! tool calls go to the one client configured at startup.

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::context::ToolContext;
use super::handler::{handle_message, McpState, SessionState};

/// Serve MCP messages read line by line from `reader` until it is exhausted.
pub async fn serve_lines<R, W>(
    reader: R,
    mut writer: W,
    mcp_state: &McpState,
    ctx: &ToolContext,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = SessionState::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(response) = handle_message(line, ctx, mcp_state, &mut session).await {
            let mut encoded = serde_json::to_vec(&response)?;
            encoded.push(b'\n');
            writer.write_all(&encoded).await?;
            writer.flush().await?;
        }
    }

    debug!("Input closed");
    Ok(())
}

/// Serve MCP on the process's stdin and stdout.
pub async fn run_stdio(mcp_state: &McpState, ctx: ToolContext) -> Result<()> {
    info!("Serving MCP over stdio");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve_lines(stdin, tokio::io::stdout(), mcp_state, &ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::handler::create_mcp_state;
    use serde_json::Value;

    async fn exchange(input: &str) -> Vec<Value> {
        let state = create_mcp_state();
        let mut output = Vec::new();
        serve_lines(input.as_bytes(), &mut output, &state, &ToolContext::default())
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_session_handshake_over_lines() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","capabilities":{},"clientInfo":{"name":"t","version":"0"}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );

        let responses = exchange(input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["result"]["tools"].as_array().unwrap().len(), 23);
    }

    #[tokio::test]
    async fn test_tools_before_initialize_are_rejected() {
        let responses = exchange("{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"tools/list\"}\n").await;
        assert_eq!(responses[0]["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_bad_line_does_not_stop_the_loop() {
        let responses = exchange("garbage\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n").await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[1]["result"], serde_json::json!({}));
    }
}
