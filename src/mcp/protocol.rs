use super::types::*;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};

/// Newline-delimited JSON-RPC transport; stdio in production
pub struct Protocol<R = BufReader<Stdin>, W = Stdout> {
    reader: R,
    writer: W,
}

impl Protocol {
    pub fn new() -> Self {
        Self::with_io(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R: AsyncBufRead + Unpin, W: AsyncWrite + Unpin> Protocol<R, W> {
    pub fn with_io(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Read the next JSON-RPC message; `None` once the client hangs up.
    pub async fn read_request(&mut self) -> Result<Option<JsonRpcRequest>> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line).await {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let request = serde_json::from_str(trimmed)
                        .with_context(|| format!("Malformed JSON-RPC message: {}", truncate_for_log(trimmed)))?;
                    return Ok(Some(request));
                }
                Err(e) => {
                    tracing::warn!("stdin closed with error: {}", e);
                    return Ok(None);
                }
            }
        }
    }

    pub async fn send_response<T: Serialize>(&mut self, response: JsonRpcResponse<T>) -> Result<()> {
        let mut json = serde_json::to_vec(&response)?;
        json.push(b'\n');
        self.writer.write_all(&json).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub fn success_response<T: Serialize>(&self, id: Value, result: T) -> JsonRpcResponse<T> {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error_response(&self, id: Value, error: JsonRpcError) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    #[cfg(test)]
    fn into_writer(self) -> W {
        self.writer
    }
}

fn truncate_for_log(line: &str) -> &str {
    crate::indexer::truncate(line, 200)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_reads_messages_and_skips_blank_lines() {
        let input = b"\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n\n{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n";
        let mut protocol = Protocol::with_io(&input[..], Vec::new());

        let first = protocol.read_request().await.unwrap().unwrap();
        assert_eq!(first.method, "ping");
        assert_eq!(first.id, json!(1));
        let second = protocol.read_request().await.unwrap().unwrap();
        assert!(second.id.is_null());
        assert!(protocol.read_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_message_is_an_error() {
        let mut protocol = Protocol::with_io(&b"{not json\n"[..], Vec::new());
        assert!(protocol.read_request().await.is_err());
    }

    #[tokio::test]
    async fn test_writes_one_line_per_response() {
        let mut protocol = Protocol::with_io(&b""[..], Vec::new());
        let ok = protocol.success_response(json!(3), json!({}));
        protocol.send_response(ok).await.unwrap();
        let err = protocol.error_response(json!(4), JsonRpcError::method_not_found());
        protocol.send_response(err).await.unwrap();

        let written = String::from_utf8(protocol.into_writer()).unwrap();
        let lines: Vec<Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0], json!({"jsonrpc": "2.0", "id": 3, "result": {}}));
        assert_eq!(lines[1]["error"]["code"], -32601);
    }
}
