use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;

use super::{EngineError, QueryEngine, RowStream};
use crate::data::{Row, Value};

/// Path of the script execution endpoint
pub const EXECUTE_PATH: &str = "/v1/scripts/execute";

const API_KEY_HEADER: &str = "pixie-api-key";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Query engine reached over HTTP, answering with newline-delimited JSON
#[derive(Debug, Clone)]
pub struct HttpQueryEngine {
    http_client: reqwest::Client,
    url: String,
    cluster_id: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    cluster_id: &'a str,
    script: &'a str,
}

impl HttpQueryEngine {
    /// `endpoint` may omit the scheme, in which case https is assumed.
    /// No overall request timeout is set since results are streamed; the
    /// collection worker bounds each cycle instead.
    pub fn new(
        endpoint: &str,
        cluster_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            url: execute_url(endpoint),
            cluster_id: cluster_id.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl QueryEngine for HttpQueryEngine {
    async fn execute(&self, script: &str) -> Result<RowStream, EngineError> {
        let request = ExecuteRequest {
            cluster_id: &self.cluster_id,
            script,
        };

        let response = self
            .http_client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EngineError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        Ok(decode_ndjson(response.bytes_stream()))
    }
}

fn execute_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        format!("{}{}", endpoint, EXECUTE_PATH)
    } else {
        format!("https://{}{}", endpoint, EXECUTE_PATH)
    }
}

struct LineDecoder<S> {
    chunks: S,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline
    scanned: usize,
    finished: bool,
}

/// Turn a stream of body chunks into rows, one JSON object per line
///
/// Blank lines are skipped and the last line may omit its newline. A
/// transport error ends the stream after being yielded once.
pub fn decode_ndjson<S, B, E>(chunks: S) -> RowStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let decoder = LineDecoder {
        chunks: Box::pin(chunks),
        buffer: Vec::new(),
        scanned: 0,
        finished: false,
    };

    stream::unfold(decoder, |mut decoder| async move {
        loop {
            let unscanned = &decoder.buffer[decoder.scanned..];
            if let Some(offset) = unscanned.iter().position(|b| *b == b'\n') {
                let pos = decoder.scanned + offset;
                decoder.scanned = 0;
                let line: Vec<u8> = decoder.buffer.drain(..=pos).collect();
                match parse_line(&line[..pos]) {
                    Some(row) => return Some((row, decoder)),
                    None => continue,
                }
            }

            decoder.scanned = decoder.buffer.len();

            if decoder.finished {
                decoder.scanned = 0;
                let rest = std::mem::take(&mut decoder.buffer);
                return parse_line(&rest).map(|row| (row, decoder));
            }

            match decoder.chunks.next().await {
                Some(Ok(chunk)) => decoder.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    decoder.finished = true;
                    decoder.buffer.clear();
                    decoder.scanned = 0;
                    return Some((Err(EngineError::Network(e.to_string())), decoder));
                }
                None => decoder.finished = true,
            }
        }
    })
    .boxed()
}

/// `None` for blank lines
fn parse_line(line: &[u8]) -> Option<Result<Row, EngineError>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    let parsed = match serde_json::from_slice::<serde_json::Value>(line) {
        Ok(serde_json::Value::Object(object)) => Ok(object
            .iter()
            .map(|(column, cell)| (column.clone(), Value::from_json(cell, column)))
            .collect()),
        Ok(other) => Err(EngineError::Decode(format!(
            "expected a JSON object per row, got {}",
            other
        ))),
        Err(e) => Err(EngineError::Decode(e.to_string())),
    };
    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, String>> + Send + 'static {
        let parts: Vec<_> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(parts)
    }

    async fn collect(stream: RowStream) -> Vec<Result<Row, EngineError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_rows_split_across_chunks() {
        let rows = collect(decode_ndjson(chunks(&[
            r#"{"time_": 1700000000000000000, "pod": "ns/a", "lat"#,
            "ency\": 12}\n{\"pod\": \"ns/b\"",
            ", \"latency\": 3.5}\n",
        ])))
        .await;

        assert_eq!(rows.len(), 2);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.get("time_"), Some(&Value::Timestamp(1_700_000_000_000_000_000)));
        assert_eq!(first.get("latency"), Some(&Value::Int64(12)));
        assert_eq!(first.string("pod"), "ns/a");

        let second = rows[1].as_ref().unwrap();
        assert_eq!(second.get("latency"), Some(&Value::Float64(3.5)));
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline_and_blank_lines() {
        let rows = collect(decode_ndjson(chunks(&["\n{\"a\": 1}\n\n", "{\"a\": 2}"]))).await;
        let values: Vec<_> = rows
            .into_iter()
            .map(|r| r.unwrap().int64("a").unwrap())
            .collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_byte_sized_chunks() {
        let body = "{\"a\": 1, \"req_path\": \"/items/42\"}\n{\"a\": 2}\n{\"a\": 3}";
        let parts: Vec<String> = body.chars().map(String::from).collect();
        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();

        let rows = collect(decode_ndjson(chunks(&parts))).await;
        let values: Vec<_> = rows
            .into_iter()
            .map(|r| r.unwrap().int64("a").unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_array_cell_kept_as_text() {
        let rows = collect(decode_ndjson(chunks(&[r#"{"service": ["ns/a","ns/b"]}"#]))).await;
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.string("service"), r#"["ns/a","ns/b"]"#);
    }

    #[tokio::test]
    async fn test_malformed_line_is_a_decode_error() {
        let rows = collect(decode_ndjson(chunks(&["[1, 2]\n", "not json\n", "{\"ok\": true}\n"]))).await;
        assert_eq!(rows.len(), 3);
        assert!(matches!(rows[0], Err(EngineError::Decode(_))));
        assert!(matches!(rows[1], Err(EngineError::Decode(_))));
        assert!(rows[2].is_ok());
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let parts: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"{\"a\": 1}\n{\"a\":".to_vec()),
            Err("connection reset".to_string()),
            Ok(b"{\"a\": 3}\n".to_vec()),
        ];
        let rows = collect(decode_ndjson(stream::iter(parts))).await;
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_ok());
        assert_eq!(rows[1], Err(EngineError::Network("connection reset".into())));
    }

    #[test]
    fn test_execute_url() {
        assert_eq!(
            execute_url("work.withpixie.ai:443"),
            "https://work.withpixie.ai:443/v1/scripts/execute"
        );
        assert_eq!(
            execute_url("http://localhost:8080/"),
            "http://localhost:8080/v1/scripts/execute"
        );
    }
}
