use super::{BodyReader, DecodeError, Response, WireDecoder};
use crate::metrics_defs::DECODE_CHUNKS;
use async_trait::async_trait;
use shared::counter;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

/// Line-delimited JSON: every line is an independently valid encoded
/// `Response`; their `results` lists are appended in arrival order.
pub struct JsonLinesDecoder;

#[async_trait]
impl WireDecoder for JsonLinesDecoder {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    async fn decode(
        &self,
        mut body: BodyReader,
        cancel: &CancellationToken,
    ) -> Result<Response, DecodeError> {
        let mut accumulated = Response::default();
        let mut offset: u64 = 0;
        let mut line = String::new();

        loop {
            if cancel.is_cancelled() {
                return Err(DecodeError::Cancelled);
            }

            line.clear();
            let read = tokio::select! {
                _ = cancel.cancelled() => return Err(DecodeError::Cancelled),
                read = body.read_line(&mut line) => read,
            };

            match read {
                // Clean end of stream.
                Ok(0) => break,
                Ok(n) => {
                    offset += n as u64;
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let chunk: Response =
                        serde_json::from_str(trimmed).map_err(|err| DecodeError::Stream {
                            partial: Box::new(accumulated.clone()),
                            offset,
                            message: format!("invalid chunk: {err}"),
                        })?;

                    counter!(DECODE_CHUNKS).increment(1);
                    if accumulated.error.is_none() {
                        accumulated.error = chunk.error;
                    }
                    accumulated.results.extend(chunk.results);
                }
                Err(err) => {
                    return Err(DecodeError::Stream {
                        partial: Box::new(accumulated),
                        offset,
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(accumulated)
    }
}
