use super::{BodyReader, DecodeError, Response, WireDecoder};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// Binary-packed encoding: the whole body is a single msgpack `Response`.
pub struct PackedDecoder;

#[async_trait]
impl WireDecoder for PackedDecoder {
    fn content_type(&self) -> &'static str {
        "application/x-msgpack"
    }

    async fn decode(
        &self,
        mut body: BodyReader,
        cancel: &CancellationToken,
    ) -> Result<Response, DecodeError> {
        if cancel.is_cancelled() {
            return Err(DecodeError::Cancelled);
        }

        let mut buf = Vec::new();
        tokio::select! {
            _ = cancel.cancelled() => return Err(DecodeError::Cancelled),
            read = body.read_to_end(&mut buf) => {
                read.map_err(|err| DecodeError::Stream {
                    partial: Box::new(Response::default()),
                    offset: buf.len() as u64,
                    message: err.to_string(),
                })?;
            }
        }

        rmp_serde::from_slice(&buf).map_err(|err| DecodeError::Malformed {
            size: buf.len(),
            message: err.to_string(),
        })
    }
}
