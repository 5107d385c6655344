//! Worker boundary protocol
//!
//! One bincode-encoded [`ConvertRequest`] goes in, one bincode-encoded
//! [`ConvertResponse`] comes out. Each side reads its input to end of stream,
//! so no framing is needed.

use super::codec::Codec;
use super::WorkerError;
use crate::config::TargetFormat;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Conversion request sent to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertRequest {
    pub bytes: Vec<u8>,
    pub format: TargetFormat,
    pub quality: f32,
}

/// Exactly one of these answers each request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConvertResponse {
    Converted { bytes: Vec<u8> },
    Failed { error: String },
}

impl ConvertRequest {
    pub fn encode(&self) -> Result<Vec<u8>, WorkerError> {
        bincode::serialize(self).map_err(|e| WorkerError::Protocol(e.to_string()))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WorkerError> {
        bincode::deserialize(buf).map_err(|e| WorkerError::Protocol(e.to_string()))
    }
}

impl ConvertResponse {
    pub fn encode(&self) -> Result<Vec<u8>, WorkerError> {
        bincode::serialize(self).map_err(|e| WorkerError::Protocol(e.to_string()))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WorkerError> {
        bincode::deserialize(buf).map_err(|e| WorkerError::Protocol(e.to_string()))
    }

    /// Empty output is never a success.
    pub fn into_result(self) -> Result<Vec<u8>, WorkerError> {
        match self {
            ConvertResponse::Converted { bytes } if bytes.is_empty() => Err(WorkerError::EmptyOutput),
            ConvertResponse::Converted { bytes } => Ok(bytes),
            ConvertResponse::Failed { error } => Err(WorkerError::Codec(error)),
        }
    }
}

impl From<Result<Vec<u8>, String>> for ConvertResponse {
    fn from(result: Result<Vec<u8>, String>) -> Self {
        match result {
            Ok(bytes) => ConvertResponse::Converted { bytes },
            Err(error) => ConvertResponse::Failed { error },
        }
    }
}

/// Serve a single request: read it from `reader`, run `codec`, write the
/// response to `writer`.
///
/// Codec failures and undecodable requests are answered with
/// `ConvertResponse::Failed`; only IO errors on the streams are returned.
pub fn serve_one<R: Read, W: Write>(codec: &dyn Codec, mut reader: R, mut writer: W) -> io::Result<()> {
    let mut input = Vec::new();
    reader.read_to_end(&mut input)?;

    let response = match ConvertRequest::decode(&input) {
        Ok(request) => {
            tracing::debug!(
                bytes = request.bytes.len(),
                format = %request.format,
                quality = request.quality,
                "worker received request"
            );
            codec
                .convert(&request.bytes, request.format, request.quality)
                .map_err(|e| e.to_string())
                .into()
        }
        Err(e) => ConvertResponse::Failed {
            error: e.to_string(),
        },
    };

    let encoded = response
        .encode()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    writer.write_all(&encoded)?;
    writer.flush()
}
