// gw-codec: frame encoding and gzip compression for the long-connection
// gateway. Two SDK-selected wire encodings are supported: a canonical,
// compact structured-binary encoding (bincode) and JSON. The session that
// negotiated a given `sdk_type` must stick to the matching encoding for its
// whole lifetime.

use serde::{Serialize, de::DeserializeOwned};
use std::io::Write;
use std::sync::Mutex;

#[derive(Debug)]
pub enum CodecError {
    Binary(bincode::Error),
    Json(serde_json::Error),
    Gzip(std::io::Error),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Binary(e) => write!(f, "binary codec error: {e}"),
            CodecError::Json(e) => write!(f, "json codec error: {e}"),
            CodecError::Gzip(e) => write!(f, "gzip error: {e}"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Binary(e) => Some(e),
            CodecError::Json(e) => Some(e),
            CodecError::Gzip(e) => Some(e),
        }
    }
}

/// Which wire encoding a session was established with. Chosen once at
/// handshake time from the client's declared SDK type and never switched
/// mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Canonical compact binary encoding.
    StructuredBinary,
    Json,
}

pub fn encode<T: Serialize>(encoding: Encoding, value: &T) -> Result<Vec<u8>, CodecError> {
    match encoding {
        Encoding::StructuredBinary => bincode::serialize(value).map_err(CodecError::Binary),
        Encoding::Json => serde_json::to_vec(value).map_err(CodecError::Json),
    }
}

pub fn decode<T: DeserializeOwned>(encoding: Encoding, bytes: &[u8]) -> Result<T, CodecError> {
    match encoding {
        Encoding::StructuredBinary => bincode::deserialize(bytes).map_err(CodecError::Binary),
        Encoding::Json => serde_json::from_slice(bytes).map_err(CodecError::Json),
    }
}

/// Frames at or above this size are eligible for gzip compression when the
/// session has compression enabled. Frames below the threshold are sent
/// uncompressed regardless of the session's compression flag.
pub const COMPRESS_MIN_BYTES: usize = 1024;

/// Pooled gzip compress/decompress, recycling the scratch `Vec<u8>` the gzip
/// stream writes into rather than reallocating one per frame.
pub struct GzipPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl Default for GzipPool {
    fn default() -> Self {
        Self::new()
    }
}

impl GzipPool {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
        }
    }

    fn take_buffer(&self, size_hint: usize) -> Vec<u8> {
        let mut pool = self.buffers.lock().expect("gzip buffer pool poisoned");
        match pool.pop() {
            Some(mut buf) => {
                buf.clear();
                buf.reserve(size_hint);
                buf
            }
            None => Vec::with_capacity(size_hint),
        }
    }

    fn return_buffer(&self, buf: Vec<u8>) {
        self.buffers
            .lock()
            .expect("gzip buffer pool poisoned")
            .push(buf);
    }

    /// Compress `data`, reusing a pooled scratch buffer for the gzip
    /// writer's destination. The buffer that comes back out is handed to
    /// the caller (it becomes the outbound frame payload); a fresh one is
    /// grown for the pool lazily on the next call.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let scratch = self.take_buffer(data.len());
        let mut encoder = flate2::write::GzEncoder::new(scratch, flate2::Compression::fast());
        encoder.write_all(data).map_err(CodecError::Gzip)?;
        encoder.finish().map_err(CodecError::Gzip)
    }

    /// Decompress `data` into a pooled scratch buffer, returned to the pool
    /// after the caller is done with it via [`GzipPool::reclaim`].
    pub fn decompress(&self, data: &[u8], size_hint: usize) -> Result<Vec<u8>, CodecError> {
        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut out = self.take_buffer(size_hint);
        decoder.read_to_end(&mut out).map_err(CodecError::Gzip)?;
        Ok(out)
    }

    /// Return a buffer obtained from `compress`/`decompress` to the pool
    /// once its contents have been consumed (e.g. written to the socket).
    pub fn reclaim(&self, buf: Vec<u8>) {
        self.return_buffer(buf);
    }

    /// Whether a payload of this size, on a compression-enabled session,
    /// should be gzip-compressed before being written to the socket.
    /// `threshold` is normally [`COMPRESS_MIN_BYTES`], surfaced as a
    /// parameter so callers that source it from `GatewayConfig` don't drift
    /// from the constant if the two are ever pointed at different values.
    pub fn should_compress(enabled: bool, payload_len: usize, threshold: usize) -> bool {
        enabled && payload_len >= threshold
    }
}
