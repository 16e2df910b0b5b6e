//! Resumable thumbnail upload.
//!
//! The image is read and handed to a [`ChunkSink`] one chunk at a time
//! until the sink reports completion or the file runs out. The file handle
//! lives inside [`upload_file`], so it is closed on every exit path.

use std::path::Path;

use async_trait::async_trait;
use livecast_core::OutputError;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Upload chunk size (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// One piece of the file being uploaded.
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailChunk<'a> {
    /// Byte offset of `bytes` within the file.
    pub offset: u64,
    /// Total file size.
    pub total: u64,
    pub mime_type: &'a str,
    pub bytes: &'a [u8],
}

/// Receiver of upload chunks.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Sends one chunk. Returns `true` once the upload is complete.
    async fn send_chunk(&self, chunk: ThumbnailChunk<'_>) -> Result<bool, OutputError>;
}

/// Guesses the image MIME type from the file extension.
pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Uploads `path` through `sink`.
///
/// Returns `Ok(false)` without contacting the sink when `path` is not a
/// regular file. Otherwise returns whether the sink reported completion.
pub async fn upload_file(path: &Path, sink: &dyn ChunkSink) -> Result<bool, OutputError> {
    let read_err = |e: std::io::Error| {
        OutputError::new(format!("failed to read thumbnail {}: {e}", path.display()))
    };

    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Ok(false),
    };

    let mut file = tokio::fs::File::open(path).await.map_err(read_err)?;
    let total = metadata.len();
    let mime_type = mime_type(path);

    let mut buffer = Vec::with_capacity(CHUNK_SIZE);
    let mut offset = 0u64;
    let mut complete = false;

    while !complete {
        buffer.clear();
        let read = (&mut file)
            .take(CHUNK_SIZE as u64)
            .read_to_end(&mut buffer)
            .await
            .map_err(read_err)?;
        if read == 0 {
            break;
        }

        complete = sink
            .send_chunk(ThumbnailChunk {
                offset,
                total,
                mime_type,
                bytes: &buffer,
            })
            .await?;
        offset += read as u64;
    }

    debug!(path = %path.display(), bytes = offset, complete, "Thumbnail upload finished");
    Ok(complete)
}
