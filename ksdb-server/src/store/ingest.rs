//! Streaming media ingestion
//!
//! The request body is written to the store while it is hashed and counted.
//! Each chunk is also handed to a concurrent analyzer over a bounded channel,
//! which decodes image headers for width/height. The write path and the
//! analyzer are joined before the metadata is returned.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use ksdb_common::db::File;
use ksdb_common::{Error, Result};
use sha2::{Digest as _, Sha256};
use std::fmt::Display;
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{probe, BoxWriter, FileStore};

/// SHA-256 digest; formats as lowercase hex with `{:x}`
pub type Digest = sha2::digest::Output<Sha256>;

const OCTET_STREAM: &str = "application/octet-stream";

/// Chunks buffered between the writer and the image analyzer
const ANALYZE_QUEUE: usize = 8;

/// The analyzer gives up when no image header was found in this many bytes
const MAX_HEADER_BYTES: usize = 256 * 1024;

/// Bytes kept for content sniffing
const SNIFF_BYTES: usize = 8 * 1024;

/// Store `body` as a new blob and describe it
///
/// `declared_type` is the client's content type; when missing or
/// `application/octet-stream` the type is sniffed from the content. When
/// `expected` is given and does not match, the blob is removed and
/// `InvalidInput` is returned.
pub async fn ingest<S, E>(
    store: &dyn FileStore,
    declared_type: Option<&str>,
    expected: Option<Digest>,
    body: S,
) -> Result<File>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send,
    E: Display,
{
    let mut file = File::new(OCTET_STREAM);
    let writer = store.create(file.id).await?;

    let (tx, rx) = mpsc::channel::<Bytes>(ANALYZE_QUEUE);
    let analyzer = tokio::spawn(image_dimensions(rx));

    let written = write_body(writer, body, tx).await;

    let dimensions = match analyzer.await {
        Ok(dimensions) => dimensions,
        Err(e) => {
            warn!(file_id = %file.id, error = %e, "Image analyzer task failed");
            None
        }
    };

    let written = match written {
        Ok(written) => written,
        Err(e) => {
            discard(store, &file).await;
            return Err(e.into());
        }
    };

    if let Some(expected) = expected {
        if expected != written.digest {
            discard(store, &file).await;
            return Err(Error::InvalidInput(format!(
                "Content-Digest mismatch: expected sha-256 {:x}, got {:x}",
                expected,
                written.digest
            )));
        }
    }

    file.content_type = resolve_content_type(declared_type, &written.head);
    file.size = written.size as i64;
    file.checksum = format!("{:x}", written.digest);
    if let Some((width, height)) = dimensions {
        file.width = Some(width);
        file.height = Some(height);
    }

    if is_timed_media(&file.content_type) {
        if let Some(path) = store.local_path(file.id) {
            file.duration_ms = probe::duration_ms(path).await;
        }
    }

    debug!(
        file_id = %file.id,
        content_type = %file.content_type,
        size = file.size,
        "Ingested media file"
    );
    Ok(file)
}

struct Written {
    size: u64,
    digest: Digest,
    head: Vec<u8>,
}

async fn write_body<S, E>(
    mut writer: BoxWriter,
    mut body: S,
    analyzer: mpsc::Sender<Bytes>,
) -> io::Result<Written>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send,
    E: Display,
{
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut head = Vec::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| io::Error::other(format!("Failed to read body: {}", e)))?;
        hasher.update(&chunk);
        size += chunk.len() as u64;
        if head.len() < SNIFF_BYTES {
            let take = (SNIFF_BYTES - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
        }
        writer.write_all(&chunk).await?;
        // The analyzer hangs up once it is done; the write goes on regardless.
        let _ = analyzer.send(chunk).await;
    }
    writer.shutdown().await?;

    Ok(Written {
        size,
        digest: hasher.finalize(),
        head,
    })
}

/// Decode width/height from the leading bytes of an image stream
///
/// Returns as soon as the header is decoded, or when the content is not an
/// image, or after [`MAX_HEADER_BYTES`].
async fn image_dimensions(mut rx: mpsc::Receiver<Bytes>) -> Option<(i64, i64)> {
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk) = rx.recv().await {
        buf.extend_from_slice(&chunk);
        // Enough for every signature imagesize recognizes.
        if buf.len() < 16 {
            continue;
        }
        if imagesize::image_type(&buf).is_err() {
            return None;
        }
        match imagesize::blob_size(&buf) {
            Ok(size) => return Some((size.width as i64, size.height as i64)),
            Err(_) if buf.len() < MAX_HEADER_BYTES => continue,
            Err(_) => return None,
        }
    }

    imagesize::blob_size(&buf)
        .ok()
        .map(|size| (size.width as i64, size.height as i64))
}

async fn discard(store: &dyn FileStore, file: &File) {
    if let Err(e) = store.delete(file.id).await {
        warn!(file_id = %file.id, error = %e, "Failed to remove discarded blob");
    }
}

fn resolve_content_type(declared: Option<&str>, head: &[u8]) -> String {
    let declared = declared
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty() && ct != OCTET_STREAM);

    match declared {
        Some(ct) => ct,
        None => infer::get(head)
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_else(|| OCTET_STREAM.to_string()),
    }
}

fn is_timed_media(content_type: &str) -> bool {
    content_type.starts_with("audio/") || content_type.starts_with("video/")
}

/// Parse a `Content-Digest` header (RFC 9530) and return the SHA-256 value
///
/// Other algorithms are ignored; `None` means there is nothing to verify.
pub fn parse_content_digest(header: &str) -> Result<Option<Digest>> {
    for entry in header.split(',') {
        let Some((algorithm, value)) = entry.split_once('=') else {
            continue;
        };
        if !algorithm.trim().eq_ignore_ascii_case("sha-256") {
            continue;
        }
        let encoded = value
            .trim()
            .strip_prefix(':')
            .and_then(|v| v.strip_suffix(':'))
            .ok_or_else(|| {
                Error::InvalidInput("Content-Digest value must be wrapped in colons".to_string())
            })?;
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|e| Error::InvalidInput(format!("Content-Digest is not base64: {}", e)))?;
        let digest = Digest::from_exact_iter(decoded).ok_or_else(|| {
            Error::InvalidInput("Content-Digest sha-256 must be 32 bytes".to_string())
        })?;
        return Ok(Some(digest));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsStore;

    // 3x2 PNG: signature + IHDR
    const PNG_HEADER: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48,
        0x44, 0x52, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x02, 0x08, 0x06, 0x00, 0x00,
        0x00, 0x9D, 0x74, 0x66, 0x1A,
    ];

    fn chunks(
        parts: Vec<&'static [u8]>,
    ) -> impl Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin + Send {
        futures::stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p))))
    }

    fn sha256(data: &[u8]) -> Digest {
        Sha256::digest(data)
    }

    #[tokio::test]
    async fn test_ingest_image_split_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        let file = ingest(
            &store,
            None,
            None,
            chunks(vec![&PNG_HEADER[..10], &PNG_HEADER[10..20], &PNG_HEADER[20..]]),
        )
        .await
        .unwrap();

        assert_eq!(file.content_type, "image/png");
        assert_eq!(file.size, PNG_HEADER.len() as i64);
        assert_eq!(file.checksum, format!("{:x}", sha256(PNG_HEADER)));
        assert_eq!((file.width, file.height), (Some(3), Some(2)));
        assert_eq!(std::fs::read(store.path(file.id)).unwrap(), PNG_HEADER);
    }

    #[tokio::test]
    async fn test_declared_type_wins_over_sniffing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        let file = ingest(&store, Some("Text/Plain; charset=utf-8"), None, chunks(vec![&b"hello"[..]]))
            .await
            .unwrap();
        assert_eq!(file.content_type, "text/plain");
        assert_eq!(file.width, None);
    }

    #[tokio::test]
    async fn test_digest_match_and_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        let ok = ingest(&store, None, Some(sha256(b"payload")), chunks(vec![&b"pay"[..], &b"load"[..]]))
            .await
            .unwrap();
        assert_eq!(ok.size, 7);

        let err = ingest(&store, None, Some(sha256(b"other")), chunks(vec![&b"payload"[..]]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        // Only the accepted blob is left on disk.
        let blobs = walkdir::WalkDir::new(dir.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        assert_eq!(blobs, 1);
    }

    #[tokio::test]
    async fn test_body_error_removes_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let body = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);

        let err = ingest(&store, None, None, body).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        let leftovers = walkdir::WalkDir::new(dir.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_parse_content_digest() {
        let digest = sha256(b"abc");
        let header = format!("md5=:xyz:, sha-256=:{}:", STANDARD.encode(digest));
        assert_eq!(parse_content_digest(&header).unwrap(), Some(digest));

        assert_eq!(parse_content_digest("sha-512=:AAAA:").unwrap(), None);
        assert!(parse_content_digest("sha-256=abc").is_err());
        assert!(parse_content_digest("sha-256=:AAAA:").is_err());
    }
}
