//! Stored markup (OME-XML) plumbing.
//!
//! Uploaded documents may arrive gzip-compressed; both the content sniff and
//! the import stream fall back to transparent gunzip when the stored payload
//! carries the gzip magic.

use crate::error::{PixError, Result};
use crate::response::ResponseWriter;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWrite;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// How much of a document the sniff inspects.
const SNIFF_LIMIT: usize = 8 * 1024;

async fn read_document(path: &Path, limit: Option<usize>) -> Result<Vec<u8>> {
    let raw = fs::read(path)
        .await
        .map_err(|e| PixError::Engine(format!("cannot read stored document: {}", e)))?;
    if raw.len() >= 2 && raw[..2] == GZIP_MAGIC {
        let mut decoder = GzDecoder::new(raw.as_slice());
        let mut out = Vec::new();
        match limit {
            Some(limit) => {
                out.resize(limit, 0);
                let mut filled = 0;
                while filled < limit {
                    match decoder.read(&mut out[filled..]) {
                        Ok(0) => break,
                        Ok(n) => filled += n,
                        Err(e) => {
                            return Err(PixError::Engine(format!("gunzip failed: {}", e)));
                        }
                    }
                }
                out.truncate(filled);
            }
            None => {
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| PixError::Engine(format!("gunzip failed: {}", e)))?;
            }
        }
        Ok(out)
    } else {
        match limit {
            Some(limit) if raw.len() > limit => Ok(raw[..limit].to_vec()),
            _ => Ok(raw),
        }
    }
}

/// True when the document's root element is `OME` (with or without a
/// namespace prefix).
pub async fn sniff_is_ome(path: &Path) -> Result<bool> {
    let head = read_document(path, Some(SNIFF_LIMIT)).await?;
    let text = String::from_utf8_lossy(&head);
    Ok(root_element(&text).map(|root| {
        let local = root.rsplit(':').next().unwrap_or(root);
        local == "OME"
    }) == Some(true))
}

/// First element name of a document, skipping the declaration, comments and
/// processing instructions.
fn root_element(text: &str) -> Option<&str> {
    let mut rest = text.trim_start_matches('\u{feff}');
    loop {
        let open = rest.find('<')?;
        rest = &rest[open + 1..];
        match rest.chars().next()? {
            '?' => {
                let end = rest.find("?>")?;
                rest = &rest[end + 2..];
            }
            '!' => {
                let end = rest.find('>')?;
                rest = &rest[end + 1..];
            }
            _ => {
                let end = rest.find(|c: char| c.is_whitespace() || c == '>' || c == '/')?;
                return Some(&rest[..end]);
            }
        }
    }
}

/// Stream a stored document, gunzipped when needed.
pub async fn stream_document<W>(path: &Path, out: &mut ResponseWriter<W>) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let document = read_document(path, None).await?;
    out.write_all(&document).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    const OME_DOC: &str =
        "<?xml version=\"1.0\"?>\n<!-- scan export -->\n<OME xmlns=\"http://www.openmicroscopy.org/XMLschemas\">\n</OME>\n";

    async fn write_doc(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, data).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_sniff_plain_document() {
        let temp = TempDir::new().unwrap();
        let path = write_doc(&temp, "a.xml", OME_DOC.as_bytes()).await;
        assert!(sniff_is_ome(&path).await.unwrap());

        let path = write_doc(&temp, "b.xml", b"<?xml version=\"1.0\"?><Scan/>").await;
        assert!(!sniff_is_ome(&path).await.unwrap());

        let path = write_doc(&temp, "c.bin", &[0u8, 1, 2, 3]).await;
        assert!(!sniff_is_ome(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_sniff_prefixed_root() {
        let temp = TempDir::new().unwrap();
        let path = write_doc(&temp, "p.xml", b"<ome:OME xmlns:ome=\"x\"/>").await;
        assert!(sniff_is_ome(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_gzip_fallback() {
        let temp = TempDir::new().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(OME_DOC.as_bytes()).unwrap();
        let gz = encoder.finish().unwrap();
        let path = write_doc(&temp, "a.xml.gz", &gz).await;
        assert!(sniff_is_ome(&path).await.unwrap());

        let mut buf = Vec::new();
        {
            let mut writer = ResponseWriter::new(&mut buf, false);
            stream_document(&path, &mut writer).await.unwrap();
        }
        assert_eq!(buf, OME_DOC.as_bytes());
    }
}
