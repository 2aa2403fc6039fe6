//! Response framing.
//!
//! Two shapes exist: text/metadata records (newline- or tab-delimited
//! `key=value` lines) and streamed binary payloads. Headers are only emitted
//! on an interactive transport, and a content-disposition line only when a
//! full object is being transferred. Binary payloads move through a bounded
//! intermediate buffer in fixed-size chunks, so transfer size is not bounded
//! by process memory.
//!
//! Once the first response byte is out the protocol cannot downgrade to an
//! error; the dispatcher consults [`ResponseWriter::committed`] to decide
//! whether a failure may still be reported.

use crate::error::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed chunk size for streamed binary transfers.
pub const IO_CHUNK: usize = 64 * 1024;

/// Frames one request's response onto its output stream.
pub struct ResponseWriter<W> {
    out: W,
    interactive: bool,
    committed: bool,
}

impl<W: AsyncWrite + Unpin + Send> ResponseWriter<W> {
    pub fn new(out: W, interactive: bool) -> Self {
        Self {
            out,
            interactive,
            committed: false,
        }
    }

    /// True once any response byte (header or body) has been written.
    pub fn committed(&self) -> bool {
        self.committed
    }

    async fn begin(&mut self, content_type: &str, attachment: Option<&str>) -> Result<()> {
        if self.interactive {
            if let Some(filename) = attachment {
                self.out
                    .write_all(
                        format!(
                            "Content-Disposition: attachment; filename=\"{}\"\r\n",
                            filename
                        )
                        .as_bytes(),
                    )
                    .await?;
            }
            self.out
                .write_all(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes())
                .await?;
        }
        self.committed = true;
        Ok(())
    }

    /// Start a text/metadata response.
    pub async fn begin_text(&mut self) -> Result<()> {
        self.begin("text/plain", None).await
    }

    /// Start a markup response.
    pub async fn begin_xml(&mut self) -> Result<()> {
        self.begin("text/xml", None).await
    }

    /// Start a binary response. `attachment` carries the filename for the
    /// disposition header; pass it only for full-object transfers on an
    /// interactive transport (it is ignored otherwise).
    pub async fn begin_binary(&mut self, attachment: Option<&str>) -> Result<()> {
        self.begin("application/octet-stream", attachment).await
    }

    /// Emit one record line.
    pub async fn line(&mut self, record: &str) -> Result<()> {
        self.committed = true;
        self.out.write_all(record.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        Ok(())
    }

    /// Emit raw payload bytes.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.committed = true;
        self.out.write_all(bytes).await?;
        Ok(())
    }

    /// Copy up to `limit` bytes from `reader` in fixed-size chunks.
    /// Returns the number of bytes actually moved.
    pub async fn stream_from<R>(&mut self, reader: &mut R, limit: u64) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.committed = true;
        let mut buf = vec![0u8; IO_CHUNK];
        let mut moved: u64 = 0;
        while moved < limit {
            let want = ((limit - moved) as usize).min(IO_CHUNK);
            let got = reader.read(&mut buf[..want]).await?;
            if got == 0 {
                break;
            }
            self.out.write_all(&buf[..got]).await?;
            moved += got as u64;
        }
        Ok(moved)
    }

    /// The underlying sink, for engine-driven streaming. Callers must have
    /// begun a binary response first.
    pub fn sink(&mut self) -> &mut W {
        self.committed = true;
        &mut self.out
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.out.flush().await?;
        Ok(())
    }
}
