//! Storage-engine and file-repository contracts.
//!
//! The dispatcher depends only on these traits; the filesystem
//! implementations live in [`crate::pixels`] and [`crate::files`]. Handles
//! are acquired in the mode the opcode needs and release their resources on
//! drop, so every exit path - including error paths - lets go of the
//! underlying storage.

use crate::error::Result;
use crate::geometry::{Coord, PixelSpan, Region};
use crate::method::Access;
use crate::request::NewPixelsSpec;
use crate::stats::{PlaneStats, StackStats};
use crate::types::{FileInfo, ObjectId, PixelHeader};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};

/// Streaming byte producer used for request bodies and file payloads.
pub type ByteSource = dyn AsyncRead + Send + Unpin;

/// Streaming byte consumer used for response payloads.
pub type ByteSink = dyn AsyncWrite + Send + Unpin;

/// The pixel storage engine.
#[async_trait]
pub trait PixelEngine: Send + Sync {
    /// Create a pixel set from a validated creation request.
    async fn create(&self, spec: &NewPixelsSpec) -> Result<ObjectId>;

    /// Acquire a handle in the given mode. `client_big_endian` describes the
    /// byte order of the data the client sends or expects; the engine swabs
    /// multi-byte samples as needed.
    async fn open(
        &self,
        id: ObjectId,
        mode: Access,
        client_big_endian: bool,
    ) -> Result<Box<dyn PixelsHandle>>;

    /// Stored thumbnail payload for a pixel set.
    async fn thumbnail(&self, id: ObjectId, size: Option<(u32, u32)>) -> Result<Bytes>;
}

/// An acquired pixel set.
#[async_trait]
pub trait PixelsHandle: Send {
    fn id(&self) -> ObjectId;

    fn header(&self) -> &PixelHeader;

    /// Repository path of the pixel payload.
    fn path(&self) -> &Path;

    /// Stream a contiguous span to `out`; returns pixels transferred.
    async fn read_span(
        &mut self,
        span: PixelSpan,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64>;

    /// Fill a contiguous span from `src`; returns pixels transferred.
    async fn write_span(
        &mut self,
        span: PixelSpan,
        src: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64>;

    /// Stream an axis-aligned box to `out`. The box's byte layout is this
    /// engine's contract; the caller has already bounds-checked the corners.
    async fn read_box(
        &mut self,
        lo: Coord,
        hi: Coord,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64>;

    /// Fill an axis-aligned box from `src`.
    async fn write_box(
        &mut self,
        lo: Coord,
        hi: Coord,
        src: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64>;

    /// Convert pixels from a baseline TIFF document into a plane-shaped
    /// span, honoring the selected directory index.
    async fn convert_tiff(&mut self, path: &Path, dir_index: u32, span: PixelSpan) -> Result<u64>;

    /// Recompute statistics over the written scope. The write fully
    /// precedes this computation.
    async fn refresh_stats(&mut self, scope: Region) -> Result<()>;

    /// Per-plane statistics, ordered z-fastest then c then t.
    async fn plane_stats(&mut self) -> Result<Vec<PlaneStats>>;

    /// Per-stack statistics, ordered c-fastest then t.
    async fn stack_stats(&mut self) -> Result<Vec<StackStats>>;

    /// Transition write-only to read-only. Without `force`, every plane
    /// must have been written. Returns the surviving identifier, which is
    /// the original of a content-identical set when one already exists.
    async fn finish(&mut self, force: bool) -> Result<ObjectId>;

    /// Render an 8-bit composite of one plane.
    async fn composite(&mut self, z: i64, t: i64) -> Result<Bytes>;

    /// Remove the set from the repository.
    async fn expunge(self: Box<Self>) -> Result<ObjectId>;
}

/// Source of an uploaded file payload.
pub enum UploadSource<'a> {
    /// Local-file fast path.
    LocalPath(&'a Path),
    /// Read from the request stream.
    Stream(&'a mut (dyn AsyncRead + Send + Unpin)),
}

/// The content-addressed file repository.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store `size` bytes under a new identifier. Content-identical uploads
    /// become aliases of the original entry.
    async fn upload(&self, name: &str, source: UploadSource<'_>, size: u64) -> Result<ObjectId>;

    /// Acquire a handle on a stored file.
    async fn open(&self, id: ObjectId) -> Result<Box<dyn FileHandle>>;

    /// Repository path of a stored file.
    async fn repository_path(&self, id: ObjectId) -> Result<PathBuf>;
}

/// An acquired repository file.
#[async_trait]
pub trait FileHandle: Send {
    fn id(&self) -> ObjectId;

    fn info(&self) -> &FileInfo;

    fn path(&self) -> &Path;

    /// Length in bytes of the stored payload.
    fn length(&self) -> u64 {
        self.info().length
    }

    /// Stream `length` bytes starting at `offset`.
    async fn reader(&mut self, offset: u64, length: u64) -> Result<Box<ByteSource>>;

    /// Remove the file from the repository.
    async fn expunge(self: Box<Self>) -> Result<ObjectId>;
}
