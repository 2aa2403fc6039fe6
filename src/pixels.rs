//! Filesystem pixel-storage engine.
//!
//! Each pixel set is a flat payload file under `Pixels/` plus a JSON sidecar
//! carrying the header, per-plane write tracking and computed statistics. A
//! content map under `Pixels/.sha1/` lets `finish` coalesce sets with
//! identical payloads onto the original identifier.
//!
//! Payload bytes are stored in native order; multi-byte samples are swabbed
//! on the way in and out when the client's byte order differs.

use crate::engine::{PixelEngine, PixelsHandle};
use crate::error::{PixError, Result};
use crate::geometry::{Coord, PixelShape, PixelSpan, Region};
use crate::method::Access;
use crate::request::NewPixelsSpec;
use crate::response::IO_CHUNK;
use crate::stats::{
    decode_samples, zeroed_plane_stats, zeroed_stack_stats, HistogramPass, PlaneStats,
    StackStats, StatsBuilder,
};
use crate::types::{ObjectId, PixelHeader, SampleType, DIGEST_LEN};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, SeekFrom};

const PIXELS_DIR: &str = "Pixels";
const CONTENT_MAP_DIR: &str = ".sha1";
const COUNTER_FILE: &str = ".last_id";

/// On-disk sidecar document for one pixel set.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct PixelSidecar {
    header: PixelHeader,
    planes_written: Vec<bool>,
    #[serde(default)]
    plane_stats: Vec<PlaneStats>,
    #[serde(default)]
    stack_stats: Vec<StackStats>,
}

/// Filesystem-backed pixel engine rooted at the repository directory.
pub struct FsPixelEngine {
    root: PathBuf,
    alloc: Mutex<()>,
}

impl FsPixelEngine {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            alloc: Mutex::new(()),
        }
    }

    fn pixels_dir(&self) -> PathBuf {
        self.root.join(PIXELS_DIR)
    }

    fn payload_path(&self, id: ObjectId) -> PathBuf {
        self.pixels_dir().join(id.to_string())
    }

    fn sidecar_path(&self, id: ObjectId) -> PathBuf {
        self.pixels_dir().join(format!("{}.json", id))
    }

    fn thumb_path(&self, id: ObjectId) -> PathBuf {
        self.pixels_dir().join(format!("{}.thumb", id))
    }

    fn next_id(&self) -> Result<ObjectId> {
        // counter updates are tiny synchronous writes under the lock
        let _guard = self.alloc.lock();
        let counter = self.pixels_dir().join(COUNTER_FILE);
        let last: ObjectId = std::fs::read_to_string(&counter)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        let id = last + 1;
        std::fs::write(&counter, id.to_string())?;
        Ok(id)
    }

    async fn load_sidecar(&self, id: ObjectId) -> Result<PixelSidecar> {
        let raw = fs::read(self.sidecar_path(id))
            .await
            .map_err(|_| PixError::NotFound(format!("Pixels {}", id)))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl PixelEngine for FsPixelEngine {
    async fn create(&self, spec: &NewPixelsSpec) -> Result<ObjectId> {
        SampleType::from_header(spec.bytes_per_pixel, spec.signed, spec.float)
            .ok_or_else(|| PixError::Engine("unsupported pixel type combination".to_string()))?;

        fs::create_dir_all(self.pixels_dir()).await?;
        let id = self.next_id()?;

        let header = PixelHeader::new(spec.shape, spec.bytes_per_pixel, spec.signed, spec.float);
        let payload = fs::File::create(self.payload_path(id)).await?;
        payload.set_len(header.total_bytes()).await?;

        let sidecar = PixelSidecar {
            planes_written: vec![false; spec.shape.plane_count() as usize],
            plane_stats: Vec::new(),
            stack_stats: Vec::new(),
            header,
        };
        fs::write(self.sidecar_path(id), serde_json::to_vec_pretty(&sidecar)?).await?;
        tracing::debug!(id, shape = %spec.shape, "created pixel set");
        Ok(id)
    }

    async fn open(
        &self,
        id: ObjectId,
        mode: Access,
        client_big_endian: bool,
    ) -> Result<Box<dyn PixelsHandle>> {
        let sidecar = self.load_sidecar(id).await?;
        match mode {
            Access::Read if !sidecar.header.finished => {
                return Err(PixError::Engine(format!(
                    "Pixels {} is not finished and cannot be read",
                    id
                )));
            }
            Access::Write if sidecar.header.finished => {
                return Err(PixError::Engine(format!(
                    "Pixels {} is finished and read-only",
                    id
                )));
            }
            _ => {}
        }
        let swab = client_big_endian != cfg!(target_endian = "big");
        Ok(Box::new(FsPixelsHandle {
            engine_root: self.root.clone(),
            id,
            path: self.payload_path(id),
            sidecar_path: self.sidecar_path(id),
            thumb_path: self.thumb_path(id),
            sidecar,
            swab,
        }))
    }

    async fn thumbnail(&self, id: ObjectId, _size: Option<(u32, u32)>) -> Result<Bytes> {
        // thumbnails are rendered at finish time; the stored rendition is
        // served regardless of the requested size
        let path = self.thumb_path(id);
        let data = fs::read(&path)
            .await
            .map_err(|_| PixError::NotFound(format!("thumbnail for Pixels {}", id)))?;
        Ok(Bytes::from(data))
    }
}

struct FsPixelsHandle {
    engine_root: PathBuf,
    id: ObjectId,
    path: PathBuf,
    sidecar_path: PathBuf,
    thumb_path: PathBuf,
    sidecar: PixelSidecar,
    swab: bool,
}

impl FsPixelsHandle {
    fn shape(&self) -> PixelShape {
        self.sidecar.header.shape
    }

    fn bp(&self) -> u64 {
        self.sidecar.header.bytes_per_pixel as u64
    }

    fn content_map_path(&self, hex: &str) -> PathBuf {
        self.engine_root
            .join(PIXELS_DIR)
            .join(CONTENT_MAP_DIR)
            .join(hex)
    }

    async fn persist_sidecar(&self) -> Result<()> {
        fs::write(&self.sidecar_path, serde_json::to_vec_pretty(&self.sidecar)?).await?;
        Ok(())
    }

    fn check_span(&self, span: &PixelSpan) -> Result<()> {
        let total = self.shape().total_pixels();
        if span.offset + span.count > total {
            return Err(PixError::OutOfRange(format!(
                "span {}+{} exceeds pixel count {}",
                span.offset, span.count, total
            )));
        }
        Ok(())
    }

    /// Mark planes fully covered by one written run.
    fn mark_written(&mut self, offset: u64, pixels: u64) {
        let per_plane = self.shape().plane_pixels();
        let first = offset.div_ceil(per_plane);
        let last = (offset + pixels) / per_plane;
        for plane in first..last {
            self.sidecar.planes_written[plane as usize] = true;
        }
        self.sidecar.header.touch();
    }

    async fn copy_span_out(
        &self,
        span: PixelSpan,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let bp = self.bp();
        let mut file = fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(span.offset * bp)).await?;
        let mut remaining = span.count * bp;
        let mut buf = vec![0u8; IO_CHUNK];
        let mut moved = 0u64;
        while remaining > 0 {
            let want = (remaining as usize).min(IO_CHUNK);
            file.read_exact(&mut buf[..want]).await?;
            if self.swab {
                swab_in_place(&mut buf[..want], bp as usize);
            }
            out.write_all(&buf[..want]).await?;
            remaining -= want as u64;
            moved += want as u64;
        }
        Ok(moved / bp)
    }

    async fn copy_span_in(
        &mut self,
        span: PixelSpan,
        src: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let bp = self.bp();
        let mut file = fs::OpenOptions::new().write(true).open(&self.path).await?;
        file.seek(SeekFrom::Start(span.offset * bp)).await?;
        let mut remaining = span.count * bp;
        let mut buf = vec![0u8; IO_CHUNK];
        let mut moved = 0u64;
        while remaining > 0 {
            let want = (remaining as usize).min(IO_CHUNK);
            let filled = fill_buf(src, &mut buf[..want]).await?;
            if filled == 0 {
                break;
            }
            // drop any trailing partial sample
            let whole = filled - filled % bp as usize;
            if whole == 0 {
                break;
            }
            if self.swab {
                swab_in_place(&mut buf[..whole], bp as usize);
            }
            file.write_all(&buf[..whole]).await?;
            remaining -= whole as u64;
            moved += whole as u64;
            if filled < want {
                break;
            }
        }
        file.flush().await?;
        Ok(moved / bp)
    }

    /// Validate a box and yield its per-row spans, row-major.
    fn box_rows(&self, lo: Coord, hi: Coord) -> Result<Vec<PixelSpan>> {
        for axis in [
            (lo.x, hi.x),
            (lo.y, hi.y),
            (lo.z, hi.z),
            (lo.c, hi.c),
            (lo.t, hi.t),
        ] {
            if axis.1 < axis.0 {
                return Err(PixError::Engine(
                    "ROI upper corner must not be below the lower corner".to_string(),
                ));
            }
        }
        let shape = self.shape();
        let row_pixels = (hi.x - lo.x + 1) as u64;
        let mut rows = Vec::new();
        for t in lo.t..=hi.t {
            for c in lo.c..=hi.c {
                for z in lo.z..=hi.z {
                    for y in lo.y..=hi.y {
                        rows.push(PixelSpan {
                            offset: shape.offset(
                                lo.x as u32,
                                y as u32,
                                z as u32,
                                c as u32,
                                t as u32,
                            ),
                            count: row_pixels,
                        });
                    }
                }
            }
        }
        Ok(rows)
    }

    /// Stream decoded samples of a span through `feed`, chunk by chunk.
    async fn stream_samples<F>(&self, span: PixelSpan, mut feed: F) -> Result<()>
    where
        F: FnMut(u64, &[f64]),
    {
        let bp = self.bp();
        let sample_type = self.sidecar.header.sample_type();
        let mut file = fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(span.offset * bp)).await?;
        let mut remaining = span.count * bp;
        let mut pixel = span.offset;
        let mut buf = vec![0u8; IO_CHUNK];
        let mut samples = Vec::with_capacity(IO_CHUNK / bp as usize);
        while remaining > 0 {
            let want = (remaining as usize).min(IO_CHUNK);
            file.read_exact(&mut buf[..want]).await?;
            samples.clear();
            decode_samples(&buf[..want], sample_type, &mut samples);
            feed(pixel, &samples);
            pixel += samples.len() as u64;
            remaining -= want as u64;
        }
        Ok(())
    }

    /// Recompute statistics over one contiguous scope and merge the touched
    /// plane (and optionally stack) records into the sidecar.
    async fn recompute_span(&mut self, span: PixelSpan, merge_stacks: bool) -> Result<()> {
        let shape = self.shape();
        let mut builder = StatsBuilder::new(shape);
        self.stream_samples(span, |pixel, samples| builder.feed(pixel, samples))
            .await?;
        let mut hist: HistogramPass = builder.into_histogram_pass();
        self.stream_samples(span, |pixel, samples| hist.feed(pixel, samples))
            .await?;
        let (planes, stacks) = hist.finish();

        if self.sidecar.plane_stats.is_empty() {
            self.sidecar.plane_stats = zeroed_plane_stats(&shape);
        }
        if self.sidecar.stack_stats.is_empty() {
            self.sidecar.stack_stats = zeroed_stack_stats(&shape);
        }
        let per_plane = shape.plane_pixels();
        let first_plane = (span.offset / per_plane) as usize;
        let last_plane = ((span.offset + span.count - 1) / per_plane) as usize;
        for idx in first_plane..=last_plane {
            self.sidecar.plane_stats[idx] = planes[idx].clone();
        }
        if merge_stacks {
            let dz = shape.dz as usize;
            for idx in (first_plane / dz)..=(last_plane / dz) {
                self.sidecar.stack_stats[idx] = stacks[idx].clone();
            }
        }
        self.persist_sidecar().await
    }

    /// Render one plane as min-max scaled 8-bit samples.
    async fn render_plane_u8(&self, z: u32, c: u32, t: u32) -> Result<Vec<u8>> {
        let shape = self.shape();
        let span = PixelSpan {
            offset: shape.offset(0, 0, z, c, t),
            count: shape.plane_pixels(),
        };
        let mut samples = Vec::with_capacity(span.count as usize);
        self.stream_samples(span, |_, chunk| samples.extend_from_slice(chunk))
            .await?;
        let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let scale = if max > min { 255.0 / (max - min) } else { 0.0 };
        Ok(samples
            .iter()
            .map(|&v| ((v - min) * scale).round().clamp(0.0, 255.0) as u8)
            .collect())
    }

    async fn payload_digest(&self) -> Result<[u8; DIGEST_LEN]> {
        let mut file = fs::File::open(&self.path).await?;
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; IO_CHUNK];
        loop {
            let got = file.read(&mut buf).await?;
            if got == 0 {
                break;
            }
            hasher.update(&buf[..got]);
        }
        Ok(hasher.finalize().into())
    }
}

#[async_trait]
impl PixelsHandle for FsPixelsHandle {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn header(&self) -> &PixelHeader {
        &self.sidecar.header
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn read_span(
        &mut self,
        span: PixelSpan,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        self.check_span(&span)?;
        self.copy_span_out(span, out).await
    }

    async fn write_span(
        &mut self,
        span: PixelSpan,
        src: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        self.check_span(&span)?;
        let written = self.copy_span_in(span, src).await?;
        if written > 0 {
            self.mark_written(span.offset, written);
            self.persist_sidecar().await?;
        }
        Ok(written)
    }

    async fn read_box(
        &mut self,
        lo: Coord,
        hi: Coord,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let rows = self.box_rows(lo, hi)?;
        let mut moved = 0u64;
        for row in rows {
            moved += self.copy_span_out(row, out).await?;
        }
        Ok(moved)
    }

    async fn write_box(
        &mut self,
        lo: Coord,
        hi: Coord,
        src: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let rows = self.box_rows(lo, hi)?;
        let mut moved = 0u64;
        for row in rows {
            let got = self.copy_span_in(row, src).await?;
            moved += got;
            if got < row.count {
                break;
            }
        }
        if moved > 0 {
            self.sidecar.header.touch();
            self.persist_sidecar().await?;
        }
        Ok(moved)
    }

    async fn convert_tiff(&mut self, path: &Path, dir_index: u32, span: PixelSpan) -> Result<u64> {
        self.check_span(&span)?;
        let header = &self.sidecar.header;
        let dir = crate::tiff::TiffDirectory::read(path, dir_index).await?;
        dir.check_compatible(header)?;

        let bp = self.bp();
        let mut payload = fs::OpenOptions::new().write(true).open(&self.path).await?;
        payload.seek(SeekFrom::Start(span.offset * bp)).await?;
        let mut source = fs::File::open(path).await?;
        let mut moved_bytes = 0u64;
        let limit = span.count * bp;
        let mut buf = vec![0u8; IO_CHUNK];
        for strip in &dir.strips {
            let mut remaining = strip.byte_count.min(limit - moved_bytes);
            source.seek(SeekFrom::Start(strip.offset)).await?;
            while remaining > 0 {
                let want = (remaining as usize).min(IO_CHUNK);
                source.read_exact(&mut buf[..want]).await?;
                if dir.big_endian != cfg!(target_endian = "big") {
                    swab_in_place(&mut buf[..want], bp as usize);
                }
                payload.write_all(&buf[..want]).await?;
                remaining -= want as u64;
                moved_bytes += want as u64;
            }
            if moved_bytes >= limit {
                break;
            }
        }
        payload.flush().await?;
        let pixels = moved_bytes / bp;
        if pixels > 0 {
            self.mark_written(span.offset, pixels);
            self.persist_sidecar().await?;
        }
        Ok(pixels)
    }

    async fn refresh_stats(&mut self, scope: Region) -> Result<()> {
        let shape = self.shape();
        match scope {
            Region::WholeSet => {
                let span = PixelSpan {
                    offset: 0,
                    count: shape.total_pixels(),
                };
                self.recompute_span(span, true).await
            }
            Region::Stack { .. } => match scope.span(&shape)? {
                Some(span) => self.recompute_span(span, true).await,
                None => Ok(()),
            },
            Region::Plane { .. } => match scope.span(&shape)? {
                Some(span) => self.recompute_span(span, false).await,
                None => Ok(()),
            },
            _ => Err(PixError::Engine(
                "statistics scopes are whole-set, stack or plane".to_string(),
            )),
        }
    }

    async fn plane_stats(&mut self) -> Result<Vec<PlaneStats>> {
        if self.sidecar.plane_stats.is_empty() {
            self.refresh_stats(Region::WholeSet).await?;
        }
        Ok(self.sidecar.plane_stats.clone())
    }

    async fn stack_stats(&mut self) -> Result<Vec<StackStats>> {
        if self.sidecar.stack_stats.is_empty() {
            self.refresh_stats(Region::WholeSet).await?;
        }
        Ok(self.sidecar.stack_stats.clone())
    }

    async fn finish(&mut self, force: bool) -> Result<ObjectId> {
        if !force && self.sidecar.planes_written.iter().any(|written| !written) {
            return Err(PixError::Engine(format!(
                "Pixels {} has unwritten planes; repeat with Force=1 to finish anyway",
                self.id
            )));
        }

        let digest = self.payload_digest().await?;
        let hex = crate::types::digest_hex(&digest);

        // coalesce onto an existing content-identical set
        let map_path = self.content_map_path(&hex);
        if let Ok(existing) = fs::read_to_string(&map_path).await {
            if let Ok(original) = existing.trim().parse::<ObjectId>() {
                if original != self.id && fs::metadata(self.sidecar_path_of(original)).await.is_ok()
                {
                    let duplicate = self.id;
                    self.remove_files().await?;
                    tracing::debug!(duplicate, original, "coalesced identical pixel sets");
                    return Ok(original);
                }
            }
        }

        self.refresh_stats(Region::WholeSet).await?;

        // thumbnail: middle plane of the first channel and timepoint
        let shape = self.shape();
        let thumb = self.render_plane_u8(shape.dz / 2, 0, 0).await?;
        fs::write(&self.thumb_path, &thumb).await?;

        self.sidecar.header.finished = true;
        self.sidecar.header.sha1 = digest;
        self.sidecar.header.touch();
        self.persist_sidecar().await?;

        if let Some(parent) = map_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&map_path, self.id.to_string()).await?;
        Ok(self.id)
    }

    async fn composite(&mut self, z: i64, t: i64) -> Result<Bytes> {
        if z < 0 || t < 0 {
            return Err(PixError::Malformed(
                "Parameters theZ and theT must be specified for the composite method".to_string(),
            ));
        }
        let shape = self.shape();
        shape.check_coord(&Coord::new(
            Coord::UNSET,
            Coord::UNSET,
            z,
            Coord::UNSET,
            t,
        ))?;
        // channels collapse onto the first for the composite rendition
        let rendered = self.render_plane_u8(z as u32, 0, t as u32).await?;
        Ok(Bytes::from(rendered))
    }

    async fn expunge(self: Box<Self>) -> Result<ObjectId> {
        let id = self.id;
        let hex = crate::types::digest_hex(&self.sidecar.header.sha1);
        let map_path = self.content_map_path(&hex);
        self.remove_files().await?;
        // release the content mapping only when it names this set
        if let Ok(mapped) = fs::read_to_string(&map_path).await {
            if mapped.trim() == id.to_string() {
                let _ = fs::remove_file(&map_path).await;
            }
        }
        Ok(id)
    }
}

impl FsPixelsHandle {
    fn sidecar_path_of(&self, id: ObjectId) -> PathBuf {
        self.engine_root.join(PIXELS_DIR).join(format!("{}.json", id))
    }

    async fn remove_files(&self) -> Result<()> {
        fs::remove_file(&self.path).await?;
        fs::remove_file(&self.sidecar_path).await?;
        let _ = fs::remove_file(&self.thumb_path).await;
        Ok(())
    }
}

/// Reverse sample byte order in place. `bp` of 1 is a no-op.
fn swab_in_place(buf: &mut [u8], bp: usize) {
    match bp {
        2 => buf.chunks_exact_mut(2).for_each(|pair| pair.swap(0, 1)),
        4 => buf.chunks_exact_mut(4).for_each(|quad| quad.reverse()),
        _ => {}
    }
}

/// Read until `buf` is full or the source is exhausted.
async fn fill_buf(src: &mut (dyn AsyncRead + Send + Unpin), buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let got = src.read(&mut buf[filled..]).await?;
        if got == 0 {
            break;
        }
        filled += got;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(dims: (u32, u32, u32, u32, u32), bp: u8) -> NewPixelsSpec {
        NewPixelsSpec {
            shape: PixelShape::new(dims.0, dims.1, dims.2, dims.3, dims.4),
            bytes_per_pixel: bp,
            signed: false,
            float: false,
        }
    }

    fn engine() -> (TempDir, FsPixelEngine) {
        let temp = TempDir::new().unwrap();
        let engine = FsPixelEngine::new(temp.path());
        (temp, engine)
    }

    #[tokio::test]
    async fn test_create_and_info() {
        let (_temp, engine) = engine();
        let id = engine.create(&spec((4, 4, 1, 1, 1), 2)).await.unwrap();
        assert_eq!(id, 1);
        let handle = engine.open(id, Access::Info, true).await.unwrap();
        let head = handle.header();
        assert_eq!(head.shape, PixelShape::new(4, 4, 1, 1, 1));
        assert!(!head.finished);
        // ids are sequential
        let id2 = engine.create(&spec((2, 2, 1, 1, 1), 1)).await.unwrap();
        assert_eq!(id2, 2);
    }

    #[tokio::test]
    async fn test_open_missing_is_not_found() {
        let (_temp, engine) = engine();
        assert!(matches!(
            engine.open(99, Access::Info, true).await,
            Err(PixError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_write_only_until_finished() {
        let (_temp, engine) = engine();
        let id = engine.create(&spec((2, 2, 1, 1, 1), 1)).await.unwrap();
        // unfinished: reads refused
        assert!(engine.open(id, Access::Read, true).await.is_err());

        let mut handle = engine.open(id, Access::Write, true).await.unwrap();
        let data = [1u8, 2, 3, 4];
        let span = PixelSpan { offset: 0, count: 4 };
        let written = handle
            .write_span(span, &mut data.as_slice())
            .await
            .unwrap();
        assert_eq!(written, 4);
        handle.finish(false).await.unwrap();

        // finished: writes refused, reads allowed
        assert!(engine.open(id, Access::Write, true).await.is_err());
        let mut handle = engine.open(id, Access::Read, true).await.unwrap();
        let mut out = Vec::new();
        let read = handle.read_span(span, &mut out).await.unwrap();
        assert_eq!(read, 4);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_finish_requires_written_planes() {
        let (_temp, engine) = engine();
        let id = engine.create(&spec((2, 2, 2, 1, 1), 1)).await.unwrap();
        let mut handle = engine.open(id, Access::Write, true).await.unwrap();
        // only the first plane
        let data = [9u8; 4];
        handle
            .write_span(PixelSpan { offset: 0, count: 4 }, &mut data.as_slice())
            .await
            .unwrap();
        assert!(handle.finish(false).await.is_err());
        let finished = handle.finish(true).await.unwrap();
        assert_eq!(finished, id);
        assert!(handle.header().finished);
        assert_ne!(handle.header().sha1, [0; DIGEST_LEN]);
    }

    #[tokio::test]
    async fn test_finish_coalesces_identical_content() {
        let (_temp, engine) = engine();
        let data = [5u8, 6, 7, 8];
        let span = PixelSpan { offset: 0, count: 4 };

        let first = engine.create(&spec((4, 1, 1, 1, 1), 1)).await.unwrap();
        let mut handle = engine.open(first, Access::Write, true).await.unwrap();
        handle.write_span(span, &mut data.as_slice()).await.unwrap();
        assert_eq!(handle.finish(false).await.unwrap(), first);

        let second = engine.create(&spec((4, 1, 1, 1, 1), 1)).await.unwrap();
        let mut handle = engine.open(second, Access::Write, true).await.unwrap();
        handle.write_span(span, &mut data.as_slice()).await.unwrap();
        // identical payload coalesces onto the original id
        assert_eq!(handle.finish(false).await.unwrap(), first);
        assert!(engine.open(second, Access::Info, true).await.is_err());
    }

    #[tokio::test]
    async fn test_swab_round_trip() {
        let (_temp, engine) = engine();
        let id = engine.create(&spec((2, 1, 1, 1, 1), 2)).await.unwrap();
        // client is big-endian on a little-endian host (or vice versa):
        // bytes swab on the way in and back out unchanged
        let big = [0x01u8, 0x02, 0x03, 0x04];
        let span = PixelSpan { offset: 0, count: 2 };
        let mut handle = engine.open(id, Access::Write, true).await.unwrap();
        handle.write_span(span, &mut big.as_slice()).await.unwrap();
        handle.finish(true).await.unwrap();

        let mut handle = engine.open(id, Access::Read, true).await.unwrap();
        let mut out = Vec::new();
        handle.read_span(span, &mut out).await.unwrap();
        assert_eq!(out, big);

        // a native client sees the stored (native-order) rendition
        let mut handle = engine
            .open(id, Access::Read, cfg!(target_endian = "big"))
            .await
            .unwrap();
        let mut native = Vec::new();
        handle.read_span(span, &mut native).await.unwrap();
        let expected: Vec<u8> = if cfg!(target_endian = "big") {
            big.to_vec()
        } else {
            vec![0x02, 0x01, 0x04, 0x03]
        };
        assert_eq!(native, expected);
    }

    #[tokio::test]
    async fn test_box_roundtrip() {
        let (_temp, engine) = engine();
        let id = engine.create(&spec((4, 4, 1, 1, 1), 1)).await.unwrap();
        let mut handle = engine.open(id, Access::Write, true).await.unwrap();
        let all: Vec<u8> = (0..16).collect();
        handle
            .write_span(PixelSpan { offset: 0, count: 16 }, &mut all.as_slice())
            .await
            .unwrap();
        handle.finish(false).await.unwrap();

        let mut handle = engine.open(id, Access::Read, true).await.unwrap();
        let lo = Coord::new(1, 1, 0, 0, 0);
        let hi = Coord::new(2, 2, 0, 0, 0);
        let mut out = Vec::new();
        let moved = handle.read_box(lo, hi, &mut out).await.unwrap();
        assert_eq!(moved, 4);
        // rows y=1 and y=2, x 1..=2
        assert_eq!(out, vec![5, 6, 9, 10]);

        // inverted corners refuse
        assert!(handle.read_box(hi, lo, &mut Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_stats_after_finish() {
        let (_temp, engine) = engine();
        let id = engine.create(&spec((2, 2, 1, 1, 1), 1)).await.unwrap();
        let mut handle = engine.open(id, Access::Write, true).await.unwrap();
        let data = [1u8, 2, 3, 4];
        handle
            .write_span(PixelSpan { offset: 0, count: 4 }, &mut data.as_slice())
            .await
            .unwrap();
        handle.finish(false).await.unwrap();

        let mut handle = engine.open(id, Access::Read, true).await.unwrap();
        let planes = handle.plane_stats().await.unwrap();
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0].min, 1.0);
        assert_eq!(planes[0].max, 4.0);
        // identical on repeat
        let again = handle.plane_stats().await.unwrap();
        assert_eq!(again[0].mean, planes[0].mean);
        assert_eq!(again[0].hist, planes[0].hist);
    }

    #[tokio::test]
    async fn test_convert_tiff_fills_plane() {
        let (temp, engine) = engine();
        let id = engine.create(&spec((4, 4, 1, 1, 1), 1)).await.unwrap();
        let mut handle = engine.open(id, Access::Write, true).await.unwrap();

        let pixels: Vec<u8> = (10..26).collect();
        let tiff_path = temp.path().join("plane.tiff");
        std::fs::write(
            &tiff_path,
            crate::tiff::tests::build_tiff(4, 4, 8, 1, &pixels),
        )
        .unwrap();

        let span = PixelSpan { offset: 0, count: 16 };
        let moved = handle.convert_tiff(&tiff_path, 0, span).await.unwrap();
        assert_eq!(moved, 16);
        handle.finish(false).await.unwrap();

        let mut handle = engine.open(id, Access::Read, true).await.unwrap();
        let mut out = Vec::new();
        handle.read_span(span, &mut out).await.unwrap();
        assert_eq!(out, pixels);
    }

    #[tokio::test]
    async fn test_convert_tiff_rejects_mismatched_geometry() {
        let (temp, engine) = engine();
        let id = engine.create(&spec((8, 8, 1, 1, 1), 1)).await.unwrap();
        let mut handle = engine.open(id, Access::Write, true).await.unwrap();

        let pixels = [0u8; 16];
        let tiff_path = temp.path().join("small.tiff");
        std::fs::write(
            &tiff_path,
            crate::tiff::tests::build_tiff(4, 4, 8, 1, &pixels),
        )
        .unwrap();

        let span = PixelSpan { offset: 0, count: 64 };
        assert!(handle.convert_tiff(&tiff_path, 0, span).await.is_err());
    }

    #[tokio::test]
    async fn test_thumbnail_and_expunge() {
        let (_temp, engine) = engine();
        let id = engine.create(&spec((2, 2, 1, 1, 1), 1)).await.unwrap();
        let mut handle = engine.open(id, Access::Write, true).await.unwrap();
        handle
            .write_span(
                PixelSpan { offset: 0, count: 4 },
                &mut [0u8, 85, 170, 255].as_slice(),
            )
            .await
            .unwrap();
        handle.finish(false).await.unwrap();

        let thumb = engine.thumbnail(id, None).await.unwrap();
        assert_eq!(thumb.len(), 4);
        assert_eq!(&thumb[..], &[0, 85, 170, 255]);

        let handle = engine.open(id, Access::Info, true).await.unwrap();
        assert_eq!(handle.expunge().await.unwrap(), id);
        assert!(engine.open(id, Access::Info, true).await.is_err());
        assert!(engine.thumbnail(id, None).await.is_err());
    }
}
