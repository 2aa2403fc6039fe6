//! Request dispatch.
//!
//! One request is one run-to-completion invocation: resolve the method,
//! enforce its parameter contract, acquire the storage handle in the mode
//! the opcode needs, emit exactly one well-formed response - or hand exactly
//! one failure record to the error sink. Validation and handle acquisition
//! fully precede the first response byte; once a byte is out, failures are
//! demoted to log lines.

use crate::config::ServerConfig;
use crate::engine::{FileStore, PixelEngine, PixelsHandle, UploadSource};
use crate::error::{PixError, Result};
use crate::geometry::Region;
use crate::method::{self, Access, Method};
use crate::params::Params;
use crate::report::ErrorSink;
use crate::request;
use crate::response::ResponseWriter;
use crate::stats::{PlaneStats, StackStats};
use crate::types::ObjectId;
use crate::{archive, markup};
use tokio::io::{AsyncRead, AsyncWrite};

type Subject = Option<(&'static str, ObjectId)>;

/// Ties the registry, validator, addressing model and framer together in
/// front of the storage collaborators.
pub struct Dispatcher<'a> {
    engine: &'a dyn PixelEngine,
    files: &'a dyn FileStore,
    sink: &'a dyn ErrorSink,
    config: &'a ServerConfig,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        engine: &'a dyn PixelEngine,
        files: &'a dyn FileStore,
        sink: &'a dyn ErrorSink,
        config: &'a ServerConfig,
    ) -> Self {
        Self {
            engine,
            files,
            sink,
            config,
        }
    }

    /// Run one request to completion. Returns the process exit code:
    /// 0 for a committed response, non-zero for a reported failure.
    pub async fn dispatch<B, W>(
        &self,
        params: &Params,
        body: &mut B,
        out: &mut ResponseWriter<W>,
    ) -> i32
    where
        B: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut subject: Subject = None;
        let outcome = self.run(params, body, out, &mut subject).await;
        let _ = out.flush().await;
        match outcome {
            Ok(()) => 0,
            Err(e) if out.committed() => {
                // the response is already on the wire; no error record may
                // follow it
                tracing::warn!(error = %e, "failure after response commit");
                0
            }
            Err(e) => {
                let name = params.get("Method").unwrap_or("pixd");
                let (label, id) = match subject {
                    Some((label, id)) => (Some(label), id),
                    None => (None, 0),
                };
                self.sink.report(name, label, id, &e.to_string());
                1
            }
        }
    }

    async fn run<B, W>(
        &self,
        params: &Params,
        body: &mut B,
        out: &mut ResponseWriter<W>,
        subject: &mut Subject,
    ) -> Result<()>
    where
        B: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let name = params
            .get("Method")
            .ok_or_else(|| PixError::missing("Method"))?;
        let method = method::resolve(name).ok_or(PixError::UnknownMethod)?;

        let pixels_id = request::pixels_id(method, params)?;
        if let Some(id) = pixels_id {
            *subject = Some(("PixelsID", id));
        }
        let client_big_endian = params.flag("BigEndian").unwrap_or(true);
        let is_local = params.flag_set("IsLocalFile");

        match method {
            // recognized but side-effect free
            Method::Pixels | Method::Plane | Method::Stack => Ok(()),

            Method::NewPixels => {
                let spec = request::NewPixelsSpec::parse(params)?;
                let id = self.engine.create(&spec).await?;
                out.begin_text().await?;
                out.line(&id.to_string()).await
            }

            Method::PixelsInfo => {
                let handle = self.open_pixels(method, pixels_id, client_big_endian).await?;
                let head = handle.header();
                out.begin_text().await?;
                out.line(&format!(
                    "Dims={},{}",
                    head.shape, head.bytes_per_pixel
                ))
                .await?;
                out.line(&format!("Finished={}", head.finished as u8)).await?;
                out.line(&format!("Signed={}", head.signed as u8)).await?;
                out.line(&format!("Float={}", head.float as u8)).await?;
                out.line(&format!("SHA1={}", head.sha1_hex())).await
            }

            Method::PixelsSha1 => {
                let handle = self.open_pixels(method, pixels_id, client_big_endian).await?;
                out.begin_text().await?;
                out.line(&handle.header().sha1_hex()).await
            }

            Method::FinishPixels => {
                let force = params.get_i64("Force").unwrap_or(0) != 0;
                let mut handle = self.open_pixels(method, pixels_id, client_big_endian).await?;
                let id = handle.finish(force).await?;
                out.begin_text().await?;
                out.line(&id.to_string()).await
            }

            Method::DeletePixels => {
                let handle = self.open_pixels(method, pixels_id, client_big_endian).await?;
                let id = handle.expunge().await?;
                out.begin_text().await?;
                out.line(&id.to_string()).await
            }

            Method::GetPlaneStats | Method::GetPlaneHist => {
                let mut handle = self.open_pixels(method, pixels_id, client_big_endian).await?;
                let shape = handle.header().shape;
                let stats = handle.plane_stats().await?;
                out.begin_text().await?;
                for t in 0..shape.dt {
                    for c in 0..shape.dc {
                        for z in 0..shape.dz {
                            let idx = (z as u64
                                + shape.dz as u64 * (c as u64 + shape.dc as u64 * t as u64))
                                as usize;
                            let row = if method == Method::GetPlaneStats {
                                plane_stats_row(&stats[idx])
                            } else {
                                plane_hist_row(&stats[idx])
                            };
                            out.line(&row).await?;
                        }
                    }
                }
                Ok(())
            }

            Method::GetStackStats | Method::GetStackHist => {
                let mut handle = self.open_pixels(method, pixels_id, client_big_endian).await?;
                let shape = handle.header().shape;
                let stats = handle.stack_stats().await?;
                out.begin_text().await?;
                for t in 0..shape.dt {
                    for c in 0..shape.dc {
                        let idx = (c as u64 + shape.dc as u64 * t as u64) as usize;
                        let row = if method == Method::GetStackStats {
                            stack_stats_row(&stats[idx])
                        } else {
                            stack_hist_row(&stats[idx])
                        };
                        out.line(&row).await?;
                    }
                }
                Ok(())
            }

            Method::GetPixels
            | Method::GetRows
            | Method::GetPlane
            | Method::GetStack
            | Method::GetRoi => {
                let region = request::region_for(method, params)?;
                let mut handle = self.open_pixels(method, pixels_id, client_big_endian).await?;
                let span = region.span(&handle.header().shape)?;
                out.begin_binary(None).await?;
                match (span, region) {
                    (Some(span), _) => {
                        handle.read_span(span, out.sink()).await?;
                    }
                    (None, Region::Box { lo, hi }) => {
                        handle.read_box(lo, hi, out.sink()).await?;
                    }
                    // every non-box selector resolves to a span
                    (None, _) => {}
                }
                Ok(())
            }

            Method::SetPixels
            | Method::SetRows
            | Method::SetPlane
            | Method::SetStack
            | Method::SetRoi => {
                let region = request::region_for(method, params)?;
                let mut handle = self.open_pixels(method, pixels_id, client_big_endian).await?;
                let span = region.span(&handle.header().shape)?;

                // a local file when the fast path is selected, else the
                // request stream
                let mut local;
                let source: &mut (dyn AsyncRead + Send + Unpin) =
                    match (is_local, params.get("Pixels")) {
                        (true, Some(path)) => {
                            local = tokio::fs::File::open(path).await.map_err(|e| {
                                PixError::Engine(format!("cannot read local pixels: {}", e))
                            })?;
                            &mut local
                        }
                        (true, None) => return Err(PixError::missing("Pixels")),
                        _ => body,
                    };

                let written = match (span, region) {
                    (Some(span), _) => handle.write_span(span, source).await?,
                    (None, Region::Box { lo, hi }) => handle.write_box(lo, hi, source).await?,
                    // every non-box selector resolves to a span
                    (None, _) => 0,
                };
                out.begin_text().await?;
                out.line(&written.to_string()).await
            }

            Method::Convert
            | Method::ConvertRows
            | Method::ConvertPlane
            | Method::ConvertStack
            | Method::ConvertTiff => {
                self.convert(method, params, pixels_id, client_big_endian, out)
                    .await
            }

            Method::Composite => {
                let at = request::coords(params);
                if at.z < 0 || at.t < 0 {
                    return Err(PixError::Malformed(
                        "Parameters theZ and theT must be specified for the composite method"
                            .to_string(),
                    ));
                }
                let mut handle = self.open_pixels(method, pixels_id, client_big_endian).await?;
                let rendered = handle.composite(at.z, at.t).await?;
                out.begin_binary(None).await?;
                out.write_all(&rendered).await
            }

            Method::GetThumb => {
                let size = request::thumb_size(params)?;
                let id = pixels_id.ok_or_else(|| PixError::missing("PixelsID"))?;
                let thumb = self.engine.thumbnail(id, size).await?;
                out.begin_binary(None).await?;
                out.write_all(&thumb).await
            }

            Method::UploadFile => {
                let id = self.upload(params, body, is_local).await?;
                out.begin_text().await?;
                out.line(&id.to_string()).await
            }

            Method::ExportOmeFile => {
                let id = self.upload(params, body, is_local).await?;
                *subject = Some(("FileID", id));
                let path = self.files.repository_path(id).await?;
                out.begin_text().await?;
                markup::stream_document(&path, out).await?;
                // the uploaded document was transient; drop it, but never
                // at the cost of the committed response
                match self.files.open(id).await {
                    Ok(handle) => {
                        if let Err(e) = handle.expunge().await {
                            tracing::warn!(id, error = %e, "transient export upload was not removed");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(id, error = %e, "transient export upload was not reopened")
                    }
                }
                Ok(())
            }

            Method::ImportOmeFile => {
                let id = request::file_id(params)?;
                *subject = Some(("FileID", id));
                let path = self.files.repository_path(id).await?;
                out.begin_xml().await?;
                markup::stream_document(&path, out).await
            }

            Method::IsOmeXml => {
                let id = request::file_id(params)?;
                *subject = Some(("FileID", id));
                let path = self.files.repository_path(id).await?;
                let is_ome = markup::sniff_is_ome(&path).await?;
                out.begin_text().await?;
                out.line(if is_ome { "1" } else { "0" }).await
            }

            Method::ReadFile => {
                let id = request::file_id(params)?;
                *subject = Some(("FileID", id));
                let mut handle = self.files.open(id).await?;
                let span = request::read_span(params, handle.length())?;
                let attachment = if span.whole_file {
                    Some(handle.info().name.clone())
                } else {
                    None
                };
                let mut reader = handle.reader(span.offset, span.length).await?;
                out.begin_binary(attachment.as_deref()).await?;
                out.stream_from(&mut reader, span.length).await?;
                Ok(())
            }

            Method::FileInfo => {
                let id = request::file_id(params)?;
                *subject = Some(("FileID", id));
                let handle = self.files.open(id).await?;
                let info = handle.info();
                out.begin_text().await?;
                out.line(&format!("Name={}", info.name)).await?;
                out.line(&format!("Length={}", info.length)).await?;
                out.line(&format!("SHA1={}", info.sha1_hex())).await?;
                if let Some(original) = info.alias_of {
                    out.line(&format!("IsAlias={}", original)).await?;
                }
                if !info.aliases.is_empty() {
                    let ids: Vec<String> =
                        info.aliases.iter().map(|id| id.to_string()).collect();
                    out.line(&format!("HasAliases={}", ids.join("\t"))).await?;
                }
                Ok(())
            }

            Method::FileSha1 => {
                let id = request::file_id(params)?;
                *subject = Some(("FileID", id));
                let handle = self.files.open(id).await?;
                out.begin_text().await?;
                out.line(&handle.info().sha1_hex()).await
            }

            Method::DeleteFile => {
                let id = request::file_id(params)?;
                *subject = Some(("FileID", id));
                let handle = self.files.open(id).await?;
                let id = handle.expunge().await?;
                out.begin_text().await?;
                out.line(&id.to_string()).await
            }

            Method::ZipFiles => {
                let spec = request::ArchiveSpec::parse(params)?;
                archive::stream_zip(&spec, self.files, &self.config.archive_scratch(), out).await
            }

            Method::GetLocalPath => {
                let path = if pixels_id.is_some() {
                    let handle = self.open_pixels(method, pixels_id, client_big_endian).await?;
                    handle.path().display().to_string()
                } else if let Some(id) = params.get_u64("FileID") {
                    *subject = Some(("FileID", id));
                    self.files.repository_path(id).await?.display().to_string()
                } else {
                    String::new()
                };
                out.begin_text().await?;
                out.line(&path).await
            }
        }
    }

    /// Acquire the pixel set in the mode the method's contract names.
    async fn open_pixels(
        &self,
        method: Method,
        id: Option<ObjectId>,
        client_big_endian: bool,
    ) -> Result<Box<dyn PixelsHandle>> {
        let id = id.ok_or_else(|| PixError::missing("PixelsID"))?;
        let mode = match method.access() {
            Access::None => Access::Info,
            mode => mode,
        };
        self.engine.open(id, mode, client_big_endian).await
    }

    async fn upload<B>(&self, params: &Params, body: &mut B, is_local: bool) -> Result<ObjectId>
    where
        B: AsyncRead + Unpin + Send,
    {
        let size = request::upload_size(params)?;
        let file_param = params.get("File");
        if is_local {
            let path = file_param.ok_or_else(|| PixError::missing("File"))?;
            let name = std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string());
            self.files
                .upload(&name, UploadSource::LocalPath(std::path::Path::new(path)), size)
                .await
        } else {
            let name = file_param.unwrap_or("upload");
            self.files
                .upload(name, UploadSource::Stream(body), size)
                .await
        }
    }

    /// Shared convert path: pull sample bytes out of a repository file (raw
    /// or TIFF) into the scoped span, then recompute statistics over what
    /// was written.
    async fn convert<W>(
        &self,
        method: Method,
        params: &Params,
        pixels_id: Option<ObjectId>,
        client_big_endian: bool,
        out: &mut ResponseWriter<W>,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let file_id = request::file_id(params)?;
        let file_offset = params.get_u64("Offset").unwrap_or(0);
        let tiff_dir = params.get_u64("TIFFDirIndex").unwrap_or(0) as u32;

        let region = request::region_for(method, params)?;
        let mut handle = self.open_pixels(method, pixels_id, client_big_endian).await?;
        let span = region
            .span(&handle.header().shape)?
            .ok_or_else(|| PixError::Engine("convert scope must be contiguous".to_string()))?;

        let mut file = self.files.open(file_id).await?;
        let transferred = if method == Method::ConvertTiff {
            handle.convert_tiff(file.path(), tiff_dir, span).await?
        } else {
            let remaining = file.length().saturating_sub(file_offset);
            let mut reader = file.reader(file_offset, remaining).await?;
            handle.write_span(span, reader.as_mut()).await?
        };

        if transferred != span.count {
            return Err(PixError::Engine(format!(
                "Did not convert correct number of pixels. Expected {}, got {}",
                span.count, transferred
            )));
        }

        match method {
            Method::Convert => handle.refresh_stats(Region::WholeSet).await?,
            Method::ConvertStack => handle.refresh_stats(region).await?,
            Method::ConvertPlane | Method::ConvertTiff => handle.refresh_stats(region).await?,
            // row-scoped conversion leaves statistics to finish time
            _ => {}
        }

        out.begin_text().await?;
        out.line(&transferred.to_string()).await
    }
}

fn plane_stats_row(p: &PlaneStats) -> String {
    format!(
        "{}\t{}\t{}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}",
        p.c,
        p.t,
        p.z,
        p.min,
        p.max,
        p.mean,
        p.sigma,
        p.geomean,
        p.geosigma,
        p.centroid_x,
        p.centroid_y,
        p.sum_i,
        p.sum_i2,
        p.sum_log_i,
        p.sum_xi,
        p.sum_yi,
        p.sum_zi
    )
}

fn stack_stats_row(s: &StackStats) -> String {
    format!(
        "{}\t{}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}",
        s.c,
        s.t,
        s.min,
        s.max,
        s.mean,
        s.sigma,
        s.geomean,
        s.geosigma,
        s.centroid_x,
        s.centroid_y,
        s.centroid_z,
        s.sum_i,
        s.sum_i2,
        s.sum_log_i,
        s.sum_xi,
        s.sum_yi,
        s.sum_zi
    )
}

fn plane_hist_row(p: &PlaneStats) -> String {
    let mut row = format!("{}\t{}\t{}\t", p.c, p.t, p.z);
    for bin in &p.hist {
        row.push_str(&bin.to_string());
        row.push('\t');
    }
    row
}

fn stack_hist_row(s: &StackStats) -> String {
    let mut row = format!("{}\t{}\t", s.c, s.t);
    for bin in &s.hist {
        row.push_str(&bin.to_string());
        row.push('\t');
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::NUM_BINS;

    fn sample_plane() -> PlaneStats {
        let mut stats = crate::stats::zeroed_plane_stats(&crate::geometry::PixelShape::new(
            2, 2, 1, 1, 1,
        ));
        let mut p = stats.remove(0);
        p.min = 1.0;
        p.max = 4.0;
        p.mean = 2.5;
        p
    }

    #[test]
    fn test_plane_stats_row_shape() {
        let row = plane_stats_row(&sample_plane());
        let fields: Vec<&str> = row.split('\t').collect();
        assert_eq!(fields.len(), 17);
        assert_eq!(fields[0], "0");
        assert_eq!(fields[3], "1.000000");
        assert_eq!(fields[4], "4.000000");
    }

    #[test]
    fn test_hist_row_shape() {
        let row = plane_hist_row(&sample_plane());
        // c, t, z, then one column per bin, trailing separator included
        let fields: Vec<&str> = row.trim_end_matches('\t').split('\t').collect();
        assert_eq!(fields.len(), 3 + NUM_BINS);
    }
}
