//! Zip archive delivery.
//!
//! Assembles the requested repository files into a scratch directory via
//! symlinks, shells out to `zip`, streams the archive back and removes the
//! scratch directory on every exit path. Cleanup problems are logged and
//! never override a committed response.

use crate::engine::FileStore;
use crate::error::{PixError, Result};
use crate::request::ArchiveSpec;
use crate::response::ResponseWriter;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWrite;
use tokio::process::Command;
use uuid::Uuid;

/// Build the archive and stream it as the response.
pub async fn stream_zip<W>(
    spec: &ArchiveSpec,
    files: &dyn FileStore,
    scratch_root: &Path,
    out: &mut ResponseWriter<W>,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    fs::create_dir_all(scratch_root).await?;
    let scratch = scratch_root.join(format!("tmp-{}", Uuid::new_v4()));
    fs::create_dir(&scratch).await?;

    let result = assemble_and_stream(spec, files, &scratch, out).await;

    if let Err(e) = fs::remove_dir_all(&scratch).await {
        tracing::warn!(path = %scratch.display(), error = %e, "archive scratch directory was not removed");
    }
    result
}

async fn assemble_and_stream<W>(
    spec: &ArchiveSpec,
    files: &dyn FileStore,
    scratch: &Path,
    out: &mut ResponseWriter<W>,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let zip_name = format!("{}.zip", spec.name);
    let zip_path = scratch.join(&zip_name);

    let mut command = Command::new("zip");
    command.arg("-j").arg("-q").arg(&zip_path);

    for &id in &spec.file_ids {
        let handle = files.open(id).await?;
        let target = absolute(handle.path())?;
        let link = unique_link(scratch, &handle.info().name, id);
        fs::symlink(&target, &link)
            .await
            .map_err(|e| PixError::Engine(format!("symlink failed for File {}: {}", id, e)))?;
        command.arg(&link);
    }

    let status = command
        .status()
        .await
        .map_err(|e| PixError::Engine(format!("could not run zip: {}", e)))?;
    if !status.success() {
        return Err(PixError::Engine(format!("zip exited with {}", status)));
    }

    let archive = fs::metadata(&zip_path).await?;
    out.begin_binary(Some(&zip_name)).await?;
    let mut reader = fs::File::open(&zip_path).await?;
    out.stream_from(&mut reader, archive.len()).await?;
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Pick a link name inside the scratch directory, prefixing with the
/// identifier when two files share an upload name.
fn unique_link(scratch: &Path, name: &str, id: u64) -> PathBuf {
    let base = if name.is_empty() { "file" } else { name };
    let plain = scratch.join(base);
    if plain.exists() {
        scratch.join(format!("{}_{}", id, base))
    } else {
        plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::UploadSource;
    use crate::files::FsFileStore;
    use tempfile::TempDir;

    async fn zip_available() -> bool {
        Command::new("zip")
            .arg("-v")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_zip_streams_archive_and_cleans_up() {
        if !zip_available().await {
            eprintln!("zip binary unavailable; skipping");
            return;
        }
        let temp = TempDir::new().unwrap();
        let store = FsFileStore::new(temp.path());
        let mut src: &[u8] = b"alpha";
        let a = store
            .upload("alpha.txt", UploadSource::Stream(&mut src), 5)
            .await
            .unwrap();
        let mut src: &[u8] = b"beta";
        let b = store
            .upload("beta.txt", UploadSource::Stream(&mut src), 4)
            .await
            .unwrap();

        let spec = ArchiveSpec {
            file_ids: vec![a, b],
            name: "images".to_string(),
        };
        let scratch_root = temp.path().join("Files");
        let mut buf = Vec::new();
        {
            let mut out = ResponseWriter::new(&mut buf, false);
            stream_zip(&spec, &store, &scratch_root, &mut out)
                .await
                .unwrap();
        }
        // zip local-header magic
        assert_eq!(&buf[..4], b"PK\x03\x04");

        // scratch directories are gone
        let mut entries = fs::read_dir(&scratch_root).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name();
            assert!(!name.to_string_lossy().starts_with("tmp-"), "left {:?}", name);
        }
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_commit() {
        let temp = TempDir::new().unwrap();
        let store = FsFileStore::new(temp.path());
        let spec = ArchiveSpec {
            file_ids: vec![42],
            name: "images".to_string(),
        };
        let mut buf = Vec::new();
        let mut out = ResponseWriter::new(&mut buf, false);
        let err = stream_zip(&spec, &store, &temp.path().join("Files"), &mut out).await;
        assert!(err.is_err());
        assert!(!out.committed());
    }
}
