//! Filesystem file repository.
//!
//! Uploaded files live under `Files/` as a flat payload plus a JSON info
//! sidecar. Uploads are content-addressed through a SHA-1 map: a second
//! upload with identical content becomes an alias of the original entry and
//! stores no payload of its own.

use crate::engine::{ByteSource, FileHandle, FileStore, UploadSource};
use crate::error::{PixError, Result};
use crate::response::IO_CHUNK;
use crate::types::{digest_hex, FileInfo, ObjectId, DIGEST_LEN};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

const FILES_DIR: &str = "Files";
const CONTENT_MAP_DIR: &str = ".sha1";
const COUNTER_FILE: &str = ".last_id";

/// Filesystem-backed file repository rooted at the repository directory.
pub struct FsFileStore {
    root: PathBuf,
    alloc: Mutex<()>,
}

impl FsFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            alloc: Mutex::new(()),
        }
    }

    fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    fn payload_path(&self, id: ObjectId) -> PathBuf {
        self.files_dir().join(id.to_string())
    }

    fn sidecar_path(&self, id: ObjectId) -> PathBuf {
        self.files_dir().join(format!("{}.json", id))
    }

    fn content_map_path(&self, hex: &str) -> PathBuf {
        self.files_dir().join(CONTENT_MAP_DIR).join(hex)
    }

    fn next_id(&self) -> Result<ObjectId> {
        let _guard = self.alloc.lock();
        let counter = self.files_dir().join(COUNTER_FILE);
        let last: ObjectId = std::fs::read_to_string(&counter)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        let id = last + 1;
        std::fs::write(&counter, id.to_string())?;
        Ok(id)
    }

    async fn load_info(&self, id: ObjectId) -> Result<FileInfo> {
        let raw = fs::read(self.sidecar_path(id))
            .await
            .map_err(|_| PixError::NotFound(format!("File {}", id)))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn persist_info(&self, id: ObjectId, info: &FileInfo) -> Result<()> {
        fs::write(self.sidecar_path(id), serde_json::to_vec_pretty(info)?).await?;
        Ok(())
    }

    /// Payload path an entry reads from: its own, or its alias target's.
    fn resolve_payload(&self, id: ObjectId, info: &FileInfo) -> PathBuf {
        match info.alias_of {
            Some(original) => self.payload_path(original),
            None => self.payload_path(id),
        }
    }

    async fn write_payload(
        &self,
        id: ObjectId,
        source: UploadSource<'_>,
        size: u64,
    ) -> Result<(u64, [u8; DIGEST_LEN])> {
        let path = self.payload_path(id);
        let mut out = fs::File::create(&path).await?;
        let mut hasher = Sha1::new();
        let mut written = 0u64;
        let mut buf = vec![0u8; IO_CHUNK];

        match source {
            UploadSource::LocalPath(local) => {
                let mut src = fs::File::open(local)
                    .await
                    .map_err(|e| PixError::Engine(format!("cannot read local file: {}", e)))?;
                loop {
                    let got = src.read(&mut buf).await?;
                    if got == 0 {
                        break;
                    }
                    out.write_all(&buf[..got]).await?;
                    hasher.update(&buf[..got]);
                    written += got as u64;
                }
            }
            UploadSource::Stream(src) => {
                while written < size {
                    let want = ((size - written) as usize).min(IO_CHUNK);
                    let got = src.read(&mut buf[..want]).await?;
                    if got == 0 {
                        break;
                    }
                    out.write_all(&buf[..got]).await?;
                    hasher.update(&buf[..got]);
                    written += got as u64;
                }
            }
        }
        out.flush().await?;
        Ok((written, hasher.finalize().into()))
    }
}

#[async_trait]
impl FileStore for FsFileStore {
    async fn upload(&self, name: &str, source: UploadSource<'_>, size: u64) -> Result<ObjectId> {
        fs::create_dir_all(self.files_dir()).await?;
        let id = self.next_id()?;
        let (length, sha1) = self.write_payload(id, source, size).await?;
        let hex = digest_hex(&sha1);

        // identical content becomes an alias of the original entry
        let map_path = self.content_map_path(&hex);
        if let Ok(mapped) = fs::read_to_string(&map_path).await {
            if let Ok(original) = mapped.trim().parse::<ObjectId>() {
                if let Ok(mut orig_info) = self.load_info(original).await {
                    fs::remove_file(self.payload_path(id)).await?;
                    orig_info.aliases.push(id);
                    self.persist_info(original, &orig_info).await?;
                    let info = FileInfo {
                        name: name.to_string(),
                        length,
                        sha1,
                        alias_of: Some(original),
                        aliases: Vec::new(),
                    };
                    self.persist_info(id, &info).await?;
                    tracing::debug!(id, original, "stored upload as alias");
                    return Ok(id);
                }
            }
        }

        let info = FileInfo {
            name: name.to_string(),
            length,
            sha1,
            alias_of: None,
            aliases: Vec::new(),
        };
        self.persist_info(id, &info).await?;
        if let Some(parent) = map_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&map_path, id.to_string()).await?;
        tracing::debug!(id, length, "stored upload");
        Ok(id)
    }

    async fn open(&self, id: ObjectId) -> Result<Box<dyn FileHandle>> {
        let info = self.load_info(id).await?;
        let payload = self.resolve_payload(id, &info);
        Ok(Box::new(FsFileHandle {
            store_root: self.root.clone(),
            id,
            payload,
            info,
        }))
    }

    async fn repository_path(&self, id: ObjectId) -> Result<PathBuf> {
        let info = self.load_info(id).await?;
        Ok(self.resolve_payload(id, &info))
    }
}

struct FsFileHandle {
    store_root: PathBuf,
    id: ObjectId,
    payload: PathBuf,
    info: FileInfo,
}

#[async_trait]
impl FileHandle for FsFileHandle {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn info(&self) -> &FileInfo {
        &self.info
    }

    fn path(&self) -> &Path {
        &self.payload
    }

    async fn reader(&mut self, offset: u64, length: u64) -> Result<Box<ByteSource>> {
        let mut file = fs::File::open(&self.payload).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(Box::new(file.take(length)))
    }

    async fn expunge(self: Box<Self>) -> Result<ObjectId> {
        let store = FsFileStore::new(&self.store_root);
        let id = self.id;
        fs::remove_file(store.sidecar_path(id)).await?;

        match self.info.alias_of {
            Some(original) => {
                // detach from the original's alias list
                if let Ok(mut info) = store.load_info(original).await {
                    info.aliases.retain(|&a| a != id);
                    store.persist_info(original, &info).await?;
                }
            }
            None => {
                let hex = digest_hex(&self.info.sha1);
                let map_path = store.content_map_path(&hex);
                if let Some(&heir) = self.info.aliases.first() {
                    // promote the first alias to own the payload
                    fs::rename(&self.payload, store.payload_path(heir)).await?;
                    if let Ok(mut info) = store.load_info(heir).await {
                        info.alias_of = None;
                        info.aliases = self
                            .info
                            .aliases
                            .iter()
                            .copied()
                            .filter(|&a| a != heir)
                            .collect();
                        // remaining aliases now point at the heir
                        for &other in &info.aliases {
                            if let Ok(mut other_info) = store.load_info(other).await {
                                other_info.alias_of = Some(heir);
                                store.persist_info(other, &other_info).await?;
                            }
                        }
                        store.persist_info(heir, &info).await?;
                    }
                    fs::write(&map_path, heir.to_string()).await?;
                } else {
                    fs::remove_file(&self.payload).await?;
                    if let Ok(mapped) = fs::read_to_string(&map_path).await {
                        if mapped.trim() == id.to_string() {
                            let _ = fs::remove_file(&map_path).await;
                        }
                    }
                }
            }
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsFileStore) {
        let temp = TempDir::new().unwrap();
        let store = FsFileStore::new(temp.path());
        (temp, store)
    }

    #[tokio::test]
    async fn test_stream_upload_and_read() {
        let (_temp, store) = store();
        let payload = b"five-dimensional pixels".to_vec();
        let mut src = payload.as_slice();
        let id = store
            .upload("notes.txt", UploadSource::Stream(&mut src), payload.len() as u64)
            .await
            .unwrap();
        assert_eq!(id, 1);

        let mut handle = store.open(id).await.unwrap();
        assert_eq!(handle.info().name, "notes.txt");
        assert_eq!(handle.length(), payload.len() as u64);
        assert!(handle.info().alias_of.is_none());

        let mut reader = handle.reader(5, 11).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"dimensional");
    }

    #[tokio::test]
    async fn test_upload_size_bounds_stream() {
        let (_temp, store) = store();
        let mut src: &[u8] = b"0123456789";
        let id = store
            .upload("short.bin", UploadSource::Stream(&mut src), 4)
            .await
            .unwrap();
        let handle = store.open(id).await.unwrap();
        assert_eq!(handle.length(), 4);
    }

    #[tokio::test]
    async fn test_local_fast_path() {
        let (temp, store) = store();
        let local = temp.path().join("source.dat");
        fs::write(&local, b"local payload").await.unwrap();
        let id = store
            .upload("source.dat", UploadSource::LocalPath(&local), 13)
            .await
            .unwrap();
        let handle = store.open(id).await.unwrap();
        assert_eq!(handle.length(), 13);
    }

    #[tokio::test]
    async fn test_identical_upload_becomes_alias() {
        let (_temp, store) = store();
        let payload = b"same bytes".to_vec();
        let mut src = payload.as_slice();
        let first = store
            .upload("a.bin", UploadSource::Stream(&mut src), payload.len() as u64)
            .await
            .unwrap();
        let mut src = payload.as_slice();
        let second = store
            .upload("b.bin", UploadSource::Stream(&mut src), payload.len() as u64)
            .await
            .unwrap();
        assert_ne!(first, second);

        let alias = store.open(second).await.unwrap();
        assert_eq!(alias.info().alias_of, Some(first));
        let original = store.open(first).await.unwrap();
        assert_eq!(original.info().aliases, vec![second]);
        // both resolve to the same payload
        assert_eq!(
            store.repository_path(first).await.unwrap(),
            store.repository_path(second).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_expunge_promotes_alias() {
        let (_temp, store) = store();
        let payload = b"shared".to_vec();
        let mut src = payload.as_slice();
        let first = store
            .upload("a", UploadSource::Stream(&mut src), 6)
            .await
            .unwrap();
        let mut src = payload.as_slice();
        let second = store
            .upload("b", UploadSource::Stream(&mut src), 6)
            .await
            .unwrap();

        let handle = store.open(first).await.unwrap();
        handle.expunge().await.unwrap();
        assert!(store.open(first).await.is_err());

        // the alias now owns the payload
        let mut heir = store.open(second).await.unwrap();
        assert_eq!(heir.info().alias_of, None);
        let mut reader = heir.reader(0, 6).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"shared");
    }

    #[tokio::test]
    async fn test_expunge_sole_entry() {
        let (_temp, store) = store();
        let mut src: &[u8] = b"gone";
        let id = store
            .upload("g", UploadSource::Stream(&mut src), 4)
            .await
            .unwrap();
        let handle = store.open(id).await.unwrap();
        assert_eq!(handle.expunge().await.unwrap(), id);
        assert!(store.open(id).await.is_err());
        assert!(store.repository_path(id).await.is_err());
    }
}
