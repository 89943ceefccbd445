//! On-disk back end: a flat directory of files keyed by a filesystem-safe
//! digest string, written atomically via tempfile-then-rename so a reader
//! never observes a partially-written blob.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::HashSet;
use std::path::PathBuf;
use strata_core::{BlobAccess, BlobStream, Digest, Result, StorageError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

pub struct DiskBlobStore {
    root: PathBuf,
}

impl DiskBlobStore {
    /// Open (creating if absent) a disk store rooted at `root`.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::io("creating disk store root", e))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key.replace(':', "_"))
    }

    fn tmp_path(&self) -> PathBuf {
        self.root.join(format!(".tmp-{}", Uuid::new_v4()))
    }
}

#[async_trait]
impl BlobAccess for DiskBlobStore {
    async fn get(&self, digest: &Digest) -> Result<BlobStream> {
        let path = self.path_for(&digest.key_without_instance());
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(digest.key_with_instance()));
            }
            Err(e) => return Err(StorageError::io("reading disk blob", e)),
        };
        Ok(BlobStream::new(Box::pin(stream::once(async move {
            Ok(Bytes::from(bytes))
        }))))
    }

    async fn put(&self, digest: &Digest, mut reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()> {
        let final_path = self.path_for(&digest.key_without_instance());
        let tmp_path = self.tmp_path();

        let result: Result<()> = async {
            let mut file = tokio::fs::File::create(&tmp_path)
                .await
                .map_err(|e| StorageError::io("creating disk store tempfile", e))?;
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = reader
                    .read(&mut buf)
                    .await
                    .map_err(|e| StorageError::io("reading put body", e))?;
                if n == 0 {
                    break;
                }
                file.write_all(&buf[..n])
                    .await
                    .map_err(|e| StorageError::io("writing disk store tempfile", e))?;
            }
            file.sync_all().await.map_err(|e| StorageError::io("syncing disk store tempfile", e))?;
            tokio::fs::rename(&tmp_path, &final_path)
                .await
                .map_err(|e| StorageError::io("renaming disk store tempfile into place", e))
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        result
    }

    async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>> {
        let mut missing = HashSet::new();
        for digest in digests {
            let path = self.path_for(&digest.key_without_instance());
            if tokio::fs::metadata(&path).await.is_err() {
                missing.insert(digest.clone());
            }
        }
        Ok(missing)
    }

    async fn delete(&self, digest: &Digest) -> Result<()> {
        let path = self.path_for(&digest.key_without_instance());
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io("deleting disk blob", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::HashFunction;
    use tempfile::tempdir;

    #[tokio::test]
    async fn atomic_write_then_read() {
        let dir = tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path()).await.unwrap();
        let digest = Digest::from_bytes("", HashFunction::Sha256, b"on disk");

        store.put(&digest, Box::new(std::io::Cursor::new(b"on disk".to_vec()))).await.unwrap();
        let got = store.get(&digest).await.unwrap().collect().await.unwrap();
        assert_eq!(got.as_ref(), b"on disk");

        store.delete(&digest).await.unwrap();
        assert!(matches!(store.get(&digest).await, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn find_missing_reflects_disk_state() {
        let dir = tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path()).await.unwrap();
        let present = Digest::from_bytes("", HashFunction::Sha256, b"present");
        let absent = Digest::from_bytes("", HashFunction::Sha256, b"absent");
        store.put(&present, Box::new(std::io::Cursor::new(b"present".to_vec()))).await.unwrap();

        let missing = store.find_missing(&[present, absent.clone()]).await.unwrap();
        assert_eq!(missing, HashSet::from([absent]));
    }
}
