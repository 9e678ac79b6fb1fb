use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::error;

use super::lock;
use crate::{BlobStorage, HardwareError};

/// Volatile storage, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    blobs: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        lock(&self.blobs)
            .get(&(namespace.to_owned(), key.to_owned()))
            .cloned()
    }
}

impl BlobStorage for MemStorage {
    fn get_blob(
        &mut self,
        namespace: &str,
        key: &str,
        buf: &mut [u8],
    ) -> Result<Option<usize>, HardwareError> {
        let blobs = lock(&self.blobs);
        let Some(blob) = blobs.get(&(namespace.to_owned(), key.to_owned())) else {
            return Ok(None);
        };
        copy_out(blob, buf).map(Some)
    }

    fn set_blob(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), HardwareError> {
        lock(&self.blobs).insert((namespace.to_owned(), key.to_owned()), data.to_vec());
        Ok(())
    }
}

/// One file per namespace/key under a directory, surviving restarts of the
/// host binary.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, namespace: &str, key: &str) -> PathBuf {
        self.dir.join(format!("{namespace}.{key}.bin"))
    }
}

impl BlobStorage for FileStorage {
    fn get_blob(
        &mut self,
        namespace: &str,
        key: &str,
        buf: &mut [u8],
    ) -> Result<Option<usize>, HardwareError> {
        match fs::read(self.path(namespace, key)) {
            Ok(blob) => copy_out(&blob, buf).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!("storage read {namespace}/{key}: {e}");
                Err(HardwareError::Storage("read failed"))
            }
        }
    }

    fn set_blob(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), HardwareError> {
        let path = self.path(namespace, key);
        let tmp = path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            fs::create_dir_all(&self.dir)?;
            fs::write(&tmp, data)?;
            // rename is the commit
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| {
            error!("storage write {namespace}/{key}: {e}");
            HardwareError::Storage("write failed")
        })
    }
}

fn copy_out(blob: &[u8], buf: &mut [u8]) -> Result<usize, HardwareError> {
    if blob.len() > buf.len() {
        return Err(HardwareError::Storage("blob larger than buffer"));
    }
    buf[..blob.len()].copy_from_slice(blob);
    Ok(blob.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_storage_persists_across_instances() {
        let dir = std::env::temp_dir().join(format!("boombox-nvs-test-{}", std::process::id()));
        let mut store = FileStorage::new(&dir);
        let mut buf = [0u8; 8];
        assert_eq!(store.get_blob("ns", "k", &mut buf), Ok(None));

        store.set_blob("ns", "k", b"abc").unwrap();
        let mut reopened = FileStorage::new(&dir);
        assert_eq!(reopened.get_blob("ns", "k", &mut buf), Ok(Some(3)));
        assert_eq!(&buf[..3], b"abc");

        let mut small = [0u8; 2];
        assert!(reopened.get_blob("ns", "k", &mut small).is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn mem_storage_is_shared_between_clones() {
        let mut a = MemStorage::new();
        let b = a.clone();
        a.set_blob("ns", "k", &[1, 2]).unwrap();
        assert_eq!(b.get("ns", "k"), Some(vec![1, 2]));
    }
}
