use crate::StorageError;
use codesaga_core::{BlobError, BlobStore, WriteGuard};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".lock";

/// One `<key>.json` file per key inside a directory.
///
/// Writers serialize on an advisory lock and replace files by rename, so a
/// reader never observes a half-written blob.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

struct DirLock {
    file: File,
}

impl DirLock {
    fn exclusive(dir: &Path) -> Result<Self, StorageError> {
        let file = Self::open(dir)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }

    fn shared(dir: &Path) -> Result<Self, StorageError> {
        let file = Self::open(dir)?;
        file.lock_shared()?;
        Ok(Self { file })
    }

    fn open(dir: &Path) -> Result<File, StorageError> {
        fs::create_dir_all(dir)?;
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?)
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl FileBlobStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    pub fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        let _lock = DirLock::shared(&self.dir)?;
        read_file(&path)
    }

    pub fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let _lock = DirLock::exclusive(&self.dir)?;
        replace_file(&path, value)
    }

    /// Writes `value` if `guard` accepts the current one. The exclusive lock
    /// is held from the read until the new file is in place.
    pub fn write_if(
        &self,
        key: &str,
        value: &str,
        guard: WriteGuard<'_>,
    ) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        let _lock = DirLock::exclusive(&self.dir)?;
        let current = read_file(&path)?;
        if !guard(current.as_deref()) {
            return Ok(false);
        }
        replace_file(&path, value)?;
        Ok(true)
    }

    pub fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        let _lock = DirLock::exclusive(&self.dir)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

fn read_file(path: &Path) -> Result<Option<String>, StorageError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn replace_file(path: &Path, value: &str) -> Result<(), StorageError> {
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(value.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    tracing::trace!(path = %path.display(), bytes = value.len(), "blob written");
    Ok(())
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>, BlobError> {
        Ok(self.read(key)?)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BlobError> {
        Ok(self.write(key, value)?)
    }

    fn remove(&self, key: &str) -> Result<(), BlobError> {
        self.delete(key)?;
        Ok(())
    }

    fn set_if(&self, key: &str, value: &str, guard: WriteGuard<'_>) -> Result<bool, BlobError> {
        Ok(self.write_if(key, value, guard)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_read_delete() {
        let dir = TempDir::new().expect("temp dir");
        let store = FileBlobStore::open(dir.path().join("saves")).expect("open");

        assert_eq!(store.get("codesaga_progress_v2").expect("get"), None);
        store.set("codesaga_progress_v2", "{}").expect("set");
        store.set("codesaga_progress_v2", "{\"revision\":3}").expect("overwrite");
        assert_eq!(
            store.get("codesaga_progress_v2").expect("get").as_deref(),
            Some("{\"revision\":3}")
        );
        assert!(store.dir().join("codesaga_progress_v2.json").exists());
        assert!(!store.dir().join("codesaga_progress_v2.json.tmp").exists());

        assert!(store.delete("codesaga_progress_v2").expect("delete"));
        assert!(!store.delete("codesaga_progress_v2").expect("delete again"));
    }

    #[test]
    fn rejects_path_like_keys() {
        let dir = TempDir::new().expect("temp dir");
        let store = FileBlobStore::open(dir.path()).expect("open");
        for key in ["", "../escape", ".lock", "a/b"] {
            assert!(matches!(
                store.write(key, "x"),
                Err(StorageError::InvalidKey(_))
            ));
        }
    }

    #[test]
    fn guarded_increments_from_two_handles_are_not_lost() {
        let dir = TempDir::new().expect("temp dir");
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let store = FileBlobStore::open(dir.path()).expect("open");
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        loop {
                            let seen = store.read("counter").expect("read");
                            let next = seen
                                .as_deref()
                                .map(|raw| raw.parse::<u32>().expect("number"))
                                .unwrap_or(0)
                                + 1;
                            let guard = |current: Option<&str>| current == seen.as_deref();
                            if store
                                .write_if("counter", &next.to_string(), &guard)
                                .expect("write")
                            {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("join");
        }

        let store = FileBlobStore::open(dir.path()).expect("open");
        assert_eq!(store.read("counter").expect("read").as_deref(), Some("100"));
    }

    #[test]
    fn refused_guarded_write_leaves_file_alone() {
        let dir = TempDir::new().expect("temp dir");
        let store = FileBlobStore::open(dir.path()).expect("open");
        store.write("k", "old").expect("seed");
        assert!(!store
            .write_if("k", "new", &|current| current.is_none())
            .expect("guarded write"));
        assert_eq!(store.read("k").expect("read").as_deref(), Some("old"));
        assert!(!dir.path().join("k.json.tmp").exists());
    }

    #[test]
    fn write_waits_for_external_lock() {
        let dir = TempDir::new().expect("temp dir");
        let store = FileBlobStore::open(dir.path()).expect("open");
        let external = DirLock::open(dir.path()).expect("lock file");
        external.lock_exclusive().expect("hold lock");

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || store.write("k", "v"))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!dir.path().join("k.json").exists());

        external.unlock().expect("release lock");
        writer.join().expect("join").expect("write");
        assert_eq!(store.read("k").expect("read").as_deref(), Some("v"));
    }
}
