//! RAM-backed storage for the simulator and tests
//!
//! Both stores can be told to fail so the degraded paths (card pulled, flash
//! busy) are reachable without hardware.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::{FileSystem, KeyValueStore, StorageError};

fn parent(path: &str) -> Option<&str> {
    path.rfind('/').map(|i| &path[..i])
}

/// FAT-like file system held in memory
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    mounted: bool,
    fail_writes: bool,
    writes: usize,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
            mounted: true,
            fail_writes: false,
            writes: 0,
        }
    }

    pub fn set_mounted(&mut self, mounted: bool) {
        self.mounted = mounted;
    }

    /// Make every write, append and delete fail with `WriteFailed`
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Successful write and append calls so far
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn check_writable(&self, path: &str) -> Result<(), StorageError> {
        if !self.mounted {
            return Err(StorageError::NotMounted);
        }
        if self.fail_writes {
            return Err(StorageError::WriteFailed);
        }
        match parent(path) {
            Some(dir) if !self.dirs.contains(dir) => Err(StorageError::NotFound),
            _ => Ok(()),
        }
    }
}

impl FileSystem for MemoryFileSystem {
    fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn exists(&mut self, path: &str) -> bool {
        self.mounted && (self.files.contains_key(path) || self.dirs.contains(path))
    }

    fn read_to_end(&mut self, path: &str) -> Result<Vec<u8>, StorageError> {
        if !self.mounted {
            return Err(StorageError::NotMounted);
        }
        self.files.get(path).cloned().ok_or(StorageError::NotFound)
    }

    fn write_all(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        self.check_writable(path)?;
        self.files.insert(path.to_string(), data.to_vec());
        self.writes += 1;
        Ok(())
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        self.check_writable(path)?;
        self.files
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(data);
        self.writes += 1;
        Ok(())
    }

    fn create_dir_all(&mut self, path: &str) -> Result<(), StorageError> {
        if !self.mounted {
            return Err(StorageError::NotMounted);
        }
        if self.fail_writes {
            return Err(StorageError::WriteFailed);
        }
        let mut prefix = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(component);
            self.dirs.insert(prefix.clone());
        }
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), StorageError> {
        if !self.mounted {
            return Err(StorageError::NotMounted);
        }
        if self.fail_writes {
            return Err(StorageError::WriteFailed);
        }
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    U32(u32),
    Blob(Vec<u8>),
}

/// NVS namespace held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    committed: BTreeMap<String, Value>,
    pending: BTreeMap<String, Value>,
    unavailable: bool,
    commits: usize,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every access fail with `Busy`, as when the flash is locked
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable {
            Err(StorageError::Busy)
        } else {
            Ok(())
        }
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        self.pending.get(key).or_else(|| self.committed.get(key))
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_u32(&mut self, key: &str) -> Result<Option<u32>, StorageError> {
        self.check()?;
        match self.lookup(key) {
            Some(Value::U32(value)) => Ok(Some(*value)),
            Some(Value::Blob(_)) => Err(StorageError::Corrupt),
            None => Ok(None),
        }
    }

    fn set_u32(&mut self, key: &str, value: u32) -> Result<(), StorageError> {
        self.check()?;
        self.pending.insert(key.to_string(), Value::U32(value));
        Ok(())
    }

    fn get_blob(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.check()?;
        match self.lookup(key) {
            Some(Value::Blob(bytes)) => Ok(Some(bytes.clone())),
            Some(Value::U32(_)) => Err(StorageError::Corrupt),
            None => Ok(None),
        }
    }

    fn set_blob(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.check()?;
        self.pending.insert(key.to_string(), Value::Blob(value.to_vec()));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.check()?;
        self.committed.append(&mut self.pending);
        self.commits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_requires_parent_dir() {
        let mut fs = MemoryFileSystem::new();
        assert_eq!(fs.append("A/B.TXT", b"x"), Err(StorageError::NotFound));
        assert_eq!(fs.create_dir_all("A"), Ok(()));
        assert_eq!(fs.append("A/B.TXT", b"x"), Ok(()));
        assert_eq!(fs.append("A/B.TXT", b"y"), Ok(()));
        assert_eq!(fs.file("A/B.TXT"), Some(&b"xy"[..]));
    }

    #[test]
    fn test_read_head_stops_at_len() {
        let mut fs = MemoryFileSystem::new();
        let _ = fs.create_dir_all("A");
        let _ = fs.write_all("A/B.TXT", b"header\nbody\n");
        assert_eq!(fs.read_head("A/B.TXT", 7), Ok(b"header\n".to_vec()));
        assert_eq!(fs.read_head("A/B.TXT", 64).map(|b| b.len()), Ok(12));
        assert_eq!(fs.read_head("A/C.TXT", 7), Err(StorageError::NotFound));
    }

    #[test]
    fn test_unmounted_hides_files() {
        let mut fs = MemoryFileSystem::new();
        let _ = fs.write_all("ROOT.BIN", b"1");
        fs.set_mounted(false);
        assert!(!fs.exists("ROOT.BIN"));
        assert_eq!(fs.read_to_end("ROOT.BIN"), Err(StorageError::NotMounted));
    }

    #[test]
    fn test_nvs_commit_overlays_pending() {
        let mut nvs = MemoryKeyValueStore::new();
        let _ = nvs.set_u32("k", 1);
        assert_eq!(nvs.get_u32("k"), Ok(Some(1)), "Reads see uncommitted values");
        let _ = nvs.commit();
        let _ = nvs.set_u32("k", 2);
        let _ = nvs.commit();
        assert_eq!(nvs.get_u32("k"), Ok(Some(2)));
        assert_eq!(nvs.commit_count(), 2);
    }

    #[test]
    fn test_nvs_unavailable() {
        let mut nvs = MemoryKeyValueStore::new();
        nvs.set_unavailable(true);
        assert_eq!(nvs.set_blob("k", b"abc"), Err(StorageError::Busy));
        assert_eq!(nvs.get_blob("k"), Err(StorageError::Busy));
    }
}
