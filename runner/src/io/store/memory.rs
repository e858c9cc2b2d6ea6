use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Store, StoreError, StoreWriter, match_options};
use crate::core::uri;

type Objects = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

/// In-process backend for `mem://` URIs. Clones share objects.
///
/// Directories are implicit: a URI "exists" if it names an object or prefixes one.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Objects,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All object URIs, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn read(&self, uri: &str) -> Result<Vec<u8>, StoreError> {
        self.objects()
            .get(uri)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                uri: uri.to_string(),
            })
    }

    fn write(&self, uri: &str, data: &[u8]) -> Result<(), StoreError> {
        self.objects().insert(uri.to_string(), data.to_vec());
        Ok(())
    }

    fn create_writer(&self, uri: &str) -> Result<StoreWriter, StoreError> {
        self.objects().insert(uri.to_string(), Vec::new());
        Ok(Box::new(MemoryWriter {
            objects: Arc::clone(&self.objects),
            uri: uri.to_string(),
        }))
    }

    fn exists(&self, uri: &str) -> Result<bool, StoreError> {
        let objects = self.objects();
        if objects.contains_key(uri) {
            return Ok(true);
        }
        let prefix = uri::with_trailing_slash(uri);
        Ok(objects
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix)))
    }

    fn make_dirs(&self, _uri: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let compiled =
            glob::Pattern::new(pattern).map_err(|source| StoreError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        let options = match_options();
        Ok(self
            .objects()
            .keys()
            .filter(|key| compiled.matches_with(key, options))
            .cloned()
            .collect())
    }
}

struct MemoryWriter {
    objects: Objects,
    uri: String,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        objects
            .entry(self.uri.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
