//! URI-addressed file storage for run outputs and status codes.
//!
//! Every run owns a disjoint prefix (`{remote_output_path}/...`), so stores do
//! no cross-object locking. [`Stores`] routes each URI to a backend by scheme:
//! plain paths and `file://` go to [`LocalStore`], `mem://` to [`MemoryStore`].

mod local;
mod memory;

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::core::uri;

pub use local::LocalStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unsupported store scheme {scheme:?} in {uri}")]
    UnsupportedScheme { scheme: String, uri: String },
    #[error("{uri} not found")]
    NotFound { uri: String },
    #[error("invalid glob pattern {pattern}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("{op} {uri}")]
    Io {
        op: &'static str,
        uri: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(op: &'static str, uri: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return StoreError::NotFound {
                uri: uri.to_string(),
            };
        }
        StoreError::Io {
            op,
            uri: uri.to_string(),
            source,
        }
    }
}

/// Streaming writer for an object that is appended to as output arrives.
pub type StoreWriter = Box<dyn Write + Send>;

/// Flat object storage addressed by URI strings.
pub trait Store: Send + Sync {
    fn read(&self, uri: &str) -> Result<Vec<u8>, StoreError>;

    /// Create or truncate `uri` with `data`.
    fn write(&self, uri: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Create or truncate `uri` and return a writer that appends to it.
    ///
    /// Written bytes become visible to readers as soon as the writer is flushed.
    fn create_writer(&self, uri: &str) -> Result<StoreWriter, StoreError>;

    fn exists(&self, uri: &str) -> Result<bool, StoreError>;

    fn make_dirs(&self, uri: &str) -> Result<(), StoreError>;

    /// List objects matching `pattern`. `*` matches within one path segment.
    fn glob(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Fetch several objects; results line up with `uris`.
    fn read_many(&self, uris: &[String]) -> Result<Vec<Vec<u8>>, StoreError> {
        uris.iter().map(|uri| self.read(uri)).collect()
    }

    /// Recursively copy the files under local `dir` to `uri`. Returns the file count.
    fn put_dir(&self, dir: &Path, uri: &str) -> Result<usize, StoreError> {
        let mut copied = 0;
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|err| StoreError::io("walk", uri, err.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|err| StoreError::io("walk", uri, io::Error::other(err)))?;
            let segments: Vec<_> = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect();
            let target = uri::join(uri, &segments.join("/"));
            let data = fs::read(entry.path())
                .map_err(|err| StoreError::io("read", &entry.path().display().to_string(), err))?;
            self.write(&target, &data)?;
            copied += 1;
        }
        debug!(dir = %dir.display(), uri, copied, "uploaded directory");
        Ok(copied)
    }
}

const MEMORY_SCHEME: &str = "mem";
const FILE_SCHEME: &str = "file";

/// Scheme router over the available backends.
///
/// Clones share the same in-memory objects.
#[derive(Debug, Clone, Default)]
pub struct Stores {
    local: LocalStore,
    memory: MemoryStore,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router whose `mem://` objects live in `memory`.
    pub fn with_memory(memory: MemoryStore) -> Self {
        Self {
            local: LocalStore,
            memory,
        }
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    fn backend(&self, uri: &str) -> Result<&dyn Store, StoreError> {
        match uri::scheme(uri) {
            None | Some(FILE_SCHEME) => Ok(&self.local),
            Some(MEMORY_SCHEME) => Ok(&self.memory),
            Some(other) => Err(StoreError::UnsupportedScheme {
                scheme: other.to_string(),
                uri: uri.to_string(),
            }),
        }
    }
}

impl Store for Stores {
    fn read(&self, uri: &str) -> Result<Vec<u8>, StoreError> {
        self.backend(uri)?.read(uri)
    }

    fn write(&self, uri: &str, data: &[u8]) -> Result<(), StoreError> {
        self.backend(uri)?.write(uri, data)
    }

    fn create_writer(&self, uri: &str) -> Result<StoreWriter, StoreError> {
        self.backend(uri)?.create_writer(uri)
    }

    fn exists(&self, uri: &str) -> Result<bool, StoreError> {
        self.backend(uri)?.exists(uri)
    }

    fn make_dirs(&self, uri: &str) -> Result<(), StoreError> {
        self.backend(uri)?.make_dirs(uri)
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.backend(pattern)?.glob(pattern)
    }

    fn put_dir(&self, dir: &Path, uri: &str) -> Result<usize, StoreError> {
        self.backend(uri)?.put_dir(dir, uri)
    }
}

fn match_options() -> glob::MatchOptions {
    glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_rejects_unknown_scheme() {
        let stores = Stores::new();
        let err = stores.read("s3://bucket/key").unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnsupportedScheme { ref scheme, .. } if scheme == "s3"
        ));
    }

    #[test]
    fn router_routes_mem_and_local() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stores = Stores::new();

        stores.write("mem://a/b", b"mem").expect("mem write");
        let local = temp.path().join("a/b").display().to_string();
        stores.write(&local, b"local").expect("local write");
        let file_uri = format!("file://{local}");

        assert_eq!(stores.read("mem://a/b").expect("mem read"), b"mem");
        assert_eq!(stores.read(&file_uri).expect("file read"), b"local");
        assert!(stores.memory().read(&local).is_err());
    }

    #[test]
    fn clones_share_memory_objects() {
        let stores = Stores::new();
        let clone = stores.clone();
        clone.write("mem://x", b"1").expect("write");
        assert_eq!(stores.read("mem://x").expect("read"), b"1");
    }

    #[test]
    fn put_dir_copies_nested_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("nested")).expect("mkdir");
        fs::write(temp.path().join("out.txt"), "top").expect("write");
        fs::write(temp.path().join("nested/inner.txt"), "inner").expect("write");

        let stores = Stores::new();
        let copied = stores
            .put_dir(temp.path(), "mem://run/results/")
            .expect("put_dir");

        assert_eq!(copied, 2);
        assert_eq!(stores.read("mem://run/results/out.txt").expect("top"), b"top");
        assert_eq!(
            stores
                .read("mem://run/results/nested/inner.txt")
                .expect("inner"),
            b"inner"
        );
    }
}
