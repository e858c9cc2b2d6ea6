use std::fs::{self, File};
use std::path::{Path, PathBuf};

use super::{Store, StoreError, StoreWriter, match_options};
use crate::core::uri;

/// Local filesystem backend for plain paths and `file://` URIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStore;

impl LocalStore {
    fn path(uri: &str) -> Result<PathBuf, StoreError> {
        match uri::scheme(uri) {
            None | Some("file") => Ok(PathBuf::from(uri::strip_scheme(uri))),
            Some(other) => Err(StoreError::UnsupportedScheme {
                scheme: other.to_string(),
                uri: uri.to_string(),
            }),
        }
    }

    fn ensure_parent(path: &Path, uri: &str) -> Result<(), StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| StoreError::io("create parent of", uri, err))?;
        }
        Ok(())
    }
}

impl Store for LocalStore {
    fn read(&self, uri: &str) -> Result<Vec<u8>, StoreError> {
        fs::read(Self::path(uri)?).map_err(|err| StoreError::io("read", uri, err))
    }

    fn write(&self, uri: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = Self::path(uri)?;
        Self::ensure_parent(&path, uri)?;
        fs::write(&path, data).map_err(|err| StoreError::io("write", uri, err))
    }

    fn create_writer(&self, uri: &str) -> Result<StoreWriter, StoreError> {
        let path = Self::path(uri)?;
        Self::ensure_parent(&path, uri)?;
        let file = File::create(&path).map_err(|err| StoreError::io("create", uri, err))?;
        Ok(Box::new(file))
    }

    fn exists(&self, uri: &str) -> Result<bool, StoreError> {
        Ok(Self::path(uri)?.exists())
    }

    fn make_dirs(&self, uri: &str) -> Result<(), StoreError> {
        fs::create_dir_all(Self::path(uri)?).map_err(|err| StoreError::io("create dir", uri, err))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let prefix = &pattern[..pattern.len() - uri::strip_scheme(pattern).len()];
        let local_pattern = Self::path(pattern)?.display().to_string();
        let entries = glob::glob_with(&local_pattern, match_options()).map_err(|source| {
            StoreError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        let mut matches = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| {
                let uri = err.path().display().to_string();
                StoreError::io("list", &uri, err.into_error())
            })?;
            matches.push(format!("{prefix}{}", path.display()));
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn writer_appends_as_written() {
        let temp = tempfile::tempdir().expect("tempdir");
        let uri = temp.path().join("run/stdout").display().to_string();
        let store = LocalStore;

        let mut writer = store.create_writer(&uri).expect("writer");
        writer.write_all(b"one\n").expect("write");
        writer.flush().expect("flush");
        assert_eq!(store.read(&uri).expect("read"), b"one\n");
        writer.write_all(b"two\n").expect("write");
        drop(writer);
        assert_eq!(store.read(&uri).expect("read"), b"one\ntwo\n");
    }

    #[test]
    fn glob_matches_single_segment_and_keeps_scheme() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().display().to_string();
        let store = LocalStore;
        store.write(&format!("{root}/0/status_code"), b"0").expect("write");
        store.write(&format!("{root}/1/status_code"), b"1").expect("write");
        store
            .write(&format!("{root}/1/nested/status_code"), b"9")
            .expect("write");

        let plain = store.glob(&format!("{root}/*/status_code")).expect("glob");
        assert_eq!(
            plain,
            vec![format!("{root}/0/status_code"), format!("{root}/1/status_code")]
        );

        let with_scheme = store
            .glob(&format!("file://{root}/*/status_code"))
            .expect("glob");
        assert_eq!(with_scheme[0], format!("file://{root}/0/status_code"));
    }

    #[test]
    fn missing_object_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let uri = temp.path().join("absent").display().to_string();
        assert!(matches!(
            LocalStore.read(&uri).unwrap_err(),
            StoreError::NotFound { .. }
        ));
        assert!(!LocalStore.exists(&uri).expect("exists"));
    }
}
