// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Byte sources for key, certificate and bundle references.
//!
//! Issuer configuration refers to key and certificate material by opaque
//! reference strings. The core never interprets the reference scheme; it
//! only needs the [`ByteSource`] read contract (and a symmetric write used
//! by setup tooling and tests).

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::error::{CaError, Result};

/// Read/write access to referenced byte material.
pub trait ByteSource: Send + Sync {
    /// Read the bytes behind `reference`.
    ///
    /// Returns [`CaError::NotFound`] when nothing exists at the reference.
    fn read_bytes(&self, reference: &str) -> Result<Vec<u8>>;

    /// Write `data` to `reference`, replacing existing content.
    fn write_bytes(&self, reference: &str, data: &[u8]) -> Result<()>;
}

/// Byte source backed by the local filesystem.
///
/// Relative references are resolved against the base directory, when one
/// is set, and against the process working directory otherwise.
#[derive(Debug, Clone, Default)]
pub struct FsByteSource {
    base_dir: Option<PathBuf>,
}

impl FsByteSource {
    /// Create a source that resolves references as plain paths.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source that resolves relative references under `dir`.
    pub fn with_base_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: Some(dir.as_ref().to_path_buf()),
        }
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl ByteSource for FsByteSource {
    fn read_bytes(&self, reference: &str) -> Result<Vec<u8>> {
        fs::read(self.resolve(reference)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CaError::NotFound(reference.to_string()),
            _ => CaError::Io(e),
        })
    }

    fn write_bytes(&self, reference: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(reference);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, data)?;
        Ok(())
    }
}

/// In-memory byte source, keyed by the exact reference string.
#[derive(Debug, Default)]
pub struct MemByteSource {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemByteSource {
    /// Create an empty in-memory source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, returning the source for chaining.
    pub fn with_file(self, reference: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.into(), data.into());
        self
    }
}

impl ByteSource for MemByteSource {
    fn read_bytes(&self, reference: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(reference)
            .cloned()
            .ok_or_else(|| CaError::NotFound(reference.to_string()))
    }

    fn write_bytes(&self, reference: &str, data: &[u8]) -> Result<()> {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_not_found_message() {
        let source = FsByteSource::new();
        let err = source.read_bytes("not_found").unwrap_err();
        assert_eq!(err.to_string(), "open not_found: file does not exist");
    }

    #[test]
    fn test_fs_write_then_read_under_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsByteSource::with_base_dir(dir.path());

        source.write_bytes("nested/ca.pem", b"pem bytes").unwrap();

        assert!(dir.path().join("nested/ca.pem").exists());
        assert_eq!(source.read_bytes("nested/ca.pem").unwrap(), b"pem bytes");
    }

    #[test]
    fn test_fs_absolute_reference_ignores_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("abs.key");
        std::fs::write(&file, b"key").unwrap();

        let source = FsByteSource::with_base_dir("/does/not/matter");
        assert_eq!(source.read_bytes(file.to_str().unwrap()).unwrap(), b"key");
    }

    #[test]
    fn test_mem_source() {
        let source = MemByteSource::new().with_file("a", "alpha");
        assert_eq!(source.read_bytes("a").unwrap(), b"alpha");

        source.write_bytes("b", b"beta").unwrap();
        assert_eq!(source.read_bytes("b").unwrap(), b"beta");

        let err = source.read_bytes("missing").unwrap_err();
        assert!(matches!(err, CaError::NotFound(ref r) if r == "missing"));
    }
}
