// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the on-disk data layout.

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Default base directory for persistent storage.
pub const DATA_ROOT: &str = "/data";

/// Storage path utilities.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relational store file.
    pub fn database_file(&self) -> PathBuf {
        self.root.join("core.redb")
    }

    /// Root of the filesystem blob store.
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }
}

/// Generate a fresh object path for an encrypted document.
///
/// Two independent random UUID segments. The path carries no user id,
/// prediction id, or original filename, so a leaked path reveals nothing
/// about ownership.
pub fn new_object_path() -> String {
    format!("{}/{}", Uuid::new_v4(), Uuid::new_v4())
}

/// Whether `path` has the shape produced by [`new_object_path`].
pub fn is_object_path(path: &str) -> bool {
    let mut segments = path.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(a), Some(b), None) => Uuid::parse_str(a).is_ok() && Uuid::parse_str(b).is_ok(),
        _ => false,
    }
}
