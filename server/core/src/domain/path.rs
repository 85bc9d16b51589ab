// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Node path parsing
//!
//! Paths address nodes relative to the caller's root collection. They are
//! split on `/`, empty and `.` segments are dropped, and every remaining
//! segment must be a valid node name. `..` is rejected outright: resolution
//! never walks upwards.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Turns a textual path into normalized name segments

use crate::domain::error::FilesystemError;
use crate::domain::name::normalize_name;

pub struct PathSanitizer {
    /// Maximum accepted path length in bytes (default: 4096)
    max_path_len: usize,
}

impl PathSanitizer {
    pub fn new() -> Self {
        Self { max_path_len: 4096 }
    }

    pub fn with_max_length(max_path_len: usize) -> Self {
        Self { max_path_len }
    }

    /// Split `path` into normalized name segments.
    ///
    /// `/` and the empty string both yield no segments and address the root.
    pub fn segments(&self, path: &str) -> Result<Vec<String>, FilesystemError> {
        if path.len() > self.max_path_len {
            return Err(FilesystemError::InvalidArgument(format!(
                "path exceeds {} bytes",
                self.max_path_len
            )));
        }

        let mut segments = Vec::new();
        for part in path.split('/') {
            match part {
                "" | "." => continue,
                ".." => {
                    tracing::warn!(path = %path, "Rejected path containing '..' segment");
                    return Err(FilesystemError::InvalidArgument(format!(
                        "path '{}' must not contain '..'",
                        path
                    )));
                }
                other => segments.push(normalize_name(other)?),
            }
        }
        Ok(segments)
    }
}

impl Default for PathSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_and_skips_redundant_segments() {
        let sanitizer = PathSanitizer::new();
        assert_eq!(
            sanitizer.segments("/docs//./a.txt").unwrap(),
            vec!["docs".to_string(), "a.txt".to_string()]
        );
        assert!(sanitizer.segments("/").unwrap().is_empty());
        assert!(sanitizer.segments("").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_parent_segments() {
        let sanitizer = PathSanitizer::new();
        assert!(sanitizer.segments("/docs/../etc").is_err());
        assert!(sanitizer.segments("..").is_err());
    }

    #[test]
    fn test_length_limit() {
        let sanitizer = PathSanitizer::with_max_length(8);
        assert!(sanitizer.segments("/abc").is_ok());
        assert!(sanitizer.segments("/abcdefghij").is_err());
    }

    #[test]
    fn test_segments_are_nfc() {
        let segments = PathSanitizer::new().segments("/e\u{0301}").unwrap();
        assert_eq!(segments, vec!["\u{00e9}".to_string()]);
    }
}
