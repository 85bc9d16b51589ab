// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Node name rules
//!
//! Names are stored in Unicode NFC form. Sibling uniqueness compares the
//! lowercased NFC form so that `Report.txt` and `report.txt` collide, as do
//! composed and decomposed spellings of the same text.

use unicode_normalization::UnicodeNormalization;

use crate::domain::error::FilesystemError;

/// Longest accepted name, in UTF-8 bytes after normalization.
pub const MAX_NAME_BYTES: usize = 255;

const RESERVED_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Normalize and validate a user supplied node name.
pub fn normalize_name(raw: &str) -> Result<String, FilesystemError> {
    let name: String = raw.nfc().collect();

    if name.trim().is_empty() {
        return Err(FilesystemError::InvalidArgument(
            "name must not be empty".to_string(),
        ));
    }
    if name == "." || name == ".." {
        return Err(FilesystemError::InvalidArgument(format!(
            "'{}' is not a valid name",
            name
        )));
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(FilesystemError::InvalidArgument(format!(
            "name exceeds {} bytes",
            MAX_NAME_BYTES
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| c.is_control() || RESERVED_CHARS.contains(c))
    {
        return Err(FilesystemError::InvalidArgument(format!(
            "name contains reserved character {:?}",
            bad
        )));
    }

    Ok(name)
}

/// Key used for case-insensitive sibling comparison.
pub fn sibling_key(name: &str) -> String {
    let lowered = name.nfc().collect::<String>().to_lowercase();
    lowered.nfc().collect()
}
