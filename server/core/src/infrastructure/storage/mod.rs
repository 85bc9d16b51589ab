// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Storage Infrastructure Module
//!
//! Concrete [`StorageAdapter`] implementations and the factory that turns
//! manifest options into adapters.
//!
//! Options are validated before anything is constructed: a bad adapter entry
//! fails startup with `StorageError::InvalidArgument` instead of surfacing on
//! the first write.

pub mod blob;
pub mod local;
pub mod memory;
pub mod smb;

pub use blob::BlobStoreAdapter;
pub use local::LocalStorageAdapter;
pub use memory::MemoryStorageAdapter;
pub use smb::{SmbAuth, SmbConfig, SmbStorageAdapter};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::domain::config::{AdapterKind, AdapterOptions, StorageConfig};
use crate::domain::storage::{StorageAdapter, StorageError, StorageRegistry};

const MAX_KEY_LEN: usize = 200;
const DEFAULT_BLOB_TIMEOUT_SECS: u64 = 30;

/// Keys are generated by the filesystem service, but adapters still refuse
/// anything that could escape their namespace.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Adapter options that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedAdapter {
    Local {
        base_path: PathBuf,
    },
    Blob {
        filer_url: String,
        root: String,
        timeout: Duration,
    },
    Smb(SmbConfig),
    Memory,
}

/// Validates adapter options and builds adapters from them. Stateless.
pub struct StorageAdapterFactory;

impl StorageAdapterFactory {
    pub fn validate(options: &AdapterOptions) -> Result<ValidatedAdapter, StorageError> {
        match options.adapter {
            AdapterKind::Local => {
                let path = required(&options.path, "local", "path")?;
                Ok(ValidatedAdapter::Local {
                    base_path: PathBuf::from(path),
                })
            }
            AdapterKind::Blob => {
                let url = required(&options.url, "blob", "url")?;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(StorageError::InvalidArgument(format!(
                        "blob adapter url must be http(s), got '{}'",
                        url
                    )));
                }
                Ok(ValidatedAdapter::Blob {
                    filer_url: url.to_string(),
                    root: options
                        .root
                        .clone()
                        .unwrap_or_else(|| blob::DEFAULT_ROOT.to_string()),
                    timeout: Duration::from_secs(
                        options.timeout_seconds.unwrap_or(DEFAULT_BLOB_TIMEOUT_SECS),
                    ),
                })
            }
            AdapterKind::Smb => {
                let host = required(&options.host, "smb", "host")?;
                let share = required(&options.share, "smb", "share")?;
                let auth = smb_auth(options)?;
                Ok(ValidatedAdapter::Smb(SmbConfig {
                    host: host.to_string(),
                    share: share.to_string(),
                    root: smb_root(options.path.as_deref())?,
                    auth,
                    binary: PathBuf::from(options.binary.as_deref().unwrap_or("smbclient")),
                }))
            }
            AdapterKind::Memory => Ok(ValidatedAdapter::Memory),
        }
    }

    pub fn build(name: &str, validated: ValidatedAdapter) -> Result<Arc<dyn StorageAdapter>, StorageError> {
        let adapter: Arc<dyn StorageAdapter> = match validated {
            ValidatedAdapter::Local { base_path } => {
                Arc::new(LocalStorageAdapter::new(name, base_path)?)
            }
            ValidatedAdapter::Blob {
                filer_url,
                root,
                timeout,
            } => Arc::new(BlobStoreAdapter::new(name, filer_url, root, timeout)?),
            ValidatedAdapter::Smb(config) => Arc::new(SmbStorageAdapter::new(name, config)),
            ValidatedAdapter::Memory => Arc::new(MemoryStorageAdapter::new(name)),
        };
        Ok(adapter)
    }

    pub fn create(name: &str, options: &AdapterOptions) -> Result<Arc<dyn StorageAdapter>, StorageError> {
        let validated = Self::validate(options).map_err(|e| match e {
            StorageError::InvalidArgument(msg) => {
                StorageError::InvalidArgument(format!("adapter '{}': {}", name, msg))
            }
            other => other,
        })?;
        Self::build(name, validated)
    }

    /// Build every configured adapter. All entries are validated before any
    /// adapter is constructed.
    pub fn build_registry(config: &StorageConfig) -> Result<StorageRegistry, StorageError> {
        for (name, options) in &config.adapters {
            Self::validate(options).map_err(|e| {
                StorageError::InvalidArgument(format!("adapter '{}': {}", name, e))
            })?;
        }

        let default_options = config.adapters.get(&config.default_adapter).ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "default adapter '{}' is not configured",
                config.default_adapter
            ))
        })?;

        let mut registry = StorageRegistry::new(Self::create(&config.default_adapter, default_options)?);
        for (name, options) in &config.adapters {
            if *name == config.default_adapter {
                continue;
            }
            registry.register(Self::create(name, options)?)?;
        }

        info!(
            default = %config.default_adapter,
            adapters = config.adapters.len(),
            "Storage adapters initialized"
        );
        Ok(registry)
    }
}

fn required<'a>(value: &'a Option<String>, adapter: &str, field: &str) -> Result<&'a str, StorageError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(StorageError::InvalidArgument(format!(
            "{} adapter requires '{}'",
            adapter, field
        ))),
    }
}

/// The root ends up inside a quoted `smbclient -c` script.
fn smb_root(path: Option<&str>) -> Result<String, StorageError> {
    let root = path.unwrap_or_default();
    if root.chars().any(|c| c == '"' || c == ';' || c.is_control()) {
        return Err(StorageError::InvalidArgument(format!(
            "smb path '{}' contains quotes, ';' or control characters",
            root.escape_debug()
        )));
    }
    Ok(root.to_string())
}

/// Credentials are all-or-nothing: anonymous access only applies when none
/// of username, password and workgroup is given.
fn smb_auth(options: &AdapterOptions) -> Result<SmbAuth, StorageError> {
    match (&options.username, &options.password, &options.workgroup) {
        (None, None, None) => Ok(SmbAuth::Anonymous),
        (Some(username), Some(password), Some(workgroup)) => Ok(SmbAuth::Basic {
            username: username.clone(),
            password: password.clone(),
            workgroup: workgroup.clone(),
        }),
        (username, password, workgroup) => {
            let missing: Vec<&str> = [
                ("username", username.is_none()),
                ("password", password.is_none()),
                ("workgroup", workgroup.is_none()),
            ]
            .into_iter()
            .filter_map(|(field, absent)| absent.then_some(field))
            .collect();
            Err(StorageError::InvalidArgument(format!(
                "smb credentials are incomplete, missing {}",
                missing.join(", ")
            )))
        }
    }
}
