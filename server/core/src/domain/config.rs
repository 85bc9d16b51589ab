// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Filesystem Configuration
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing:
// - Storage adapters and the default adapter
// - Quota defaults and the absolute file size limit
// - Version retention, lock lifetimes and trash retention
// - Logging

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub const API_VERSION: &str = "nimbus/v1";
pub const KIND: &str = "FilesystemConfig";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemConfigManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: FilesystemConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesystemConfigSpec {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub versions: VersionConfig,

    #[serde(default)]
    pub locks: LockConfig,

    #[serde(default)]
    pub trash: TrashConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_adapter_name")]
    pub default_adapter: String,

    #[serde(default = "default_adapters")]
    pub adapters: BTreeMap<String, AdapterOptions>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_adapter: default_adapter_name(),
            adapters: default_adapters(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Local,
    Blob,
    Smb,
    Memory,
}

/// Raw adapter options as written in the manifest. Checked by
/// `StorageAdapterFactory::validate` before any adapter is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterOptions {
    pub adapter: AdapterKind,

    /// Local base directory, or the directory inside an SMB share
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SeaweedFS filer endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Filer directory payloads are stored under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workgroup: Option<String>,

    /// Path of the `smbclient` binary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
}

impl AdapterOptions {
    pub fn new(adapter: AdapterKind) -> Self {
        Self {
            adapter,
            path: None,
            url: None,
            root: None,
            timeout_seconds: None,
            host: None,
            share: None,
            username: None,
            password: None,
            workgroup: None,
            binary: None,
        }
    }

    pub fn local(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(AdapterKind::Local)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Hard limit for principals without an explicit quota
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_hard_limit_bytes: Option<u64>,

    /// Absolute ceiling for a single payload, regardless of quota
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionConfig {
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            max_versions: default_max_versions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_ttl")]
    pub default_ttl_seconds: u64,

    #[serde(default = "default_max_lock_ttl")]
    pub max_ttl_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_lock_ttl(),
            max_ttl_seconds: default_max_lock_ttl(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrashConfig {
    /// Days a trashed node is kept before it becomes destroyable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_adapter_name() -> String {
    "local".to_string()
}

fn default_adapters() -> BTreeMap<String, AdapterOptions> {
    BTreeMap::from([(
        default_adapter_name(),
        AdapterOptions::local("/var/lib/nimbus/blobs"),
    )])
}

fn default_max_versions() -> usize {
    16
}

fn default_lock_ttl() -> u64 {
    1800
}

fn default_max_lock_ttl() -> u64 {
    86400
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for FilesystemConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "default-filesystem".to_string(),
                labels: None,
            },
            spec: FilesystemConfigSpec::default(),
        }
    }
}

impl FilesystemConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover a configuration file.
    ///
    /// Order: `NIMBUS_CONFIG_PATH`, `./nimbus-config.yaml`,
    /// `~/.nimbus/config.yaml`, then the system location.
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("NIMBUS_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./nimbus-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".nimbus").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/nimbus/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Nimbus\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load from an explicit path, a discovered file, or defaults. An explicit
    /// path that cannot be read is an error.
    pub fn load_or_default(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
        } else if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NIMBUS_DEFAULT_ADAPTER") {
            tracing::info!("Environment override: NIMBUS_DEFAULT_ADAPTER={}", val);
            self.spec.storage.default_adapter = val;
        }

        if let Ok(val) = std::env::var("NIMBUS_MAX_FILE_SIZE") {
            match val.parse::<u64>() {
                Ok(bytes) => {
                    tracing::info!("Environment override: NIMBUS_MAX_FILE_SIZE={}", bytes);
                    self.spec.quota.max_file_size_bytes = Some(bytes);
                }
                Err(_) => tracing::warn!(
                    "Invalid value for NIMBUS_MAX_FILE_SIZE: '{}'. Expected a byte count. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("NIMBUS_MAX_VERSIONS") {
            match val.parse::<usize>() {
                Ok(max) => {
                    tracing::info!("Environment override: NIMBUS_MAX_VERSIONS={}", max);
                    self.spec.versions.max_versions = max;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for NIMBUS_MAX_VERSIONS: '{}'. Expected a number. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("NIMBUS_LOG_LEVEL") {
            self.spec.logging.level = val;
        }
    }

    /// Structural validation. Per-adapter options are checked by the storage
    /// adapter factory when the registry is built.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let storage = &self.spec.storage;
        if storage.adapters.is_empty() {
            anyhow::bail!("spec.storage.adapters must declare at least one adapter");
        }
        if !storage.adapters.contains_key(&storage.default_adapter) {
            anyhow::bail!(
                "Default adapter '{}' not found in spec.storage.adapters",
                storage.default_adapter
            );
        }

        if self.spec.versions.max_versions == 0 {
            anyhow::bail!("spec.versions.max_versions must be at least 1");
        }

        let locks = &self.spec.locks;
        if locks.default_ttl_seconds == 0 || locks.default_ttl_seconds > locks.max_ttl_seconds {
            anyhow::bail!(
                "spec.locks.default_ttl_seconds must be between 1 and max_ttl_seconds ({})",
                locks.max_ttl_seconds
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = FilesystemConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert_eq!(manifest.spec.versions.max_versions, 16);
        assert_eq!(manifest.spec.locks.default_ttl_seconds, 1800);
        assert!(manifest.spec.storage.adapters.contains_key("local"));
        manifest.validate().unwrap();
    }

    #[test]
    fn test_parse_manifest_with_smb_adapter() {
        let yaml = r#"
apiVersion: nimbus/v1
kind: FilesystemConfig
metadata:
  name: office
spec:
  storage:
    default_adapter: share
    adapters:
      share:
        adapter: smb
        host: fileserver.local
        share: data
        username: svc
        password: secret
        workgroup: OFFICE
  quota:
    default_hard_limit_bytes: 1073741824
  trash:
    retention_days: 30
"#;
        let manifest = FilesystemConfigManifest::from_yaml_str(yaml).unwrap();
        manifest.validate().unwrap();

        let share = &manifest.spec.storage.adapters["share"];
        assert_eq!(share.adapter, AdapterKind::Smb);
        assert_eq!(share.workgroup.as_deref(), Some("OFFICE"));
        assert_eq!(manifest.spec.quota.default_hard_limit_bytes, Some(1 << 30));
        assert_eq!(manifest.spec.trash.retention_days, Some(30));
        assert_eq!(manifest.spec.versions.max_versions, 16);
    }

    #[test]
    fn test_unknown_default_adapter_is_rejected() {
        let mut manifest = FilesystemConfigManifest::default();
        manifest.spec.storage.default_adapter = "missing".into();
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nimbus-config.yaml");
        let mut manifest = FilesystemConfigManifest::default();
        manifest.spec.quota.max_file_size_bytes = Some(4096);
        manifest.to_yaml_file(&path).unwrap();

        let loaded = FilesystemConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.spec.storage.default_adapter, "local");
        assert_eq!(loaded.metadata.name, "default-filesystem");
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let result = FilesystemConfigManifest::load_or_default(Some(PathBuf::from(
            "/nonexistent/nimbus-config.yaml",
        )));
        assert!(result.is_err());
    }
}
