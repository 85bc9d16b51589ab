// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! SMB Storage Adapter
//!
//! Stores payloads on an SMB/CIFS share by driving the Samba `smbclient`
//! binary. Payloads are staged in local temporary files and transferred
//! with `put`/`get`; deletes use `del`.
//!
//! Credentials never appear on the command line: the user name is passed as
//! an argument and the password through the `PASSWD` environment variable of
//! the child process. Anonymous shares use `-N`.
//!
//! `smbclient` reports most failures as `NT_STATUS_*` codes on its output
//! while still exiting successfully, so the output is inspected as well as
//! the exit status.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::validate_key;
use crate::domain::storage::{ContentStream, StorageAdapter, StorageError, StoragePointer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmbAuth {
    Anonymous,
    Basic {
        username: String,
        password: String,
        workgroup: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbConfig {
    pub host: String,
    pub share: String,
    /// Directory inside the share, empty for the share root
    pub root: String,
    pub auth: SmbAuth,
    pub binary: PathBuf,
}

impl SmbConfig {
    pub fn service(&self) -> String {
        format!("//{}/{}", self.host, self.share)
    }
}

pub struct SmbStorageAdapter {
    name: String,
    config: SmbConfig,
}

impl SmbStorageAdapter {
    pub fn new(name: impl Into<String>, config: SmbConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn config(&self) -> &SmbConfig {
        &self.config
    }

    fn remote_path(&self, key: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        let root = self.config.root.trim_matches(|c| c == '/' || c == '\\');
        if root.is_empty() {
            Ok(key.to_string())
        } else {
            Ok(format!("{}/{}", root, key))
        }
    }

    fn check_pointer(&self, pointer: &StoragePointer) -> Result<String, StorageError> {
        if pointer.adapter != self.name {
            return Err(StorageError::InvalidKey(format!(
                "pointer {} does not belong to adapter '{}'",
                pointer, self.name
            )));
        }
        self.remote_path(&pointer.key)
    }

    /// Build an `smbclient` invocation running `script` against the share.
    pub(crate) fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg(self.config.service());
        match &self.config.auth {
            SmbAuth::Anonymous => {
                cmd.arg("-N");
            }
            SmbAuth::Basic {
                username,
                password,
                workgroup,
            } => {
                cmd.arg("--user").arg(username);
                cmd.arg("-W").arg(workgroup);
                cmd.env("PASSWD", password);
            }
        }
        cmd.arg("-c").arg(script);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, script: &str, key: &str) -> Result<(), StorageError> {
        let output = self.command(script).output().await.map_err(|e| {
            StorageError::Unavailable(format!(
                "Failed to run {}: {}",
                self.config.binary.display(),
                e
            ))
        })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if let Some(err) = classify_output(&text, key) {
            return Err(err);
        }
        if !output.status.success() {
            return Err(StorageError::Unavailable(format!(
                "smbclient exited with {} on {}: {}",
                output.status,
                self.config.service(),
                text.trim()
            )));
        }
        Ok(())
    }

    fn staging_file() -> Result<tempfile::TempPath, StorageError> {
        let file = tempfile::Builder::new()
            .prefix("nimbus-smb-")
            .tempfile()
            .map_err(StorageError::from)?;
        Ok(file.into_temp_path())
    }
}

/// Map `NT_STATUS_*` codes found in `smbclient` output to storage errors.
fn classify_output(output: &str, key: &str) -> Option<StorageError> {
    let status = output
        .split_whitespace()
        .find(|token| token.starts_with("NT_STATUS_"))?;

    let err = match status {
        "NT_STATUS_OBJECT_NAME_NOT_FOUND"
        | "NT_STATUS_OBJECT_PATH_NOT_FOUND"
        | "NT_STATUS_NO_SUCH_FILE" => StorageError::NotFound(key.to_string()),
        "NT_STATUS_ACCESS_DENIED" | "NT_STATUS_LOGON_FAILURE" | "NT_STATUS_ACCOUNT_DISABLED" => {
            StorageError::PermissionDenied(status.to_string())
        }
        "NT_STATUS_BAD_NETWORK_NAME"
        | "NT_STATUS_HOST_UNREACHABLE"
        | "NT_STATUS_CONNECTION_REFUSED"
        | "NT_STATUS_IO_TIMEOUT" => StorageError::Unavailable(status.to_string()),
        "NT_STATUS_DISK_FULL" => StorageError::WriteFailed {
            key: key.to_string(),
            reason: status.to_string(),
        },
        other => StorageError::Unknown(other.to_string()),
    };
    Some(err)
}

fn quoted(path: &Path) -> String {
    format!("\"{}\"", path.display())
}

#[async_trait]
impl StorageAdapter for SmbStorageAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, key: &str, mut content: ContentStream) -> Result<StoragePointer, StorageError> {
        let remote = self.remote_path(key)?;
        let staged = Self::staging_file()?;

        let mut file = tokio::fs::File::create(&staged).await?;
        while let Some(chunk) = content.body.next().await {
            let chunk = chunk.map_err(|e| StorageError::WriteFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        let script = format!("put {} \"{}\"", quoted(&staged), remote);
        self.run(&script, key).await.map_err(|e| match e {
            StorageError::WriteFailed { .. } => e,
            other => StorageError::WriteFailed {
                key: key.to_string(),
                reason: other.to_string(),
            },
        })?;

        debug!(adapter = %self.name, key = %key, share = %self.config.service(), "Stored payload on share");
        Ok(StoragePointer::new(&self.name, key))
    }

    async fn read(&self, pointer: &StoragePointer) -> Result<ContentStream, StorageError> {
        let remote = self.check_pointer(pointer)?;
        let staged = Self::staging_file()?;

        let script = format!("get \"{}\" {}", remote, quoted(&staged));
        self.run(&script, &pointer.key).await?;

        let file = tokio::fs::File::open(&staged).await?;
        let size = file.metadata().await?.len();
        // The staged copy lives until the stream is dropped
        let body = ReaderStream::new(file)
            .map(move |chunk| {
                let _staged = &staged;
                chunk
            })
            .boxed();
        Ok(ContentStream::new(size, body))
    }

    async fn delete(&self, pointer: &StoragePointer) -> Result<(), StorageError> {
        let remote = self.check_pointer(pointer)?;
        match self.run(&format!("del \"{}\"", remote), &pointer.key).await {
            Ok(()) => Ok(()),
            Err(StorageError::NotFound(_)) => {
                debug!(key = %pointer.key, "Payload already absent from share");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let root = self.config.root.trim_matches(|c| c == '/' || c == '\\');
        let script = if root.is_empty() {
            "ls".to_string()
        } else {
            format!("cd \"{}\"; ls", root)
        };
        self.run(&script, "").await.map_err(|e| {
            warn!(share = %self.config.service(), "SMB health check failed: {}", e);
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn config(auth: SmbAuth) -> SmbConfig {
        SmbConfig {
            host: "files.example".into(),
            share: "data".into(),
            root: "/nimbus/".into(),
            auth,
            binary: PathBuf::from("smbclient"),
        }
    }

    #[test]
    fn test_anonymous_invocation() {
        let adapter = SmbStorageAdapter::new("share", config(SmbAuth::Anonymous));
        let cmd = adapter.command("ls");
        let args: Vec<&OsStr> = cmd.as_std().get_args().collect();
        assert_eq!(args, vec!["//files.example/data", "-N", "-c", "ls"]);
        assert!(cmd.as_std().get_envs().all(|(k, _)| k != "PASSWD"));
    }

    #[test]
    fn test_password_goes_through_environment() {
        let adapter = SmbStorageAdapter::new(
            "share",
            config(SmbAuth::Basic {
                username: "svc".into(),
                password: "s3cret".into(),
                workgroup: "OFFICE".into(),
            }),
        );
        let cmd = adapter.command("ls");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"svc".to_string()));
        assert!(args.contains(&"OFFICE".to_string()));
        assert!(!args.iter().any(|a| a.contains("s3cret")));

        let passwd = cmd
            .as_std()
            .get_envs()
            .find(|(k, _)| *k == "PASSWD")
            .and_then(|(_, v)| v);
        assert_eq!(passwd, Some(OsStr::new("s3cret")));
    }

    #[test]
    fn test_remote_path_includes_root() {
        let adapter = SmbStorageAdapter::new("share", config(SmbAuth::Anonymous));
        assert_eq!(adapter.remote_path("abc").unwrap(), "nimbus/abc");
        assert!(adapter.remote_path("a\"b").is_err());
    }

    #[test]
    fn test_classify_output() {
        assert!(classify_output("getting file ... done", "k").is_none());
        assert!(matches!(
            classify_output("NT_STATUS_OBJECT_NAME_NOT_FOUND opening remote file \\k", "k"),
            Some(StorageError::NotFound(ref key)) if key == "k"
        ));
        assert!(matches!(
            classify_output("session setup failed: NT_STATUS_LOGON_FAILURE", "k"),
            Some(StorageError::PermissionDenied(_))
        ));
        assert!(matches!(
            classify_output("tree connect failed: NT_STATUS_BAD_NETWORK_NAME", "k"),
            Some(StorageError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let mut cfg = config(SmbAuth::Anonymous);
        cfg.binary = PathBuf::from("/nonexistent/smbclient");
        let adapter = SmbStorageAdapter::new("share", cfg);
        assert!(matches!(
            adapter.delete(&StoragePointer::new("share", "abc")).await,
            Err(StorageError::Unavailable(_))
        ));
    }
}
