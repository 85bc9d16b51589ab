// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Blob Store Adapter (SeaweedFS filer)
//!
//! Stores payloads as files in a SeaweedFS filer directory over its HTTP API.
//! The filer chunks large uploads across volume servers, so payloads of any
//! size stream through without being buffered here.
//!
//! # API Endpoints
//!
//! - `POST {root}/{key}` - multipart upload
//! - `GET {root}/{key}` - download
//! - `DELETE {root}/{key}` - remove
//! - `GET /` - health check

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use tracing::debug;

use super::validate_key;
use crate::domain::storage::{ContentStream, StorageAdapter, StorageError, StoragePointer};

pub const DEFAULT_ROOT: &str = "/nimbus/blobs";

pub struct BlobStoreAdapter {
    name: String,
    client: Client,
    /// Filer base URL (e.g. "http://localhost:8888")
    filer_url: String,
    /// Directory inside the filer, always with a leading and no trailing slash
    root: String,
}

impl BlobStoreAdapter {
    pub fn new(
        name: impl Into<String>,
        filer_url: impl Into<String>,
        root: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        let root = root.into();
        let root = format!("/{}", root.trim_matches('/'));

        Ok(Self {
            name: name.into(),
            client,
            filer_url: filer_url.into().trim_end_matches('/').to_string(),
            root,
        })
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.filer_url, path)
    }

    fn object_url(&self, key: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        let path = if self.root == "/" {
            format!("/{}", key)
        } else {
            format!("{}/{}", self.root, key)
        };
        Ok(self.build_url(&path))
    }

    fn check_pointer(&self, pointer: &StoragePointer) -> Result<String, StorageError> {
        if pointer.adapter != self.name {
            return Err(StorageError::InvalidKey(format!(
                "pointer {} does not belong to adapter '{}'",
                pointer, self.name
            )));
        }
        self.object_url(&pointer.key)
    }
}

#[async_trait]
impl StorageAdapter for BlobStoreAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, key: &str, content: ContentStream) -> Result<StoragePointer, StorageError> {
        let url = self.object_url(key)?;

        let part = Part::stream_with_length(Body::wrap_stream(content.body), content.size)
            .file_name(key.to_string());
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::WriteFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                debug!(adapter = %self.name, key = %key, "Uploaded payload to filer");
                Ok(StoragePointer::new(&self.name, key))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StorageError::WriteFailed {
                    key: key.to_string(),
                    reason: format!("filer returned {}: {}", status, body),
                })
            }
        }
    }

    async fn read(&self, pointer: &StoragePointer) -> Result<ContentStream, StorageError> {
        let url = self.check_pointer(pointer)?;
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let size = response.content_length().unwrap_or(0);
                let body = response
                    .bytes_stream()
                    .map_err(std::io::Error::other)
                    .boxed();
                Ok(ContentStream::new(size, body))
            }
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(pointer.key.clone())),
            status => Err(StorageError::Unknown(format!(
                "Filer returned status {} for {}",
                status, pointer
            ))),
        }
    }

    async fn delete(&self, pointer: &StoragePointer) -> Result<(), StorageError> {
        let url = self.check_pointer(pointer)?;
        let response = self.client.delete(&url).send().await?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(key = %pointer.key, "Payload already absent from filer");
                Ok(())
            }
            status => Err(StorageError::Unknown(format!(
                "Filer returned status {} deleting {}",
                status, pointer
            ))),
        }
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let url = self.build_url("/");

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(StorageError::Unavailable(format!(
                "Filer returned status {}",
                response.status()
            )))
        }
    }
}
