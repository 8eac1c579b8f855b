// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! S3 implementation of [`ObjectBucket`].
//!
//! Credentials and region come from the standard AWS environment
//! (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_REGION`, profiles).

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::info;

use super::object::ObjectBucket;
use crate::error::{Result, StoreError};

/// Bucket location.
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub bucket: String,
    /// Custom endpoint, for local S3-compatible servers. Forces path-style
    /// addressing.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct S3Bucket {
    client: Client,
    bucket: String,
}

fn backend_err<E: std::error::Error>(op: &str, err: E) -> StoreError {
    StoreError::Backend(format!("s3 {op}: {}", DisplayErrorContext(err)))
}

impl S3Bucket {
    /// Builds a client from the ambient AWS configuration.
    pub async fn connect(config: S3Config) -> Self {
        let shared = aws_config::load_from_env().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        info!(bucket = %config.bucket, endpoint = ?config.endpoint, "Using S3 profile store");
        Self { client: Client::from_conf(builder.build()), bucket: config.bucket }
    }
}

#[async_trait]
impl ObjectBucket for S3Bucket {
    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| backend_err("put_object", e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let output = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Ok(None);
            },
            Err(err) => return Err(backend_err("get_object", err)),
        };
        let body = output.body.collect().await.map_err(|e| backend_err("read body", e))?;
        Ok(Some(body.into_bytes()))
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages =
            self.client.list_objects_v2().bucket(&self.bucket).into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| backend_err("list_objects_v2", e))?;
            keys.extend(page.contents().iter().filter_map(|obj| obj.key().map(str::to_string)));
        }
        Ok(keys)
    }
}
