//! Pinecone-backed [`VectorStore`] over the REST API.
//!
//! Opening the store describes the index on the control plane, creating
//! it (serverless, configured cloud/region/metric) when it does not exist
//! and checking its dimension when it does. Data-plane calls go to the
//! index host returned by the control plane.
//!
//! Needs `PINECONE_API_KEY`; the region comes from `store.pinecone.region`
//! or `PINECONE_ENV`.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};

use vecsync_core::models::ChunkMetadata;
use vecsync_core::store::{check_dims, DimensionMismatch, VectorMatch, VectorStore};

use crate::config::PineconeConfig;
use crate::error::IngestError;

const API_VERSION: &str = "2024-07";
const MAX_RETRIES: u32 = 4;
/// How long to wait for a freshly created index to become ready.
const READY_POLLS: u32 = 60;

pub struct PineconeStore {
    client: reqwest::Client,
    host: String,
    dims: usize,
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * (1 << attempt.min(5)))
}

/// Send with retry on 429/5xx and connection errors. 404 is returned as
/// `Ok(None)` so callers can treat it as "absent".
async fn send_json<F>(label: &str, build: F) -> Result<Option<Value>>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0u32;
    loop {
        match build().send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    let text = resp.text().await?;
                    if text.trim().is_empty() {
                        return Ok(Some(Value::Null));
                    }
                    return Ok(Some(serde_json::from_str(&text).with_context(|| {
                        format!("Invalid Pinecone {label} response")
                    })?));
                }
                if status == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                let body = resp
                    .text()
                    .await
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                if should_retry(status) && attempt < MAX_RETRIES {
                    attempt += 1;
                    tokio::time::sleep(retry_backoff(attempt)).await;
                    continue;
                }
                bail!("Pinecone {} failed ({}): {}", label, status, body);
            }
            Err(err) => {
                if (err.is_connect() || err.is_timeout()) && attempt < MAX_RETRIES {
                    attempt += 1;
                    tokio::time::sleep(retry_backoff(attempt)).await;
                    continue;
                }
                return Err(anyhow!(err).context(format!("Pinecone {label} request failed")));
            }
        }
    }
}

impl PineconeStore {
    /// Connect using `PINECONE_API_KEY` and, for index creation, the
    /// configured region or `PINECONE_ENV`.
    pub async fn open(config: &PineconeConfig, index_name: &str, dims: usize) -> Result<Self> {
        let api_key = std::env::var("PINECONE_API_KEY").ok();
        let region = config
            .region
            .clone()
            .or_else(|| std::env::var("PINECONE_ENV").ok());
        Self::connect(config, api_key, region, index_name, dims).await
    }

    pub async fn connect(
        config: &PineconeConfig,
        api_key: Option<String>,
        region: Option<String>,
        index_name: &str,
        dims: usize,
    ) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                IngestError::Configuration("PINECONE_API_KEY environment variable not set".into())
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|_| IngestError::Configuration("invalid Pinecone API key".into()))?,
        );
        headers.insert("X-Pinecone-API-Version", HeaderValue::from_static(API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .context("failed to build Pinecone HTTP client")?;

        let control = config.control_url.trim_end_matches('/').to_string();
        let describe_url = format!("{control}/indexes/{index_name}");

        let mut description = send_json("describe_index", || client.get(&describe_url)).await?;
        if description.is_none() {
            let region = region.ok_or_else(|| {
                IngestError::Configuration(
                    "Pinecone region not set (store.pinecone.region or PINECONE_ENV)".into(),
                )
            })?;
            tracing::info!(
                "[store] creating Pinecone index {} ({} dims, {}/{})",
                index_name,
                dims,
                config.cloud,
                region
            );
            let body = json!({
                "name": index_name,
                "dimension": dims,
                "metric": config.metric,
                "spec": { "serverless": { "cloud": config.cloud, "region": region } }
            });
            send_json("create_index", || {
                client.post(format!("{control}/indexes")).json(&body)
            })
            .await?;

            for _ in 0..READY_POLLS {
                let current = send_json("describe_index", || client.get(&describe_url)).await?;
                let ready = current
                    .as_ref()
                    .and_then(|d| d.pointer("/status/ready"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if ready {
                    description = current;
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        let description = description
            .ok_or_else(|| anyhow!("Pinecone index {} did not become ready", index_name))?;
        let found = description
            .get("dimension")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow!("Pinecone index {} has no dimension", index_name))?
            as usize;
        if found != dims {
            return Err(DimensionMismatch {
                context: format!("Pinecone index {index_name}"),
                expected: dims,
                found,
            }
            .into());
        }
        let host = description
            .get("host")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Pinecone index {} has no host", index_name))?;

        Ok(Self {
            client,
            host: data_plane_url(host),
            dims,
        })
    }
}

fn data_plane_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Rebuild chunk metadata from a match. Pinecone returns numbers as floats.
fn parse_metadata(value: &Value) -> Option<ChunkMetadata> {
    Some(ChunkMetadata {
        file: value.get("file")?.as_str()?.to_string(),
        chunk_index: value.get("chunk_index")?.as_f64()? as usize,
        chunk_text: value
            .get("chunk_text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        hash: value
            .get("hash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn parse_matches(response: &Value) -> Result<Vec<VectorMatch>> {
    let matches = match response.get("matches") {
        Some(m) => m
            .as_array()
            .ok_or_else(|| anyhow!("Invalid Pinecone query response: matches is not an array"))?,
        None => return Ok(Vec::new()),
    };
    matches
        .iter()
        .map(|m| {
            Ok(VectorMatch {
                id: m
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("Invalid Pinecone match: missing id"))?
                    .to_string(),
                score: m.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                metadata: m.get("metadata").and_then(parse_metadata),
            })
        })
        .collect()
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn backend(&self) -> &'static str {
        "pinecone"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &ChunkMetadata) -> Result<()> {
        check_dims("pinecone upsert", self.dims, vector)?;
        let body = json!({
            "vectors": [{ "id": id, "values": vector, "metadata": metadata }]
        });
        let url = format!("{}/vectors/upsert", self.host);
        send_json("upsert", || self.client.post(&url).json(&body)).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let body = json!({ "ids": [id] });
        let url = format!("{}/vectors/delete", self.host);
        // a missing id is already deleted
        send_json("delete", || self.client.post(&url).json(&body)).await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        check_dims("pinecone query", self.dims, vector)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let body = json!({ "vector": vector, "topK": top_k, "includeMetadata": true });
        let url = format!("{}/query", self.host);
        match send_json("query", || self.client.post(&url).json(&body)).await? {
            Some(response) => parse_matches(&response),
            None => Ok(Vec::new()),
        }
    }

    async fn len(&self) -> Result<usize> {
        let url = format!("{}/describe_index_stats", self.host);
        let stats = send_json("describe_index_stats", || self.client.get(&url))
            .await?
            .unwrap_or(Value::Null);
        Ok(stats
            .get("totalVectorCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_api_key_is_error() {
        let err = PineconeStore::connect(
            &PineconeConfig::default(),
            None,
            Some("us-east-1".into()),
            "idx",
            3,
        )
        .await
        .err()
        .unwrap();
        assert!(err.to_string().contains("PINECONE_API_KEY"));
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::Configuration(_))
        ));

        let blank = PineconeStore::connect(
            &PineconeConfig::default(),
            Some("  ".into()),
            None,
            "idx",
            3,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(
            blank.downcast_ref::<IngestError>(),
            Some(IngestError::Configuration(_))
        ));
    }

    #[test]
    fn test_data_plane_url() {
        assert_eq!(
            data_plane_url("idx-abc.svc.pinecone.io"),
            "https://idx-abc.svc.pinecone.io"
        );
        assert_eq!(data_plane_url("http://localhost:5080/"), "http://localhost:5080");
    }

    #[test]
    fn test_parse_matches_with_float_metadata() {
        let response = json!({
            "matches": [
                {
                    "id": "/docs/a.txt_chunk1",
                    "score": 0.91,
                    "metadata": {
                        "file": "/docs/a.txt",
                        "chunk_index": 1.0,
                        "chunk_text": "hello",
                        "hash": "abc"
                    }
                },
                { "id": "/docs/b.txt_chunk0", "score": 0.5 }
            ]
        });
        let matches = parse_matches(&response).unwrap();
        assert_eq!(matches.len(), 2);
        let meta = matches[0].metadata.as_ref().unwrap();
        assert_eq!(meta.chunk_index, 1);
        assert_eq!(meta.file, "/docs/a.txt");
        assert!(matches[1].metadata.is_none());
    }

    #[test]
    fn test_parse_matches_empty() {
        assert!(parse_matches(&json!({})).unwrap().is_empty());
    }
}
