use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

// dotted vstorage path; only data reads, no child listings
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoragePath(String);

impl StoragePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn query_path(&self) -> String {
        format!("/custom/vstorage/data/{}", self.0)
    }
}

impl std::fmt::Display for StoragePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// height of the block that last wrote the path, plus every value
// written at that height, oldest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageCell {
    #[serde(with = "block_height_serde")]
    pub block_height: u64,
    pub values: Vec<String>,
}

impl StorageCell {
    pub fn latest(&self) -> Option<&str> {
        self.values.last().map(String::as_str)
    }
}

// vstorage writes block heights as decimal strings.
mod block_height_serde {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(height: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&height.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rpc transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc node rejected query for '{path}': {log}")]
    Rejected { path: String, log: String },
    #[error("malformed storage payload at '{path}': {reason}")]
    Malformed { path: String, reason: String },
    #[error("network config at {url} is unusable: {reason}")]
    BadNetworkConfig { url: String, reason: String },
}

#[async_trait]
pub trait ChainStorageFetcher: Send + Sync {
    async fn fetch_data(&self, path: &StoragePath) -> Result<Option<StorageCell>, FetchError>;
}

#[derive(Debug)]
pub struct RpcStorageFetcher {
    http: reqwest::Client,
    rpc_url: String,
    chain_id: String,
    request_id: AtomicU64,
}

impl RpcStorageFetcher {
    pub fn new(rpc_url: impl Into<String>, chain_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_url: rpc_url.into(),
            chain_id: chain_id.into(),
            request_id: AtomicU64::new(1),
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }
}

#[async_trait]
impl ChainStorageFetcher for RpcStorageFetcher {
    async fn fetch_data(&self, path: &StoragePath) -> Result<Option<StorageCell>, FetchError> {
        let request = AbciQueryRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method: "abci_query",
            params: AbciQueryParams {
                path: path.query_path(),
            },
        };
        trace!(%path, "abci_query");

        let response: AbciQueryResponse = self
            .http
            .post(self.rpc_url.as_str())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let inner = response.result.response;
        if inner.code != 0 {
            return Err(FetchError::Rejected {
                path: path.as_str().to_string(),
                log: inner.log,
            });
        }
        let value_b64 = match inner.value {
            Some(value) if !value.is_empty() => value,
            _ => return Ok(None),
        };
        decode_cell(path, &value_b64).map(Some)
    }
}

// modern writes carry a stream cell; bare legacy values become a
// single-value cell at height zero
fn decode_cell(path: &StoragePath, value_b64: &str) -> Result<StorageCell, FetchError> {
    let malformed = |reason: String| FetchError::Malformed {
        path: path.as_str().to_string(),
        reason,
    };

    let raw = STANDARD
        .decode(value_b64)
        .map_err(|err| malformed(format!("bad base64: {err}")))?;
    let envelope: DataEnvelope =
        serde_json::from_slice(&raw).map_err(|err| malformed(format!("bad envelope: {err}")))?;

    match serde_json::from_str::<StorageCell>(&envelope.value) {
        Ok(cell) => Ok(cell),
        Err(_) => Ok(StorageCell {
            block_height: 0,
            values: vec![envelope.value],
        }),
    }
}

#[derive(Debug, Serialize)]
struct AbciQueryRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: AbciQueryParams,
}

#[derive(Debug, Serialize)]
struct AbciQueryParams {
    path: String,
}

#[derive(Debug, Deserialize)]
struct AbciQueryResponse {
    result: AbciQueryResult,
}

#[derive(Debug, Deserialize)]
struct AbciQueryResult {
    response: AbciResponseInner,
}

#[derive(Debug, Deserialize)]
struct AbciResponseInner {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    log: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope {
    value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub chain_name: String,
    pub rpc_addrs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_addrs: Option<Vec<String>>,
}

// the chain-suggestion step; wallet construction waits on it
pub async fn fetch_network_config(
    http: &reqwest::Client,
    url: &str,
) -> Result<NetworkConfig, FetchError> {
    let parsed = url::Url::parse(url).map_err(|err| FetchError::BadNetworkConfig {
        url: url.to_string(),
        reason: err.to_string(),
    })?;

    let config: NetworkConfig = http
        .get(parsed)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    if config.rpc_addrs.is_empty() {
        return Err(FetchError::BadNetworkConfig {
            url: url.to_string(),
            reason: "no rpc addresses listed".to_string(),
        });
    }
    Ok(config)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
