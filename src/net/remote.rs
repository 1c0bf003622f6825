//! Remote master-data source over authenticated HTTP.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::error::RemoteError;

/// One authenticated GET against a named endpoint, returning the raw JSON
/// payload. Failures are typed so the fetcher can decide between falling
/// back to cache and reporting the group as unavailable.
pub trait RemoteSource: Send + Sync {
  fn fetch_json(&self, path: &str) -> impl Future<Output = Result<Value, RemoteError>> + Send;
}

/// Bearer-token authenticated client for the field-operations API.
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base_url: Url,
  token: String,
}

impl HttpRemote {
  /// Build a client against `base_url`. Every request carries its own
  /// timeout so one unresponsive endpoint cannot stall a whole battery.
  pub fn new(base_url: &str, token: String, timeout: Duration) -> Result<Self> {
    // A trailing slash makes Url::join treat the last segment as a
    // directory instead of replacing it.
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };

    let base_url =
      Url::parse(&normalized).map_err(|e| eyre!("Invalid API base URL '{}': {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| RemoteError::Unreachable {
        path: path.to_string(),
        reason: e.to_string(),
      })
  }

  /// POST a JSON body. Used by the offline-mutation drain to replay
  /// queued writes.
  pub async fn post_json(&self, path: &str, body: &Value) -> Result<(), RemoteError> {
    let url = self.endpoint(path)?;

    let response = self
      .client
      .post(url)
      .bearer_auth(&self.token)
      .json(body)
      .send()
      .await
      .map_err(|e| RemoteError::Unreachable {
        path: path.to_string(),
        reason: e.to_string(),
      })?;

    if !response.status().is_success() {
      return Err(RemoteError::Status {
        path: path.to_string(),
        status: response.status().as_u16(),
      });
    }

    Ok(())
  }
}

impl RemoteSource for HttpRemote {
  async fn fetch_json(&self, path: &str) -> Result<Value, RemoteError> {
    let url = self.endpoint(path)?;

    let response = self
      .client
      .get(url)
      .bearer_auth(&self.token)
      .send()
      .await
      .map_err(|e| RemoteError::Unreachable {
        path: path.to_string(),
        reason: e.to_string(),
      })?;

    if !response.status().is_success() {
      return Err(RemoteError::Status {
        path: path.to_string(),
        status: response.status().as_u16(),
      });
    }

    response.json().await.map_err(|e| RemoteError::Malformed {
      path: path.to_string(),
      reason: e.to_string(),
    })
  }
}
