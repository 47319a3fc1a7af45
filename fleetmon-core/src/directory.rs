//! Rental provider directory client
//!
//! Fetches the set of active rented instances from the provider's HTTP API
//! and extracts [`InstanceDescriptor`]s from the JSON response. Extraction is
//! tolerant per entry: fields that are optional or renamed across API
//! versions default rather than aborting the whole fetch, and only a missing
//! top-level `instances` collection is a malformed response.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::models::InstanceDescriptor;

/// Maximum bytes of a raw API body carried into diagnostics
const DIAGNOSTIC_BODY_CAP: usize = 200;

/// Errors that can occur querying the directory; all of them are cycle-fatal
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The API key was rejected
    #[error("directory rejected the API key (HTTP {status})")]
    Unauthorized {
        /// The HTTP status returned
        status: u16,
    },
    /// The endpoint could not be reached
    #[error("directory unreachable: {0}")]
    Unreachable(String),
    /// The response body was not the expected shape
    #[error("malformed directory response: {reason} (body: {body})")]
    MalformedResponse {
        /// What was wrong
        reason: String,
        /// Truncated raw body for the diagnostic trail
        body: String,
    },
}

/// Configuration for the directory client; an explicit value, never ambient
/// process state
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Provider endpoint returning the `instances` collection
    pub endpoint: String,
    /// Bearer API key
    pub api_key: SecretString,
    /// Whole-request timeout
    pub request_timeout: Duration,
}

/// Client for the provider's instance directory
#[derive(Debug)]
pub struct InstanceDirectory {
    client: reqwest::Client,
    config: DirectoryConfig,
}

/// One directory entry as the wire may spell it; current and historical
/// field names are accepted via aliases
#[derive(Debug, Deserialize)]
struct RawInstance {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    gpu_name: Option<String>,
    #[serde(default, alias = "dph_total", deserialize_with = "lenient_f64")]
    price_per_hour: Option<f64>,
    #[serde(default, alias = "ssh_host")]
    host: Option<String>,
    #[serde(default, alias = "ssh_port")]
    port: Option<u16>,
}

/// Accepts a price as a JSON number or a numeric string; anything else is
/// "unknown" rather than an entry-fatal error
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

impl InstanceDirectory {
    /// Creates a directory client.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Unreachable`] if the HTTP client cannot be
    /// constructed (TLS backend initialization).
    pub fn new(config: DirectoryConfig) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DirectoryError::Unreachable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Fetches the current set of active instance descriptors.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::Unauthorized`] on HTTP 401/403
    /// - [`DirectoryError::Unreachable`] on transport errors or non-2xx
    /// - [`DirectoryError::MalformedResponse`] when the body is not the
    ///   expected shape
    pub async fn fetch(&self) -> Result<Vec<InstanceDescriptor>, DirectoryError> {
        let response = self
            .client
            .get(&self.config.endpoint)
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| DirectoryError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(DirectoryError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(DirectoryError::Unreachable(format!(
                "directory returned HTTP {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DirectoryError::Unreachable(e.to_string()))?;

        parse_instances(&body)
    }
}

/// Extracts instance descriptors from a raw directory response body.
///
/// The top-level `instances` key must be present; its absence is
/// [`DirectoryError::MalformedResponse`], not a crash. Entries missing a
/// required field (id, host, port) are skipped with a warning; optional
/// fields default (`gpu_name` to `"unknown"`, price to unknown).
///
/// # Errors
///
/// Returns [`DirectoryError::MalformedResponse`] when the body is not JSON
/// or lacks the `instances` collection.
pub fn parse_instances(body: &str) -> Result<Vec<InstanceDescriptor>, DirectoryError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| DirectoryError::MalformedResponse {
            reason: format!("not valid JSON: {e}"),
            body: truncate_for_log(body),
        })?;

    let entries = value
        .get("instances")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| DirectoryError::MalformedResponse {
            reason: "missing `instances` collection".to_string(),
            body: truncate_for_log(body),
        })?;

    let mut descriptors = Vec::with_capacity(entries.len());
    for entry in entries {
        let raw: RawInstance = match serde_json::from_value(entry.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, entry = %truncate_for_log(&entry.to_string()),
                    "Skipping undecodable directory entry");
                continue;
            }
        };

        let (Some(id), Some(host), Some(port)) = (raw.id, raw.host, raw.port) else {
            tracing::warn!(entry = %truncate_for_log(&entry.to_string()),
                "Skipping directory entry missing id/host/port");
            continue;
        };

        descriptors.push(InstanceDescriptor {
            id,
            gpu_name: raw.gpu_name.unwrap_or_else(|| "unknown".to_string()),
            price_per_hour: raw.price_per_hour,
            host,
            port,
        });
    }

    Ok(descriptors)
}

fn truncate_for_log(body: &str) -> String {
    if body.len() <= DIAGNOSTIC_BODY_CAP {
        body.to_string()
    } else {
        let mut end = DIAGNOSTIC_BODY_CAP;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
