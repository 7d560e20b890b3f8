//! OpenStack Keystone v3 token store.
//!
//! One cached `(storageUrl, token)` pair per Swift identity. Acquisition is
//! lazy; concurrent fetches for the same identity coalesce behind a
//! per-entry async mutex, so at most one token request is in flight per
//! config at any time. The Swift client refreshes on 401 or expiry.

use crate::config::SwiftConfig;
use crate::S3Result;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use time::OffsetDateTime;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct KeystoneToken {
    pub storage_url: String,
    pub token: String,
    pub acquired_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
}

impl KeystoneToken {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            // refresh one minute early so in-flight requests don't race expiry
            Some(expires_at) => OffsetDateTime::now_utc() + time::Duration::seconds(60) >= expires_at,
            None => false,
        }
    }
}

type Entry = Arc<tokio::sync::Mutex<Option<KeystoneToken>>>;

pub struct KeystoneStore {
    client: reqwest::Client,
    entries: Mutex<HashMap<String, Entry>>,
}

impl KeystoneStore {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, fingerprint: &str) -> Entry {
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.entry(fingerprint.to_owned()).or_default().clone()
    }

    /// Returns a valid token for the identity, fetching one if the cache is
    /// cold or expired.
    pub async fn get_token(&self, cfg: &SwiftConfig) -> S3Result<KeystoneToken> {
        let entry = self.entry(&cfg.fingerprint());
        let mut slot = entry.lock().await;
        if let Some(token) = slot.as_ref()
            && !token.is_expired()
        {
            return Ok(token.clone());
        }
        let token = fetch_token(&self.client, cfg).await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Drops the cached token and acquires a fresh one. Called after a 401
    /// from Swift. Coalesces with concurrent refreshes for the same identity.
    pub async fn refresh_token(&self, cfg: &SwiftConfig, stale: &str) -> S3Result<KeystoneToken> {
        let entry = self.entry(&cfg.fingerprint());
        let mut slot = entry.lock().await;
        if let Some(token) = slot.as_ref()
            && token.token != stale
            && !token.is_expired()
        {
            // someone else already refreshed while we waited on the lock
            return Ok(token.clone());
        }
        *slot = None;
        let token = fetch_token(&self.client, cfg).await?;
        *slot = Some(token.clone());
        Ok(token)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
    #[serde(default)]
    expires_at: Option<String>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

#[derive(Deserialize)]
struct Endpoint {
    interface: String,
    region: String,
    url: String,
}

fn password_payload(cfg: &SwiftConfig) -> serde_json::Value {
    serde_json::json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": cfg.credentials.username,
                        "domain": { "name": cfg.credentials.user_domain_name },
                        "password": cfg.credentials.password,
                    }
                }
            },
            "scope": {
                "project": {
                    "name": cfg.credentials.project_name,
                    "domain": { "name": cfg.credentials.project_domain_name },
                }
            }
        }
    })
}

/// Extracts the public object-store endpoint for the configured region.
fn object_store_url(body: &TokenResponse, region: &str) -> Option<String> {
    body.token
        .catalog
        .iter()
        .find(|entry| entry.service_type == "object-store")?
        .endpoints
        .iter()
        .find(|ep| ep.interface == "public" && ep.region == region)
        .map(|ep| ep.url.trim_end_matches('/').to_owned())
}

async fn fetch_token(client: &reqwest::Client, cfg: &SwiftConfig) -> S3Result<KeystoneToken> {
    let url = format!("{}/auth/tokens", cfg.auth_url.trim_end_matches('/'));
    debug!(%url, user = %cfg.credentials.username, "acquiring keystone token");

    let resp = client
        .post(&url)
        .json(&password_payload(cfg))
        .send()
        .await
        .map_err(|e| s3_error!(e, InternalError, "keystone request failed").retryable())?;

    let status = resp.status();
    if status == http::StatusCode::MULTIPLE_CHOICES {
        return Err(s3_error!(
            InternalError,
            "keystone returned 300 Multiple Choices; point auth_url at a concrete identity version"
        ));
    }
    if !status.is_success() {
        let err = s3_error!(InternalError, "keystone authentication failed with {}", status);
        return Err(if status.is_server_error() { err.retryable() } else { err });
    }

    let token = resp
        .headers()
        .get(crate::header::X_SUBJECT_TOKEN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| s3_error!(InternalError, "keystone response is missing X-Subject-Token"))?;

    let body: TokenResponse = resp
        .json()
        .await
        .map_err(|e| s3_error!(e, InternalError, "invalid keystone response body"))?;

    let storage_url = object_store_url(&body, &cfg.region).ok_or_else(|| {
        s3_error!(
            InternalError,
            "keystone catalog has no public object-store endpoint for region {}",
            cfg.region
        )
    })?;

    let expires_at = body
        .token
        .expires_at
        .as_deref()
        .and_then(|s| OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339).ok());

    Ok(KeystoneToken {
        storage_url,
        token,
        acquired_at: OffsetDateTime::now_utc(),
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_endpoint_selection() {
        let raw = serde_json::json!({
            "token": {
                "expires_at": "2030-01-01T00:00:00Z",
                "catalog": [
                    { "type": "identity", "endpoints": [] },
                    { "type": "object-store", "endpoints": [
                        { "interface": "admin",  "region": "RegionOne", "url": "http://swift:8080/admin" },
                        { "interface": "public", "region": "RegionTwo", "url": "http://swift2:8080/v1/AUTH_x" },
                        { "interface": "public", "region": "RegionOne", "url": "http://swift:8080/v1/AUTH_x/" }
                    ]}
                ]
            }
        });
        let body: TokenResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(object_store_url(&body, "RegionOne").as_deref(), Some("http://swift:8080/v1/AUTH_x"));
        assert_eq!(object_store_url(&body, "RegionThree"), None);
    }

    #[test]
    fn token_expiry() {
        let fresh = KeystoneToken {
            storage_url: "http://swift/v1/AUTH_x".to_owned(),
            token: "t".to_owned(),
            acquired_at: OffsetDateTime::now_utc(),
            expires_at: Some(OffsetDateTime::now_utc() + time::Duration::hours(1)),
        };
        assert!(!fresh.is_expired());

        let stale = KeystoneToken {
            expires_at: Some(OffsetDateTime::now_utc() + time::Duration::seconds(30)),
            ..fresh.clone()
        };
        assert!(stale.is_expired());

        let unbounded = KeystoneToken {
            expires_at: None,
            ..fresh
        };
        assert!(!unbounded.is_expired());
    }

    #[test]
    fn password_payload_shape() {
        let cfg = SwiftConfig {
            auth_url: "http://ks:5000/v3".to_owned(),
            region: "RegionOne".to_owned(),
            container: "c".to_owned(),
            credentials: crate::config::SwiftCredentials {
                username: "u".to_owned(),
                password: "p".to_owned(),
                project_name: "pr".to_owned(),
                user_domain_name: "Default".to_owned(),
                project_domain_name: "Default".to_owned(),
            },
        };
        let payload = password_payload(&cfg);
        assert_eq!(payload["auth"]["identity"]["methods"][0], "password");
        assert_eq!(payload["auth"]["identity"]["password"]["user"]["name"], "u");
        assert_eq!(payload["auth"]["scope"]["project"]["domain"]["name"], "Default");
    }
}
