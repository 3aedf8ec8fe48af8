//! OVH API client for zone record operations
//!
//! Implements the deterministic request-signing scheme and the two-phase
//! credential bootstrap. Every signed call hashes
//! `secret+consumerKey+METHOD+url+body+timestamp` with SHA-1 and sends the
//! `$1$`-prefixed hex digest alongside the application key, consumer key and
//! timestamp headers. The server/local clock delta feeding the timestamp is
//! fetched once per client instance and reused for every signature it issues.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use urlencoding::encode;

use crate::config::{Credentials, ZoneConfig};
use crate::constants::{
    DEFAULT_TTL, DNS_RECORD_TYPE_A, DNS_RECORD_TYPE_AAAA, OVH_API_BASE, OVH_CREDENTIAL_PATH,
    OVH_TIME_PATH, OVH_USER_AGENT, OVH_ZONE_PATH, SIGNATURE_PREFIX,
};
use crate::error::{Error, Result};

//==============================================================================
// Types
//==============================================================================

/// Result of the credential bootstrap exchange
///
/// The consumer key is issued immediately but only becomes usable for signed
/// calls after a human validates it at `validation_url`. The caller is
/// responsible for persisting the key; the client never mutates its own
/// credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub consumer_key: String,
    pub validation_url: String,
}

/// Policy for handling several records matching the same subdomain
///
/// The remote side gives no ordering guarantee, so picking "the first" is a
/// guess. Refusing is the default; `UpdateFirst` restores the guess for
/// zones known to hold a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiRecordPolicy {
    /// Refuse to update when more than one record matches (default)
    Error,
    /// Update the first record returned
    UpdateFirst,
}

//==============================================================================
// Trait
//==============================================================================

/// Zone-management operations the update coordinator depends on
#[async_trait]
pub trait ZoneClient: Send + Sync {
    /// Harmless authenticated read to check that the credentials work
    async fn probe(&self) -> Result<()>;

    /// Requests a fresh consumer key plus its human validation URL
    async fn authenticate(&self) -> Result<BootstrapOutcome>;

    /// Creates or updates the record for the configured subdomain
    async fn update_host(&self, address: &str, create: bool) -> Result<()>;
}

//==============================================================================
// Signing
//==============================================================================

/// Computes the request signature for one call.
///
/// Deterministic: identical input tuples produce identical signatures. The
/// exact join order and `"+"` delimiter are part of the wire protocol.
pub fn sign_request(
    secret: &str,
    consumer_key: &str,
    method: &str,
    url: &str,
    body: &str,
    timestamp: i64,
) -> String {
    let input = format!(
        "{}+{}+{}+{}+{}+{}",
        secret,
        consumer_key,
        method.to_uppercase(),
        url,
        body,
        timestamp
    );
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(Sha1::digest(input.as_bytes())))
}

/// Chooses the record type for an address literal: `"A"` iff it contains
/// exactly 3 `.` separators, else `"AAAA"`.
pub fn field_type_for(address: &str) -> &'static str {
    if address.matches('.').count() == 3 {
        DNS_RECORD_TYPE_A
    } else {
        DNS_RECORD_TYPE_AAAA
    }
}

pub(crate) fn parse_bootstrap(value: &Value) -> Result<BootstrapOutcome> {
    let consumer_key = value
        .get("consumerKey")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::unexpected("credential response lacks consumerKey"))?;
    let validation_url = value
        .get("validationUrl")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::unexpected("credential response lacks validationUrl"))?;
    Ok(BootstrapOutcome {
        consumer_key: consumer_key.to_string(),
        validation_url: validation_url.to_string(),
    })
}

//==============================================================================
// Client
//==============================================================================

pub struct OvhClient {
    client: reqwest::Client,
    credentials: Credentials,
    zone: ZoneConfig,
    multi_record: MultiRecordPolicy,
    base: String,
    /// Server minus local clock, seconds; filled on the first signed call
    delta: OnceCell<i64>,
}

impl OvhClient {
    pub fn new(
        credentials: Credentials,
        zone: ZoneConfig,
        multi_record: MultiRecordPolicy,
        timeout: Duration,
    ) -> Result<Self> {
        Self::with_base(credentials, zone, multi_record, timeout, OVH_API_BASE)
    }

    /// Same as [`OvhClient::new`] with an explicit API base URL
    pub fn with_base(
        credentials: Credentials,
        zone: ZoneConfig,
        multi_record: MultiRecordPolicy,
        timeout: Duration,
        base: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(OVH_USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            credentials,
            zone,
            multi_record,
            base: base.trim_end_matches('/').to_string(),
            delta: OnceCell::new(),
        })
    }

    /// Server/local clock delta, fetched once per instance lifetime
    async fn server_delta(&self) -> Result<i64> {
        self.delta
            .get_or_try_init(|| async {
                let url = format!("{}{}", self.base, OVH_TIME_PATH);
                debug!("GET {}", url);
                let resp = self
                    .client
                    .get(&url)
                    .header("X-Ovh-Application", &self.credentials.application_key)
                    .send()
                    .await?;
                if resp.status() != StatusCode::OK {
                    return Err(Error::unexpected(format!(
                        "time endpoint answered {}",
                        resp.status()
                    )));
                }
                let text = resp.text().await?;
                let server: i64 = text.trim().parse().map_err(|_| {
                    Error::unexpected(format!("time endpoint body not an integer: {text:?}"))
                })?;
                let local = Utc::now().timestamp();
                debug!("Server time delta: {}s", server - local);
                Ok(server - local)
            })
            .await
            .map(|delta| *delta)
    }

    /// Issues one API call and applies the shared response policy.
    ///
    /// HTTP 200 parses to JSON (a parse failure is soft and yields `None`);
    /// 403 and 400 are fatal; any other status is soft and yields `None`.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
        authenticated: bool,
    ) -> Result<Option<Value>> {
        let mut url = format!("{}{}", self.base, path);
        if !query.is_empty() {
            let qs: Vec<String> = query
                .iter()
                .map(|(k, v)| format!("{}={}", k, encode(v)))
                .collect();
            url = format!("{}?{}", url, qs.join("&"));
        }

        // This exact string is both the wire body and a signature input.
        let body_str = body.map(Value::to_string).unwrap_or_default();

        debug!("{} {}", method, url);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("X-Ovh-Application", &self.credentials.application_key);

        if authenticated {
            let consumer_key = self
                .credentials
                .consumer_key
                .as_deref()
                .ok_or(Error::MissingField("credentials.consumer_key"))?;
            let timestamp = Utc::now().timestamp() + self.server_delta().await?;
            let signature = sign_request(
                &self.credentials.application_secret,
                consumer_key,
                method.as_str(),
                &url,
                &body_str,
                timestamp,
            );
            request = request
                .header("X-Ovh-Consumer", consumer_key.as_str())
                .header("X-Ovh-Timestamp", timestamp.to_string())
                .header("X-Ovh-Signature", signature);
        }

        if body.is_some() {
            request = request
                .header("Content-Type", "application/json")
                .body(body_str);
        }

        let resp = request.send().await?;
        let status = resp.status();
        match status {
            StatusCode::OK => {
                let text = resp.text().await?;
                match serde_json::from_str(&text) {
                    Ok(value) => Ok(Some(value)),
                    Err(e) => {
                        warn!("Unparseable 200 response from {}: {}", url, e);
                        Ok(None)
                    }
                }
            }
            StatusCode::FORBIDDEN => Err(Error::Unauthorized),
            StatusCode::BAD_REQUEST => {
                let text = resp.text().await.unwrap_or_default();
                Err(Error::BadRequest(text))
            }
            other => {
                warn!("'{}' answered with status {}", url, other);
                Ok(None)
            }
        }
    }

    async fn create_record(
        &self,
        domain: &str,
        subdomain: &str,
        address: &str,
        ttl: u64,
    ) -> Result<()> {
        let payload = json!({
            "fieldType": field_type_for(address),
            "subDomain": subdomain,
            "target": address,
            "ttl": ttl,
        });
        let path = format!("/domain/zone/{}/record", domain);
        let created = self
            .call(Method::POST, &path, Some(&payload), &[], true)
            .await?;
        match created {
            Some(record) => {
                debug!("Created record: {}", record);
                Ok(())
            }
            None => Err(Error::unexpected("record create returned no record")),
        }
    }

    async fn update_record(
        &self,
        domain: &str,
        subdomain: &str,
        id: i64,
        address: &str,
        ttl: u64,
    ) -> Result<()> {
        let payload = json!({
            "subDomain": subdomain,
            "target": address,
            "ttl": ttl,
        });
        let path = format!("/domain/zone/{}/record/{}", domain, id);
        // A successful PUT answers 200 with a null body; nothing to check.
        self.call(Method::PUT, &path, Some(&payload), &[], true)
            .await?;
        Ok(())
    }

    /// Asks the zone to republish after a record edit. The edit itself has
    /// already succeeded, so a refresh failure is only logged.
    async fn refresh_zone(&self, domain: &str) {
        let path = format!("/domain/zone/{}/refresh", domain);
        if let Err(e) = self
            .call(Method::POST, &path, Some(&json!({})), &[], true)
            .await
        {
            warn!("Zone refresh for {} failed: {}", domain, e);
        }
    }
}

#[async_trait]
impl ZoneClient for OvhClient {
    async fn probe(&self) -> Result<()> {
        self.call(Method::GET, OVH_ZONE_PATH, None, &[], true).await?;
        Ok(())
    }

    async fn authenticate(&self) -> Result<BootstrapOutcome> {
        let payload = json!({
            "accessRules": [
                { "method": "GET",  "path": "/domain/*" },
                { "method": "POST", "path": "/domain/zone/*" },
                { "method": "PUT",  "path": "/domain/zone/*" },
            ],
        });
        let resp = self
            .call(Method::POST, OVH_CREDENTIAL_PATH, Some(&payload), &[], false)
            .await?
            .ok_or_else(|| Error::unexpected("credential request returned no body"))?;
        parse_bootstrap(&resp)
    }

    async fn update_host(&self, address: &str, create: bool) -> Result<()> {
        let domain = self
            .zone
            .domain
            .as_deref()
            .ok_or(Error::MissingField("zone.domain"))?;
        let subdomain = self
            .zone
            .subdomain
            .as_deref()
            .ok_or(Error::MissingField("zone.subdomain"))?;
        let ttl = self.zone.ttl.unwrap_or(DEFAULT_TTL);

        let path = format!("/domain/zone/{}/record", domain);
        let listing = self
            .call(
                Method::GET,
                &path,
                None,
                &[("subDomain", subdomain.to_string())],
                true,
            )
            .await?
            .ok_or_else(|| Error::unexpected("record listing returned no result"))?;
        let ids: Vec<i64> = serde_json::from_value(listing)
            .map_err(|e| Error::unexpected(format!("record listing not an id array: {e}")))?;

        match ids.as_slice() {
            [] if create => self.create_record(domain, subdomain, address, ttl).await?,
            [] => return Err(Error::RecordNotFound(subdomain.to_string())),
            [id] => self.update_record(domain, subdomain, *id, address, ttl).await?,
            [first, ..] => match self.multi_record {
                MultiRecordPolicy::Error => {
                    return Err(Error::AmbiguousRecords {
                        count: ids.len(),
                        subdomain: subdomain.to_string(),
                    })
                }
                MultiRecordPolicy::UpdateFirst => {
                    warn!(
                        "{} records match subdomain '{}', updating the first",
                        ids.len(),
                        subdomain
                    );
                    self.update_record(domain, subdomain, *first, address, ttl)
                        .await?;
                }
            },
        }

        self.refresh_zone(domain).await;
        Ok(())
    }
}

//==============================================================================
// Tests
//==============================================================================
