//! Configuration for ovhddns
//!
//! Credentials and zone settings come from a sectioned TOML file; the first
//! existing path from a small ordered candidate list wins, and a handful of
//! environment variables can override individual fields. The consumer key
//! obtained during the bootstrap flow is merged back into the same document
//! so later runs sign their calls with it.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use zeroize::Zeroizing;

use crate::constants::{
    CONFIG_CANDIDATES, DEFAULT_STATE_PATH, DEFAULT_TIMEOUT_SECS, ENV_APPLICATION_KEY,
    ENV_APPLICATION_SECRET, ENV_CONSUMER_KEY, ENV_DOMAIN, ENV_SUBDOMAIN, MAX_TIMEOUT_SECS,
    MIN_TIMEOUT_SECS,
};
use crate::detect::Source;
use crate::ovh::MultiRecordPolicy;

//==============================================================================
// Types
//==============================================================================

/// API credentials
///
/// `consumer_key` is absent until the bootstrap flow completes; once a human
/// has validated it out-of-band it authorizes every signed call.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub application_key: String,
    pub application_secret: Zeroizing<String>,
    pub consumer_key: Option<Zeroizing<String>>,
}

/// Zone and record settings
///
/// `domain` and `subdomain` are only required once an update is actually
/// attempted, so they stay optional here and are checked at that point.
#[derive(Debug, Clone, Default)]
pub struct ZoneConfig {
    pub domain: Option<String>,
    pub subdomain: Option<String>,
    pub ttl: Option<u64>,
}

/// Full runtime configuration for one run
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub zone: ZoneConfig,
    /// Custom detection sources, `None` means the built-in chain
    pub sources: Option<Vec<Source>>,
    /// Where the last confirmed address is persisted
    pub state_path: PathBuf,
    /// Timeout applied to detection and API requests
    pub timeout: Duration,
    pub verbose: bool,
    pub multi_record: MultiRecordPolicy,
    /// The file this config was loaded from, if any
    source_path: Option<PathBuf>,
}

//==============================================================================
// TOML file structure
//==============================================================================

#[derive(Debug, Default, serde::Deserialize)]
struct TomlConfig {
    timeout: Option<u64>,
    verbose: Option<bool>,
    multi_record: Option<String>,
    credentials: Option<TomlCredentials>,
    zone: Option<TomlZone>,
    detection: Option<TomlDetection>,
    state: Option<TomlState>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct TomlCredentials {
    application_key: Option<String>,
    application_secret: Option<String>,
    consumer_key: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct TomlZone {
    domain: Option<String>,
    subdomain: Option<String>,
    ttl: Option<u64>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct TomlDetection {
    /// `", "`-separated list of `url|parser` tokens
    sources: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct TomlState {
    path: Option<String>,
}

//==============================================================================
// Loading
//==============================================================================

impl Config {
    /// Loads configuration from the first existing candidate file, then
    /// applies environment overrides and validates required fields.
    ///
    /// Fails fast when `application_key` or `application_secret` is missing
    /// after both passes; everything else has a default or is checked later.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let path = resolve_path(config_path);
        let mut config = Self::load_from_file(path)?;
        Self::override_with_env(&mut config);
        Self::validate(&config)?;
        Ok(config)
    }

    fn load_from_file(path: Option<PathBuf>) -> Result<Self> {
        let toml_config = match &path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                toml::from_str::<TomlConfig>(&content)
                    .with_context(|| format!("Failed to parse config: {}", path.display()))?
            }
            None => TomlConfig::default(),
        };

        let creds = toml_config.credentials.unwrap_or_default();
        let zone = toml_config.zone.unwrap_or_default();

        let sources = match toml_config.detection.and_then(|d| d.sources) {
            Some(list) => Some(parse_source_list(&list)?),
            None => None,
        };

        let multi_record = match toml_config.multi_record.as_deref() {
            Some(v) => parse_multi_record(v)?,
            None => MultiRecordPolicy::Error,
        };

        Ok(Self {
            credentials: Credentials {
                application_key: creds.application_key.unwrap_or_default(),
                application_secret: Zeroizing::new(creds.application_secret.unwrap_or_default()),
                consumer_key: creds.consumer_key.map(Zeroizing::new),
            },
            zone: ZoneConfig {
                domain: zone.domain,
                subdomain: zone.subdomain,
                ttl: zone.ttl,
            },
            sources,
            state_path: toml_config
                .state
                .and_then(|s| s.path)
                .unwrap_or_else(|| DEFAULT_STATE_PATH.to_string())
                .into(),
            timeout: Duration::from_secs(toml_config.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            verbose: toml_config.verbose.unwrap_or(false),
            multi_record,
            source_path: path,
        })
    }

    fn override_with_env(config: &mut Self) {
        if let Ok(v) = env::var(ENV_APPLICATION_KEY) {
            if !v.is_empty() {
                config.credentials.application_key = v;
            }
        }
        if let Ok(v) = env::var(ENV_APPLICATION_SECRET) {
            if !v.is_empty() {
                config.credentials.application_secret = Zeroizing::new(v);
            }
        }
        if let Ok(v) = env::var(ENV_CONSUMER_KEY) {
            if !v.is_empty() {
                config.credentials.consumer_key = Some(Zeroizing::new(v));
            }
        }
        if let Ok(v) = env::var(ENV_DOMAIN) {
            if !v.is_empty() {
                config.zone.domain = Some(v);
            }
        }
        if let Ok(v) = env::var(ENV_SUBDOMAIN) {
            if !v.is_empty() {
                config.zone.subdomain = Some(v);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.credentials.application_key.is_empty() {
            return Err(anyhow!("Missing credentials.application_key"));
        }
        if self.credentials.application_secret.is_empty() {
            return Err(anyhow!("Missing credentials.application_secret"));
        }
        let timeout_secs = self.timeout.as_secs();
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout_secs) {
            return Err(anyhow!(
                "timeout must be between {} and {} seconds, got {}",
                MIN_TIMEOUT_SECS,
                MAX_TIMEOUT_SECS,
                timeout_secs
            ));
        }
        Ok(())
    }

    /// Merges a freshly issued consumer key into the configuration document
    /// and replaces it atomically.
    ///
    /// The rest of the document is preserved as parsed. When the config came
    /// only from the environment, the first candidate path is created.
    pub fn persist_consumer_key(&self, consumer_key: &str) -> Result<()> {
        let target = self
            .source_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(CONFIG_CANDIDATES[0]));

        let mut doc: toml::Table = match fs::read_to_string(&target) {
            Ok(content) => content
                .parse()
                .with_context(|| format!("Failed to parse config: {}", target.display()))?,
            Err(_) => toml::Table::new(),
        };

        let creds = doc
            .entry("credentials".to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        match creds {
            toml::Value::Table(table) => {
                table.insert(
                    "consumer_key".to_string(),
                    toml::Value::String(consumer_key.to_string()),
                );
            }
            _ => return Err(anyhow!("credentials section is not a table")),
        }

        let serialized = toml::to_string_pretty(&doc).context("serialize config")?;
        let tmp = target.with_extension("tmp");
        fs::write(&tmp, serialized)
            .with_context(|| format!("write temp config {}", tmp.display()))?;
        fs::rename(&tmp, &target)
            .with_context(|| format!("rename {} to {}", tmp.display(), target.display()))?;
        Ok(())
    }
}

/// Picks the config file for this run: an explicit flag wins, otherwise the
/// first existing candidate path.
fn resolve_path(config_path: Option<PathBuf>) -> Option<PathBuf> {
    if config_path.is_some() {
        return config_path;
    }
    CONFIG_CANDIDATES
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

/// Splits a multi-valued config field on the `", "` separator convention
fn parse_source_list(list: &str) -> Result<Vec<Source>> {
    let sources = list
        .split(", ")
        .filter(|token| !token.trim().is_empty())
        .map(Source::from_token)
        .collect::<Result<Vec<_>>>()?;
    if sources.is_empty() {
        return Err(anyhow!("detection.sources is set but empty"));
    }
    Ok(sources)
}

/// Parses a multi-record policy string
pub fn parse_multi_record(value: &str) -> Result<MultiRecordPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "error" | "fail" | "reject" => Ok(MultiRecordPolicy::Error),
        "first" | "update_first" | "updatefirst" => Ok(MultiRecordPolicy::UpdateFirst),
        _ => Err(anyhow!(
            "Invalid multi_record policy: '{}'. Use: error|first",
            value
        )),
    }
}

//==============================================================================
// Tests
//==============================================================================
