//! Public address detection
//!
//! Tries an ordered list of address-echo sources until one yields a usable
//! value. Each source carries its own response parser, because providers
//! answer in different shapes: bare text, a JSON document with an `ip`
//! field, or prose with the address embedded somewhere in it. A network
//! error, bad status, or parse miss just advances the chain; exhausting it
//! yields `None` and the caller decides what that means for the run.

use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::constants::{DETECT_JSON_FIELD, DETECT_TIMEOUT_SECS, OVH_USER_AGENT};

lazy_static! {
    static ref IPV4_PATTERN: Regex =
        Regex::new(r"[0-9]+(?:\.[0-9]+){3}").expect("static pattern");
}

//==============================================================================
// Types
//==============================================================================

/// Response-parsing strategy for one echo source
///
/// A closed set of variants, fixed at construction. Parsing is total: a
/// body that does not fit the expected shape yields `None`, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parser {
    /// Trim the body and return it verbatim
    Plain,
    /// Parse the body as JSON and extract the named string field
    JsonField(&'static str),
    /// Scan free text for the first IPv4-literal match
    Ipv4Pattern,
}

impl Parser {
    /// Extracts an address from a response body, or `None` on any miss.
    pub fn parse(&self, body: &str) -> Option<String> {
        match self {
            Parser::Plain => {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Parser::JsonField(field) => {
                let value: serde_json::Value = serde_json::from_str(body).ok()?;
                let addr = value.get(*field)?.as_str()?;
                // an empty field is a miss, not a usable address
                if addr.is_empty() {
                    None
                } else {
                    Some(addr.to_string())
                }
            }
            Parser::Ipv4Pattern => IPV4_PATTERN.find(body).map(|m| m.as_str().to_string()),
        }
    }
}

/// One address-echo source: where to ask and how to read the answer
#[derive(Debug, Clone)]
pub struct Source {
    pub url: String,
    pub parser: Parser,
}

impl Source {
    pub fn new(url: impl Into<String>, parser: Parser) -> Self {
        Self {
            url: url.into(),
            parser,
        }
    }

    /// Parses a `url|parser` config token, where parser is one of
    /// `plain`, `json`, `scan`. A bare URL defaults to `plain`.
    pub fn from_token(token: &str) -> Result<Self> {
        let token = token.trim();
        let (url, parser) = match token.rsplit_once('|') {
            Some((url, kind)) => {
                let parser = match kind.trim() {
                    "plain" => Parser::Plain,
                    "json" => Parser::JsonField(DETECT_JSON_FIELD),
                    "scan" => Parser::Ipv4Pattern,
                    other => bail!("Unknown source parser '{}'. Use: plain|json|scan", other),
                };
                (url.trim(), parser)
            }
            None => (token, Parser::Plain),
        };
        if url.is_empty() {
            bail!("Empty source URL");
        }
        Ok(Self::new(url, parser))
    }
}

/// Default fallback chain of public echo services
pub fn default_sources() -> Vec<Source> {
    vec![
        Source::new("https://nsupdate.info/myip", Parser::Plain),
        Source::new("http://jsonip.com/", Parser::JsonField(DETECT_JSON_FIELD)),
        Source::new("http://checkip.dns.he.net/", Parser::Ipv4Pattern),
    ]
}

//==============================================================================
// Detector
//==============================================================================

/// Tries each source in order and returns the first usable address
pub struct AddressDetector {
    client: reqwest::Client,
    sources: Vec<Source>,
}

impl AddressDetector {
    /// Creates a detector over the default source chain
    pub fn new() -> Result<Self> {
        Self::with_sources(default_sources())
    }

    /// Creates a detector over a custom source chain
    pub fn with_sources(sources: Vec<Source>) -> Result<Self> {
        let timeout = Duration::from_secs(DETECT_TIMEOUT_SECS);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(OVH_USER_AGENT)
            .build()
            .context("build reqwest client")?;
        Ok(Self { client, sources })
    }

    /// Returns the first address any source yields, or `None` when every
    /// source failed. Failures are logged and never propagate.
    pub async fn detect(&self) -> Option<String> {
        for source in &self.sources {
            let body = match self.fetch(&source.url).await {
                Some(body) => body,
                None => continue,
            };
            match source.parser.parse(&body) {
                Some(addr) => {
                    debug!("[{}] -> {}", source.url, addr);
                    return Some(addr);
                }
                None => warn!("Unable to parse response from {}", source.url),
            }
        }
        None
    }

    async fn fetch(&self, url: &str) -> Option<String> {
        debug!("GET {}", url);
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Unable to get '{}': {}", url, e);
                return None;
            }
        };
        if resp.status() != reqwest::StatusCode::OK {
            warn!("'{}' answered with status {}", url, resp.status());
            return None;
        }
        match resp.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("Unable to read body from '{}': {}", url, e);
                None
            }
        }
    }
}

//==============================================================================
// Tests
//==============================================================================
