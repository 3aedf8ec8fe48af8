//! Common constants used throughout the ovhddns application

//==============================================================================
// OVH API Constants
//==============================================================================

/// OVH API base URL (EU endpoint)
pub const OVH_API_BASE: &str = "https://eu.api.ovh.com/1.0";

/// User agent string for API requests
pub const OVH_USER_AGENT: &str = "ovhddns/1.0";

/// Server time endpoint, unauthenticated
pub const OVH_TIME_PATH: &str = "/auth/time";

/// Credential bootstrap endpoint, unauthenticated
pub const OVH_CREDENTIAL_PATH: &str = "/auth/credential";

/// Zone listing endpoint, used as the authorization probe
pub const OVH_ZONE_PATH: &str = "/domain/zone";

/// Prefix of every request signature
pub const SIGNATURE_PREFIX: &str = "$1$";

/// DNS record type for IPv4 addresses
pub const DNS_RECORD_TYPE_A: &str = "A";

/// DNS record type for IPv6 addresses
pub const DNS_RECORD_TYPE_AAAA: &str = "AAAA";

/// Default record TTL in seconds when the zone config leaves it unset
pub const DEFAULT_TTL: u64 = 60;

//==============================================================================
// Address Detection Constants
//==============================================================================

/// Per-source fetch timeout in seconds
pub const DETECT_TIMEOUT_SECS: u64 = 10;

/// JSON field holding the address in structured echo responses
pub const DETECT_JSON_FIELD: &str = "ip";

//==============================================================================
// File Constants
//==============================================================================

/// Default path of the persisted last-known-address file
pub const DEFAULT_STATE_PATH: &str = ".myip";

/// Configuration file candidates, tried in order; first existing wins
pub const CONFIG_CANDIDATES: &[&str] = &["ovhddns.toml", "/etc/ovhddns/config.toml"];

//==============================================================================
// Timeout Constants
//==============================================================================

/// Default HTTP request timeout in seconds (detection and API calls)
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Minimum HTTP request timeout in seconds
pub const MIN_TIMEOUT_SECS: u64 = 1;

/// Maximum HTTP request timeout in seconds
pub const MAX_TIMEOUT_SECS: u64 = 300;

//==============================================================================
// Environment Variable Names
//==============================================================================

/// Environment variable name for the OVH application key
pub const ENV_APPLICATION_KEY: &str = "OVHDDNS_APPLICATION_KEY";

/// Environment variable name for the OVH application secret
pub const ENV_APPLICATION_SECRET: &str = "OVHDDNS_APPLICATION_SECRET";

/// Environment variable name for the OVH consumer key
pub const ENV_CONSUMER_KEY: &str = "OVHDDNS_CONSUMER_KEY";

/// Environment variable name for the zone domain
pub const ENV_DOMAIN: &str = "OVHDDNS_DOMAIN";

/// Environment variable name for the record subdomain
pub const ENV_SUBDOMAIN: &str = "OVHDDNS_SUBDOMAIN";
