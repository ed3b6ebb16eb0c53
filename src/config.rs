//! Startup configuration
//! Builds the immutable snapshot of targets, replace rules and tenancy mode

use crate::error::{ConfigError, RouteError};
use hyper::header::{HeaderMap, HeaderName, HOST};
use hyper::Uri;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MARKER_HEADER: &str = "MINIMIRROR";
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// One backend origin to mirror
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct TargetConfig {
    /// Public domain of the backend, e.g. `https://origin.example`
    pub domain: String,

    /// Origin requests are actually sent to, when it differs from `domain`
    #[serde(default, rename = "target")]
    pub endpoint: Option<String>,

    /// Other origins referenced by mirrored content
    #[serde(default, deserialize_with = "nullable_list")]
    pub secondary_domains: Vec<String>,
}

impl TargetConfig {
    /// Origin the inbound path is appended to
    pub fn origin(&self) -> &str {
        match self.endpoint.as_deref() {
            Some(endpoint) if !endpoint.is_empty() => endpoint,
            _ => &self.domain,
        }
    }

    /// Build the outbound URL for an inbound path
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.origin(), path)
    }
}

fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Literal substitution applied to every mirrored body
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplaceRule {
    pub old: String,
    pub new: String,
}

impl ReplaceRule {
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }
}

/// Per-host target table used in multi-tenant mode
#[derive(Debug, Clone)]
pub struct TenantTable {
    targets: HashMap<String, TargetConfig>,
    host_header: HeaderName,
    external_key: Option<String>,
}

impl TenantTable {
    pub fn new(
        targets: HashMap<String, TargetConfig>,
        host_header: HeaderName,
        external_key: Option<String>,
    ) -> Self {
        Self {
            targets,
            host_header,
            external_key,
        }
    }

    pub fn host_header(&self) -> &HeaderName {
        &self.host_header
    }

    pub fn external_key(&self) -> Option<&str> {
        self.external_key.as_deref()
    }

    pub fn get(&self, host: &str) -> Option<&TargetConfig> {
        self.targets.get(host)
    }

    /// Tenants sorted by host
    pub fn tenants(&self) -> Vec<(&str, &TargetConfig)> {
        let mut tenants: Vec<_> = self
            .targets
            .iter()
            .map(|(host, target)| (host.as_str(), target))
            .collect();
        tenants.sort_by(|a, b| a.0.cmp(b.0));
        tenants
    }

    /// Host identity of a request: the configured header, or the URI
    /// authority when the header is the standard `Host` and is absent
    fn host_identity<'a>(&self, headers: &'a HeaderMap, uri: &'a Uri) -> Option<&'a str> {
        let value = headers
            .get(&self.host_header)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty());

        match value {
            Some(v) => Some(v),
            None if self.host_header == HOST => uri.authority().map(|a| a.as_str()),
            None => None,
        }
    }

    fn lookup(&self, host: &str) -> Option<&TargetConfig> {
        self.targets
            .get(host)
            .or_else(|| strip_port(host).and_then(|h| self.targets.get(h)))
    }
}

/// `example.com:8080` -> `example.com`; `None` when there is no port
fn strip_port(host: &str) -> Option<&str> {
    let (name, port) = host.rsplit_once(':')?;
    if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
        Some(name)
    } else {
        None
    }
}

/// Where targets come from
#[derive(Debug, Clone)]
pub enum ConfigStore {
    /// One fixed backend for every request
    Single(TargetConfig),
    /// Backend selected by a host-identifying request header
    Multi(TenantTable),
}

impl ConfigStore {
    /// Resolve the target for a request on the internal path.
    /// Unknown hosts never fall back to another tenant.
    pub fn resolve(&self, headers: &HeaderMap, uri: &Uri) -> Result<&TargetConfig, RouteError> {
        match self {
            ConfigStore::Single(target) => Ok(target),
            ConfigStore::Multi(table) => {
                let host = table
                    .host_identity(headers, uri)
                    .ok_or(RouteError::MissingHostHeader)?;
                table
                    .lookup(host)
                    .ok_or_else(|| RouteError::UnknownHost(host.to_string()))
            }
        }
    }

    /// Target whose domains rewrite bodies fetched through the external path
    pub fn external_target(&self) -> Option<&TargetConfig> {
        match self {
            ConfigStore::Single(target) => Some(target),
            ConfigStore::Multi(table) => table.external_key().and_then(|key| table.get(key)),
        }
    }

    /// Every configured target
    pub fn targets(&self) -> Vec<&TargetConfig> {
        match self {
            ConfigStore::Single(target) => vec![target],
            ConfigStore::Multi(table) => table.targets.values().collect(),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            ConfigStore::Single(_) => "single-tenant",
            ConfigStore::Multi(_) => "multi-tenant",
        }
    }
}

/// Raw startup settings, read from flags or the environment
#[derive(Debug, Clone, clap::Args)]
pub struct Settings {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Domain of the single mirrored target (single-tenant mode)
    #[arg(long, env = "TARGET_DOMAIN")]
    pub target_domain: Option<String>,

    /// Origin requests are sent to, if different from the target domain
    #[arg(long, env = "TARGET_ENDPOINT")]
    pub target_endpoint: Option<String>,

    /// Semicolon-separated secondary domains (single-tenant mode)
    #[arg(long, env = "SECONDARY_DOMAINS")]
    pub secondary_domains: Option<String>,

    /// JSON array of {"old", "new"} literal replacements
    #[arg(long, env = "REPLACE")]
    pub replace: Option<String>,

    /// JSON object mapping host -> {domain, target, secondary_domains} (multi-tenant mode)
    #[arg(long, env = "CONFIG")]
    pub config: Option<String>,

    /// File containing the multi-tenant JSON object
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Request header identifying the tenant
    #[arg(long, env = "HOST_HEADER", default_value = "Host")]
    pub host_header: String,

    /// Tenant whose domains rewrite bodies on the external path
    #[arg(long, env = "EXTERNAL_CONFIG_KEY")]
    pub external_config_key: Option<String>,

    /// Header added to every mirrored request
    #[arg(long, env = "MARKER_HEADER", default_value = DEFAULT_MARKER_HEADER)]
    pub marker_header: String,

    /// Timeout for each outbound request, in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = DEFAULT_UPSTREAM_TIMEOUT_SECS)]
    pub upstream_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            target_domain: None,
            target_endpoint: None,
            secondary_domains: None,
            replace: None,
            config: None,
            config_file: None,
            host_header: "Host".to_string(),
            external_config_key: None,
            marker_header: DEFAULT_MARKER_HEADER.to_string(),
            upstream_timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
        }
    }
}

/// Immutable configuration snapshot shared by every request
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub port: u16,
    pub store: ConfigStore,
    pub replace_rules: Vec<ReplaceRule>,
    pub marker_header: HeaderName,
    pub upstream_timeout: Duration,
}

impl MirrorConfig {
    /// Validate settings and build the snapshot
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let replace_rules: Vec<ReplaceRule> = match non_empty(&settings.replace) {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|source| ConfigError::InvalidJson { var: "REPLACE", source })?,
            None => Vec::new(),
        };

        let store = Self::load_store(settings)?;

        if settings.upstream_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        Ok(Self {
            port: settings.port,
            store,
            replace_rules,
            marker_header: parse_header_name(&settings.marker_header)?,
            upstream_timeout: Duration::from_secs(settings.upstream_timeout_secs),
        })
    }

    fn load_store(settings: &Settings) -> Result<ConfigStore, ConfigError> {
        let tenants = match (non_empty(&settings.config), &settings.config_file) {
            (Some(raw), _) => Some(parse_tenants(raw, "CONFIG")?),
            (None, Some(path)) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
                    path: path.clone(),
                    source,
                })?;
                Some(parse_tenants(&raw, "CONFIG_FILE")?)
            }
            (None, None) => None,
        };

        match (tenants, non_empty(&settings.target_domain)) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingModes),
            (Some(targets), None) => {
                let host_header = parse_header_name(&settings.host_header)?;
                let external_key = non_empty(&settings.external_config_key).map(str::to_string);

                match external_key.as_deref() {
                    Some(key) if !targets.contains_key(key) => {
                        warn!("External config key {} not found, external bodies get literal replacements only", key);
                    }
                    None => {
                        info!("No external config key set, external bodies get literal replacements only");
                    }
                    _ => {}
                }

                Ok(ConfigStore::Multi(TenantTable::new(
                    targets,
                    host_header,
                    external_key,
                )))
            }
            (None, Some(domain)) => Ok(ConfigStore::Single(TargetConfig {
                domain: domain.to_string(),
                endpoint: non_empty(&settings.target_endpoint).map(str::to_string),
                secondary_domains: settings
                    .secondary_domains
                    .as_deref()
                    .map(split_secondary_domains)
                    .unwrap_or_default(),
            })),
            (None, None) => Err(ConfigError::MissingTarget),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn parse_tenants(
    raw: &str,
    var: &'static str,
) -> Result<HashMap<String, TargetConfig>, ConfigError> {
    serde_json::from_str(raw).map_err(|source| ConfigError::InvalidJson { var, source })
}

fn parse_header_name(name: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|source| ConfigError::InvalidHeaderName {
        name: name.to_string(),
        source,
    })
}

/// Split a `;`-separated domain list, dropping empty entries
pub fn split_secondary_domains(raw: &str) -> Vec<String> {
    raw.split(';')
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;
    use std::io::Write;

    const TENANTS: &str = r#"{
        "a.example": {"domain": "https://a.origin", "target": "http://backend-a", "secondary_domains": ["https://cdn.a"]},
        "sota.ton": {"domain": "https://sota.origin", "target": "", "secondary_domains": null}
    }"#;

    fn multi_settings() -> Settings {
        Settings {
            config: Some(TENANTS.to_string()),
            external_config_key: Some("sota.ton".to_string()),
            ..Settings::default()
        }
    }

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    #[test]
    fn test_single_tenant_settings() {
        let settings = Settings {
            target_domain: Some("https://origin.example".to_string()),
            secondary_domains: Some("https://cdn.example;https://img.example".to_string()),
            replace: Some(r#"[{"old": "foo", "new": "bar"}]"#.to_string()),
            ..Settings::default()
        };

        let config = MirrorConfig::from_settings(&settings).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.marker_header.as_str(), "minimirror");
        assert_eq!(config.replace_rules, vec![ReplaceRule::new("foo", "bar")]);

        let ConfigStore::Single(target) = &config.store else {
            panic!("expected single-tenant store");
        };
        assert_eq!(target.origin(), "https://origin.example");
        assert_eq!(
            target.secondary_domains,
            vec!["https://cdn.example", "https://img.example"]
        );
    }

    #[test]
    fn test_endpoint_overrides_domain() {
        let settings = Settings {
            target_domain: Some("https://origin.example".to_string()),
            target_endpoint: Some("http://10.0.0.5:8080".to_string()),
            ..Settings::default()
        };

        let config = MirrorConfig::from_settings(&settings).unwrap();
        let target = config.store.external_target().unwrap();
        assert_eq!(target.url_for("/page"), "http://10.0.0.5:8080/page");
    }

    #[test]
    fn test_empty_secondary_domains() {
        assert!(split_secondary_domains("").is_empty());
        assert_eq!(split_secondary_domains("a;;b;"), vec!["a", "b"]);
    }

    #[test]
    fn test_malformed_replace_is_fatal() {
        let settings = Settings {
            target_domain: Some("https://origin.example".to_string()),
            replace: Some("[{old: }".to_string()),
            ..Settings::default()
        };

        let err = MirrorConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidJson { var: "REPLACE", .. }));
    }

    #[test]
    fn test_malformed_config_is_fatal() {
        let settings = Settings {
            config: Some("{not json".to_string()),
            ..Settings::default()
        };

        let err = MirrorConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidJson { var: "CONFIG", .. }));
    }

    #[test]
    fn test_missing_and_conflicting_modes() {
        let err = MirrorConfig::from_settings(&Settings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTarget));

        let settings = Settings {
            target_domain: Some("https://origin.example".to_string()),
            ..multi_settings()
        };
        let err = MirrorConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingModes));
    }

    #[test]
    fn test_invalid_marker_header() {
        let settings = Settings {
            target_domain: Some("https://origin.example".to_string()),
            marker_header: "bad header".to_string(),
            ..Settings::default()
        };

        let err = MirrorConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeaderName { .. }));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let settings = Settings {
            target_domain: Some("https://origin.example".to_string()),
            upstream_timeout_secs: 0,
            ..Settings::default()
        };

        let err = MirrorConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTimeout));

        let settings = Settings {
            upstream_timeout_secs: 1,
            ..settings
        };
        let config = MirrorConfig::from_settings(&settings).unwrap();
        assert_eq!(config.upstream_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_multi_tenant_resolve() {
        let config = MirrorConfig::from_settings(&multi_settings()).unwrap();
        let uri: Uri = "/page".parse().unwrap();

        let target = config
            .store
            .resolve(&headers_with("host", "a.example"), &uri)
            .unwrap();
        assert_eq!(target.url_for("/page"), "http://backend-a/page");

        // Port suffix is ignored when the exact value is unknown
        let target = config
            .store
            .resolve(&headers_with("host", "a.example:3000"), &uri)
            .unwrap();
        assert_eq!(target.domain, "https://a.origin");

        // Empty target falls back to the domain, null secondary list is empty
        let target = config
            .store
            .resolve(&headers_with("host", "sota.ton"), &uri)
            .unwrap();
        assert_eq!(target.origin(), "https://sota.origin");
        assert!(target.secondary_domains.is_empty());
    }

    #[test]
    fn test_multi_tenant_unknown_host() {
        let config = MirrorConfig::from_settings(&multi_settings()).unwrap();
        let uri: Uri = "/page".parse().unwrap();

        let err = config
            .store
            .resolve(&headers_with("host", "b.example"), &uri)
            .unwrap_err();
        assert_eq!(err, RouteError::UnknownHost("b.example".to_string()));
    }

    #[test]
    fn test_multi_tenant_missing_host() {
        let config = MirrorConfig::from_settings(&multi_settings()).unwrap();
        let uri: Uri = "/page".parse().unwrap();

        let err = config.store.resolve(&HeaderMap::new(), &uri).unwrap_err();
        assert_eq!(err, RouteError::MissingHostHeader);

        // Absolute-form request target carries the authority
        let uri: Uri = "http://a.example/page".parse().unwrap();
        assert!(config.store.resolve(&HeaderMap::new(), &uri).is_ok());
    }

    #[test]
    fn test_custom_host_header() {
        let settings = Settings {
            host_header: "X-Tenant".to_string(),
            ..multi_settings()
        };
        let config = MirrorConfig::from_settings(&settings).unwrap();
        let uri: Uri = "http://a.example/page".parse().unwrap();

        assert!(config
            .store
            .resolve(&headers_with("x-tenant", "a.example"), &uri)
            .is_ok());

        // No authority fallback for a custom header
        let err = config
            .store
            .resolve(&headers_with("host", "a.example"), &uri)
            .unwrap_err();
        assert_eq!(err, RouteError::MissingHostHeader);
    }

    #[test]
    fn test_external_target() {
        let config = MirrorConfig::from_settings(&multi_settings()).unwrap();
        let target = config.store.external_target().unwrap();
        assert_eq!(target.domain, "https://sota.origin");

        let settings = Settings {
            external_config_key: None,
            ..multi_settings()
        };
        let config = MirrorConfig::from_settings(&settings).unwrap();
        assert!(config.store.external_target().is_none());
    }

    #[test]
    fn test_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TENANTS.as_bytes()).unwrap();

        let settings = Settings {
            config_file: Some(file.path().to_path_buf()),
            ..Settings::default()
        };
        let config = MirrorConfig::from_settings(&settings).unwrap();

        let ConfigStore::Multi(table) = &config.store else {
            panic!("expected multi-tenant store");
        };
        let hosts: Vec<_> = table.tenants().into_iter().map(|(host, _)| host).collect();
        assert_eq!(hosts, vec!["a.example", "sota.ton"]);
    }

    #[test]
    fn test_missing_config_file() {
        let settings = Settings {
            config_file: Some(PathBuf::from("/nonexistent/minimirror.json")),
            ..Settings::default()
        };

        let err = MirrorConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
