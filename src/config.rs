//! Startup configuration
//!
//! Read once from the environment and never changed afterwards:
//!
//! ```text
//! CLUSTER_NAME=prod-eu           (required)
//! PIXIE_CLUSTER_ID=...           (required)
//! PIXIE_API_KEY=...              (required)
//! PIXIE_ENDPOINT=work.withpixie.ai:443
//! NR_LICENSE_KEY=...             (required)
//! NR_OTLP_HOST=                  (derived from the license key region when unset)
//! HTTP_SPAN_LIMIT=1500
//! DB_SPAN_LIMIT=500
//! COLLECT_INTERVAL_SEC=30
//! HTTP_SPAN_COLLECT_INTERVAL=    (per-signal overrides, <= 1 disables the signal)
//! HTTP_METRIC_COLLECT_INTERVAL=
//! JVM_COLLECT_INTERVAL=
//! MYSQL_COLLECT_INTERVAL=
//! POSTGRES_COLLECT_INTERVAL=
//! EXCLUDE_PODS_REGEX=
//! EXCLUDE_NAMESPACES_REGEX=
//! VERBOSE=false
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::adapter::{Adapter, IdGenerator, ResourceHelper};

pub const DEFAULT_PIXIE_ENDPOINT: &str = "work.withpixie.ai:443";
pub const OTLP_ENDPOINT_EU: &str = "otlp.eu01.nr-data.net:443";
pub const OTLP_ENDPOINT_US: &str = "otlp.nr-data.net:443";

const DEFAULT_HTTP_SPAN_LIMIT: u64 = 1500;
const DEFAULT_DB_SPAN_LIMIT: u64 = 500;
const DEFAULT_COLLECT_INTERVAL_SEC: i64 = 30;

/// Credential that never shows up in debug output
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Collection interval per signal; `None` means the signal is disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalIntervals {
    pub http_spans: Option<Duration>,
    pub http_metrics: Option<Duration>,
    pub jvm: Option<Duration>,
    pub mysql: Option<Duration>,
    pub postgres: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_name: String,
    pub pixie_cluster_id: String,
    pub pixie_api_key: Secret,
    pub pixie_endpoint: String,
    pub license_key: Secret,
    /// OTLP collector `host:port`
    pub otlp_endpoint: String,
    pub http_span_limit: u64,
    pub db_span_limit: u64,
    pub intervals: SignalIntervals,
    pub exclude_pods: Option<String>,
    pub exclude_namespaces: Option<String>,
    pub verbose: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let cluster_name = required("CLUSTER_NAME")?;
        let pixie_cluster_id = required("PIXIE_CLUSTER_ID")?;
        let pixie_api_key = Secret(required("PIXIE_API_KEY")?);
        let license_key = Secret(required("NR_LICENSE_KEY")?);

        let pixie_endpoint = get("PIXIE_ENDPOINT").unwrap_or_else(|| DEFAULT_PIXIE_ENDPOINT.to_string());
        let otlp_endpoint = get("NR_OTLP_HOST")
            .unwrap_or_else(|| endpoint_for_license(license_key.expose()).to_string());

        let http_span_limit = parse_or(&get, "HTTP_SPAN_LIMIT", DEFAULT_HTTP_SPAN_LIMIT)?;
        let db_span_limit = parse_or(&get, "DB_SPAN_LIMIT", DEFAULT_DB_SPAN_LIMIT)?;
        let collect_interval = parse_or(&get, "COLLECT_INTERVAL_SEC", DEFAULT_COLLECT_INTERVAL_SEC)?;

        let interval = |key: &'static str| -> Result<Option<Duration>, ConfigError> {
            let secs = parse_or(&get, key, collect_interval)?;
            Ok((secs > 1).then(|| Duration::from_secs(secs as u64)))
        };
        let intervals = SignalIntervals {
            http_spans: interval("HTTP_SPAN_COLLECT_INTERVAL")?,
            http_metrics: interval("HTTP_METRIC_COLLECT_INTERVAL")?,
            jvm: interval("JVM_COLLECT_INTERVAL")?,
            mysql: interval("MYSQL_COLLECT_INTERVAL")?,
            postgres: interval("POSTGRES_COLLECT_INTERVAL")?,
        };

        let verbose = get("VERBOSE").is_some_and(|v| v.eq_ignore_ascii_case("true"));

        Ok(Self {
            cluster_name,
            pixie_cluster_id,
            pixie_api_key,
            pixie_endpoint,
            license_key,
            otlp_endpoint,
            http_span_limit,
            db_span_limit,
            intervals,
            exclude_pods: get("EXCLUDE_PODS_REGEX"),
            exclude_namespaces: get("EXCLUDE_NAMESPACES_REGEX"),
            verbose,
        })
    }

    pub fn resource_helper(&self) -> Result<ResourceHelper, ConfigError> {
        ResourceHelper::new(
            self.cluster_name.clone(),
            self.pixie_cluster_id.clone(),
            self.exclude_pods.as_deref(),
            self.exclude_namespaces.as_deref(),
        )
        .map_err(|e| ConfigError::InvalidRegex(e.to_string()))
    }

    /// Adapters for every enabled signal, all sharing one id generator
    pub fn adapters(&self, ids: Arc<dyn IdGenerator>) -> Vec<Adapter> {
        let mut adapters = Vec::new();
        let intervals = &self.intervals;

        if let Some(interval) = intervals.http_spans {
            adapters.push(Adapter::http_spans(Arc::clone(&ids), interval, self.http_span_limit));
        }
        if let Some(interval) = intervals.mysql {
            adapters.push(Adapter::mysql(Arc::clone(&ids), interval, self.db_span_limit));
        }
        if let Some(interval) = intervals.postgres {
            adapters.push(Adapter::postgres(Arc::clone(&ids), interval, self.db_span_limit));
        }
        if let Some(interval) = intervals.http_metrics {
            adapters.push(Adapter::http_metrics(interval));
        }
        if let Some(interval) = intervals.jvm {
            adapters.push(Adapter::jvm(interval));
        }

        adapters
    }
}

/// Collector endpoint implied by the region prefix of a license key
pub fn endpoint_for_license(license_key: &str) -> &'static str {
    let region: String = license_key
        .chars()
        .take_while(|c| c.is_ascii_lowercase())
        .take(3)
        .collect();
    if region == "eu" {
        OTLP_ENDPOINT_EU
    } else {
        OTLP_ENDPOINT_US
    }
}

fn parse_or<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::NotAnInteger { key, value }),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable {0} is required")]
    Missing(&'static str),

    #[error("Environment variable {key} is not an integer: {value:?}")]
    NotAnInteger { key: &'static str, value: String },

    #[error("Invalid exclusion regex: {0}")]
    InvalidRegex(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RandomIdGenerator;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        let mut vars: HashMap<String, String> = [
            ("CLUSTER_NAME", "demo"),
            ("PIXIE_CLUSTER_ID", "cluster-1"),
            ("PIXIE_API_KEY", "px-key"),
            ("NR_LICENSE_KEY", "0123456789abcdefNRAL"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in pairs {
            vars.insert(k.to_string(), v.to_string());
        }
        vars
    }

    fn load(vars: HashMap<String, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(env(&[])).unwrap();
        assert_eq!(config.pixie_endpoint, DEFAULT_PIXIE_ENDPOINT);
        assert_eq!(config.otlp_endpoint, OTLP_ENDPOINT_US);
        assert_eq!(config.http_span_limit, 1500);
        assert_eq!(config.db_span_limit, 500);
        assert_eq!(config.intervals.jvm, Some(Duration::from_secs(30)));
        assert_eq!(config.exclude_pods, None);
        assert!(!config.verbose);
    }

    #[test]
    fn test_missing_required() {
        let mut vars = env(&[]);
        vars.remove("PIXIE_API_KEY");
        assert_eq!(load(vars).unwrap_err(), ConfigError::Missing("PIXIE_API_KEY"));

        let vars = env(&[("CLUSTER_NAME", "")]);
        assert_eq!(load(vars).unwrap_err(), ConfigError::Missing("CLUSTER_NAME"));
    }

    #[test]
    fn test_not_an_integer() {
        let err = load(env(&[("DB_SPAN_LIMIT", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::NotAnInteger {
                key: "DB_SPAN_LIMIT",
                value: "lots".into()
            }
        );
    }

    #[test]
    fn test_region_endpoint() {
        assert_eq!(endpoint_for_license("eu01xx0123456789abcdefNRAL"), OTLP_ENDPOINT_EU);
        assert_eq!(endpoint_for_license("0123456789abcdefNRAL"), OTLP_ENDPOINT_US);
        assert_eq!(endpoint_for_license("gov01x0123456789NRAL"), OTLP_ENDPOINT_US);
        assert_eq!(endpoint_for_license(""), OTLP_ENDPOINT_US);

        let config = load(env(&[("NR_LICENSE_KEY", "eu01xxsecret")])).unwrap();
        assert_eq!(config.otlp_endpoint, OTLP_ENDPOINT_EU);

        let config = load(env(&[("NR_OTLP_HOST", "collector.local:4317")])).unwrap();
        assert_eq!(config.otlp_endpoint, "collector.local:4317");
    }

    #[test]
    fn test_interval_overrides_and_disabling() {
        let config = load(env(&[
            ("COLLECT_INTERVAL_SEC", "45"),
            ("JVM_COLLECT_INTERVAL", "1"),
            ("MYSQL_COLLECT_INTERVAL", "0"),
            ("HTTP_METRIC_COLLECT_INTERVAL", "60"),
        ]))
        .unwrap();

        assert_eq!(config.intervals.http_spans, Some(Duration::from_secs(45)));
        assert_eq!(config.intervals.http_metrics, Some(Duration::from_secs(60)));
        assert_eq!(config.intervals.jvm, None);
        assert_eq!(config.intervals.mysql, None);
        assert_eq!(config.intervals.postgres, Some(Duration::from_secs(45)));

        let ids: Arc<dyn IdGenerator> = Arc::new(RandomIdGenerator::new());
        let ids: Vec<_> = config.adapters(ids).iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec!["http_spans", "db_postgres", "http_metrics"]);
    }

    #[test]
    fn test_verbose_and_exclusions() {
        let config = load(env(&[
            ("VERBOSE", "TRUE"),
            ("EXCLUDE_NAMESPACES_REGEX", "^kube-"),
        ]))
        .unwrap();
        assert!(config.verbose);
        assert_eq!(config.exclude_namespaces.as_deref(), Some("^kube-"));
        assert!(config.resource_helper().unwrap().should_filter("kube-system", "dns"));

        let config = load(env(&[("EXCLUDE_PODS_REGEX", "(")])).unwrap();
        assert!(matches!(config.resource_helper(), Err(ConfigError::InvalidRegex(_))));
    }

    #[test]
    fn test_secrets_are_redacted() {
        let config = load(env(&[])).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("px-key"));
        assert!(!debug.contains("NRAL"));
        assert_eq!(config.pixie_api_key.expose(), "px-key");
    }
}
