//! Server configuration loading from file and environment variables.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use lifewire_filter::{
    filter_from_ref, FieldMatchFilter, DEFAULT_MATCH_DELIMITER, DEFAULT_MATCH_FIELD,
    DEFAULT_MATCH_VALUE, FIELD_MATCH_REF,
};
use lifewire_orchestrator::{
    BindingAction, RetryPolicy, CREATE_RULE, DEFAULT_DETAIL_TYPE, DEFAULT_SOURCE_DOMAIN,
    DELETE_RULE,
};
use lifewire_types::{AccessFeature, FilterConfiguration, OperationKind, ResourceState};
use serde::Deserialize;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Lifecycle routing rules.
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,

    /// Where subscriptions are created and who they notify.
    #[serde(default)]
    pub subscription: SubscriptionConfig,

    /// The filtering access layer.
    #[serde(default)]
    pub filter: FilterSettings,

    /// The receiver's identity.
    #[serde(default)]
    pub receiver: ReceiverConfig,

    /// Backoff for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Downstream delivery.
    #[serde(default)]
    pub sink: SinkConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "lifewire_orchestrator=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// One routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuleConfig {
    /// Rule name, used in logs and reports.
    pub name: String,

    /// Required event source domain.
    #[serde(default = "default_source")]
    pub source: String,

    /// Required event detail type.
    #[serde(default = "default_detail_type")]
    pub detail_type: String,

    /// States that select the event.
    pub states: Vec<ResourceState>,

    /// What to do with the resource's subscription.
    pub action: BindingAction,
}

/// Subscription placement.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    /// Location watched for resources without an override.
    #[serde(default = "default_storage_location")]
    pub storage_location: String,

    /// Handler every subscription notifies.
    #[serde(default = "default_target_handler_ref")]
    pub target_handler_ref: String,

    /// Account owning the watched locations, used to scope invoke grants.
    #[serde(default = "default_account")]
    pub source_account: String,

    /// Per-resource locations, keyed by resource id.
    #[serde(default)]
    pub location_overrides: BTreeMap<String, String>,
}

/// Settings for the field-match content filter.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldMatchConfig {
    /// Single-character field delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// 1-based field number to compare.
    #[serde(default = "default_match_field")]
    pub field: usize,

    /// Value the field must equal.
    #[serde(default = "default_match_value")]
    pub equals: String,
}

/// The filtering access layer.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterSettings {
    /// Location the layer fronts. Defaults to `subscription.storage_location`.
    #[serde(default)]
    pub supporting_location: Option<String>,

    /// Operations routed through the content filter.
    #[serde(default = "default_intercepted_operations")]
    pub intercepted_operations: BTreeSet<OperationKind>,

    /// Content filter name (`field-match` or `identity`).
    #[serde(default = "default_transform_ref")]
    pub transform_ref: String,

    /// Optional request features callers may use.
    #[serde(default = "default_allowed_features")]
    pub allowed_features: BTreeSet<AccessFeature>,

    /// Accounts allowed to read through the layer.
    #[serde(default = "default_permitted_accounts")]
    pub permitted_accounts: Vec<String>,

    /// Default read deadline in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Field-match settings.
    #[serde(default)]
    pub field_match: FieldMatchConfig,
}

/// Receiver identity.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverConfig {
    /// Account the receiver reads as.
    #[serde(default = "default_account")]
    pub caller_account: String,
}

/// Retry policy settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on any delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Growth factor between delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// Downstream sink settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Webhook to POST deliveries to. Deliveries are logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_sink_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "lifewire.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_source() -> String {
    DEFAULT_SOURCE_DOMAIN.to_string()
}

fn default_detail_type() -> String {
    DEFAULT_DETAIL_TYPE.to_string()
}

fn default_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig {
            name: CREATE_RULE.to_string(),
            source: default_source(),
            detail_type: default_detail_type(),
            states: vec![ResourceState::Running],
            action: BindingAction::Subscribe,
        },
        RuleConfig {
            name: DELETE_RULE.to_string(),
            source: default_source(),
            detail_type: default_detail_type(),
            states: vec![ResourceState::Terminated],
            action: BindingAction::Unsubscribe,
        },
    ]
}

fn default_storage_location() -> String {
    "event-logs".to_string()
}

fn default_target_handler_ref() -> String {
    "receiver".to_string()
}

fn default_account() -> String {
    "local".to_string()
}

fn default_delimiter() -> char {
    DEFAULT_MATCH_DELIMITER
}

fn default_match_field() -> usize {
    DEFAULT_MATCH_FIELD
}

fn default_match_value() -> String {
    DEFAULT_MATCH_VALUE.to_string()
}

fn default_intercepted_operations() -> BTreeSet<OperationKind> {
    BTreeSet::from([
        OperationKind::GetObject,
        OperationKind::HeadObject,
        OperationKind::ListObjects,
        OperationKind::ListObjectsV2,
    ])
}

fn default_transform_ref() -> String {
    FIELD_MATCH_REF.to_string()
}

fn default_allowed_features() -> BTreeSet<AccessFeature> {
    AccessFeature::ALL.into_iter().collect()
}

fn default_permitted_accounts() -> Vec<String> {
    vec![default_account()]
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_sink_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            rules: default_rules(),
            subscription: SubscriptionConfig::default(),
            filter: FilterSettings::default(),
            receiver: ReceiverConfig::default(),
            retry: RetryConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            storage_location: default_storage_location(),
            target_handler_ref: default_target_handler_ref(),
            source_account: default_account(),
            location_overrides: BTreeMap::new(),
        }
    }
}

impl Default for FieldMatchConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            field: default_match_field(),
            equals: default_match_value(),
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            supporting_location: None,
            intercepted_operations: default_intercepted_operations(),
            transform_ref: default_transform_ref(),
            allowed_features: default_allowed_features(),
            permitted_accounts: default_permitted_accounts(),
            read_timeout_ms: default_read_timeout_ms(),
            field_match: FieldMatchConfig::default(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            caller_account: default_account(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_ms: default_sink_timeout_ms(),
        }
    }
}

impl Config {
    /// The location the access layer fronts.
    pub fn supporting_location(&self) -> &str {
        self.filter
            .supporting_location
            .as_deref()
            .unwrap_or(&self.subscription.storage_location)
    }

    /// Every location a subscription may be placed on, plus the supporting
    /// location. The access layer serves all of them.
    pub fn served_locations(&self) -> BTreeSet<String> {
        let mut locations = BTreeSet::from([
            self.supporting_location().to_string(),
            self.subscription.storage_location.clone(),
        ]);
        locations.extend(self.subscription.location_overrides.values().cloned());
        locations
    }

    /// The access layer's static configuration.
    pub fn filter_configuration(&self) -> FilterConfiguration {
        FilterConfiguration {
            supporting_location: self.supporting_location().to_string(),
            intercepted_operations: self.filter.intercepted_operations.clone(),
            transform_ref: self.filter.transform_ref.clone(),
            allowed_features: self.filter.allowed_features.clone(),
        }
    }

    /// The configured field-match filter.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if the settings are unusable.
    pub fn field_match_filter(&self) -> Result<FieldMatchFilter, ConfigError> {
        let fm = &self.filter.field_match;
        FieldMatchFilter::new(fm.delimiter, fm.field, fm.equals.clone())
            .map_err(|e| ConfigError::Invalid(format!("filter.field_match: {e}")))
    }

    /// The retry policy for every retried operation.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.initial_backoff_ms),
            Duration::from_millis(self.retry.max_backoff_ms),
            self.retry.multiplier,
        )
    }

    /// Checks cross-field constraints that deserialization cannot.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = BTreeSet::new();
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(ConfigError::Invalid("rules: rule name is empty".to_string()));
            }
            if !names.insert(rule.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "rules: duplicate rule name {}",
                    rule.name
                )));
            }
            if rule.states.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "rules.{}: states must not be empty",
                    rule.name
                )));
            }
        }
        if self.subscription.storage_location.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "subscription.storage_location is empty".to_string(),
            ));
        }
        if let Some((resource, _)) = self
            .subscription
            .location_overrides
            .iter()
            .find(|(_, location)| location.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "subscription.location_overrides.{resource} is empty"
            )));
        }
        if self.subscription.target_handler_ref.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "subscription.target_handler_ref is empty".to_string(),
            ));
        }
        filter_from_ref(&self.filter.transform_ref, self.field_match_filter()?)
            .map_err(|e| ConfigError::Invalid(format!("filter.transform_ref: {e}")))?;
        if self.filter.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "filter.read_timeout_ms must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.multiplier must be a finite number >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `LIFEWIRE_HOST` overrides `server.host`
/// - `LIFEWIRE_PORT` overrides `server.port`
/// - `LIFEWIRE_DB_PATH` overrides `database.path`
/// - `LIFEWIRE_LOG_LEVEL` overrides `logging.level`
/// - `LIFEWIRE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `LIFEWIRE_STORAGE_LOCATION` overrides `subscription.storage_location`
/// - `LIFEWIRE_SINK_URL` overrides `sink.webhook_url`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the result fails [`Config::validate`].
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit environment lookup.
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_config_with(
    path: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Some(host) = env("LIFEWIRE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = env("LIFEWIRE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = env("LIFEWIRE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = env("LIFEWIRE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("LIFEWIRE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(location) = env("LIFEWIRE_STORAGE_LOCATION") {
        config.subscription.storage_location = location;
    }
    if let Some(url) = env("LIFEWIRE_SINK_URL") {
        config.sink.webhook_url = Some(url).filter(|u| !u.trim().is_empty());
    }

    config.validate()?;
    Ok(config)
}

/// Picks the config file: first CLI argument, then `LIFEWIRE_CONFIG_PATH`.
/// Returns the path (if any) and where it came from.
pub fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("LIFEWIRE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    fn load(contents: &str) -> Result<Config, ConfigError> {
        let file = write_config(contents);
        load_config_with(file.path().to_str(), no_env)
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = load_config_with(Some("/nonexistent/lifewire.toml"), no_env).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.path, "lifewire.db");
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].name, "create-notification");
        assert_eq!(config.rules[0].states, vec![ResourceState::Running]);
        assert_eq!(config.rules[1].action, BindingAction::Unsubscribe);
        assert_eq!(config.supporting_location(), "event-logs");
        assert_eq!(config.filter.intercepted_operations.len(), 4);
        assert_eq!(config.filter.allowed_features.len(), 4);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn sections_parse() {
        let config = load(
            r#"
            [server]
            port = 8080

            [[rules]]
            name = "subscribe-on-start"
            states = ["running", "other"]
            action = "subscribe"

            [subscription]
            storage_location = "emr-logs"
            target_handler_ref = "forwarder"
            location_overrides = { "i-7" = "emr-logs-7" }

            [filter]
            supporting_location = "emr-logs"
            intercepted_operations = ["GetObject"]
            transform_ref = "identity"
            allowed_features = ["GetObject-Range"]
            permitted_accounts = ["local", "111122223333"]

            [filter.field_match]
            delimiter = ","
            field = 2

            [retry]
            max_attempts = 2
            initial_backoff_ms = 10

            [sink]
            webhook_url = "http://127.0.0.1:9000/hook"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].source, "aws.ec2");
        assert_eq!(
            config.subscription.location_overrides.get("i-7").map(String::as_str),
            Some("emr-logs-7")
        );
        assert_eq!(
            config.served_locations(),
            BTreeSet::from(["emr-logs".to_string(), "emr-logs-7".to_string()])
        );
        let filter = config.filter_configuration();
        assert!(filter.intercepts(OperationKind::GetObject));
        assert!(!filter.intercepts(OperationKind::ListObjects));
        assert!(filter.allows(AccessFeature::GetObjectRange));
        assert!(!filter.allows(AccessFeature::HeadObjectRange));
        assert_eq!(config.filter.field_match.delimiter, ',');
        assert_eq!(config.filter.field_match.equals, DEFAULT_MATCH_VALUE);
        assert_eq!(config.retry_policy().max_attempts, 2);
        assert_eq!(
            config.sink.webhook_url.as_deref(),
            Some("http://127.0.0.1:9000/hook")
        );
    }

    #[test]
    fn unknown_state_or_operation_is_a_parse_error() {
        let bad_state = load(
            r#"
            [[rules]]
            name = "r"
            states = ["rebooting"]
            action = "subscribe"
            "#,
        );
        assert!(matches!(bad_state, Err(ConfigError::Parse(_))));

        let bad_op = load(
            r#"
            [filter]
            intercepted_operations = ["PutObject"]
            "#,
        );
        assert!(matches!(bad_op, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let cases = [
            "[filter]\ntransform_ref = \"s3-select\"\n",
            "[filter.field_match]\nfield = 0\n",
            "[retry]\nmax_attempts = 0\n",
            "[subscription]\nlocation_overrides = { \"i-7\" = \" \" }\n",
            "[[rules]]\nname = \"a\"\nstates = []\naction = \"subscribe\"\n",
            "[[rules]]\nname = \"a\"\nstates = [\"running\"]\naction = \"subscribe\"\n\
             [[rules]]\nname = \"a\"\nstates = [\"terminated\"]\naction = \"unsubscribe\"\n",
        ];
        for contents in cases {
            assert!(
                matches!(load(contents), Err(ConfigError::Invalid(_))),
                "accepted: {contents}"
            );
        }
    }

    #[test]
    fn environment_overrides_file() {
        let file = write_config("[server]\nport = 8080\n");
        let config = load_config_with(file.path().to_str(), |key| match key {
            "LIFEWIRE_PORT" => Some("9090".to_string()),
            "LIFEWIRE_LOG_JSON" => Some("1".to_string()),
            "LIFEWIRE_STORAGE_LOCATION" => Some("other-logs".to_string()),
            "LIFEWIRE_SINK_URL" => Some("http://sink.local/hook".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.server.port, 9090);
        assert!(config.logging.json);
        assert_eq!(config.supporting_location(), "other-logs");
        assert_eq!(config.sink.webhook_url.as_deref(), Some("http://sink.local/hook"));
    }
}
