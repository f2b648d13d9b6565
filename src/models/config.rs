//! Layered run configuration.
//!
//! Three layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Config file (JSON, or TOML when the extension is `.toml`)
//! 3. Command-line flags
//!
//! Each layer is a [`ConfigLayer`] of `Option`s, so "was this set" is carried
//! by the type instead of by comparing against a default. The layers are
//! resolved exactly once into an immutable [`RunConfig`].

use super::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

pub const DEFAULT_TOKEN_COLUMN: &str = "purchaseToken";
pub const DEFAULT_SUBSCRIPTION_ID_COLUMN: &str = "subscriptionId";
pub const DEFAULT_PACKAGE_COLUMN: &str = "package";
pub const DEFAULT_PRODUCT_COLUMN: &str = "product";
pub const DEFAULT_ORDER_ID_COLUMN: &str = "order_id";
pub const DEFAULT_API_BASE_URL: &str = "https://androidpublisher.googleapis.com/androidpublisher/v3";

const DEFAULT_DELAY_SECS: f64 = 0.15;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_SECS: f64 = 0.25;
const DEFAULT_JITTER_SECS: f64 = 0.25;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Remote operation applied to every row of a run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum OperationMode {
    /// Stop future payments (developer-requested cancellation)
    #[default]
    Cancel,
    /// Read-only fetch of the current subscription state
    Validate,
    /// Revoke access immediately with a prorated refund
    RevokeProrated,
}

impl OperationMode {
    /// Wire name, as accepted on the command line and in config files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::Validate => "validate",
            Self::RevokeProrated => "revoke-prorated",
        }
    }

    /// Columns the input must carry for this mode, beyond the token column.
    pub fn required_columns(self) -> &'static [&'static str] {
        match self {
            Self::Cancel | Self::Validate => &[],
            Self::RevokeProrated => &["subscription_state"],
        }
    }
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One layer of configuration. `None` means "not set at this layer".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigLayer {
    pub input: Option<PathBuf>,
    pub mode: Option<OperationMode>,
    pub token_column: Option<String>,
    pub subscription_id_column: Option<String>,
    pub package_column: Option<String>,
    pub product_column: Option<String>,
    pub order_id_column: Option<String>,
    pub service_account: Option<PathBuf>,
    pub package_name: Option<String>,
    pub log: Option<PathBuf>,
    pub timestamp_logs: Option<bool>,
    pub delay: Option<f64>,
    pub retries: Option<u32>,
    pub backoff: Option<f64>,
    pub jitter: Option<f64>,
    pub max_rows: Option<usize>,
    pub sample_size: Option<usize>,
    pub dry_run: Option<bool>,
    pub progress: Option<bool>,
    pub eligible_output: Option<PathBuf>,
    pub ineligible_output: Option<PathBuf>,
    pub log_response: Option<bool>,
    #[serde(alias = "checkpoint")]
    pub checkpoint_success: Option<PathBuf>,
    pub checkpoint_failed: Option<PathBuf>,
    pub api_base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl ConfigLayer {
    /// Load a layer from a config file.
    ///
    /// `.toml` files are parsed as TOML, everything else as a JSON object.
    /// Unknown keys are ignored and `null` values count as unset.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let parsed = if is_toml {
            toml::from_str(&content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        };

        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_owned(),
            message,
        })
    }

    /// Stack `upper` on top of `self`: every field set in `upper` wins.
    pub fn overlay(self, upper: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            input: upper.input.or(self.input),
            mode: upper.mode.or(self.mode),
            token_column: upper.token_column.or(self.token_column),
            subscription_id_column: upper.subscription_id_column.or(self.subscription_id_column),
            package_column: upper.package_column.or(self.package_column),
            product_column: upper.product_column.or(self.product_column),
            order_id_column: upper.order_id_column.or(self.order_id_column),
            service_account: upper.service_account.or(self.service_account),
            package_name: upper.package_name.or(self.package_name),
            log: upper.log.or(self.log),
            timestamp_logs: upper.timestamp_logs.or(self.timestamp_logs),
            delay: upper.delay.or(self.delay),
            retries: upper.retries.or(self.retries),
            backoff: upper.backoff.or(self.backoff),
            jitter: upper.jitter.or(self.jitter),
            max_rows: upper.max_rows.or(self.max_rows),
            sample_size: upper.sample_size.or(self.sample_size),
            dry_run: upper.dry_run.or(self.dry_run),
            progress: upper.progress.or(self.progress),
            eligible_output: upper.eligible_output.or(self.eligible_output),
            ineligible_output: upper.ineligible_output.or(self.ineligible_output),
            log_response: upper.log_response.or(self.log_response),
            checkpoint_success: upper.checkpoint_success.or(self.checkpoint_success),
            checkpoint_failed: upper.checkpoint_failed.or(self.checkpoint_failed),
            api_base_url: upper.api_base_url.or(self.api_base_url),
            timeout_secs: upper.timeout_secs.or(self.timeout_secs),
        }
    }
}

/// Column-name overrides, tried before the built-in aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnOverrides {
    pub token: String,
    pub subscription_id: String,
    pub package: String,
    pub product: String,
    pub order_id: String,
}

impl Default for ColumnOverrides {
    fn default() -> Self {
        Self {
            token: DEFAULT_TOKEN_COLUMN.to_string(),
            subscription_id: DEFAULT_SUBSCRIPTION_ID_COLUMN.to_string(),
            package: DEFAULT_PACKAGE_COLUMN.to_string(),
            product: DEFAULT_PRODUCT_COLUMN.to_string(),
            order_id: DEFAULT_ORDER_ID_COLUMN.to_string(),
        }
    }
}

/// Retry settings as configured. Turned into a `RetryPolicy` by the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    /// Retries after the first attempt
    pub retries: u32,
    /// Base of the exponential backoff
    pub backoff: Duration,
    /// Upper bound of the uniform jitter added to each backoff
    pub jitter: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            backoff: Duration::from_secs_f64(DEFAULT_BACKOFF_SECS),
            jitter: Duration::from_secs_f64(DEFAULT_JITTER_SECS),
        }
    }
}

/// Remote endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Fully resolved, immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: PathBuf,
    pub mode: OperationMode,
    pub columns: ColumnOverrides,
    /// Service-account key; only optional for dry runs
    pub service_account: Option<PathBuf>,
    /// Run-level package. When set, rows naming another package are skipped.
    pub package_name: Option<String>,
    /// Explicit audit log path; `None` means a run-partitioned default
    pub log: Option<PathBuf>,
    pub timestamp_logs: bool,
    /// Pause after each processed row
    pub delay: Duration,
    pub retry: RetrySettings,
    pub max_rows: Option<usize>,
    pub sample_size: Option<usize>,
    pub dry_run: bool,
    pub progress: bool,
    pub eligible_output: Option<PathBuf>,
    pub ineligible_output: Option<PathBuf>,
    /// Embed the raw get payload in validate-mode audit records
    pub log_response: bool,
    pub checkpoint_success: Option<PathBuf>,
    pub checkpoint_failed: Option<PathBuf>,
    pub api: ApiSettings,
}

impl RunConfig {
    /// Resolve defaults, then the file layer, then the CLI layer.
    pub fn resolve(file: Option<ConfigLayer>, cli: ConfigLayer) -> Result<Self, ConfigError> {
        let merged = file.unwrap_or_default().overlay(cli);
        let dry_run = merged.dry_run.unwrap_or(false);

        let mut missing = Vec::new();
        if merged.input.as_ref().is_none_or(|p| p.as_os_str().is_empty()) {
            missing.push("input".to_string());
        }
        if !dry_run
            && merged
                .service_account
                .as_ref()
                .is_none_or(|p| p.as_os_str().is_empty())
        {
            missing.push("service_account".to_string());
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingRequired(missing));
        }

        let defaults = ColumnOverrides::default();
        let columns = ColumnOverrides {
            token: merged.token_column.unwrap_or(defaults.token),
            subscription_id: merged
                .subscription_id_column
                .unwrap_or(defaults.subscription_id),
            package: merged.package_column.unwrap_or(defaults.package),
            product: merged.product_column.unwrap_or(defaults.product),
            order_id: merged.order_id_column.unwrap_or(defaults.order_id),
        };

        let retry = RetrySettings {
            retries: merged.retries.unwrap_or(DEFAULT_RETRIES),
            backoff: seconds("backoff", merged.backoff.unwrap_or(DEFAULT_BACKOFF_SECS))?,
            jitter: seconds("jitter", merged.jitter.unwrap_or(DEFAULT_JITTER_SECS))?,
        };

        let timeout_secs = merged.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            input: merged.input.map(expand_path).unwrap_or_default(),
            mode: merged.mode.unwrap_or_default(),
            columns,
            service_account: merged.service_account.map(expand_path),
            package_name: merged
                .package_name
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            log: merged.log.map(expand_path),
            timestamp_logs: merged.timestamp_logs.unwrap_or(true),
            delay: seconds("delay", merged.delay.unwrap_or(DEFAULT_DELAY_SECS))?,
            retry,
            // Zero means "no limit", matching an unset flag.
            max_rows: merged.max_rows.filter(|&n| n > 0),
            sample_size: merged.sample_size.filter(|&n| n > 0),
            dry_run,
            progress: merged.progress.unwrap_or(true),
            eligible_output: merged.eligible_output.map(expand_path),
            ineligible_output: merged.ineligible_output.map(expand_path),
            log_response: merged.log_response.unwrap_or(false),
            checkpoint_success: merged.checkpoint_success.map(expand_path),
            checkpoint_failed: merged.checkpoint_failed.map(expand_path),
            api: ApiSettings {
                base_url: merged
                    .api_base_url
                    .map(|u| expand_env_vars(&u))
                    .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
                timeout_secs,
            },
        })
    }
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidValue {
        field,
        reason: format!("{value} is not a non-negative number of seconds"),
    })
}

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR.captures_iter(s) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

fn expand_path(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(s) if s.contains("${") => PathBuf::from(expand_env_vars(s)),
        _ => path,
    }
}
