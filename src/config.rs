//! Configuration loading and types for mediablob.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each entry under `filesystems` describes one blob
//! container exposed as a virtual file system; [`Config::filesystem`]
//! turns it into an immutable [`FileSystemConfig`].
//!
//! Flag and number settings are read as loose scalars: a value that does
//! not parse falls back to its default with a warning instead of failing
//! startup.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::errors::{FsError, FsResult};
use crate::storage::backend::ContainerAccess;

/// Container used when a file system does not name one.
pub const DEFAULT_CONTAINER_NAME: &str = "media";

/// Route segment exposed in URLs in default-route mode.
pub const DEFAULT_ROUTE: &str = "media";

/// Browser cache lifetime used when `max_days` is missing or invalid.
pub const DEFAULT_MAX_DAYS: u32 = 365;

/// Connection string of the local storage emulator.
pub const EMULATOR_CONNECTION_STRING: &str = "UseDevelopmentStorage=true";

/// Root URL of the local storage emulator's blob endpoint.
pub const EMULATOR_ROOT_URL: &str = "http://127.0.0.1:10000/devstoreaccount1/";

/// Environment variable consulted when no connection string is configured.
pub const CONNECTION_STRING_ENV: &str = "AZURE_STORAGE_CONNECTION_STRING";

const SECONDS_PER_DAY: u64 = 86_400;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health check).
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Storage backend: `azure` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub storage_backend: String,

    /// Virtual path the host application is mounted under (`/` for the root).
    #[serde(default)]
    pub app_virtual_path: String,

    /// When true, URLs are absolute blob URLs and no media route is served.
    #[serde(default)]
    pub disable_virtual_path_provider: Option<Setting>,

    /// When true, every file system talks to the local storage emulator.
    #[serde(default)]
    pub use_storage_emulator: Option<Setting>,

    /// File systems keyed by alias (e.g. `media`, `forms`).
    #[serde(default)]
    pub filesystems: BTreeMap<String, FileSystemSettings>,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/health` endpoint.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

/// Raw, unvalidated settings for one file system.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileSystemSettings {
    /// Blob container name (defaults to `media`).
    #[serde(default)]
    pub container_name: Option<String>,

    /// Root URL of the blob endpoint, e.g. `https://acct.blob.core.windows.net/`.
    #[serde(default)]
    pub root_url: Option<String>,

    /// Storage connection string.
    #[serde(default)]
    pub connection_string: Option<String>,

    /// Days browsers may cache blobs for.
    #[serde(default)]
    pub max_days: Option<Setting>,

    /// Expose `default_route` in URLs instead of the container name.
    #[serde(default)]
    pub use_default_route: Option<Setting>,

    /// Route segment used in default-route mode.
    #[serde(default)]
    pub default_route: Option<String>,

    /// Keep the container private instead of public-read.
    #[serde(default)]
    pub use_private_container: Option<Setting>,
}

/// A loosely typed scalar setting.
///
/// YAML authors write `true`, `"true"`, `30` or `"30"` interchangeably; all
/// of them are kept as text and parsed on use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting(pub String);

impl<'de> Deserialize<'de> for Setting {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Scalar {
            Bool(bool),
            Int(i64),
            Float(f64),
            Text(String),
        }

        Ok(match Scalar::deserialize(deserializer)? {
            Scalar::Bool(b) => Setting(b.to_string()),
            Scalar::Int(i) => Setting(i.to_string()),
            Scalar::Float(f) => Setting(f.to_string()),
            Scalar::Text(s) => Setting(s),
        })
    }
}

impl From<&str> for Setting {
    fn from(value: &str) -> Self {
        Setting(value.to_string())
    }
}

/// Parse a boolean setting, falling back to `default` when missing or invalid.
pub fn parse_flag(setting: Option<&Setting>, key: &str, default: bool) -> bool {
    let Some(Setting(raw)) = setting else {
        return default;
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return default;
    }
    if raw.eq_ignore_ascii_case("true") {
        true
    } else if raw.eq_ignore_ascii_case("false") {
        false
    } else {
        warn!("Setting {key}='{raw}' is not a boolean, using default {default}");
        default
    }
}

/// Parse the cache lifetime in days, falling back to [`DEFAULT_MAX_DAYS`].
pub fn parse_max_days(setting: Option<&Setting>, key: &str) -> u32 {
    let Some(Setting(raw)) = setting else {
        return DEFAULT_MAX_DAYS;
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return DEFAULT_MAX_DAYS;
    }
    match raw.parse::<u32>() {
        Ok(days) => days,
        Err(_) => {
            warn!("Setting {key}='{raw}' is not a day count, using default {DEFAULT_MAX_DAYS}");
            DEFAULT_MAX_DAYS
        }
    }
}

/// Normalize the host application's virtual path to `""` or `/segment`.
pub fn normalize_app_virtual_path(raw: &str) -> String {
    let trimmed = raw.trim().replace('\\', "/");
    let trimmed = trimmed.trim_start_matches('~').trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Check a container name against the blob service naming rules.
///
/// Names are 3-63 characters of lowercase letters, digits and single
/// hyphens, beginning and ending with a letter or digit.  `$root` is the
/// one special name accepted.
pub fn validate_container_name(name: &str) -> FsResult<()> {
    let invalid = |reason: &str| {
        Err(FsError::InvalidContainerName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name == "$root" {
        return Ok(());
    }
    if name.len() < 3 || name.len() > 63 {
        return invalid("must be between 3 and 63 characters long");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return invalid("may only contain lowercase letters, digits and hyphens");
    }
    if name.starts_with('-') || name.ends_with('-') {
        return invalid("must start and end with a letter or digit");
    }
    if name.contains("--") {
        return invalid("must not contain consecutive hyphens");
    }
    Ok(())
}

/// Immutable, validated configuration of one virtual file system.
///
/// Built once at startup and shared read-only by every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemConfig {
    container_name: String,
    root_url: String,
    connection_string: String,
    max_days: u32,
    use_default_route: bool,
    default_route: String,
    use_private_container: bool,
    app_virtual_path: String,
    disable_virtual_path_provider: bool,
    use_storage_emulator: bool,
}

impl FileSystemConfig {
    /// Create a configuration with default options.
    ///
    /// The container name is validated here; the root URL is forced to end
    /// in `/`.
    pub fn new(container_name: &str, root_url: &str, connection_string: &str) -> FsResult<Self> {
        validate_container_name(container_name)?;
        Ok(Self {
            container_name: container_name.to_string(),
            root_url: normalize_root_url(root_url),
            connection_string: connection_string.to_string(),
            max_days: DEFAULT_MAX_DAYS,
            use_default_route: true,
            default_route: DEFAULT_ROUTE.to_string(),
            use_private_container: true,
            app_virtual_path: String::new(),
            disable_virtual_path_provider: false,
            use_storage_emulator: false,
        })
    }

    /// Set the browser cache lifetime in days.
    pub fn with_max_days(mut self, max_days: u32) -> Self {
        self.max_days = max_days;
        self
    }

    /// Choose between default-route and container-name URLs.
    pub fn with_default_route(mut self, use_default_route: bool) -> Self {
        self.use_default_route = use_default_route;
        self
    }

    /// Override the default route segment.
    pub fn with_default_route_name(mut self, route: &str) -> Self {
        let route = route.trim_matches('/');
        if !route.is_empty() {
            self.default_route = route.to_string();
        }
        self
    }

    /// Choose private or public-read container access.
    pub fn with_private_container(mut self, private: bool) -> Self {
        self.use_private_container = private;
        self
    }

    /// Set the host application's virtual path.
    pub fn with_app_virtual_path(mut self, path: &str) -> Self {
        self.app_virtual_path = normalize_app_virtual_path(path);
        self
    }

    /// Return absolute URLs from `get_url` and skip the media route.
    pub fn with_virtual_path_provider_disabled(mut self, disabled: bool) -> Self {
        self.disable_virtual_path_provider = disabled;
        self
    }

    /// Point the file system at the local storage emulator.
    pub fn with_storage_emulator(mut self, enabled: bool) -> Self {
        self.use_storage_emulator = enabled;
        if enabled {
            self.connection_string = EMULATOR_CONNECTION_STRING.to_string();
            self.root_url = EMULATOR_ROOT_URL.to_string();
        }
        self
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Root URL of the blob endpoint; always ends in `/`.
    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    /// `{root_url}{container}/`, the URL every blob URL starts with.
    pub fn root_container_url(&self) -> String {
        format!("{}{}/", self.root_url, self.container_name)
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn max_days(&self) -> u32 {
        self.max_days
    }

    pub fn use_default_route(&self) -> bool {
        self.use_default_route
    }

    pub fn default_route(&self) -> &str {
        &self.default_route
    }

    pub fn use_private_container(&self) -> bool {
        self.use_private_container
    }

    /// `""` at the root, otherwise `/segment` with no trailing slash.
    pub fn app_virtual_path(&self) -> &str {
        &self.app_virtual_path
    }

    pub fn disable_virtual_path_provider(&self) -> bool {
        self.disable_virtual_path_provider
    }

    pub fn use_storage_emulator(&self) -> bool {
        self.use_storage_emulator
    }

    /// Path segment exposed in relative URLs.
    pub fn route_name(&self) -> &str {
        if self.use_default_route {
            &self.default_route
        } else {
            &self.container_name
        }
    }

    /// Cache lifetime in seconds.
    pub fn cache_control_seconds(&self) -> u64 {
        u64::from(self.max_days) * SECONDS_PER_DAY
    }

    /// Access level the container is provisioned with.
    pub fn container_access(&self) -> ContainerAccess {
        if self.use_private_container {
            ContainerAccess::Private
        } else {
            ContainerAccess::Blob
        }
    }
}

fn normalize_root_url(root_url: &str) -> String {
    let trimmed = root_url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

impl Config {
    /// True when the storage emulator is switched on globally.
    pub fn use_storage_emulator(&self) -> bool {
        parse_flag(
            self.use_storage_emulator.as_ref(),
            "use_storage_emulator",
            false,
        )
    }

    /// True when the media route should not be served.
    pub fn disable_virtual_path_provider(&self) -> bool {
        parse_flag(
            self.disable_virtual_path_provider.as_ref(),
            "disable_virtual_path_provider",
            false,
        )
    }

    /// Build the validated configuration of the file system named `alias`.
    pub fn filesystem(&self, alias: &str) -> FsResult<FileSystemConfig> {
        let settings = self.filesystems.get(alias).ok_or_else(|| {
            FsError::config(format!("No file system named '{alias}' is configured"))
        })?;
        let use_emulator = self.use_storage_emulator();

        let connection_string = non_empty(settings.connection_string.as_deref())
            .map(str::to_string)
            .or_else(|| {
                std::env::var(CONNECTION_STRING_ENV)
                    .ok()
                    .filter(|s| !s.trim().is_empty())
            });
        let connection_string = match (connection_string, use_emulator) {
            (Some(c), _) => c,
            (None, true) => EMULATOR_CONNECTION_STRING.to_string(),
            (None, false) => {
                return Err(FsError::config(format!(
                    "Unable to retrieve the blob storage configuration for '{alias}': \
                     connection_string was not defined and {CONNECTION_STRING_ENV} is not set"
                )))
            }
        };

        let root_url = match (non_empty(settings.root_url.as_deref()), use_emulator) {
            (_, true) => EMULATOR_ROOT_URL,
            (Some(url), false) => url,
            (None, false) => {
                return Err(FsError::config(format!(
                    "Blob storage root URL is not defined for '{alias}': \
                     root_url was not defined or is empty"
                )))
            }
        };

        let container_name =
            non_empty(settings.container_name.as_deref()).unwrap_or(DEFAULT_CONTAINER_NAME);

        let mut config = FileSystemConfig::new(container_name.trim(), root_url, &connection_string)?
            .with_max_days(parse_max_days(settings.max_days.as_ref(), "max_days"))
            .with_default_route(parse_flag(
                settings.use_default_route.as_ref(),
                "use_default_route",
                true,
            ))
            .with_private_container(parse_flag(
                settings.use_private_container.as_ref(),
                "use_private_container",
                true,
            ))
            .with_app_virtual_path(&self.app_virtual_path)
            .with_virtual_path_provider_disabled(self.disable_virtual_path_provider())
            .with_storage_emulator(use_emulator);
        if let Some(route) = non_empty(settings.default_route.as_deref()) {
            config = config.with_default_route_name(route);
        }
        Ok(config)
    }

    /// Validated configurations for every alias, in alias order.
    pub fn filesystems(&self) -> FsResult<Vec<(String, FileSystemConfig)>> {
        self.filesystems
            .keys()
            .map(|alias| Ok((alias.clone(), self.filesystem(alias)?)))
            .collect()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9014
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_storage_backend() -> String {
    "azure".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Parse configuration from YAML text.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
}

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}
