//! Configuration loader with environment variable support.

use std::env;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::schema::Config;

/// Loads TOML configuration, expands `${VAR}` placeholders, and applies
/// `WEBGATE_*` environment overrides.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let mut config: Config = toml::from_str(&expanded)?;
        Self::apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Config, ConfigError> {
        let mut config = Config::default();
        Self::apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value =
                env::var(var_name).map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Apply `WEBGATE_*` overrides on top of a loaded config.
    fn apply_env_overrides(config: &mut Config) {
        if let Ok(host) = env::var("WEBGATE_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("WEBGATE_PORT") {
            config.server.port = port;
        }
        if let Ok(key) = env::var("WEBGATE_API_KEY") {
            config.server.api_key = Some(key);
        }
        if let Some(limit) = env_parse::<u32>("WEBGATE_RATE_LIMIT_PER_MINUTE") {
            config.server.rate_limit_per_minute = limit;
        }
        if let Some(timeout) = env_parse::<u64>("WEBGATE_SESSION_IDLE_TIMEOUT_SECONDS") {
            config.server.session_idle_timeout_seconds = timeout;
        }
        if let Some(headless) = env_parse::<bool>("WEBGATE_HEADLESS") {
            config.browser.headless = headless;
        }
        if let Ok(path) = env::var("WEBGATE_CHROME_EXECUTABLE") {
            config.browser.chrome_executable = Some(path);
        }
        if let Some(ceiling) = env_parse::<usize>("WEBGATE_POOL_HARD_CEILING") {
            config.pool.hard_ceiling = ceiling;
        }
        if let Some(allow) = env_parse::<bool>("WEBGATE_ALLOW_NON_HTTP_URLS") {
            config.security.allow_non_http_urls = allow;
        }
        if let Some(allow) = env_parse::<bool>("WEBGATE_ALLOW_CUSTOM_JS") {
            config.security.allow_custom_js = allow;
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
