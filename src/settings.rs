use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::challenge::DEFAULT_CHALLENGE_TTL_SECONDS;
use crate::models::{AppEnvironment, AppIdentity, CounterPolicy};

/// Longest lifetime Apple accepts for a DeviceCheck auth token
pub const MAX_TOKEN_LIFETIME_SECONDS: i64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceCheckSettings {
    pub application: ApplicationSettings,
    pub apple: AppleSettings,
    pub app_attest: AppAttestSettings,
    pub device_check: DeviceCheckApiSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Comma separated list of allowed origins, `*` for any
    pub cors_origins: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppleSettings {
    pub team_id: String,
    pub bundle_id: String,
    pub environment: AppEnvironment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppAttestSettings {
    pub challenge_ttl_seconds: i64,
    pub counter_policy: CounterPolicy,
    /// Accept a second attestation for an already registered key id
    pub allow_reregistration: bool,
    /// PEM file replacing the bundled Apple App Attestation Root CA
    pub root_ca_path: Option<String>,
    /// Include the failed check in error responses; defaults to on in development
    pub expose_failure_details: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCheckApiSettings {
    pub key_id: String,
    pub private_key_path: String,
    pub request_timeout_seconds: u64,
    pub token_lifetime_seconds: i64,
    /// Overrides the environment's Apple endpoint
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: "*".to_string(),
        }
    }
}

impl Default for AppleSettings {
    fn default() -> Self {
        Self {
            team_id: "YOUR_TEAM_ID".to_string(),
            bundle_id: "com.example.devicecheck".to_string(),
            environment: AppEnvironment::Development,
        }
    }
}

impl Default for AppAttestSettings {
    fn default() -> Self {
        Self {
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
            counter_policy: CounterPolicy::Strict,
            allow_reregistration: false,
            root_ca_path: None,
            expose_failure_details: None,
        }
    }
}

impl Default for DeviceCheckApiSettings {
    fn default() -> Self {
        Self {
            key_id: "YOUR_KEY_ID".to_string(),
            private_key_path: "AuthKey.p8".to_string(),
            request_timeout_seconds: 10,
            token_lifetime_seconds: MAX_TOKEN_LIFETIME_SECONDS,
            base_url: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl DeviceCheckSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Logger initialization fails
    /// - Settings file cannot be read or parsed
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_env_file();

        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);
        Self::initialize_logger(&settings.logging)?;

        Ok(settings)
    }

    /// Initialize `env_logger` with the configured filter (`RUST_LOG` syntax)
    ///
    /// # Errors
    ///
    /// Returns an error if a logger is already installed
    fn initialize_logger(logging: &LoggingSettings) -> Result<(), Box<dyn std::error::Error>> {
        env_logger::Builder::new()
            .parse_filters(&logging.level)
            .try_init()?;
        Ok(())
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `DEVICECHECK_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file cannot be read or parsed
    fn load_base_settings() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::default();

        let default_config_path = PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_toml_file(&default_config_path)?;
            println!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(secrets_dir) = std::env::var("DEVICECHECK_SECRETS_DIR") {
            let secrets_path = std::path::Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                settings = Self::from_toml_file(&secrets_path)?;
                println!("✓ Overriding settings from {}", secrets_path.display());
            } else {
                println!(
                    "ℹ DEVICECHECK_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Parse a single settings file; missing keys fall back to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(basic_toml::from_str(&content)?)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_apple_env_overrides(&mut settings.apple);
        Self::apply_app_attest_env_overrides(&mut settings.app_attest);
        Self::apply_device_check_env_overrides(&mut settings.device_check);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        Self::apply_parsed_env_override("PORT", &mut app_settings.port);
        if let Ok(cors_origins) = std::env::var("CORS_ORIGINS") {
            app_settings.cors_origins = cors_origins;
        }
    }

    fn apply_apple_env_overrides(apple_settings: &mut AppleSettings) {
        if let Ok(team_id) = std::env::var("APPLE_TEAM_ID") {
            apple_settings.team_id = team_id;
        }
        if let Ok(bundle_id) = std::env::var("APPLE_BUNDLE_ID") {
            apple_settings.bundle_id = bundle_id;
        }
        Self::apply_parsed_env_override("APPLE_ENVIRONMENT", &mut apple_settings.environment);
    }

    fn apply_app_attest_env_overrides(attest_settings: &mut AppAttestSettings) {
        Self::apply_parsed_env_override(
            "CHALLENGE_TTL_SECONDS",
            &mut attest_settings.challenge_ttl_seconds,
        );
    }

    fn apply_device_check_env_overrides(device_check: &mut DeviceCheckApiSettings) {
        if let Ok(key_id) = std::env::var("DEVICECHECK_KEY_ID") {
            device_check.key_id = key_id;
        }
        if let Ok(path) = std::env::var("DEVICECHECK_PRIVATE_KEY_PATH") {
            device_check.private_key_path = path;
        }
        if let Ok(base_url) = std::env::var("DEVICECHECK_BASE_URL") {
            device_check.base_url = Some(base_url).filter(|url| !url.is_empty());
        }
        Self::apply_parsed_env_override(
            "DEVICECHECK_TIMEOUT_SECONDS",
            &mut device_check.request_timeout_seconds,
        );
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    /// Overwrite `target` when `env_var` is set and parses; otherwise keep it
    fn apply_parsed_env_override<T: std::str::FromStr>(env_var: &str, target: &mut T) {
        if let Ok(value_str) = std::env::var(env_var) {
            match value_str.parse::<T>() {
                Ok(value) => *target = value,
                Err(_) => log::warn!("Ignoring unparseable {env_var}={value_str}"),
            }
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Get CORS origins as a vector of strings
    #[must_use]
    pub fn get_cors_origins(&self) -> Vec<String> {
        self.application
            .cors_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// The app attestations and assertions are bound to
    #[must_use]
    pub fn app_identity(&self) -> AppIdentity {
        AppIdentity::new(
            &self.apple.team_id,
            &self.apple.bundle_id,
            self.apple.environment,
        )
    }

    /// Whether error responses name the failed verification check
    #[must_use]
    pub fn expose_failure_details(&self) -> bool {
        self.app_attest
            .expose_failure_details
            .unwrap_or(self.apple.environment == AppEnvironment::Development)
    }

    /// Apple DeviceCheck endpoint, honoring the override
    #[must_use]
    pub fn devicecheck_base_url(&self) -> String {
        self.device_check.base_url.clone().unwrap_or_else(|| {
            self.apple
                .environment
                .devicecheck_base_url()
                .to_string()
        })
    }

    /// Auth token lifetime clamped to Apple's one hour maximum
    #[must_use]
    pub fn token_lifetime_seconds(&self) -> i64 {
        self.device_check
            .token_lifetime_seconds
            .clamp(1, MAX_TOKEN_LIFETIME_SECONDS)
    }
}
