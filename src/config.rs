use chrono::NaiveTime;
use dropcatch::remote::LoopiaConfig;
use dropcatch::scheduler::{DispatchMode, DropSchedule, RetryPolicy};
use eyre::{Context, Result, bail, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const USERNAME_ENV: &str = "LOOPIA_USERNAME";
const PASSWORD_ENV: &str = "LOOPIA_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub username: String,
    pub password: String,
    pub domains: Vec<String>,
    pub dispatch: DispatchMode,
    pub schedule: ScheduleConfig,
    pub retry: RetryConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub drop_time_utc: String,
    pub pre_drop_lead_ms: u64,
    pub recheck_interval_secs: u64,
    pub keep_awake_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            drop_time_utc: "04:00".to_string(),
            pre_drop_lead_ms: 100,
            recheck_interval_secs: 600,
            keep_awake_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub fast_retry_count: u32,
    pub fast_retry_interval_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub purchasing_window_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            fast_retry_count: 3,
            fast_retry_interval_ms: 100,
            initial_backoff_ms: 1000,
            max_backoff_ms: 300000,
            purchasing_window_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: String,
    pub hourly_quota: u32,
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: dropcatch::remote::loopia::LOOPIA_ENDPOINT.to_string(),
            hourly_quota: dropcatch::client::DEFAULT_HOURLY_QUOTA,
            timeout_ms: 15000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            username: String::new(),
            password: String::new(),
            domains: Vec::new(),
            dispatch: DispatchMode::default(),
            schedule: ScheduleConfig::default(),
            retry: RetryConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file(config_path)?;
        config.fill_credentials(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_file(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Take credentials missing from the file from the environment.
    fn fill_credentials<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if self.username.is_empty()
            && let Some(username) = lookup(USERNAME_ENV)
        {
            self.username = username;
        }
        if self.password.is_empty()
            && let Some(password) = lookup(PASSWORD_ENV)
        {
            self.password = password;
        }
    }

    /// Logging filter: `--verbose` raises it to debug, otherwise the configured level.
    pub fn log_filter(&self, verbose: bool) -> &str {
        if verbose {
            "debug"
        } else {
            self.log_level.as_deref().unwrap_or("info")
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    pub fn drop_schedule(&self) -> Result<DropSchedule> {
        let drop_time = parse_drop_time(&self.schedule.drop_time_utc)?;
        if self.schedule.recheck_interval_secs == 0 {
            bail!("schedule.recheck_interval_secs must be greater than zero");
        }
        Ok(DropSchedule::new(drop_time)
            .with_lead(Duration::from_millis(self.schedule.pre_drop_lead_ms))
            .with_recheck_interval(Duration::from_secs(self.schedule.recheck_interval_secs)))
    }

    pub fn keep_awake_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.keep_awake_interval_secs)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let retry = &self.retry;
        if retry.fast_retry_interval_ms == 0 {
            bail!("retry.fast_retry_interval_ms must be greater than zero");
        }
        if retry.initial_backoff_ms == 0 {
            bail!("retry.initial_backoff_ms must be greater than zero");
        }
        if retry.max_backoff_ms < retry.initial_backoff_ms {
            bail!(
                "retry.max_backoff_ms ({}) must not be below retry.initial_backoff_ms ({})",
                retry.max_backoff_ms,
                retry.initial_backoff_ms
            );
        }

        Ok(RetryPolicy::default()
            .with_fast_retries(retry.fast_retry_count, Duration::from_millis(retry.fast_retry_interval_ms))
            .with_backoff(
                Duration::from_millis(retry.initial_backoff_ms),
                Duration::from_millis(retry.max_backoff_ms),
            ))
    }

    pub fn purchasing_window(&self) -> Duration {
        Duration::from_secs(self.retry.purchasing_window_secs)
    }

    pub fn loopia(&self) -> LoopiaConfig {
        LoopiaConfig {
            endpoint: self.client.endpoint.clone(),
            timeout: Duration::from_millis(self.client.timeout_ms),
        }
    }
}

fn parse_drop_time(text: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .map_err(|e| eyre!("Invalid drop_time_utc '{}': {}", text, e))
}
