use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, debug, error};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GraderConfig {
    pub run: RunConfig,
    pub challenge: ChallengeSettings,
    pub browser: BrowserSettings,
    pub ocr: OcrSettings,
}

/// Run-wide limits and pacing, read-only for the lifetime of a run
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunConfig {
    /// Maximum tasks per chunk
    pub chunk_size: usize,

    /// Maximum tasks holding a browsing context at once
    pub max_concurrency: usize,

    pub navigation_timeout_ms: u64,

    /// Total navigation attempts per task
    pub max_attempts: u32,

    /// Pause before admitting each task after the first, min and max in milliseconds
    pub request_delay_ms: (u64, u64),

    /// Pause between chunks, min and max in milliseconds
    pub chunk_delay_ms: (u64, u64),

    /// Retry backoff base, doubled per attempt
    pub backoff_base_ms: u64,

    /// Upper bound on the exponential part of the backoff
    pub backoff_cap_ms: u64,
}

/// Challenge mitigation limits
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChallengeSettings {
    /// Detect/mitigate rounds per page visit
    pub max_rounds: u32,

    /// Attempts at locating a click-to-verify control
    pub probe_attempts: u32,

    pub probe_interval_ms: u64,

    /// CAPTCHA submissions per round, each with a fresh image
    pub captcha_attempts: u32,

    /// Wait after an interaction before re-inspecting the page
    pub settle_ms: (u64, u64),

    /// Overall budget for mitigating one page visit
    pub timeout_ms: u64,
}

/// Browser engine settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrowserSettings {
    /// WebDriver endpoint
    pub webdriver_url: String,
    pub headless: bool,
    pub locale: String,
    pub viewport: Viewport,
    pub user_agents: Vec<String>,
    pub behavior: BrowserBehavior,
}

/// Browser viewport settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Human-like interaction pacing
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrowserBehavior {
    pub click_delay: (u64, u64),  // Min and max delay in milliseconds
    pub typing_speed: (u64, u64), // Min and max milliseconds per character
}

/// OCR solver service
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OcrSettings {
    pub endpoint: String,
    pub timeout_secs: u64,
}

/// Rejected settings
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} range is inverted: {min} > {max}")]
    InvertedRange { field: &'static str, min: u64, max: u64 },

    #[error("no user agents configured")]
    NoUserAgents,
}

impl RunConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Zero { field: "run.chunk_size" });
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Zero { field: "run.max_concurrency" });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero { field: "run.max_attempts" });
        }
        check_range("run.request_delay_ms", self.request_delay_ms)?;
        check_range("run.chunk_delay_ms", self.chunk_delay_ms)?;
        Ok(())
    }
}

impl ChallengeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::Zero { field: "challenge.max_rounds" });
        }
        if self.captcha_attempts == 0 {
            return Err(ConfigError::Zero { field: "challenge.captcha_attempts" });
        }
        check_range("challenge.settle_ms", self.settle_ms)
    }
}

fn check_range(field: &'static str, (min, max): (u64, u64)) -> Result<(), ConfigError> {
    if min > max {
        return Err(ConfigError::InvertedRange { field, min, max });
    }
    Ok(())
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            run: RunConfig {
                chunk_size: 100,
                max_concurrency: 5,
                navigation_timeout_ms: 45_000,
                max_attempts: 3,
                request_delay_ms: (1_000, 3_000),
                chunk_delay_ms: (10_000, 20_000),
                backoff_base_ms: 2_500,
                backoff_cap_ms: 20_000,
            },
            challenge: ChallengeSettings {
                max_rounds: 3,
                probe_attempts: 3,
                probe_interval_ms: 1_000,
                captcha_attempts: 2,
                settle_ms: (1_500, 2_500),
                timeout_ms: 60_000,
            },
            browser: BrowserSettings {
                webdriver_url: "http://localhost:4444".to_string(),
                headless: true,
                locale: "fr-FR".to_string(),
                viewport: Viewport {
                    width: 1280,
                    height: 800,
                },
                user_agents: vec![
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36".to_string(),
                    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36".to_string(),
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0".to_string(),
                    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:126.0) Gecko/20100101 Firefox/126.0".to_string(),
                ],
                behavior: BrowserBehavior {
                    click_delay: (100, 300),
                    typing_speed: (50, 150),
                },
            },
            ocr: OcrSettings {
                endpoint: "http://localhost:5000/solve".to_string(),
                timeout_secs: 30,
            },
        }
    }
}

impl GraderConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "availability-grader", "availability-grader") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        path.push("profiles");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        path.pop();
        path
    }

    /// Check every section before a run starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run.validate()?;
        self.challenge.validate()?;
        if self.browser.user_agents.is_empty() {
            return Err(ConfigError::NoUserAgents);
        }
        Ok(())
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_path = Self::config_dir().join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        if profile == "default" {
            return Self::load_default();
        }

        let profile_path = Self::config_dir().join("profiles").join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_path = Self::config_dir().join("default.yaml");
        self.save_to_file(&config_path)
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let profile_path = Self::config_dir().join("profiles").join(format!("{}.yaml", profile));
        self.save_to_file(&profile_path)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let profiles_dir = Self::config_dir().join("profiles");

        if !profiles_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(profiles_dir)? {
            let path = entry?.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }
}
