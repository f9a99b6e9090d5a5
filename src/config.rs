//! Layered configuration: defaults, TOML file, `FCAD_` environment, CLI flags.
//!
//! Extension lists are normalized here exactly once; everything downstream
//! compares bare lower-case extensions without a leading dot.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::{ProjectDirs, UserDirs};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

pub const ENV_PREFIX: &str = "FCAD_";
pub const MAX_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub destination_directory: PathBuf,
    pub state_file: PathBuf,
    pub journal_file: PathBuf,
    pub enable_priority: bool,
    pub copy_only_priority_files: bool,
    /// Start every session from an empty, never-persisted state.
    pub ephemeral_state: bool,
    pub concurrency: usize,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    pub extensions: ExtensionsConfig,
    pub notifications: NotificationConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    pub priority: Vec<String>,
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannelType {
    None,
    Log,
    Slack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub channel: NotificationChannelType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slack_webhook: Option<String>,
    pub after_all_transfers: bool,
    pub after_every_priority: bool,
    pub after_first_priority: bool,
    pub after_last_priority: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    pub stability_window_ms: u64,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            destination_directory: default_destination(),
            state_file: data_dir.join("state.json"),
            journal_file: data_dir.join("journal.db"),
            enable_priority: true,
            copy_only_priority_files: false,
            ephemeral_state: false,
            concurrency: 2,
            simulation: false,
            verbose: false,
            json_logs: false,
            extensions: ExtensionsConfig::default(),
            notifications: NotificationConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            priority: vec![".jpg".to_string(), ".txt".to_string()],
            disabled: vec![".mov".to_string(), ".mp4".to_string()],
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel: NotificationChannelType::Log,
            slack_webhook: None,
            after_all_transfers: true,
            after_every_priority: true,
            after_first_priority: false,
            after_last_priority: false,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            stability_window_ms: 3000,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "fcad")
}

fn default_destination() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("fcad-copies"))
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("fcad.toml"))
}

impl AppConfig {
    /// Load and validate configuration.
    ///
    /// `overrides` is any serializable set of CLI flags; absent fields should be
    /// skipped during serialization so they do not mask lower layers.
    pub fn load<T: Serialize>(config_path: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment
            .extract()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(Error::Configuration(format!(
                "concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.concurrency
            )));
        }

        if self.monitor.poll_interval_ms == 0 {
            return Err(Error::Configuration(
                "monitor.poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.notifications.channel == NotificationChannelType::Slack
            && self
                .notifications
                .slack_webhook
                .as_deref()
                .is_none_or(str::is_empty)
        {
            return Err(Error::Configuration(
                "notifications.channel is 'slack' but no slack_webhook is set".to_string(),
            ));
        }

        self.rules().map(|_| ())
    }

    pub fn rules(&self) -> Result<ExtensionRules> {
        ExtensionRules::new(&self.extensions.priority, &self.extensions.disabled)
    }

    /// Resolve the settings a single orchestration run needs.
    pub fn run_settings(&self) -> Result<RunSettings> {
        Ok(RunSettings {
            destination: self.destination_directory.clone(),
            rules: self.rules()?,
            enable_priority: self.enable_priority,
            copy_only_priority_files: self.copy_only_priority_files,
            concurrency: self.concurrency,
            notifications: self.notifications.clone(),
        })
    }

    /// Write the default configuration if no file exists at `path` yet.
    /// Returns false when a file was already present.
    pub fn write_default(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let content = toml::to_string_pretty(&AppConfig::default())
            .map_err(|e| Error::Configuration(format!("failed to serialize defaults: {}", e)))?;
        std::fs::write(path, content).map_err(|e| Error::io(path, e))?;
        Ok(true)
    }
}

/// Everything the orchestrator needs for one run, resolved before it starts.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub destination: PathBuf,
    pub rules: ExtensionRules,
    pub enable_priority: bool,
    pub copy_only_priority_files: bool,
    pub concurrency: usize,
    pub notifications: NotificationConfig,
}

/// Validated extension configuration.
///
/// Priority order is preserved (index = tier rank); disabled extensions are a
/// plain set and always win over the priority list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtensionRules {
    priority: Vec<String>,
    disabled: HashSet<String>,
}

impl ExtensionRules {
    pub fn new<P, D>(priority: &[P], disabled: &[D]) -> Result<Self>
    where
        P: AsRef<str>,
        D: AsRef<str>,
    {
        let disabled = disabled
            .iter()
            .map(|raw| normalize_extension(raw.as_ref()))
            .collect::<Result<HashSet<_>>>()?;

        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for raw in priority {
            let ext = normalize_extension(raw.as_ref())?;
            if disabled.contains(&ext) {
                warn!(extension = %ext, "Extension is both prioritized and disabled; disabling wins");
                continue;
            }
            if seen.insert(ext.clone()) {
                ordered.push(ext);
            }
        }

        Ok(Self {
            priority: ordered,
            disabled,
        })
    }

    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    pub fn is_disabled(&self, ext: &str) -> bool {
        self.disabled.contains(ext)
    }

    /// Tier rank of a normalized extension, if it is prioritized.
    pub fn rank(&self, ext: &str) -> Option<usize> {
        self.priority.iter().position(|p| p == ext)
    }
}

/// Normalize a configured extension: trim, strip one leading dot, lower-case.
pub fn normalize_extension(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let bare = trimmed.strip_prefix('.').unwrap_or(trimmed);

    if bare.is_empty() {
        return Err(Error::Configuration(format!("empty file extension '{}'", raw)));
    }

    if bare
        .chars()
        .any(|c| c == '.' || c == '/' || c == '\\' || c.is_whitespace())
    {
        return Err(Error::Configuration(format!("malformed file extension '{}'", raw)));
    }

    Ok(bare.to_lowercase())
}
