//! Bugwarden configuration system.

use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{BugwardenError, Result};
use crate::types::{RecordQuery, RecordUpdate};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BugwardenConfig {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Group name → member tokens. A token is a literal recipient or
    /// `group:<name>`.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub workflows: Vec<WorkflowConfig>,
    #[serde(default)]
    pub escalations: Vec<EscalationConfig>,
}

impl BugwardenConfig {
    /// Load config from the default path (~/.bugwarden/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BugwardenError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse and validate TOML content.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| BugwardenError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| BugwardenError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Bugwarden home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".bugwarden")
    }

    /// Structural checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let jobs = self
            .workflows
            .iter()
            .map(|w| (&w.name, &w.schedules))
            .chain(self.escalations.iter().map(|e| (&e.name, &e.schedules)));
        for (name, schedules) in jobs {
            if name.trim().is_empty() {
                return Err(BugwardenError::Config("job with empty name".into()));
            }
            if !names.insert(name.as_str()) {
                return Err(BugwardenError::Config(format!("duplicate job name '{name}'")));
            }
            if schedules.is_empty() {
                return Err(BugwardenError::Config(format!("job '{name}' has no schedules")));
            }
        }

        for wf in &self.workflows {
            if wf.actions.is_empty() {
                return Err(BugwardenError::Config(format!(
                    "workflow '{}' has no actions",
                    wf.name
                )));
            }
            match &wf.detector {
                DetectorConfig::ContentDiff { field, watch } => {
                    if field.is_empty() || watch.is_empty() {
                        return Err(BugwardenError::Config(format!(
                            "workflow '{}': content_diff needs a field and a non-empty watch list",
                            wf.name
                        )));
                    }
                }
                DetectorConfig::IdWatermark { bootstrap_hours } => check_window(
                    &wf.name,
                    "bootstrap_hours",
                    *bootstrap_hours,
                    TimeDelta::try_hours,
                )?,
                DetectorConfig::TimestampWatermark { lookback_days, .. } => check_window(
                    &wf.name,
                    "lookback_days",
                    *lookback_days,
                    TimeDelta::try_days,
                )?,
                DetectorConfig::ProcessedSet => {}
            }
        }

        for token in self.referenced_groups() {
            if !self.groups.contains_key(token) {
                tracing::warn!("⚠️ Group '{token}' is referenced but not defined; it expands to nobody");
            }
        }
        Ok(())
    }

    fn referenced_groups(&self) -> impl Iterator<Item = &str> {
        let from_groups = self.groups.values().flatten();
        let from_actions = self
            .workflows
            .iter()
            .flat_map(|w| &w.actions)
            .filter_map(|a| match a {
                ActionConfig::Direct { to } => Some(to),
                _ => None,
            })
            .flatten();
        let from_escalations = self.escalations.iter().map(|e| &e.group);
        from_groups
            .chain(from_actions)
            .chain(from_escalations)
            .filter_map(|t| t.strip_prefix(GROUP_PREFIX))
    }
}

/// Prefix marking a member token as a nested group reference.
pub const GROUP_PREFIX: &str = "group:";

fn bool_true() -> bool { true }

/// Issue tracker connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_tracker_timeout")]
    pub request_timeout_secs: u64,
}

fn default_tracker_url() -> String { "https://bugzilla.mozilla.org".into() }
fn default_tracker_timeout() -> u64 { 30 }

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: default_tracker_url(),
            api_key: String::new(),
            request_timeout_secs: default_tracker_timeout(),
        }
    }
}

/// Chat platform connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_chat_api")]
    pub api_base: String,
    #[serde(default)]
    pub token: String,
    /// Used to verify interactive callbacks.
    #[serde(default)]
    pub signing_secret: String,
    #[serde(default = "default_chat_timeout")]
    pub request_timeout_secs: u64,
    /// Budget for a queued interactive action once acknowledged.
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
    /// Chat user id → tracker login, for actions taken on someone's behalf.
    #[serde(default)]
    pub users: BTreeMap<String, String>,
}

fn default_chat_api() -> String { "https://slack.com/api".into() }
fn default_chat_timeout() -> u64 { 10 }
fn default_action_timeout() -> u64 { 60 }

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base: default_chat_api(),
            token: String::new(),
            signing_secret: String::new(),
            request_timeout_secs: default_chat_timeout(),
            action_timeout_secs: default_action_timeout(),
            users: BTreeMap::new(),
        }
    }
}

/// Local state: cache database and cursor database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// `sqlite` or `memory`.
    #[serde(default = "default_cursor_backend")]
    pub cursor_backend: String,
}

fn default_data_dir() -> String { "~/.bugwarden/data".into() }
fn default_cursor_backend() -> String { "sqlite".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cursor_backend: default_cursor_backend(),
        }
    }
}

/// Redirects every side effect away from production.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub tracker_base_url: String,
    #[serde(default)]
    pub tracker_api_key: String,
    /// Every channel post and DM lands here instead.
    #[serde(default)]
    pub chat_channel: String,
}

/// HTTP listener for interactive chat callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String { "127.0.0.1:3030".into() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick")]
    pub tick_secs: u64,
    #[serde(default)]
    pub overlap: OverlapPolicy,
}

fn default_tick() -> u64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick(),
            overlap: OverlapPolicy::default(),
        }
    }
}

/// What to do when a job fires while its previous run is still going.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Drop the new firing.
    #[default]
    Skip,
    /// Wait for the running one, then run.
    Queue,
    /// Run concurrently.
    Allow,
}

/// One reconciliation workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: String,
    /// Cron expressions (5 fields).
    pub schedules: Vec<String>,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub overlap: Option<OverlapPolicy>,
    #[serde(default)]
    pub query: RecordQuery,
    pub detector: DetectorConfig,
    pub actions: Vec<ActionConfig>,
}

/// Change-detection strategy of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorConfig {
    IdWatermark {
        /// First-run lookback instead of a full historical backfill.
        #[serde(default = "default_bootstrap_hours")]
        bootstrap_hours: i64,
    },
    TimestampWatermark {
        /// Fields whose changes count. Empty means any field.
        #[serde(default)]
        fields: Vec<String>,
        #[serde(default = "default_lookback_days")]
        lookback_days: i64,
    },
    ContentDiff {
        field: String,
        watch: Vec<String>,
    },
    ProcessedSet,
}

/// A detector window must be non-negative and reach back to a representable
/// instant.
fn check_window(
    workflow: &str,
    key: &str,
    value: i64,
    to_delta: fn(i64) -> Option<TimeDelta>,
) -> Result<()> {
    let reachable = value >= 0
        && to_delta(value)
            .and_then(|delta| Utc::now().checked_sub_signed(delta))
            .is_some();
    if reachable {
        Ok(())
    } else {
        Err(BugwardenError::Config(format!(
            "workflow '{workflow}': {key} = {value} is out of range"
        )))
    }
}

fn default_bootstrap_hours() -> i64 { 24 }
fn default_lookback_days() -> i64 { 7 }

/// Side-effect step applied to each detected change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionConfig {
    Post {
        channel: String,
        /// Attach a "claim" button that assigns the bug to the clicker.
        #[serde(default)]
        claim_button: bool,
    },
    Direct {
        to: Vec<String>,
    },
    Update {
        #[serde(default)]
        fields: RecordUpdate,
    },
}

/// Periodic per-recipient escalation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    pub name: String,
    pub schedules: Vec<String>,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Group token whose members are counted.
    pub group: String,
    #[serde(default)]
    pub query: RecordQuery,
    #[serde(default)]
    pub count_by: CountBy,
    pub channel: String,
}

/// Which recipient an open record is charged to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountBy {
    #[default]
    Assignee,
    Needinfo,
}
