//! Configuration types for the bot.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::dispatch::RateLimitConfig;
use crate::error::{BotError, Result};

/// Top-level bot configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Discord credentials and gateway behavior.
    pub discord: DiscordConfig,
    /// Message templates.
    pub messages: MessageTemplates,
    /// Timing of the scheduled nudges.
    pub scheduler: SchedulerConfig,
    /// Roster database location.
    pub store: StoreConfig,
    /// Log filtering and optional file output.
    pub logging: LoggingConfig,
    /// Outbound message rate limits.
    pub rate_limit: RateLimitConfig,
}

/// Discord connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token. Usually supplied through `NUDGE_BOT_TOKEN`.
    pub bot_token: String,
    /// REST API root.
    pub api_base_url: String,
    /// Fixed gateway URL. When `None` it is discovered via `GET /gateway/bot`.
    pub gateway_url: Option<String>,
    /// Role IDs whose holders count as admins.
    pub admin_role_ids: Vec<String>,
    /// Role name whose holders count as admins (case-insensitive).
    pub admin_role_name: Option<String>,
    /// "Playing" status shown on the bot's profile. Empty disables it.
    pub activity: String,
    /// Name the bot introduces itself with in `help`.
    pub bot_name: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: "https://discord.com/api/v10".to_owned(),
            gateway_url: None,
            admin_role_ids: Vec::new(),
            admin_role_name: Some("Admin".to_owned()),
            activity: "Shisha / Hookah".to_owned(),
            bot_name: "Nudge".to_owned(),
        }
    }
}

/// Text templates used for scheduled nudges and command replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplates {
    /// Sent to the randomly picked member each cycle.
    pub default: String,
    /// Reply to `start`.
    pub yes: String,
    /// Reply to `stop`.
    pub no: String,
    /// Reply to `enable`.
    pub activate: String,
    /// Reply to `disable`.
    pub deactivate: String,
    /// Reply when a privileged command is refused.
    pub denied: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            default: "Shisha tonight?".to_owned(),
            yes: "You're back on the list.".to_owned(),
            no: "You will not get any more invitations. Send `start` to opt back in.".to_owned(),
            activate: "Invitations enabled.".to_owned(),
            deactivate: "Invitations disabled.".to_owned(),
            denied: "Error: Insufficient permissions.".to_owned(),
        }
    }
}

/// Scheduled nudge timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound (exclusive) of the random delay before each cycle.
    pub max_wait_secs: u64,
    /// Period of the coarse re-arm tick.
    pub rearm_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: 86_400,
            rearm_interval_secs: 3_600,
        }
    }
}

/// Roster database settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database path. Defaults to [`crate::app_dirs::database_file`].
    pub database_path: Option<PathBuf>,
}

impl StoreConfig {
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(crate::app_dirs::database_file)
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for daily rolling log files. `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "nudge=info".to_owned(),
            log_dir: None,
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| BotError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| BotError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path (`config_dir()/config.toml`).
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_file()
    }

    /// Apply `NUDGE_*` environment variables on top of file values.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric override does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::apply_env_overrides`] with an explicit lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric override does not parse.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("NUDGE_BOT_TOKEN") {
            self.discord.bot_token = strip_quotes(&token).to_owned();
        }

        let templates = [
            ("NUDGE_DEFAULT_MESSAGE", &mut self.messages.default),
            ("NUDGE_YES_MESSAGE", &mut self.messages.yes),
            ("NUDGE_NO_MESSAGE", &mut self.messages.no),
        ];
        for (key, slot) in templates {
            if let Some(value) = lookup(key) {
                *slot = strip_quotes(&value).to_owned();
            }
        }

        if let Some(value) = lookup("NUDGE_MAX_WAIT_SECS") {
            self.scheduler.max_wait_secs = parse_secs("NUDGE_MAX_WAIT_SECS", &value)?;
        }
        if let Some(value) = lookup("NUDGE_REARM_INTERVAL_SECS") {
            self.scheduler.rearm_interval_secs = parse_secs("NUDGE_REARM_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = lookup("NUDGE_DATABASE_PATH") {
            self.store.database_path = Some(PathBuf::from(strip_quotes(&value)));
        }
        Ok(())
    }

    /// Problems that prevent the bot from starting.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.discord.bot_token.trim().is_empty() {
            problems.push("discord.bot_token is empty (set NUDGE_BOT_TOKEN)".to_owned());
        }
        if self.scheduler.max_wait_secs == 0 {
            problems.push("scheduler.max_wait_secs must be greater than zero".to_owned());
        }
        if self.scheduler.rearm_interval_secs == 0 {
            problems.push("scheduler.rearm_interval_secs must be greater than zero".to_owned());
        }
        if self.messages.default.trim().is_empty() {
            problems.push("messages.default is empty".to_owned());
        }
        problems
    }
}

/// Removes one layer of surrounding quote characters left over from shell
/// or `.env` quoting.
fn strip_quotes(value: &str) -> &str {
    let trimmed = value.trim();
    for quote in ['"', '\'', '`'] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    trimmed
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    strip_quotes(value)
        .parse()
        .map_err(|e| BotError::Config(format!("{key}: {e}")))
}
