//! # Settings
//!
//! Layered configuration: compiled defaults, then an optional TOML file,
//! then `RUSTY_AGORA__SECTION__KEY` environment variables. A `.env` file is
//! loaded into the environment first.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, Source};
use ra_engine::{RetryPolicy, TickConfig};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Looked up in the working directory when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "rusty-agora";
const ENV_PREFIX: &str = "RUSTY_AGORA";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] ConfigError),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid { field, reason: reason.into() }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub scheduler: SchedulerSettings,
    pub generation: GenerationSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { url: "sqlite://rusty-agora.db".to_string(), max_connections: 5 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub interval_secs: u64,
    pub workspace_ids: Vec<Uuid>,
    pub max_posts_per_tick: usize,
    pub debate_rounds: usize,
    pub participants_per_debate: usize,
    pub allowed_agent_ids: Option<Vec<Uuid>>,
    pub spawn_probability: f64,
    pub post_probability: f64,
    pub auto_publish: bool,
    pub max_replies_per_comment: usize,
    pub human_reply_window_minutes: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            workspace_ids: Vec::new(),
            max_posts_per_tick: 5,
            debate_rounds: 2,
            participants_per_debate: 3,
            allowed_agent_ids: None,
            spawn_probability: 0.5,
            post_probability: 0.1,
            auto_publish: false,
            max_replies_per_comment: 2,
            human_reply_window_minutes: 60,
        }
    }
}

impl SchedulerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn tick_config(&self) -> TickConfig {
        TickConfig {
            workspace_ids: self.workspace_ids.clone(),
            max_posts_per_tick: self.max_posts_per_tick,
            debate_rounds: self.debate_rounds,
            participants_per_debate: self.participants_per_debate,
            allowed_agent_ids: self.allowed_agent_ids.clone(),
            spawn_probability: self.spawn_probability,
            post_probability: self.post_probability,
            auto_publish: self.auto_publish,
            max_replies_per_comment: self.max_replies_per_comment,
            human_reply_window: chrono::Duration::minutes(i64::from(self.human_reply_window_minutes)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for ProviderSettings {
    /// A local Ollama server.
    fn default() -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3.1".to_string(),
            api_key: None,
            temperature: Some(0.8),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub primary: ProviderSettings,
    pub fallback: Option<ProviderSettings>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            primary: ProviderSettings::default(),
            fallback: None,
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

impl GenerationSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            timeout: Duration::from_secs(self.timeout_secs),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { format: LogFormat::Pretty, filter: "info".to_string() }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("scheduler.workspace_ids")
        .with_list_parse_key("scheduler.allowed_agent_ids")
        .try_parsing(true)
}

fn assemble(
    file: impl Source + Send + Sync + 'static,
    env: Environment,
) -> Result<Settings, SettingsError> {
    let settings = Config::builder()
        .add_source(file)
        .add_source(env)
        .build()?
        .try_deserialize::<Settings>()?;
    Ok(settings)
}

impl Settings {
    /// Loads `.env`, then `path` (required) or `rusty-agora.{toml,yaml,json}`
    /// (optional), then the environment. Does not validate.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        if let Ok(dotenv) = dotenvy::dotenv() {
            debug!(path = %dotenv.display(), "loaded .env");
        }
        let settings = match path {
            Some(path) => assemble(File::from(path).required(true), environment())?,
            None => assemble(File::with_name(DEFAULT_CONFIG_FILE).required(false), environment())?,
        };
        Ok(settings)
    }

    /// Checks the settings a scheduler tick depends on.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let s = &self.scheduler;
        if s.workspace_ids.is_empty() {
            return Err(invalid("scheduler.workspace_ids", "at least one workspace is required"));
        }
        for (field, p) in [
            ("scheduler.spawn_probability", s.spawn_probability),
            ("scheduler.post_probability", s.post_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(field, format!("{p} is outside [0, 1]")));
            }
        }
        if s.debate_rounds == 0 {
            return Err(invalid("scheduler.debate_rounds", "must be at least 1"));
        }
        if s.participants_per_debate == 0 {
            return Err(invalid("scheduler.participants_per_debate", "must be at least 1"));
        }
        if s.interval_secs == 0 {
            return Err(invalid("scheduler.interval_secs", "must be at least 1"));
        }
        if self.generation.timeout_secs == 0 {
            return Err(invalid("generation.timeout_secs", "must be at least 1"));
        }
        validate_provider("generation.primary", &self.generation.primary)?;
        if let Some(fallback) = &self.generation.fallback {
            validate_provider("generation.fallback", fallback)?;
        }
        Ok(())
    }
}

fn validate_provider(field: &'static str, provider: &ProviderSettings) -> Result<(), SettingsError> {
    if provider.base_url.trim().is_empty() || provider.model.trim().is_empty() {
        return Err(invalid(field, "base_url and model are required"));
    }
    if provider.kind == ProviderKind::Anthropic && provider.api_key.is_none() {
        return Err(invalid(field, "the anthropic provider needs an api_key"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use config::FileFormat;
    use secrecy::ExposeSecret;

    use super::*;

    const WS: &str = "0191e3c4-0000-7000-8000-000000000001";

    fn from_toml(toml: &str, env: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> =
            env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        assemble(File::from_str(toml, FileFormat::Toml), environment().source(Some(vars))).unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let settings = from_toml("", &[]);
        assert_eq!(settings.scheduler.debate_rounds, 2);
        assert_eq!(settings.generation.primary.kind, ProviderKind::OpenAi);
        assert_eq!(settings.logging.format, LogFormat::Pretty);
        // no workspaces configured yet
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_file_and_environment_layers() {
        let toml = format!(
            r#"
            [scheduler]
            workspace_ids = ["{WS}"]
            debate_rounds = 3
            auto_publish = true

            [generation.primary]
            kind = "anthropic"
            base_url = "https://api.anthropic.com/v1"
            model = "claude-test"
            api_key = "sk-file"

            [logging]
            format = "json"
            "#
        );
        let settings = from_toml(
            &toml,
            &[
                ("RUSTY_AGORA__SCHEDULER__DEBATE_ROUNDS", "4"),
                ("RUSTY_AGORA__SCHEDULER__SPAWN_PROBABILITY", "0.25"),
            ],
        );

        assert_eq!(settings.scheduler.debate_rounds, 4);
        assert!(settings.scheduler.auto_publish);
        assert_eq!(settings.logging.format, LogFormat::Json);
        let key = settings.generation.primary.api_key.as_ref().unwrap();
        assert_eq!(key.expose_secret(), "sk-file");
        settings.validate().unwrap();

        let tick = settings.scheduler.tick_config();
        assert_eq!(tick.workspace_ids, vec![WS.parse::<Uuid>().unwrap()]);
        assert_eq!(tick.spawn_probability, 0.25);
        assert_eq!(tick.human_reply_window, chrono::Duration::minutes(60));
    }

    #[test]
    fn test_workspace_list_from_environment() {
        let other = "0191e3c4-0000-7000-8000-000000000002";
        let settings = from_toml("", &[("RUSTY_AGORA__SCHEDULER__WORKSPACE_IDS", &format!("{WS},{other}"))]);
        assert_eq!(settings.scheduler.workspace_ids.len(), 2);
        settings.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let base = format!("[scheduler]\nworkspace_ids = [\"{WS}\"]\n");
        let cases = [
            ("spawn_probability = 1.5", "scheduler.spawn_probability"),
            ("post_probability = -0.1", "scheduler.post_probability"),
            ("debate_rounds = 0", "scheduler.debate_rounds"),
        ];
        for (line, field) in cases {
            let settings = from_toml(&format!("{base}{line}\n"), &[]);
            match settings.validate() {
                Err(SettingsError::Invalid { field: f, .. }) => assert_eq!(f, field),
                other => panic!("{line}: expected invalid {field}, got {other:?}"),
            }
        }

        let anthropic_without_key = format!(
            "{base}[generation.primary]\nkind = \"anthropic\"\nbase_url = \"https://x\"\nmodel = \"m\"\n"
        );
        assert!(from_toml(&anthropic_without_key, &[]).validate().is_err());
    }

    #[test]
    fn test_retry_policy_conversion() {
        let settings = from_toml("[generation]\nmax_retries = 5\nbackoff_base_ms = 100\n", &[]);
        let policy = settings.generation.retry_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff_base, Duration::from_millis(100));
        assert_eq!(policy.timeout, Duration::from_secs(30));
    }
}
