//! # Rusty-Agora Binary
//!
//! Wires the SQLite store and the HTTP text generators into the engine and
//! exposes the scheduler plus the moderation and feed operations as
//! subcommands.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use ra_config::{LogFormat, LoggingSettings, ProviderKind, ProviderSettings, Settings};
use ra_core::{AgentProfile, PersistenceStore, RiskLevel, TextGenerationPort, VoteValue};
use ra_db_sqlite::SqliteStore;
use ra_engine::{DebateOrchestrator, FeedRanker, ModerationGate, Orchestrator, RetryingGenerator};
use ra_llm_http::{AnthropicMessagesClient, OpenAiChatClient, ProviderOptions};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Slack on top of the engine's per-attempt timeout for the HTTP client.
const TRANSPORT_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "rusty-agora")]
#[command(about = "Agent content orchestration: debates, replies, moderation and feeds")]
struct Cli {
    /// Settings file (defaults to ./rusty-agora.toml when present)
    #[arg(short, long, env = "RUSTY_AGORA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run scheduler ticks on the configured interval until Ctrl-C
    Run,
    /// Run a single tick and print its report
    Tick {
        /// Seed the selection RNG for a reproducible tick
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Apply pending database migrations
    Migrate,
    /// Create or update personas from a JSON array
    Seed { file: PathBuf },
    /// List pending moderation actions, oldest first
    Queue {
        workspace: Uuid,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Publish a pending action
    Approve { action_id: Uuid },
    /// Block a pending action
    Reject {
        action_id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Print the ranked feed of a workspace
    Feed {
        workspace: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Run a debate on a post with explicit participants
    Debate {
        workspace: Uuid,
        post: Uuid,
        #[arg(long = "agent", required = true)]
        agents: Vec<Uuid>,
        #[arg(long, default_value_t = 2)]
        rounds: usize,
        /// Publish immediately instead of queueing for review
        #[arg(long)]
        publish: bool,
    },
    /// Close the debate on a post
    CloseDebate { post: Uuid },
    /// Cast, flip or remove a vote
    Vote {
        user: Uuid,
        post: Uuid,
        #[arg(value_enum)]
        direction: Direction,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Direction {
    Up,
    Down,
}

impl From<Direction> for VoteValue {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => VoteValue::Up,
            Direction::Down => VoteValue::Down,
        }
    }
}

/// One persona in a seed file. Missing ids are generated.
#[derive(Debug, Deserialize)]
struct SeedAgent {
    id: Option<Uuid>,
    workspace_id: Uuid,
    display_name: String,
    handle: String,
    #[serde(default)]
    topics: BTreeSet<String>,
    #[serde(default)]
    style: String,
    risk_level: Option<RiskLevel>,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default)]
    shadow_banned: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl SeedAgent {
    fn into_profile(self) -> AgentProfile {
        AgentProfile {
            id: self.id.unwrap_or_else(Uuid::now_v7),
            workspace_id: self.workspace_id,
            display_name: self.display_name,
            handle: self.handle,
            topics: self.topics.iter().map(|t| t.trim().to_lowercase()).collect(),
            style: self.style,
            risk_level: self.risk_level.unwrap_or(RiskLevel::Low),
            enabled: self.enabled,
            shadow_banned: self.shadow_banned,
            created_at: Utc::now(),
        }
    }
}

fn parse_seed(json: &str) -> anyhow::Result<Vec<AgentProfile>> {
    let agents: Vec<SeedAgent> = serde_json::from_str(json).context("seed file is not a JSON array of agents")?;
    Ok(agents.into_iter().map(SeedAgent::into_profile).collect())
}

fn init_tracing(logging: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn build_provider(
    settings: &ProviderSettings,
    timeout: Duration,
) -> anyhow::Result<Arc<dyn TextGenerationPort>> {
    let mut options = ProviderOptions::new(&settings.base_url, &settings.model);
    if let Some(key) = &settings.api_key {
        options = options.with_api_key(key.clone());
    }
    options.temperature = settings.temperature;
    options.max_tokens = settings.max_tokens;
    options.request_timeout = timeout + TRANSPORT_GRACE;

    let port: Arc<dyn TextGenerationPort> = match settings.kind {
        ProviderKind::OpenAi => Arc::new(OpenAiChatClient::new(options)?),
        ProviderKind::Anthropic => Arc::new(AnthropicMessagesClient::new(options)?),
    };
    Ok(port)
}

fn build_generator(settings: &Settings) -> anyhow::Result<Arc<dyn TextGenerationPort>> {
    let policy = settings.generation.retry_policy();
    let primary = build_provider(&settings.generation.primary, policy.timeout)
        .context("failed to build the primary provider")?;
    let mut generator = RetryingGenerator::new(primary, policy.clone());
    if let Some(fallback) = &settings.generation.fallback {
        let fallback = build_provider(fallback, policy.timeout)
            .context("failed to build the fallback provider")?;
        generator = generator.with_fallback(fallback);
    }
    info!(generator = %generator.name(), "text generation ready");
    Ok(Arc::new(generator))
}

async fn open_store(settings: &Settings) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::connect(&settings.database.url, settings.database.max_connections)
        .await
        .with_context(|| format!("cannot open database {}", settings.database.url))?;
    Ok(Arc::new(store))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_forever(orchestrator: Orchestrator, every: Duration) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(every);
    // A slow tick delays the next one instead of queueing a burst.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(every_secs = every.as_secs(), "scheduler started");
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = orchestrator.run_tick().await;
                if report.errors > 0 {
                    warn!(errors = report.errors, "tick finished with errors");
                }
                debug!(?report, "tick report");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    Settings::load(path).context("failed to load settings")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;
    init_tracing(&settings.logging);

    match cli.command {
        Command::Run => {
            settings.validate()?;
            let store = open_store(&settings).await?;
            let orchestrator =
                Orchestrator::new(store, build_generator(&settings)?, settings.scheduler.tick_config());
            run_forever(orchestrator, settings.scheduler.interval()).await?;
        }
        Command::Tick { seed } => {
            settings.validate()?;
            let store = open_store(&settings).await?;
            let generator = build_generator(&settings)?;
            let config = settings.scheduler.tick_config();
            let orchestrator = match seed {
                Some(seed) => Orchestrator::seeded(store, generator, config, seed),
                None => Orchestrator::new(store, generator, config),
            };
            print_json(&orchestrator.run_tick().await)?;
        }
        Command::Migrate => {
            // Connecting applies migrations.
            open_store(&settings).await?;
            info!(url = %settings.database.url, "migrations applied");
        }
        Command::Seed { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let store = open_store(&settings).await?;
            let agents = parse_seed(&json)?;
            for agent in &agents {
                store
                    .insert_agent(agent)
                    .await
                    .with_context(|| format!("cannot seed @{}", agent.handle))?;
                info!(agent = %agent.id, handle = %agent.handle, "agent seeded");
            }
            println!("seeded {} agents", agents.len());
        }
        Command::Queue { workspace, limit } => {
            let gate = ModerationGate::new(open_store(&settings).await?);
            print_json(&gate.pending(workspace, limit).await?)?;
        }
        Command::Approve { action_id } => {
            let gate = ModerationGate::new(open_store(&settings).await?);
            print_json(&gate.approve(action_id).await?.action)?;
        }
        Command::Reject { action_id, reason } => {
            let gate = ModerationGate::new(open_store(&settings).await?);
            print_json(&gate.reject_with_reason(action_id, reason).await?.action)?;
        }
        Command::Feed { workspace, limit } => {
            let ranker = FeedRanker::new(open_store(&settings).await?);
            print_json(&ranker.rank(workspace, limit).await?)?;
        }
        Command::Debate { workspace, post, agents, rounds, publish } => {
            let store = open_store(&settings).await?;
            let debates = DebateOrchestrator::new(store, build_generator(&settings)?);
            print_json(&debates.spawn_debate(workspace, post, &agents, rounds, publish).await?)?;
        }
        Command::CloseDebate { post } => {
            let store = open_store(&settings).await?;
            let debates = DebateOrchestrator::new(store, build_generator(&settings)?);
            debates.close_debate(post).await?;
            println!("debate on {post} closed");
        }
        Command::Vote { user, post, direction } => {
            let store = open_store(&settings).await?;
            if store.find_post(post).await?.is_none() {
                anyhow::bail!("post {post} not found");
            }
            print_json(&store.upsert_vote(user, post, direction.into()).await?)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_debate_takes_repeated_agents() {
        let (ws, post, a, b) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        let cli = Cli::try_parse_from([
            "rusty-agora".to_string(),
            "debate".into(),
            ws.to_string(),
            post.to_string(),
            "--agent".into(),
            a.to_string(),
            "--agent".into(),
            b.to_string(),
            "--publish".into(),
        ])
        .unwrap();
        match cli.command {
            Command::Debate { agents, rounds, publish, .. } => {
                assert_eq!(agents, vec![a, b]);
                assert_eq!(rounds, 2);
                assert!(publish);
            }
            _ => panic!("expected the debate subcommand"),
        }
    }

    #[test]
    fn test_provider_key_reaches_the_client() {
        let keyed: ProviderSettings = serde_json::from_str(
            r#"{"kind": "anthropic", "base_url": "https://api.anthropic.com", "model": "m", "api_key": "sk-cli"}"#,
        )
        .unwrap();
        assert!(build_provider(&keyed, Duration::from_secs(1)).is_ok());

        let keyless = ProviderSettings { api_key: None, ..keyed };
        assert!(build_provider(&keyless, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_seed_file_defaults() {
        let ws = Uuid::now_v7();
        let json = format!(
            r#"[{{"workspace_id": "{ws}", "display_name": "Ada", "handle": "ada", "topics": ["Rust", " SQL "]}}]"#
        );
        let agents = parse_seed(&json).unwrap();
        assert_eq!(agents.len(), 1);
        let ada = &agents[0];
        assert!(ada.enabled);
        assert!(!ada.shadow_banned);
        assert_eq!(ada.risk_level, RiskLevel::Low);
        assert!(ada.topics.contains("rust"));
        assert!(ada.topics.contains("sql"));
        assert!(parse_seed("{}").is_err());
    }
}
