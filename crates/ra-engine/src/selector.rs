//! # AgentSelector
//!
//! Scores personas for two decisions: who authors the next post, and who
//! joins a debate on a given post. Scoring is split into pure functions
//! over pre-loaded signals (`pick_*`) and async loaders that read the
//! store, so the arithmetic is testable with a seeded RNG.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use ra_core::{
    AgentFilter, AgentProfile, AppError, AuthorType, CommentQuery, PersistenceStore, Post,
    PostQuery, Result,
};
use tracing::debug;
use uuid::Uuid;

/// Post-count and last-post window for authorship scoring.
pub const POST_WINDOW_DAYS: i64 = 7;
/// Topic-usage window for the diversity factor.
pub const TOPIC_WINDOW_HOURS: i64 = 48;
/// Comment-count window for debate recency.
pub const COMMENT_WINDOW_HOURS: i64 = 2;
/// Authors are drawn uniformly from this many top scorers.
pub const AUTHOR_POOL_SIZE: usize = 10;

const MAX_RECENCY: f64 = 5.0;
const SIGNAL_SCAN_LIMIT: usize = 1_000;

/// Per-agent posting activity plus workspace topic usage.
#[derive(Debug, Clone, Default)]
pub struct AuthorSignals {
    pub post_counts: HashMap<Uuid, u32>,
    pub last_post_at: HashMap<Uuid, DateTime<Utc>>,
    pub topic_usage: HashMap<String, u32>,
}

impl AuthorSignals {
    /// Builds signals from agent-authored posts of the last
    /// [`POST_WINDOW_DAYS`]. Every post newer than [`TOPIC_WINDOW_HOURS`]
    /// adds one use to each topic of its author.
    pub fn from_posts(posts: &[Post], agents: &[AgentProfile], now: DateTime<Utc>) -> Self {
        let topics_by_agent: HashMap<Uuid, &AgentProfile> =
            agents.iter().map(|a| (a.id, a)).collect();
        let topic_cutoff = now - Duration::hours(TOPIC_WINDOW_HOURS);
        let mut signals = Self::default();

        for post in posts {
            let Some(agent_id) = post.author.agent_id() else {
                continue;
            };
            *signals.post_counts.entry(agent_id).or_default() += 1;
            signals
                .last_post_at
                .entry(agent_id)
                .and_modify(|last| *last = (*last).max(post.created_at))
                .or_insert(post.created_at);

            if post.created_at >= topic_cutoff {
                if let Some(agent) = topics_by_agent.get(&agent_id) {
                    for topic in &agent.topics {
                        *signals.topic_usage.entry(topic.to_lowercase()).or_default() += 1;
                    }
                }
            }
        }
        signals
    }
}

/// Deterministic part of the authorship score (everything but the random factor).
pub fn author_base_score(agent: &AgentProfile, signals: &AuthorSignals, now: DateTime<Utc>) -> f64 {
    let recency = match signals.last_post_at.get(&agent.id) {
        None => MAX_RECENCY,
        Some(last) => {
            let hours = (now - *last).num_seconds().max(0) as f64 / 3600.0;
            (hours / 24.0).min(MAX_RECENCY)
        }
    };
    let recent_posts = f64::from(signals.post_counts.get(&agent.id).copied().unwrap_or(0));
    let volume = 1.0 / (1.0 + recent_posts * 0.3);
    let usage: u32 = agent
        .topics
        .iter()
        .map(|t| signals.topic_usage.get(&t.to_lowercase()).copied().unwrap_or(0))
        .sum();
    let diversity = 1.0 / (1.0 + f64::from(usage) * 0.2);
    recency * volume * diversity
}

/// Scores every selectable candidate, keeps the top [`AUTHOR_POOL_SIZE`]
/// and picks one of them uniformly.
pub fn pick_post_author<R: Rng>(
    workspace_id: Uuid,
    candidates: &[AgentProfile],
    signals: &AuthorSignals,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<AgentProfile> {
    let mut scored: Vec<(f64, &AgentProfile)> = candidates
        .iter()
        .filter(|a| a.is_selectable())
        .map(|a| (author_base_score(a, signals, now) * rng.random_range(0.5..1.5), a))
        .collect();
    if scored.is_empty() {
        return Err(AppError::NoEligibleAgents(workspace_id));
    }

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(AUTHOR_POOL_SIZE);
    let (score, agent) = scored[rng.random_range(0..scored.len())];
    debug!(agent = %agent.handle, score, pool = scored.len(), "selected post author");
    Ok(agent.clone())
}

/// Per-post debate history plus recent comment volume per agent.
#[derive(Debug, Clone, Default)]
pub struct DebateSignals {
    pub already_commented: HashSet<Uuid>,
    pub recent_comment_counts: HashMap<Uuid, u32>,
}

/// Lowercase alphanumeric runs of a title. Anything else, `-` and `_`
/// included, separates words.
pub fn title_words(title: &str) -> HashSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn style_tag(agent: &AgentProfile) -> String {
    let style = agent.style.trim().to_lowercase();
    if style.is_empty() {
        "default".to_string()
    } else {
        style
    }
}

/// Greedy debate selection: after each pick the remaining candidates are
/// re-scored so a repeated style tag halves their score.
pub fn pick_debate_participants<R: Rng>(
    workspace_id: Uuid,
    candidates: &[AgentProfile],
    post: &Post,
    signals: &DebateSignals,
    n: usize,
    rng: &mut R,
) -> Result<Vec<AgentProfile>> {
    if n == 0 {
        return Err(AppError::ValidationError("participant count must be at least 1".into()));
    }
    let words = title_words(&post.title);

    let mut remaining: Vec<(f64, &AgentProfile)> = candidates
        .iter()
        .filter(|a| a.is_selectable())
        .map(|agent| {
            let overlap = agent
                .topics
                .iter()
                .filter(|t| words.contains(&t.to_lowercase()))
                .count();
            let topic_score = 1.0 + 0.5 * overlap as f64;
            let already_penalty = if signals.already_commented.contains(&agent.id) {
                0.1
            } else {
                1.0
            };
            let recent = f64::from(signals.recent_comment_counts.get(&agent.id).copied().unwrap_or(0));
            let recency = 1.0 / (1.0 + recent * 0.2);
            let base = topic_score * already_penalty * recency * rng.random_range(0.6..1.4);
            (base, agent)
        })
        .collect();
    if remaining.is_empty() {
        return Err(AppError::NoEligibleAgents(workspace_id));
    }

    let mut chosen_styles: HashSet<String> = HashSet::new();
    let mut chosen = Vec::with_capacity(n.min(remaining.len()));
    while chosen.len() < n && !remaining.is_empty() {
        let score_of = |(base, agent): &(f64, &AgentProfile)| {
            if chosen_styles.contains(&style_tag(agent)) {
                base * 0.5
            } else {
                *base
            }
        };
        let best = remaining
            .iter()
            .enumerate()
            .max_by(|x, y| score_of(x.1).total_cmp(&score_of(y.1)))
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        let (_, agent) = remaining.remove(best);
        chosen_styles.insert(style_tag(agent));
        chosen.push(agent.clone());
    }
    Ok(chosen)
}

/// Loads selection signals from the store and delegates to the pure pickers.
pub struct AgentSelector {
    store: Arc<dyn PersistenceStore>,
}

impl AgentSelector {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self { store }
    }

    /// Eligible agents, re-checked against the selectability invariant.
    pub async fn eligible(&self, workspace_id: Uuid, filter: &AgentFilter) -> Result<Vec<AgentProfile>> {
        let agents = self.store.find_agents_eligible(workspace_id, filter).await?;
        Ok(agents.into_iter().filter(AgentProfile::is_selectable).collect())
    }

    pub async fn author_signals(
        &self,
        workspace_id: Uuid,
        agents: &[AgentProfile],
        now: DateTime<Utc>,
    ) -> Result<AuthorSignals> {
        let query = PostQuery::default()
            .authored_by(AuthorType::Agent)
            .since(now - Duration::days(POST_WINDOW_DAYS))
            .limit(SIGNAL_SCAN_LIMIT);
        let posts = self.store.find_recent_posts(workspace_id, &query).await?;
        Ok(AuthorSignals::from_posts(&posts, agents, now))
    }

    pub async fn debate_signals(
        &self,
        workspace_id: Uuid,
        post_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DebateSignals> {
        let on_post = self
            .store
            .find_recent_comments(
                workspace_id,
                &CommentQuery::on_post(post_id).authored_by(AuthorType::Agent),
            )
            .await?;
        let recent = self
            .store
            .find_recent_comments(
                workspace_id,
                &CommentQuery::default()
                    .authored_by(AuthorType::Agent)
                    .since(now - Duration::hours(COMMENT_WINDOW_HOURS))
                    .limit(SIGNAL_SCAN_LIMIT),
            )
            .await?;

        let mut signals = DebateSignals {
            already_commented: on_post.iter().map(|c| c.author_id).collect(),
            ..DebateSignals::default()
        };
        for comment in &recent {
            *signals.recent_comment_counts.entry(comment.author_id).or_default() += 1;
        }
        Ok(signals)
    }

    pub async fn select_post_author<R: Rng + Send>(
        &self,
        workspace_id: Uuid,
        filter: &AgentFilter,
        rng: &mut R,
    ) -> Result<AgentProfile> {
        let now = Utc::now();
        let agents = self.eligible(workspace_id, filter).await?;
        if agents.is_empty() {
            return Err(AppError::NoEligibleAgents(workspace_id));
        }
        let signals = self.author_signals(workspace_id, &agents, now).await?;
        pick_post_author(workspace_id, &agents, &signals, now, rng)
    }

    pub async fn select_debate_participants<R: Rng + Send>(
        &self,
        workspace_id: Uuid,
        post: &Post,
        n: usize,
        filter: &AgentFilter,
        rng: &mut R,
    ) -> Result<Vec<AgentProfile>> {
        let now = Utc::now();
        let agents = self.eligible(workspace_id, filter).await?;
        if agents.is_empty() {
            return Err(AppError::NoEligibleAgents(workspace_id));
        }
        let signals = self.debate_signals(workspace_id, post.id, now).await?;
        pick_debate_participants(workspace_id, &agents, post, &signals, n, rng)
    }
}
