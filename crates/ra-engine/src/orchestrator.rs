//! # Orchestrator
//!
//! One explicit handle that owns the engine components and runs a tick:
//!
//! 1. maybe compose a new agent post
//! 2. spawn debates on fresh posts
//! 3. answer recent human comments
//!
//! The caller owns the timer. A tick never fails as a whole; step errors are
//! logged and counted in the [`TickReport`].

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ra_core::{
    AgentFilter, AppError, AuthorType, CommentQuery, ContentStatus, DebateStatus,
    PersistenceStore, PostQuery, Result, TextGenerationPort,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::composer::PostComposer;
use crate::debate::DebateOrchestrator;
use crate::moderation::ModerationGate;
use crate::ranking::FeedRanker;
use crate::reply::HumanReplyEvaluator;
use crate::selector::AgentSelector;

/// Scheduler trigger configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TickConfig {
    pub workspace_ids: Vec<Uuid>,
    /// Caps both debate spawns and human comments handled per workspace.
    pub max_posts_per_tick: usize,
    pub debate_rounds: usize,
    pub participants_per_debate: usize,
    /// Restricts every selection to these agents when set.
    pub allowed_agent_ids: Option<Vec<Uuid>>,
    pub spawn_probability: f64,
    pub post_probability: f64,
    pub auto_publish: bool,
    pub max_replies_per_comment: usize,
    pub human_reply_window: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            workspace_ids: Vec::new(),
            max_posts_per_tick: 5,
            debate_rounds: 2,
            participants_per_debate: 3,
            allowed_agent_ids: None,
            spawn_probability: 0.5,
            post_probability: 0.1,
            auto_publish: false,
            max_replies_per_comment: 2,
            human_reply_window: Duration::minutes(60),
        }
    }
}

impl TickConfig {
    fn agent_filter(&self) -> AgentFilter {
        AgentFilter { ids: self.allowed_agent_ids.clone() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub workspaces: usize,
    pub posts_composed: usize,
    pub debates_spawned: usize,
    pub debate_comments: usize,
    pub replies_written: usize,
    pub errors: usize,
}

pub struct Orchestrator {
    store: Arc<dyn PersistenceStore>,
    config: TickConfig,
    rng: Mutex<StdRng>,
    selector: AgentSelector,
    composer: PostComposer,
    debates: DebateOrchestrator,
    replies: HumanReplyEvaluator,
    gate: ModerationGate,
    ranker: FeedRanker,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn PersistenceStore>,
        generator: Arc<dyn TextGenerationPort>,
        config: TickConfig,
    ) -> Self {
        Self::with_rng(store, generator, config, StdRng::from_os_rng())
    }

    /// Deterministic selection and probability rolls, for tests and replays.
    pub fn seeded(
        store: Arc<dyn PersistenceStore>,
        generator: Arc<dyn TextGenerationPort>,
        config: TickConfig,
        seed: u64,
    ) -> Self {
        Self::with_rng(store, generator, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        store: Arc<dyn PersistenceStore>,
        generator: Arc<dyn TextGenerationPort>,
        config: TickConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            selector: AgentSelector::new(store.clone()),
            composer: PostComposer::new(store.clone(), generator.clone()),
            debates: DebateOrchestrator::new(store.clone(), generator.clone()),
            replies: HumanReplyEvaluator::new(store.clone(), generator)
                .auto_publish(config.auto_publish),
            gate: ModerationGate::new(store.clone()),
            ranker: FeedRanker::new(store.clone()),
            store,
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &TickConfig {
        &self.config
    }

    pub fn gate(&self) -> &ModerationGate {
        &self.gate
    }

    pub fn ranker(&self) -> &FeedRanker {
        &self.ranker
    }

    pub fn debates(&self) -> &DebateOrchestrator {
        &self.debates
    }

    pub fn replies(&self) -> &HumanReplyEvaluator {
        &self.replies
    }

    /// A child RNG for one tick, so the lock is released before any await.
    fn tick_rng(&self) -> StdRng {
        let mut root = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        StdRng::from_rng(&mut *root)
    }

    #[instrument(skip(self))]
    pub async fn run_tick(&self) -> TickReport {
        let mut rng = self.tick_rng();
        let mut report = TickReport::default();
        for &workspace_id in &self.config.workspace_ids {
            report.workspaces += 1;
            self.tick_workspace(workspace_id, &mut rng, &mut report).await;
        }
        info!(
            workspaces = report.workspaces,
            posts = report.posts_composed,
            debates = report.debates_spawned,
            comments = report.debate_comments,
            replies = report.replies_written,
            errors = report.errors,
            "tick complete"
        );
        report
    }

    async fn tick_workspace(&self, workspace_id: Uuid, rng: &mut StdRng, report: &mut TickReport) {
        let filter = self.config.agent_filter();

        if rng.random::<f64>() < self.config.post_probability {
            match self
                .composer
                .compose_post(workspace_id, &filter, self.config.auto_publish, rng)
                .await
            {
                Ok(Some(_)) => report.posts_composed += 1,
                Ok(None) => {}
                Err(e) => record(report, workspace_id, "compose", &e),
            }
        }
        if let Err(e) = self.debate_phase(workspace_id, &filter, rng, report).await {
            record(report, workspace_id, "debate", &e);
        }
        if let Err(e) = self.reply_phase(workspace_id, &filter, rng, report).await {
            record(report, workspace_id, "reply", &e);
        }
    }

    /// `NoEligibleAgents` ends the phase; other errors only skip one post.
    async fn debate_phase(
        &self,
        workspace_id: Uuid,
        filter: &AgentFilter,
        rng: &mut StdRng,
        report: &mut TickReport,
    ) -> Result<()> {
        let query = PostQuery::published()
            .debate_status(DebateStatus::None)
            .limit(self.config.max_posts_per_tick);
        let posts = self.store.find_recent_posts(workspace_id, &query).await?;

        for post in posts {
            if rng.random::<f64>() >= self.config.spawn_probability {
                continue;
            }
            let participants = match self
                .selector
                .select_debate_participants(
                    workspace_id,
                    &post,
                    self.config.participants_per_debate,
                    filter,
                    rng,
                )
                .await
            {
                Ok(agents) => agents,
                Err(e @ AppError::NoEligibleAgents(_)) => return Err(e),
                Err(e) => {
                    record(report, workspace_id, "select", &e);
                    continue;
                }
            };
            let agent_ids: Vec<Uuid> = participants.iter().map(|a| a.id).collect();
            match self
                .debates
                .spawn_debate(
                    workspace_id,
                    post.id,
                    &agent_ids,
                    self.config.debate_rounds,
                    self.config.auto_publish,
                )
                .await
            {
                Ok(comments) if comments.is_empty() => {}
                Ok(comments) => {
                    report.debates_spawned += 1;
                    report.debate_comments += comments.len();
                }
                Err(e) => record(report, workspace_id, "spawn", &e),
            }
        }
        Ok(())
    }

    async fn reply_phase(
        &self,
        workspace_id: Uuid,
        filter: &AgentFilter,
        rng: &mut StdRng,
        report: &mut TickReport,
    ) -> Result<()> {
        let since = Utc::now() - self.config.human_reply_window;
        let human_comments = self
            .store
            .find_recent_comments(
                workspace_id,
                &CommentQuery::default()
                    .authored_by(AuthorType::Human)
                    .status(ContentStatus::Published)
                    .since(since),
            )
            .await?;

        let mut handled = 0;
        for human in human_comments {
            if handled >= self.config.max_posts_per_tick {
                break;
            }
            let existing = self
                .store
                .find_recent_comments(
                    workspace_id,
                    &CommentQuery::on_post(human.post_id)
                        .replies_to(human.id)
                        .authored_by(AuthorType::Agent)
                        .limit(1),
                )
                .await?;
            if !existing.is_empty() {
                continue;
            }
            let Some(post) = self.store.find_post(human.post_id).await? else {
                continue;
            };
            handled += 1;

            let candidates = match self
                .selector
                .select_debate_participants(
                    workspace_id,
                    &post,
                    self.config.participants_per_debate,
                    filter,
                    rng,
                )
                .await
            {
                Ok(agents) => agents,
                Err(e @ AppError::NoEligibleAgents(_)) => return Err(e),
                Err(e) => {
                    record(report, workspace_id, "select", &e);
                    continue;
                }
            };
            let agent_ids: Vec<Uuid> = candidates.iter().map(|a| a.id).collect();
            match self
                .replies
                .evaluate_and_reply(
                    workspace_id,
                    post.id,
                    human.id,
                    &agent_ids,
                    self.config.max_replies_per_comment,
                )
                .await
            {
                Ok(replies) => report.replies_written += replies.len(),
                Err(e) => record(report, workspace_id, "evaluate", &e),
            }
        }
        Ok(())
    }
}

fn record(report: &mut TickReport, workspace_id: Uuid, step: &'static str, err: &AppError) {
    warn!(workspace = %workspace_id, step, error = %err, "tick step failed");
    report.errors += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ra_core::testing::{fixtures, MemoryStore, ScriptedGenerator};
    use ra_core::PostAuthor;

    /// Answers each prompt kind with a well-formed response.
    fn chatty() -> Arc<ScriptedGenerator> {
        Arc::new(ScriptedGenerator::new(|_, user, n| {
            if user.contains("\"should_respond\"") {
                Ok(format!(
                    r#"{{"should_respond": true, "reasoning": "r", "response_type": "challenge", "response": "counterpoint {n}"}}"#
                ))
            } else if user.contains("\"title\"") {
                Ok(format!(r#"{{"title": "Fresh topic {n}", "body": "Discuss."}}"#))
            } else {
                Ok(format!("debate line {n}"))
            }
        }))
    }

    fn eager(ws: Uuid) -> TickConfig {
        TickConfig {
            workspace_ids: vec![ws],
            spawn_probability: 1.0,
            post_probability: 1.0,
            auto_publish: true,
            max_replies_per_comment: 1,
            ..TickConfig::default()
        }
    }

    fn populated() -> (Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let ws = Uuid::now_v7();
        for (handle, style) in [("ana", "calm"), ("ben", "blunt"), ("cai", "dry")] {
            store.add_agent(fixtures::agent(ws, handle, &["cities"], style));
        }
        let post = fixtures::post(ws, PostAuthor::Human(Uuid::now_v7()), "Should cities ban cars");
        store.add_post(post.clone());
        (store, ws)
    }

    #[tokio::test]
    async fn test_tick_runs_every_phase() {
        let (store, ws) = populated();
        let human_post = store.posts()[0].clone();
        store.add_comment(fixtures::human_comment(&human_post, Uuid::now_v7(), "Bikes are faster anyway"));

        let orchestrator = Orchestrator::seeded(store.clone(), chatty(), eager(ws), 42);
        let report = orchestrator.run_tick().await;

        assert_eq!(report.errors, 0);
        assert_eq!(report.posts_composed, 1);
        assert_eq!(report.debates_spawned, 2);
        assert_eq!(report.debate_comments, 2 * 3 * 2);
        assert_eq!(report.replies_written, 1);
        assert!(store
            .posts()
            .iter()
            .all(|p| p.debate_status == DebateStatus::Open));

        // second tick finds nothing new to debate and the human already has an answer
        let report = Orchestrator::seeded(store.clone(), chatty(), TickConfig { post_probability: 0.0, ..eager(ws) }, 7)
            .run_tick()
            .await;
        assert_eq!(report.debates_spawned, 0);
        assert_eq!(report.replies_written, 0);
    }

    #[tokio::test]
    async fn test_zero_probabilities_do_nothing() {
        let (store, ws) = populated();
        let config = TickConfig { spawn_probability: 0.0, post_probability: 0.0, ..eager(ws) };
        let generator = chatty();
        let report = Orchestrator::seeded(store.clone(), generator.clone(), config, 1).run_tick().await;
        assert_eq!(report, TickReport { workspaces: 1, ..TickReport::default() });
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_raised() {
        let (store, ws) = populated();
        let generator = Arc::new(ScriptedGenerator::new(|_, _, _| anyhow::bail!("provider down")));
        let report = Orchestrator::seeded(store.clone(), generator, eager(ws), 9).run_tick().await;
        // compose fails outright; debate participants are skipped individually
        assert_eq!(report.errors, 1);
        assert_eq!(report.debates_spawned, 0);
        assert!(store.comments().is_empty());
    }

    #[tokio::test]
    async fn test_empty_workspace_ends_phases_early() {
        let store = Arc::new(MemoryStore::new());
        let ws = Uuid::now_v7();
        store.add_post(fixtures::post(ws, PostAuthor::Human(Uuid::now_v7()), "Lonely"));
        let report = Orchestrator::seeded(store, chatty(), eager(ws), 5).run_tick().await;
        // compose and debate both hit NoEligibleAgents; the reply phase has nothing to do
        assert_eq!(report.errors, 2);
        assert_eq!(report.workspaces, 1);
    }

    #[tokio::test]
    async fn test_unpublished_tick_fills_the_queue() {
        let (store, ws) = populated();
        let config = TickConfig { auto_publish: false, post_probability: 0.0, ..eager(ws) };
        let orchestrator = Orchestrator::seeded(store.clone(), chatty(), config, 3);
        orchestrator.run_tick().await;

        let queue = orchestrator.gate().pending(ws, 100).await.unwrap();
        assert_eq!(queue.len(), 6);
        assert!(store.comments().iter().all(|c| c.status == ContentStatus::NeedsReview));
        assert!(orchestrator.ranker().rank(ws, 10).await.unwrap()[0].score == 0.0);
    }
}
