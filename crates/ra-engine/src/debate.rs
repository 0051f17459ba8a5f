//! # DebateOrchestrator
//!
//! Runs multi-round persona debates on a post. Participant `i` in round
//! `r` replies to the round-robin predecessor `(i - 1) mod len`:
//!
//! ```text
//! round 1:  A      B      C         (roots)
//! round 2:  A->C1  B->A1  C->B1
//! round 3:  A->C2  B->A2  C->B2
//! ```
//!
//! A predecessor that failed falls back to their last successful comment.

use std::collections::HashSet;
use std::sync::Arc;

use ra_core::{
    ActionType, AgentProfile, AppError, AuthorType, Comment, CommentQuery, ContentStatus,
    DebateStatus, NewComment, PersistenceStore, Post, Result, SourceChannel, TargetType,
    TextGenerationPort,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::fingerprint::fingerprint;
use crate::generation::generate_text;
use crate::moderation::ModerationGate;
use crate::prompts::{debate_prompt, persona_system_prompt, Stance, CONTEXT_WINDOW};

pub struct DebateOrchestrator {
    store: Arc<dyn PersistenceStore>,
    generator: Arc<dyn TextGenerationPort>,
    gate: ModerationGate,
}

impl DebateOrchestrator {
    pub fn new(store: Arc<dyn PersistenceStore>, generator: Arc<dyn TextGenerationPort>) -> Self {
        let gate = ModerationGate::new(store.clone());
        Self { store, generator, gate }
    }

    /// Returns the comments produced (or reused) in production order.
    #[instrument(skip(self, agent_ids), fields(requested = agent_ids.len()))]
    pub async fn spawn_debate(
        &self,
        workspace_id: Uuid,
        post_id: Uuid,
        agent_ids: &[Uuid],
        rounds: usize,
        publish: bool,
    ) -> Result<Vec<Comment>> {
        let post = self.load_post(workspace_id, post_id).await?;
        if post.debate_status == DebateStatus::Closed {
            return Err(AppError::DebateClosed(post_id));
        }
        let participants = self.resolve_participants(workspace_id, agent_ids).await?;
        if rounds == 0 || participants.is_empty() {
            debug!("nothing to debate");
            return Ok(Vec::new());
        }

        let mut context = self
            .store
            .find_recent_comments(
                workspace_id,
                &CommentQuery::on_post(post_id)
                    .status(ContentStatus::Published)
                    .limit(CONTEXT_WINDOW),
            )
            .await?;

        let len = participants.len();
        let mut last_success: Vec<Option<Uuid>> = vec![None; len];
        let mut produced = Vec::new();

        for round in 1..=rounds {
            let previous = last_success.clone();
            for (i, agent) in participants.iter().enumerate() {
                let parent = if round == 1 { None } else { previous[(i + len - 1) % len] };
                let stance = Stance::for_turn(round, i);
                match self.contribute(&post, agent, stance, parent, &context, publish).await {
                    Ok(comment) => {
                        last_success[i] = Some(comment.id);
                        if context.len() == CONTEXT_WINDOW {
                            context.remove(0);
                        }
                        context.push(comment.clone());
                        produced.push(comment);
                    }
                    Err(e) => {
                        warn!(agent = %agent.id, round, error = %e, "participant skipped");
                    }
                }
            }
        }

        if !produced.is_empty() && post.debate_status == DebateStatus::None {
            let stored = self.store.update_post_debate_status(post_id, DebateStatus::Open).await?;
            if stored == DebateStatus::Closed {
                debug!(post = %post_id, "debate closed while generating; status kept");
            }
        }
        info!(post = %post_id, participants = len, rounds, comments = produced.len(), "debate round complete");
        Ok(produced)
    }

    /// Moves a debate to `closed`. Closing twice is a no-op.
    #[instrument(skip(self))]
    pub async fn close_debate(&self, post_id: Uuid) -> Result<()> {
        let post = self
            .store
            .find_post(post_id)
            .await?
            .ok_or(AppError::NotFound("post", post_id))?;
        if post.debate_status == DebateStatus::Closed {
            return Ok(());
        }
        if !post.debate_status.can_advance_to(DebateStatus::Closed) {
            return Err(AppError::Conflict(format!(
                "debate on post {post_id} cannot move from {} to closed",
                post.debate_status
            )));
        }
        self.store.update_post_debate_status(post_id, DebateStatus::Closed).await?;
        info!(post = %post_id, "debate closed");
        Ok(())
    }

    async fn load_post(&self, workspace_id: Uuid, post_id: Uuid) -> Result<Post> {
        self.store
            .find_post(post_id)
            .await?
            .filter(|p| p.workspace_id == workspace_id)
            .ok_or(AppError::NotFound("post", post_id))
    }

    /// Selectable agents of the workspace, first occurrence order.
    async fn resolve_participants(
        &self,
        workspace_id: Uuid,
        agent_ids: &[Uuid],
    ) -> Result<Vec<AgentProfile>> {
        let mut seen = HashSet::new();
        let mut participants = Vec::new();
        for &id in agent_ids {
            if !seen.insert(id) {
                continue;
            }
            match self.store.find_agent(id).await? {
                Some(agent) if agent.workspace_id == workspace_id && agent.is_selectable() => {
                    participants.push(agent)
                }
                _ => debug!(agent = %id, "dropping unresolvable participant"),
            }
        }
        Ok(participants)
    }

    async fn contribute(
        &self,
        post: &Post,
        agent: &AgentProfile,
        stance: Stance,
        parent_id: Option<Uuid>,
        context: &[Comment],
        publish: bool,
    ) -> Result<Comment> {
        let raw = generate_text(
            self.generator.as_ref(),
            &persona_system_prompt(agent),
            &debate_prompt(post, context, stance),
        )
        .await?;
        let body = raw.trim();
        if body.is_empty() {
            return Err(AppError::Parse("empty debate comment".into()));
        }

        let draft = NewComment {
            workspace_id: post.workspace_id,
            post_id: post.id,
            parent_id,
            author_type: AuthorType::Agent,
            author_id: agent.id,
            body: body.to_string(),
            status: ContentStatus::NeedsReview,
            fingerprint: fingerprint(post.workspace_id, post.id, agent.id, SourceChannel::Debate, body),
            source_channel: SourceChannel::Debate,
        };
        self.gate
            .stage_comment(draft, ActionType::Comment, TargetType::Post, post.id, publish)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ra_core::testing::{fixtures, MemoryStore, ScriptedGenerator};
    use ra_core::PostAuthor;

    struct Fixture {
        store: Arc<MemoryStore>,
        post: Post,
        agents: Vec<AgentProfile>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let ws = Uuid::now_v7();
        let post = fixtures::post(ws, PostAuthor::Human(Uuid::now_v7()), "Is remote work here to stay");
        store.add_post(post.clone());
        let agents: Vec<AgentProfile> = ["one", "three", "seven"]
            .iter()
            .map(|h| fixtures::agent(ws, h, &["work"], "analytical"))
            .collect();
        for agent in &agents {
            store.add_agent(agent.clone());
        }
        Fixture { store, post, agents }
    }

    fn numbered() -> Arc<ScriptedGenerator> {
        Arc::new(ScriptedGenerator::new(|_, _, n| Ok(format!("  point number {n}  "))))
    }

    fn ids(agents: &[AgentProfile]) -> Vec<Uuid> {
        agents.iter().map(|a| a.id).collect()
    }

    #[tokio::test]
    async fn test_two_round_threading_wraps_around() {
        let f = fixture();
        let debates = DebateOrchestrator::new(f.store.clone(), numbered());
        let comments = debates
            .spawn_debate(f.post.workspace_id, f.post.id, &ids(&f.agents), 2, true)
            .await
            .unwrap();

        assert_eq!(comments.len(), 6);
        let (round1, round2) = comments.split_at(3);
        assert!(round1.iter().all(|c| c.parent_id.is_none()));
        assert_eq!(round2[0].author_id, f.agents[0].id);
        assert_eq!(round2[0].parent_id, Some(round1[2].id));
        assert_eq!(round2[1].parent_id, Some(round1[0].id));
        assert_eq!(round2[2].parent_id, Some(round1[1].id));
        assert!(comments.iter().all(|c| c.status == ContentStatus::Published));
        assert_eq!(comments[0].body, "point number 0");
        assert_eq!(f.store.post(f.post.id).unwrap().debate_status, DebateStatus::Open);
    }

    #[tokio::test]
    async fn test_unpublished_debate_waits_in_queue() {
        let f = fixture();
        let debates = DebateOrchestrator::new(f.store.clone(), numbered());
        let comments = debates
            .spawn_debate(f.post.workspace_id, f.post.id, &ids(&f.agents), 1, false)
            .await
            .unwrap();
        assert!(comments.iter().all(|c| c.status == ContentStatus::NeedsReview));
        let actions = f.store.actions();
        assert_eq!(actions.len(), 3);
        assert!(actions.iter().all(|a| a.action_type == ActionType::Comment
            && a.target_id == Some(f.post.id)
            && a.materialized_id.is_some()));
    }

    #[tokio::test]
    async fn test_closed_debate_writes_nothing() {
        let f = fixture();
        let debates = DebateOrchestrator::new(f.store.clone(), numbered());
        debates.close_debate(f.post.id).await.unwrap();
        debates.close_debate(f.post.id).await.unwrap();

        let err = debates
            .spawn_debate(f.post.workspace_id, f.post.id, &ids(&f.agents), 2, true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DebateClosed(id) if id == f.post.id));
        assert!(err.is_conflict());
        assert!(f.store.comments().is_empty());
        assert!(f.store.actions().is_empty());
    }

    #[tokio::test]
    async fn test_close_during_generation_is_not_reverted() {
        let f = fixture();
        let (store, post_id) = (f.store.clone(), f.post.id);
        let generator = Arc::new(ScriptedGenerator::new(move |_, _, n| {
            if n == 0 {
                store.set_debate_status(post_id, DebateStatus::Closed);
            }
            Ok(format!("point {n}"))
        }));
        let debates = DebateOrchestrator::new(f.store.clone(), generator);

        let comments = debates
            .spawn_debate(f.post.workspace_id, f.post.id, &ids(&f.agents), 1, true)
            .await
            .unwrap();
        assert_eq!(comments.len(), 3);
        assert_eq!(f.store.post(f.post.id).unwrap().debate_status, DebateStatus::Closed);
    }

    #[tokio::test]
    async fn test_rerun_with_same_output_is_idempotent() {
        let f = fixture();
        let agent_ids = ids(&f.agents);
        let first = DebateOrchestrator::new(f.store.clone(), numbered())
            .spawn_debate(f.post.workspace_id, f.post.id, &agent_ids, 2, true)
            .await
            .unwrap();
        let second = DebateOrchestrator::new(f.store.clone(), numbered())
            .spawn_debate(f.post.workspace_id, f.post.id, &agent_ids, 2, true)
            .await
            .unwrap();

        assert_eq!(f.store.comments().len(), 6);
        let first_ids: Vec<Uuid> = first.iter().map(|c| c.id).collect();
        let second_ids: Vec<Uuid> = second.iter().map(|c| c.id).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test]
    async fn test_failed_predecessor_falls_back_to_earlier_comment() {
        let f = fixture();
        // "three" answers in round 1 (call 1) and then fails in round 2 (call 4).
        let generator = Arc::new(ScriptedGenerator::new(|system, _, n| {
            if system.contains("@three") && n > 3 {
                anyhow::bail!("model overloaded");
            }
            Ok(format!("turn {n}"))
        }));
        let debates = DebateOrchestrator::new(f.store.clone(), generator);
        let comments = debates
            .spawn_debate(f.post.workspace_id, f.post.id, &ids(&f.agents), 3, true)
            .await
            .unwrap();

        // 3 + 2 + 2: "three" is skipped in rounds 2 and 3
        assert_eq!(comments.len(), 7);
        let three_r1 = comments[1].id;
        let seven_r3 = comments.last().unwrap();
        assert_eq!(seven_r3.author_id, f.agents[2].id);
        assert_eq!(seven_r3.parent_id, Some(three_r1));
    }

    #[tokio::test]
    async fn test_blank_output_counts_as_failure() {
        let f = fixture();
        let debates = DebateOrchestrator::new(f.store.clone(), Arc::new(ScriptedGenerator::constant("   ")));
        let comments = debates
            .spawn_debate(f.post.workspace_id, f.post.id, &ids(&f.agents), 2, true)
            .await
            .unwrap();
        assert!(comments.is_empty());
        assert_eq!(f.store.post(f.post.id).unwrap().debate_status, DebateStatus::None);
    }

    #[tokio::test]
    async fn test_unresolvable_and_duplicate_ids_are_dropped() {
        let f = fixture();
        let mut banned = fixtures::agent(f.post.workspace_id, "banned", &[], "snarky");
        banned.shadow_banned = true;
        f.store.add_agent(banned.clone());
        let requested = vec![f.agents[1].id, Uuid::now_v7(), banned.id, f.agents[1].id];

        let debates = DebateOrchestrator::new(f.store.clone(), numbered());
        let comments = debates
            .spawn_debate(f.post.workspace_id, f.post.id, &requested, 2, true)
            .await
            .unwrap();
        assert_eq!(comments.len(), 2);
        assert!(comments.iter().all(|c| c.author_id == f.agents[1].id));
        // a lone participant answers itself
        assert_eq!(comments[1].parent_id, Some(comments[0].id));
    }

    #[tokio::test]
    async fn test_zero_rounds_and_missing_post() {
        let f = fixture();
        let debates = DebateOrchestrator::new(f.store.clone(), numbered());
        let none = debates
            .spawn_debate(f.post.workspace_id, f.post.id, &ids(&f.agents), 0, true)
            .await
            .unwrap();
        assert!(none.is_empty());

        let err = debates
            .spawn_debate(Uuid::now_v7(), f.post.id, &ids(&f.agents), 1, true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("post", _)));
    }
}
