//! # HumanReplyEvaluator
//!
//! Lets candidate personas decide, in character, whether to answer a human
//! comment. The decision is a strict JSON contract (see `contracts`); the
//! reply threads under the human comment.

use std::collections::HashSet;
use std::sync::Arc;

use ra_core::{
    ActionType, AgentProfile, AppError, AuthorType, Comment, CommentQuery, ContentStatus,
    NewComment, PersistenceStore, Post, Result, SourceChannel, TargetType, TextGenerationPort,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::contracts::Decision;
use crate::fingerprint::fingerprint;
use crate::generation::generate_text;
use crate::moderation::ModerationGate;
use crate::prompts::{persona_system_prompt, reply_decision_prompt, CONTEXT_WINDOW};

pub struct HumanReplyEvaluator {
    store: Arc<dyn PersistenceStore>,
    generator: Arc<dyn TextGenerationPort>,
    gate: ModerationGate,
    publish: bool,
}

impl HumanReplyEvaluator {
    pub fn new(store: Arc<dyn PersistenceStore>, generator: Arc<dyn TextGenerationPort>) -> Self {
        let gate = ModerationGate::new(store.clone());
        Self { store, generator, gate, publish: false }
    }

    /// Approve replies immediately instead of queueing them for review.
    pub fn auto_publish(mut self, publish: bool) -> Self {
        self.publish = publish;
        self
    }

    #[instrument(skip(self, agent_ids), fields(candidates = agent_ids.len()))]
    pub async fn evaluate_and_reply(
        &self,
        workspace_id: Uuid,
        post_id: Uuid,
        human_comment_id: Uuid,
        agent_ids: &[Uuid],
        max_replies: usize,
    ) -> Result<Vec<Comment>> {
        let post = self
            .store
            .find_post(post_id)
            .await?
            .filter(|p| p.workspace_id == workspace_id)
            .ok_or(AppError::NotFound("post", post_id))?;
        let human = self
            .store
            .find_comment(human_comment_id)
            .await?
            .filter(|c| c.workspace_id == workspace_id)
            .ok_or(AppError::NotFound("comment", human_comment_id))?;
        if human.post_id != post_id {
            return Err(AppError::ValidationError(format!(
                "comment {human_comment_id} does not belong to post {post_id}"
            )));
        }
        if human.author_type != AuthorType::Human {
            return Err(AppError::ValidationError(format!(
                "comment {human_comment_id} was not written by a human"
            )));
        }
        if max_replies == 0 {
            return Ok(Vec::new());
        }

        let context = self
            .store
            .find_recent_comments(
                workspace_id,
                &CommentQuery::on_post(post_id)
                    .status(ContentStatus::Published)
                    .limit(CONTEXT_WINDOW),
            )
            .await?;

        let mut seen = HashSet::new();
        let mut replies = Vec::new();
        for &agent_id in agent_ids {
            if replies.len() >= max_replies {
                break;
            }
            if !seen.insert(agent_id) {
                continue;
            }
            let agent = match self.store.find_agent(agent_id).await? {
                Some(a) if a.workspace_id == workspace_id && a.is_selectable() => a,
                _ => continue,
            };
            match self.reply_as(&post, &human, &agent, &context).await {
                Ok(Some(reply)) => replies.push(reply),
                Ok(None) => {}
                Err(e) => warn!(agent = %agent.id, error = %e, "reply skipped"),
            }
        }

        info!(comment = %human_comment_id, replies = replies.len(), "human comment evaluated");
        Ok(replies)
    }

    async fn reply_as(
        &self,
        post: &Post,
        human: &Comment,
        agent: &AgentProfile,
        context: &[Comment],
    ) -> Result<Option<Comment>> {
        let raw = generate_text(
            self.generator.as_ref(),
            &persona_system_prompt(agent),
            &reply_decision_prompt(post, human, context),
        )
        .await?;
        let decision = Decision::parse(&raw);
        if !decision.wants_reply() {
            debug!(agent = %agent.id, reasoning = %decision.reasoning, "declined to reply");
            return Ok(None);
        }

        let body = decision.response.trim();
        let draft = NewComment {
            workspace_id: post.workspace_id,
            post_id: post.id,
            parent_id: Some(human.id),
            author_type: AuthorType::Agent,
            author_id: agent.id,
            body: body.to_string(),
            status: ContentStatus::NeedsReview,
            fingerprint: fingerprint(post.workspace_id, post.id, agent.id, SourceChannel::HumanReply, body),
            source_channel: SourceChannel::HumanReply,
        };
        self.gate
            .stage_comment(draft, ActionType::Reply, TargetType::Comment, human.id, self.publish)
            .await
            .map(Some)
    }
}
