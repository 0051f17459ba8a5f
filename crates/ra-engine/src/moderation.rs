//! # ModerationGate
//!
//! The only writer of `published` / `blocked`. Every generated comment or
//! post passes through here, either via a reviewer or via auto-publish.
//!
//! ```text
//! draft | needs_review --approve--> published   (terminal)
//! draft | needs_review --reject---> blocked     (terminal)
//! ```

use std::sync::Arc;

use chrono::Utc;
use ra_core::{
    ActionType, AgentAction, AppError, AuthorType, Comment, ContentStatus, DebateStatus,
    NewComment, PersistenceStore, Post, PostAuthor, PostStatus, Result, SourceChannel, TargetType,
};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::fingerprint::fingerprint;

/// A reviewer decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Reject,
}

impl Verdict {
    fn verb(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

/// Pure transition function of the moderation state machine.
pub fn next_status(current: ContentStatus, verdict: Verdict) -> Result<ContentStatus> {
    match (current, verdict) {
        (ContentStatus::Draft | ContentStatus::NeedsReview, Verdict::Approve) => {
            Ok(ContentStatus::Published)
        }
        (ContentStatus::Draft | ContentStatus::NeedsReview, Verdict::Reject) => {
            Ok(ContentStatus::Blocked)
        }
        (from, verdict) => Err(AppError::InvalidTransition { from, action: verdict.verb() }),
    }
}

/// The content row made visible by an approval.
#[derive(Debug, Clone, PartialEq)]
pub enum Published {
    Comment(Comment),
    Post(Post),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModerationOutcome {
    pub action: AgentAction,
    /// Set on approval only.
    pub published: Option<Published>,
}

impl ModerationOutcome {
    pub fn status(&self) -> ContentStatus {
        self.action.status
    }
}

pub struct ModerationGate {
    store: Arc<dyn PersistenceStore>,
}

impl ModerationGate {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self { store }
    }

    /// Enqueues a proposed action. Only non-terminal actions are accepted.
    pub async fn submit(&self, action: AgentAction) -> Result<AgentAction> {
        if action.status.is_terminal() {
            return Err(AppError::ValidationError(format!(
                "new actions must be draft or needs_review, got {}",
                action.status
            )));
        }
        Ok(self.store.insert_or_update_agent_action(action).await?)
    }

    /// The moderation queue of a workspace, oldest first.
    pub async fn pending(&self, workspace_id: Uuid, limit: usize) -> Result<Vec<AgentAction>> {
        Ok(self
            .store
            .find_agent_actions(
                workspace_id,
                &[ContentStatus::Draft, ContentStatus::NeedsReview],
                limit,
            )
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn approve(&self, action_id: Uuid) -> Result<ModerationOutcome> {
        let mut action = self.load(action_id).await?;
        let status = next_status(action.status, Verdict::Approve)?;

        let published = self.materialize(&action).await?;
        action.status = status;
        action.updated_at = Utc::now();
        let action = self.store.insert_or_update_agent_action(action).await?;

        info!(action = %action.id, kind = %action.action_type, "action approved");
        Ok(ModerationOutcome { action, published: Some(published) })
    }

    pub async fn reject(&self, action_id: Uuid) -> Result<ModerationOutcome> {
        self.reject_with_reason(action_id, None).await
    }

    #[instrument(skip(self))]
    pub async fn reject_with_reason(
        &self,
        action_id: Uuid,
        reason: Option<String>,
    ) -> Result<ModerationOutcome> {
        let mut action = self.load(action_id).await?;
        let status = next_status(action.status, Verdict::Reject)?;

        if let Some(pending_id) = action.materialized_id {
            self.settle_comment(pending_id, Verdict::Reject).await?;
        }
        action.status = status;
        if reason.is_some() {
            action.policy_reason = reason;
        }
        action.updated_at = Utc::now();
        let action = self.store.insert_or_update_agent_action(action).await?;

        info!(action = %action.id, kind = %action.action_type, "action rejected");
        Ok(ModerationOutcome { action, published: None })
    }

    /// Writes a generated comment as `needs_review` together with its queue
    /// entry, approving it at once when `publish` is set. A fingerprint hit
    /// returns the stored row and writes nothing. Only the caller whose insert
    /// created the row enqueues an action for it.
    pub async fn stage_comment(
        &self,
        draft: NewComment,
        action_type: ActionType,
        target_type: TargetType,
        target_id: Uuid,
        publish: bool,
    ) -> Result<Comment> {
        if let Some(existing) =
            self.store.find_by_fingerprint(draft.workspace_id, &draft.fingerprint).await?
        {
            debug!(comment = %existing.id, "duplicate write collapsed");
            return Ok(existing);
        }

        let write = self
            .store
            .insert_comment(NewComment { status: ContentStatus::NeedsReview, ..draft })
            .await?;
        let pending = write.comment;
        if !write.created {
            debug!(comment = %pending.id, "lost insert race; row owned by another writer");
            return Ok(pending);
        }

        let action = self
            .submit(
                AgentAction::proposed(
                    pending.workspace_id,
                    pending.author_id,
                    action_type,
                    target_type,
                    Some(target_id),
                    pending.body.clone(),
                )
                .with_materialized(pending.id),
            )
            .await?;
        if !publish {
            return Ok(pending);
        }
        match self.approve(action.id).await?.published {
            Some(Published::Comment(comment)) => Ok(comment),
            _ => Ok(pending),
        }
    }

    async fn load(&self, action_id: Uuid) -> Result<AgentAction> {
        self.store
            .find_agent_action(action_id)
            .await?
            .ok_or(AppError::NotFound("agent action", action_id))
    }

    /// Makes exactly one content row visible for an approved action.
    async fn materialize(&self, action: &AgentAction) -> Result<Published> {
        if let Some(pending_id) = action.materialized_id {
            let comment = self.settle_comment(pending_id, Verdict::Approve).await?;
            return Ok(Published::Comment(comment));
        }

        match action.action_type {
            ActionType::Post => self.materialize_post(action).await.map(Published::Post),
            ActionType::Comment | ActionType::Reply => {
                self.materialize_comment(action).await.map(Published::Comment)
            }
        }
    }

    async fn materialize_post(&self, action: &AgentAction) -> Result<Post> {
        let now = Utc::now();
        let title = action
            .title
            .clone()
            .or_else(|| action.content.lines().next().map(str::to_string))
            .unwrap_or_default();
        // The post id mirrors the action id so a retried approval cannot
        // create a second post.
        let post = Post {
            id: action.id,
            workspace_id: action.workspace_id,
            author: PostAuthor::Agent(action.agent_id),
            title,
            body: action.content.clone(),
            status: PostStatus::Published,
            debate_status: DebateStatus::None,
            created_at: now,
            published_at: Some(now),
        };
        Ok(self.store.insert_post(post).await?)
    }

    async fn materialize_comment(&self, action: &AgentAction) -> Result<Comment> {
        let target_id = action.target_id.ok_or_else(|| {
            AppError::ValidationError(format!("action {} has no target", action.id))
        })?;
        let (post_id, parent_id, source) = match action.target_type {
            TargetType::Post => {
                let post = self
                    .store
                    .find_post(target_id)
                    .await?
                    .ok_or(AppError::NotFound("post", target_id))?;
                (post.id, None, SourceChannel::Debate)
            }
            TargetType::Comment => {
                let parent = self
                    .store
                    .find_comment(target_id)
                    .await?
                    .ok_or(AppError::NotFound("comment", target_id))?;
                (parent.post_id, Some(parent.id), SourceChannel::HumanReply)
            }
        };

        let fp = fingerprint(action.workspace_id, post_id, action.agent_id, source, &action.content);
        if let Some(existing) = self.store.find_by_fingerprint(action.workspace_id, &fp).await? {
            if existing.status == ContentStatus::Published {
                return Ok(existing);
            }
            return self.settle_comment(existing.id, Verdict::Approve).await;
        }

        let write = self
            .store
            .insert_comment(NewComment {
                workspace_id: action.workspace_id,
                post_id,
                parent_id,
                author_type: AuthorType::Agent,
                author_id: action.agent_id,
                body: action.content.clone(),
                status: ContentStatus::Published,
                fingerprint: fp,
                source_channel: source,
            })
            .await?;
        if write.created || write.comment.status == ContentStatus::Published {
            return Ok(write.comment);
        }
        self.settle_comment(write.comment.id, Verdict::Approve).await
    }

    /// Moves a pending comment row to the verdict's terminal status. A row
    /// already settled the other way is a conflict; the store never rewrites
    /// terminal rows.
    async fn settle_comment(&self, comment_id: Uuid, verdict: Verdict) -> Result<Comment> {
        let target = match verdict {
            Verdict::Approve => ContentStatus::Published,
            Verdict::Reject => ContentStatus::Blocked,
        };
        let comment = self
            .store
            .update_comment_status(comment_id, target)
            .await?
            .ok_or(AppError::NotFound("comment", comment_id))?;
        if comment.status != target {
            return Err(AppError::InvalidTransition { from: comment.status, action: verdict.verb() });
        }
        Ok(comment)
    }
}
