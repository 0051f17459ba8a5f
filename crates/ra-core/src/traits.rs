//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the engine.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    AgentAction, AgentFilter, AgentProfile, Comment, CommentQuery, CommentWrite, ContentStatus,
    DebateStatus, Engagement, NewComment, Post, PostQuery, VoteOutcome, VoteValue,
};

/// Data persistence contract for personas, posts, comments, the
/// moderation queue and votes.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    // Agent Operations
    /// Enabled, non-shadow-banned agents of a workspace.
    async fn find_agents_eligible(
        &self,
        workspace_id: Uuid,
        filter: &AgentFilter,
    ) -> anyhow::Result<Vec<AgentProfile>>;
    async fn find_agent(&self, agent_id: Uuid) -> anyhow::Result<Option<AgentProfile>>;

    // Post Operations
    async fn find_post(&self, post_id: Uuid) -> anyhow::Result<Option<Post>>;
    async fn insert_post(&self, post: Post) -> anyhow::Result<Post>;
    async fn find_recent_posts(
        &self,
        workspace_id: Uuid,
        query: &PostQuery,
    ) -> anyhow::Result<Vec<Post>>;
    /// Moves the debate status forward only (none < open < closed). A
    /// request that would move it backwards is ignored. Returns the status
    /// stored after the call; errors when the post is missing.
    async fn update_post_debate_status(
        &self,
        post_id: Uuid,
        status: DebateStatus,
    ) -> anyhow::Result<DebateStatus>;

    // Comment Operations
    async fn find_comment(&self, comment_id: Uuid) -> anyhow::Result<Option<Comment>>;
    async fn find_by_fingerprint(
        &self,
        workspace_id: Uuid,
        fingerprint: &str,
    ) -> anyhow::Result<Option<Comment>>;
    /// Inserts a comment. If a row with the same fingerprint already exists
    /// the existing row is returned with `created == false` and nothing is
    /// written.
    async fn insert_comment(&self, comment: NewComment) -> anyhow::Result<CommentWrite>;
    /// Moves a draft or needs_review comment to `status`. Published and
    /// blocked rows are left untouched. Returns the stored row, or `None`
    /// when it does not exist.
    async fn update_comment_status(
        &self,
        comment_id: Uuid,
        status: ContentStatus,
    ) -> anyhow::Result<Option<Comment>>;
    async fn find_recent_comments(
        &self,
        workspace_id: Uuid,
        query: &CommentQuery,
    ) -> anyhow::Result<Vec<Comment>>;

    // Moderation Queue Operations
    async fn insert_or_update_agent_action(&self, action: AgentAction)
        -> anyhow::Result<AgentAction>;
    async fn find_agent_action(&self, action_id: Uuid) -> anyhow::Result<Option<AgentAction>>;
    /// Oldest first.
    async fn find_agent_actions(
        &self,
        workspace_id: Uuid,
        statuses: &[ContentStatus],
        limit: usize,
    ) -> anyhow::Result<Vec<AgentAction>>;

    // Engagement Operations
    async fn engagement_for(&self, post_ids: &[Uuid]) -> anyhow::Result<Vec<Engagement>>;
    /// Applies [`VoteValue::resolve`] toggle semantics.
    async fn upsert_vote(
        &self,
        user_id: Uuid,
        post_id: Uuid,
        value: VoteValue,
    ) -> anyhow::Result<VoteOutcome>;
}

/// Text-generation backend contract.
///
/// Returns raw text, or a JSON object string when the prompt asks for one.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TextGenerationPort: Send + Sync {
    /// Provider label, used for logging only.
    fn name(&self) -> String;

    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String>;
}
