//! # In-memory store
//!
//! A `PersistenceStore` backed by vectors behind a mutex, plus a scripted
//! `TextGenerationPort`, for tests in this and downstream crates. Enabled by
//! the `testing` feature.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    AgentAction, AgentFilter, AgentProfile, AuthorType, Comment, CommentQuery, CommentWrite,
    ContentStatus, DebateStatus, Engagement, NewComment, Post, PostQuery, Vote, VoteOutcome,
    VoteValue,
};
use crate::traits::{PersistenceStore, TextGenerationPort};

#[derive(Default)]
struct State {
    agents: Vec<AgentProfile>,
    posts: Vec<Post>,
    comments: Vec<Comment>,
    actions: Vec<AgentAction>,
    votes: HashMap<(Uuid, Uuid), Vote>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_agent(&self, agent: AgentProfile) {
        self.lock().agents.push(agent);
    }

    pub fn add_post(&self, post: Post) {
        self.lock().posts.push(post);
    }

    /// Inserts a comment row verbatim, bypassing fingerprint checks.
    pub fn add_comment(&self, comment: Comment) {
        self.lock().comments.push(comment);
    }

    pub fn comments(&self) -> Vec<Comment> {
        self.lock().comments.clone()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.lock().posts.clone()
    }

    pub fn actions(&self) -> Vec<AgentAction> {
        self.lock().actions.clone()
    }

    pub fn post(&self, post_id: Uuid) -> Option<Post> {
        self.lock().posts.iter().find(|p| p.id == post_id).cloned()
    }

    /// Overwrites a post's debate status without the forward-only check.
    pub fn set_debate_status(&self, post_id: Uuid, status: DebateStatus) {
        if let Some(post) = self.lock().posts.iter_mut().find(|p| p.id == post_id) {
            post.debate_status = status;
        }
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn find_agents_eligible(
        &self,
        workspace_id: Uuid,
        filter: &AgentFilter,
    ) -> anyhow::Result<Vec<AgentProfile>> {
        Ok(self
            .lock()
            .agents
            .iter()
            .filter(|a| a.workspace_id == workspace_id && a.is_selectable() && filter.admits(a.id))
            .cloned()
            .collect())
    }

    async fn find_agent(&self, agent_id: Uuid) -> anyhow::Result<Option<AgentProfile>> {
        Ok(self.lock().agents.iter().find(|a| a.id == agent_id).cloned())
    }

    async fn find_post(&self, post_id: Uuid) -> anyhow::Result<Option<Post>> {
        Ok(self.post(post_id))
    }

    async fn insert_post(&self, post: Post) -> anyhow::Result<Post> {
        self.lock().posts.push(post.clone());
        Ok(post)
    }

    async fn find_recent_posts(
        &self,
        workspace_id: Uuid,
        query: &PostQuery,
    ) -> anyhow::Result<Vec<Post>> {
        let mut posts: Vec<Post> = self
            .lock()
            .posts
            .iter()
            .filter(|p| p.workspace_id == workspace_id && query.matches(p))
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        posts.truncate(query.limit);
        Ok(posts)
    }

    async fn update_post_debate_status(
        &self,
        post_id: Uuid,
        status: DebateStatus,
    ) -> anyhow::Result<DebateStatus> {
        let mut state = self.lock();
        let post = state
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| anyhow::anyhow!("post {post_id} missing"))?;
        if post.debate_status.can_advance_to(status) {
            post.debate_status = status;
        }
        Ok(post.debate_status)
    }

    async fn find_comment(&self, comment_id: Uuid) -> anyhow::Result<Option<Comment>> {
        Ok(self.lock().comments.iter().find(|c| c.id == comment_id).cloned())
    }

    async fn find_by_fingerprint(
        &self,
        workspace_id: Uuid,
        fingerprint: &str,
    ) -> anyhow::Result<Option<Comment>> {
        Ok(self
            .lock()
            .comments
            .iter()
            .find(|c| c.workspace_id == workspace_id && c.fingerprint == fingerprint)
            .cloned())
    }

    async fn insert_comment(&self, comment: NewComment) -> anyhow::Result<CommentWrite> {
        let mut state = self.lock();
        if let Some(existing) = state
            .comments
            .iter()
            .find(|c| c.workspace_id == comment.workspace_id && c.fingerprint == comment.fingerprint)
        {
            return Ok(CommentWrite { comment: existing.clone(), created: false });
        }
        let row = comment.into_comment(Utc::now());
        state.comments.push(row.clone());
        Ok(CommentWrite { comment: row, created: true })
    }

    async fn update_comment_status(
        &self,
        comment_id: Uuid,
        status: ContentStatus,
    ) -> anyhow::Result<Option<Comment>> {
        let mut state = self.lock();
        let Some(comment) = state.comments.iter_mut().find(|c| c.id == comment_id) else {
            return Ok(None);
        };
        if comment.status.is_terminal() {
            return Ok(Some(comment.clone()));
        }
        comment.status = status;
        if status == ContentStatus::Published && comment.published_at.is_none() {
            comment.published_at = Some(Utc::now());
        }
        Ok(Some(comment.clone()))
    }

    async fn find_recent_comments(
        &self,
        workspace_id: Uuid,
        query: &CommentQuery,
    ) -> anyhow::Result<Vec<Comment>> {
        let mut comments: Vec<Comment> = self
            .lock()
            .comments
            .iter()
            .filter(|c| c.workspace_id == workspace_id && query.matches(c))
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            let skip = comments.len().saturating_sub(limit);
            comments.drain(..skip);
        }
        Ok(comments)
    }

    async fn insert_or_update_agent_action(
        &self,
        action: AgentAction,
    ) -> anyhow::Result<AgentAction> {
        let mut state = self.lock();
        match state.actions.iter_mut().find(|a| a.id == action.id) {
            Some(existing) => *existing = action.clone(),
            None => state.actions.push(action.clone()),
        }
        Ok(action)
    }

    async fn find_agent_action(&self, action_id: Uuid) -> anyhow::Result<Option<AgentAction>> {
        Ok(self.lock().actions.iter().find(|a| a.id == action_id).cloned())
    }

    async fn find_agent_actions(
        &self,
        workspace_id: Uuid,
        statuses: &[ContentStatus],
        limit: usize,
    ) -> anyhow::Result<Vec<AgentAction>> {
        let mut actions: Vec<AgentAction> = self
            .lock()
            .actions
            .iter()
            .filter(|a| a.workspace_id == workspace_id && statuses.contains(&a.status))
            .cloned()
            .collect();
        actions.sort_by_key(|a| a.created_at);
        actions.truncate(limit);
        Ok(actions)
    }

    async fn engagement_for(&self, post_ids: &[Uuid]) -> anyhow::Result<Vec<Engagement>> {
        let state = self.lock();
        Ok(post_ids
            .iter()
            .map(|&post_id| {
                let published = state
                    .comments
                    .iter()
                    .filter(|c| c.post_id == post_id && c.status == ContentStatus::Published);
                let (human, total) = published.fold((0, 0), |(h, t), c| {
                    (h + u32::from(c.author_type == AuthorType::Human), t + 1)
                });
                let upvotes = state
                    .votes
                    .values()
                    .filter(|v| v.post_id == post_id && v.value == VoteValue::Up)
                    .count() as u32;
                Engagement { post_id, upvotes, human_comments: human, total_comments: total }
            })
            .collect())
    }

    async fn upsert_vote(
        &self,
        user_id: Uuid,
        post_id: Uuid,
        value: VoteValue,
    ) -> anyhow::Result<VoteOutcome> {
        let mut state = self.lock();
        let key = (user_id, post_id);
        let outcome = VoteValue::resolve(state.votes.get(&key).map(|v| v.value), value);
        match outcome {
            VoteOutcome::Removed => {
                state.votes.remove(&key);
            }
            VoteOutcome::Created | VoteOutcome::Changed => {
                state.votes.insert(key, Vote { user_id, post_id, value });
            }
        }
        Ok(outcome)
    }
}

type Script = dyn Fn(&str, &str, usize) -> anyhow::Result<String> + Send + Sync;

/// A generator whose output is computed from `(system_prompt, user_prompt,
/// call_index)`. Call indexes start at 0 and are shared across prompts.
pub struct ScriptedGenerator {
    script: Box<Script>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(
        script: impl Fn(&str, &str, usize) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self { script: Box::new(script), calls: AtomicUsize::new(0) }
    }

    /// Always answers with the same text.
    pub fn constant(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _, _| Ok(text.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerationPort for ScriptedGenerator {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(system_prompt, user_prompt, n)
    }
}

/// Builders for rows that tests need in bulk.
pub mod fixtures {
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use crate::models::{
        AgentProfile, AuthorType, Comment, ContentStatus, DebateStatus, Post, PostAuthor,
        PostStatus, RiskLevel, SourceChannel,
    };

    pub fn agent(workspace_id: Uuid, handle: &str, topics: &[&str], style: &str) -> AgentProfile {
        AgentProfile {
            id: Uuid::now_v7(),
            workspace_id,
            display_name: handle.to_uppercase(),
            handle: handle.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            style: style.to_string(),
            risk_level: RiskLevel::Low,
            enabled: true,
            shadow_banned: false,
            created_at: Utc::now(),
        }
    }

    pub fn post(workspace_id: Uuid, author: PostAuthor, title: &str) -> Post {
        post_at(workspace_id, author, title, Utc::now())
    }

    pub fn post_at(
        workspace_id: Uuid,
        author: PostAuthor,
        title: &str,
        created_at: DateTime<Utc>,
    ) -> Post {
        Post {
            id: Uuid::now_v7(),
            workspace_id,
            author,
            title: title.to_string(),
            body: format!("Body of {title}"),
            status: PostStatus::Published,
            debate_status: DebateStatus::None,
            created_at,
            published_at: Some(created_at),
        }
    }

    pub fn human_comment(post: &Post, user_id: Uuid, body: &str) -> Comment {
        Comment {
            id: Uuid::now_v7(),
            workspace_id: post.workspace_id,
            post_id: post.id,
            parent_id: None,
            author_type: AuthorType::Human,
            author_id: user_id,
            body: body.to_string(),
            status: ContentStatus::Published,
            fingerprint: format!("manual-{}", Uuid::now_v7()),
            source_channel: SourceChannel::Manual,
            created_at: Utc::now(),
            published_at: Some(Utc::now()),
        }
    }
}
