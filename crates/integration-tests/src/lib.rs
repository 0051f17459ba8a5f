//! Shared harness for the end-to-end tests: an in-memory SQLite store,
//! seeding helpers and a deterministic text generator.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ra_core::testing::{fixtures, ScriptedGenerator};
use ra_core::{
    AgentProfile, AuthorType, Comment, ContentStatus, NewComment, PersistenceStore, Post,
    PostAuthor, SourceChannel,
};
use ra_db_sqlite::SqliteStore;
use uuid::Uuid;

pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub workspace_id: Uuid,
}

impl Harness {
    pub async fn new() -> anyhow::Result<Self> {
        let store = SqliteStore::new("sqlite::memory:").await?;
        Ok(Self { store: Arc::new(store), workspace_id: Uuid::now_v7() })
    }

    pub fn store(&self) -> Arc<dyn PersistenceStore> {
        self.store.clone()
    }

    pub async fn agent(&self, handle: &str, topics: &[&str]) -> anyhow::Result<AgentProfile> {
        let agent = fixtures::agent(self.workspace_id, handle, topics, "plain");
        self.store.insert_agent(&agent).await?;
        Ok(agent)
    }

    pub async fn human_post(&self, title: &str) -> anyhow::Result<Post> {
        self.human_post_at(title, Utc::now()).await
    }

    pub async fn human_post_at(&self, title: &str, created_at: DateTime<Utc>) -> anyhow::Result<Post> {
        let post = fixtures::post_at(self.workspace_id, PostAuthor::Human(Uuid::now_v7()), title, created_at);
        self.store.insert_post(post).await
    }

    pub async fn human_comment(&self, post: &Post, body: &str) -> anyhow::Result<Comment> {
        self.store
            .insert_comment(NewComment {
                workspace_id: self.workspace_id,
                post_id: post.id,
                parent_id: None,
                author_type: AuthorType::Human,
                author_id: Uuid::now_v7(),
                body: body.to_string(),
                status: ContentStatus::Published,
                fingerprint: format!("manual-{}", Uuid::now_v7()),
                source_channel: SourceChannel::Manual,
            })
            .await
            .map(|write| write.comment)
    }
}

/// The `@handle` named in a persona system prompt.
pub fn handle_of(system_prompt: &str) -> &str {
    system_prompt
        .split("(@")
        .nth(1)
        .and_then(|rest| rest.split(')').next())
        .unwrap_or("anon")
}

fn stance_of(user_prompt: &str) -> &str {
    user_prompt
        .split("Your stance for this comment: ")
        .nth(1)
        .and_then(|rest| rest.split('.').next())
        .unwrap_or("none")
}

/// Answers every prompt kind deterministically. Debate lines depend only on
/// the persona and the stance, so reruns reproduce the same text.
pub fn deterministic_generator() -> Arc<ScriptedGenerator> {
    Arc::new(ScriptedGenerator::new(|system, user, _| {
        let handle = handle_of(system);
        if user.contains("\"should_respond\"") {
            Ok(format!(
                r#"{{"should_respond": true, "reasoning": "on topic", "response_type": "question", "response": "{handle} wants to know more"}}"#
            ))
        } else if user.contains("\"title\"") {
            Ok(format!(r#"{{"title": "A question from {handle}", "body": "What do you think?"}}"#))
        } else {
            Ok(format!("{handle} argues a {} position", stance_of(user)))
        }
    }))
}
