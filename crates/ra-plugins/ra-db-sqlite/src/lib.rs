//! # ra-db-sqlite Implementation
//!
//! This module implements the data mapping between the SQLite relational model
//! and the `ra-core` domain models.

use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use ra_core::models::{
    AgentAction, AgentFilter, AgentProfile, AuthorType, Comment, CommentQuery, CommentWrite,
    ContentStatus, DebateStatus, Engagement, NewComment, Post, PostAuthor, PostQuery, VoteOutcome,
    VoteValue,
};
use ra_core::traits::PersistenceStore;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info};
use uuid::Uuid;

pub struct SqliteStore {
    pool: SqlitePool,
}

// Helper for UUID conversion
fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn blob_to_uuid(blob: &[u8]) -> anyhow::Result<Uuid> {
    Uuid::from_slice(blob).context("malformed uuid column")
}

fn get_uuid(row: &SqliteRow, column: &str) -> anyhow::Result<Uuid> {
    blob_to_uuid(&row.try_get::<Vec<u8>, _>(column)?)
}

fn get_opt_uuid(row: &SqliteRow, column: &str) -> anyhow::Result<Option<Uuid>> {
    row.try_get::<Option<Vec<u8>>, _>(column)?
        .map(|blob| blob_to_uuid(&blob))
        .transpose()
}

/// Decodes a TEXT column holding one of the snake_case enum labels.
fn get_label<T: FromStr<Err = String>>(row: &SqliteRow, column: &str) -> anyhow::Result<T> {
    row.try_get::<String, _>(column)?.parse().map_err(anyhow::Error::msg)
}

fn debate_rank(status: DebateStatus) -> i64 {
    match status {
        DebateStatus::None => 0,
        DebateStatus::Open => 1,
        DebateStatus::Closed => 2,
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn row_to_agent(row: &SqliteRow) -> anyhow::Result<AgentProfile> {
    Ok(AgentProfile {
        id: get_uuid(row, "id")?,
        workspace_id: get_uuid(row, "workspace_id")?,
        display_name: row.try_get("display_name")?,
        handle: row.try_get("handle")?,
        topics: serde_json::from_str(&row.try_get::<String, _>("topics")?)
            .context("agents.topics is not a JSON string array")?,
        style: row.try_get("style")?,
        risk_level: get_label(row, "risk_level")?,
        enabled: row.try_get("enabled")?,
        shadow_banned: row.try_get("shadow_banned")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_post(row: &SqliteRow) -> anyhow::Result<Post> {
    let author_id = get_uuid(row, "author_id")?;
    let author = match get_label::<AuthorType>(row, "author_type")? {
        AuthorType::Human => PostAuthor::Human(author_id),
        AuthorType::Agent => PostAuthor::Agent(author_id),
    };
    Ok(Post {
        id: get_uuid(row, "id")?,
        workspace_id: get_uuid(row, "workspace_id")?,
        author,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        status: get_label(row, "status")?,
        debate_status: get_label(row, "debate_status")?,
        created_at: row.try_get("created_at")?,
        published_at: row.try_get("published_at")?,
    })
}

fn row_to_comment(row: &SqliteRow) -> anyhow::Result<Comment> {
    Ok(Comment {
        id: get_uuid(row, "id")?,
        workspace_id: get_uuid(row, "workspace_id")?,
        post_id: get_uuid(row, "post_id")?,
        parent_id: get_opt_uuid(row, "parent_id")?,
        author_type: get_label(row, "author_type")?,
        author_id: get_uuid(row, "author_id")?,
        body: row.try_get("body")?,
        status: get_label(row, "status")?,
        fingerprint: row.try_get("fingerprint")?,
        source_channel: get_label(row, "source_channel")?,
        created_at: row.try_get("created_at")?,
        published_at: row.try_get("published_at")?,
    })
}

fn row_to_action(row: &SqliteRow) -> anyhow::Result<AgentAction> {
    Ok(AgentAction {
        id: get_uuid(row, "id")?,
        workspace_id: get_uuid(row, "workspace_id")?,
        agent_id: get_uuid(row, "agent_id")?,
        target_type: get_label(row, "target_type")?,
        target_id: get_opt_uuid(row, "target_id")?,
        action_type: get_label(row, "action_type")?,
        status: get_label(row, "status")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        policy_score: row.try_get("policy_score")?,
        policy_reason: row.try_get("policy_reason")?,
        materialized_id: get_opt_uuid(row, "materialized_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl SqliteStore {
    /// Connects and applies pending migrations.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        Self::connect(database_url, 5).await
    }

    /// In-memory databases live on one connection, so the pool is pinned to
    /// a single, never-recycled connection for them.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url {database_url}"))?
            .create_if_missing(true)
            .foreign_keys(true);
        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections.max(1) })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open {database_url}"))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to apply migrations")?;
        info!("sqlite schema up to date");
        Ok(())
    }

    /// Creates or replaces a persona. Agents are managed outside the engine;
    /// this is the seeding entry point.
    pub async fn insert_agent(&self, agent: &AgentProfile) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO agents (id, workspace_id, display_name, handle, topics, style, risk_level, enabled, shadow_banned, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                display_name = excluded.display_name,
                handle = excluded.handle,
                topics = excluded.topics,
                style = excluded.style,
                risk_level = excluded.risk_level,
                enabled = excluded.enabled,
                shadow_banned = excluded.shadow_banned",
        )
        .bind(uuid_to_blob(agent.id))
        .bind(uuid_to_blob(agent.workspace_id))
        .bind(&agent.display_name)
        .bind(&agent.handle)
        .bind(serde_json::to_string(&agent.topics)?)
        .bind(&agent.style)
        .bind(agent.risk_level.as_str())
        .bind(agent.enabled)
        .bind(agent.shadow_banned)
        .bind(agent.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for SqliteStore {
    async fn find_agents_eligible(
        &self,
        workspace_id: Uuid,
        filter: &AgentFilter,
    ) -> anyhow::Result<Vec<AgentProfile>> {
        let rows = sqlx::query(
            "SELECT * FROM agents WHERE workspace_id = ? AND enabled = 1 AND shadow_banned = 0 ORDER BY created_at, id",
        )
        .bind(uuid_to_blob(workspace_id))
        .fetch_all(&self.pool)
        .await?;

        let mut agents = Vec::with_capacity(rows.len());
        for row in &rows {
            let agent = row_to_agent(row)?;
            if filter.admits(agent.id) {
                agents.push(agent);
            }
        }
        Ok(agents)
    }

    async fn find_agent(&self, agent_id: Uuid) -> anyhow::Result<Option<AgentProfile>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(uuid_to_blob(agent_id))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_agent).transpose()
    }

    async fn find_post(&self, post_id: Uuid) -> anyhow::Result<Option<Post>> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(uuid_to_blob(post_id))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_post).transpose()
    }

    async fn insert_post(&self, post: Post) -> anyhow::Result<Post> {
        let result = sqlx::query(
            "INSERT INTO posts (id, workspace_id, author_type, author_id, title, body, status, debate_status, created_at, published_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(uuid_to_blob(post.id))
        .bind(uuid_to_blob(post.workspace_id))
        .bind(post.author.author_type().as_str())
        .bind(uuid_to_blob(post.author.id()))
        .bind(&post.title)
        .bind(&post.body)
        .bind(post.status.as_str())
        .bind(post.debate_status.as_str())
        .bind(post.created_at)
        .bind(post.published_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(post = %post.id, "post already stored");
            return self
                .find_post(post.id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("post {} vanished after conflict", post.id));
        }
        Ok(post)
    }

    async fn find_recent_posts(
        &self,
        workspace_id: Uuid,
        query: &PostQuery,
    ) -> anyhow::Result<Vec<Post>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM posts WHERE workspace_id = ");
        qb.push_bind(uuid_to_blob(workspace_id));
        if let Some(status) = query.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(debate_status) = query.debate_status {
            qb.push(" AND debate_status = ").push_bind(debate_status.as_str());
        }
        if let Some(author_type) = query.author_type {
            qb.push(" AND author_type = ").push_bind(author_type.as_str());
        }
        if let Some(since) = query.since {
            qb.push(" AND created_at >= ").push_bind(since);
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(sql_limit(query.limit));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_post).collect()
    }

    async fn update_post_debate_status(
        &self,
        post_id: Uuid,
        status: DebateStatus,
    ) -> anyhow::Result<DebateStatus> {
        // The rank guard makes the write a compare-and-set against a
        // concurrent close.
        sqlx::query(
            "UPDATE posts SET debate_status = ?
             WHERE id = ?
               AND (CASE debate_status WHEN 'none' THEN 0 WHEN 'open' THEN 1 ELSE 2 END) <= ?",
        )
        .bind(status.as_str())
        .bind(uuid_to_blob(post_id))
        .bind(debate_rank(status))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT debate_status FROM posts WHERE id = ?")
            .bind(uuid_to_blob(post_id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow::anyhow!("post {post_id} not found"))?;
        let stored: DebateStatus = get_label(&row, "debate_status")?;
        if stored != status {
            debug!(%post_id, requested = %status, %stored, "debate status kept");
        }
        Ok(stored)
    }

    async fn find_comment(&self, comment_id: Uuid) -> anyhow::Result<Option<Comment>> {
        let row = sqlx::query("SELECT * FROM comments WHERE id = ?")
            .bind(uuid_to_blob(comment_id))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_comment).transpose()
    }

    async fn find_by_fingerprint(
        &self,
        workspace_id: Uuid,
        fingerprint: &str,
    ) -> anyhow::Result<Option<Comment>> {
        let row = sqlx::query("SELECT * FROM comments WHERE workspace_id = ? AND fingerprint = ? LIMIT 1")
            .bind(uuid_to_blob(workspace_id))
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_comment).transpose()
    }

    /// The unique fingerprint index turns a lost race into a no-op insert;
    /// either way the stored row is read back and returned.
    async fn insert_comment(&self, comment: NewComment) -> anyhow::Result<CommentWrite> {
        let row = comment.into_comment(Utc::now());
        let result = sqlx::query(
            "INSERT INTO comments (id, workspace_id, post_id, parent_id, author_type, author_id, body, status, fingerprint, source_channel, created_at, published_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(uuid_to_blob(row.id))
        .bind(uuid_to_blob(row.workspace_id))
        .bind(uuid_to_blob(row.post_id))
        .bind(row.parent_id.map(uuid_to_blob))
        .bind(row.author_type.as_str())
        .bind(uuid_to_blob(row.author_id))
        .bind(&row.body)
        .bind(row.status.as_str())
        .bind(&row.fingerprint)
        .bind(row.source_channel.as_str())
        .bind(row.created_at)
        .bind(row.published_at)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() > 0;
        if !created {
            debug!(fingerprint = %row.fingerprint, "duplicate comment collapsed");
        }
        let comment = self
            .find_by_fingerprint(row.workspace_id, &row.fingerprint)
            .await?
            .ok_or_else(|| anyhow::anyhow!("comment {} vanished after insert", row.fingerprint))?;
        Ok(CommentWrite { comment, created })
    }

    async fn update_comment_status(
        &self,
        comment_id: Uuid,
        status: ContentStatus,
    ) -> anyhow::Result<Option<Comment>> {
        let published_at = (status == ContentStatus::Published).then(Utc::now);
        sqlx::query(
            "UPDATE comments SET status = ?, published_at = COALESCE(published_at, ?)
             WHERE id = ? AND status IN ('draft', 'needs_review')",
        )
        .bind(status.as_str())
        .bind(published_at)
        .bind(uuid_to_blob(comment_id))
        .execute(&self.pool)
        .await?;
        self.find_comment(comment_id).await
    }

    async fn find_recent_comments(
        &self,
        workspace_id: Uuid,
        query: &CommentQuery,
    ) -> anyhow::Result<Vec<Comment>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM comments WHERE workspace_id = ");
        qb.push_bind(uuid_to_blob(workspace_id));
        if let Some(post_id) = query.post_id {
            qb.push(" AND post_id = ").push_bind(uuid_to_blob(post_id));
        }
        if let Some(parent_id) = query.parent_id {
            qb.push(" AND parent_id = ").push_bind(uuid_to_blob(parent_id));
        }
        if let Some(author_type) = query.author_type {
            qb.push(" AND author_type = ").push_bind(author_type.as_str());
        }
        if let Some(status) = query.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(since) = query.since {
            qb.push(" AND created_at >= ").push_bind(since);
        }
        // Newest `limit` rows, returned oldest first.
        qb.push(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(sql_limit(limit));
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut comments = rows.iter().map(row_to_comment).collect::<anyhow::Result<Vec<_>>>()?;
        comments.reverse();
        Ok(comments)
    }

    async fn insert_or_update_agent_action(
        &self,
        action: AgentAction,
    ) -> anyhow::Result<AgentAction> {
        sqlx::query(
            "INSERT INTO agent_actions (id, workspace_id, agent_id, target_type, target_id, action_type, status, title, content, policy_score, policy_reason, materialized_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                status = excluded.status,
                title = excluded.title,
                content = excluded.content,
                policy_score = excluded.policy_score,
                policy_reason = excluded.policy_reason,
                materialized_id = excluded.materialized_id,
                updated_at = excluded.updated_at",
        )
        .bind(uuid_to_blob(action.id))
        .bind(uuid_to_blob(action.workspace_id))
        .bind(uuid_to_blob(action.agent_id))
        .bind(action.target_type.as_str())
        .bind(action.target_id.map(uuid_to_blob))
        .bind(action.action_type.as_str())
        .bind(action.status.as_str())
        .bind(&action.title)
        .bind(&action.content)
        .bind(action.policy_score)
        .bind(&action.policy_reason)
        .bind(action.materialized_id.map(uuid_to_blob))
        .bind(action.created_at)
        .bind(action.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(action)
    }

    async fn find_agent_action(&self, action_id: Uuid) -> anyhow::Result<Option<AgentAction>> {
        let row = sqlx::query("SELECT * FROM agent_actions WHERE id = ?")
            .bind(uuid_to_blob(action_id))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_action).transpose()
    }

    async fn find_agent_actions(
        &self,
        workspace_id: Uuid,
        statuses: &[ContentStatus],
        limit: usize,
    ) -> anyhow::Result<Vec<AgentAction>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM agent_actions WHERE workspace_id = ");
        qb.push_bind(uuid_to_blob(workspace_id));
        qb.push(" AND status IN (");
        let mut separated = qb.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");
        qb.push(" ORDER BY created_at ASC, id ASC LIMIT ").push_bind(sql_limit(limit));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_action).collect()
    }

    async fn engagement_for(&self, post_ids: &[Uuid]) -> anyhow::Result<Vec<Engagement>> {
        let mut stats = Vec::with_capacity(post_ids.len());
        for &post_id in post_ids {
            let blob = uuid_to_blob(post_id);
            let row = sqlx::query(
                "SELECT
                    (SELECT COUNT(*) FROM votes WHERE post_id = ? AND value = 1) AS upvotes,
                    (SELECT COUNT(*) FROM comments WHERE post_id = ? AND status = 'published' AND author_type = 'human') AS human_comments,
                    (SELECT COUNT(*) FROM comments WHERE post_id = ? AND status = 'published') AS total_comments",
            )
            .bind(&blob)
            .bind(&blob)
            .bind(&blob)
            .fetch_one(&self.pool)
            .await?;

            stats.push(Engagement {
                post_id,
                upvotes: u32::try_from(row.try_get::<i64, _>("upvotes")?)?,
                human_comments: u32::try_from(row.try_get::<i64, _>("human_comments")?)?,
                total_comments: u32::try_from(row.try_get::<i64, _>("total_comments")?)?,
            });
        }
        Ok(stats)
    }

    async fn upsert_vote(
        &self,
        user_id: Uuid,
        post_id: Uuid,
        value: VoteValue,
    ) -> anyhow::Result<VoteOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT value FROM votes WHERE user_id = ? AND post_id = ?")
                .bind(uuid_to_blob(user_id))
                .bind(uuid_to_blob(post_id))
                .fetch_optional(&mut *tx)
                .await?;
        let existing = existing
            .map(|v| VoteValue::try_from(i8::try_from(v)?).map_err(anyhow::Error::msg))
            .transpose()?;

        let outcome = VoteValue::resolve(existing, value);
        match outcome {
            VoteOutcome::Removed => {
                sqlx::query("DELETE FROM votes WHERE user_id = ? AND post_id = ?")
                    .bind(uuid_to_blob(user_id))
                    .bind(uuid_to_blob(post_id))
                    .execute(&mut *tx)
                    .await?;
            }
            VoteOutcome::Changed => {
                sqlx::query("UPDATE votes SET value = ? WHERE user_id = ? AND post_id = ?")
                    .bind(i64::from(value.as_i8()))
                    .bind(uuid_to_blob(user_id))
                    .bind(uuid_to_blob(post_id))
                    .execute(&mut *tx)
                    .await?;
            }
            VoteOutcome::Created => {
                sqlx::query("INSERT INTO votes (user_id, post_id, value, created_at) VALUES (?, ?, ?, ?)")
                    .bind(uuid_to_blob(user_id))
                    .bind(uuid_to_blob(post_id))
                    .bind(i64::from(value.as_i8()))
                    .bind(Utc::now())
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }
}
