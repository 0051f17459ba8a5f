//! # FeedRanker
//!
//! Time-decayed engagement ranking, recomputed on every read.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ra_core::{AppError, Engagement, PersistenceStore, Post, PostQuery, Result};
use serde::Serialize;
use uuid::Uuid;

/// Most recent published posts considered per ranking call.
pub const CANDIDATE_WINDOW: usize = 100;
const MIN_AGE_HOURS: f64 = 0.1;
const AGE_OFFSET_HOURS: f64 = 2.0;
const GRAVITY: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPost {
    pub post: Post,
    pub score: f64,
}

/// `raw / (age_hours + 2)^1.5`, age floored at 0.1h. Always finite.
pub fn decay_score(engagement: &Engagement, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_hours = ((now - created_at).num_milliseconds() as f64 / 3_600_000.0).max(MIN_AGE_HOURS);
    engagement.raw() / (age_hours + AGE_OFFSET_HOURS).powf(GRAVITY)
}

/// Sorts by score descending, newer first on ties, and keeps `limit`.
pub fn rank_posts(
    posts: Vec<Post>,
    engagement: &HashMap<Uuid, Engagement>,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<RankedPost> {
    let mut ranked: Vec<RankedPost> = posts
        .into_iter()
        .map(|post| {
            let stats = engagement.get(&post.id).copied().unwrap_or_default();
            let score = decay_score(&stats, post.created_at, now);
            RankedPost { post, score }
        })
        .collect();
    ranked.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => b.post.created_at.cmp(&a.post.created_at),
        other => other,
    });
    ranked.truncate(limit);
    ranked
}

pub struct FeedRanker {
    store: Arc<dyn PersistenceStore>,
}

impl FeedRanker {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self { store }
    }

    pub async fn rank(&self, workspace_id: Uuid, limit: usize) -> Result<Vec<RankedPost>> {
        self.rank_at(workspace_id, limit, Utc::now()).await
    }

    pub async fn rank_at(
        &self,
        workspace_id: Uuid,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<RankedPost>> {
        if limit == 0 {
            return Err(AppError::ValidationError("feed limit must be at least 1".into()));
        }
        let posts = self
            .store
            .find_recent_posts(workspace_id, &PostQuery::published().limit(CANDIDATE_WINDOW))
            .await?;
        let ids: Vec<Uuid> = posts.iter().map(|p| p.id).collect();
        let engagement: HashMap<Uuid, Engagement> = self
            .store
            .engagement_for(&ids)
            .await?
            .into_iter()
            .map(|e| (e.post_id, e))
            .collect();
        Ok(rank_posts(posts, &engagement, now, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ra_core::testing::{fixtures, MemoryStore};
    use ra_core::{PersistenceStore, PostAuthor, VoteValue};

    fn engagement(post_id: Uuid, upvotes: u32, human: u32, total: u32) -> Engagement {
        Engagement { post_id, upvotes, human_comments: human, total_comments: total }
    }

    #[test]
    fn test_raw_weights() {
        let e = engagement(Uuid::now_v7(), 2, 1, 4);
        assert_eq!(e.raw(), 2.0 * 3.0 + 5.0 + 4.0);
    }

    #[test]
    fn test_zero_engagement_is_finite() {
        let now = Utc::now();
        let score = decay_score(&Engagement::default(), now, now);
        assert!(score.is_finite());
        assert_eq!(score, 0.0);
        // created in the future still uses the floor
        let score = decay_score(&engagement(Uuid::nil(), 1, 0, 0), now + Duration::hours(1), now);
        assert!((score - 3.0 / 2.1f64.powf(1.5)).abs() < 1e-9);
    }

    #[test]
    fn test_newer_post_wins_on_equal_engagement() {
        let ws = Uuid::now_v7();
        let now = Utc::now();
        let author = PostAuthor::Human(Uuid::now_v7());
        let older = fixtures::post_at(ws, author, "older", now - Duration::hours(2));
        let newer = fixtures::post_at(ws, author, "newer", now - Duration::hours(1));
        let stats: HashMap<Uuid, Engagement> = [
            (older.id, engagement(older.id, 1, 1, 1)),
            (newer.id, engagement(newer.id, 1, 1, 1)),
        ]
        .into_iter()
        .collect();

        let ranked = rank_posts(vec![older.clone(), newer.clone()], &stats, now, 10);
        assert_eq!(ranked[0].post.id, newer.id);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_ties_break_by_recency_and_limit_applies() {
        let ws = Uuid::now_v7();
        let now = Utc::now();
        let author = PostAuthor::Human(Uuid::now_v7());
        let posts: Vec<Post> = (0..5)
            .map(|i| fixtures::post_at(ws, author, &format!("p{i}"), now - Duration::hours(i)))
            .collect();
        let ranked = rank_posts(posts.clone(), &HashMap::new(), now, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].post.id, posts[0].id);
        assert_eq!(ranked[2].post.id, posts[2].id);
    }

    #[tokio::test]
    async fn test_rank_reads_votes_and_comments() {
        let ws = Uuid::now_v7();
        let store = Arc::new(MemoryStore::new());
        let author = PostAuthor::Human(Uuid::now_v7());
        let now = Utc::now();
        let quiet = fixtures::post_at(ws, author, "quiet", now - Duration::minutes(10));
        let busy = fixtures::post_at(ws, author, "busy", now - Duration::hours(3));
        store.add_post(quiet.clone());
        store.add_post(busy.clone());
        store.add_comment(fixtures::human_comment(&busy, Uuid::now_v7(), "first"));
        store.upsert_vote(Uuid::now_v7(), busy.id, VoteValue::Up).await.unwrap();

        let ranker = FeedRanker::new(store);
        let feed = ranker.rank_at(ws, 10, now).await.unwrap();
        assert_eq!(feed[0].post.id, busy.id);
        assert_eq!(feed[1].score, 0.0);

        assert!(matches!(ranker.rank(ws, 0).await, Err(AppError::ValidationError(_))));
    }
}
