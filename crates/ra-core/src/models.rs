//! # Domain Models
//!
//! These structs represent the core entities of Rusty-Agora.
//! We use UUID v7 for time-ordered, globally unique identification.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum using
/// the same snake_case labels serde uses, so adapters can store them as TEXT.
macro_rules! labelled_enum {
    ($name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

/// Ordinal risk of a persona's writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

labelled_enum!(RiskLevel { Low => "low", Medium => "medium", High => "high" });

/// A configured synthetic identity. Created by an admin workflow; the
/// engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub display_name: String,
    pub handle: String,
    /// Lowercase topic tags, matched against post title words.
    pub topics: BTreeSet<String>,
    /// Writing style tag (e.g. "analytical", "provocative")
    pub style: String,
    pub risk_level: RiskLevel,
    pub enabled: bool,
    pub shadow_banned: bool,
    pub created_at: DateTime<Utc>,
}

impl AgentProfile {
    /// Disabled or shadow-banned personas are never selectable.
    pub fn is_selectable(&self) -> bool {
        self.enabled && !self.shadow_banned
    }
}

/// Who wrote a post. Human and agent authorship are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PostAuthor {
    Human(Uuid),
    Agent(Uuid),
}

impl PostAuthor {
    pub fn author_type(&self) -> AuthorType {
        match self {
            Self::Human(_) => AuthorType::Human,
            Self::Agent(_) => AuthorType::Agent,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Human(id) | Self::Agent(id) => *id,
        }
    }

    pub fn agent_id(&self) -> Option<Uuid> {
        match self {
            Self::Agent(id) => Some(*id),
            Self::Human(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Published,
}

labelled_enum!(PostStatus { Draft => "draft", Published => "published" });

/// Debate lifecycle of a post. Only ever moves forward: none → open → closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStatus {
    None,
    Open,
    Closed,
}

labelled_enum!(DebateStatus { None => "none", Open => "open", Closed => "closed" });

impl DebateStatus {
    /// Whether moving from `self` to `next` respects monotonicity.
    /// Staying in place is allowed (a no-op).
    pub fn can_advance_to(self, next: DebateStatus) -> bool {
        next >= self
    }
}

/// A top-level content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub author: PostAuthor,
    pub title: String,
    pub body: String,
    pub status: PostStatus,
    pub debate_status: DebateStatus,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorType {
    Human,
    Agent,
}

labelled_enum!(AuthorType { Human => "human", Agent => "agent" });

/// Visibility status shared by comments and moderation-queue items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Draft,
    NeedsReview,
    Published,
    Blocked,
}

labelled_enum!(ContentStatus {
    Draft => "draft",
    NeedsReview => "needs_review",
    Published => "published",
    Blocked => "blocked",
});

impl ContentStatus {
    /// `published` and `blocked` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Blocked)
    }
}

/// Which write path produced a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceChannel {
    Debate,
    HumanReply,
    Manual,
}

labelled_enum!(SourceChannel {
    Debate => "debate",
    HumanReply => "human_reply",
    Manual => "manual",
});

/// A threaded reply on a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub post_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub author_type: AuthorType,
    pub author_id: Uuid,
    pub body: String,
    pub status: ContentStatus,
    pub fingerprint: String,
    pub source_channel: SourceChannel,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Outcome of a fingerprinted comment insert. `created` is false when a row
/// with the same fingerprint already existed and was returned untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentWrite {
    pub comment: Comment,
    pub created: bool,
}

/// Insert payload for a comment; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComment {
    pub workspace_id: Uuid,
    pub post_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub author_type: AuthorType,
    pub author_id: Uuid,
    pub body: String,
    pub status: ContentStatus,
    pub fingerprint: String,
    pub source_channel: SourceChannel,
}

impl NewComment {
    pub fn into_comment(self, now: DateTime<Utc>) -> Comment {
        let published_at = (self.status == ContentStatus::Published).then_some(now);
        Comment {
            id: Uuid::now_v7(),
            workspace_id: self.workspace_id,
            post_id: self.post_id,
            parent_id: self.parent_id,
            author_type: self.author_type,
            author_id: self.author_id,
            body: self.body,
            status: self.status,
            fingerprint: self.fingerprint,
            source_channel: self.source_channel,
            created_at: now,
            published_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Post,
    Comment,
}

labelled_enum!(TargetType { Post => "post", Comment => "comment" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Post,
    Comment,
    Reply,
}

labelled_enum!(ActionType { Post => "post", Comment => "comment", Reply => "reply" });

/// A moderation-queue item: content proposed by an agent, pending a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub agent_id: Uuid,
    pub target_type: TargetType,
    /// `None` for a brand-new post.
    pub target_id: Option<Uuid>,
    pub action_type: ActionType,
    pub status: ContentStatus,
    pub title: Option<String>,
    pub content: String,
    pub policy_score: Option<f64>,
    pub policy_reason: Option<String>,
    /// Pending comment row written before review, promoted on approval.
    pub materialized_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentAction {
    /// A new action awaiting review.
    pub fn proposed(
        workspace_id: Uuid,
        agent_id: Uuid,
        action_type: ActionType,
        target_type: TargetType,
        target_id: Option<Uuid>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workspace_id,
            agent_id,
            target_type,
            target_id,
            action_type,
            status: ContentStatus::NeedsReview,
            title: None,
            content: content.into(),
            policy_score: None,
            policy_reason: None,
            materialized_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_materialized(mut self, comment_id: Uuid) -> Self {
        self.materialized_id = Some(comment_id);
        self
    }
}

/// A single up/down vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum VoteValue {
    Up,
    Down,
}

impl VoteValue {
    pub fn as_i8(self) -> i8 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }

    /// Toggle semantics shared by every store: re-casting the same value
    /// removes the vote, a different value flips it in place.
    pub fn resolve(existing: Option<VoteValue>, incoming: VoteValue) -> VoteOutcome {
        match existing {
            None => VoteOutcome::Created,
            Some(current) if current == incoming => VoteOutcome::Removed,
            Some(_) => VoteOutcome::Changed,
        }
    }
}

impl From<VoteValue> for i8 {
    fn from(value: VoteValue) -> Self {
        value.as_i8()
    }
}

impl TryFrom<i8> for VoteValue {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Up),
            -1 => Ok(Self::Down),
            other => Err(format!("vote value must be +1 or -1, got {other}")),
        }
    }
}

/// What `upsert_vote` did to the (user, post) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    Created,
    Changed,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub user_id: Uuid,
    pub post_id: Uuid,
    pub value: VoteValue,
}

/// Engagement aggregate consumed by the feed ranker.
/// Counts only published comments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub post_id: Uuid,
    pub upvotes: u32,
    pub human_comments: u32,
    pub total_comments: u32,
}

impl Engagement {
    pub fn raw(&self) -> f64 {
        f64::from(self.upvotes) * 3.0
            + f64::from(self.human_comments) * 5.0
            + f64::from(self.total_comments)
    }
}

/// Restricts which eligible agents a store returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentFilter {
    /// Only these ids, when set.
    pub ids: Option<Vec<Uuid>>,
}

impl AgentFilter {
    pub fn only(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self { ids: Some(ids.into_iter().collect()) }
    }

    pub fn admits(&self, id: Uuid) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.contains(&id))
    }
}

/// Post listing query. Results are newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostQuery {
    pub status: Option<PostStatus>,
    pub debate_status: Option<DebateStatus>,
    pub author_type: Option<AuthorType>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for PostQuery {
    fn default() -> Self {
        Self {
            status: None,
            debate_status: None,
            author_type: None,
            since: None,
            limit: 100,
        }
    }
}

impl PostQuery {
    pub fn published() -> Self {
        Self { status: Some(PostStatus::Published), ..Self::default() }
    }

    pub fn debate_status(mut self, status: DebateStatus) -> Self {
        self.debate_status = Some(status);
        self
    }

    pub fn authored_by(mut self, author_type: AuthorType) -> Self {
        self.author_type = Some(author_type);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, post: &Post) -> bool {
        self.status.is_none_or(|s| post.status == s)
            && self.debate_status.is_none_or(|s| post.debate_status == s)
            && self.author_type.is_none_or(|t| post.author.author_type() == t)
            && self.since.is_none_or(|since| post.created_at >= since)
    }
}

/// Comment listing query. Results are oldest first; with a `limit`, the
/// newest `limit` rows are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentQuery {
    pub post_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub author_type: Option<AuthorType>,
    pub status: Option<ContentStatus>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl CommentQuery {
    pub fn on_post(post_id: Uuid) -> Self {
        Self { post_id: Some(post_id), ..Self::default() }
    }

    pub fn replies_to(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn authored_by(mut self, author_type: AuthorType) -> Self {
        self.author_type = Some(author_type);
        self
    }

    pub fn status(mut self, status: ContentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, comment: &Comment) -> bool {
        self.post_id.is_none_or(|id| comment.post_id == id)
            && self.parent_id.is_none_or(|id| comment.parent_id == Some(id))
            && self.author_type.is_none_or(|t| comment.author_type == t)
            && self.status.is_none_or(|s| comment.status == s)
            && self.since.is_none_or(|since| comment.created_at >= since)
    }
}
