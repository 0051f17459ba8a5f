use std::collections::HashSet;

use integration_tests::{deterministic_generator, Harness};
use ra_core::{
    ActionType, AuthorType, CommentQuery, ContentStatus, DebateStatus, NewComment,
    PersistenceStore, SourceChannel, TargetType,
};
use ra_engine::{fingerprint, DebateOrchestrator, ModerationGate};
use uuid::Uuid;

const ALL_STATUSES: [ContentStatus; 4] = [
    ContentStatus::Draft,
    ContentStatus::NeedsReview,
    ContentStatus::Published,
    ContentStatus::Blocked,
];

#[tokio::test]
async fn racing_stage_calls_enqueue_one_action() {
    let h = Harness::new().await.unwrap();
    let ada = h.agent("ada", &[]).await.unwrap();
    let post = h.human_post("Monorepo or polyrepo").await.unwrap();
    let body = "Monorepo until the build graph says otherwise.";
    let draft = NewComment {
        workspace_id: h.workspace_id,
        post_id: post.id,
        parent_id: None,
        author_type: AuthorType::Agent,
        author_id: ada.id,
        body: body.into(),
        status: ContentStatus::Draft,
        fingerprint: fingerprint(h.workspace_id, post.id, ada.id, SourceChannel::Debate, body),
        source_channel: SourceChannel::Debate,
    };

    let (left, right) = (ModerationGate::new(h.store()), ModerationGate::new(h.store()));
    let (a, b) = tokio::join!(
        left.stage_comment(draft.clone(), ActionType::Comment, TargetType::Post, post.id, true),
        right.stage_comment(draft, ActionType::Comment, TargetType::Post, post.id, false),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.id, b.id);

    let comments = h
        .store
        .find_recent_comments(h.workspace_id, &CommentQuery::on_post(post.id))
        .await
        .unwrap();
    assert_eq!(comments.len(), 1);

    let actions = h.store.find_agent_actions(h.workspace_id, &ALL_STATUSES, 50).await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].materialized_id, Some(comments[0].id));
    assert_eq!(actions[0].status, comments[0].status);
}

#[tokio::test]
async fn racing_debates_write_one_action_per_fingerprint() {
    let h = Harness::new().await.unwrap();
    let ada = h.agent("ada", &[]).await.unwrap();
    let bo = h.agent("bo", &[]).await.unwrap();
    let post = h.human_post("Is ORM worth it").await.unwrap();
    let debates = DebateOrchestrator::new(h.store(), deterministic_generator());
    let agents = [ada.id, bo.id];

    let (first, second) = tokio::join!(
        debates.spawn_debate(h.workspace_id, post.id, &agents, 2, true),
        debates.spawn_debate(h.workspace_id, post.id, &agents, 2, true),
    );
    assert_eq!(first.unwrap().len(), 4);
    assert_eq!(second.unwrap().len(), 4);

    let comments = h
        .store
        .find_recent_comments(h.workspace_id, &CommentQuery::on_post(post.id))
        .await
        .unwrap();
    let fingerprints: HashSet<&str> = comments.iter().map(|c| c.fingerprint.as_str()).collect();
    assert_eq!(comments.len(), 4);
    assert_eq!(fingerprints.len(), 4);
    assert!(comments.iter().all(|c| c.status == ContentStatus::Published));

    let actions = h.store.find_agent_actions(h.workspace_id, &ALL_STATUSES, 50).await.unwrap();
    assert_eq!(actions.len(), comments.len());
    let materialized: HashSet<Uuid> = actions.iter().filter_map(|a| a.materialized_id).collect();
    let comment_ids: HashSet<Uuid> = comments.iter().map(|c| c.id).collect();
    assert_eq!(materialized, comment_ids);
}

#[tokio::test]
async fn close_racing_a_debate_stays_closed() {
    let h = Harness::new().await.unwrap();
    let ada = h.agent("ada", &[]).await.unwrap();
    let post = h.human_post("Should we freeze the API").await.unwrap();
    let debates = DebateOrchestrator::new(h.store(), deterministic_generator());

    let participants = [ada.id];
    let (spawned, closed) = tokio::join!(
        debates.spawn_debate(h.workspace_id, post.id, &participants, 1, true),
        debates.close_debate(post.id),
    );
    closed.unwrap();
    // Depending on ordering the round either ran or saw the closed debate.
    if let Err(err) = spawned {
        assert!(err.is_conflict());
    }

    let stored = h.store.find_post(post.id).await.unwrap().unwrap();
    assert_eq!(stored.debate_status, DebateStatus::Closed);
}
