use integration_tests::{deterministic_generator, Harness};
use ra_core::{AppError, CommentQuery, ContentStatus, DebateStatus, PersistenceStore, SourceChannel};
use ra_engine::{DebateOrchestrator, ModerationGate};
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn later_rounds_reply_to_the_previous_participant() {
    let h = Harness::new().await.unwrap();
    let ada = h.agent("ada", &["rust"]).await.unwrap();
    let bo = h.agent("bo", &["go"]).await.unwrap();
    let cy = h.agent("cy", &["zig"]).await.unwrap();
    let post = h.human_post("Is rust worth the learning curve").await.unwrap();

    let debates = DebateOrchestrator::new(h.store(), deterministic_generator());
    let comments = assert_ok!(
        debates.spawn_debate(h.workspace_id, post.id, &[ada.id, bo.id, cy.id], 2, true).await
    );

    assert_eq!(comments.len(), 6);
    assert!(comments[..3].iter().all(|c| c.parent_id.is_none()));
    assert_eq!(comments[3].parent_id, Some(comments[2].id));
    assert_eq!(comments[4].parent_id, Some(comments[0].id));
    assert_eq!(comments[5].parent_id, Some(comments[1].id));
    assert_eq!(comments[0].author_id, ada.id);
    assert_eq!(comments[3].author_id, ada.id);
    for c in &comments {
        assert_eq!(c.status, ContentStatus::Published);
        assert_eq!(c.source_channel, SourceChannel::Debate);
        assert!(c.published_at.is_some());
    }

    let stored = h.store.find_post(post.id).await.unwrap().unwrap();
    assert_eq!(stored.debate_status, DebateStatus::Open);
}

#[tokio::test]
async fn rerunning_a_debate_writes_nothing_new() {
    let h = Harness::new().await.unwrap();
    let ada = h.agent("ada", &[]).await.unwrap();
    let bo = h.agent("bo", &[]).await.unwrap();
    let post = h.human_post("Tabs or spaces").await.unwrap();
    let debates = DebateOrchestrator::new(h.store(), deterministic_generator());

    let first = debates.spawn_debate(h.workspace_id, post.id, &[ada.id, bo.id], 2, false).await.unwrap();
    let second = debates.spawn_debate(h.workspace_id, post.id, &[ada.id, bo.id], 2, false).await.unwrap();

    let first_ids: Vec<_> = first.iter().map(|c| c.id).collect();
    let second_ids: Vec<_> = second.iter().map(|c| c.id).collect();
    assert_eq!(first_ids, second_ids);

    let all = h
        .store
        .find_recent_comments(h.workspace_id, &CommentQuery::on_post(post.id))
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
    assert!(all.iter().all(|c| c.status == ContentStatus::NeedsReview));

    let queue = ModerationGate::new(h.store()).pending(h.workspace_id, 50).await.unwrap();
    assert_eq!(queue.len(), 4);
    assert!(queue.iter().all(|a| a.materialized_id.is_some()));
}

#[tokio::test]
async fn closed_debates_reject_new_rounds() {
    let h = Harness::new().await.unwrap();
    let ada = h.agent("ada", &[]).await.unwrap();
    let post = h.human_post("Closing time").await.unwrap();
    let debates = DebateOrchestrator::new(h.store(), deterministic_generator());

    debates.spawn_debate(h.workspace_id, post.id, &[ada.id], 1, true).await.unwrap();
    assert_ok!(debates.close_debate(post.id).await);
    // closing twice is a no-op
    assert_ok!(debates.close_debate(post.id).await);

    let err = assert_err!(debates.spawn_debate(h.workspace_id, post.id, &[ada.id], 1, true).await);
    assert!(matches!(err, AppError::DebateClosed(id) if id == post.id));
    assert!(err.is_conflict());

    let comments = h
        .store
        .find_recent_comments(h.workspace_id, &CommentQuery::on_post(post.id))
        .await
        .unwrap();
    assert_eq!(comments.len(), 1);
}

#[tokio::test]
async fn posts_from_other_workspaces_are_not_found() {
    let h = Harness::new().await.unwrap();
    let other = Harness { store: h.store.clone(), workspace_id: uuid::Uuid::now_v7() };
    let ada = h.agent("ada", &[]).await.unwrap();
    let foreign = other.human_post("Elsewhere").await.unwrap();

    let debates = DebateOrchestrator::new(h.store(), deterministic_generator());
    let err = debates
        .spawn_debate(h.workspace_id, foreign.id, &[ada.id], 1, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound("post", _)));
}
