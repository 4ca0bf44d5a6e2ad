mod common;

use common::{at, until, world};
use uuid::Uuid;
use vortex_client::{ChatFilter, ChatListProjector, ProfileDirectory};
use vortex_types::Table;

#[tokio::test]
async fn test_user_without_memberships_gets_empty_list() {
    let world = world();
    let neo = world.user("neo").await;
    let projector = world.projector(&neo);

    projector.load().await.unwrap();

    let view = projector.snapshot();
    assert!(view.conversations.is_empty());
    assert!(view.loaded);
    assert!(!view.loading);
    assert!(view.last_error.is_none());
}

#[tokio::test]
async fn test_unread_count_ignores_own_and_read_messages() {
    let world = world();
    let neo = world.user("neo").await;
    let trinity = world.user("trinity").await;
    let chat = world.chat(&[neo.user_id, trinity.user_id]).await;

    world.post_at(chat, trinity.user_id, "one", Some(at("2024-03-01T10:00:00Z")), false).await;
    world.post_at(chat, trinity.user_id, "two", Some(at("2024-03-01T10:01:00Z")), false).await;
    world.post_at(chat, neo.user_id, "mine", Some(at("2024-03-01T10:02:00Z")), false).await;
    let last = world
        .post_at(chat, trinity.user_id, "seen", Some(at("2024-03-01T10:03:00Z")), true)
        .await;

    let projector = world.projector(&neo);
    projector.load().await.unwrap();
    let view = projector.snapshot();

    assert_eq!(view.conversations.len(), 1);
    let summary = &view.conversations[0];
    assert_eq!(summary.chat_id, chat);
    assert_eq!(summary.unread_count, 2);
    assert_eq!(summary.other_user.user_id, trinity.user_id);
    assert_eq!(summary.last_message.as_ref().map(|m| m.id), Some(last.id));
    assert_eq!(summary.membership.user_id, neo.user_id);
    assert_eq!(view.total_unread(), 2);
}

#[tokio::test]
async fn test_chats_without_exactly_one_other_member_are_dropped() {
    let world = world();
    let neo = world.user("neo").await;
    let trinity = world.user("trinity").await;
    let morpheus = world.user("morpheus").await;

    let _alone = world.chat(&[neo.user_id]).await;
    let _group = world
        .chat(&[neo.user_id, trinity.user_id, morpheus.user_id])
        .await;
    let direct = world.chat(&[neo.user_id, morpheus.user_id]).await;
    let _no_profile = world.chat(&[neo.user_id, Uuid::new_v4()]).await;

    let projector = world.projector(&neo);
    projector.load().await.unwrap();
    let view = projector.snapshot();

    assert_eq!(view.conversations.len(), 1);
    assert_eq!(view.conversations[0].chat_id, direct);
    assert_eq!(view.conversations[0].other_user.username, "morpheus");
}

#[tokio::test]
async fn test_list_is_ordered_by_latest_activity() {
    let world = world();
    let neo = world.user("neo").await;
    let trinity = world.user("trinity").await;
    let morpheus = world.user("morpheus").await;
    let oracle = world.user("oracle").await;

    let old_message = world
        .chat_joined(&[neo.user_id, trinity.user_id], Some(at("2024-01-01T00:00:00Z")))
        .await;
    world
        .post_at(old_message, trinity.user_id, "old", Some(at("2024-01-02T00:00:00Z")), false)
        .await;

    let recent_join = world
        .chat_joined(&[neo.user_id, morpheus.user_id], Some(at("2024-01-05T00:00:00Z")))
        .await;

    let newer_message = world
        .chat_joined(&[neo.user_id, oracle.user_id], Some(at("2024-01-01T00:00:00Z")))
        .await;
    world
        .post_at(newer_message, oracle.user_id, "newer", Some(at("2024-01-03T00:00:00Z")), false)
        .await;

    let projector = world.projector(&neo);
    projector.load().await.unwrap();
    let order: Vec<Uuid> = projector
        .snapshot()
        .conversations
        .iter()
        .map(|s| s.chat_id)
        .collect();

    assert_eq!(order, vec![recent_join, newer_message, old_message]);
}

#[tokio::test]
async fn test_pin_and_archive_show_up_after_reload() {
    let world = world();
    let neo = world.user("neo").await;
    let trinity = world.user("trinity").await;
    let morpheus = world.user("morpheus").await;
    let pinned = world.chat(&[neo.user_id, trinity.user_id]).await;
    let archived = world.chat(&[neo.user_id, morpheus.user_id]).await;

    let projector = world.projector(&neo);
    projector.load().await.unwrap();
    let view = projector.snapshot();

    projector.toggle_pinned(view.find(pinned).unwrap()).await.unwrap();
    projector
        .set_archived(view.find(archived).unwrap().membership.id, true)
        .await
        .unwrap();

    // Writes do not refresh the list by themselves.
    assert!(!projector.snapshot().find(pinned).unwrap().membership.is_pinned);

    projector.load().await.unwrap();
    let view = projector.snapshot();
    let ids = |filter: ChatFilter| {
        view.filtered(filter)
            .iter()
            .map(|s| s.chat_id)
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(ChatFilter::Pinned), vec![pinned]);
    assert_eq!(ids(ChatFilter::Archived), vec![archived]);
    assert_eq!(ids(ChatFilter::All), vec![pinned]);
}

#[tokio::test]
async fn test_live_list_reloads_on_new_messages() {
    let world = world();
    let neo = world.user("neo").await;
    let trinity = world.user("trinity").await;
    let chat = world.chat(&[neo.user_id, trinity.user_id]).await;

    let projector = world.projector(&neo);
    let mut rx = projector.watch();
    let live = projector.subscribe();
    projector.load().await.unwrap();

    world.post(chat, trinity.user_id, "wake up").await;
    let view = until(&mut rx, |view| {
        view.find(chat).is_some_and(|s| s.unread_count == 1)
    })
    .await;
    assert_eq!(
        view.find(chat).unwrap().last_message.as_ref().unwrap().content,
        "wake up"
    );

    live.close().await;
}

#[tokio::test]
async fn test_new_chat_appears_without_a_message() {
    let world = world();
    let neo = world.user("neo").await;
    let trinity = world.user("trinity").await;

    let projector = world.projector(&neo);
    let mut rx = projector.watch();
    let _live = projector.subscribe();
    projector.load().await.unwrap();

    let chat = world.chat(&[trinity.user_id, neo.user_id]).await;
    until(&mut rx, |view| view.find(chat).is_some()).await;
}

#[tokio::test]
async fn test_closing_live_handle_releases_subscriptions() {
    let world = world();
    let neo = world.user("neo").await;
    let projector = world.projector(&neo);

    let before = world.subscribers();
    let live = projector.subscribe();
    assert!(world.subscribers() > before);
    assert!(live.is_active());

    live.close().await;
    assert_eq!(world.subscribers(), before);
}

#[tokio::test]
async fn test_dropping_live_handle_stops_updates() {
    let world = world();
    let neo = world.user("neo").await;
    let trinity = world.user("trinity").await;
    let chat = world.chat(&[neo.user_id, trinity.user_id]).await;

    let projector = world.projector(&neo);
    projector.load().await.unwrap();
    drop(projector.subscribe());

    world.post(chat, trinity.user_id, "anyone?").await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(projector.snapshot().find(chat).unwrap().unread_count, 0);
}

#[tokio::test]
async fn test_failed_refresh_keeps_the_previous_list() {
    let world = world();
    let neo = world.user("neo").await;
    let trinity = world.user("trinity").await;
    let chat = world.chat(&[neo.user_id, trinity.user_id]).await;
    world.post(chat, trinity.user_id, "follow the white rabbit").await;

    let (flaky, backend) = world.flaky();
    let projector =
        ChatListProjector::new(backend.clone(), neo.clone(), ProfileDirectory::new(backend, neo.clone()));
    projector.load().await.unwrap();
    let before = projector.snapshot();

    world.post(chat, trinity.user_id, "knock knock").await;
    flaky.fail_counts(true);
    assert!(projector.load().await.is_err());

    let view = projector.snapshot();
    assert_eq!(view.conversations, before.conversations);
    assert!(view.loaded);
    assert!(!view.loading);
    assert!(view.last_error.is_some());

    flaky.fail_counts(false);
    projector.load().await.unwrap();
    let view = projector.snapshot();
    assert!(view.last_error.is_none());
    let summary = view.find(chat).unwrap();
    assert_eq!(summary.unread_count, 2);
    assert_eq!(summary.last_message.as_ref().unwrap().content, "knock knock");
}

#[tokio::test]
async fn test_failed_membership_fetch_keeps_the_previous_list() {
    let world = world();
    let neo = world.user("neo").await;
    let trinity = world.user("trinity").await;
    let morpheus = world.user("morpheus").await;
    let first = world.chat(&[neo.user_id, trinity.user_id]).await;

    let (flaky, backend) = world.flaky();
    let projector =
        ChatListProjector::new(backend.clone(), neo.clone(), ProfileDirectory::new(backend, neo.clone()));
    projector.load().await.unwrap();

    let second = world.chat(&[neo.user_id, morpheus.user_id]).await;
    flaky.fail_selects(Some(Table::ChatMemberships));
    assert!(projector.load().await.is_err());

    let view = projector.snapshot();
    let ids: Vec<Uuid> = view.conversations.iter().map(|s| s.chat_id).collect();
    assert_eq!(ids, vec![first]);
    assert!(view.last_error.is_some());

    flaky.fail_selects(None);
    projector.load().await.unwrap();
    let view = projector.snapshot();
    assert!(view.find(second).is_some());
    assert!(view.last_error.is_none());
}

#[tokio::test]
async fn test_first_load_failure_leaves_list_unloaded() {
    let world = world();
    let neo = world.user("neo").await;
    let trinity = world.user("trinity").await;
    world.chat(&[neo.user_id, trinity.user_id]).await;

    let (flaky, backend) = world.flaky();
    let projector =
        ChatListProjector::new(backend.clone(), neo.clone(), ProfileDirectory::new(backend, neo.clone()));
    flaky.fail_counts(true);
    assert!(projector.load().await.is_err());

    let view = projector.snapshot();
    assert!(view.conversations.is_empty());
    assert!(!view.loaded);
    assert!(view.last_error.is_some());
}

#[tokio::test]
async fn test_archived_chats_still_show_under_unread_and_pinned() {
    let world = world();
    let neo = world.user("neo").await;
    let trinity = world.user("trinity").await;
    let chat = world.chat(&[neo.user_id, trinity.user_id]).await;
    world.post(chat, trinity.user_id, "are you there?").await;

    let projector = world.projector(&neo);
    projector.load().await.unwrap();
    let membership = projector.snapshot().find(chat).unwrap().membership.id;
    projector.set_pinned(membership, true).await.unwrap();
    projector.set_archived(membership, true).await.unwrap();

    projector.load().await.unwrap();
    let view = projector.snapshot();
    assert!(view.filtered(ChatFilter::All).is_empty());
    assert_eq!(view.filtered(ChatFilter::Unread).len(), 1);
    assert_eq!(view.filtered(ChatFilter::Pinned).len(), 1);
    assert_eq!(view.filtered(ChatFilter::Archived).len(), 1);
}
