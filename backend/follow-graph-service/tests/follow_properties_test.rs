//! Behavioural laws of follow/unfollow
//!
//! Run with: cargo test --test follow_properties_test

mod common;

use common::{addr, caller, Harness};
use follow_graph_service::auth::CallerIdentity;
use follow_graph_service::domain::{FollowAction, User};
use follow_graph_service::FollowGraphError;

#[tokio::test]
async fn test_follow_then_unfollow_restores_state() {
    let h = Harness::new();
    h.service.follow(&caller("carol"), &addr("bob")).await.unwrap();

    let before_edges = h.service.following_snapshot(&caller("alice")).await.unwrap();
    let before_alice = h.served_counts("alice").await;
    let before_bob = h.served_counts("bob").await;

    h.service.follow(&caller("alice"), &addr("bob")).await.unwrap();
    h.service.unfollow(&caller("alice"), &addr("bob")).await.unwrap();

    let after_edges = h.service.following_snapshot(&caller("alice")).await.unwrap();
    assert_eq!(after_edges.following, before_edges.following);
    assert_eq!(h.served_counts("alice").await, before_alice);
    assert_eq!(h.served_counts("bob").await, before_bob);
    assert_eq!(h.stored_counts("bob").await, (1, 0));
}

#[tokio::test]
async fn test_double_follow_is_rejected_without_double_count() {
    let h = Harness::new();
    h.service.follow(&caller("alice"), &addr("bob")).await.unwrap();

    let err = h
        .service
        .follow(&caller("alice"), &addr("bob"))
        .await
        .unwrap_err();

    assert!(matches!(err, FollowGraphError::AlreadyFollowing));
    assert_eq!(h.served_counts("bob").await, (1, 0));
    assert_eq!(h.served_counts("alice").await, (0, 1));
    assert_eq!(h.store.edge_count(), 1);
}

#[tokio::test]
async fn test_unfollow_without_follow_is_rejected() {
    let h = Harness::new();

    let err = h
        .service
        .unfollow(&caller("alice"), &addr("bob"))
        .await
        .unwrap_err();

    assert!(matches!(err, FollowGraphError::NotFollowing));
    assert_eq!(h.served_counts("bob").await, (0, 0));
    assert_eq!(h.served_counts("alice").await, (0, 0));
}

#[tokio::test]
async fn test_self_follow_is_rejected() {
    let h = Harness::new();

    let err = h
        .service
        .follow(&caller("alice"), &addr("alice"))
        .await
        .unwrap_err();

    assert!(matches!(err, FollowGraphError::SelfFollowRejected));
    assert_eq!(h.store.edge_count(), 0);
}

#[tokio::test]
async fn test_anonymous_caller_cannot_mutate() {
    let h = Harness::new();

    let follow = h
        .service
        .follow(&CallerIdentity::Anonymous, &addr("bob"))
        .await
        .unwrap_err();
    let unfollow = h
        .service
        .unfollow(&CallerIdentity::Anonymous, &addr("bob"))
        .await
        .unwrap_err();

    assert!(matches!(follow, FollowGraphError::Unauthenticated));
    assert!(matches!(unfollow, FollowGraphError::Unauthenticated));
    assert!(matches!(
        h.service
            .following_snapshot(&CallerIdentity::Anonymous)
            .await,
        Err(FollowGraphError::Unauthenticated)
    ));
}

#[tokio::test]
async fn test_follow_unfollow_scenario() {
    let h = Harness::new();
    let a = caller("userA");
    let b = addr("userB");

    let snapshot = h.service.follow(&a, &b).await.unwrap();
    assert!(snapshot.is_following(&b));
    assert_eq!(snapshot.aggregate.following_count, 1);
    assert_eq!(h.served_counts("userB").await, (1, 0));
    assert_eq!(h.served_counts("userA").await, (0, 1));
    assert!(h.service.is_following(&addr("userA"), &b).await.unwrap());

    let snapshot = h.service.unfollow(&a, &b).await.unwrap();
    assert!(!snapshot.is_following(&b));
    assert_eq!(h.served_counts("userB").await, (0, 0));
    assert_eq!(h.served_counts("userA").await, (0, 0));
    assert!(!h.service.is_following(&addr("userA"), &b).await.unwrap());

    let err = h.service.unfollow(&a, &b).await.unwrap_err();
    assert!(matches!(err, FollowGraphError::NotFollowing));
    assert_eq!(h.served_counts("userB").await, (0, 0));
}

#[tokio::test]
async fn test_unknown_user_has_zero_counts() {
    let h = Harness::new();
    let aggregate = h.service.get_aggregate_for(&addr("nobody")).await.unwrap();
    assert_eq!(aggregate.counts(), (0, 0));
}

#[tokio::test]
async fn test_snapshot_lists_every_followed_user() {
    let h = Harness::new();
    let alice = caller("alice");
    for target in ["bob", "carol", "dave"] {
        h.service.follow(&alice, &addr(target)).await.unwrap();
    }

    let snapshot = h.service.unfollow(&alice, &addr("carol")).await.unwrap();
    let followed: Vec<&str> = snapshot.following.keys().map(|a| a.as_str()).collect();
    assert_eq!(followed, vec!["bob", "dave"]);
    assert_eq!(snapshot.aggregate.following_count, 2);
}

#[tokio::test]
async fn test_batch_is_following() {
    let h = Harness::new();
    h.service.follow(&caller("alice"), &addr("bob")).await.unwrap();

    let targets = [addr("bob"), addr("carol")];
    let states = h
        .service
        .batch_is_following(&addr("alice"), &targets)
        .await
        .unwrap();

    assert_eq!(states.get(&addr("bob")), Some(&true));
    assert_eq!(states.get(&addr("carol")), Some(&false));
}

#[tokio::test]
async fn test_follower_listing_pages() {
    let h = Harness::new();
    for i in 0..7 {
        h.service
            .follow(&caller(&format!("fan{}", i)), &addr("star"))
            .await
            .unwrap();
    }

    let first = h.service.get_followers(&addr("star"), 5, 0).await.unwrap();
    assert_eq!(first.addresses.len(), 5);
    assert_eq!(first.total_count, 7);
    assert!(first.has_more);

    let second = h.service.get_followers(&addr("star"), 5, 5).await.unwrap();
    assert_eq!(second.addresses.len(), 2);
    assert!(!second.has_more);

    let following = h.service.get_following(&addr("fan0"), 10, 0).await.unwrap();
    assert_eq!(following.addresses, vec![addr("star")]);
}

#[tokio::test]
async fn test_profile_summary_follow_action() {
    let h = Harness::new();
    let bob = User::new(addr("bob"), "bob.id");
    h.service.follow(&caller("alice"), &addr("bob")).await.unwrap();

    let own = h
        .service
        .profile_summary(&caller("bob"), bob.clone())
        .await
        .unwrap();
    assert_eq!(own.follow_action, FollowAction::Hidden);
    assert_eq!(own.viewer_is_following, None);
    assert_eq!(own.aggregate.followers_count, 1);

    let follower = h
        .service
        .profile_summary(&caller("alice"), bob.clone())
        .await
        .unwrap();
    assert_eq!(follower.follow_action, FollowAction::Unfollow);
    assert_eq!(follower.viewer_is_following, Some(true));

    let stranger = h
        .service
        .profile_summary(&caller("carol"), bob)
        .await
        .unwrap();
    assert_eq!(stranger.follow_action, FollowAction::Follow);
}
