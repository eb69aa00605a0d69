//! Runs against a throwaway Redis container; needs Docker and is skipped by
//! default: `cargo test -p finboard-backend --test redis_session_store -- --ignored`.

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use testcontainers::{clients::Cli, core::WaitFor, GenericImage};

use finboard_backend::{
    db::redis::{create_redis_pool, ping},
    models::session::Session,
    services::{
        redis_session_store::RedisSessionStore,
        session_store::{RotateOutcome, SessionStore},
    },
    types::{SessionId, UserId},
};

mod support;

fn redis_image() -> GenericImage {
    GenericImage::new("redis", "7-alpine")
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
}

async fn store_for(port: u16) -> RedisSessionStore {
    let mut config = support::test_config();
    config.redis_url = Some(format!("redis://127.0.0.1:{}", port));
    let pool = create_redis_pool(&config)
        .await
        .expect("create pool")
        .expect("pool configured");
    ping(&pool).await.expect("redis reachable");
    RedisSessionStore::new(pool)
}

fn session_for(user_id: UserId) -> Session {
    let now = Utc::now();
    Session {
        id: SessionId::new(),
        user_id,
        role: "user".into(),
        created_at: now,
        last_activity: now,
        client_address: Some("10.0.0.1".into()),
        client_agent: Some("integration-test".into()),
        expires_at: now + ChronoDuration::hours(1),
        refresh_jti: Some("jti-1".into()),
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn sessions_round_trip_through_redis() {
    let docker = Cli::default();
    let container = docker.run(redis_image());
    let store = store_for(container.get_host_port_ipv4(6379)).await;

    let user_id = UserId::new();
    let first = session_for(user_id);
    let second = session_for(user_id);
    let ttl = Duration::from_secs(3600);
    store.insert(&first, ttl).await.expect("insert");
    store.insert(&second, ttl).await.expect("insert");

    let fetched = store.get(first.id).await.expect("get").expect("present");
    assert_eq!(fetched, first);

    let later = Utc::now() + ChronoDuration::seconds(5);
    let touched = store
        .touch(first.id, later)
        .await
        .expect("touch")
        .expect("present");
    assert_eq!(touched.last_activity, later);

    let listed = store.list_by_user(user_id).await.expect("list");
    assert_eq!(listed.len(), 2);

    assert!(store.remove(first.id).await.expect("remove"));
    assert!(!store.remove(first.id).await.expect("remove again"));
    assert!(store.get(first.id).await.expect("get").is_none());
    assert!(store
        .touch(first.id, Utc::now())
        .await
        .expect("touch")
        .is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn rotate_is_compare_and_swap_in_redis() {
    let docker = Cli::default();
    let container = docker.run(redis_image());
    let store = store_for(container.get_host_port_ipv4(6379)).await;

    let session = session_for(UserId::new());
    store
        .insert(&session, Duration::from_secs(3600))
        .await
        .expect("insert");

    let outcome = store
        .rotate(session.id, "jti-1", "jti-2", Utc::now())
        .await
        .expect("rotate");
    match outcome {
        RotateOutcome::Rotated(updated) => {
            assert_eq!(updated.refresh_jti.as_deref(), Some("jti-2"))
        }
        other => panic!("expected rotation, got {:?}", other),
    }

    let replay = store
        .rotate(session.id, "jti-1", "jti-3", Utc::now())
        .await
        .expect("rotate");
    assert!(matches!(replay, RotateOutcome::Stale));

    let missing = store
        .rotate(SessionId::new(), "jti-1", "jti-3", Utc::now())
        .await
        .expect("rotate");
    assert!(matches!(missing, RotateOutcome::Missing));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn user_wide_removal_spares_the_excluded_session() {
    let docker = Cli::default();
    let container = docker.run(redis_image());
    let store = store_for(container.get_host_port_ipv4(6379)).await;

    let user_id = UserId::new();
    let keep = session_for(user_id);
    let ttl = Duration::from_secs(3600);
    store.insert(&keep, ttl).await.expect("insert");
    for _ in 0..3 {
        store
            .insert(&session_for(user_id), ttl)
            .await
            .expect("insert");
    }
    let stranger = session_for(UserId::new());
    store.insert(&stranger, ttl).await.expect("insert");

    let removed = store
        .remove_for_user(user_id, Some(keep.id))
        .await
        .expect("remove for user");

    assert_eq!(removed, 3);
    assert!(store.get(keep.id).await.expect("get").is_some());
    assert!(store.get(stranger.id).await.expect("get").is_some());
    assert_eq!(store.list_by_user(user_id).await.expect("list").len(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn redis_expires_sessions_by_ttl() {
    let docker = Cli::default();
    let container = docker.run(redis_image());
    let store = store_for(container.get_host_port_ipv4(6379)).await;

    let session = session_for(UserId::new());
    store
        .insert(&session, Duration::from_secs(1))
        .await
        .expect("insert");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(store.get(session.id).await.expect("get").is_none());
    assert!(store
        .list_by_user(session.user_id)
        .await
        .expect("list")
        .is_empty());
}
