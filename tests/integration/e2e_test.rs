//! A poll from subscription to winner, driven over a real socket
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use pollcast::backend::{DeletePollResponse, VoteRecord};
use pollcast::events::PollEventKind;
use pollcast::handlers::{QUEUED_POLL_CREATED_EVENT, VOTE_CREATED_EVENT};
use pollcast::poll::ConcludeOutcome;
use pollcast::{ConnectionState, Poll, PollOption};

use crate::harness::{wait_until, BridgeEnvironment, CountingIncident, CHANNEL};
use crate::pusher_server::{FakePusherServer, SOCKET_ID};

fn counted(label: &str, counter: &Arc<AtomicUsize>) -> PollOption {
    let counter = counter.clone();
    PollOption::new(label, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

async fn subscribed(env: &BridgeEnvironment) -> bool {
    env.bridge
        .connection()
        .wait_for_state(ConnectionState::Subscribed, Duration::from_secs(5))
        .await
}

#[tokio::test]
async fn test_poll_lifecycle_over_pusher() {
    let server = FakePusherServer::start().await;
    let env = BridgeEnvironment::new(&server).await;
    let mut events = env.bridge.events().subscribe();

    assert!(env.bridge.start().await);
    assert!(subscribed(&env).await);

    // Subscription used the socket id and the backend's auth signature
    assert_eq!(env.bridge.connection().socket_id().as_deref(), Some(SOCKET_ID));
    assert_eq!(
        env.backend.auth_requests(),
        vec![(SOCKET_ID.to_string(), CHANNEL.to_string())]
    );
    let subscribe = server.frames_named("pusher:subscribe");
    assert_eq!(subscribe.len(), 1);
    assert_eq!(subscribe[0]["data"]["auth"], "xyz");
    assert_eq!(subscribe[0]["data"]["channel"], CHANNEL);

    let fired_a = Arc::new(AtomicUsize::new(0));
    let fired_b = Arc::new(AtomicUsize::new(0));
    let poll = Poll::new("X vs Y", vec![counted("A", &fired_a), counted("B", &fired_b)]);
    let a = poll.options()[0].id;

    assert!(env.bridge.queue_poll(poll).await);
    env.bridge.tick().await;

    let polls = env.bridge.polls().clone();
    assert!(wait_until(2000, || {
        let polls = polls.clone();
        async move {
            polls
                .snapshot()
                .await
                .and_then(|s| s.current)
                .is_some_and(|view| view.id == Some(100))
        }
    })
    .await);

    let view = polls.snapshot().await.unwrap().current.unwrap();
    assert_eq!(
        view.ended_at,
        view.started_at.map(|start| start + chrono::Duration::minutes(5))
    );

    assert!(server.push(
        VOTE_CREATED_EVENT,
        Some(CHANNEL),
        json!({ "poll_id": 100, "value": a, "provider_id": "u1" }),
    ));
    assert!(wait_until(2000, || {
        let polls = polls.clone();
        async move {
            polls
                .snapshot()
                .await
                .and_then(|s| s.current)
                .and_then(|view| view.votes_for(a))
                == Some(1)
        }
    })
    .await);

    env.backend.set_delete_response(DeletePollResponse {
        id: Some(100),
        votes: vec![VoteRecord {
            user_id: "u1".to_string(),
            choice_id: a,
        }],
    });
    env.clock.advance(chrono::Duration::minutes(6));
    assert_eq!(polls.conclude_poll().await, ConcludeOutcome::Requested);

    let counter = fired_a.clone();
    assert!(wait_until(2000, || {
        let counter = counter.clone();
        async move { counter.load(Ordering::SeqCst) == 1 }
    })
    .await);
    assert!(wait_until(2000, || {
        let polls = polls.clone();
        async move { polls.snapshot().await.is_some_and(|s| s.current.is_none()) }
    })
    .await);

    let mut winner = None;
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
        if let PollEventKind::Concluded { winner: chosen, .. } = event.kind {
            winner = chosen;
            break;
        }
    }
    assert_eq!(winner.as_deref(), Some("A"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fired_a.load(Ordering::SeqCst), 1);
    assert_eq!(fired_b.load(Ordering::SeqCst), 0);

    env.cleanup().await;
    assert_eq!(env.bridge.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_queued_poll_from_socket_is_validated_and_run() {
    let server = FakePusherServer::start().await;
    let env = BridgeEnvironment::new(&server).await;
    env.registry.register("core", CountingIncident::new("RaidEnemy"));
    env.registry.register("core", CountingIncident::new("Eclipse"));

    assert!(env.bridge.start().await);
    assert!(subscribed(&env).await);

    assert!(server.push(
        QUEUED_POLL_CREATED_EVENT,
        Some(CHANNEL),
        json!({
            "id": 7,
            "title": "Raid or eclipse?",
            "length": 2,
            "options": [
                { "modId": "core", "defName": "RaidEnemy", "label": "Raid" },
                { "modId": "core", "defName": "Eclipse", "label": "Eclipse" }
            ]
        }),
    ));

    let backend = env.backend.clone();
    assert!(wait_until(2000, || {
        let backend = backend.clone();
        async move { !backend.reports().is_empty() }
    })
    .await);
    assert_eq!(env.backend.reports()[0].0, 7);
    assert!(env.backend.reports()[0].1.is_valid);

    let polls = env.bridge.polls().clone();
    assert!(wait_until(2000, || {
        let polls = polls.clone();
        async move { polls.snapshot().await.is_some_and(|s| s.queued == 1) }
    })
    .await);

    env.bridge.tick().await;
    assert!(wait_until(2000, || {
        let backend = backend.clone();
        async move { !backend.created().is_empty() }
    })
    .await);

    // The queued record is retired before the live poll is created
    assert_eq!(env.backend.retired(), vec![7]);
    let created = env.backend.created();
    assert_eq!(created[0].title, "Raid or eclipse?");
    assert_eq!(created[0].length, 2);
    assert_eq!(created[0].options.len(), 2);

    env.cleanup().await;
}

#[tokio::test]
async fn test_unavailable_queued_poll_is_reported_invalid() {
    let server = FakePusherServer::start().await;
    let env = BridgeEnvironment::new(&server).await;
    let eclipse = CountingIncident::new("Eclipse");
    eclipse.possible.store(false, Ordering::SeqCst);
    env.registry.register("core", CountingIncident::new("RaidEnemy"));
    env.registry.register("core", eclipse);

    assert!(env.bridge.start().await);
    assert!(subscribed(&env).await);

    server.push(
        QUEUED_POLL_CREATED_EVENT,
        Some(CHANNEL),
        json!({
            "id": 8,
            "title": "Raid or eclipse?",
            "length": 2,
            "options": [
                { "mod_id": "core", "def_name": "RaidEnemy", "label": "Raid" },
                { "mod_id": "core", "def_name": "Eclipse", "label": "Eclipse" }
            ]
        }),
    );

    let backend = env.backend.clone();
    assert!(wait_until(2000, || {
        let backend = backend.clone();
        async move { !backend.reports().is_empty() }
    })
    .await);

    let (id, report) = env.backend.reports()[0].clone();
    assert_eq!(id, 8);
    assert!(!report.is_valid);
    assert_eq!(
        report.validation_error.as_deref(),
        Some("The option \"Eclipse\" isn't possible at this time.")
    );
    assert_eq!(env.bridge.polls().snapshot().await.unwrap().queued, 0);

    env.cleanup().await;
}

#[tokio::test]
async fn test_headless_run_drains_backend_queue_and_stops() {
    let server = FakePusherServer::start().await;
    // The bridge pumps its own main thread here
    let env = BridgeEnvironment::unpumped(&server).await;
    env.registry.register("core", CountingIncident::new("RaidEnemy"));
    env.registry.register("core", CountingIncident::new("Eclipse"));
    env.backend.leave_queued(
        serde_json::from_value(json!({
            "id": 7,
            "title": "Raid or eclipse?",
            "length": 2,
            "options": [
                { "modId": "core", "defName": "RaidEnemy", "label": "Raid" },
                { "modId": "core", "defName": "Eclipse", "label": "Eclipse" }
            ]
        }))
        .unwrap(),
    );

    assert!(env.bridge.start().await);
    let run = env.bridge.run_until(
        Duration::from_millis(20),
        Duration::from_millis(2),
        tokio::time::sleep(Duration::from_millis(500)),
    );
    assert!(tokio::time::timeout(Duration::from_secs(5), run).await.is_ok());

    assert_eq!(env.backend.reports()[0].0, 7);
    assert!(env.backend.reports()[0].1.is_valid);
    assert_eq!(env.backend.retired(), vec![7]);
    assert_eq!(env.backend.created()[0].title, "Raid or eclipse?");
    assert_eq!(env.bridge.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_shutdown_cancels_backend_sync() {
    let server = FakePusherServer::start().await;
    let env = BridgeEnvironment::new(&server).await;
    env.backend.hold_listing.store(true, Ordering::SeqCst);

    assert!(env.bridge.start().await);
    let backend = env.backend.clone();
    assert!(wait_until(2000, || {
        let backend = backend.clone();
        async move { backend.listing_started.load(Ordering::SeqCst) }
    })
    .await);

    env.cleanup().await;

    let backend = env.backend.clone();
    assert!(wait_until(2000, || {
        let backend = backend.clone();
        async move { backend.listing_cancelled.load(Ordering::SeqCst) }
    })
    .await);
}
