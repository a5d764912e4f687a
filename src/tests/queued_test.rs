use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::fakes::{FakeIncident, FakeSession, PollFixture, RecordingBackend};
use crate::backend::QueuedPollPage;
use crate::error::ErrorCode;
use crate::game::{GameSession, IncidentRegistry, TargetScope};
use crate::poll::PollKind;
use crate::queued::{validate, Admission, PipelineDeps, QueuedPollPipeline, RawQueuedOption, RawQueuedPoll};

fn raw(id: i64, options: &[(&str, &str, &str)]) -> RawQueuedPoll {
    RawQueuedPoll {
        id,
        title: format!("Queued {}", id),
        length: 3,
        options: options
            .iter()
            .map(|(mod_id, def_name, label)| RawQueuedOption {
                mod_id: mod_id.to_string(),
                def_name: def_name.to_string(),
                label: label.to_string(),
            })
            .collect(),
        validation_error: None,
        created_by_id: None,
        channel_id: None,
        updated_at: None,
    }
}

fn raid_and_eclipse() -> [(&'static str, &'static str, &'static str); 2] {
    [("core", "RaidEnemy", "Raid"), ("core", "Eclipse", "Eclipse")]
}

struct Setup {
    registry: IncidentRegistry,
    raid: Arc<FakeIncident>,
    eclipse: Arc<FakeIncident>,
    session: Arc<FakeSession>,
}

fn setup() -> Setup {
    let registry = IncidentRegistry::new();
    let raid = FakeIncident::new("RaidEnemy", TargetScope::Map);
    let eclipse = FakeIncident::new("Eclipse", TargetScope::World);
    registry.register("core", raid.clone());
    registry.register("core", eclipse.clone());

    Setup {
        registry,
        raid,
        eclipse,
        session: Arc::new(FakeSession::new(true)),
    }
}

fn session_of(setup: &Setup) -> Arc<dyn GameSession> {
    setup.session.clone()
}

#[test]
fn test_unknown_incident_fails_with_label() {
    let setup = setup();
    let poll = raw(1, &[("core", "RaidEnemy", "Raid"), ("somemod", "Meteor", "Meteor shower")]);

    let err = validate(&poll, &setup.registry, &session_of(&setup)).unwrap_err();

    assert_eq!(err.code, ErrorCode::ValidationIncidentMissing);
    assert!(err.message.contains("Meteor shower"));
    assert!(err.message.contains("doesn't exist in the game."));
}

#[test]
fn test_incident_that_cannot_fire_is_unavailable() {
    let setup = setup();
    setup.eclipse.possible.store(false, Ordering::SeqCst);

    let err = validate(&raw(1, &raid_and_eclipse()), &setup.registry, &session_of(&setup)).unwrap_err();

    assert_eq!(err.code, ErrorCode::ValidationIncidentUnavailable);
    assert_eq!(err.message, "The option \"Eclipse\" isn't possible at this time.");
}

#[test]
fn test_map_incident_without_map_is_unavailable() {
    let setup = setup();
    *setup.session.map.lock().unwrap() = None;

    let err = validate(&raw(1, &raid_and_eclipse()), &setup.registry, &session_of(&setup)).unwrap_err();
    assert!(err.message.contains("\"Raid\" isn't possible"));
}

#[test]
fn test_unsupported_scope_is_rejected() {
    let setup = setup();
    setup
        .registry
        .register("modded", FakeIncident::new("Caravan", TargetScope::Other("caravan".to_string())));

    let poll = raw(1, &[("core", "RaidEnemy", "Raid"), ("modded", "Caravan", "Caravan")]);
    let err = validate(&poll, &setup.registry, &session_of(&setup)).unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationIncidentUnavailable);
}

#[test]
fn test_wrong_option_count_is_rejected() {
    let setup = setup();
    let err = validate(&raw(1, &[("core", "RaidEnemy", "Raid")]), &setup.registry, &session_of(&setup))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationOptionCount);
}

#[test]
fn test_valid_poll_fires_incident_through_action() {
    let setup = setup();
    let mut poll = validate(&raw(9, &raid_and_eclipse()), &setup.registry, &session_of(&setup)).unwrap();

    assert_eq!(poll.kind, PollKind::Queued { queued_id: 9, length: 3 });
    assert_eq!(poll.caption, "Queued 9");
    assert_eq!(poll.options()[0].label, "Raid");
    assert_eq!(poll.options()[0].tooltip.as_deref(), Some("raidenemy"));

    (poll.take_action(0).unwrap())().unwrap();
    assert_eq!(setup.raid.fired.load(Ordering::SeqCst), 1);
    assert_eq!(setup.eclipse.fired.load(Ordering::SeqCst), 0);
}

struct PipelineFixture {
    pipeline: QueuedPollPipeline,
    polls: PollFixture,
    backend: Arc<RecordingBackend>,
    setup: Setup,
}

fn pipeline_fixture() -> PipelineFixture {
    let setup = setup();
    let backend = Arc::new(RecordingBackend::default());
    let polls = PollFixture::with_backend(backend.clone(), Duration::from_millis(5));

    let (pipeline, _task) = QueuedPollPipeline::spawn(PipelineDeps {
        backend: backend.clone(),
        registry: setup.registry.clone(),
        session: setup.session.clone(),
        main_thread: polls.main_thread.handle(),
        polls: polls.polls.clone(),
        message_log: polls.message_log.clone(),
    });

    PipelineFixture {
        pipeline,
        polls,
        backend,
        setup,
    }
}

#[tokio::test]
async fn test_confirmed_valid_poll_is_admitted() {
    let fixture = pipeline_fixture();

    let outcome = fixture.pipeline.submit_and_wait(raw(3, &raid_and_eclipse())).await;

    assert_eq!(outcome, Admission::Admitted);
    let reports = fixture.backend.reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, 3);
    assert!(reports[0].1.is_valid);
    assert_eq!(fixture.polls.polls.snapshot().await.unwrap().queued, 1);
}

#[tokio::test]
async fn test_invalid_poll_is_reported_and_dropped() {
    let fixture = pipeline_fixture();
    let poll = raw(4, &[("core", "RaidEnemy", "Raid"), ("core", "Missing", "Ghost")]);

    let outcome = fixture.pipeline.submit_and_wait(poll).await;

    let expected = "The option \"Ghost\" doesn't exist in the game.".to_string();
    assert_eq!(outcome, Admission::Rejected(expected.clone()));
    let reports = fixture.backend.reports.lock().unwrap().clone();
    assert!(!reports[0].1.is_valid);
    assert_eq!(reports[0].1.validation_error, Some(expected));
    assert_eq!(fixture.polls.polls.snapshot().await.unwrap().queued, 0);
    assert_eq!(fixture.polls.message_log.count(ErrorCode::ValidationIncidentMissing), 1);
}

#[tokio::test]
async fn test_unconfirmed_report_discards_valid_poll() {
    let fixture = pipeline_fixture();
    fixture.backend.confirm_validation.store(false, Ordering::SeqCst);

    let outcome = fixture.pipeline.submit_and_wait(raw(5, &raid_and_eclipse())).await;

    assert_eq!(outcome, Admission::Unconfirmed);
    assert_eq!(fixture.polls.polls.snapshot().await.unwrap().queued, 0);
}

#[tokio::test]
async fn test_records_wait_for_a_session_then_drain_in_order() {
    let fixture = pipeline_fixture();
    fixture.setup.session.set_active(false);

    for id in 1..=3 {
        assert_eq!(
            fixture.pipeline.submit_and_wait(raw(id, &raid_and_eclipse())).await,
            Admission::Buffered
        );
    }
    assert_eq!(fixture.pipeline.pending().await, 3);
    assert_eq!(fixture.backend.count("report_validation"), 0);

    fixture.setup.session.set_active(true);
    assert_eq!(fixture.pipeline.session_started().await, 3);

    assert_eq!(fixture.pipeline.pending().await, 0);
    let reported: Vec<i64> = fixture
        .backend
        .reports
        .lock()
        .unwrap()
        .iter()
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(reported, vec![1, 2, 3]);
    assert_eq!(fixture.polls.polls.snapshot().await.unwrap().queued, 3);
}

#[tokio::test]
async fn test_drain_stops_when_session_ends() {
    let fixture = pipeline_fixture();
    fixture.setup.session.set_active(false);
    for id in 1..=3 {
        fixture.pipeline.submit_and_wait(raw(id, &raid_and_eclipse())).await;
    }

    // Active for two drain checks, gone by the third
    fixture.setup.session.end_after(2);
    assert_eq!(fixture.pipeline.session_started().await, 2);

    assert_eq!(fixture.pipeline.pending().await, 1);
    assert_eq!(fixture.backend.count("report_validation"), 2);
}

#[tokio::test]
async fn test_sync_walks_every_page() {
    let fixture = pipeline_fixture();
    fixture.setup.session.set_active(false);
    *fixture.backend.pages.lock().unwrap() = vec![
        QueuedPollPage {
            data: vec![raw(1, &raid_and_eclipse()), raw(2, &raid_and_eclipse())],
            current_page: 1,
            last_page: 2,
        },
        QueuedPollPage {
            data: vec![raw(3, &raid_and_eclipse())],
            current_page: 2,
            last_page: 2,
        },
    ];

    assert_eq!(fixture.pipeline.sync_from_backend().await, 3);
    assert_eq!(fixture.backend.count("list_queued_polls"), 2);
    assert_eq!(fixture.pipeline.pending().await, 3);
}

#[tokio::test]
async fn test_sync_ignores_stale_current_page() {
    let fixture = pipeline_fixture();
    fixture.setup.session.set_active(false);
    // Every listing claims to be page 1
    *fixture.backend.pages.lock().unwrap() = (1..=3)
        .map(|id| QueuedPollPage {
            data: vec![raw(id, &raid_and_eclipse())],
            current_page: 1,
            last_page: 3,
        })
        .collect();

    let synced = tokio::time::timeout(Duration::from_secs(2), fixture.pipeline.sync_from_backend())
        .await
        .unwrap();

    assert_eq!(synced, 3);
    assert_eq!(fixture.backend.count("list_queued_polls"), 3);
    assert_eq!(fixture.pipeline.pending().await, 3);
}
