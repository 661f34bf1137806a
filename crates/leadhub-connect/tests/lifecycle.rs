use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use leadhub_connect::{
    ChannelService, CompletionWorker, ConnectError, ConnectRequest, FailureReason, LifecycleConfig, WorkerReport,
};
use leadhub_db::Database;
use leadhub_gateway::dispatcher::Dispatcher;
use leadhub_types::events::{ChangeKind, GatewayEvent};
use leadhub_types::models::{ChannelStatus, ChannelType};

struct Harness {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    service: ChannelService,
    worker: CompletionWorker,
}

fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new();
    let config = LifecycleConfig {
        whatsapp_delay: Duration::from_secs(5),
        instagram_delay: Duration::from_secs(3),
        stale_after: Duration::from_secs(600),
        ..LifecycleConfig::default()
    };
    let service = ChannelService::new(db.clone(), dispatcher.clone(), config);
    let worker = CompletionWorker::new(service.clone());
    Harness {
        db,
        dispatcher,
        service,
        worker,
    }
}

fn add_owner(h: &Harness, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    h.db.create_user(&id.to_string(), name, "hash").unwrap();
    id
}

fn whatsapp(phone: &str) -> ConnectRequest {
    ConnectRequest::Whatsapp { phone: phone.into() }
}

fn after(secs: i64) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(secs)
}

#[tokio::test]
async fn whatsapp_scenario_connects_then_disconnects() {
    let h = harness();
    let u1 = add_owner(&h, "u1");

    let initiated = h
        .service
        .initiate_connection(u1, whatsapp("+5511999999999"))
        .await
        .unwrap();
    assert!(initiated.created);
    let channel_id = initiated.channel.id;

    let pending = h.service.check_status(u1, channel_id).await.unwrap();
    assert_eq!(pending.status, ChannelStatus::Connecting);
    assert_eq!(pending.address.as_deref(), Some("+5511999999999"));
    assert!(pending.transient_credential.is_some());
    assert!(pending.last_connected_at.is_none());

    // Nothing is due before the delay elapses.
    let early = h.worker.run_once(Utc::now()).await.unwrap();
    assert_eq!(early.completed, 0);

    let report = h.worker.run_once(after(6)).await.unwrap();
    assert_eq!(report.completed, 1);

    let connected = h.service.check_status(u1, channel_id).await.unwrap();
    assert_eq!(connected.status, ChannelStatus::Connected);
    assert!(connected.transient_credential.is_none());
    assert!(connected.last_connected_at.is_some());

    let disconnected = h.service.disconnect(u1, channel_id).await.unwrap();
    assert!(disconnected.changed);
    assert_eq!(disconnected.channel.status, ChannelStatus::Disconnected);
}

#[tokio::test]
async fn instagram_attempt_has_no_credential() {
    let h = harness();
    let owner = add_owner(&h, "shop");

    let initiated = h
        .service
        .initiate_connection(owner, ConnectRequest::Instagram { username: "@Loja.Oficial".into() })
        .await
        .unwrap();
    assert_eq!(initiated.channel.channel_type, ChannelType::Instagram);
    assert_eq!(initiated.channel.address.as_deref(), Some("loja.oficial"));
    assert!(initiated.channel.transient_credential.is_none());

    // Instagram completes on its own, shorter delay.
    assert_eq!(h.worker.run_once(after(4)).await.unwrap().completed, 1);
}

#[tokio::test]
async fn disconnect_twice_is_a_noop() {
    let h = harness();
    let owner = add_owner(&h, "owner");
    let id = h
        .service
        .initiate_connection(owner, whatsapp("+5511999999999"))
        .await
        .unwrap()
        .channel
        .id;

    assert!(h.service.disconnect(owner, id).await.unwrap().changed);

    let mut rx = h.dispatcher.subscribe();
    let again = h.service.disconnect(owner, id).await.unwrap();
    assert!(!again.changed);
    assert_eq!(again.channel.status, ChannelStatus::Disconnected);
    assert!(rx.try_recv().is_err(), "no event for a no-op disconnect");
}

#[tokio::test]
async fn disconnect_during_delay_is_not_resurrected() {
    let h = harness();
    let owner = add_owner(&h, "owner");
    let id = h
        .service
        .initiate_connection(owner, whatsapp("+5511999999999"))
        .await
        .unwrap()
        .channel
        .id;

    h.service.disconnect(owner, id).await.unwrap();

    let report = h.worker.run_once(after(60)).await.unwrap();
    assert_eq!(report.completed, 0);

    let channel = h.service.check_status(owner, id).await.unwrap();
    assert_eq!(channel.status, ChannelStatus::Disconnected);
    assert!(channel.transient_credential.is_none());
}

#[tokio::test]
async fn reconnect_after_disconnect_ignores_previous_attempt() {
    let h = harness();
    let owner = add_owner(&h, "owner");
    let first = h
        .service
        .initiate_connection(owner, whatsapp("+5511999999999"))
        .await
        .unwrap();
    h.service.disconnect(owner, first.channel.id).await.unwrap();

    let second = h
        .service
        .initiate_connection(owner, whatsapp("+55 11 99999-9999"))
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(first.channel.id, second.channel.id);
    assert_ne!(first.channel.transient_credential, second.channel.transient_credential);

    // Only the live attempt completes.
    assert_eq!(h.worker.run_once(after(6)).await.unwrap().completed, 1);
    assert_eq!(h.worker.run_once(after(7)).await.unwrap(), WorkerReport::default());
}

#[tokio::test]
async fn concurrent_initiations_share_one_row() {
    let h = harness();
    let owner = add_owner(&h, "owner");

    let (a, b) = tokio::join!(
        h.service.initiate_connection(owner, whatsapp("+5511999999999")),
        h.service.initiate_connection(owner, whatsapp("+5511999999999")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.channel.id, b.channel.id);
    assert_eq!([a.created, b.created].iter().filter(|c| **c).count(), 1);
    assert_eq!(h.service.list(owner, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn phone_spellings_share_one_row() {
    let h = harness();
    let owner = add_owner(&h, "owner");

    let plus = h
        .service
        .initiate_connection(owner, whatsapp("+55 11 99999-9999"))
        .await
        .unwrap();
    let bare = h
        .service
        .initiate_connection(owner, whatsapp("55 (11) 99999.9999"))
        .await
        .unwrap();

    assert!(!bare.created);
    assert_eq!(plus.channel.id, bare.channel.id);
    let rows = h.service.list(owner, Some(ChannelType::Whatsapp)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].address.as_deref(), Some("+5511999999999"));
}

#[tokio::test]
async fn background_worker_completes_and_stops_on_cancel() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let config = LifecycleConfig {
        whatsapp_delay: Duration::from_millis(50),
        poll_interval: Duration::from_millis(20),
        ..LifecycleConfig::default()
    };
    let service = ChannelService::new(db.clone(), Dispatcher::new(), config);
    let owner = Uuid::new_v4();
    db.create_user(&owner.to_string(), "owner", "hash").unwrap();

    let id = service
        .initiate_connection(owner, whatsapp("+5511999999999"))
        .await
        .unwrap()
        .channel
        .id;

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(CompletionWorker::new(service.clone()).run(shutdown.clone()));

    // Deadlines are wall-clock, so this waits on real time.
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.check_status(owner, id).await.unwrap().status != ChannelStatus::Connected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("worker never completed the attempt");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("worker ignored cancellation")
        .unwrap();
}

#[tokio::test]
async fn connected_address_rejects_new_attempt() {
    let h = harness();
    let owner = add_owner(&h, "owner");
    h.service
        .initiate_connection(owner, whatsapp("+5511999999999"))
        .await
        .unwrap();
    h.worker.run_once(after(6)).await.unwrap();

    let err = h
        .service
        .initiate_connection(owner, whatsapp("+5511999999999"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::DuplicateAttempt(ChannelStatus::Connected)));
}

#[tokio::test]
async fn unknown_owner_is_unauthenticated_and_writes_nothing() {
    let h = harness();
    let ghost = Uuid::new_v4();

    let err = h
        .service
        .initiate_connection(ghost, whatsapp("+5511999999999"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::Unauthenticated));
    assert!(h.db.list_channels(&ghost.to_string(), None).unwrap().is_empty());
}

#[tokio::test]
async fn invalid_input_is_rejected() {
    let h = harness();
    let owner = add_owner(&h, "owner");

    let err = h.service.initiate_connection(owner, whatsapp("  ")).await.unwrap_err();
    assert!(matches!(err, ConnectError::InvalidInput(_)));
    assert!(h.service.list(owner, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn channels_are_private_to_their_owner() {
    let h = harness();
    let alice = add_owner(&h, "alice");
    let bob = add_owner(&h, "bob");
    let id = h
        .service
        .initiate_connection(alice, whatsapp("+5511999999999"))
        .await
        .unwrap()
        .channel
        .id;

    assert!(matches!(h.service.check_status(bob, id).await, Err(ConnectError::NotFound)));
    assert!(matches!(h.service.disconnect(bob, id).await, Err(ConnectError::NotFound)));
    assert!(matches!(h.service.remove(bob, id).await, Err(ConnectError::NotFound)));
    assert!(h.service.list(bob, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_attempt_surfaces_as_error_and_can_be_retried() {
    let h = harness();
    let owner = add_owner(&h, "owner");
    let id = h
        .service
        .initiate_connection(owner, whatsapp("+5511999999999"))
        .await
        .unwrap()
        .channel
        .id;

    // Worker was down for well past the stale window.
    let report = h.worker.run_once(after(3600)).await.unwrap();
    assert_eq!(report.stale, 1);

    let failed = h.service.check_status(owner, id).await.unwrap();
    assert_eq!(failed.status, ChannelStatus::Error);
    assert_eq!(
        failed.error_reason.as_deref(),
        Some(FailureReason::StaleConnectionAttempt.message())
    );
    assert!(failed.transient_credential.is_none());

    let retried = h.service.retry(owner, id).await.unwrap();
    assert_eq!(retried.status, ChannelStatus::Connecting);
    assert!(retried.error_reason.is_none());
    assert!(retried.transient_credential.is_some());

    assert!(matches!(
        h.service.retry(owner, id).await,
        Err(ConnectError::DuplicateAttempt(ChannelStatus::Connecting))
    ));
}

#[tokio::test]
async fn list_filters_by_type() {
    let h = harness();
    let owner = add_owner(&h, "owner");
    h.service
        .initiate_connection(owner, whatsapp("+5511999999999"))
        .await
        .unwrap();
    h.service
        .initiate_connection(owner, ConnectRequest::Instagram { username: "loja".into() })
        .await
        .unwrap();

    assert_eq!(h.service.list(owner, None).await.unwrap().len(), 2);
    let instagram = h.service.list(owner, Some(ChannelType::Instagram)).await.unwrap();
    assert_eq!(instagram.len(), 1);
    assert_eq!(instagram[0].channel_type, ChannelType::Instagram);
}

#[tokio::test]
async fn lifecycle_publishes_owner_scoped_events() {
    let h = harness();
    let owner = add_owner(&h, "owner");
    let mut rx = h.dispatcher.subscribe();

    let id = h
        .service
        .initiate_connection(owner, whatsapp("+5511999999999"))
        .await
        .unwrap()
        .channel
        .id;
    h.worker.run_once(after(6)).await.unwrap();
    h.service.remove(owner, id).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        assert_eq!(msg.owner_id, owner);
        match serde_json::from_str::<GatewayEvent>(&msg.json).unwrap() {
            GatewayEvent::ChannelChanged { change, channel_id, status, .. } => {
                assert_eq!(channel_id, id);
                seen.push((change, status));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    assert_eq!(
        seen,
        vec![
            (ChangeKind::Insert, Some(ChannelStatus::Connecting)),
            (ChangeKind::Update, Some(ChannelStatus::Connected)),
            (ChangeKind::Delete, None),
        ]
    );
}
