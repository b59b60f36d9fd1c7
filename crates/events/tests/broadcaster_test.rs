use std::sync::Arc;
use std::time::Duration;

use dashboard_core::models::event_types;
use dashboard_core::{DashboardError, Event, EventPublisher, HubConfig, TaskStatus};
use dashboard_events::{EventBroadcaster, Subscriber};
use dashboard_hub::{channels, Hub};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

async fn broadcaster() -> Arc<EventBroadcaster> {
    let hub = Arc::new(Hub::new(HubConfig::default()));
    hub.start(CancellationToken::new()).await.unwrap();
    Arc::new(EventBroadcaster::new(hub))
}

fn recording_subscriber(user_id: i64) -> (Subscriber, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscriber = Subscriber::from_fn(user_id, move |event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event);
            Ok::<(), DashboardError>(())
        }
    });
    (subscriber, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Option<Event> {
    tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn subscribe_publish_unsubscribe() {
    let broadcaster = broadcaster().await;
    let (subscriber, mut rx) = recording_subscriber(7);
    let id = broadcaster
        .subscribe(event_types::TASK_STATUS, subscriber)
        .await;
    assert_eq!(broadcaster.subscriber_count(event_types::TASK_STATUS).await, 1);

    broadcaster
        .emit_task_status(7, 100, TaskStatus::Running, None)
        .await;
    let received = next_event(&mut rx).await.expect("listener not called");
    assert_eq!(received.payload["task_id"], json!(100));
    assert_eq!(received.payload["status"], json!("running"));

    assert!(broadcaster.unsubscribe(event_types::TASK_STATUS, &id).await);
    assert!(!broadcaster.unsubscribe(event_types::TASK_STATUS, &id).await);

    broadcaster
        .emit_task_status(7, 100, TaskStatus::Completed, None)
        .await;
    assert!(next_event(&mut rx).await.is_none());
}

#[tokio::test]
async fn subscribers_are_scoped_by_user() {
    let broadcaster = broadcaster().await;
    let (global, mut global_rx) = recording_subscriber(0);
    let (user5, mut user5_rx) = recording_subscriber(5);
    broadcaster.subscribe(event_types::NOTIFICATION, global).await;
    broadcaster.subscribe(event_types::NOTIFICATION, user5).await;

    broadcaster.emit_notification(6, "hello", "for user six").await;
    assert!(next_event(&mut global_rx).await.is_some());
    assert!(next_event(&mut user5_rx).await.is_none());

    broadcaster.emit_notification(5, "hello", "for user five").await;
    assert!(next_event(&mut global_rx).await.is_some());
    let received = next_event(&mut user5_rx).await.unwrap();
    assert_eq!(received.user_id, 5);
}

#[tokio::test]
async fn only_matching_event_type_is_delivered() {
    let broadcaster = broadcaster().await;
    let (subscriber, mut rx) = recording_subscriber(0);
    broadcaster
        .subscribe(event_types::TASK_COMPLETED, subscriber)
        .await;

    broadcaster.emit_task_progress(1, 1, 50).await;
    assert!(next_event(&mut rx).await.is_none());

    broadcaster
        .emit_task_completed(1, 1, &json!({"ic": 0.05}))
        .await;
    assert!(next_event(&mut rx).await.is_some());
}

#[tokio::test]
async fn slow_or_failing_listener_does_not_block_others() {
    let broadcaster = broadcaster().await;

    let slow = Subscriber::from_fn(0, |_event| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok::<(), DashboardError>(())
    });
    let failing = Subscriber::from_fn(0, |_event| async {
        Err::<(), _>(DashboardError::Internal("listener exploded".to_string()))
    });
    let (healthy, mut rx) = recording_subscriber(0);
    for subscriber in [slow, failing, healthy] {
        broadcaster.subscribe(event_types::SYSTEM_ALERT, subscriber).await;
    }

    tokio::time::timeout(
        Duration::from_millis(100),
        broadcaster.emit_system_alert("warning", "disk almost full"),
    )
    .await
    .expect("publish blocked on a listener");

    let received = next_event(&mut rx).await.unwrap();
    assert_eq!(received.payload["level"], json!("warning"));
}

#[tokio::test]
async fn task_events_reach_channel_subscribers() {
    let broadcaster = broadcaster().await;
    let hub = broadcaster.hub().clone();
    let (watcher, mut watcher_rx) = hub.connect(1).await.unwrap();
    let (_idle, mut idle_rx) = hub.connect(1).await.unwrap();
    watcher_rx.recv().await.unwrap();
    idle_rx.recv().await.unwrap();
    watcher.subscribe(&[channels::TASK_PROGRESS.to_string()]);

    let publisher: Arc<dyn EventPublisher> = broadcaster.clone();
    publisher.publish(Event::task_progress(1, 55, 40)).await;

    let frame: Value = serde_json::from_str(&watcher_rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["type"], "task_progress");
    assert_eq!(frame["channel"], "task_progress");
    assert_eq!(frame["data"]["task_id"], 55);
    assert_eq!(frame["data"]["progress"], 40);
    assert_eq!(frame["user_id"], 1);
    assert!(idle_rx.try_recv().is_err());
}

#[tokio::test]
async fn notifications_go_to_the_owning_user() {
    let broadcaster = broadcaster().await;
    let hub = broadcaster.hub().clone();
    let (_owner, mut owner_rx) = hub.connect(8).await.unwrap();
    let (_stranger, mut stranger_rx) = hub.connect(9).await.unwrap();
    owner_rx.recv().await.unwrap();
    stranger_rx.recv().await.unwrap();

    broadcaster.emit_notification(8, "done", "backtest finished").await;

    let frame: Value = serde_json::from_str(&owner_rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["data"]["title"], "done");
    assert!(stranger_rx.try_recv().is_err());
}

#[tokio::test]
async fn task_events_stay_with_their_owner() {
    let broadcaster = broadcaster().await;
    let hub = broadcaster.hub().clone();
    let (owner, mut owner_rx) = hub.connect(1).await.unwrap();
    let (other, mut other_rx) = hub.connect(2).await.unwrap();
    owner_rx.recv().await.unwrap();
    other_rx.recv().await.unwrap();
    owner.subscribe(&[channels::TASK_STATUS.to_string()]);
    other.subscribe(&[channels::TASK_STATUS.to_string()]);

    broadcaster
        .emit_task_completed(1, 77, &json!({"sharpe_ratio": 2.5}))
        .await;

    let frame: Value = serde_json::from_str(&owner_rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["type"], "task_completed");
    assert_eq!(frame["channel"], "task_status");
    assert_eq!(frame["data"]["result"]["sharpe_ratio"], 2.5);
    assert!(other_rx.try_recv().is_err());
}

#[tokio::test]
async fn unowned_channel_events_reach_every_subscriber() {
    let broadcaster = broadcaster().await;
    let hub = broadcaster.hub().clone();
    let (first, mut first_rx) = hub.connect(1).await.unwrap();
    let (second, mut second_rx) = hub.connect(2).await.unwrap();
    first_rx.recv().await.unwrap();
    second_rx.recv().await.unwrap();
    first.subscribe(&[channels::SYSTEM_MONITOR.to_string()]);
    second.subscribe(&[channels::SYSTEM_MONITOR.to_string()]);

    broadcaster.emit_system_alert("warning", "queue backlog").await;

    assert!(first_rx.recv().await.is_some());
    assert!(second_rx.recv().await.is_some());
}
