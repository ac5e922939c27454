//! Push notification delivery against a mock device

use scalarweb::{callback, Callback, ChangeEvent, Device, DeviceConfig, DeviceState, Endpoint, EventKind};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

mod common;
use common::{init_tracing, spawn, Mock, MockService, WEBSOCKET};

fn counter() -> (Arc<AtomicUsize>, Callback) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = count.clone();
    let cb = callback(move |_| {
        inner.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (count, cb)
}

fn notifying(name: &str, pushes: Vec<Value>) -> MockService {
    let mut service = MockService::new(name, &[WEBSOCKET])
        .method("switchNotifications")
        .notification("notifyPowerStatus")
        .notification("notifyVolumeInformation");
    for frame in pushes {
        service = service.push(frame);
    }
    service
}

async fn connect(endpoint: &str) -> Arc<Device> {
    let device = Device::connect(Endpoint::new(endpoint).unwrap(), DeviceConfig::default())
        .await
        .unwrap();
    Arc::new(device)
}

#[tokio::test]
async fn test_events_are_routed_by_kind() {
    init_tracing();
    let server = spawn(Mock::new(vec![notifying(
        "system",
        vec![
            json!({"method": "notifyPowerStatus", "params": [{"status": "active"}], "version": "1.0"}),
            json!({"method": "notifyBrandNewThing", "params": [{"a": 1}], "version": "1.0"}),
            json!({"result": [{"enabled": [{"name": "notifyPowerStatus", "version": "1.0"}], "disabled": []}], "id": 3}),
        ],
    )]))
    .await;
    let device = connect(&server.endpoint).await;

    let (power, power_cb) = counter();
    let (volume, volume_cb) = counter();
    device.on_notification(EventKind::Power, power_cb);
    device.on_notification(EventKind::Volume, volume_cb);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let fallback = callback(move |event: &ChangeEvent| {
        record.lock().unwrap().push(event.kind());
        Ok(())
    });

    let mut events = device.subscribe();
    let listener = device.clone();
    let task = tokio::spawn(async move { listener.listen_notifications(Some(fallback)).await });

    let mut received = Vec::new();
    for _ in 0..3 {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event in time")
            .unwrap();
        received.push(event);
    }
    assert_eq!(device.state(), DeviceState::Listening);

    device.stop_listen_notifications();
    let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(result.is_ok());

    assert_eq!(power.load(Ordering::SeqCst), 1);
    assert_eq!(volume.load(Ordering::SeqCst), 0);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![EventKind::Unrecognized, EventKind::Subscription]
    );
    assert!(matches!(&received[0], ChangeEvent::Power(p) if p.is_on()));
    assert_eq!(device.state(), DeviceState::Ready);

    let switches = server.mock.calls("switchNotifications");
    assert_eq!(
        switches[0]["params"],
        json!([{"enabled": [
            {"name": "notifyPowerStatus", "version": "1.0"},
            {"name": "notifyVolumeInformation", "version": "1.0"}
        ]}])
    );
}

#[tokio::test]
async fn test_lost_connection_ends_listening_once() {
    let server = spawn(Mock::new(vec![
        notifying("system", vec![]).close_after_pushes(),
        notifying("audio", vec![]).close_after_pushes(),
    ]))
    .await;
    let device = connect(&server.endpoint).await;

    let (lost, lost_cb) = counter();
    device.on_notification(EventKind::Connectivity, lost_cb);
    let mut events = device.subscribe();

    let result = timeout(Duration::from_secs(5), device.listen_notifications(None))
        .await
        .expect("listening ends on its own");
    assert!(result.is_ok());
    assert_eq!(lost.load(Ordering::SeqCst), 1);

    let Some(ChangeEvent::Connectivity(change)) = events.try_recv().unwrap() else {
        panic!("expected a connectivity event");
    };
    assert!(!change.connected);
    assert!(change.reason.is_some());
    assert!(events.try_recv().unwrap().is_none());
    assert_eq!(device.state(), DeviceState::Ready);
}

#[tokio::test]
async fn test_second_listen_is_rejected() {
    let server = spawn(Mock::new(vec![notifying("system", vec![])])).await;
    let device = connect(&server.endpoint).await;

    let listener = device.clone();
    let task = tokio::spawn(async move { listener.listen_notifications(None).await });

    // wait for the first session to take hold
    for _ in 0..100 {
        if device.state() == DeviceState::Listening {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let err = device.listen_notifications(None).await.unwrap_err();
    assert!(matches!(err, scalarweb::ScalarError::AlreadyListening));

    device.stop_listen_notifications();
    timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_closed_device_refuses_calls() {
    let server = spawn(Mock::new(vec![notifying("system", vec![])])).await;
    let device = connect(&server.endpoint).await;

    device.close();
    assert_eq!(device.state(), DeviceState::Closed);
    assert!(matches!(
        device.listen_notifications(None).await,
        Err(scalarweb::ScalarError::Closed)
    ));
    assert!(matches!(
        device.get_power().await,
        Err(scalarweb::ScalarError::Closed)
    ));
}

#[tokio::test]
async fn test_single_notification_activation() {
    let server = spawn(Mock::new(vec![notifying(
        "audio",
        vec![json!({"method": "notifyVolumeInformation", "params": [{"volume": 9, "mute": "off", "output": ""}]})],
    )]))
    .await;
    let device = connect(&server.endpoint).await;

    let notification = device
        .get_notifications()
        .into_iter()
        .find(|n| n.name == "notifyVolumeInformation")
        .unwrap();

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        notification
            .activate(&mut stop_rx, &mut |event: ChangeEvent| {
                let _ = event_tx.send(event);
            })
            .await
    });

    let event = timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, ChangeEvent::Volume(v) if v.volume == Some(9)));

    stop_tx.send_replace(true);
    timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();

    assert_eq!(
        server.mock.calls("switchNotifications")[0]["params"],
        json!([{"enabled": [{"name": "notifyVolumeInformation", "version": "1.0"}]}])
    );
}

#[tokio::test]
async fn test_silent_peer_counts_as_lost() {
    let server = spawn(Mock::new(vec![notifying("system", vec![]).stall_after_switch()])).await;
    let config = DeviceConfig::default().with_heartbeat_interval(Duration::from_millis(300));
    let device = Device::connect(Endpoint::new(&server.endpoint).unwrap(), config)
        .await
        .unwrap();

    let (lost, lost_cb) = counter();
    device.on_notification(EventKind::Connectivity, lost_cb);
    let mut events = device.subscribe();

    let result = timeout(Duration::from_secs(5), device.listen_notifications(None))
        .await
        .expect("a silent device must not hang listening");
    assert!(result.is_ok());
    assert_eq!(lost.load(Ordering::SeqCst), 1);

    let Some(ChangeEvent::Connectivity(change)) = events.try_recv().unwrap() else {
        panic!("expected a connectivity event");
    };
    assert!(!change.connected);
    assert!(events.try_recv().unwrap().is_none());
    assert_eq!(device.state(), DeviceState::Ready);
}

#[tokio::test]
async fn test_stop_right_after_spawn_is_honoured() {
    let server = spawn(Mock::new(vec![notifying("system", vec![])])).await;
    let device = connect(&server.endpoint).await;

    let listener = device.clone();
    let task = tokio::spawn(async move { listener.listen_notifications(None).await });
    device.stop_listen_notifications();

    timeout(Duration::from_secs(3), task)
        .await
        .expect("listening ends after the stop")
        .unwrap()
        .unwrap();
    assert_eq!(device.state(), DeviceState::Ready);

    // the stop was consumed, so a later session runs until stopped again
    let listener = device.clone();
    let task = tokio::spawn(async move { listener.listen_notifications(None).await });
    for _ in 0..100 {
        if device.state() == DeviceState::Listening {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(device.state(), DeviceState::Listening);
    device.stop_listen_notifications();
    timeout(Duration::from_secs(3), task).await.unwrap().unwrap().unwrap();
}
