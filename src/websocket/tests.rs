use std::sync::Arc;
use std::time::Duration;

use fluxgate_broker::{topology, Broker, MemoryBroker};
use fluxgate_core::Reading;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::protocol::{SourceDescriptor, ViewerMessage};
use super::registry::SocketRegistry;
use super::relay;

fn reading(name: &str, value: f64) -> Reading {
    Reading::new(name, value, "2026-08-06T12:00:00Z".parse().unwrap())
}

#[test]
fn discover_frame_parses() {
    let msg: ViewerMessage = serde_json::from_str(r#"{"type":"discover"}"#).unwrap();
    assert_eq!(msg, ViewerMessage::Discover);
}

#[test]
fn source_frame_shape() {
    let json = serde_json::to_string(&ViewerMessage::source("temp1")).unwrap();
    assert_eq!(json, r#"{"type":"source","data":{"name":"temp1"}}"#);
}

#[test]
fn reading_frame_round_trips() {
    let msg = ViewerMessage::reading(reading("temp1", 3.14));
    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.starts_with(r#"{"type":"reading","data":"#));
    let back: ViewerMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn failed_socket_is_removed_others_still_receive() {
    let registry = SocketRegistry::new();

    let (alive_tx, mut alive_rx) = mpsc::unbounded_channel();
    let (dead_tx, dead_rx) = mpsc::unbounded_channel();
    registry.add(Uuid::new_v4(), alive_tx);
    registry.add(Uuid::new_v4(), dead_tx);
    drop(dead_rx); // the peer went away

    let delivered = registry.broadcast(&ViewerMessage::source("temp1"));
    assert_eq!(delivered, 1);
    assert_eq!(registry.len(), 1);
    assert!(alive_rx.try_recv().is_ok());

    // The pruned socket is never attempted again.
    let delivered = registry.broadcast(&ViewerMessage::source("temp2"));
    assert_eq!(delivered, 1);
    assert!(alive_rx.try_recv().is_ok());
}

#[test]
fn remove_is_idempotent() {
    let registry = SocketRegistry::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    let id = Uuid::new_v4();
    registry.add(id, tx);

    assert!(registry.remove(id));
    assert!(!registry.remove(id));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn relays_tag_frames_by_exchange() {
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    let registry = Arc::new(SocketRegistry::new());
    let cancel = CancellationToken::new();
    relay::start(broker.clone(), registry.clone(), cancel.clone())
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.add(Uuid::new_v4(), tx);

    broker
        .publish_fanout(topology::VIEWER_SOURCES_EXCHANGE, b"temp1".to_vec())
        .await
        .unwrap();
    broker
        .publish_fanout(
            topology::VIEWER_READINGS_EXCHANGE,
            reading("temp1", 1.5).to_bytes().unwrap(),
        )
        .await
        .unwrap();

    let frame = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        serde_json::from_str::<ViewerMessage>(&frame).unwrap(),
        ViewerMessage::Source {
            data: SourceDescriptor {
                name: "temp1".into()
            }
        }
    );

    let frame = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    match serde_json::from_str::<ViewerMessage>(&frame).unwrap() {
        ViewerMessage::Reading { data } => assert_eq!(data.value, 1.5),
        other => panic!("unexpected frame: {other:?}"),
    }
    cancel.cancel();
}

#[tokio::test]
async fn undecodable_broadcast_is_skipped() {
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    let registry = Arc::new(SocketRegistry::new());
    let cancel = CancellationToken::new();
    relay::start(broker.clone(), registry.clone(), cancel.clone())
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.add(Uuid::new_v4(), tx);

    broker
        .publish_fanout(topology::VIEWER_READINGS_EXCHANGE, b"garbage".to_vec())
        .await
        .unwrap();
    broker
        .publish_fanout(
            topology::VIEWER_READINGS_EXCHANGE,
            reading("temp1", 2.0).to_bytes().unwrap(),
        )
        .await
        .unwrap();

    let frame = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    match serde_json::from_str::<ViewerMessage>(&frame).unwrap() {
        ViewerMessage::Reading { data } => assert_eq!(data.value, 2.0),
        other => panic!("unexpected frame: {other:?}"),
    }
    cancel.cancel();
}
