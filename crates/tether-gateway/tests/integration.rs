//! End-to-end engine behavior over the in-process pair transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use tether_gateway::transport::{pair, Inbound, PairPeer};
use tether_gateway::{
    ConnectionError, ConnectionManager, DeviceConnection, Frame, FrameKind, GatewayConfig,
    Metadata, TimeoutConfig,
};

#[derive(Clone, Debug)]
enum Observed {
    Frame(FrameKind, String),
    Error(String),
}

/// Handler that records everything the reader dispatches.
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<Observed>>>,
}

impl Recorder {
    fn handler(
        &self,
    ) -> impl Fn(&DeviceConnection, Option<&Frame>, Option<&ConnectionError>) + Send + Sync + 'static
    {
        let events = Arc::clone(&self.events);
        move |_conn, frame, error| {
            let mut events = events.lock();
            if let Some(frame) = frame {
                events.push(Observed::Frame(frame.kind, frame.id.clone()));
            }
            if let Some(error) = error {
                events.push(Observed::Error(error.to_string()));
            }
        }
    }

    fn snapshot(&self) -> Vec<Observed> {
        self.events.lock().clone()
    }
}

fn config(timeouts: TimeoutConfig) -> GatewayConfig {
    GatewayConfig {
        n_shards: 4,
        init_shard_size: 8,
        request_queue_size: 16,
        timeouts,
        ..GatewayConfig::default()
    }
}

fn default_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        read_ms: 60_000,
        write_ms: 2_000,
        request_ms: 1_000,
        response_ms: 2_000,
    }
}

async fn next_frame(peer: &mut PairPeer) -> Frame {
    loop {
        match peer.recv().await.expect("gateway event") {
            Inbound::Frame(bytes) => return Frame::decode(&bytes).expect("decodable frame"),
            Inbound::Pong(_) => continue,
            other => panic!("expected frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn register_find_and_count() {
    let manager = ConnectionManager::new(config(default_timeouts())).unwrap();
    assert_eq!(manager.count(), 0);

    let (transport, _peer) = pair(8);
    let recorder = Recorder::default();
    manager
        .new_connection("dev-1", transport, recorder.handler(), Metadata::new())
        .await
        .unwrap();

    assert_eq!(manager.count(), 1);
    assert!(manager.find("dev-1").is_some());
    manager.close().await;
    assert_eq!(manager.count(), 0);
}

#[tokio::test]
async fn sync_request_round_trip() {
    let manager = ConnectionManager::new(config(default_timeouts())).unwrap();
    let (transport, mut peer) = pair(8);
    let recorder = Recorder::default();
    let conn = manager
        .new_connection("dev-1", transport, recorder.handler(), Metadata::new())
        .await
        .unwrap();

    // echo peer: answer the sync request with the same id
    let echo = tokio::spawn(async move {
        let request = next_frame(&mut peer).await;
        assert_eq!(request.kind, FrameKind::SyncRequest);
        peer.send_frame(&Frame::new(
            FrameKind::Response,
            request.id.clone(),
            b"pong-data".as_slice(),
        ))
        .await
        .unwrap();
        peer
    });

    let response = conn.send_sync(b"ping-data".as_slice()).await.unwrap();
    assert_eq!(&response[..], b"pong-data");
    assert_eq!(conn.pending_requests(), 0);

    // the resolved response is also dispatched to the handler
    let saw_response = recorder
        .snapshot()
        .iter()
        .any(|event| matches!(event, Observed::Frame(FrameKind::Response, _)));
    assert!(saw_response);

    let _peer = echo.await.unwrap();
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn sync_request_times_out_and_clears_pending() {
    let timeouts = TimeoutConfig {
        response_ms: 100,
        ..default_timeouts()
    };
    let manager = ConnectionManager::new(config(timeouts)).unwrap();
    let (transport, _peer) = pair(8);
    let recorder = Recorder::default();
    let conn = manager
        .new_connection("dev-1", transport, recorder.handler(), Metadata::new())
        .await
        .unwrap();

    let err = conn.send_sync(b"ping".as_slice()).await.unwrap_err();
    assert!(matches!(err, ConnectionError::ResponseTimeout(_)));
    assert_eq!(conn.pending_requests(), 0);
    assert!(!conn.is_closed());

    manager.close().await;
}

#[tokio::test]
async fn unexpected_response_reaches_handler_and_connection_stays_open() {
    let manager = ConnectionManager::new(config(default_timeouts())).unwrap();
    let (transport, peer) = pair(8);
    let recorder = Recorder::default();
    let conn = manager
        .new_connection("dev-1", transport, recorder.handler(), Metadata::new())
        .await
        .unwrap();

    peer.send_frame(&Frame::new(FrameKind::Response, "stray", b"x".as_slice()))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let unexpected = recorder.snapshot().iter().any(|event| {
        matches!(event, Observed::Error(message) if message.contains("unexpected response"))
    });
    assert!(unexpected);
    assert!(!conn.is_closed());
    assert!(manager.find("dev-1").is_some());

    manager.close().await;
}

#[tokio::test]
async fn peer_close_frame_tears_down_once() {
    let manager = ConnectionManager::new(config(default_timeouts())).unwrap();
    let (transport, mut peer) = pair(8);
    let recorder = Recorder::default();
    let conn = manager
        .new_connection("dev-1", transport, recorder.handler(), Metadata::new())
        .await
        .unwrap();

    peer.send_close(Some(Bytes::from_static(b"battery died")))
        .await
        .unwrap();
    conn.wait().await;

    let close_frames = recorder
        .snapshot()
        .iter()
        .filter(|event| matches!(event, Observed::Frame(FrameKind::Close, _)))
        .count();
    assert_eq!(close_frames, 1);
    assert!(conn.is_closed());
    assert_eq!(manager.count(), 0);
    assert!(matches!(
        conn.send_async(b"late".as_slice()).await,
        Err(ConnectionError::Closed)
    ));
    // the writer still emitted its final close frame
    assert!(matches!(peer.recv().await, Some(Inbound::Close(_))));

    manager.close().await;
}

#[tokio::test]
async fn frames_preserve_caller_enqueue_order() {
    let manager = ConnectionManager::new(config(default_timeouts())).unwrap();
    let (transport, mut peer) = pair(16);
    let recorder = Recorder::default();
    let conn = manager
        .new_connection("dev-1", transport, recorder.handler(), Metadata::new())
        .await
        .unwrap();

    for i in 0..5u8 {
        conn.send_async(vec![i]).await.unwrap();
    }
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(next_frame(&mut peer).await.id);
    }
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);

    manager.close().await;
}

#[tokio::test]
async fn ping_updates_liveness_and_elicits_millis_pong() {
    let manager = ConnectionManager::new(config(default_timeouts())).unwrap();
    let (transport, mut peer) = pair(8);
    let recorder = Recorder::default();
    let conn = manager
        .new_connection("dev-1", transport, recorder.handler(), Metadata::new())
        .await
        .unwrap();
    let before = conn.last_pinged_at_ms();

    tokio::time::sleep(Duration::from_millis(5)).await;
    peer.send_ping(Bytes::new()).await.unwrap();

    match peer.recv().await.expect("pong event") {
        Inbound::Pong(payload) => {
            let millis: i64 = std::str::from_utf8(&payload)
                .expect("utf-8 pong payload")
                .parse()
                .expect("decimal milliseconds");
            assert!(millis >= before);
        }
        other => panic!("expected pong, got {other:?}"),
    }
    assert!(conn.last_pinged_at_ms() >= before);

    manager.close().await;
}

#[tokio::test]
async fn full_inbox_times_out_the_enqueue() {
    let timeouts = TimeoutConfig {
        read_ms: 60_000,
        write_ms: 30_000,
        request_ms: 100,
        response_ms: 30_000,
    };
    let mut cfg = config(timeouts);
    cfg.request_queue_size = 1;
    let manager = ConnectionManager::new(cfg).unwrap();

    // transport capacity 1 and a peer that never reads: the first frame
    // fills the channel, the second parks the writer, the third sits in the
    // inbox, and the fourth cannot be enqueued
    let (transport, peer) = pair(1);
    let recorder = Recorder::default();
    let conn = manager
        .new_connection("dev-1", transport, recorder.handler(), Metadata::new())
        .await
        .unwrap();

    conn.send_async(b"0".as_slice()).await.unwrap();
    let blocked: Vec<_> = (0..2)
        .map(|_| {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.send_async(b"x".as_slice()).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = conn.send_async(b"overflow".as_slice()).await.unwrap_err();
    assert!(matches!(err, ConnectionError::EnqueueTimeout(_)));

    conn.close();
    // releases the parked writer: its transport send fails immediately
    drop(peer);
    conn.wait().await;
    for handle in blocked {
        // parked senders observe a timeout or the shutdown, not a panic
        let result = handle.await.unwrap();
        assert!(result.is_err());
    }
    manager.close().await;
}

#[tokio::test]
async fn transport_failure_closes_the_connection() {
    let manager = ConnectionManager::new(config(default_timeouts())).unwrap();
    let (transport, peer) = pair(8);
    let recorder = Recorder::default();
    let conn = manager
        .new_connection("dev-1", transport, recorder.handler(), Metadata::new())
        .await
        .unwrap();

    drop(peer);
    conn.wait().await;

    assert!(conn.is_closed());
    assert_eq!(manager.count(), 0);
    let saw_transport_error = recorder
        .snapshot()
        .iter()
        .any(|event| matches!(event, Observed::Error(message) if message.contains("transport")));
    assert!(saw_transport_error);

    manager.close().await;
}

#[tokio::test]
async fn concurrent_sync_requests_resolve_independently() {
    let manager = ConnectionManager::new(config(default_timeouts())).unwrap();
    let (transport, mut peer) = pair(16);
    let recorder = Recorder::default();
    let conn = manager
        .new_connection("dev-1", transport, recorder.handler(), Metadata::new())
        .await
        .unwrap();

    // answer both requests in reverse order to prove correlation by id
    let responder = tokio::spawn(async move {
        let first = next_frame(&mut peer).await;
        let second = next_frame(&mut peer).await;
        for request in [second, first] {
            let mut body = b"reply-".to_vec();
            body.extend_from_slice(request.id.as_bytes());
            peer.send_frame(&Frame::new(FrameKind::Response, request.id.clone(), body))
                .await
                .unwrap();
        }
        peer
    });

    let (a, b) = tokio::join!(
        conn.send_sync(b"first".as_slice()),
        conn.send_sync(b"second".as_slice())
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert!(a.starts_with(b"reply-"));
    assert!(b.starts_with(b"reply-"));
    assert_ne!(a, b);
    assert_eq!(conn.pending_requests(), 0);

    let _peer = responder.await.unwrap();
    manager.close().await;
}

#[tokio::test]
async fn registry_refusal_unwinds_the_connection() {
    use tether_gateway::{Registry, RegistryError};

    /// Accepts the construction ping, refuses every registration.
    struct RefusingRegistry;

    impl Registry for RefusingRegistry {
        fn ping(&self) -> Result<(), RegistryError> {
            Ok(())
        }
        fn update(&self, _conn: &DeviceConnection) -> Result<(), RegistryError> {
            Err(RegistryError::Unavailable("directory rejected write".into()))
        }
        fn remove(&self, _conn: &DeviceConnection) -> Result<(), RegistryError> {
            Ok(())
        }
        fn close(&self) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    let manager = ConnectionManager::with_registry(
        config(default_timeouts()),
        Arc::new(RefusingRegistry),
    )
    .unwrap();

    let (transport, _peer) = pair(8);
    let recorder = Recorder::default();
    let err = manager
        .new_connection("dev-1", transport, recorder.handler(), Metadata::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("registry refused connection"));
    assert_eq!(manager.count(), 0);
    assert!(manager.find("dev-1").is_none());

    manager.close().await;
}

#[tokio::test]
async fn no_tasks_survive_manager_close() {
    let manager = ConnectionManager::new(config(default_timeouts())).unwrap();
    let mut peers = Vec::new();
    let mut conns = Vec::new();
    for i in 0..8 {
        let (transport, peer) = pair(8);
        let recorder = Recorder::default();
        let conn = manager
            .new_connection(format!("dev-{i}"), transport, recorder.handler(), Metadata::new())
            .await
            .unwrap();
        peers.push(peer);
        conns.push(conn);
    }
    assert_eq!(manager.count(), 8);

    manager.close().await;

    assert_eq!(manager.count(), 0);
    for conn in &conns {
        assert!(conn.is_closed());
        conn.wait().await;
    }
    // every peer observed the final close frame and the end of the stream
    for peer in &mut peers {
        assert!(matches!(peer.recv().await, Some(Inbound::Close(_))));
        assert!(peer.recv().await.is_none());
    }
}
