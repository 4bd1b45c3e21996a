//! End-to-end tests: a server and clients talking over loopback TCP

use std::sync::Arc;
use std::time::{Duration, Instant};

use sigstream::mirror::StreamingSource;
use sigstream::{
    ClientConfig, ClientType, Error, MirroredSignal, PacketBuffer, ReconnectionStatus,
    ServerConfig, Signal, StreamingClient, StreamingHandler, StreamingServer,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

struct Counter;

impl Signal for Counter {
    fn global_id(&self) -> String {
        "dev0/counter".into()
    }

    fn serialize(&self) -> String {
        "{\"name\":\"counter\"}".into()
    }
}

struct Mirror {
    packets: mpsc::UnboundedSender<Vec<u8>>,
}

impl MirroredSignal for Mirror {
    fn remote_id(&self) -> String {
        "dev0/counter".into()
    }

    fn on_packet(&self, packet: PacketBuffer) {
        let _ = self.packets.send(packet.payload_bytes().to_vec());
    }
}

#[derive(Debug)]
enum Event {
    Available(String),
    Ack(String, bool),
}

struct Recorder {
    events: mpsc::UnboundedSender<Event>,
    statuses: mpsc::UnboundedSender<ReconnectionStatus>,
}

fn recorder() -> (
    Arc<Recorder>,
    mpsc::UnboundedReceiver<Event>,
    mpsc::UnboundedReceiver<ReconnectionStatus>,
) {
    let (events, event_rx) = mpsc::unbounded_channel();
    let (statuses, status_rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { events, statuses }), event_rx, status_rx)
}

impl StreamingHandler for Recorder {
    fn on_signal_available(&self, signal_id: &str, _serialized: &str) {
        let _ = self.events.send(Event::Available(signal_id.to_string()));
    }

    fn on_subscription_ack(&self, signal_id: &str, subscribed: bool) {
        let _ = self.events.send(Event::Ack(signal_id.to_string(), subscribed));
    }

    fn on_reconnection_status_changed(&self, status: ReconnectionStatus) {
        let _ = self.statuses.send(status);
    }
}

fn serve_on(listener: TcpListener) -> (Arc<StreamingServer>, JoinHandle<()>) {
    let server = Arc::new(StreamingServer::new(ServerConfig::default()));
    server.add_signal(Arc::new(Counter)).unwrap();

    let running = Arc::clone(&server);
    let task = tokio::spawn(async move {
        let _ = running.serve(listener).await;
    });
    (server, task)
}

async fn start_server() -> (Arc<StreamingServer>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (server, _task) = serve_on(listener);
    (server, addr)
}

/// Drop the listening socket and every open connection
async fn stop_server(server: &StreamingServer, task: JoinHandle<()>) {
    task.abort();
    let _ = task.await;
    server.close_all();
}

async fn rebind(addr: &str) -> TcpListener {
    for _ in 0..100 {
        if let Ok(listener) = TcpListener::bind(addr).await {
            return listener;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("could not rebind {}", addr);
}

async fn expect_ack(events: &mut mpsc::UnboundedReceiver<Event>) {
    loop {
        match next(events).await {
            Event::Ack(id, subscribed) => {
                assert_eq!(id, "dev0/counter");
                assert!(subscribed);
                return;
            }
            Event::Available(_) => {}
        }
    }
}

async fn expect_samples(packets: &mut mpsc::UnboundedReceiver<Vec<u8>>, samples: &[u8]) {
    let mut received = Vec::new();
    while received.len() < samples.len() {
        received.extend(next(packets).await);
    }
    assert_eq!(received, samples);
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

#[tokio::test]
async fn test_subscribe_and_receive_samples() {
    let (server, addr) = start_server().await;

    let (handler, mut events, _statuses) = recorder();
    let client = StreamingClient::connect(ClientConfig::new(addr), handler)
        .await
        .unwrap();

    match next(&mut events).await {
        Event::Available(id) => assert_eq!(id, "dev0/counter"),
        other => panic!("unexpected event: {:?}", other),
    }

    let (packet_tx, mut packets) = mpsc::unbounded_channel();
    let mirror: Arc<dyn MirroredSignal> = Arc::new(Mirror { packets: packet_tx });
    client.add_signal(&mirror).unwrap();
    client.subscribe("dev0/counter", None).unwrap();

    match next(&mut events).await {
        Event::Ack(id, subscribed) => {
            assert_eq!(id, "dev0/counter");
            assert!(subscribed);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let samples: Vec<u8> = (0u32..16).flat_map(|n| n.to_le_bytes()).collect();
    let report = server
        .publish("dev0/counter", &samples, 4, Instant::now())
        .unwrap();
    assert_eq!(report.connections, 1);
    assert_eq!(report.dropped_samples, 0);

    expect_samples(&mut packets, &samples).await;

    client.close();
}

#[tokio::test]
async fn test_exclusive_control_rejects_second_controller() {
    let (server, addr) = start_server().await;
    let handler = Arc::new(sigstream::client::NoopHandler);

    let exclusive = StreamingClient::connect(
        ClientConfig::new(addr.clone()).client_type(ClientType::ExclusiveControl),
        handler.clone(),
    )
    .await
    .unwrap();

    let rejected = StreamingClient::connect(
        ClientConfig::new(addr.clone()).client_type(ClientType::Control),
        handler.clone(),
    )
    .await;
    assert!(matches!(rejected, Err(Error::ConnectionRejected(_))));

    let viewer = StreamingClient::connect(
        ClientConfig::new(addr).client_type(ClientType::ViewOnly),
        handler,
    )
    .await
    .unwrap();

    let contexts = server.connections();
    assert_eq!(contexts.len(), 2);
    assert_eq!(server.stats().rejected_connections, 1);

    exclusive.close();
    viewer.close();
}

#[tokio::test]
async fn test_publish_without_subscribers_reaches_nobody() {
    let (server, addr) = start_server().await;
    let client = StreamingClient::connect(
        ClientConfig::new(addr),
        Arc::new(sigstream::client::NoopHandler),
    )
    .await
    .unwrap();

    let report = server
        .publish("dev0/counter", &[1, 2, 3, 4], 4, Instant::now())
        .unwrap();
    assert_eq!(report.connections, 0);
    assert!(matches!(
        server.publish("dev0/missing", &[1, 2, 3, 4], 4, Instant::now()),
        Err(Error::NotFound(_))
    ));

    client.close();
}

#[tokio::test]
async fn test_reconnect_restores_subscriptions() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (server, task) = serve_on(listener);

    let (handler, mut events, mut statuses) = recorder();
    let client = StreamingClient::connect(
        ClientConfig::new(addr.clone()).reconnect(Duration::from_millis(100), 50),
        handler,
    )
    .await
    .unwrap();
    assert_eq!(next(&mut statuses).await, ReconnectionStatus::Connected);

    let (packet_tx, mut packets) = mpsc::unbounded_channel();
    let mirror: Arc<dyn MirroredSignal> = Arc::new(Mirror { packets: packet_tx });
    client.add_signal(&mirror).unwrap();
    client.subscribe("dev0/counter", None).unwrap();
    expect_ack(&mut events).await;

    let samples: Vec<u8> = (0u32..8).flat_map(|n| n.to_le_bytes()).collect();
    server
        .publish("dev0/counter", &samples, 4, Instant::now())
        .unwrap();
    expect_samples(&mut packets, &samples).await;

    stop_server(&server, task).await;
    assert_eq!(next(&mut statuses).await, ReconnectionStatus::Reconnecting);

    let (restarted, _task) = serve_on(rebind(&addr).await);
    assert_eq!(next(&mut statuses).await, ReconnectionStatus::Restored);

    // The subscription is issued again on the new connection
    expect_ack(&mut events).await;
    assert_eq!(client.registry().ref_count("dev0/counter"), Some(1));

    let samples: Vec<u8> = (100u32..108).flat_map(|n| n.to_le_bytes()).collect();
    let report = restarted
        .publish("dev0/counter", &samples, 4, Instant::now())
        .unwrap();
    assert_eq!(report.connections, 1);
    expect_samples(&mut packets, &samples).await;

    assert!(statuses.try_recv().is_err());
    client.close();
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (server, task) = serve_on(listener);

    let (handler, _events, mut statuses) = recorder();
    let client = StreamingClient::connect(
        ClientConfig::new(addr).reconnect(Duration::from_millis(50), 2),
        handler,
    )
    .await
    .unwrap();
    assert_eq!(next(&mut statuses).await, ReconnectionStatus::Connected);

    stop_server(&server, task).await;
    assert_eq!(next(&mut statuses).await, ReconnectionStatus::Reconnecting);
    assert_eq!(next(&mut statuses).await, ReconnectionStatus::Unrecoverable);
    assert_eq!(client.status(), Some(ReconnectionStatus::Unrecoverable));

    client.close();
}
