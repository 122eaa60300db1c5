//! End-to-end tests for the client runtime.
//!
//! A scripted server answers log-on and service requests over the in-memory
//! and TCP transports while the test drives the dispatch loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tether_core::transport::frame;
use tether_core::{
    CancellationToken, ConnectionState, DisconnectedInfo, Endpoint, EndpointStore, Event,
    EventDispatcher, EventKind, JobId, MemoryPeer, MemoryTransport, ServiceRequest,
    ServiceResponse, SessionResult, StaticDirectory, TcpTransport, TetherClient, TetherError,
    WireMessage,
};
use tempfile::TempDir;
use tokio::net::TcpListener;

const LOOP_WAIT: Duration = Duration::from_millis(200);

/// What the scripted server sends back for one client message.
fn respond(message: &WireMessage) -> Option<WireMessage> {
    match message.kind {
        EventKind::LogOn => Some(message.reply(
            EventKind::LoggedOn,
            serde_json::json!({"result": 1, "extended_result": 0, "cell_id": 42}),
        )),
        EventKind::LogOff => Some(message.reply(
            EventKind::LoggedOff,
            serde_json::json!({"result": 1}),
        )),
        EventKind::ServiceRequest => Some(message.reply(
            EventKind::ServiceResponse,
            serde_json::json!({
                "method": message.payload["method"],
                "result": 1,
                "body": {"player_level": 12},
            }),
        )),
        _ => None,
    }
}

async fn serve_memory(mut peer: MemoryPeer) {
    while let Some(message) = peer.recv().await {
        if let Some(reply) = respond(&message) {
            if peer.send(reply).await.is_err() {
                break;
            }
        }
        if message.kind == EventKind::LogOff {
            peer.close();
        }
    }
}

/// Record every event routed to the listed kinds.
fn record(dispatcher: &mut EventDispatcher, kinds: &[EventKind]) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in kinds {
        let sink = seen.clone();
        dispatcher.subscribe(*kind, move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
    }
    seen
}

fn kinds(events: &Mutex<Vec<Event>>) -> Vec<EventKind> {
    events.lock().unwrap().iter().map(|e| e.kind()).collect()
}

#[tokio::test]
async fn test_service_response_is_correlated_over_memory_transport() {
    let endpoint: Endpoint = "10.1.0.1:27015".parse().unwrap();
    let transport = MemoryTransport::new();
    let mut listener = transport.listen(endpoint);
    tokio::spawn(async move {
        while let Some(peer) = listener.accept().await {
            tokio::spawn(serve_memory(peer));
        }
    });

    let (client, mut dispatcher) = TetherClient::builder()
        .transport(Arc::new(transport))
        .servers([endpoint])
        .build()
        .unwrap();

    let answered: Arc<Mutex<Vec<(JobId, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = answered.clone();
    dispatcher.subscribe(EventKind::ServiceResponse, move |event| {
        let Some(job) = event.claimed_job() else {
            return Ok(());
        };
        let response: ServiceResponse = event.payload_as()?;
        let level = response.body["player_level"].as_u64().unwrap_or_default();
        sink.lock().unwrap().push((job.job_id(), level));
        Ok(())
    });
    dispatcher.start();

    client.connect().await.unwrap();
    let job = client
        .issue(ServiceRequest::method("Player", "GetGameBadgeLevels", 1))
        .await
        .unwrap();

    for _ in 0..10 {
        dispatcher.run_once(LOOP_WAIT).await;
        if !answered.lock().unwrap().is_empty() {
            break;
        }
    }

    assert_eq!(*answered.lock().unwrap(), vec![(job, 12)]);
    assert!(!client.jobs().is_outstanding(job));
}

#[tokio::test]
async fn test_replayed_reply_is_not_claimed_twice() {
    let endpoint: Endpoint = "10.1.0.2:27015".parse().unwrap();
    let transport = MemoryTransport::new();
    let mut listener = transport.listen(endpoint);

    let (client, mut dispatcher) = TetherClient::builder()
        .transport(Arc::new(transport))
        .servers([endpoint])
        .build()
        .unwrap();
    let claims = Arc::new(Mutex::new(Vec::new()));
    let sink = claims.clone();
    dispatcher.subscribe(EventKind::ServiceResponse, move |event| {
        sink.lock().unwrap().push(event.claimed_job().is_some());
        Ok(())
    });
    dispatcher.start();

    client.connect().await.unwrap();
    let mut peer = listener.accept().await.unwrap();
    client
        .issue(ServiceRequest::method("Player", "GetGameBadgeLevels", 1))
        .await
        .unwrap();

    let request = peer.recv().await.unwrap();
    let reply = respond(&request).unwrap();
    peer.send(reply.clone()).await.unwrap();
    peer.send(reply).await.unwrap();

    for _ in 0..10 {
        dispatcher.run_once(LOOP_WAIT).await;
        if claims.lock().unwrap().len() == 2 {
            break;
        }
    }
    assert_eq!(*claims.lock().unwrap(), vec![true, false]);
}

#[tokio::test]
async fn test_log_on_log_off_session_over_memory_transport() {
    let endpoint: Endpoint = "10.1.0.3:27015".parse().unwrap();
    let transport = MemoryTransport::new();
    let mut listener = transport.listen(endpoint);
    tokio::spawn(async move {
        if let Some(peer) = listener.accept().await {
            serve_memory(peer).await;
        }
    });

    let (client, mut dispatcher) = TetherClient::builder()
        .transport(Arc::new(transport))
        .servers([endpoint])
        .build()
        .unwrap();
    let events = record(
        &mut dispatcher,
        &[
            EventKind::Connected,
            EventKind::LoggedOn,
            EventKind::LoggedOff,
            EventKind::Disconnected,
        ],
    );

    let token = CancellationToken::new();
    {
        let client = client.clone();
        dispatcher.subscribe(EventKind::Connected, move |_| {
            let client = client.clone();
            tokio::spawn(async move { client.log_on(serde_json::json!({"username": "demo"})).await });
            Ok(())
        });
    }
    {
        let client = client.clone();
        dispatcher.subscribe(EventKind::LoggedOn, move |event| {
            let result: SessionResult = event.payload_as()?;
            if let Some(cell) = result.cell_id {
                client.set_cell_id(cell.into());
            }
            let client = client.clone();
            tokio::spawn(async move { client.log_off().await });
            Ok(())
        });
    }
    {
        let token = token.clone();
        dispatcher.subscribe(EventKind::Disconnected, move |_| {
            token.cancel();
            Ok(())
        });
    }

    dispatcher.start();
    client.connect().await.unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        dispatcher.run_until_cancelled(&token, LOOP_WAIT),
    )
    .await
    .unwrap();

    assert_eq!(
        kinds(&events),
        vec![
            EventKind::Connected,
            EventKind::LoggedOn,
            EventKind::LoggedOff,
            EventKind::Disconnected,
        ]
    );
    assert_eq!(client.cell_id().get(), 42);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let last = events.lock().unwrap().last().cloned().unwrap();
    let info: DisconnectedInfo = last.payload_as().unwrap();
    assert!(!info.user_initiated);
}

#[tokio::test]
async fn test_service_request_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (mut reader, mut writer) = stream.split();
        while let Ok(Some(message)) = frame::read_message(&mut reader).await {
            if let Some(reply) = respond(&message) {
                frame::write_message(&mut writer, &reply).await.unwrap();
            }
        }
    });

    let (client, mut dispatcher) = TetherClient::builder()
        .transport(Arc::new(TcpTransport::new()))
        .servers([endpoint])
        .build()
        .unwrap();
    let events = record(&mut dispatcher, &[EventKind::ServiceResponse]);
    dispatcher.start();

    client.connect().await.unwrap();
    let job = client
        .issue(ServiceRequest::method("Player", "GetGameBadgeLevels", 1))
        .await
        .unwrap();

    for _ in 0..10 {
        dispatcher.run_once(LOOP_WAIT).await;
        if !events.lock().unwrap().is_empty() {
            break;
        }
    }

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].job_id(), Some(job));
    assert_eq!(events[0].claimed_job().map(|j| j.job_id()), Some(job));
    drop(events);

    assert!(client.disconnect().await);
}

#[tokio::test]
async fn test_tcp_server_hangup_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let (client, mut dispatcher) = TetherClient::builder()
        .transport(Arc::new(TcpTransport::new()))
        .servers([endpoint])
        .build()
        .unwrap();
    let events = record(&mut dispatcher, &[EventKind::Connected, EventKind::Disconnected]);
    dispatcher.start();

    client.connect().await.unwrap();
    for _ in 0..10 {
        dispatcher.run_once(LOOP_WAIT).await;
        if events.lock().unwrap().len() == 2 {
            break;
        }
    }

    assert_eq!(
        kinds(&events),
        vec![EventKind::Connected, EventKind::Disconnected]
    );
    assert!(client.store().is_failed(&endpoint));
}

#[tokio::test]
async fn test_malformed_frame_is_skipped_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        frame::write_frame(&mut stream, b"not json").await.unwrap();
        let logged_on = WireMessage::new(EventKind::LoggedOn, serde_json::json!({"result": 1}));
        frame::write_message(&mut stream, &logged_on).await.unwrap();
        // Hold the connection open until the client goes away.
        let _ = frame::read_message(&mut stream).await;
    });

    let (client, mut dispatcher) = TetherClient::builder()
        .transport(Arc::new(TcpTransport::new()))
        .servers([endpoint])
        .build()
        .unwrap();
    let events = record(
        &mut dispatcher,
        &[EventKind::Connected, EventKind::LoggedOn, EventKind::Disconnected],
    );
    dispatcher.start();

    client.connect().await.unwrap();
    for _ in 0..10 {
        dispatcher.run_once(LOOP_WAIT).await;
        if events.lock().unwrap().len() >= 2 {
            break;
        }
    }

    assert_eq!(kinds(&events), vec![EventKind::Connected, EventKind::LoggedOn]);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.disconnect().await);
}

#[tokio::test]
async fn test_startup_with_no_servers_and_no_directory_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let transport = MemoryTransport::new();
    let (client, _dispatcher) = TetherClient::builder()
        .transport(Arc::new(transport.clone()))
        .directory(Arc::new(StaticDirectory::default()))
        .data_dir(temp_dir.path())
        .build()
        .unwrap();

    let err = client.bootstrap().await.unwrap_err();
    assert!(matches!(err, TetherError::DirectoryUnavailable { .. }));
    assert!(transport.attempts().is_empty());
}

#[tokio::test]
async fn test_server_list_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let first: Endpoint = "1.2.3.4:27015".parse().unwrap();
    let second: Endpoint = "5.6.7.8:27016".parse().unwrap();

    {
        let (client, _dispatcher) = TetherClient::builder()
            .directory(Arc::new(StaticDirectory::new([first, second])))
            .data_dir(temp_dir.path())
            .build()
            .unwrap();
        let report = client.bootstrap().await.unwrap();
        assert_eq!(report.from_directory, 2);
        client.persist().unwrap();
    }

    let bytes = std::fs::read(temp_dir.path().join("servers.bin")).unwrap();
    let reloaded = EndpointStore::new();
    assert_eq!(reloaded.load_from(&bytes).unwrap(), 2);
    assert_eq!(reloaded.snapshot_all(), vec![first, second]);
}
