use std::time::Duration;

use printagent_config::AgentSettings;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::testing::{FakeServer, FakeServerOptions};
use crate::{ConnectionState, LinkError, LinkEvent, LinkHandle, LinkOptions};

const WAIT: Duration = Duration::from_secs(5);

fn settings(url: &str, key: Option<&str>) -> AgentSettings {
    AgentSettings {
        server_url: url.to_owned(),
        api_key: key.map(str::to_owned),
        printer_name: "ZPL500".to_owned(),
    }
}

fn fast() -> LinkOptions {
    LinkOptions {
        reconnect_interval: Duration::from_millis(100),
        reconnect_max_interval: Duration::from_millis(100),
        connect_timeout: Duration::from_secs(2),
    }
}

async fn expect_event<F>(rx: &mut UnboundedReceiver<LinkEvent>, mut pred: F) -> LinkEvent
where
    F: FnMut(&LinkEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(left, rx.recv()).await {
            Ok(Some(event)) if pred(&event) => return event,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("event channel closed"),
            Err(_) => panic!("timed out waiting for link event"),
        }
    }
}

fn is_connected(e: &LinkEvent) -> bool {
    matches!(e, LinkEvent::Connected { .. })
}

async fn online(
    server: &FakeServer,
    key: &str,
) -> (LinkHandle, UnboundedReceiver<LinkEvent>) {
    let (link, mut events, _task) = LinkHandle::spawn(settings(&server.url(), Some(key)), fast());
    link.connect().await.unwrap();
    expect_event(&mut events, is_connected).await;
    (link, events)
}

#[tokio::test]
async fn connects_with_api_key_in_auth() {
    let server = FakeServer::start(FakeServerOptions {
        api_key: Some("k-1".into()),
        ..Default::default()
    })
    .await
    .unwrap();

    let (link, _events) = online(&server, "k-1").await;
    assert_eq!(link.state(), ConnectionState::Connected);
    assert_eq!(server.sessions(), 1);
    assert_eq!(server.auths(), vec![json!({"api_key": "k-1"})]);
}

#[tokio::test]
async fn missing_credential_never_dials() {
    let server = FakeServer::start(FakeServerOptions::default()).await.unwrap();
    let (link, mut events, _task) = LinkHandle::spawn(settings(&server.url(), None), fast());

    link.connect().await.unwrap();
    let event = expect_event(&mut events, |e| matches!(e, LinkEvent::ConnectError { .. })).await;
    assert!(matches!(event, LinkEvent::ConnectError { reason } if reason.contains("API key")));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(server.auths().is_empty());
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn rejected_key_retries_on_schedule() {
    let server = FakeServer::start(FakeServerOptions {
        api_key: Some("right".into()),
        ..Default::default()
    })
    .await
    .unwrap();
    let (link, mut events, _task) =
        LinkHandle::spawn(settings(&server.url(), Some("wrong")), fast());

    link.connect().await.unwrap();
    let first = expect_event(&mut events, |e| matches!(e, LinkEvent::ConnectError { .. })).await;
    assert!(matches!(first, LinkEvent::ConnectError { reason } if reason.contains("invalid api key")));
    expect_event(&mut events, |e| matches!(e, LinkEvent::ConnectError { .. })).await;

    assert!(server.auths().len() >= 2);
    assert_eq!(server.sessions(), 0);
}

#[tokio::test]
async fn connect_is_idempotent() {
    let server = FakeServer::start(FakeServerOptions::default()).await.unwrap();
    let (link, mut events, _task) = LinkHandle::spawn(settings(&server.url(), Some("k")), fast());

    link.connect().await.unwrap();
    link.connect().await.unwrap();
    expect_event(&mut events, is_connected).await;
    link.connect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.sessions(), 1);
}

#[tokio::test]
async fn server_events_are_surfaced() {
    let server = FakeServer::start(FakeServerOptions::default()).await.unwrap();
    let (_link, mut events) = online(&server, "k").await;

    assert!(server.emit(
        "print_label",
        json!({"job_id": 7, "invoice": "INV-7", "pcs": 2, "data": "^XA^XZ"})
    ));
    assert!(server.emit("status", json!({"msg": "3 jobs queued"})));

    match expect_event(&mut events, |e| matches!(e, LinkEvent::PrintLabel(_))).await {
        LinkEvent::PrintLabel(label) => {
            assert_eq!(label.job_id, Some(7));
            assert_eq!(label.invoice, "INV-7");
            assert_eq!(label.pcs, Some(2));
        }
        other => panic!("unexpected {other:?}"),
    }
    match expect_event(&mut events, |e| matches!(e, LinkEvent::Status(_))).await {
        LinkEvent::Status(status) => assert_eq!(status.msg, "3 jobs queued"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn print_label_without_data_is_dropped() {
    let server = FakeServer::start(FakeServerOptions::default()).await.unwrap();
    let (_link, mut events) = online(&server, "k").await;

    assert!(server.emit("print_label", json!({"job_id": 9, "invoice": "X"})));
    assert!(server.emit("print_label", json!({"job_id": 10, "invoice": "Y", "data": 123})));
    assert!(server.emit("print_label", json!({"job_id": 11, "invoice": "Z", "data": "^XA^XZ"})));

    match expect_event(&mut events, |e| matches!(e, LinkEvent::PrintLabel(_))).await {
        LinkEvent::PrintLabel(label) => assert_eq!(label.job_id, Some(11)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn emit_reaches_server() {
    let mut server = FakeServer::start(FakeServerOptions::default()).await.unwrap();
    let (link, _events) = online(&server, "k").await;

    link.emit("print_label_ack", json!({"job_id": 7, "status": "printed"}))
        .await
        .unwrap();

    let got = server.next_event(WAIT).await.expect("server saw nothing");
    assert_eq!(got.name, "print_label_ack");
    assert_eq!(got.data, json!({"job_id": 7, "status": "printed"}));
}

#[tokio::test]
async fn emit_while_offline_fails() {
    let (link, _events, _task) =
        LinkHandle::spawn(settings("http://127.0.0.1:9", Some("k")), fast());
    let err = link.emit("print_label_ack", json!({})).await.unwrap_err();
    assert!(matches!(err, LinkError::NotConnected));
}

#[tokio::test]
async fn reconnects_after_drop() {
    let server = FakeServer::start(FakeServerOptions::default()).await.unwrap();
    let (link, mut events) = online(&server, "k").await;

    assert!(server.kick());
    match expect_event(&mut events, |e| matches!(e, LinkEvent::Disconnected(_))).await {
        LinkEvent::Disconnected(reason) => assert!(!reason.requested),
        other => panic!("unexpected {other:?}"),
    }
    expect_event(&mut events, is_connected).await;
    assert_eq!(server.sessions(), 2);
    assert!(link.is_connected());
}

#[tokio::test]
async fn server_namespace_disconnect_triggers_retry() {
    let server = FakeServer::start(FakeServerOptions::default()).await.unwrap();
    let (_link, mut events) = online(&server, "k").await;

    assert!(server.disconnect_client());
    expect_event(&mut events, |e| matches!(e, LinkEvent::Disconnected(_))).await;
    expect_event(&mut events, is_connected).await;
    assert_eq!(server.sessions(), 2);
}

#[tokio::test]
async fn explicit_disconnect_stays_down() {
    let server = FakeServer::start(FakeServerOptions::default()).await.unwrap();
    let (link, mut events) = online(&server, "k").await;

    link.disconnect().await.unwrap();
    match expect_event(&mut events, |e| matches!(e, LinkEvent::Disconnected(_))).await {
        LinkEvent::Disconnected(reason) => assert!(reason.requested),
        other => panic!("unexpected {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(server.sessions(), 1);
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn silent_server_is_dropped_after_heartbeat_deadline() {
    let server = FakeServer::start(FakeServerOptions {
        ping_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_millis(100),
        ..Default::default()
    })
    .await
    .unwrap();
    let (_link, mut events) = online(&server, "k").await;

    match expect_event(&mut events, |e| matches!(e, LinkEvent::Disconnected(_))).await {
        LinkEvent::Disconnected(reason) => assert!(reason.message.contains("ping timeout")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn answered_pings_keep_the_session() {
    let server = FakeServer::start(FakeServerOptions {
        ping_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_millis(200),
        send_pings: true,
        ..Default::default()
    })
    .await
    .unwrap();
    let (link, mut events) = online(&server, "k").await;

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(link.is_connected());
    assert_eq!(server.sessions(), 1);
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, LinkEvent::Disconnected(_)), "{event:?}");
    }
}

#[tokio::test]
async fn handshake_timeout_is_a_connect_error() {
    let server = FakeServer::start(FakeServerOptions {
        mute: true,
        ..Default::default()
    })
    .await
    .unwrap();
    let options = LinkOptions {
        connect_timeout: Duration::from_millis(200),
        reconnect_interval: Duration::from_secs(60),
        reconnect_max_interval: Duration::from_secs(60),
    };
    let (link, mut events, _task) = LinkHandle::spawn(settings(&server.url(), Some("k")), options);

    link.connect().await.unwrap();
    match expect_event(&mut events, |e| matches!(e, LinkEvent::ConnectError { .. })).await {
        LinkEvent::ConnectError { reason } => assert!(reason.contains("timeout"), "{reason}"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(link.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn reconfigure_moves_to_new_server() {
    let first = FakeServer::start(FakeServerOptions::default()).await.unwrap();
    let second = FakeServer::start(FakeServerOptions {
        api_key: Some("new-key".into()),
        ..Default::default()
    })
    .await
    .unwrap();
    let (link, mut events) = online(&first, "old-key").await;

    link.reconfigure(settings(&second.url(), Some("new-key")))
        .await
        .unwrap();
    expect_event(&mut events, |e| matches!(e, LinkEvent::Disconnected(r) if r.requested)).await;
    expect_event(&mut events, is_connected).await;

    assert_eq!(second.sessions(), 1);
    assert_eq!(second.auths(), vec![json!({"api_key": "new-key"})]);
}

#[tokio::test]
async fn shutdown_stops_the_task() {
    let server = FakeServer::start(FakeServerOptions::default()).await.unwrap();
    let (link, mut events, task) = LinkHandle::spawn(settings(&server.url(), Some("k")), fast());
    link.connect().await.unwrap();
    expect_event(&mut events, is_connected).await;

    link.shutdown().await.unwrap();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert!(matches!(link.connect().await, Err(LinkError::Closed)));
}
