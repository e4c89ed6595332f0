mod common;

use std::time::Duration;

use common::{
    expect_event, is_online, memory_journal, options, settings, wait_for, RecordingSink, PRINTER,
    WAIT,
};
use printagent_agent::Agent;
use printagent_job_queue::{AgentEvent, EventBus, MissingOutcome};
use printagent_journal::{AckState, NewPrint};
use printagent_link::testing::{FakeServer, FakeServerOptions};
use printagent_link::ConnectionState;
use serde_json::json;

async fn server(key: &str) -> FakeServer {
    FakeServer::start(FakeServerOptions {
        api_key: Some(key.into()),
        ..Default::default()
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn prints_journals_and_acks_a_job() {
    let mut server = server("k-1").await;
    let journal = memory_journal().await;
    let sink = RecordingSink::new();
    let events = EventBus::new();
    let mut rx = events.subscribe();

    let (agent, _task) = Agent::start(
        settings(&server.url(), Some("k-1")),
        options(),
        journal.clone(),
        sink.clone(),
        events,
    );
    expect_event(&mut rx, is_online).await;

    let missing = server
        .next_event_named("request_missing_prints", WAIT)
        .await
        .expect("no missing-job request after connect");
    assert_eq!(missing.data, json!({"api_key": "k-1"}));

    assert!(server.emit(
        "print_label",
        json!({"job_id": 7, "invoice": "INV-1", "pcs": 2, "data": "^XA^XZ"})
    ));

    let ack = server
        .next_event_named("print_label_ack", WAIT)
        .await
        .expect("no ack");
    assert_eq!(ack.data, json!({"job_id": 7, "status": "printed"}));

    assert_eq!(sink.calls(), vec![(PRINTER.to_owned(), b"^XA^XZ".to_vec())]);
    assert!(
        wait_for(|| {
            let journal = journal.clone();
            async move { journal.ack_state(7).await.unwrap() == Some(AckState::Acknowledged) }
        })
        .await
    );
    let rows = journal.recent(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].invoice, "INV-1");
    assert_eq!(rows[0].copies, 2);

    assert_eq!(agent.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn pending_acks_are_flushed_on_connect_without_reprinting() {
    let mut server = server("k").await;
    let journal = memory_journal().await;
    for (id, invoice) in [(7, "INV-7"), (8, "INV-8")] {
        journal
            .record_print(NewPrint {
                job_id: Some(id),
                invoice,
                copies: 1,
                payload: "^XA^XZ",
            })
            .await
            .unwrap();
    }
    let sink = RecordingSink::new();

    let (_agent, _task) = Agent::start(
        settings(&server.url(), Some("k")),
        options(),
        journal.clone(),
        sink.clone(),
        EventBus::new(),
    );

    let mut acked = Vec::new();
    while acked.len() < 2 {
        let ack = server
            .next_event_named("print_label_ack", WAIT)
            .await
            .expect("missing ack");
        acked.push(ack.data["job_id"].as_i64().unwrap());
    }
    acked.sort();
    assert_eq!(acked, vec![7, 8]);

    assert!(
        wait_for(|| {
            let journal = journal.clone();
            async move { journal.pending_acks().await.unwrap().is_empty() }
        })
        .await
    );
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn redelivered_job_is_not_printed_twice() {
    let mut server = server("k").await;
    let journal = memory_journal().await;
    let sink = RecordingSink::new();
    let events = EventBus::new();
    let mut rx = events.subscribe();

    let (_agent, _task) = Agent::start(
        settings(&server.url(), Some("k")),
        options(),
        journal.clone(),
        sink.clone(),
        events,
    );
    expect_event(&mut rx, is_online).await;

    let job = json!({"job_id": 11, "invoice": "INV-11", "data": "^XA^FDx^XZ"});
    server.emit("print_label", job.clone());
    server
        .next_event_named("print_label_ack", WAIT)
        .await
        .expect("no ack");
    assert!(
        wait_for(|| {
            let journal = journal.clone();
            async move { journal.ack_state(11).await.unwrap() == Some(AckState::Acknowledged) }
        })
        .await
    );

    server.emit("print_label", job);
    let skipped = expect_event(&mut rx, |e| matches!(e, AgentEvent::JobSkipped { .. })).await;
    assert!(matches!(skipped, AgentEvent::JobSkipped { job_id: Some(11), .. }));
    assert_eq!(sink.calls().len(), 1);
    assert_eq!(journal.recent(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn server_status_is_published() {
    let server = server("k").await;
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let (_agent, _task) = Agent::start(
        settings(&server.url(), Some("k")),
        options(),
        memory_journal().await,
        RecordingSink::new(),
        events,
    );
    expect_event(&mut rx, is_online).await;

    server.emit("status", json!({"msg": "queue empty"}));
    let status = expect_event(&mut rx, |e| matches!(e, AgentEvent::ServerStatus { .. })).await;
    assert_eq!(
        status,
        AgentEvent::ServerStatus {
            msg: "queue empty".into()
        }
    );
}

#[tokio::test]
async fn history_is_published_at_startup() {
    let journal = memory_journal().await;
    journal
        .record_print(NewPrint {
            job_id: None,
            invoice: "INV-OLD",
            copies: 3,
            payload: "^XA^XZ",
        })
        .await
        .unwrap();
    let events = EventBus::new();
    let mut rx = events.subscribe();

    let (_agent, _task) = Agent::start(
        settings("http://127.0.0.1:9", None),
        options(),
        journal,
        RecordingSink::new(),
        events,
    );

    match expect_event(&mut rx, |e| matches!(e, AgentEvent::HistoryLoaded { .. })).await {
        AgentEvent::HistoryLoaded { entries } => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].invoice, "INV-OLD");
            assert_eq!(entries[0].copies, 3);
            assert!(!entries[0].acknowledged);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn without_api_key_the_agent_stays_offline() {
    let server = FakeServer::start(FakeServerOptions::default()).await.unwrap();
    let (agent, _task) = Agent::start(
        settings(&server.url(), None),
        options(),
        memory_journal().await,
        RecordingSink::new(),
        EventBus::new(),
    );

    agent.reconnect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(server.auths().is_empty());
    assert_eq!(agent.connection_state(), ConnectionState::Disconnected);
    assert_eq!(agent.request_missing().await.unwrap(), MissingOutcome::NotConnected);
}

#[tokio::test]
async fn manual_missing_request_has_a_cooldown() {
    let mut server = server("k").await;
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let (agent, _task) = Agent::start(
        settings(&server.url(), Some("k")),
        options(),
        memory_journal().await,
        RecordingSink::new(),
        events,
    );
    expect_event(&mut rx, is_online).await;
    server
        .next_event_named("request_missing_prints", WAIT)
        .await
        .expect("no request on connect");
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The on-connect request started the cooldown.
    assert!(matches!(
        agent.request_missing().await.unwrap(),
        MissingOutcome::CoolingDown(_)
    ));
}

#[tokio::test]
async fn printer_change_does_not_reconnect() {
    let server = server("k").await;
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let (agent, _task) = Agent::start(
        settings(&server.url(), Some("k")),
        options(),
        memory_journal().await,
        RecordingSink::new(),
        events,
    );
    expect_event(&mut rx, is_online).await;

    let mut next = settings(&server.url(), Some("k"));
    next.printer_name = "ZPL-2".into();
    agent.reconfigure(next).await.unwrap();

    let dispatcher = agent.dispatcher().clone();
    assert!(wait_for(|| {
        let dispatcher = dispatcher.clone();
        async move { dispatcher.printer().await == "ZPL-2" }
    })
    .await);
    assert_eq!(agent.settings().printer_name, "ZPL-2");
    assert_eq!(server.sessions(), 1);
}

#[tokio::test]
async fn new_credential_reconnects() {
    let server = server("new").await;
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let (agent, _task) = Agent::start(
        settings(&server.url(), Some("old")),
        options(),
        memory_journal().await,
        RecordingSink::new(),
        events,
    );
    let seen = &server;
    assert!(wait_for(|| async move { !seen.auths().is_empty() }).await);
    assert_eq!(server.sessions(), 0);

    agent
        .reconfigure(settings(&server.url(), Some("new")))
        .await
        .unwrap();
    expect_event(&mut rx, is_online).await;
    assert_eq!(server.sessions(), 1);
}

#[tokio::test]
async fn shutdown_waits_for_the_control_loop() {
    let server = server("k").await;
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let (agent, task) = Agent::start(
        settings(&server.url(), Some("k")),
        options(),
        memory_journal().await,
        RecordingSink::new(),
        events,
    );
    expect_event(&mut rx, is_online).await;

    agent.shutdown().await.unwrap();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert!(agent.reconnect().await.is_err());
}
