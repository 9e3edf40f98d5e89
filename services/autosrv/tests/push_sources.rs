//! Push source integration: WebSocket frames and Socket.IO packets
//! against in-process servers.

use autosrv::actions::ActionExecutor;
use autosrv::drivers::sim::SimBackend;
use autosrv::engine::{AutomationEngine, EngineSettings};
use autosrv::types::{ConnectionState, DataSource, FieldMapping, SourceKind};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use summit_vars::{Value, VarStore};
use tokio_tungstenite::tungstenite::Message;

fn test_engine() -> Arc<AutomationEngine> {
    let vars = Arc::new(VarStore::new());
    let executor = Arc::new(ActionExecutor::with_sim(
        vars.clone(),
        Arc::new(SimBackend::new()),
    ));
    Arc::new(AutomationEngine::new(
        vars,
        executor,
        EngineSettings::default(),
    ))
}

/// Poll until the variable appears or the deadline passes.
async fn wait_for_var(engine: &AutomationEngine, name: &str, deadline: Duration) -> Option<Value> {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if let Ok(value) = engine.vars().get(name) {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}

#[tokio::test]
async fn test_websocket_push_updates_variables() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(
            json!({ "telemetry": { "rpm": 1200, "temp": 42.5 } }).to_string(),
        ))
        .await
        .unwrap();
        // hold the connection open while the client consumes the frame
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let engine = test_engine();
    engine
        .register_source(DataSource {
            id: "fanbus".to_string(),
            kind: SourceKind::WebsocketPush,
            endpoint: format!("ws://{}", addr),
            poll_interval_ms: 0,
            reconnect_ms: 200,
            event: None,
            enabled: true,
            mappings: vec![
                FieldMapping {
                    path: "telemetry.rpm".to_string(),
                    variable: "fan_rpm".to_string(),
                },
                FieldMapping {
                    path: "telemetry.temp".to_string(),
                    variable: "fan_temp".to_string(),
                },
            ],
        })
        .expect("register push source");

    let rpm = wait_for_var(&engine, "fan_rpm", Duration::from_secs(3)).await;
    assert_eq!(rpm, Some(Value::Int(1200)));
    assert_eq!(
        engine.vars().get("fan_temp").expect("mapped variable"),
        Value::Float(42.5)
    );

    let status = engine.get_source("fanbus").expect("source status");
    assert_eq!(status.state, ConnectionState::Connected);
    assert!(status.frames_received >= 1);
    assert!(status.last_update_ms > 0);

    engine.unregister_source("fanbus").expect("unregister");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_socketio_handshake_ping_and_event() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        // Engine.IO open packet
        ws.send(Message::Text(
            "0{\"sid\":\"abc\",\"pingInterval\":25000,\"pingTimeout\":20000}".to_string(),
        ))
        .await
        .unwrap();

        // client joins the default namespace
        let joined = ws.next().await.unwrap().unwrap();
        assert_eq!(joined, Message::Text("40".to_string()));
        ws.send(Message::Text("40{\"sid\":\"abc\"}".to_string()))
            .await
            .unwrap();

        // ping must be answered with pong
        ws.send(Message::Text("2".to_string())).await.unwrap();
        let pong = ws.next().await.unwrap().unwrap();
        assert_eq!(pong, Message::Text("3".to_string()));

        // filtered-out event, then the subscribed one
        ws.send(Message::Text(
            "42[\"chatter\",{\"watts\":1}]".to_string(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text(
            "42[\"telemetry\",{\"watts\":450}]".to_string(),
        ))
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let engine = test_engine();
    engine
        .register_source(DataSource {
            id: "psu".to_string(),
            kind: SourceKind::SocketioPush,
            endpoint: format!("ws://{}/socket.io/?EIO=4&transport=websocket", addr),
            poll_interval_ms: 0,
            reconnect_ms: 200,
            event: Some("telemetry".to_string()),
            enabled: true,
            mappings: vec![FieldMapping {
                path: "watts".to_string(),
                variable: "psu_watts".to_string(),
            }],
        })
        .expect("register socket.io source");

    let watts = wait_for_var(&engine, "psu_watts", Duration::from_secs(3)).await;
    assert_eq!(watts, Some(Value::Int(450)));

    // the chatter event was filtered: only one frame mapped
    let status = engine.get_source("psu").expect("source status");
    assert_eq!(status.frames_received, 1);

    engine.unregister_source("psu").expect("unregister");
    engine.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn test_push_source_reconnects_after_drop() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        // first connection: send one frame and hang up
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(json!({ "seq": 1 }).to_string()))
            .await
            .unwrap();
        drop(ws);

        // second connection after the client's backoff
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(json!({ "seq": 2 }).to_string()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let engine = test_engine();
    engine
        .register_source(DataSource {
            id: "flaky".to_string(),
            kind: SourceKind::WebsocketPush,
            endpoint: format!("ws://{}", addr),
            poll_interval_ms: 0,
            reconnect_ms: 100,
            event: None,
            enabled: true,
            mappings: vec![FieldMapping {
                path: "seq".to_string(),
                variable: "seq".to_string(),
            }],
        })
        .expect("register push source");

    // wait until the post-reconnect frame lands
    let start = tokio::time::Instant::now();
    let mut seq = None;
    while start.elapsed() < Duration::from_secs(4) {
        if let Ok(value) = engine.vars().get("seq") {
            if value == Value::Int(2) {
                seq = Some(value);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(seq, Some(Value::Int(2)));

    let status = engine.get_source("flaky").expect("source status");
    assert_eq!(status.frames_received, 2);

    engine.unregister_source("flaky").expect("unregister");
    engine.shutdown().await;
}
