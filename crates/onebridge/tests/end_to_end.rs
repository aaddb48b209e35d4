//! Full path: stub gateway ⇄ runtime ⇄ broadcast subscriber.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};

use onebridge::prelude::*;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A gateway that answers every call with `{"action": <action>}` and pushes
/// whatever events the test sends it.
async fn stub_gateway() -> (SocketAddr, mpsc::UnboundedSender<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        loop {
            tokio::select! {
                frame = ws.next() => {
                    let Some(Ok(Message::Text(text))) = frame else { break };
                    let request: Value = serde_json::from_str(text.as_str()).unwrap();
                    let response = json!({
                        "status": "ok",
                        "retcode": 0,
                        "data": {"action": request["action"]},
                        "echo": request["echo"],
                    });
                    ws.send(Message::text(response.to_string())).await.unwrap();
                }
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    ws.send(Message::text(event.to_string())).await.unwrap();
                }
            }
        }
    });

    (addr, events_tx)
}

async fn read_json(ws: &mut Client) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gateway_to_subscriber_round_trip() {
    let (gateway_addr, events) = stub_gateway().await;

    let mut config = AppConfig::default();
    config.gateway.url = format!("ws://{gateway_addr}");
    config.broadcast.enabled = true;
    config.broadcast.host = "127.0.0.1".into();
    config.broadcast.port = 0;

    let runtime =
        OneBridgeRuntime::with_transport(&config, onebridge::transport::default_context());
    runtime.start().await.unwrap();

    let adapter = runtime.adapter().await.unwrap();
    timeout(Duration::from_secs(5), adapter.wait_for_open())
        .await
        .unwrap();

    // Direct call through the adapter resolves with the whole response.
    let response = adapter.invoke("ping", json!({}), None).await.unwrap();
    assert_eq!(response["status"], "ok");
    assert_eq!(response["retcode"], 0);
    assert_eq!(response["data"]["action"], "ping");
    assert_eq!(adapter.pending_calls(), 0);

    // A subscriber joins.
    let broadcast_addr = runtime.broadcast_addr().await.unwrap();
    let (mut subscriber, _) = connect_async(format!("ws://{broadcast_addr}/"))
        .await
        .unwrap();
    let welcome = read_json(&mut subscriber).await;
    assert_eq!(welcome["type"], "welcome");

    let service = runtime.broadcast().await.unwrap();
    timeout(Duration::from_secs(5), async {
        while service.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // A private message needs no lookups.
    events
        .send(json!({
            "post_type": "message", "message_type": "private", "sub_type": "friend",
            "time": 1_700_000_000, "self_id": 10000, "message_id": 7,
            "user_id": 20001,
            "sender": {"user_id": 20001, "nickname": "alice"},
            "message": [
                {"type": "text", "data": {"text": "hello there"}},
                {"type": "image", "data": {"file": "cat.jpg", "url": "https://img/cat.jpg"}}
            ]
        }))
        .unwrap();

    let published = read_json(&mut subscriber).await;
    assert_eq!(published["type"], "message");
    let data = &published["data"];
    assert_eq!(data["messageId"], 7);
    assert_eq!(data["senderName"], "alice");
    assert_eq!(data["text"], "hello there");
    assert_eq!(data["attachments"]["images"][0]["file"], "cat.jpg");
    let summary = data["summary"].as_str().unwrap();
    assert!(summary.contains("alice(20001)"));
    assert!(summary.contains("[image] cat.jpg https://img/cat.jpg"));

    // The subscriber calls the gateway through the bridge.
    subscriber
        .send(Message::text(
            json!({"type": "invoke", "requestId": "r1", "action": "get_friend_list"}).to_string(),
        ))
        .await
        .unwrap();
    let result = read_json(&mut subscriber).await;
    assert_eq!(result["requestId"], "r1");
    assert_eq!(result["ok"], true);
    assert_eq!(result["data"], json!({"action": "get_friend_list"}));

    runtime.stop().await.unwrap();
    let shutdown = read_json(&mut subscriber).await;
    assert_eq!(shutdown["type"], "shutdown");
}
