//! End-to-end tests against a local fake Pusher server.
//!
//! Spins up a real `TcpListener` + `tokio_tungstenite::accept_async` in the
//! test process and dials it through a `Connector` pointed at
//! `127.0.0.1`, exercising the full actor (`Transport` + `Connection` +
//! `ChannelRegistry`) the same way production code does, just without a
//! real Pusher endpoint on the other end.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use pusher_rt::{Connector, Event, PusherClient, Result};

struct LoopbackConnector {
    addr: std::net::SocketAddr,
}

#[async_trait::async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self) -> Result<pusher_rt::ws::protocol::WsStream> {
        let url = format!("ws://{}/app/test-key", self.addr);
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(stream)
    }
}

async fn fake_server() -> (std::net::SocketAddr, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (addr, listener)
}

#[tokio::test]
async fn connects_and_dispatches_a_channel_event() {
    let (addr, listener) = fake_server().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        ws.send(Message::Text(
            json!({
                "event": "pusher:connection_established",
                "data": json!({"socket_id": "123.456", "activity_timeout": 120}).to_string(),
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

        // expect the client to subscribe once connected
        let frame = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(parsed["event"], "pusher:subscribe");
        assert_eq!(parsed["data"]["channel"], "room");

        ws.send(Message::Text(
            json!({
                "event": "pusher_internal:subscription_succeeded",
                "channel": "room",
                "data": "{}",
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

        ws.send(Message::Text(
            json!({"event": "greeting", "channel": "room", "data": json!({"text": "hi"})})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

        // keep the socket open long enough for the client to read everything
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let connector = Arc::new(LoopbackConnector { addr });
    let client = PusherClient::connect_with(connector);
    let handle = client.handle();

    let channel = timeout(Duration::from_secs(2), handle.subscribe("room"))
        .await
        .unwrap()
        .unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Arc::new(std::sync::Mutex::new(Some(tx)));
    channel
        .bind(
            "greeting",
            Box::new(move |event: &Event| {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(event.data.clone());
                }
            }),
        )
        .await
        .unwrap();

    let data = timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
    assert_eq!(data, json!({"text": "hi"}));

    server.await.unwrap();
    client.disconnect().await;
}

#[tokio::test]
async fn fatal_error_code_stops_the_connection() {
    let (addr, listener) = fake_server().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(
            json!({"event": "pusher:error", "data": json!({"code": 4001, "message": "application does not exist"})})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let connector = Arc::new(LoopbackConnector { addr });
    let client = PusherClient::connect_with(connector);
    let mut updates = client.updates();

    let mut saw_error = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        match timeout(Duration::from_millis(500), updates.recv()).await {
            Ok(Ok(event)) if event.name == "error" => {
                saw_error = true;
                break;
            }
            _ => continue,
        }
    }
    assert!(saw_error, "expected an 'error' event to be forwarded");

    server.await.unwrap();
    client.disconnect().await;
}
