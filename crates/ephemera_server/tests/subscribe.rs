//! Live snapshot delivery over a real WebSocket connection.

use ephemera_core::{AppKind, MemoryStore, NotificationBus, Runtime};
use ephemera_server::app_router;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_server() -> (SocketAddr, Runtime) {
    let runtime = Runtime::new(Arc::new(MemoryStore::new()), Arc::new(NotificationBus::new()));
    let app = app_router(runtime.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr, runtime)
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn wait_for_listener(runtime: &Runtime, id: &str) {
    for _ in 0..100 {
        if runtime.bus().listener_count(id) > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("subscriber never registered");
}

#[tokio::test]
async fn subscriber_gets_initial_state_then_each_change() {
    let (addr, runtime) = start_server().await;
    let lists = runtime.engine(AppKind::List);
    let list = lists.create("groceries", None).unwrap();
    let id = list.entity.id.clone();

    let url = format!("ws://{}/api/lists/{}/subscribe", addr, id);
    let (mut client, _) = connect_async(url).await.expect("connect");

    let initial = next_json(&mut client).await;
    assert_eq!(initial["type"], "snapshot");
    assert_eq!(initial["state"]["entity"]["version"], 1);
    assert_eq!(initial["state"]["children"].as_array().unwrap().len(), 0);

    lists.add_child(&id, "milk").unwrap();
    let after_add = next_json(&mut client).await;
    assert_eq!(after_add["state"]["children"][0]["payload"], "milk");

    lists.update(&id, &list.admin_token, "groceries v2", Some(1)).unwrap();
    let after_update = next_json(&mut client).await;
    assert_eq!(after_update["state"]["entity"]["version"], 2);
    assert_eq!(after_update["state"]["entity"]["payload"], "groceries v2");
}

#[tokio::test]
async fn delete_sends_gone_and_closes() {
    let (addr, runtime) = start_server().await;
    let polls = runtime.engine(AppKind::Poll);
    let poll = polls.create("P", None).unwrap();
    let id = poll.entity.id.clone();

    let url = format!("ws://{}/api/polls/{}/subscribe", addr, id);
    let (mut client, _) = connect_async(url).await.expect("connect");
    assert_eq!(next_json(&mut client).await["type"], "snapshot");

    polls.delete(&id, &poll.admin_token).unwrap();
    assert_eq!(next_json(&mut client).await["type"], "gone");

    let closing = timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for close");
    assert!(matches!(closing, Some(Ok(Message::Close(_))) | None));
}

#[tokio::test]
async fn client_disconnect_deregisters_listener() {
    let (addr, runtime) = start_server().await;
    let quizzes = runtime.engine(AppKind::Quiz);
    let quiz = quizzes.create("Q", None).unwrap();
    let id = quiz.entity.id.clone();

    let url = format!("ws://{}/api/quizzes/{}/subscribe", addr, id);
    let (mut client, _) = connect_async(url).await.expect("connect");
    next_json(&mut client).await;
    wait_for_listener(&runtime, &id).await;

    client.send(Message::Close(None)).await.expect("close");
    drop(client);

    for _ in 0..100 {
        if runtime.bus().listener_count(&id) == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("listener still registered after disconnect");
}

#[tokio::test]
async fn subscribing_to_a_missing_entity_is_rejected() {
    let (addr, _) = start_server().await;
    let url = format!("ws://{}/api/polls/2222222222/subscribe", addr);
    assert!(connect_async(url).await.is_err());
}
