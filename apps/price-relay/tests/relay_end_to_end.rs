//! Relay End-to-End Tests
//!
//! Runs a full relay against an in-process fake feed and real WebSocket
//! clients.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};
use tokio_util::sync::CancellationToken;

use price_relay::{Credentials, LinkState, RelayConfig, RelayHandle, RelayServer};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

// =============================================================================
// Fake Feed
// =============================================================================

enum Control {
    Send(String),
    Drop,
}

struct FakeFeed {
    addr: SocketAddr,
    commands: mpsc::UnboundedReceiver<Value>,
    connections: mpsc::UnboundedReceiver<()>,
    control: mpsc::UnboundedSender<Control>,
}

impl FakeFeed {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (connection_tx, connections) = mpsc::unbounded_channel();
        let (control, mut control_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let Ok(mut ws) = accept_async(stream).await else {
                    continue;
                };
                let _ = connection_tx.send(());

                loop {
                    tokio::select! {
                        frame = ws.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let _ = command_tx.send(serde_json::from_str(&text).unwrap());
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                        control = control_rx.recv() => match control {
                            Some(Control::Send(text)) => {
                                if ws.send(Message::text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Control::Drop) => break,
                            None => return,
                        },
                    }
                }
            }
        });

        Self {
            addr,
            commands,
            connections,
            control,
        }
    }

    async fn wait_connected(&mut self) {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("feed never connected")
            .unwrap();
    }

    async fn next_command(&mut self) -> Value {
        timeout(WAIT, self.commands.recv())
            .await
            .expect("no feed command")
            .unwrap()
    }

    async fn assert_no_command(&mut self) {
        if let Ok(Some(command)) = timeout(QUIET, self.commands.recv()).await {
            panic!("unexpected feed command: {command}");
        }
    }

    fn drain_commands(&mut self) {
        while self.commands.try_recv().is_ok() {}
    }

    fn trade(&self, symbol: &str, price: f64) {
        let frame = json!({
            "type": "trade",
            "data": [{"s": symbol, "p": price, "t": 1_700_000_000_000_i64, "v": 10}],
        });
        self.control.send(Control::Send(frame.to_string())).unwrap();
    }

    fn drop_connection(&self) {
        self.control.send(Control::Drop).unwrap();
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn start_relay(feed: &mut FakeFeed) -> RelayHandle {
    let mut config = RelayConfig::new(Credentials::new("test-token".to_string()));
    config.feed.url = format!("ws://{}", feed.addr);
    config.feed.reconnect_delay_initial = Duration::from_millis(20);
    config.feed.reconnect_delay_max = Duration::from_millis(50);
    config.server.bind_addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.server.ws_port = 0;
    config.server.health_port = 0;

    let relay = RelayServer::start(config, CancellationToken::new())
        .await
        .unwrap();
    feed.wait_connected().await;
    eventually(|| relay.feed_state().state() == LinkState::Connected).await;
    relay
}

async fn eventually<F: Fn() -> bool>(check: F) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

async fn connect_client(relay: &RelayHandle) -> Client {
    let (mut ws, _) = connect_async(format!("ws://{}/ws", relay.ws_addr()))
        .await
        .unwrap();
    let greeting = next_json(&mut ws).await;
    assert_eq!(
        greeting,
        json!({"type": "system", "message": "Connected for real-time updates."})
    );
    ws
}

async fn next_json(ws: &mut Client) -> Value {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(Message::Close(_)) | Err(_)) | None => panic!("connection closed"),
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("no message from relay")
}

async fn send_json(ws: &mut Client, value: &Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn watch(ws: &mut Client, symbol: &str) {
    send_json(ws, &json!({"type": "subscribe", "symbol": symbol})).await;
}

fn subscribe_cmd(symbol: &str) -> Value {
    json!({"type": "subscribe", "symbol": symbol})
}

fn unsubscribe_cmd(symbol: &str) -> Value {
    json!({"type": "unsubscribe", "symbol": symbol})
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn shared_watch_lifecycle() {
    let mut feed = FakeFeed::spawn().await;
    let relay = start_relay(&mut feed).await;

    let mut a = connect_client(&relay).await;
    let mut b = connect_client(&relay).await;

    watch(&mut a, "aapl").await;
    assert_eq!(feed.next_command().await, subscribe_cmd("AAPL"));

    watch(&mut b, "AAPL").await;
    eventually(|| relay.registry().watchers_of("AAPL").len() == 2).await;
    feed.assert_no_command().await;

    feed.trade("AAPL", 150.25);
    for client in [&mut a, &mut b] {
        let update = next_json(client).await;
        assert_eq!(update["type"], "price_update");
        assert_eq!(update["symbol"], "AAPL");
        assert_eq!(update["price"].as_f64(), Some(150.25));
    }

    a.close(None).await.unwrap();
    eventually(|| relay.registry().watchers_of("AAPL").len() == 1).await;
    feed.assert_no_command().await;

    b.close(None).await.unwrap();
    assert_eq!(feed.next_command().await, unsubscribe_cmd("AAPL"));
    eventually(|| relay.hub().connection_count() == 0).await;

    relay.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn updates_reach_only_matching_watchers() {
    let mut feed = FakeFeed::spawn().await;
    let relay = start_relay(&mut feed).await;

    let mut a = connect_client(&relay).await;
    let mut b = connect_client(&relay).await;
    let mut c = connect_client(&relay).await;

    watch(&mut a, "AAPL").await;
    watch(&mut b, "MSFT").await;
    watch(&mut c, "AAPL").await;
    eventually(|| relay.registry().stats().watcher_count == 3).await;

    feed.trade("MSFT", 410.5);
    feed.trade("AAPL", 150.0);

    assert_eq!(next_json(&mut b).await["symbol"], "MSFT");
    assert_eq!(next_json(&mut a).await["symbol"], "AAPL");
    assert_eq!(next_json(&mut c).await["symbol"], "AAPL");

    relay.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn switching_watch_moves_upstream_interest() {
    let mut feed = FakeFeed::spawn().await;
    let relay = start_relay(&mut feed).await;
    let mut a = connect_client(&relay).await;

    watch(&mut a, "AAPL").await;
    assert_eq!(feed.next_command().await, subscribe_cmd("AAPL"));

    watch(&mut a, "MSFT").await;
    assert_eq!(feed.next_command().await, unsubscribe_cmd("AAPL"));
    assert_eq!(feed.next_command().await, subscribe_cmd("MSFT"));

    feed.trade("AAPL", 1.0);
    feed.trade("MSFT", 2.0);
    let update = next_json(&mut a).await;
    assert_eq!(update["symbol"], "MSFT");

    relay.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn bad_requests_get_error_replies() {
    let mut feed = FakeFeed::spawn().await;
    let relay = start_relay(&mut feed).await;
    let mut a = connect_client(&relay).await;

    a.send(Message::text("not json")).await.unwrap();
    assert_eq!(
        next_json(&mut a).await,
        json!({"type": "error", "message": "Failed to process message."})
    );

    send_json(&mut a, &json!({"type": "subscribe"})).await;
    assert_eq!(
        next_json(&mut a).await,
        json!({"type": "error", "message": "Invalid message format."})
    );

    send_json(&mut a, &json!({"type": "unsubscribe", "symbol": "AAPL"})).await;
    assert_eq!(
        next_json(&mut a).await,
        json!({"type": "error", "message": "Invalid message format."})
    );

    watch(&mut a, "AAPL").await;
    assert_eq!(feed.next_command().await, subscribe_cmd("AAPL"));

    relay.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn reconnect_resubscribes_interest_once() {
    let mut feed = FakeFeed::spawn().await;
    let relay = start_relay(&mut feed).await;

    let mut a = connect_client(&relay).await;
    let mut b = connect_client(&relay).await;
    let mut c = connect_client(&relay).await;
    watch(&mut a, "AAPL").await;
    watch(&mut b, "MSFT").await;
    watch(&mut c, "AAPL").await;
    eventually(|| relay.registry().stats().watcher_count == 3).await;
    tokio::time::sleep(QUIET).await;
    feed.drain_commands();

    feed.drop_connection();
    feed.wait_connected().await;

    let mut resubscribed = HashSet::new();
    for _ in 0..2 {
        let command = feed.next_command().await;
        assert_eq!(command["type"], "subscribe");
        assert!(resubscribed.insert(command["symbol"].as_str().unwrap().to_string()));
    }
    feed.assert_no_command().await;
    assert_eq!(
        resubscribed,
        HashSet::from(["AAPL".to_string(), "MSFT".to_string()])
    );

    eventually(|| relay.feed_state().state() == LinkState::Connected).await;
    feed.trade("AAPL", 151.0);
    assert_eq!(next_json(&mut a).await["price"].as_f64(), Some(151.0));
    assert_eq!(next_json(&mut c).await["price"].as_f64(), Some(151.0));

    relay.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_clients() {
    let mut feed = FakeFeed::spawn().await;
    let relay = start_relay(&mut feed).await;
    let mut a = connect_client(&relay).await;

    relay.shutdown(WAIT).await.unwrap();

    let closed = timeout(WAIT, async {
        loop {
            match a.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
