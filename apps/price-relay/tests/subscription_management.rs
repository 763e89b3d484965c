//! Subscription Management Integration Tests
//!
//! Tests watch tracking, upstream reference counting, and cleanup through
//! the public service and hub APIs.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use price_relay::{
    ConnectionId, DownstreamHub, DownstreamPort, DownstreamSettings, ServerMessage,
    SubscriptionRegistry, Symbol, UpstreamPort, WatchService,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Subscribe(String),
    Unsubscribe(String),
}

#[derive(Debug, Default)]
struct RecordingUpstream {
    commands: Mutex<Vec<Command>>,
}

impl RecordingUpstream {
    fn take(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.lock())
    }
}

impl UpstreamPort for RecordingUpstream {
    fn subscribe(&self, symbol: &Symbol) {
        self.commands
            .lock()
            .push(Command::Subscribe(symbol.to_string()));
    }

    fn unsubscribe(&self, symbol: &Symbol) {
        self.commands
            .lock()
            .push(Command::Unsubscribe(symbol.to_string()));
    }
}

fn setup() -> (WatchService, Arc<RecordingUpstream>) {
    let registry = Arc::new(SubscriptionRegistry::new());
    let upstream = Arc::new(RecordingUpstream::default());
    let watch = WatchService::new(registry, Arc::clone(&upstream) as Arc<dyn UpstreamPort>);
    (watch, upstream)
}

fn sym(raw: &str) -> Symbol {
    Symbol::normalize(raw).unwrap()
}

fn subscribe(s: &str) -> Command {
    Command::Subscribe(s.to_string())
}

fn unsubscribe(s: &str) -> Command {
    Command::Unsubscribe(s.to_string())
}

#[test]
fn shared_symbol_is_subscribed_once() {
    let (watch, upstream) = setup();
    let a = ConnectionId::from_raw(1);
    let b = ConnectionId::from_raw(2);

    watch.watch(a, sym("aapl"));
    watch.watch(b, sym("AAPL"));

    assert_eq!(upstream.take(), vec![subscribe("AAPL")]);
    assert_eq!(watch.registry().watchers_of("AAPL").len(), 2);
}

#[test]
fn last_watcher_leaving_unsubscribes() {
    let (watch, upstream) = setup();
    let a = ConnectionId::from_raw(1);
    let b = ConnectionId::from_raw(2);
    watch.watch(a, sym("AAPL"));
    watch.watch(b, sym("AAPL"));
    upstream.take();

    assert_eq!(watch.release(a), Some(sym("AAPL")));
    assert!(upstream.take().is_empty());

    assert_eq!(watch.release(b), Some(sym("AAPL")));
    assert_eq!(upstream.take(), vec![unsubscribe("AAPL")]);
    assert!(watch.registry().upstream_interest().is_empty());
}

#[test]
fn switching_symbols_unsubscribes_before_subscribing() {
    let (watch, upstream) = setup();
    let a = ConnectionId::from_raw(1);

    watch.watch(a, sym("AAPL"));
    watch.watch(a, sym("MSFT"));

    assert_eq!(
        upstream.take(),
        vec![subscribe("AAPL"), unsubscribe("AAPL"), subscribe("MSFT")]
    );
    assert_eq!(watch.registry().watch_of(a), Some(sym("MSFT")));
}

#[test]
fn switching_away_from_shared_symbol_keeps_it() {
    let (watch, upstream) = setup();
    let a = ConnectionId::from_raw(1);
    let b = ConnectionId::from_raw(2);
    watch.watch(a, sym("AAPL"));
    watch.watch(b, sym("AAPL"));
    upstream.take();

    watch.watch(a, sym("MSFT"));

    assert_eq!(upstream.take(), vec![subscribe("MSFT")]);
    assert_eq!(watch.registry().upstream_interest(), vec![sym("AAPL"), sym("MSFT")]);
}

#[test]
fn rewatching_same_symbol_is_silent() {
    let (watch, upstream) = setup();
    let a = ConnectionId::from_raw(1);
    watch.watch(a, sym("AAPL"));
    upstream.take();

    let change = watch.watch(a, sym("aapl"));

    assert!(change.is_empty());
    assert!(upstream.take().is_empty());
}

#[test]
fn releasing_unknown_connection_is_noop() {
    let (watch, upstream) = setup();

    assert_eq!(watch.release(ConnectionId::from_raw(99)), None);
    assert!(upstream.take().is_empty());
}

#[test]
fn concurrent_watchers_produce_balanced_commands() {
    let (watch, upstream) = setup();
    let symbols = ["AAPL", "MSFT", "TSLA", "NVDA"];

    let handles: Vec<_> = (0..16_u64)
        .map(|i| {
            let watch = watch.clone();
            thread::spawn(move || {
                let conn = ConnectionId::from_raw(1_000 + i);
                for round in 0..50_usize {
                    let index = usize::try_from(i).unwrap() + round;
                    watch.watch(conn, sym(symbols[index % symbols.len()]));
                }
                watch.release(conn);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let commands = upstream.take();
    for symbol in symbols {
        let subs = commands.iter().filter(|c| **c == subscribe(symbol)).count();
        let unsubs = commands.iter().filter(|c| **c == unsubscribe(symbol)).count();
        assert_eq!(subs, unsubs, "unbalanced commands for {symbol}");
    }
    assert!(watch.registry().upstream_interest().is_empty());
    assert_eq!(watch.registry().stats().watcher_count, 0);
}

#[tokio::test]
async fn hub_disconnect_releases_watch() {
    let (watch, upstream) = setup();
    let hub = DownstreamHub::new(
        watch,
        DownstreamSettings::default(),
        CancellationToken::new(),
    );

    let mut session = hub.connect();
    assert!(matches!(
        session.outbound.recv().await,
        Some(ServerMessage::System { .. })
    ));

    hub.handle_text(session.id, r#"{"type":"subscribe","symbol":"tsla"}"#);
    assert_eq!(upstream.take(), vec![subscribe("TSLA")]);

    assert_eq!(hub.disconnect(session.id), Some(sym("TSLA")));
    assert_eq!(hub.disconnect(session.id), None);
    assert_eq!(upstream.take(), vec![unsubscribe("TSLA")]);
    assert_eq!(hub.connection_count(), 0);
}

#[tokio::test]
async fn hub_delivers_only_to_watchers() {
    let (watch, _upstream) = setup();
    let hub = DownstreamHub::new(
        watch,
        DownstreamSettings::default(),
        CancellationToken::new(),
    );

    let mut sessions: Vec<_> = (0..3).map(|_| hub.connect()).collect();
    for session in &mut sessions {
        session.outbound.recv().await.unwrap();
    }
    hub.handle_text(sessions[0].id, r#"{"type":"subscribe","symbol":"AAPL"}"#);
    hub.handle_text(sessions[1].id, r#"{"type":"subscribe","symbol":"AAPL"}"#);
    hub.handle_text(sessions[2].id, r#"{"type":"subscribe","symbol":"MSFT"}"#);

    let watchers: HashSet<_> = hub
        .watch()
        .registry()
        .watchers_of("AAPL")
        .into_iter()
        .collect();
    assert_eq!(watchers, HashSet::from([sessions[0].id, sessions[1].id]));

    let message = ServerMessage::error("fan-out check");
    let targets: Vec<_> = watchers.into_iter().collect();
    assert_eq!(hub.deliver(&targets, &message), 2);

    assert_eq!(sessions[0].outbound.try_recv().unwrap(), message);
    assert_eq!(sessions[1].outbound.try_recv().unwrap(), message);
    assert!(sessions[2].outbound.try_recv().is_err());
}
