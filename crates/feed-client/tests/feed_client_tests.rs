//! Feed client against an in-process WebSocket server that speaks the tick
//! feed's message format.

use feed_client::{FeedConfig, FeedError, FeedEvent, PriceFeedClient};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

struct MockFeed {
    url: String,
    connections: Arc<AtomicUsize>,
}

async fn spawn_mock_feed() -> MockFeed {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve_connection(stream));
        }
    });

    MockFeed {
        url: format!("ws://{}", addr),
        connections,
    }
}

async fn serve_connection(stream: TcpStream) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(message)) = source.next().await {
        if let Message::Text(text) = message {
            let request: Value = serde_json::from_str(&text).unwrap();
            tokio::spawn(respond(request, tx.clone()));
        }
    }
}

/// Symbol conventions: `BAD` is rejected, `DROP` closes the connection
/// after two ticks, `SLOW` never answers and `UNTAGGED` answers without a
/// `req_id`. Candle replies are delayed in proportion to `count`.
async fn respond(request: Value, tx: mpsc::UnboundedSender<Message>) {
    let req_id = request["req_id"].clone();
    let send = |value: Value| {
        let _ = tx.send(Message::Text(value.to_string()));
    };

    if let Some(symbol) = request["ticks"].as_str() {
        if symbol == "BAD" {
            send(json!({
                "msg_type": "ticks",
                "req_id": req_id,
                "error": {"code": "InvalidSymbol", "message": "Symbol BAD is invalid."}
            }));
            return;
        }

        let subscription_id = format!("sub-{}", symbol);
        for i in 0..3 {
            send(json!({
                "msg_type": "tick",
                "req_id": req_id,
                "subscription": {"id": subscription_id},
                "tick": {"symbol": symbol, "quote": 100.0 + i as f64, "epoch": 1_700_000_000 + i}
            }));
            if symbol == "DROP" && i == 1 {
                let _ = tx.send(Message::Close(None));
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    } else if let Some(symbol) = request["ticks_history"].as_str() {
        if symbol == "SLOW" {
            return;
        }
        let count = request["count"].as_u64().unwrap_or(0);

        if request["style"] == "candles" {
            sleep(Duration::from_millis(count * 20)).await;
            let candles: Vec<Value> = (0..count)
                .map(|i| json!({"epoch": 60 * i, "open": 1.0, "high": 2.0, "low": 0.5, "close": 1.5}))
                .collect();
            let mut reply = json!({"msg_type": "candles", "candles": candles});
            if symbol != "UNTAGGED" {
                reply["req_id"] = req_id;
            }
            send(reply);
        } else {
            let prices: Vec<f64> = (0..count).map(|i| 10.0 + i as f64).collect();
            let times: Vec<u64> = (0..count).collect();
            send(json!({
                "msg_type": "history",
                "req_id": req_id,
                "history": {"prices": prices, "times": times}
            }));
        }
    } else if request.get("forget").is_some() {
        send(json!({"msg_type": "forget", "forget": 1, "req_id": req_id}));
    }
}

fn test_config(url: &str) -> FeedConfig {
    FeedConfig {
        max_retries: 3,
        retry_delay_ms: 10,
        websocket_timeout_ms: 2_000,
        request_timeout_ms: 2_000,
        ..FeedConfig::with_endpoint(url)
    }
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let feed = spawn_mock_feed().await;
    let client = PriceFeedClient::new(test_config(&feed.url)).unwrap();
    let mut events = client.take_event_receiver().unwrap();

    client.connect().await.unwrap();
    client.connect().await.unwrap();

    assert!(client.is_connected());
    assert_eq!(feed.connections.load(Ordering::SeqCst), 1);
    assert!(matches!(events.recv().await, Some(FeedEvent::Connected { .. })));
}

#[tokio::test]
async fn test_subscribe_streams_ticks_and_unsubscribe_is_acknowledged() {
    let feed = spawn_mock_feed().await;
    let client = PriceFeedClient::new(test_config(&feed.url)).unwrap();

    let mut subscription = client.subscribe("1HZ10V").await.unwrap();
    assert_eq!(subscription.id(), "sub-1HZ10V");
    assert_eq!(subscription.symbol(), "1HZ10V");

    let mut quotes = Vec::new();
    for _ in 0..3 {
        quotes.push(subscription.recv().await.unwrap().quote);
    }
    assert_eq!(quotes, vec![100.0, 101.0, 102.0]);

    subscription.unsubscribe().await.unwrap();
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_subscription_as_stream() {
    let feed = spawn_mock_feed().await;
    let client = PriceFeedClient::new(test_config(&feed.url)).unwrap();

    let subscription = client.subscribe("1HZ50V").await.unwrap();
    let ticks: Vec<_> = subscription.into_stream().take(3).collect().await;
    assert_eq!(ticks.len(), 3);
    assert!(ticks.iter().all(|t| t.symbol == "1HZ50V"));
}

#[tokio::test]
async fn test_concurrent_history_requests_are_correlated() {
    let feed = spawn_mock_feed().await;
    let client = PriceFeedClient::new(test_config(&feed.url)).unwrap();
    client.connect().await.unwrap();

    // the shorter request is answered first
    let (long, short) = tokio::join!(
        client.fetch_history("1HZ10V", 60, 5),
        client.fetch_history("1HZ10V", 60, 1)
    );
    assert_eq!(long.unwrap().len(), 5);
    assert_eq!(short.unwrap().len(), 1);
}

#[tokio::test]
async fn test_untagged_response_matches_by_kind() {
    let feed = spawn_mock_feed().await;
    let client = PriceFeedClient::new(test_config(&feed.url)).unwrap();

    let candles = client.fetch_history("UNTAGGED", 60, 2).await.unwrap();
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[1].epoch, 60);
}

#[tokio::test]
async fn test_tick_history() {
    let feed = spawn_mock_feed().await;
    let client = PriceFeedClient::new(test_config(&feed.url)).unwrap();

    let ticks = client.fetch_tick_history("1HZ25V", 4).await.unwrap();
    assert_eq!(ticks.len(), 4);
    assert!(ticks.iter().all(|t| t.symbol == "1HZ25V"));
    assert_eq!(ticks[3].quote, 13.0);
    assert_eq!(ticks[3].epoch, 3);
}

#[tokio::test]
async fn test_feed_error_surfaces_as_subscription_error() {
    let feed = spawn_mock_feed().await;
    let client = PriceFeedClient::new(test_config(&feed.url)).unwrap();

    match client.subscribe("BAD").await {
        Err(FeedError::SubscriptionError { message, code }) => {
            assert!(message.contains("invalid"));
            assert_eq!(code.as_deref(), Some("InvalidSymbol"));
        }
        other => panic!("expected subscription error, got {:?}", other),
    }
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let feed = spawn_mock_feed().await;
    let client = PriceFeedClient::new(FeedConfig {
        request_timeout_ms: 100,
        ..test_config(&feed.url)
    })
    .unwrap();

    assert_eq!(
        client.fetch_history("SLOW", 60, 10).await,
        Err(FeedError::Timeout(Duration::from_millis(100)))
    );
}

#[tokio::test]
async fn test_refused_connection_exhausts_retries_with_backoff() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = PriceFeedClient::new(test_config(&format!("ws://{}", addr))).unwrap();
    let started = Instant::now();
    let result = client.connect().await;

    assert!(matches!(result, Err(FeedError::ConnectionFailed { attempts: 3, .. })));
    // 10ms + 20ms of backoff between the three attempts
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_silent_server_counts_as_failed_attempt() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let client = PriceFeedClient::new(FeedConfig {
        max_retries: 2,
        websocket_timeout_ms: 100,
        ..test_config(&format!("ws://{}", addr))
    })
    .unwrap();

    match client.connect().await {
        Err(FeedError::ConnectionFailed { attempts, reason }) => {
            assert_eq!(attempts, 2);
            assert!(reason.contains("timed out"));
        }
        other => panic!("expected connection failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_close_invalidates_subscriptions() {
    let feed = spawn_mock_feed().await;
    let client = PriceFeedClient::new(test_config(&feed.url)).unwrap();
    let mut events = client.take_event_receiver().unwrap();

    let mut subscription = client.subscribe("DROP").await.unwrap();
    assert!(subscription.recv().await.is_some());
    assert!(subscription.recv().await.is_some());
    assert!(subscription.recv().await.is_none());
    assert!(!client.is_connected());

    assert!(matches!(events.recv().await, Some(FeedEvent::Connected { .. })));
    assert_eq!(events.recv().await, Some(FeedEvent::Disconnected));

    // no automatic resubscribe; a fresh subscribe reconnects
    let mut again = client.subscribe("1HZ10V").await.unwrap();
    assert!(again.recv().await.is_some());
    assert_eq!(feed.connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_close_ends_subscriptions() {
    let feed = spawn_mock_feed().await;
    let client = PriceFeedClient::new(test_config(&feed.url)).unwrap();

    let mut subscription = client.subscribe("1HZ100V").await.unwrap();
    client.close().await;

    assert!(!client.is_connected());
    // ticks already queued may still drain before the end of stream
    let mut drained = 0;
    while subscription.recv().await.is_some() {
        drained += 1;
    }
    assert!(drained <= 3);
    assert!(subscription.unsubscribe().await.is_ok());
}
