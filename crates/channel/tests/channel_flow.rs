//! Integration tests for the channel multiplexer against an
//! in-process WebSocket server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use medley_channel::dispatch::EventHandler;
use medley_channel::messages::ChannelEvent;
use medley_channel::multiplexer::{ChannelConfig, ChannelMultiplexer};
use medley_channel::reconnect::ReconnectConfig;

/// Spawn a WebSocket server that records the first frame of every
/// connection (the subscribe control message), replies with the given
/// scripted frames, then holds the connection open.
async fn spawn_server(
    frames: Vec<String>,
) -> (SocketAddr, Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let connections = Arc::new(AtomicUsize::new(0));

    let frames = Arc::new(frames);
    let received_task = Arc::clone(&received);
    let connections_task = Arc::clone(&connections);
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            connections_task.fetch_add(1, Ordering::SeqCst);

            let frames = Arc::clone(&frames);
            let received = Arc::clone(&received_task);
            tokio::spawn(async move {
                let mut ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };

                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    received.lock().unwrap().push(text);
                }

                for frame in frames.iter() {
                    if ws.send(Message::Text(frame.clone())).await.is_err() {
                        return;
                    }
                }

                // Keep the connection open until the client goes away.
                while let Some(msg) = ws.next().await {
                    if msg.is_err() {
                        return;
                    }
                }
            });
        }
    });

    (addr, received, connections)
}

fn test_config(addr: SocketAddr) -> ChannelConfig {
    ChannelConfig {
        ws_base_url: format!("ws://{addr}"),
        connect_timeout: Duration::from_secs(2),
        reconnect: ReconnectConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            multiplier: 1.0,
        },
    }
}

fn collecting_handler() -> (EventHandler, Arc<Mutex<Vec<ChannelEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let handler: EventHandler = Arc::new(move |event: &ChannelEvent| {
        seen_clone.lock().unwrap().push(event.clone());
    });
    (handler, seen)
}

/// Poll until `predicate` holds or two seconds elapse.
async fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

#[tokio::test]
async fn subscribe_handshake_and_dispatch_order() {
    let frames = vec![
        r#"{"type":"subscribe-ack","projectId":"p1"}"#.to_string(),
        r#"{"type":"progress","projectId":"p1","requestId":"r1","progress":50.0}"#.to_string(),
        r#"{"type":"file","projectId":"p1","requestId":"r1","object":{"url":"https://x/img.png","type":"image"}}"#.to_string(),
    ];
    let (addr, received, _) = spawn_server(frames).await;

    let mux = ChannelMultiplexer::new(test_config(addr));
    let (handler, seen) = collecting_handler();
    mux.open("p1", vec![handler]).await;

    assert!(wait_until(|| seen.lock().unwrap().len() == 3).await);

    // The server saw the subscribe control frame first.
    let subscribe: serde_json::Value =
        serde_json::from_str(&received.lock().unwrap()[0]).unwrap();
    assert_eq!(subscribe["type"], "subscribe");
    assert_eq!(subscribe["projectId"], "p1");

    // Events arrive in order.
    let events = seen.lock().unwrap();
    assert_eq!(events[0].kind, "subscribe-ack");
    assert_eq!(events[1].kind, "progress");
    assert_eq!(events[2].kind, "file");
    assert_eq!(events[2].result_url(), Some("https://x/img.png"));
    drop(events);

    assert!(mux.is_connected("p1").await);
    mux.close_all().await;
}

#[tokio::test]
async fn open_is_idempotent_per_scope() {
    let (addr, _, connections) = spawn_server(vec![
        r#"{"type":"progress","projectId":"p1","progress":10.0}"#.to_string(),
    ])
    .await;

    let mux = ChannelMultiplexer::new(test_config(addr));
    let (first, seen_first) = collecting_handler();
    let (second, seen_second) = collecting_handler();

    mux.open("p1", vec![first]).await;
    assert!(wait_until(|| !seen_first.lock().unwrap().is_empty()).await);

    // Second open on the same scope must not dial a second socket.
    mux.open("p1", vec![second]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connections.load(Ordering::SeqCst), 1);
    assert_eq!(mux.open_scopes().await, vec!["p1".to_string()]);

    // The late handler is registered, it just missed earlier events.
    let _ = seen_second;
    mux.close_all().await;
}

#[tokio::test]
async fn malformed_frames_are_dropped_not_fatal() {
    let frames = vec![
        "this is not json".to_string(),
        r#"{"noType":true}"#.to_string(),
        r#"{"type":"error","projectId":"p1","error":"boom"}"#.to_string(),
    ];
    let (addr, _, _) = spawn_server(frames).await;

    let mux = ChannelMultiplexer::new(test_config(addr));
    let (handler, seen) = collecting_handler();
    mux.open("p1", vec![handler]).await;

    assert!(wait_until(|| seen.lock().unwrap().len() == 1).await);
    assert_eq!(seen.lock().unwrap()[0].error.as_deref(), Some("boom"));
    mux.close_all().await;
}

#[tokio::test]
async fn retry_ceiling_leaves_scope_closed() {
    // Nothing listens on this address; each attempt is refused.
    let unreachable: SocketAddr = "127.0.0.1:9".parse().unwrap();
    let mut config = test_config(unreachable);
    config.connect_timeout = Duration::from_millis(200);

    let mux = ChannelMultiplexer::new(config);
    mux.open("p1", vec![Arc::new(|_: &ChannelEvent| {})]).await;

    mux.wait_closed("p1").await;
    assert!(!mux.is_connected("p1").await);
    assert!(!mux.is_open("p1").await);
    mux.close_all().await;
}

#[tokio::test]
async fn reopen_after_retry_ceiling_respawns_the_task() {
    let unreachable: SocketAddr = "127.0.0.1:9".parse().unwrap();
    let mut config = test_config(unreachable);
    config.connect_timeout = Duration::from_millis(200);

    let mux = ChannelMultiplexer::new(config);
    mux.open("p1", vec![Arc::new(|_: &ChannelEvent| {})]).await;
    mux.wait_closed("p1").await;
    assert!(!mux.is_open("p1").await);

    // Explicit re-open arms a fresh round of attempts.
    mux.open("p1", vec![]).await;
    assert!(mux.is_open("p1").await);
    mux.close_all().await;
}

#[tokio::test]
async fn removing_last_handler_closes_the_connection() {
    let (addr, _, _) = spawn_server(vec![]).await;

    let mux = ChannelMultiplexer::new(test_config(addr));
    let (handler, _) = collecting_handler();
    let ids = mux.open("p1", vec![handler]).await;

    let mut connected = false;
    for _ in 0..200 {
        if mux.is_connected("p1").await {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(connected);

    mux.remove_handlers("p1", &ids).await;
    assert!(mux.open_scopes().await.is_empty());
    assert!(!mux.is_connected("p1").await);
    mux.close_all().await;
}

#[tokio::test]
async fn connection_observers_see_transitions() {
    // Hold the WebSocket handshake until the observer is registered,
    // so the connect transition cannot slip past it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (release, gate) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = gate.await;
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = accept_async(stream).await else {
            return;
        };
        while let Some(msg) = ws.next().await {
            if msg.is_err() {
                return;
            }
        }
    });

    let mux = ChannelMultiplexer::new(test_config(addr));
    mux.open("p1", vec![Arc::new(|_: &ChannelEvent| {})]).await;

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let transitions_clone = Arc::clone(&transitions);
    assert!(
        mux.observe(
            "p1",
            Arc::new(move |connected| {
                transitions_clone.lock().unwrap().push(connected);
            }),
        )
        .await
    );

    release.send(()).unwrap();
    assert!(wait_until(|| transitions.lock().unwrap().first() == Some(&true)).await);

    mux.close("p1").await;
    assert!(wait_until(|| transitions.lock().unwrap().last() == Some(&false)).await);
}
