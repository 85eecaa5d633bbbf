//! Connection behavior against an in-process fake debugging server.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use exfil_cdp::{CdpError, CommandSender, Connection, handler};
use exfil_core::Message;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Serve one client. `Echo` replies with its params, `Fail` with an error,
/// `Emit` pushes `count` events before replying, `Hangup` drops the socket.
async fn spawn_fake_browser() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(WsMessage::Text(text))) = ws.next().await {
            let req: Value = serde_json::from_str(&text).unwrap();
            let id = req["id"].clone();
            let reply = match req["method"].as_str().unwrap() {
                "Echo" => json!({"id": id, "result": req["params"]}),
                "Fail" => json!({"id": id, "error": {"code": -32000, "message": "nope"}}),
                "Emit" => {
                    let count = req["params"]["count"].as_u64().unwrap();
                    for n in 0..count {
                        let ev = json!({"method": "Test.event", "params": {"n": n}});
                        ws.send(WsMessage::Text(ev.to_string().into())).await.unwrap();
                    }
                    json!({"id": id, "result": {}})
                }
                "Hangup" => return,
                other => panic!("unexpected method {other}"),
            };
            ws.send(WsMessage::Text(reply.to_string().into())).await.unwrap();
        }
    }));
    format!("ws://{addr}/devtools/page/fake")
}

#[tokio::test]
async fn reply_result_is_returned() {
    let conn = Connection::connect(&spawn_fake_browser().await).await.unwrap();
    let res = conn.send("Echo", json!({"scriptId": "42"})).await.unwrap();
    assert_eq!(res.string("scriptId"), "42");
}

#[tokio::test]
async fn error_reply_becomes_protocol_error() {
    let conn = Connection::connect(&spawn_fake_browser().await).await.unwrap();
    let err = conn.send("Fail", json!({})).await.unwrap_err();
    assert_matches!(err, CdpError::Protocol { method, message } => {
        assert_eq!(method, "Fail");
        assert_eq!(message, "nope");
    });
    // The connection survives a failed command.
    assert!(conn.send("Echo", json!({})).await.is_ok());
}

#[tokio::test]
async fn events_reach_handler_in_order() {
    let conn = Connection::connect(&spawn_fake_browser().await).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.on(
        "Test.event",
        handler(move |msg: Message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg.int("n"));
            }
        }),
    );
    let _ = conn.send("Emit", json!({"count": 5})).await.unwrap();

    let mut seen = Vec::new();
    while seen.len() < 5 {
        let n = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(n);
    }
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn handlers_run_one_at_a_time() {
    let conn = Connection::connect(&spawn_fake_browser().await).await.unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    {
        let log = Arc::clone(&log);
        conn.on(
            "Test.event",
            handler(move |msg: Message| {
                let log = Arc::clone(&log);
                let done_tx = done_tx.clone();
                async move {
                    let n = msg.int("n");
                    log.lock().push(format!("start {n}"));
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    log.lock().push(format!("end {n}"));
                    let _ = done_tx.send(());
                }
            }),
        );
    }
    let _ = conn.send("Emit", json!({"count": 2})).await.unwrap();
    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(*log.lock(), vec!["start 0", "end 0", "start 1", "end 1"]);
}

#[tokio::test]
async fn hangup_fails_pending_and_later_sends() {
    let conn = Connection::connect(&spawn_fake_browser().await).await.unwrap();
    assert_matches!(conn.send("Hangup", json!({})).await, Err(CdpError::ConnectionClosed));
    assert_matches!(conn.send("Echo", json!({})).await, Err(CdpError::ConnectionClosed));
    assert!(conn.is_closed());
}

#[tokio::test]
async fn close_stops_the_connection() {
    let conn = Connection::connect(&spawn_fake_browser().await).await.unwrap();
    conn.close();
    assert!(conn.is_closed());
    assert_matches!(conn.send("Echo", json!({})).await, Err(CdpError::ConnectionClosed));
}
