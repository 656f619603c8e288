//! Pub/sub specs (scenario S3): history, long-poll, SSE framing.

use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::prelude::Daemon;

#[tokio::test]
async fn publish_and_history_ordering() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    let mut ids = Vec::new();
    for n in 1..=3 {
        let published = client
            .post("/msg/builds", json!({ "payload": { "status": "ok", "n": n } }))
            .await
            .unwrap();
        ids.push(published["id"].as_i64().unwrap());
    }
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids must increase");

    let history = client.get("/msg/builds").await.unwrap();
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["payload"]["n"], 1);
    assert_eq!(messages[2]["payload"]["n"], 3);

    let after = client
        .get(&format!("/msg/builds?after={}", ids[0]))
        .await
        .unwrap();
    assert_eq!(after["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn long_poll_wakes_on_publish() {
    let daemon = Daemon::spawn();
    let poller = daemon.client();
    let publisher = daemon.client();

    let poll = tokio::spawn(async move {
        poller
            .get("/msg/builds/poll?after=0&timeout=10000")
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    publisher
        .post("/msg/builds", json!({ "payload": "wake up" }))
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), poll)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result["message"]["payload"], "wake up");
}

#[tokio::test]
async fn long_poll_timeout_returns_null() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    let result = client
        .get("/msg/quiet/poll?after=0&timeout=100")
        .await
        .unwrap();
    assert!(result["message"].is_null());
}

#[tokio::test]
async fn sse_subscriber_receives_frames_in_order() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    // Hand-rolled SSE read over the Unix socket
    let mut stream = tokio::net::UnixStream::connect(&daemon.socket).await.unwrap();
    stream
        .write_all(b"GET /msg/builds/subscribe HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    // Wait for the connected frame before publishing
    let mut buffer = Vec::new();
    read_until(&mut stream, &mut buffer, "event: connected").await;

    for n in 1..=3 {
        client
            .post("/msg/builds", json!({ "payload": { "status": "ok", "n": n } }))
            .await
            .unwrap();
    }

    read_until(&mut stream, &mut buffer, "\"n\":3").await;
    let text = String::from_utf8_lossy(&buffer);

    // Exactly three data frames, in publish order with increasing ids
    let ids: Vec<i64> = text
        .lines()
        .filter(|line| line.starts_with("data:") && line.contains("\"id\""))
        .map(|line| {
            let start = line.find("\"id\":").unwrap() + 5;
            line[start..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap()
        })
        .collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

async fn read_until(
    stream: &mut tokio::net::UnixStream,
    buffer: &mut Vec<u8>,
    needle: &str,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut chunk = [0u8; 4096];
    while !String::from_utf8_lossy(buffer).contains(needle) {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("timed out waiting for SSE frame");
        let read = tokio::time::timeout(remaining, stream.read(&mut chunk))
            .await
            .expect("timed out waiting for SSE frame")
            .expect("socket read");
        assert!(read > 0, "SSE stream closed early");
        buffer.extend_from_slice(&chunk[..read]);
    }
}

#[tokio::test]
async fn clear_and_channel_listing() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    client.post("/msg/a", json!({ "payload": 1 })).await.unwrap();
    client.post("/msg/b", json!({ "payload": 2 })).await.unwrap();

    let channels = client.get("/channels").await.unwrap();
    assert_eq!(channels["channels"].as_array().unwrap().len(), 2);

    let cleared = client.delete("/msg/a", None).await.unwrap();
    assert_eq!(cleared["cleared"], 1);
    let history = client.get("/msg/a").await.unwrap();
    assert!(history["messages"].as_array().unwrap().is_empty());
}
