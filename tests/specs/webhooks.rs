//! Webhook specs (scenarios S5 and S6).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Router;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::{mpsc, Mutex};

use crate::prelude::Daemon;

struct Hit {
    headers: HeaderMap,
    body: Vec<u8>,
}

/// Loopback receiver capturing webhook deliveries.
async fn spawn_receiver() -> (String, Arc<Mutex<mpsc::Receiver<Hit>>>) {
    let (tx, rx) = mpsc::channel(16);
    let app = Router::new().route(
        "/hook",
        post(
            |State(tx): State<mpsc::Sender<Hit>>, headers: HeaderMap, body: axum::body::Bytes| async move {
                let _ = tx.send(Hit { headers, body: body.to_vec() }).await;
                "ok"
            },
        ),
    )
    .with_state(tx);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/hook"), Arc::new(Mutex::new(rx)))
}

fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
    expected == header
}

#[tokio::test]
async fn filtered_delivery_with_valid_signature() {
    let daemon = Daemon::spawn();
    let client = daemon.client();
    let (url, hits) = spawn_receiver().await;

    client
        .post(
            "/webhooks",
            json!({
                "url": url,
                "secret": "k",
                "events": ["service.claim"],
                "filter": "myapp:*",
            }),
        )
        .await
        .unwrap();

    // Non-matching target: no delivery
    client.post("/claim", json!({ "id": "other:api" })).await.unwrap();
    // Matching target: exactly one delivery
    client.post("/claim", json!({ "id": "myapp:api" })).await.unwrap();

    let hit = {
        let mut rx = hits.lock().await;
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("delivery should arrive")
            .unwrap()
    };

    assert_eq!(hit.headers.get("x-portdaddy-event").unwrap(), "service.claim");
    assert!(hit.headers.contains_key("x-portdaddy-delivery"));
    assert!(hit.headers.contains_key("x-portdaddy-timestamp"));

    let signature = hit
        .headers
        .get("x-portdaddy-signature")
        .expect("signature header")
        .to_str()
        .unwrap();
    assert!(verify_signature("k", &hit.body, signature));

    // Body is {event, timestamp, data}
    let payload: Value = serde_json::from_slice(&hit.body).unwrap();
    assert_eq!(payload["event"], "service.claim");
    assert!(payload["timestamp"].is_number());
    assert_eq!(payload["data"]["identity"], "myapp:api");

    // The non-matching claim produced nothing further
    let mut rx = hits.lock().await;
    let extra = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(extra.is_err(), "only the matching claim may deliver");
}

#[tokio::test]
async fn delivery_bookkeeping_is_visible() {
    let daemon = Daemon::spawn();
    let client = daemon.client();
    let (url, hits) = spawn_receiver().await;

    let registered = client.post("/webhooks", json!({ "url": url })).await.unwrap();
    let id = registered["webhook"]["id"].as_str().unwrap().to_string();

    client.post(&format!("/webhooks/{id}/test"), json!({})).await.unwrap();
    {
        let mut rx = hits.lock().await;
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("test delivery should arrive")
            .unwrap();
    }

    // Delivered row and success counter become visible
    let mut delivered = false;
    for _ in 0..50 {
        let deliveries = client
            .get(&format!("/webhooks/{id}/deliveries"))
            .await
            .unwrap();
        let rows = deliveries["deliveries"].as_array().unwrap().clone();
        if rows.iter().any(|d| d["status"] == "delivered") {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(delivered);

    let webhook = client.get(&format!("/webhooks/{id}")).await.unwrap();
    assert_eq!(webhook["success_count"], 1);
}

#[tokio::test]
async fn ssrf_guard_blocks_private_targets() {
    // Spawned WITHOUT the private-webhook escape hatch
    let daemon = Daemon::spawn_with(|cmd| {
        cmd.env_remove("PORT_DADDY_ALLOW_PRIVATE_WEBHOOKS");
    });
    let client = daemon.client();

    let err = client
        .post("/webhooks", json!({ "url": "http://10.0.0.1/hook" }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("Forbidden"));

    let ok = client
        .post("/webhooks", json!({ "url": "https://example.com/hook" }))
        .await
        .unwrap();
    assert_eq!(ok["success"], true);
}
