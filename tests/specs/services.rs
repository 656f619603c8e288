//! Port claim / release specs (scenario S1 and friends).

use serde_json::json;

use crate::prelude::Daemon;

#[tokio::test]
async fn claim_reclaim_release_round_trip() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    let claimed = client
        .post("/claim", json!({ "id": "myapp:api" }))
        .await
        .unwrap();
    assert_eq!(claimed["success"], true);
    assert_eq!(claimed["id"], "myapp:api");
    assert_eq!(claimed["port"], 3100);
    assert_eq!(claimed["existing"], false);

    let again = client
        .post("/claim", json!({ "id": "myapp:api" }))
        .await
        .unwrap();
    assert_eq!(again["existing"], true);
    assert_eq!(again["port"], 3100);

    let released = client
        .delete("/release", Some(json!({ "id": "myapp:*" })))
        .await
        .unwrap();
    assert_eq!(released["released"], 1);

    let err = client.get("/services/myapp:api").await.unwrap_err();
    assert_eq!(err.code(), Some("NotFound"));
}

#[tokio::test]
async fn distinct_identities_distinct_ports() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    let a = client.post("/claim", json!({ "id": "a" })).await.unwrap();
    let b = client.post("/claim", json!({ "id": "b" })).await.unwrap();
    assert_ne!(a["port"], b["port"]);
}

#[tokio::test]
async fn endpoints_and_status_flow() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    client.post("/claim", json!({ "id": "myapp:api" })).await.unwrap();
    client
        .put(
            "/services/myapp:api/endpoints/staging",
            json!({ "url": "https://staging.example.com" }),
        )
        .await
        .unwrap();
    client
        .put("/services/myapp:api/status", json!({ "status": "running" }))
        .await
        .unwrap();

    let service = client.get("/services/myapp:api").await.unwrap();
    assert_eq!(service["status"], "running");
    assert_eq!(service["endpoints"]["local"], "http://localhost:3100");
    assert_eq!(service["endpoints"]["staging"], "https://staging.example.com");
}

#[tokio::test]
async fn expired_claims_are_swept_by_the_janitor() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    client
        .post("/claim", json!({ "id": "ephemeral", "expires": 200 }))
        .await
        .unwrap();

    // janitor ticks every 100 ms in specs
    let mut gone = false;
    for _ in 0..50 {
        if client.get("/services/ephemeral").await.is_err() {
            gone = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert!(gone, "expired service should be released by the janitor");
}

#[tokio::test]
async fn tcp_transport_serves_the_same_api() {
    let daemon = Daemon::spawn();
    let socket_client = daemon.client();
    let tcp_client = daemon.tcp_client();

    socket_client.post("/claim", json!({ "id": "shared" })).await.unwrap();
    let service = tcp_client.get("/services/shared").await.unwrap();
    assert_eq!(service["identity"], "shared");

    let health = tcp_client.get("/health").await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["active_ports"], 1);
}
