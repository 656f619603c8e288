//! Lock manager specs (scenario S2).

use std::time::Duration;

use serde_json::json;

use crate::prelude::Daemon;

#[tokio::test]
async fn acquire_conflict_release_round_trip() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    let acquired = client
        .post("/locks/deploy", json!({ "owner": "A", "ttl": 60000 }))
        .await
        .unwrap();
    assert_eq!(acquired["success"], true);
    assert_eq!(acquired["owner"], "A");
    assert!(acquired["expiresAt"].as_u64().unwrap() > acquired["acquiredAt"].as_u64().unwrap());

    let err = client
        .post("/locks/deploy", json!({ "owner": "B" }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("LockHeld"));

    let err = client
        .delete("/locks/deploy", Some(json!({ "owner": "B" })))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("LockHeldByOther"));

    let released = client
        .delete("/locks/deploy", Some(json!({ "owner": "A" })))
        .await
        .unwrap();
    assert_eq!(released["released"], true);
}

#[tokio::test]
async fn expired_lock_is_reacquirable() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    client
        .post("/locks/deploy", json!({ "owner": "A", "ttl": 200 }))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let lock = client
        .post("/locks/deploy", json!({ "owner": "B" }))
        .await
        .unwrap();
    assert_eq!(lock["owner"], "B");
}

#[tokio::test]
async fn extend_requires_holder() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    let err = client
        .put("/locks/ghost", json!({ "ttl": 1000 }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("LockNotHeld"));

    client
        .post("/locks/deploy", json!({ "owner": "A" }))
        .await
        .unwrap();
    let extended = client
        .put("/locks/deploy", json!({ "owner": "A", "ttl": 120000 }))
        .await
        .unwrap();
    assert!(extended["expiresAt"].as_u64().is_some());
}

#[tokio::test]
async fn lock_with_retry_waits_then_times_out() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    client
        .post("/locks/deploy", json!({ "owner": "A", "ttl": 60000 }))
        .await
        .unwrap();

    // Holder never releases: retry loop must surface Timeout
    let err = client
        .lock_with_retry(
            "deploy",
            json!({ "owner": "B" }),
            Duration::from_millis(50),
            Duration::from_millis(300),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, pd_client::ClientError::Timeout));
}

#[tokio::test]
async fn lock_with_retry_succeeds_after_release() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    client
        .post("/locks/deploy", json!({ "owner": "A", "ttl": 60000 }))
        .await
        .unwrap();

    let releaser = daemon.client();
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        releaser
            .delete("/locks/deploy", Some(json!({ "owner": "A" })))
            .await
            .unwrap();
    });

    let lock = client
        .lock_with_retry(
            "deploy",
            json!({ "owner": "B" }),
            Duration::from_millis(50),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(lock["owner"], "B");
    release.await.unwrap();
}
