//! Resurrection queue specs (scenario S4, with compressed thresholds).

use std::time::Duration;

use serde_json::{json, Value};

use crate::prelude::Daemon;

/// Daemon with stale at 300 ms, dead at 900 ms, sweeping every 50 ms.
fn fast_daemon() -> Daemon {
    Daemon::spawn_with(|cmd| {
        cmd.env("PORT_DADDY_SWEEP_MS", "50")
            .env("PORT_DADDY_STALE_AFTER_MS", "300")
            .env("PORT_DADDY_DEAD_AFTER_MS", "900");
    })
}

async fn queue_status(client: &pd_client::PdClient, agent: &str) -> Option<String> {
    let listed = client.get("/resurrection?project=proj").await.unwrap();
    listed["entries"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["agent_id"] == agent)
        .and_then(|e| e["status"].as_str())
        .map(String::from)
}

async fn wait_for_status(client: &pd_client::PdClient, agent: &str, want: &str) -> bool {
    for _ in 0..100 {
        if queue_status(client, agent).await.as_deref() == Some(want) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn lapsed_agent_walks_the_state_machine() {
    let daemon = fast_daemon();
    let client = daemon.client();

    client
        .post(
            "/agents",
            json!({ "id": "agent-1", "identity": "proj:api:main", "purpose": "ship it" }),
        )
        .await
        .unwrap();
    let session: Value = client
        .post(
            "/sessions",
            json!({ "purpose": "ship the feature", "agentId": "agent-1" }),
        )
        .await
        .unwrap();
    let session_id = session["session"]["id"].as_str().unwrap().to_string();
    client
        .post(
            &format!("/sessions/{session_id}/notes"),
            json!({ "content": "halfway through" }),
        )
        .await
        .unwrap();

    // No heartbeats from here on: stale, then pending
    assert!(wait_for_status(&client, "agent-1", "stale").await);
    assert!(wait_for_status(&client, "agent-1", "pending").await);

    // Claim hands over the dead agent's context
    let claimed = client
        .post("/resurrection/claim/agent-1", json!({ "newAgentId": "agent-2" }))
        .await
        .unwrap();
    assert_eq!(claimed["context"]["status"], "resurrecting");
    assert_eq!(claimed["context"]["session_id"], session_id.as_str());
    assert_eq!(claimed["context"]["purpose"], "ship it");
    let notes = claimed["context"]["notes"].as_array().unwrap();
    assert!(notes.iter().any(|n| n["content"] == "halfway through"));

    // Complete removes the entry
    client
        .post(
            "/resurrection/complete/agent-1",
            json!({ "newAgentId": "agent-2" }),
        )
        .await
        .unwrap();
    assert!(queue_status(&client, "agent-1").await.is_none());
}

#[tokio::test]
async fn heartbeat_rescues_a_stale_agent() {
    let daemon = fast_daemon();
    let client = daemon.client();

    client
        .post("/agents", json!({ "id": "agent-1", "identity": "proj" }))
        .await
        .unwrap();
    assert!(wait_for_status(&client, "agent-1", "stale").await);

    client.post("/agents/agent-1/heartbeat", json!({})).await.unwrap();
    assert!(queue_status(&client, "agent-1").await.is_none());
}

#[tokio::test]
async fn abandon_returns_work_to_the_queue() {
    let daemon = fast_daemon();
    let client = daemon.client();

    client
        .post("/agents", json!({ "id": "agent-1", "identity": "proj" }))
        .await
        .unwrap();
    assert!(wait_for_status(&client, "agent-1", "pending").await);

    client
        .post("/resurrection/claim/agent-1", json!({ "newAgentId": "agent-2" }))
        .await
        .unwrap();
    client
        .post("/resurrection/abandon/agent-1", json!({}))
        .await
        .unwrap();
    assert_eq!(queue_status(&client, "agent-1").await.as_deref(), Some("pending"));

    // And a new registration in the project is told about it
    let registered = client
        .post("/agents", json!({ "id": "agent-3", "identity": "proj:web" }))
        .await
        .unwrap();
    assert_eq!(registered["salvageHint"]["pendingCount"], 1);
}

#[tokio::test]
async fn dismiss_drops_the_entry() {
    let daemon = fast_daemon();
    let client = daemon.client();

    client
        .post("/agents", json!({ "id": "agent-1", "identity": "proj" }))
        .await
        .unwrap();
    assert!(wait_for_status(&client, "agent-1", "stale").await);

    client.delete("/resurrection/agent-1", None).await.unwrap();
    assert!(queue_status(&client, "agent-1").await.is_none());
}
