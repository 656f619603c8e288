//! Agent registry, inbox, and session specs.

use serde_json::json;

use crate::prelude::Daemon;

#[tokio::test]
async fn register_heartbeat_list() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    let registered = client
        .post(
            "/agents",
            json!({ "id": "agent-1", "identity": "proj:api:main", "purpose": "build" }),
        )
        .await
        .unwrap();
    assert_eq!(registered["agent"]["project"], "proj");
    assert_eq!(registered["agent"]["active"], true);
    assert_eq!(registered["salvageHint"]["staleCount"], 0);

    let beat = client.post("/agents/agent-1/heartbeat", json!({})).await.unwrap();
    assert_eq!(beat["active"], true);

    let listed = client.get("/agents?project=proj").await.unwrap();
    assert_eq!(listed["agents"].as_array().unwrap().len(), 1);

    let caps = client.get("/agents/agent-1/caps").await.unwrap();
    assert_eq!(caps["services"]["allowed"], true);
    assert_eq!(caps["locks"]["max"], 20);
}

#[tokio::test]
async fn heartbeat_for_unknown_agent_is_404() {
    let daemon = Daemon::spawn();
    let client = daemon.client();
    let err = client
        .post("/agents/ghost/heartbeat", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("NotFound"));
}

#[tokio::test]
async fn inbox_round_trip() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    client
        .post(
            "/agents/agent-1/inbox",
            json!({ "sender": "agent-2", "content": "ready for review" }),
        )
        .await
        .unwrap();

    let inbox = client.get("/agents/agent-1/inbox?unread=true").await.unwrap();
    assert_eq!(inbox["messages"].as_array().unwrap().len(), 1);
    assert_eq!(inbox["unread"], 1);
    assert_eq!(inbox["messages"][0]["sender"], "agent-2");

    let marked = client.put("/agents/agent-1/inbox/read", json!({})).await.unwrap();
    assert_eq!(marked["marked"], 1);
    let inbox = client.get("/agents/agent-1/inbox?unread=true").await.unwrap();
    assert!(inbox["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn session_with_advisory_claims() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    let first = client
        .post(
            "/sessions",
            json!({ "purpose": "one", "agentId": "agent-1", "files": ["src/a.rs"] }),
        )
        .await
        .unwrap();
    assert!(first["conflicts"].as_array().unwrap().is_empty());
    let first_id = first["session"]["id"].as_str().unwrap().to_string();

    // Overlap is reported, not blocked
    let second = client
        .post(
            "/sessions",
            json!({ "purpose": "two", "files": ["src/a.rs"] }),
        )
        .await
        .unwrap();
    let conflicts = second["conflicts"].as_array().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0]["session_id"], first_id.as_str());

    // Ending the first session releases its claim
    client
        .put(
            &format!("/sessions/{first_id}"),
            json!({ "status": "completed", "handoffNote": "over to you" }),
        )
        .await
        .unwrap();
    let third = client
        .post(
            "/sessions",
            json!({ "purpose": "three", "files": ["src/a.rs"] }),
        )
        .await
        .unwrap();
    let conflicts = third["conflicts"].as_array().unwrap();
    assert_eq!(conflicts.len(), 1, "second session still claims the path");
    assert_ne!(conflicts[0]["session_id"], first_id.as_str());
}

#[tokio::test]
async fn quick_note_creates_and_reuses() {
    let daemon = Daemon::spawn();
    let client = daemon.client();

    let first = client
        .post(
            "/sessions/quick-note",
            json!({ "agentId": "agent-1", "content": "remember the flag" }),
        )
        .await
        .unwrap();
    assert_eq!(first["createdSession"], true);

    let second = client
        .post(
            "/sessions/quick-note",
            json!({ "agentId": "agent-1", "content": "second thought" }),
        )
        .await
        .unwrap();
    assert_eq!(second["createdSession"], false);
    assert_eq!(second["sessionId"], first["sessionId"]);

    let detail = client
        .get(&format!("/sessions/{}", first["sessionId"].as_str().unwrap()))
        .await
        .unwrap();
    assert_eq!(detail["purpose"], "Quick notes");
    assert_eq!(detail["notes"].as_array().unwrap().len(), 2);
}
