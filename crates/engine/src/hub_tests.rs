// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::{ChannelMessage, FanoutHub, MAX_SUBSCRIBERS_PER_CHANNEL, WILDCARD_CHANNEL};

fn message(channel: &str, id: i64) -> ChannelMessage {
    ChannelMessage {
        id,
        channel: channel.to_string(),
        payload: json!({ "n": id }),
        sender: None,
        created_at: 1,
    }
}

#[tokio::test]
async fn subscriber_receives_in_publish_order() {
    let hub = FanoutHub::new();
    let mut sub = FanoutHub::subscribe(&hub, "builds").unwrap();

    for id in 1..=3 {
        hub.publish(&message("builds", id));
    }

    for expected in 1..=3 {
        let got = sub.rx.recv().await.unwrap();
        assert_eq!(got.id, expected);
        assert_eq!(got.channel, "builds");
    }
}

#[tokio::test]
async fn wildcard_subscriber_sees_every_channel() {
    let hub = FanoutHub::new();
    let mut sub = FanoutHub::subscribe(&hub, WILDCARD_CHANNEL).unwrap();

    hub.publish(&message("a", 1));
    hub.publish(&message("b", 2));

    assert_eq!(sub.rx.recv().await.unwrap().channel, "a");
    assert_eq!(sub.rx.recv().await.unwrap().channel, "b");
}

#[tokio::test]
async fn other_channels_are_not_delivered() {
    let hub = FanoutHub::new();
    let mut sub = FanoutHub::subscribe(&hub, "a").unwrap();

    hub.publish(&message("b", 1));
    hub.publish(&message("a", 2));

    assert_eq!(sub.rx.recv().await.unwrap().id, 2);
}

#[tokio::test]
async fn drop_unsubscribes() {
    let hub = FanoutHub::new();
    let sub = FanoutHub::subscribe(&hub, "a").unwrap();
    assert_eq!(hub.subscribed_channels(), 1);
    drop(sub);
    assert_eq!(hub.subscribed_channels(), 0);
}

#[tokio::test]
async fn per_channel_subscriber_cap() {
    let hub = FanoutHub::new();
    let mut held = Vec::new();
    for _ in 0..MAX_SUBSCRIBERS_PER_CHANNEL {
        held.push(FanoutHub::subscribe(&hub, "busy").unwrap());
    }
    let err = FanoutHub::subscribe(&hub, "busy").unwrap_err();
    assert_eq!(err.code(), "SubscribeRejected");
}

#[tokio::test]
async fn closed_subscriber_is_pruned_on_publish() {
    let hub = FanoutHub::new();
    let sub = FanoutHub::subscribe(&hub, "a").unwrap();
    let _keep = FanoutHub::subscribe(&hub, "a").unwrap();

    // Close one receiver without dropping the subscription handle
    let mut sub = sub;
    sub.rx.close();
    hub.publish(&message("a", 1));
    hub.publish(&message("a", 2));

    // Publishing twice is enough to observe pruning without panicking;
    // the closed handle no longer counts once dropped.
    drop(sub);
    assert_eq!(hub.subscribed_channels(), 1);
}

#[tokio::test]
async fn poll_signal_wakes_on_publish() {
    let hub = FanoutHub::new();
    let notify = hub.poll_signal("builds");

    let waiter = tokio::spawn(async move { notify.notified().await });
    tokio::task::yield_now().await;

    hub.publish(&message("builds", 1));
    tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
}
