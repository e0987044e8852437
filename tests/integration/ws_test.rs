//! Integration tests for the WebSocket relay path.

mod helpers;

use std::time::Duration;

use axum::http::StatusCode;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use ticker_core::types::UpdateEvent;
use ticker_realtime::SubscriptionState;

use helpers::{TestApp, assert_silent, next_data, next_text};

/// Wire form of a full BTC/USDT ticker, as the upstream publisher emits it.
fn btc_update() -> String {
    UpdateEvent {
        symbol: "BTC/USDT".to_string(),
        price: Some(50000.0),
        timestamp: Some(1_700_000_000_000),
        change: Some(-612.4),
        percentage: Some(-1.21),
        volume: Some(1.83e9),
        open_24h: Some(50612.4),
        high_24h: Some(51020.0),
        low_24h: Some(49710.5),
        bid: Some(49999.9),
        ask: Some(50000.1),
    }
    .to_payload()
    .unwrap()
}

#[tokio::test]
async fn test_update_reaches_every_client_verbatim() {
    let app = TestApp::spawn().await;
    let mut a = app.connect().await;
    let mut b = app.connect().await;
    let mut c = app.connect().await;

    app.publish(btc_update()).await;

    for ws in [&mut a, &mut b, &mut c] {
        assert_eq!(next_text(ws).await, btc_update());
        assert_silent(ws).await;
    }
}

#[tokio::test]
async fn test_non_utf8_payload_is_sent_as_binary() {
    let app = TestApp::spawn().await;
    let mut ws = app.connect().await;

    let payload: &'static [u8] = &[0xff, 0x00, 0xfe];
    app.publish(payload).await;

    match next_data(&mut ws).await {
        Message::Binary(data) => assert_eq!(&data[..], payload),
        other => panic!("expected binary frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_no_snapshot_on_connect() {
    let app = TestApp::spawn().await;

    app.publish(UpdateEvent::price_only("ETH/USDT", 3000.0).to_payload().unwrap())
        .await;

    let mut ws = app.connect().await;
    assert_silent(&mut ws).await;

    app.publish(btc_update()).await;
    assert_eq!(next_text(&mut ws).await, btc_update());
}

#[tokio::test]
async fn test_order_is_preserved_per_client() {
    let app = TestApp::spawn().await;
    let mut ws = app.connect().await;

    let sent: Vec<String> = (0..50)
        .map(|i| {
            UpdateEvent::price_only("BTC/USDT", 50000.0 + i as f64)
                .to_payload()
                .unwrap()
        })
        .collect();
    for payload in &sent {
        app.publish(payload.clone()).await;
    }

    for payload in &sent {
        assert_eq!(&next_text(&mut ws).await, payload);
    }
}

#[tokio::test]
async fn test_foreign_channel_is_not_relayed() {
    let app = TestApp::spawn().await;
    let mut ws = app.connect().await;

    app.pubsub.publish("other-channel", "noise").await;
    app.publish(btc_update()).await;

    assert_eq!(next_text(&mut ws).await, btc_update());
}

#[tokio::test]
async fn test_client_frames_are_ignored() {
    let app = TestApp::spawn().await;
    let mut ws = app.connect().await;

    ws.send(Message::Text("subscribe BTC".into())).await.unwrap();
    assert_silent(&mut ws).await;

    app.publish(btc_update()).await;
    assert_eq!(next_text(&mut ws).await, btc_update());
    assert_eq!(app.engine.registry.len(), 1);
}

#[tokio::test]
async fn test_disconnect_mid_stream_leaves_others_untouched() {
    let app = TestApp::spawn().await;
    let mut staying = app.connect().await;
    let mut leaving = app.connect().await;

    app.publish("first").await;
    assert_eq!(next_text(&mut staying).await, "first");
    assert_eq!(next_text(&mut leaving).await, "first");

    leaving.close(None).await.unwrap();
    drop(leaving);
    app.wait_for_clients(1).await;

    app.publish("second").await;
    assert_eq!(next_text(&mut staying).await, "second");
}

#[tokio::test]
async fn test_abrupt_drop_is_deregistered() {
    let app = TestApp::spawn().await;
    let mut staying = app.connect().await;
    let leaving = app.connect().await;

    drop(leaving);
    app.wait_for_clients(1).await;

    app.publish(btc_update()).await;
    assert_eq!(next_text(&mut staying).await, btc_update());
}

#[tokio::test]
async fn test_client_that_stops_reading_is_dropped_without_stalling_others() {
    let app = TestApp::spawn_with(|config| {
        config.realtime.channel_buffer_size = 8;
        config.realtime.send_timeout_ms = 200;
    })
    .await;
    let mut live = app.connect().await;
    let _stalled = app.connect_stalled().await;

    let filler = "x".repeat(64 * 1024);
    for i in 0..400 {
        let payload = format!("{:04}:{}", i, filler);
        app.publish(payload.clone()).await;
        assert!(next_text(&mut live).await == payload, "payload {} out of order", i);
    }

    app.wait_for_clients(1).await;
    assert_eq!(app.engine.metrics.snapshot().connections_active, 1);
}

#[tokio::test]
async fn test_shutdown_closes_clients_and_refuses_new_ones() {
    let app = TestApp::spawn().await;
    let mut ws = app.connect().await;

    app.engine.shutdown(Duration::from_secs(1)).await;
    assert!(app.engine.registry.is_empty());

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "client was not closed on shutdown");

    match tokio_tungstenite::connect_async(format!("ws://{}/", app.addr)).await {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("upgrade should be refused after shutdown"),
    }
}

#[tokio::test]
async fn test_health_reports_clients_and_subscription() {
    let app = TestApp::spawn().await;
    let _ws = app.connect().await;

    let response = app.get("/api/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert_eq!(response.body["clients"], 1);
    assert_eq!(response.body["channel"], app.channel());
}

#[tokio::test]
async fn test_health_degrades_while_upstream_is_down() {
    let app = TestApp::spawn().await;
    let mut ws = app.connect().await;
    let mut watch = app.engine.subscription_watch();

    app.pubsub.set_available(false);
    app.pubsub.disconnect_all().await;
    tokio::time::timeout(
        Duration::from_secs(5),
        watch.wait_for(|s| *s != SubscriptionState::Live),
    )
    .await
    .unwrap()
    .unwrap();

    let response = app.get("/api/health").await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body["status"], "degraded");

    // Clients stay connected through the outage and resume on recovery.
    app.pubsub.set_available(true);
    tokio::time::timeout(
        Duration::from_secs(10),
        watch.wait_for(|s| *s == SubscriptionState::Live),
    )
    .await
    .unwrap()
    .unwrap();

    app.publish(btc_update()).await;
    assert_eq!(next_text(&mut ws).await, btc_update());
}
