//! End-to-end: HTTP gateway → dispatcher → simulated hub.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use handyd::dispatcher::{Dispatcher, DispatcherSettings};
use handyd::gateway::{router, GatewayState};
use handyd::link::{LinearCall, SimulatedHub, SimulatedLink};
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

struct Daemon {
    app: Router,
    hub: SimulatedHub,
    dispatcher: Dispatcher,
}

impl Daemon {
    fn start() -> Self {
        let (link, hub, events) = SimulatedLink::new();
        let hub = hub.with_device(0, "Handy");
        let settings = DispatcherSettings {
            scan_window: Duration::from_millis(20),
            ..DispatcherSettings::default()
        };
        let (dispatcher, _task) = Dispatcher::spawn(link, events, settings);
        Self {
            app: router(GatewayState::new(dispatcher.clone())),
            hub,
            dispatcher,
        }
    }

    async fn request(&self, method: Method, uri: &str) -> (StatusCode, Value) {
        let response = self
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn get(&self, uri: &str) -> Value {
        let (status, json) = self.request(Method::GET, uri).await;
        assert_eq!(status, StatusCode::OK, "{} -> {}", uri, json);
        json
    }
}

#[tokio::test]
async fn full_session_walkthrough() {
    let daemon = Daemon::start();

    // Startup state.
    let status = daemon.get("/status").await;
    assert_eq!(status["connected"], false);
    assert_eq!(status["device_name"], "None");
    assert_eq!(status["paused"], true);
    assert_eq!(status["speed_multiplier"], 1.0);

    // Connect binds the scanned device but stays paused.
    let status = daemon.get("/connect").await;
    assert_eq!(status["connected"], true);
    assert_eq!(status["device_bound"], true);
    assert_eq!(status["device_name"], "Handy");
    assert_eq!(status["paused"], true);

    // Paused: moves are skipped.
    let ack = daemon.get("/move/0.5").await;
    assert_eq!(ack["result"], "skipped");
    assert_eq!(ack["reason"], "paused");
    assert!(daemon.hub.motions().is_empty());

    // Resume and move.
    assert_eq!(daemon.get("/resume").await["paused"], false);
    daemon.get("/move/0.75").await;
    daemon.get("/move/1.5").await;

    // Half speed doubles the duration.
    assert_eq!(daemon.get("/speed/0.5").await["applied_speed"], 0.5);
    daemon.get("/move/0.2").await;

    // Pause retracts.
    let ack = daemon.get("/pause").await;
    assert_eq!(ack["retracted"], true);

    assert_eq!(
        daemon.hub.motions(),
        vec![
            LinearCall {
                device_index: 0,
                duration_ms: 35,
                position: 0.75,
            },
            LinearCall {
                device_index: 0,
                duration_ms: 35,
                position: 1.0,
            },
            LinearCall {
                device_index: 0,
                duration_ms: 70,
                position: 0.2,
            },
            LinearCall {
                device_index: 0,
                duration_ms: 1000,
                position: 0.0,
            },
        ]
    );

    // Disconnect.
    let (status, json) = daemon.request(Method::POST, "/disconnect").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"]["connected"], false);
    assert!(!daemon.hub.is_connected());
}

#[tokio::test]
async fn second_device_does_not_rebind() {
    let daemon = Daemon::start();
    daemon.get("/connect").await;

    daemon.hub.announce(7, "Another Stroker").await;

    let status = daemon.get("/status").await;
    assert_eq!(status["device_name"], "Handy");
}

#[tokio::test]
async fn hub_loss_blocks_motion_until_reconnect() {
    let daemon = Daemon::start();
    daemon.get("/connect").await;
    daemon.get("/resume").await;

    daemon.hub.drop_connection("intiface stopped").await;

    let status = daemon.get("/status").await;
    assert_eq!(status["connected"], false);
    assert_eq!(status["paused"], true);
    assert_eq!(daemon.get("/move/0.5").await["reason"], "not_connected");

    // Reconnect, resume, move again.
    daemon.get("/connect").await;
    daemon.get("/resume").await;
    assert_eq!(daemon.get("/move/0.5").await["result"], "sent");
    assert_eq!(daemon.hub.motions().len(), 1);
}

#[tokio::test]
async fn concurrent_moves_all_arrive() {
    let daemon = Daemon::start();
    daemon.get("/connect").await;
    daemon.get("/resume").await;

    let requests = (0..20).map(|i| {
        let uri = format!("/move/{}", i as f64 / 20.0);
        let app = daemon.app.clone();
        async move {
            app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap()
                .status()
        }
    });
    let statuses = futures::future::join_all(requests).await;

    assert!(statuses.iter().all(|s| *s == StatusCode::OK));
    assert_eq!(daemon.hub.motions().len(), 20);
    assert!(daemon
        .hub
        .motions()
        .iter()
        .all(|m| (0.0..=1.0).contains(&m.position) && m.duration_ms >= 20));
}

#[tokio::test]
async fn shutdown_stops_serving_commands() {
    let daemon = Daemon::start();
    daemon.get("/connect").await;

    daemon.dispatcher.shutdown().await;

    assert!(!daemon.hub.is_connected());
    let (status, _) = daemon.request(Method::GET, "/status").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
