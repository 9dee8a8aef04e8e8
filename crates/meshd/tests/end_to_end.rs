//! Generated routing configuration through to webhook delivery.

use std::sync::Arc;
use std::time::Duration;

use mesh_alerts::{Alert, AlertStore, MemMarker, StoreConfig};
use mesh_config::{ConfigSource, Coordinator, GlobalConfig, ReloadMetrics, hand_off};
use mesh_dispatch::NotifyLog;
use mesh_kube::RouteConfigGenerator;
use mesh_kube::crds::{EventRouteSpec, ReceiverSpec, RouteMatcher, RouteSpec, WebhookSpec};
use meshd::DispatchSlot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    generator: RouteConfigGenerator,
    coordinator: Coordinator,
    store: Arc<AlertStore>,
    slot: Arc<DispatchSlot>,
}

fn harness(hook_url: &str) -> Harness {
    let (tx, rx) = hand_off();
    let generator = RouteConfigGenerator::new(GlobalConfig::default(), tx);

    generator.append_receiver(
        "bot1",
        &ReceiverSpec {
            webhook_config: Some(WebhookSpec {
                url: hook_url.to_string(),
                ..WebhookSpec::default()
            }),
            ..ReceiverSpec::default()
        },
    );
    generator
        .append_event_route("ns-a/route1", &namespace_route("ns-a", "bot1"))
        .unwrap();
    generator.mark_receivers_synced();
    generator.mark_event_routes_synced();

    let coordinator = Coordinator::new(ConfigSource::HandOff(rx), ReloadMetrics::default());
    let store = Arc::new(AlertStore::new(StoreConfig::default(), Arc::new(MemMarker::new())));
    let slot = Arc::new(DispatchSlot::new(
        Arc::clone(&store),
        Arc::new(NotifyLog::new(Duration::from_secs(3600))),
    ));
    let subscriber = Arc::clone(&slot);
    coordinator.subscribe(move |config| subscriber.apply(config));

    Harness {
        generator,
        coordinator,
        store,
        slot,
    }
}

fn namespace_route(namespace: &str, receiver: &str) -> EventRouteSpec {
    EventRouteSpec {
        route: RouteSpec {
            receiver: receiver.to_string(),
            group_wait: Some("200ms".to_string()),
            matchers: vec![RouteMatcher {
                name: "namespace".to_string(),
                value: namespace.to_string(),
                regex: false,
            }],
            ..RouteSpec::default()
        },
    }
}

fn alert(namespace: &str) -> Alert {
    Alert::builder()
        .label("cluster", "prod")
        .label("namespace", namespace)
        .label("event_reason", "BackOff")
        .annotation("message", "Back-off restarting failed container")
        .build()
}

async fn wait_for_requests(server: &MockServer, count: usize) {
    for _ in 0..100 {
        if server.received_requests().await.unwrap_or_default().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn matching_alert_is_posted_once_and_other_namespace_falls_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&format!("{}/hook", server.uri()));
    h.coordinator.reload().unwrap();

    h.store.put([alert("ns-a"), alert("ns-b")]).unwrap();
    wait_for_requests(&server, 1).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["receiver"], "bot1");
    assert_eq!(body["alerts"].as_array().unwrap().len(), 1);
    assert_eq!(body["alerts"][0]["labels"]["namespace"], "ns-a");

    let dispatcher = h.slot.current().unwrap();
    let mut groups: Vec<(String, String)> = dispatcher
        .groups()
        .into_iter()
        .map(|g| (g.receiver, g.labels["namespace"].clone()))
        .collect();
    groups.sort();
    assert_eq!(
        groups,
        vec![
            ("bot1".to_string(), "ns-a".to_string()),
            ("default".to_string(), "ns-b".to_string()),
        ]
    );

    h.slot.stop();
}

#[tokio::test]
async fn reload_does_not_resend_delivered_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness(&format!("{}/hook", server.uri()));
    h.coordinator.reload().unwrap();

    h.store.put([alert("ns-a")]).unwrap();
    wait_for_requests(&server, 1).await;
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    h.generator
        .append_event_route("ns-z/route2", &namespace_route("ns-z", "bot1"))
        .unwrap();
    let before = h.slot.current().unwrap();
    h.coordinator.reload().unwrap();
    let after = h.slot.current().unwrap();
    assert!(before.is_stopped());
    assert_eq!(after.route().routes().len(), 2);

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    h.slot.stop();
}

#[tokio::test]
async fn invalid_hand_off_keeps_previous_dispatcher() {
    let (tx, rx) = hand_off();
    let coordinator = Coordinator::new(ConfigSource::HandOff(rx), ReloadMetrics::default());
    let store = Arc::new(AlertStore::new(StoreConfig::default(), Arc::new(MemMarker::new())));
    let slot = Arc::new(DispatchSlot::new(store, Arc::new(NotifyLog::new(Duration::from_secs(3600)))));
    let subscriber = Arc::clone(&slot);
    coordinator.subscribe(move |config| subscriber.apply(config));

    tx.send_replace(Some(Arc::from("route:\n  receiver: default\nreceivers:\n  - name: default\n")));
    coordinator.reload().unwrap();
    let active = slot.current().unwrap();

    tx.send_replace(Some(Arc::from("route: [")));
    assert!(coordinator.reload().is_err());
    assert_eq!(coordinator.metrics().last_reload_successful(), 0);
    assert!(Arc::ptr_eq(&active, &slot.current().unwrap()));
    assert!(!active.is_stopped());

    slot.stop();
}
