//! Watches `Receiver` and `EventRoute` resources and feeds the generator.

use std::collections::HashSet;
use std::fmt::Debug;
use std::pin::pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crds::{EventRoute, Receiver};
use crate::generator::RouteConfigGenerator;

/// A resource kind that contributes to the routing configuration.
pub trait Tracked: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static {
    /// Kind name for logs.
    const KIND: &'static str;

    /// Identity of the object within the generator.
    fn key(&self) -> String;

    /// Adds or updates the object.
    fn apply(&self, generator: &RouteConfigGenerator);

    /// Removes the object with `key`.
    fn remove(key: &str, generator: &RouteConfigGenerator);

    /// Removes every object not in `keys`.
    fn retain(keys: &HashSet<String>, generator: &RouteConfigGenerator);

    /// Records that the initial listing is complete.
    fn mark_synced(generator: &RouteConfigGenerator);
}

impl Tracked for Receiver {
    const KIND: &'static str = "Receiver";

    fn key(&self) -> String {
        self.name_any()
    }

    fn apply(&self, generator: &RouteConfigGenerator) {
        generator.append_receiver(&self.key(), &self.spec);
    }

    fn remove(key: &str, generator: &RouteConfigGenerator) {
        generator.remove_receiver(key);
    }

    fn retain(keys: &HashSet<String>, generator: &RouteConfigGenerator) {
        generator.retain_receivers(keys);
    }

    fn mark_synced(generator: &RouteConfigGenerator) {
        generator.mark_receivers_synced();
    }
}

impl Tracked for EventRoute {
    const KIND: &'static str = "EventRoute";

    fn key(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }

    fn apply(&self, generator: &RouteConfigGenerator) {
        if let Err(e) = generator.append_event_route(&self.key(), &self.spec) {
            warn!(error = %e, "ignoring event route");
        }
    }

    fn remove(key: &str, generator: &RouteConfigGenerator) {
        generator.remove_event_route(key);
    }

    fn retain(keys: &HashSet<String>, generator: &RouteConfigGenerator) {
        generator.retain_event_routes(keys);
    }

    fn mark_synced(generator: &RouteConfigGenerator) {
        generator.mark_event_routes_synced();
    }
}

/// Applies watch events of one kind to the generator.
///
/// A relist replaces the kind's objects: anything not seen between `Init`
/// and `InitDone` is removed when the listing completes.
#[derive(Debug, Default)]
pub struct ResourceSync {
    relist: Option<HashSet<String>>,
}

impl ResourceSync {
    /// Creates a sync with no listing in progress.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one watch event.
    pub fn handle<K: Tracked>(&mut self, generator: &RouteConfigGenerator, event: watcher::Event<K>) {
        match event {
            watcher::Event::Init => {
                debug!(kind = K::KIND, "listing resources");
                self.relist = Some(HashSet::new());
            }
            watcher::Event::InitApply(obj) => {
                if let Some(keys) = self.relist.as_mut() {
                    keys.insert(obj.key());
                }
                obj.apply(generator);
            }
            watcher::Event::InitDone => {
                if let Some(keys) = self.relist.take() {
                    K::retain(&keys, generator);
                }
                K::mark_synced(generator);
            }
            watcher::Event::Apply(obj) => obj.apply(generator),
            watcher::Event::Delete(obj) => K::remove(&obj.key(), generator),
        }
    }
}

/// Watches every object of kind `K` until cancelled.
pub async fn watch<K: Tracked>(api: Api<K>, generator: Arc<RouteConfigGenerator>, cancel: CancellationToken) {
    let stream = watcher(api, watcher::Config::default().any_semantic()).default_backoff();
    let mut stream = pin!(stream);
    let mut sync = ResourceSync::new();
    info!(kind = K::KIND, "watching resources");

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(event)) => sync.handle(&generator, event),
            Some(Err(e)) => warn!(kind = K::KIND, error = %e, "resource watch failed, retrying"),
            None => break,
        }
    }
    info!(kind = K::KIND, "stopped watching resources");
}

/// Watches receivers and event routes cluster-wide until cancelled.
pub async fn run(client: Client, generator: Arc<RouteConfigGenerator>, cancel: CancellationToken) {
    tokio::join!(
        watch(Api::<Receiver>::all(client.clone()), Arc::clone(&generator), cancel.clone()),
        watch(Api::<EventRoute>::all(client), generator, cancel),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{EventRouteSpec, ReceiverSpec, RouteSpec, WebhookSpec};
    use crate::testing::offline_client;
    use mesh_config::{GlobalConfig, HandOffReceiver, hand_off};

    fn receiver(name: &str) -> Receiver {
        Receiver::new(
            name,
            ReceiverSpec {
                webhook_config: Some(WebhookSpec {
                    url: format!("http://example/{name}"),
                    ..WebhookSpec::default()
                }),
                ..ReceiverSpec::default()
            },
        )
    }

    fn event_route(namespace: &str, name: &str, receiver: &str) -> EventRoute {
        let mut route = EventRoute::new(
            name,
            EventRouteSpec {
                route: RouteSpec {
                    receiver: receiver.to_string(),
                    ..RouteSpec::default()
                },
            },
        );
        route.metadata.namespace = Some(namespace.to_string());
        route
    }

    fn generator() -> (RouteConfigGenerator, HandOffReceiver) {
        let (tx, rx) = hand_off();
        (RouteConfigGenerator::new(GlobalConfig::default(), tx), rx)
    }

    #[test]
    fn event_route_key_includes_namespace() {
        assert_eq!(event_route("ns-a", "r1", "bot1").key(), "ns-a/r1");
        assert_eq!(receiver("bot1").key(), "bot1");
    }

    #[test]
    fn initial_listing_marks_synced() {
        let (generator, rx) = generator();
        let mut receivers = ResourceSync::new();
        let mut routes = ResourceSync::new();

        receivers.handle::<Receiver>(&generator, watcher::Event::Init);
        receivers.handle(&generator, watcher::Event::InitApply(receiver("bot1")));
        receivers.handle::<Receiver>(&generator, watcher::Event::InitDone);
        assert!(rx.borrow().is_none());

        routes.handle::<EventRoute>(&generator, watcher::Event::Init);
        routes.handle(&generator, watcher::Event::InitApply(event_route("ns-a", "r1", "bot1")));
        routes.handle::<EventRoute>(&generator, watcher::Event::InitDone);

        assert!(generator.is_synced());
        let config = generator.snapshot().unwrap();
        assert!(config.receiver("bot1").is_some());
        assert_eq!(config.route.routes[0].receiver, "bot1");
        assert!(rx.borrow().is_some());
    }

    #[test]
    fn relist_removes_objects_not_seen() {
        let (generator, _rx) = generator();
        let mut sync = ResourceSync::new();
        sync.handle(&generator, watcher::Event::Apply(receiver("bot1")));
        sync.handle(&generator, watcher::Event::Apply(receiver("bot2")));

        sync.handle::<Receiver>(&generator, watcher::Event::Init);
        sync.handle(&generator, watcher::Event::InitApply(receiver("bot2")));
        sync.handle::<Receiver>(&generator, watcher::Event::InitDone);

        let config = generator.snapshot().unwrap();
        assert!(config.receiver("bot1").is_none());
        assert!(config.receiver("bot2").is_some());
    }

    #[test]
    fn delete_removes_object() {
        let (generator, _rx) = generator();
        let mut sync = ResourceSync::new();
        sync.handle(&generator, watcher::Event::Apply(event_route("ns-a", "r1", "bot1")));
        sync.handle(&generator, watcher::Event::Delete(event_route("ns-a", "r1", "bot1")));
        assert!(generator.snapshot().unwrap().route.routes.is_empty());
    }

    #[tokio::test]
    async fn watchers_stop_on_cancel() {
        let (tx, _rx) = hand_off();
        let generator = Arc::new(RouteConfigGenerator::new(GlobalConfig::default(), tx));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(offline_client(), generator, cancel.clone()));

        cancel.cancel();
        handle.await.unwrap();
    }
}
