//! Per-cluster event watch loops.

use std::pin::pin;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Event;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::AdmissionFilter;
use crate::event::RawEvent;

/// Label set for per-cluster event counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabels {
    /// The cluster name.
    pub cluster: String,
}

/// Admission counters shared by every cluster source.
#[derive(Clone, Default)]
pub struct SourceMetrics {
    admitted: Family<ClusterLabels, Counter>,
    dropped: Family<ClusterLabels, Counter>,
}

impl std::fmt::Debug for SourceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceMetrics").finish_non_exhaustive()
    }
}

impl SourceMetrics {
    /// Creates the counters and registers them.
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "eventmesh_events_admitted",
            "Cluster events admitted into the pipeline",
            metrics.admitted.clone(),
        );
        registry.register(
            "eventmesh_events_dropped",
            "Cluster events dropped by the admission filter",
            metrics.dropped.clone(),
        );
        metrics
    }

    fn labels(cluster: &str) -> ClusterLabels {
        ClusterLabels {
            cluster: cluster.to_string(),
        }
    }

    /// Events admitted from `cluster`.
    #[must_use]
    pub fn admitted(&self, cluster: &str) -> u64 {
        self.admitted.get_or_create(&Self::labels(cluster)).get()
    }

    /// Events dropped from `cluster`.
    #[must_use]
    pub fn dropped(&self, cluster: &str) -> u64 {
        self.dropped.get_or_create(&Self::labels(cluster)).get()
    }
}

/// Watches the events of one cluster and forwards admitted ones.
///
/// The sink is bounded; a full queue holds up the watch loop rather than
/// buffering without limit.
pub struct ClusterEventSource {
    name: String,
    client: Client,
    filter: AdmissionFilter,
    sink: mpsc::Sender<RawEvent>,
    metrics: SourceMetrics,
}

impl std::fmt::Debug for ClusterEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterEventSource")
            .field("name", &self.name)
            .field("start", &self.filter.start())
            .finish_non_exhaustive()
    }
}

impl ClusterEventSource {
    /// Creates a source for the cluster reached through `client`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        client: Client,
        filter: AdmissionFilter,
        sink: mpsc::Sender<RawEvent>,
        metrics: SourceMetrics,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            filter,
            sink,
            metrics,
        }
    }

    /// The cluster name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filters one event and forwards it if admitted. Returns false once the
    /// sink is closed.
    pub async fn admit(&self, event: RawEvent) -> bool {
        let labels = SourceMetrics::labels(&self.name);
        if self.filter.filter(&event) {
            self.metrics.dropped.get_or_create(&labels).inc();
            debug!(cluster = %self.name, reason = %event.reason, component = %event.component, "event dropped");
            return true;
        }

        self.metrics.admitted.get_or_create(&labels).inc();
        event.log();
        self.sink.send(event).await.is_ok()
    }

    /// Watches events until cancelled or the sink closes. Deletions are
    /// ignored; watch errors are retried with backoff.
    pub async fn run(self, cancel: CancellationToken) {
        let api: Api<Event> = Api::all(self.client.clone());
        let stream = watcher(api, watcher::Config::default().any_semantic()).default_backoff();
        let mut stream = pin!(stream);
        info!(cluster = %self.name, "watching cluster events");

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(watcher::Event::Apply(event) | watcher::Event::InitApply(event))) => {
                    let raw = RawEvent::from_event(&self.name, &event);
                    let open = tokio::select! {
                        () = cancel.cancelled() => break,
                        open = self.admit(raw) => open,
                    };
                    if !open {
                        warn!(cluster = %self.name, "event sink closed");
                        break;
                    }
                }
                Some(Ok(watcher::Event::InitDone)) => {
                    debug!(cluster = %self.name, "initial event list complete");
                }
                Some(Ok(watcher::Event::Init | watcher::Event::Delete(_))) => {}
                Some(Err(e)) => {
                    warn!(cluster = %self.name, error = %e, "event watch failed, retrying");
                }
                None => break,
            }
        }
        info!(cluster = %self.name, "stopped watching cluster events");
    }
}
