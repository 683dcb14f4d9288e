//! Watches ConfigMaps and dispatches their lifecycle events to the [`Handler`].
//!
//! The controller is split in two halves connected by a channel:
//!
//! - The [`Informer`] consumes the raw watch stream, maintains a cache of the last known state of
//!   every ConfigMap and publishes typed [`ConfigMapEvent`]s for opted-in ConfigMaps only.
//! - The [`Controller`] waits for the initial listing to complete and then feeds every published
//!   event to the [`Handler`], one at a time, until it is shut down.
use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    ResourceExt,
    runtime::{reflector::ObjectRef, watcher},
};
use snafu::{ResultExt, Snafu};
use tokio::sync::{mpsc, watch};

use crate::{
    client::ConfigMapStore,
    handler::{self, Handler, Reconciled},
    kvp,
    metrics::Metrics,
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("timed out after {timeout:?} waiting for the ConfigMap cache to sync"))]
    CacheSyncTimeout { timeout: Duration },

    #[snafu(display("shutdown requested before the ConfigMap cache was synced"))]
    CacheSyncInterrupted,

    #[snafu(display("the ConfigMap watch ended before the cache was synced"))]
    WatchEndedBeforeSync { source: watch::error::RecvError },
}

/// The lifecycle states of the [`Controller`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ControllerState {
    /// Waiting for the initial listing of ConfigMaps to complete.
    Syncing,
    /// Dispatching events, until shutdown.
    Running,
}

/// A typed lifecycle event of a ConfigMap, derived from the raw watch stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigMapEvent {
    /// The ConfigMap was not known before.
    Added(ConfigMap),
    /// A new state of an already known ConfigMap.
    Updated(ConfigMap),
    /// The ConfigMap is gone, carrying its last known state.
    Deleted(ConfigMap),
}

impl ConfigMapEvent {
    pub fn config_map(&self) -> &ConfigMap {
        match self {
            Self::Added(cm) | Self::Updated(cm) | Self::Deleted(cm) => cm,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated(_) => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

/// The local cache of ConfigMaps, keyed by their object reference.
///
/// Turns raw [`watcher::Event`]s into [`ConfigMapEvent`]s. A re-list replaces the cache, objects
/// which are missing from the new listing are reported as deleted.
#[derive(Debug, Default)]
pub struct InformerCache {
    objects: HashMap<ObjectRef<ConfigMap>, ConfigMap>,
    /// Objects seen during an ongoing (re-)list, `None` outside of a listing.
    listing: Option<HashSet<ObjectRef<ConfigMap>>>,
    synced: bool,
}

impl InformerCache {
    /// Applies a single watch event and returns the resulting lifecycle events.
    pub fn apply(&mut self, event: watcher::Event<ConfigMap>) -> Vec<ConfigMapEvent> {
        match event {
            watcher::Event::Init => {
                self.listing = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(config_map) => {
                if let Some(listing) = &mut self.listing {
                    listing.insert(ObjectRef::from_obj(&config_map));
                }
                vec![self.upsert(config_map)]
            }
            watcher::Event::InitDone => {
                self.synced = true;
                let Some(listing) = self.listing.take() else {
                    return Vec::new();
                };

                let vanished: Vec<_> = self
                    .objects
                    .keys()
                    .filter(|object_ref| !listing.contains(*object_ref))
                    .cloned()
                    .collect();

                vanished
                    .into_iter()
                    .filter_map(|object_ref| self.objects.remove(&object_ref))
                    .map(ConfigMapEvent::Deleted)
                    .collect()
            }
            watcher::Event::Apply(config_map) => vec![self.upsert(config_map)],
            watcher::Event::Delete(config_map) => {
                let last_known = self
                    .objects
                    .remove(&ObjectRef::from_obj(&config_map))
                    .unwrap_or(config_map);
                vec![ConfigMapEvent::Deleted(last_known)]
            }
        }
    }

    /// Whether the initial listing has completed at least once.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn upsert(&mut self, config_map: ConfigMap) -> ConfigMapEvent {
        match self
            .objects
            .insert(ObjectRef::from_obj(&config_map), config_map.clone())
        {
            Some(_) => ConfigMapEvent::Updated(config_map),
            None => ConfigMapEvent::Added(config_map),
        }
    }
}

/// Feeds the raw watch stream into an [`InformerCache`] and publishes the events of opted-in
/// ConfigMaps.
pub struct Informer {
    cache: InformerCache,
    events: mpsc::UnboundedSender<ConfigMapEvent>,
    synced: watch::Sender<bool>,
}

impl Informer {
    pub fn new(events: mpsc::UnboundedSender<ConfigMapEvent>, synced: watch::Sender<bool>) -> Self {
        Self {
            cache: InformerCache::default(),
            events,
            synced,
        }
    }

    /// Consumes the watch stream until it ends or the receiving side is dropped.
    pub async fn run<S>(mut self, stream: S)
    where
        S: Stream<Item = Result<watcher::Event<ConfigMap>, watcher::Error>>,
    {
        let mut stream = std::pin::pin!(stream);

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(error) => {
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        "ConfigMap watch failed, waiting for it to recover"
                    );
                    continue;
                }
            };

            for event in self.cache.apply(event) {
                if !kvp::is_watched(event.config_map()) {
                    continue;
                }

                if self.events.send(event).is_err() {
                    tracing::debug!("event receiver is gone, stopping informer");
                    return;
                }
            }

            if self.cache.is_synced() && !*self.synced.borrow() {
                tracing::info!(
                    cached_config_maps = self.cache.len(),
                    "ConfigMap cache synced"
                );
                self.synced.send_replace(true);
            }
        }

        tracing::debug!("ConfigMap watch stream ended");
    }
}

/// Runs the reconciliation pipeline for ConfigMaps.
pub struct Controller<C> {
    handler: Handler<C>,
    metrics: Metrics,
    cache_sync_timeout: Option<Duration>,
    state: ControllerState,
}

impl<C> Controller<C>
where
    C: ConfigMapStore,
{
    pub fn new(handler: Handler<C>, metrics: Metrics) -> Self {
        Self {
            handler,
            metrics,
            cache_sync_timeout: None,
            state: ControllerState::Syncing,
        }
    }

    /// Bounds the wait for the initial listing. Without a timeout only `shutdown` ends the wait.
    pub fn with_cache_sync_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.cache_sync_timeout = timeout;
        self
    }

    /// Runs the controller until `shutdown` completes or the watch stream ends.
    ///
    /// Blocks until the initial listing has been cached. Failing to sync, because `shutdown`
    /// completed first, the timeout elapsed or the stream ended, is a fatal error.
    ///
    /// A reconciliation which already started is always completed before `shutdown` is observed.
    pub async fn run<S, F>(mut self, stream: S, shutdown: F) -> Result<()>
    where
        S: Stream<Item = Result<watcher::Event<ConfigMap>, watcher::Error>> + Send + 'static,
        F: Future<Output = ()>,
    {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (synced_tx, synced_rx) = watch::channel(false);
        let informer = tokio::spawn(Informer::new(event_tx, synced_tx).run(stream));

        let mut shutdown = std::pin::pin!(shutdown);
        tracing::info!(state = %self.state, "starting ConfigMap controller");

        let synced = tokio::select! {
            synced = wait_for_sync(synced_rx, self.cache_sync_timeout) => synced,
            () = &mut shutdown => CacheSyncInterruptedSnafu.fail(),
        };
        if let Err(error) = synced {
            informer.abort();
            return Err(error);
        }

        self.state = ControllerState::Running;
        tracing::info!(state = %self.state, "dispatching ConfigMap events");

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    tracing::info!("shutdown requested, stopping ConfigMap controller");
                    break;
                }
                event = event_rx.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        tracing::info!("ConfigMap watch ended, stopping ConfigMap controller");
                        break;
                    }
                },
            }
        }

        informer.abort();
        Ok(())
    }

    /// Hands a single event to the [`Handler`]. Errors are reported and never propagated.
    pub async fn dispatch(&self, event: ConfigMapEvent) {
        let kind = event.kind();
        let result = match event {
            ConfigMapEvent::Added(config_map) => {
                self.metrics
                    .watched_config_map_added(&config_map.namespace().unwrap_or_default());
                self.handler.on_change(&config_map).await
            }
            ConfigMapEvent::Updated(config_map) => self.handler.on_change(&config_map).await,
            ConfigMapEvent::Deleted(config_map) => {
                self.metrics
                    .watched_config_map_removed(&config_map.namespace().unwrap_or_default());
                self.handler.on_delete(&config_map).await
            }
        };

        report_reconciled(kind, &result);
    }
}

async fn wait_for_sync(mut synced: watch::Receiver<bool>, timeout: Option<Duration>) -> Result<()> {
    let wait = synced.wait_for(|synced| *synced);

    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result.map(|_| ()).context(WatchEndedBeforeSyncSnafu),
            Err(_) => CacheSyncTimeoutSnafu { timeout }.fail(),
        },
        None => wait.await.map(|_| ()).context(WatchEndedBeforeSyncSnafu),
    }
}

/// Reports the outcome of a reconciliation to the current [`tracing::Subscriber`].
fn report_reconciled(event: &str, result: &Result<Reconciled, handler::Error>) {
    match result {
        Ok(reconciled) => tracing::info!(
            event,
            derived = %reconciled.target,
            operation = %reconciled.operation,
            merged_keys = reconciled.merged_keys,
            "reconciled derived ConfigMap"
        ),
        Err(error) => tracing::error!(
            event,
            error.category = %error.category(),
            error.reason = error.reason(),
            error = error as &dyn std::error::Error,
            "failed to reconcile derived ConfigMap"
        ),
    }
}
