//! Access to ConfigMaps in the Kubernetes API.
//!
//! The reconciliation code only talks to the [`ConfigMapStore`] trait, the [`Client`] implements
//! it on top of a [`kube::Client`] and additionally provides the watch subscription.
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use k8s_openapi::{NamespaceResourceScope, api::core::v1::ConfigMap};
use kube::{
    Api, Resource, ResourceExt,
    api::{ListParams, PostParams},
    client::Client as KubeClient,
    runtime::{WatchStreamExt, watcher},
};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::namespace::WatchNamespace;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to list ConfigMaps in namespace {namespace:?}"))]
    ListConfigMaps {
        source: kube::Error,
        namespace: String,
    },

    #[snafu(display("failed to get ConfigMap {name:?} in namespace {namespace:?}"))]
    GetConfigMap {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to create ConfigMap {name:?} in namespace {namespace:?}"))]
    CreateConfigMap {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to update ConfigMap {name:?} in namespace {namespace:?}"))]
    UpdateConfigMap {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("ConfigMap is missing key {key:?}"))]
    MissingObjectKey { key: &'static str },
}

/// The operations the reconciliation needs on the backing ConfigMap store.
///
/// Every call is scoped to a single namespace. No resourceVersion preconditions are applied, an
/// update blindly replaces the stored object.
#[async_trait]
pub trait ConfigMapStore: Send + Sync {
    /// Retrieves all ConfigMaps in `namespace`.
    async fn list(&self, namespace: &str) -> Result<Vec<ConfigMap>>;

    /// Retrieves a single ConfigMap, returning [`None`] if it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Creates a new ConfigMap in the namespace set in its metadata.
    async fn create(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    /// Replaces an existing ConfigMap. This fails for objects that do not exist yet.
    async fn update(&self, config_map: &ConfigMap) -> Result<ConfigMap>;
}

/// This `Client` can be used to access ConfigMaps in Kubernetes.
/// It wraps an underlying [`kube::client::Client`] and sets the field manager on every write.
#[derive(Clone)]
pub struct Client {
    client: KubeClient,
    post_params: PostParams,
}

impl Client {
    pub fn new(client: KubeClient, field_manager: Option<String>) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager,
                ..PostParams::default()
            },
        }
    }

    /// Subscribes to ConfigMap lifecycle events in the given namespace scope.
    ///
    /// The stream starts with the initial listing (`Init`, `InitApply`..., `InitDone`) and
    /// re-lists on desync. Errors are yielded and the watch is retried with the default backoff,
    /// so the stream does not end on its own.
    pub fn watch(
        &self,
        namespace: &WatchNamespace,
    ) -> BoxStream<'static, Result<watcher::Event<ConfigMap>, watcher::Error>> {
        let api: Api<ConfigMap> = namespace.get_api(self);
        watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed()
    }

    pub fn get_all_api<T>(&self) -> Api<T>
    where
        T: Resource<DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }

    pub fn get_namespaced_api<T>(&self, namespace: &str) -> Api<T>
    where
        T: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ConfigMapStore for Client {
    async fn list(&self, namespace: &str) -> Result<Vec<ConfigMap>> {
        let api: Api<ConfigMap> = self.get_namespaced_api(namespace);
        Ok(api
            .list(&ListParams::default())
            .await
            .context(ListConfigMapsSnafu { namespace })?
            .items)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = self.get_namespaced_api(namespace);
        api.get_opt(name)
            .await
            .context(GetConfigMapSnafu { namespace, name })
    }

    async fn create(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let (namespace, name) = object_key(config_map)?;
        let api: Api<ConfigMap> = self.get_namespaced_api(&namespace);
        api.create(&self.post_params, config_map)
            .await
            .context(CreateConfigMapSnafu { namespace, name })
    }

    async fn update(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let (namespace, name) = object_key(config_map)?;
        let api: Api<ConfigMap> = self.get_namespaced_api(&namespace);
        api.replace(&name, &self.post_params, config_map)
            .await
            .context(UpdateConfigMapSnafu { namespace, name })
    }
}

/// Extracts the `(namespace, name)` identity of a ConfigMap that is about to be written.
pub(crate) fn object_key(config_map: &ConfigMap) -> Result<(String, String)> {
    let namespace = config_map.namespace().context(MissingObjectKeySnafu {
        key: "metadata.namespace",
    })?;
    let name = config_map.meta().name.clone().context(MissingObjectKeySnafu {
        key: "metadata.name",
    })?;

    Ok((namespace, name))
}
