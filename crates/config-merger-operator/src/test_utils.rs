//! Shared fixtures for unit tests.
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use tokio::sync::Notify;

use crate::client::{self, ConfigMapStore, object_key};

pub fn config_map(
    namespace: &str,
    name: &str,
    annotations: &[(&str, &str)],
    data: &[(&str, &str)],
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            annotations: (!annotations.is_empty()).then(|| to_map(annotations)),
            ..ObjectMeta::default()
        },
        data: Some(to_map(data)),
        ..ConfigMap::default()
    }
}

pub fn to_map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}

/// A call recorded by the [`FakeConfigMapStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    List { namespace: String },
    Get { namespace: String, name: String },
    Create { namespace: String, name: String },
    Update { namespace: String, name: String },
}

/// Suspends a list call after its snapshot was taken, see [`FakeConfigMapStore::hold_next_list`].
#[derive(Clone, Default)]
pub struct ListHold {
    /// Notified once the held list call has taken its snapshot.
    pub listed: Arc<Notify>,
    /// Lets the held list call return its snapshot.
    pub release: Arc<Notify>,
}

/// In-memory [`ConfigMapStore`] which records every call made against it.
#[derive(Default)]
pub struct FakeConfigMapStore {
    objects: Mutex<BTreeMap<(String, String), ConfigMap>>,
    calls: Mutex<Vec<Call>>,
    fail_list: AtomicBool,
    fail_writes: AtomicBool,
    list_hold: Mutex<Option<ListHold>>,
}

impl FakeConfigMapStore {
    pub fn with_objects(objects: impl IntoIterator<Item = ConfigMap>) -> Self {
        let store = Self::default();
        for object in objects {
            store.put(object);
        }
        store
    }

    /// Inserts or replaces an object without recording a call, like a user would do.
    pub fn put(&self, config_map: ConfigMap) {
        let key = object_key(&config_map).expect("test objects have a namespace and name");
        self.objects.lock().unwrap().insert(key, config_map);
    }

    /// Removes an object without recording a call, like a user would do.
    pub fn remove(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(namespace.to_owned(), name.to_owned()))
    }

    pub fn object(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    /// The data of a stored object, empty if the object has no data.
    pub fn data(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.object(namespace, name)
            .map(|config_map| config_map.data.unwrap_or_default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes the next list call wait for [`ListHold::release`] before returning.
    pub fn hold_next_list(&self) -> ListHold {
        let hold = ListHold::default();
        *self.list_hold.lock().unwrap() = Some(hold.clone());
        hold
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn injected_error() -> kube::Error {
        kube::Error::Service("connection refused".into())
    }
}

/// The error the API server answers with when replacing an object that does not exist.
pub fn not_found() -> kube::Error {
    let mut error = kube::Error::Api(Default::default());
    if let kube::Error::Api(status) = &mut error {
        status.code = 404;
        status.reason = "NotFound".to_owned();
        status.message = "configmaps not found".to_owned();
    }
    error
}

#[async_trait]
impl ConfigMapStore for FakeConfigMapStore {
    async fn list(&self, namespace: &str) -> client::Result<Vec<ConfigMap>> {
        self.record(Call::List {
            namespace: namespace.to_owned(),
        });
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(client::Error::ListConfigMaps {
                source: Self::injected_error(),
                namespace: namespace.to_owned(),
            });
        }

        let snapshot: Vec<ConfigMap> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((object_namespace, _), _)| object_namespace == namespace)
            .map(|(_, config_map)| config_map.clone())
            .collect();

        let hold = self.list_hold.lock().unwrap().take();
        if let Some(hold) = hold {
            hold.listed.notify_one();
            hold.release.notified().await;
        }

        Ok(snapshot)
    }

    async fn get(&self, namespace: &str, name: &str) -> client::Result<Option<ConfigMap>> {
        self.record(Call::Get {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        });
        Ok(self.object(namespace, name))
    }

    async fn create(&self, config_map: &ConfigMap) -> client::Result<ConfigMap> {
        let (namespace, name) = object_key(config_map)?;
        self.record(Call::Create {
            namespace: namespace.clone(),
            name: name.clone(),
        });
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(client::Error::CreateConfigMap {
                source: Self::injected_error(),
                namespace,
                name,
            });
        }

        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&(namespace.clone(), name.clone())) {
            return Err(client::Error::CreateConfigMap {
                source: kube::Error::Service("already exists".into()),
                namespace,
                name,
            });
        }
        objects.insert((namespace, name), config_map.clone());
        Ok(config_map.clone())
    }

    async fn update(&self, config_map: &ConfigMap) -> client::Result<ConfigMap> {
        let (namespace, name) = object_key(config_map)?;
        self.record(Call::Update {
            namespace: namespace.clone(),
            name: name.clone(),
        });
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(client::Error::UpdateConfigMap {
                source: Self::injected_error(),
                namespace,
                name,
            });
        }

        let mut objects = self.objects.lock().unwrap();
        match objects.get_mut(&(namespace.clone(), name.clone())) {
            Some(existing) => {
                *existing = config_map.clone();
                Ok(config_map.clone())
            }
            None => Err(client::Error::UpdateConfigMap {
                source: not_found(),
                namespace,
                name,
            }),
        }
    }
}
