//! Builder for the derived [`ConfigMap`] objects written by the operator.
use std::collections::BTreeMap;

use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use snafu::{OptionExt, Snafu};

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("object is missing key {key:?}"))]
    MissingObjectKey { key: &'static str },
}

/// A builder to build [`ConfigMap`] objects.
///
/// Both a name and a namespace are required, every derived ConfigMap lives next to its sources.
#[derive(Clone, Debug, Default)]
pub struct ConfigMapBuilder {
    name: Option<String>,
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
    data: Option<BTreeMap<String, String>>,
}

impl ConfigMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn namespace(&mut self, namespace: impl Into<String>) -> &mut Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn data(&mut self, data: BTreeMap<String, String>) -> &mut Self {
        self.data = Some(data);
        self
    }

    pub fn build(&self) -> Result<ConfigMap, Error> {
        let name = self
            .name
            .clone()
            .context(MissingObjectKeySnafu {
                key: "metadata.name",
            })?;
        let namespace = self
            .namespace
            .clone()
            .context(MissingObjectKeySnafu {
                key: "metadata.namespace",
            })?;

        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(namespace),
                labels: (!self.labels.is_empty()).then(|| self.labels.clone()),
                ..ObjectMeta::default()
            },
            // An empty mapping is still written, it clears all keys of an existing ConfigMap
            data: Some(self.data.clone().unwrap_or_default()),
            ..ConfigMap::default()
        })
    }
}
