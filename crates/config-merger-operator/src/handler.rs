//! Reconciles the derived ConfigMap of a namespace after one of its sources changed.
//!
//! A reconciliation always recomputes the derived data from a fresh namespace listing. Nothing is
//! accumulated between runs, the derived ConfigMap reflects the listing of whichever
//! reconciliation wrote last.
use std::{collections::BTreeMap, sync::Arc, time::Instant};

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{ResourceExt, runtime::reflector::ObjectRef};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    APP_NAME,
    builder::{self, ConfigMapBuilder},
    client::{self, ConfigMapStore},
    kvp,
    merge::{merge_config_maps, merged_size_bytes},
    metrics::{ErrorType, Metrics, Operation, Status, Trigger},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, strum::EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
pub enum Error {
    #[snafu(display(
        "{config_map} has no target ConfigMap specified, set the {annotation:?} annotation"
    ))]
    MissingTargetAnnotation {
        config_map: ObjectRef<ConfigMap>,
        annotation: &'static str,
    },

    #[snafu(display("{config_map} has no namespace"))]
    MissingNamespace { config_map: ObjectRef<ConfigMap> },

    #[snafu(display("failed to list ConfigMaps to merge into {target}"))]
    ListConfigMaps {
        source: client::Error,
        target: ObjectRef<ConfigMap>,
    },

    #[snafu(display("failed to look up target {target}"))]
    GetTarget {
        source: client::Error,
        target: ObjectRef<ConfigMap>,
    },

    #[snafu(display("failed to build target {target}"))]
    BuildTarget {
        source: builder::Error,
        target: ObjectRef<ConfigMap>,
    },

    #[snafu(display("failed to create target {target}"))]
    CreateTarget {
        source: client::Error,
        target: ObjectRef<ConfigMap>,
    },

    #[snafu(display("failed to update target {target}"))]
    UpdateTarget {
        source: client::Error,
        target: ObjectRef<ConfigMap>,
    },
}

impl Error {
    /// The error class, used as metric label and log field.
    pub fn category(&self) -> ErrorType {
        match self {
            Self::MissingTargetAnnotation { .. }
            | Self::MissingNamespace { .. }
            | Self::BuildTarget { .. } => ErrorType::Validation,
            Self::ListConfigMaps { .. }
            | Self::GetTarget { .. }
            | Self::CreateTarget { .. }
            | Self::UpdateTarget { .. } => ErrorType::KubernetesApi,
        }
    }

    /// `PascalCase`d name of the error variant.
    pub fn reason(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// The result of a successful reconciliation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciled {
    pub target: ObjectRef<ConfigMap>,
    pub operation: Operation,
    /// Number of keys in the derived ConfigMap.
    pub merged_keys: usize,
}

/// Computes and writes derived ConfigMaps.
///
/// Both [`Handler::on_change`] and [`Handler::on_delete`] run to completion before returning and
/// are idempotent given identical cluster state. They issue exactly one list call and at most one
/// write. No call at all is made if the trigger is invalid.
pub struct Handler<C> {
    client: Arc<C>,
    metrics: Metrics,
}

impl<C> Handler<C>
where
    C: ConfigMapStore,
{
    pub fn new(client: Arc<C>, metrics: Metrics) -> Self {
        Self { client, metrics }
    }

    /// Recomputes the derived ConfigMap named by `trigger` and creates or replaces it.
    #[tracing::instrument(
        skip(self, trigger),
        fields(config_map = %ObjectRef::from_obj(trigger))
    )]
    pub async fn on_change(&self, trigger: &ConfigMap) -> Result<Reconciled> {
        let started = Instant::now();
        let result = self.reconcile(trigger, Trigger::Change).await;
        self.metrics
            .record_processing_duration(Trigger::Change, started.elapsed());
        self.record_error(&result);
        result
    }

    /// Recomputes the derived ConfigMap named by the deleted `trigger`.
    ///
    /// The deleted ConfigMap is no longer part of the listing, so it drops out of the merge. The
    /// derived ConfigMap is only replaced, never created: if it does not exist the update fails.
    #[tracing::instrument(
        skip(self, trigger),
        fields(config_map = %ObjectRef::from_obj(trigger))
    )]
    pub async fn on_delete(&self, trigger: &ConfigMap) -> Result<Reconciled> {
        let started = Instant::now();
        let result = self.reconcile(trigger, Trigger::Delete).await;
        self.metrics
            .record_processing_duration(Trigger::Delete, started.elapsed());
        self.metrics
            .record_operation(Operation::Delete, Status::of(&result));
        self.record_error(&result);
        result
    }

    async fn reconcile(&self, trigger: &ConfigMap, kind: Trigger) -> Result<Reconciled> {
        let target_name = kvp::target_name(trigger).context(MissingTargetAnnotationSnafu {
            config_map: ObjectRef::from_obj(trigger),
            annotation: kvp::TARGET_ANNOTATION,
        })?;
        let namespace = trigger.namespace().context(MissingNamespaceSnafu {
            config_map: ObjectRef::from_obj(trigger),
        })?;
        let target_ref: ObjectRef<ConfigMap> = ObjectRef::new(target_name).within(&namespace);

        let config_maps = self
            .client
            .list(&namespace)
            .await
            .context(ListConfigMapsSnafu {
                target: target_ref.clone(),
            })?;

        let data = merge_config_maps(&config_maps, target_name);
        tracing::debug!(
            derived = %target_ref,
            listed = config_maps.len(),
            merged_keys = data.len(),
            "merged ConfigMaps"
        );
        self.metrics
            .record_merged_size(&namespace, target_name, merged_size_bytes(&data));

        let merged_keys = data.len();
        let target = build_target(&namespace, target_name, data).context(BuildTargetSnafu {
            target: target_ref.clone(),
        })?;

        let operation = match kind {
            Trigger::Change => self.create_or_update(&target, &target_ref).await?,
            Trigger::Delete => {
                self.update(&target, &target_ref).await?;
                Operation::Update
            }
        };

        Ok(Reconciled {
            target: target_ref,
            operation,
            merged_keys,
        })
    }

    async fn create_or_update(
        &self,
        target: &ConfigMap,
        target_ref: &ObjectRef<ConfigMap>,
    ) -> Result<Operation> {
        let namespace = target_ref.namespace.as_deref().unwrap_or_default();
        let existing = self
            .client
            .get(namespace, &target_ref.name)
            .await
            .context(GetTargetSnafu {
                target: target_ref.clone(),
            })?;

        if existing.is_some() {
            self.update(target, target_ref).await?;
            Ok(Operation::Update)
        } else {
            tracing::info!(derived = %target_ref, "target ConfigMap does not exist, creating it");
            let result = self.client.create(target).await;
            self.metrics
                .record_operation(Operation::Create, Status::of(&result));
            result.context(CreateTargetSnafu {
                target: target_ref.clone(),
            })?;
            Ok(Operation::Create)
        }
    }

    async fn update(&self, target: &ConfigMap, target_ref: &ObjectRef<ConfigMap>) -> Result<()> {
        let result = self.client.update(target).await;
        self.metrics
            .record_operation(Operation::Update, Status::of(&result));
        result.context(UpdateTargetSnafu {
            target: target_ref.clone(),
        })?;
        Ok(())
    }

    fn record_error<T>(&self, result: &Result<T>) {
        if let Err(error) = result {
            self.metrics.record_error(error.category());
        }
    }
}

/// Builds the full derived ConfigMap. Writing it replaces all previous data and labels.
fn build_target(
    namespace: &str,
    name: &str,
    data: BTreeMap<String, String>,
) -> Result<ConfigMap, builder::Error> {
    ConfigMapBuilder::new()
        .name(name)
        .namespace(namespace)
        .with_label(kvp::APP_MANAGED_BY_LABEL, APP_NAME)
        .data(data)
        .build()
}
