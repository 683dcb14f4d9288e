//! OpenTelemetry instruments describing the work done by the operator.
//!
//! The instruments are created from a [`Meter`]. Without an installed meter provider the global
//! meter is a no-op, so recording is always safe.
use std::time::Duration;

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter},
};

/// Histogram buckets in seconds, starting at 1ms and doubling ten times.
const LATENCY_BOUNDARIES: [f64; 10] = [
    0.001, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512,
];

/// Write operations performed against the derived ConfigMap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

impl Status {
    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(_) => Self::Error,
        }
    }
}

/// Error classes used for the `error_type` label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorType {
    Validation,
    KubernetesApi,
}

/// The lifecycle event kind a reconciliation was triggered by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Trigger {
    Change,
    Delete,
}

#[derive(Clone, Debug)]
pub struct Metrics {
    operations: Counter<u64>,
    processing_duration: Histogram<f64>,
    errors: Counter<u64>,
    merged_size: Gauge<u64>,
    watched_config_maps: UpDownCounter<i64>,
}

impl Metrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            operations: meter
                .u64_counter("configmap_operator_operations_total")
                .with_description(
                    "The total number of ConfigMap operations performed by the operator",
                )
                .build(),
            processing_duration: meter
                .f64_histogram("configmap_operator_processing_duration_seconds")
                .with_description("Time taken to process ConfigMap operations")
                .with_unit("s")
                .with_boundaries(LATENCY_BOUNDARIES.to_vec())
                .build(),
            errors: meter
                .u64_counter("configmap_operator_errors_total")
                .with_description("The total number of errors encountered by the operator")
                .build(),
            merged_size: meter
                .u64_gauge("configmap_operator_merged_size_bytes")
                .with_description("Size of merged ConfigMaps in bytes")
                .with_unit("By")
                .build(),
            watched_config_maps: meter
                .i64_up_down_counter("configmap_operator_watched_configmaps")
                .with_description("Number of ConfigMaps being watched by the operator")
                .build(),
        }
    }

    /// Instruments backed by the globally installed meter provider.
    pub fn global() -> Self {
        Self::new(&opentelemetry::global::meter(crate::APP_NAME))
    }

    pub fn record_operation(&self, operation: Operation, status: Status) {
        self.operations.add(
            1,
            &[
                KeyValue::new("operation", <&'static str>::from(operation)),
                KeyValue::new("status", <&'static str>::from(status)),
            ],
        );
    }

    pub fn record_processing_duration(&self, trigger: Trigger, duration: Duration) {
        self.processing_duration.record(
            duration.as_secs_f64(),
            &[KeyValue::new("operation", <&'static str>::from(trigger))],
        );
    }

    pub fn record_error(&self, error_type: ErrorType) {
        self.errors.add(
            1,
            &[KeyValue::new("error_type", <&'static str>::from(error_type))],
        );
    }

    pub fn record_merged_size(&self, namespace: &str, name: &str, size_bytes: u64) {
        self.merged_size.record(
            size_bytes,
            &[
                KeyValue::new("namespace", namespace.to_owned()),
                KeyValue::new("name", name.to_owned()),
            ],
        );
    }

    pub fn watched_config_map_added(&self, namespace: &str) {
        self.watched_config_maps
            .add(1, &[KeyValue::new("namespace", namespace.to_owned())]);
    }

    pub fn watched_config_map_removed(&self, namespace: &str) {
        self.watched_config_maps
            .add(-1, &[KeyValue::new("namespace", namespace.to_owned())]);
    }
}
