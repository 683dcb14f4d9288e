//! Kubernetes operator that merges the data of annotated ConfigMaps into a single derived
//! ConfigMap per namespace.
//!
//! A source ConfigMap opts in by carrying the [`kvp::WATCH_ANNOTATION`] set to `"true"` and names
//! its derived ConfigMap through [`kvp::TARGET_ANNOTATION`]. Every key `key` of a source named
//! `source` ends up as `source.key` in the derived ConfigMap.
//!
//! The pipeline, leaves first:
//!
//! - [`merge`] computes the derived data from a namespace listing.
//! - [`handler`] lists, merges and creates or updates the derived ConfigMap.
//! - [`controller`] watches ConfigMaps and dispatches lifecycle events to the handler.

pub mod builder;
pub mod cli;
pub mod client;
pub mod controller;
pub mod handler;
pub mod kvp;
pub mod merge;
pub mod metrics;
pub mod namespace;
pub mod signal;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_utils;

// External re-exports
pub use k8s_openapi;
pub use kube;

/// The name used for the binary, the OTLP service name and the default field manager.
pub const APP_NAME: &str = "config-merger-operator";
