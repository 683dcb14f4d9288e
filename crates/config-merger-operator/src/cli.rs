//! Command line interface of the operator.
//!
//! Every argument can also be provided through the environment variable of the same name, for
//! example `--watch-namespace` as `WATCH_NAMESPACE`.
use std::time::Duration;

use clap::Parser;

use crate::{namespace::WatchNamespace, telemetry::TelemetryOptions};

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(
    name = crate::APP_NAME,
    about = "Merges the data of annotated ConfigMaps into a derived ConfigMap",
    version
)]
pub struct Opts {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, clap::Subcommand)]
pub enum Command {
    /// Run the operator.
    Run(RunArguments),
}

#[derive(Debug, PartialEq, Eq, clap::Args)]
pub struct RunArguments {
    /// Provides a specific namespace to watch (instead of watching all namespaces)
    #[arg(long, env, default_value = "")]
    pub watch_namespace: WatchNamespace,

    /// Maximum time to wait for the initial listing of ConfigMaps, e.g. `30s`.
    /// Waits until shutdown if unset.
    #[arg(long, env, value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub cache_sync_timeout: Option<Duration>,

    /// Field manager recorded on every write of a derived ConfigMap.
    #[arg(long, env, default_value = crate::APP_NAME)]
    pub field_manager: String,

    // Flattened structs need to be placed at the end to keep the help headings correct.
    #[command(flatten)]
    pub telemetry: TelemetryOptions,
}
