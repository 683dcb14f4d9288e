use std::sync::Arc;

use clap::Parser;
use config_merger_operator::{
    APP_NAME,
    cli::{Command, Opts, RunArguments},
    client::Client,
    controller::{self, Controller},
    handler::Handler,
    metrics::Metrics,
    signal::{SignalError, SignalWatcher},
    telemetry::{self, Telemetry},
};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize telemetry"))]
    InitTelemetry { source: telemetry::Error },

    #[snafu(display("failed to watch for termination signals"))]
    WatchSignals { source: SignalError },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateKubeClient { source: kube::Error },

    #[snafu(display("ConfigMap controller failed"))]
    RunController { source: controller::Error },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();

    match opts.command {
        Command::Run(run) => run_operator(run).await,
    }
}

async fn run_operator(
    RunArguments {
        watch_namespace,
        cache_sync_timeout,
        field_manager,
        telemetry,
    }: RunArguments,
) -> Result<(), Error> {
    // Dropping the guard shuts the exporters down, it must live until the operator stops
    let _telemetry_guard = Telemetry::init(APP_NAME, &telemetry).context(InitTelemetrySnafu)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        ?watch_namespace,
        ?cache_sync_timeout,
        %field_manager,
        "starting {APP_NAME}"
    );

    let signal_watcher = SignalWatcher::termination().context(WatchSignalsSnafu)?;

    let kube_client = kube::Client::try_default()
        .await
        .context(CreateKubeClientSnafu)?;
    let client = Client::new(kube_client, Some(field_manager));

    let metrics = Metrics::global();
    let handler = Handler::new(Arc::new(client.clone()), metrics.clone());

    Controller::new(handler, metrics)
        .with_cache_sync_timeout(cache_sync_timeout)
        .run(client.watch(&watch_namespace), signal_watcher.handle())
        .await
        .context(RunControllerSnafu)?;

    tracing::info!("{APP_NAME} stopped");
    Ok(())
}
