//! Initialisation of logging, trace export and metric export.
//!
//! Every output is configured through [`TelemetryOptions`] and filtered by its own environment
//! variable:
//!
//! | Output             | Enabled by                        | Level filter                |
//! |--------------------|-----------------------------------|-----------------------------|
//! | Console            | default, `--console-log-disabled` | `CONSOLE_LOG_LEVEL`         |
//! | Rolling JSON files | `--file-log-directory`            | `FILE_LOG_LEVEL`            |
//! | OTLP traces        | `--otel-trace-exporter-enabled`   | `OTEL_TRACE_EXPORTER_LEVEL` |
//! | OTLP metrics       | `--otel-metric-exporter-enabled`  | -                           |
//!
//! The OTLP exporters are configured with the standard `OTEL_EXPORTER_OTLP_*` environment
//! variables.
use std::path::PathBuf;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{ExporterBuildError, MetricExporter, SpanExporter};
use opentelemetry_sdk::{
    Resource, metrics::SdkMeterProvider, propagation::TraceContextPropagator,
    trace::SdkTracerProvider,
};
use snafu::{ResultExt, Snafu};
use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, filter::Directive, layer::SubscriberExt};

pub const CONSOLE_LOG_LEVEL_ENV: &str = "CONSOLE_LOG_LEVEL";
pub const FILE_LOG_LEVEL_ENV: &str = "FILE_LOG_LEVEL";
pub const OTEL_TRACE_EXPORTER_LEVEL_ENV: &str = "OTEL_TRACE_EXPORTER_LEVEL";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unable to install opentelemetry trace exporter"))]
    InstallOtelTraceExporter { source: ExporterBuildError },

    #[snafu(display("unable to install opentelemetry metric exporter"))]
    InstallOtelMetricExporter { source: ExporterBuildError },

    #[snafu(display("failed to initialize rolling file appender"))]
    InitRollingFileAppender { source: InitError },

    #[snafu(display("unable to set the global default subscriber"))]
    SetGlobalDefaultSubscriber { source: SetGlobalDefaultError },
}

/// Guard for the installed telemetry outputs.
///
/// Dropping it flushes and shuts down the OTLP providers, so it needs to be held until the
/// application exits. Do not bind it to `_`.
pub struct Telemetry {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Telemetry {
    /// Installs the outputs enabled in `options` as the global default subscriber and, if
    /// enabled, the global meter provider.
    pub fn init(service_name: &'static str, options: &TelemetryOptions) -> Result<Self> {
        let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
        let mut telemetry = Self {
            tracer_provider: None,
            meter_provider: None,
        };

        if !options.console_log_disabled {
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_filter(env_filter_builder(
                        CONSOLE_LOG_LEVEL_ENV,
                        LevelFilter::INFO,
                    ))
                    .boxed(),
            );
        }

        if let Some(file_log_directory) = &options.file_log_directory {
            let rotation_period = options.file_log_rotation_period.unwrap_or_default();
            let file_appender = RollingFileAppender::builder()
                .rotation(rotation_period.into())
                .filename_prefix(service_name)
                .filename_suffix("tracing-rs.json")
                .build(file_log_directory)
                .context(InitRollingFileAppenderSnafu)?;

            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(file_appender)
                    .with_filter(env_filter_builder(FILE_LOG_LEVEL_ENV, LevelFilter::INFO))
                    .boxed(),
            );
        }

        if options.otel_trace_exporter_enabled {
            let env_filter = env_filter_builder(OTEL_TRACE_EXPORTER_LEVEL_ENV, LevelFilter::INFO)
                .add_directive("h2=off".parse().expect("static directive is valid"));

            let trace_exporter = SpanExporter::builder()
                .with_tonic()
                .build()
                .context(InstallOtelTraceExporterSnafu)?;

            let tracer_provider = SdkTracerProvider::builder()
                .with_batch_exporter(trace_exporter)
                .with_resource(resource(service_name))
                .build();

            layers.push(
                tracing_opentelemetry::layer()
                    .with_tracer(tracer_provider.tracer(service_name))
                    .with_filter(env_filter)
                    .boxed(),
            );
            opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
            telemetry.tracer_provider = Some(tracer_provider);
        }

        if options.otel_metric_exporter_enabled {
            let metric_exporter = MetricExporter::builder()
                .with_tonic()
                .build()
                .context(InstallOtelMetricExporterSnafu)?;

            let meter_provider = SdkMeterProvider::builder()
                .with_periodic_exporter(metric_exporter)
                .with_resource(resource(service_name))
                .build();

            opentelemetry::global::set_meter_provider(meter_provider.clone());
            telemetry.meter_provider = Some(meter_provider);
        }

        if !layers.is_empty() {
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))
                .context(SetGlobalDefaultSubscriberSnafu)?;
        }

        Ok(telemetry)
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        tracing::debug!(
            opentelemetry.tracing.enabled = self.tracer_provider.is_some(),
            opentelemetry.metrics.enabled = self.meter_provider.is_some(),
            "shutting down opentelemetry OTLP providers"
        );

        if let Some(tracer_provider) = &self.tracer_provider
            && let Err(error) = tracer_provider.shutdown()
        {
            tracing::error!(%error, "unable to shutdown TracerProvider");
        }

        if let Some(meter_provider) = &self.meter_provider
            && let Err(error) = meter_provider.shutdown()
        {
            tracing::error!(%error, "unable to shutdown MeterProvider");
        }
    }
}

fn resource(service_name: &'static str) -> Resource {
    Resource::builder().with_service_name(service_name).build()
}

/// Create an [`EnvFilter`] configured with the given environment variable and default [`Directive`].
fn env_filter_builder(env_var: &str, default_directive: impl Into<Directive>) -> EnvFilter {
    EnvFilter::builder()
        .with_env_var(env_var)
        .with_default_directive(default_directive.into())
        .from_env_lossy()
}

/// Telemetry related CLI arguments, flattened into the run arguments of the operator.
#[derive(clap::Args, Debug, Default, PartialEq, Eq)]
#[command(next_help_heading = "Telemetry Options")]
pub struct TelemetryOptions {
    /// Disable console logs.
    #[arg(long, env)]
    pub console_log_disabled: bool,

    /// Enable logging to files located in the specified DIRECTORY.
    #[arg(long, env, value_name = "DIRECTORY", group = "file_log")]
    pub file_log_directory: Option<PathBuf>,

    /// Time PERIOD after which log files are rolled over.
    #[arg(long, env, value_name = "PERIOD", requires = "file_log")]
    pub file_log_rotation_period: Option<RotationPeriod>,

    /// Enable exporting OTEL traces via OTLP.
    #[arg(long, env)]
    pub otel_trace_exporter_enabled: bool,

    /// Enable exporting OTEL metrics via OTLP.
    #[arg(long, env)]
    pub otel_metric_exporter_enabled: bool,
}

/// Supported periods when the log file is rolled over.
#[derive(
    clap::ValueEnum,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "PascalCase")]
pub enum RotationPeriod {
    Minutely,
    Hourly,
    Daily,

    #[default]
    Never,
}

impl From<RotationPeriod> for Rotation {
    fn from(value: RotationPeriod) -> Self {
        match value {
            RotationPeriod::Minutely => Self::MINUTELY,
            RotationPeriod::Hourly => Self::HOURLY,
            RotationPeriod::Daily => Self::DAILY,
            RotationPeriod::Never => Self::NEVER,
        }
    }
}
