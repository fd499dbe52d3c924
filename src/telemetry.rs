//! Logging and metrics exporter setup.

use crate::config::TelemetrySettings;
use crate::error::TelemetryError;
use opentelemetry::global;
use opentelemetry_sdk::metrics::MeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Log verbosity picked on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// `RUST_LOG` if set, otherwise warnings only.
    Default,
    Verbose,
    Debug,
}

impl LogLevel {
    pub fn from_flags(verbose: bool, debug: bool) -> Self {
        if debug {
            LogLevel::Debug
        } else if verbose {
            LogLevel::Verbose
        } else {
            LogLevel::Default
        }
    }

    fn filter(self) -> EnvFilter {
        match self {
            LogLevel::Debug => EnvFilter::new("debug"),
            LogLevel::Verbose => EnvFilter::new("info"),
            LogLevel::Default => {
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
            }
        }
    }
}

pub fn init_logging(level: LogLevel) -> Result<(), TelemetryError> {
    tracing_subscriber::fmt()
        .with_env_filter(level.filter())
        .with_target(false)
        .try_init()
        .map_err(|e| TelemetryError::Logging(e.to_string()))
}

/// Owns the meter provider and the registry it exports into.
pub struct Telemetry {
    exporter: Option<(MeterProvider, Registry)>,
}

impl Telemetry {
    /// Install a Prometheus-backed meter provider as the global provider,
    /// then create the instruments.
    ///
    /// Must run before the first `Metrics::get()`; instruments created
    /// earlier stay bound to the no-op provider.
    pub fn init(settings: &TelemetrySettings) -> Result<Self, TelemetryError> {
        if !settings.enable_metrics {
            info!("Metrics collection disabled");
            return Ok(Self::disabled());
        }

        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        let provider = MeterProvider::builder().with_reader(exporter).build();
        global::set_meter_provider(provider.clone());

        crate::metrics::Metrics::init();
        info!("OpenTelemetry metrics initialized with Prometheus exporter");

        Ok(Self {
            exporter: Some((provider, registry)),
        })
    }

    pub fn disabled() -> Self {
        Self { exporter: None }
    }

    pub fn enabled(&self) -> bool {
        self.exporter.is_some()
    }

    /// Current metrics in the Prometheus text format, or None when disabled.
    pub fn render(&self) -> Option<Result<String, TelemetryError>> {
        let (_, registry) = self.exporter.as_ref()?;
        let mut buffer = Vec::new();
        let encoded = TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))
            .and_then(|()| {
                String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
            });
        Some(encoded)
    }

    pub fn shutdown(&self) {
        if let Some((provider, _)) = &self.exporter {
            if let Err(e) = provider.shutdown() {
                tracing::warn!("Metrics provider shutdown failed: {}", e);
            }
        }
    }
}
