use candlekeep_application::config::{CollectorConfig, LogFormat};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "CANDLEKEEP_LOG";

/// `CANDLEKEEP_LOG` wins over `logging.level`.
fn log_filter(env_value: Option<String>, config_level: &str) -> Result<EnvFilter, String> {
    let directives = env_value
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config_level.to_string());
    EnvFilter::try_new(&directives)
        .map_err(|err| format!("invalid log filter `{directives}`: {err}"))
}

/// The `--metrics-addr` flag wins over `metrics.prometheus_listen`.
pub fn metrics_listen<'a>(flag: Option<&'a str>, config: &'a CollectorConfig) -> Option<&'a str> {
    flag.or(config.metrics.prometheus_listen.as_deref())
}

pub fn init_tracing(config: &CollectorConfig) -> Result<(), String> {
    let env_filter = log_filter(std::env::var(LOG_ENV).ok(), &config.logging.level)?;

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .with_current_span(true)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .try_init(),
    }
    .map_err(|err| format!("failed to install tracing subscriber: {err}"))
}

#[cfg(feature = "prometheus")]
pub fn init_metrics(listen: Option<&str>) -> Result<Option<SocketAddr>, String> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let Some(raw) = listen else {
        return Ok(None);
    };
    let addr: SocketAddr = raw
        .parse()
        .map_err(|err| format!("invalid metrics listen addr `{raw}` (expected host:port): {err}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| format!("failed to start prometheus listener on {addr}: {err}"))?;

    tracing::info!(metrics_addr = %addr, "prometheus metrics exporter enabled");
    Ok(Some(addr))
}

#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(listen: Option<&str>) -> Result<Option<SocketAddr>, String> {
    if let Some(raw) = listen {
        return Err(format!(
            "metrics listen addr `{raw}` given but candlekeep was built without feature `prometheus`"
        ));
    }
    Ok(None)
}
