//! Shieldline agent entrypoint: reads ndjson signals from a file argument or
//! stdin, scores them, and writes every new alert to stdout as one JSON line.
//! Stops on EOF or Ctrl+C, then prints engine and alert statistics.

use serde::Serialize;
use shieldline_agent::{
    alerts::{Alert, AlertManager, AlertStatistics},
    audit::SealedAuditLog,
    config::ShieldConfig,
    engine::{DispatchReport, Dispatcher, EngineStatistics, ThreatEngine},
    error::ListenerError,
    logging::{AlertLine, StructuredLogger},
    signal::Signal,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Serialize)]
struct RunSummary {
    dispatch: DispatchReport,
    engine: EngineStatistics,
    alerts: AlertStatistics,
    alerts_expired: usize,
}

fn install_audit(config: &ShieldConfig, alerts: &AlertManager) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !config.audit.enabled {
        return Ok(());
    }
    let Ok(secret) = std::env::var(&config.audit.secret_env) else {
        warn!(var = %config.audit.secret_env, "audit enabled but secret not set; audit trail disabled");
        return Ok(());
    };
    let log = SealedAuditLog::open(&config.audit.path, secret.as_bytes())?;
    alerts.register_listener(log);
    info!(path = ?config.audit.path, "sealed audit trail enabled");
    Ok(())
}

fn build_engine(config: &ShieldConfig, alerts: Arc<AlertManager>) -> Result<ThreatEngine, Box<dyn std::error::Error + Send + Sync>> {
    let engine = ThreatEngine::new(config)?.with_alerts(alerts);
    #[cfg(feature = "onnx")]
    let engine = engine.with_backend(
        Arc::new(shieldline_agent::model::OnnxBackend::new()),
        &config.model,
    )?;
    Ok(engine)
}

async fn pump(
    input: impl AsyncBufRead + Unpin,
    dispatcher: &Dispatcher,
    stop: &Notify,
) -> (u64, bool) {
    let mut lines = input.lines();
    let mut line_no: u64 = 0;
    loop {
        let next = tokio::select! {
            _ = stop.notified() => {
                info!("interrupted; stopping intake");
                return (line_no, true);
            }
            next = lines.next_line() => next,
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "input read failed");
                break;
            }
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let signal: Signal = match serde_json::from_str(&line) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed signal");
                continue;
            }
        };
        if let Err(e) = dispatcher.dispatch(signal) {
            warn!(line = line_no, error = %e, "dispatch rejected signal");
            break;
        }
    }
    (line_no, false)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path = std::env::var("SHIELDLINE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));
    let config = ShieldConfig::load(&config_path)?;

    StructuredLogger::init(config.log.json, &config.log.level);
    info!(config = ?config_path, "shieldline agent starting");

    let alerts = Arc::new(AlertManager::new(&config.alerts));
    alerts.register_listener(|alert: &Alert| -> Result<(), ListenerError> {
        let mut out = std::io::stdout().lock();
        StructuredLogger::emit_json(&AlertLine::from_alert(alert), &mut out)
            .map_err(|e| ListenerError(e.to_string()))
    });
    install_audit(&config, &alerts)?;

    let engine = Arc::new(build_engine(&config, alerts.clone())?);
    let dispatcher = Dispatcher::new(engine.clone(), config.engine.async_dispatch, None);

    let stop = Arc::new(Notify::new());
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.notify_one())?;
    }

    let (lines, interrupted) = match std::env::args().nth(1) {
        Some(path) => {
            let file = tokio::fs::File::open(&path).await?;
            pump(BufReader::new(file), &dispatcher, &stop).await
        }
        None => pump(BufReader::new(tokio::io::stdin()), &dispatcher, &stop).await,
    };

    if !interrupted {
        // End of input: let queued signals finish unless interrupted meanwhile
        tokio::select! {
            _ = dispatcher.idle() => {}
            _ = stop.notified() => info!("interrupted; abandoning queued signals"),
        }
    }

    let dispatch = dispatcher
        .shutdown(Duration::from_millis(config.engine.shutdown_grace_ms))
        .await;
    let alerts_expired = alerts.clear_alerts(config.alerts.retention_days);

    let summary = RunSummary {
        dispatch,
        engine: engine.statistics(),
        alerts: alerts.alert_statistics(),
        alerts_expired,
    };
    StructuredLogger::emit_json(&summary, &mut std::io::stdout().lock())?;
    info!(lines, "shieldline agent stopping");
    Ok(())
}
