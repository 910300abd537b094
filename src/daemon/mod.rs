use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use forkguard_core::{
    DETECTOR_CONFIG, Detector, DetectorConfig, DryRun, Enforcer, telemetry,
};
use nix::unistd::geteuid;
use process_monitor::{ProcessMonitor, SignalEnforcer};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
};

use crate::cli::ForkguardDaemonOpts;

mod config;

pub use config::ForkguardConfig;

pub async fn forkguard_daemon_run(options: &ForkguardDaemonOpts) -> Result<()> {
    log::trace!("Forkguard Daemon Options: {:?}", options);

    let config = if let Some(custom_file) = &options.config_file {
        ForkguardConfig::with_custom_file(custom_file)?
    } else {
        ForkguardConfig::new()?
    };

    let detector_config = detector_config(&config, options)?;
    let monitor_config =
        process_monitor::Config::try_from(&config.get_module_config(process_monitor::MODULE_NAME))
            .context("Invalid process-monitor configuration")?;
    let logger_config =
        threat_logger::Config::try_from(&config.get_module_config(threat_logger::MODULE_NAME))
            .context("Invalid threat-logger configuration")?;

    if detector_config.enforce {
        ensure!(
            geteuid().is_root(),
            "You must run this as root user to terminate processes, or use --dry-run"
        );
        run(
            detector_config,
            SignalEnforcer::new(),
            monitor_config,
            logger_config,
        )
        .await
    } else {
        log::info!("Enforcement disabled, kill decisions are only reported");
        run(detector_config, DryRun, monitor_config, logger_config).await
    }
}

/// Read the `[detector]` section, with command line options taking precedence.
fn detector_config(
    config: &ForkguardConfig,
    options: &ForkguardDaemonOpts,
) -> Result<DetectorConfig> {
    let mut section = config.get_module_config(DETECTOR_CONFIG);
    if let Some(depth) = options.ancestor_depth {
        section.insert("ancestor_depth".to_string(), depth.to_string());
    }
    if let Some(interval) = options.min_interval_ns {
        section.insert("min_interval_ns".to_string(), interval.to_string());
    }
    if options.dry_run {
        section.insert("enforce".to_string(), "false".to_string());
    }
    DetectorConfig::try_from(&section).context("Invalid detector configuration")
}

async fn run<E: Enforcer>(
    detector_config: DetectorConfig,
    enforcer: E,
    monitor_config: process_monitor::Config,
    logger_config: threat_logger::Config,
) -> Result<()> {
    log::info!(
        "Watching for fork bombs: ancestor depth {}, minimum interval {}ns",
        detector_config.effective_depth(),
        detector_config.min_interval_ns
    );

    let (emitter, rx_events) = telemetry::channel(detector_config.telemetry_capacity);
    let detector = Arc::new(Detector::new(detector_config, enforcer, emitter));
    let (tx_shutdown, rx_shutdown) = watch::channel(false);

    let mut monitor =
        tokio::spawn(ProcessMonitor::new(detector.clone()).run(monitor_config, rx_shutdown));
    let logger = tokio::spawn(threat_logger::run(logger_config, rx_events));

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;

    let early_exit = tokio::select! {
        _ = sig_int.recv() => { log::trace!("SIGINT received"); None }
        _ = sig_term.recv() => { log::trace!("SIGTERM received"); None }
        result = &mut monitor => Some(result),
    };

    log::info!("Terminating Forkguard Daemon...");
    let monitor_result = match early_exit {
        Some(result) => result,
        None => {
            // The receiver is gone only if the monitor already stopped.
            let _ = tx_shutdown.send(true);
            monitor.await
        }
    };

    let stats = detector.stats();
    // The monitor released its reference: dropping the last one closes the
    // telemetry channel and lets the logger drain it.
    drop(detector);
    if let Err(err) = logger.await {
        log::warn!("threat-logger task failed: {err}");
    }

    match serde_json::to_string(&stats) {
        Ok(stats) => log::info!("Detector stats: {stats}"),
        Err(err) => log::warn!("Error serializing detector stats: {err}"),
    }

    monitor_result
        .context("process-monitor task failed")?
        .context("process-monitor stopped")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_override_the_file() {
        let config = ForkguardConfig::default();
        let options = ForkguardDaemonOpts {
            ancestor_depth: Some(5),
            min_interval_ns: Some(42),
            dry_run: true,
            ..Default::default()
        };
        let detector = detector_config(&config, &options).unwrap();
        assert_eq!(detector.ancestor_depth, 5);
        assert_eq!(detector.min_interval_ns, 42);
        assert!(!detector.enforce);

        let detector = detector_config(&config, &ForkguardDaemonOpts::default()).unwrap();
        assert_eq!(detector, DetectorConfig::default());
    }

    #[test]
    fn zero_depth_is_rejected() {
        let options = ForkguardDaemonOpts {
            ancestor_depth: Some(0),
            ..Default::default()
        };
        assert!(detector_config(&ForkguardConfig::default(), &options).is_err());
    }

    #[tokio::test]
    async fn pipeline_runs_in_dry_run() {
        let (emitter, mut rx) = telemetry::channel(8);
        let detector = Arc::new(Detector::new(DetectorConfig::default(), DryRun, emitter));
        let (tx_shutdown, rx_shutdown) = watch::channel(false);
        let monitor = tokio::spawn(
            ProcessMonitor::new(detector.clone())
                .run(process_monitor::Config::default(), rx_shutdown),
        );
        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        tx_shutdown.send(true).unwrap();
        monitor.await.unwrap().unwrap();
        assert!(detector.stats().tracked_processes > 0);
        drop(detector);
        // every decision was delivered before the channel closed
        while rx.recv().await.is_some() {}
    }
}
