//! vigil-server: admin and analysis HTTP front end for the security engine.
//!
//! Exposes request analysis, alert lifecycle, audit queries, threat-intel
//! block/unblock, and the operations dashboard, and drives the periodic
//! maintenance sweep (rate-map eviction, block expiry, compliance runs).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use vigil_core::config::{AlertConfig, AuditConfig, MonitorConfig};
use vigil_server::{create_router, AppState};
use vigil_core::{LogChannel, SecurityMonitor};

#[derive(Parser, Debug)]
#[command(name = "vigil-server")]
#[command(about = "Security monitoring engine for the Civita platform")]
struct Args {
    /// Listen address
    #[arg(short, long, env = "VIGIL_LISTEN", default_value = "127.0.0.1:8730")]
    listen: SocketAddr,

    /// Audit trail path (JSONL, size-rotated). Omit to keep the trail in
    /// memory only.
    #[arg(long, env = "VIGIL_AUDIT_LOG")]
    audit_log: Option<PathBuf>,

    /// Escalation window for unacknowledged critical alerts, in seconds
    #[arg(long, env = "VIGIL_ESCALATION_SECS", default_value = "3600")]
    escalation_secs: u64,

    /// Maintenance sweep interval, in seconds
    #[arg(long, env = "VIGIL_MAINTENANCE_SECS", default_value = "60")]
    maintenance_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vigil_server=info".parse()?)
                .add_directive("vigil_core=info".parse()?),
        )
        .init();

    let args = Args::parse();

    info!(
        "Starting vigil-server v{} on {}",
        env!("CARGO_PKG_VERSION"),
        args.listen
    );

    let config = MonitorConfig {
        audit: AuditConfig {
            log_path: args.audit_log.clone(),
            ..AuditConfig::default()
        },
        alerts: AlertConfig {
            escalation_window: Duration::from_secs(args.escalation_secs),
            ..AlertConfig::default()
        },
        ..MonitorConfig::default()
    };

    let monitor = Arc::new(SecurityMonitor::new(config)?);
    monitor.register_channel(Arc::new(LogChannel));

    // Periodic housekeeping: rate-map eviction, block expiry, due
    // compliance checks.
    {
        let monitor = monitor.clone();
        let period = Duration::from_secs(args.maintenance_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let summary = monitor.maintain();
                if summary.rate_windows_evicted > 0
                    || summary.ip_blocks_expired > 0
                    || summary.compliance_checks_run > 0
                {
                    info!(
                        rate_evicted = summary.rate_windows_evicted,
                        blocks_expired = summary.ip_blocks_expired,
                        compliance_run = summary.compliance_checks_run,
                        "maintenance sweep"
                    );
                }
            }
        });
    }

    let app = create_router(AppState::new(monitor));
    let listener = TcpListener::bind(args.listen).await?;
    info!("vigil-server listening on {}", args.listen);

    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
