use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use cmap_config::AgencyConfig;
use cmap_core::{AgencyError, Event, Result};
use cmap_runtime::{Agency, AgencyParts};

/// How long agents get to stop before the agency exits anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub(super) async fn cmd_start(config: AgencyConfig, no_server: bool) -> Result<()> {
    for w in config.validate().map_err(AgencyError::Config)? {
        warn!("{w}");
    }

    let parts = AgencyParts::from_config(&config)?;
    let agency = Agency::bootstrap(config, parts).await?;
    let identity = agency.identity();
    println!("cmap-agency v{}", env!("CARGO_PKG_VERSION"));
    println!("   Agency: {}", identity.name);
    println!(
        "   MAS {} / instance {} / agency {}",
        identity.mas_id, identity.instance_id, identity.agency_id
    );
    println!();

    tokio::spawn(print_events(agency.events().subscribe()));

    agency.start()?;
    let delay = agency.startup_delay();
    if !delay.is_zero() {
        info!(delay_ms = delay.as_millis() as u64, "waiting before serving the control API");
        tokio::time::sleep(delay).await;
    }

    let server = if no_server {
        None
    } else {
        let listen = agency.config().server.listen.clone();
        let agency = agency.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = cmap_server::start_server(&listen, agency.clone()).await {
                error!(error = %e, "control API failed");
                agency.shutdown();
            }
        }))
    };

    let cancel = agency.cancel_token();
    tokio::select! {
        _ = shutdown_signal() => info!("shutdown signal received"),
        _ = cancel.cancelled() => {}
    }
    agency.shutdown_and_wait(SHUTDOWN_GRACE).await;

    if let Some(server) = server {
        let _ = server.await;
    }
    println!("agency stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to set up SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Console progress for lifecycle events.
async fn print_events(mut rx: tokio::sync::broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(Event::AgentStarted { agent_id }) => println!("   + agent {agent_id} started"),
            Ok(Event::AgentTerminated { agent_id }) => println!("   - agent {agent_id} terminated"),
            Ok(Event::AgentCrashed { agent_id, reason }) => {
                println!("   ! agent {agent_id} crashed: {reason}")
            }
            Ok(Event::RemoteAgencyDiscovered { address }) => {
                println!("   ~ discovered agency {address}")
            }
            Ok(Event::Shutdown) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "event printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
