mod settings;

use std::sync::Arc;
use trace_err::*;
use tracing::{error, info, warn};

const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

fn listen_for_cancel(
    handle: dtnd::daemon::DaemonHandle,
    task_set: &mut tokio::task::JoinSet<()>,
    cancel_token: dtnd_async::CancellationToken,
) {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            let mut term_handler =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .trace_expect("Failed to register signal handlers");
        } else {
            let mut term_handler = std::future::pending();
        }
    }
    task_set.spawn(async move {
        tokio::select! {
            _ = term_handler.recv() => {
                info!("Received terminate signal, stopping...");
                cancel_token.cancel();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received CTRL+C, stopping...");
                cancel_token.cancel();
            }
            _ = cancel_token.cancelled() => {}
        }

        if !handle.shutdown(SHUTDOWN_TIMEOUT).await {
            warn!("Daemon did not acknowledge shutdown");
        }
    });
}

#[tokio::main]
async fn main() {
    let Some(config) = settings::init() else {
        return;
    };

    let daemon = dtnd::daemon::Daemon::new(
        settings::load_daemon_config(&config),
        settings::init_storage(&config),
        Box::new(dtnd::router::NullRouter::new()),
    );

    let cancel_token = dtnd_async::CancellationToken::new();
    let mut task_set = tokio::task::JoinSet::new();

    let (handle, daemon_task) = daemon.spawn();

    // The daemon stopping on its own takes the server down too
    {
        let cancel_token = cancel_token.clone();
        task_set.spawn(async move {
            if let Err(e) = daemon_task.await {
                error!("Daemon task failed: {e}");
            }
            cancel_token.cancel();
        });
    }

    listen_for_cancel(handle, &mut task_set, cancel_token);

    info!("Started successfully");

    while let Some(r) = task_set.join_next().await {
        r.trace_expect("Task terminated unexpectedly")
    }

    info!("Stopped");
}
