//! Wires the orchestration components together and serves the API until a
//! shutdown signal arrives.

use crate::api::{self, AppState};
use crate::manager::JobManager;
use crate::notify::{NotificationBus, Observers};
use crate::queue::DispatchWorker;
use crate::scheduler::Scheduler;
use crate::service::Services;
use crate::shutdown::{Shutdown, GRACE_PERIOD};
use crate::signal_handler::SignalHandler;
use dorsal_core::config::Config;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

pub async fn run(config: Config, services: Services) -> eyre::Result<()> {
    let shutdown = Shutdown::new();

    let (dispatch, dispatch_queue) = mpsc::channel(config.dispatch_queue_size);
    let observers = Observers::default();
    let (notifier, bus) = NotificationBus::new(
        config.notify_queue_size,
        observers.clone(),
        shutdown.subscribe(),
    );
    let manager = Arc::new(JobManager::new(services.clone(), dispatch, notifier)?);
    let worker = DispatchWorker::new(dispatch_queue, manager.clone(), shutdown.subscribe());
    let scheduler = Arc::new(Scheduler::new(
        services.clone(),
        manager.clone(),
        shutdown.clone(),
    ));
    scheduler.start_all().await?;

    let app = api::router(AppState {
        services,
        manager,
        scheduler: scheduler.clone(),
        observers,
    });
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!(listen = %config.listen, "serving API");

    let mut tasks = JoinSet::new();
    tasks.spawn(bus.run());
    tasks.spawn(worker.run());
    tasks.spawn(SignalHandler::new(shutdown.clone()).run());

    let mut serve_signal = shutdown.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_signal.recv().await })
        .await?;

    tracing::info!("shutting down");
    scheduler.stop_all();
    shutdown.request();

    let drain = async {
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(error = %err, "background task failed"),
                Err(err) => tracing::error!(error = %err, "background task panicked"),
            }
        }
    };
    if tokio::time::timeout(GRACE_PERIOD, drain).await.is_err() {
        tracing::warn!("background tasks did not stop in time, aborting them");
        tasks.abort_all();
    }
    Ok(())
}
