//! Entry point: wires configuration, the database, the worker pools,
//! the three orchestrator loops, and the liveness/readiness HTTP
//! surface together.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fwforge_core::{
    api,
    config::{FactoryConfig, ServiceConfig},
    db::{BuildJob, Database, DbConfig, OutdatedSubtarget, RequestTier},
    orchestrator::{Collector, CollectorConfig, Dispatcher, Updater},
    state::AppState,
    worker::{BuildWorker, UpdateWorker, VersionOverlay, WorkerPaths},
};

#[tokio::main]
async fn main() -> Result<()> {
    let service_config = ServiceConfig::from_env().context("failed to load service config")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| service_config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting fwforge-core");

    let factory_config = Arc::new(
        FactoryConfig::load(&service_config.factory_config_path)
            .await
            .context("failed to load factory config")?,
    );
    info!(
        distros = factory_config.distros.len(),
        workers = factory_config.workers.len(),
        "factory config loaded"
    );

    let db_config = DbConfig::from_env();
    let db = Database::connect(&db_config)
        .await
        .context("failed to connect to database")?;

    if service_config.run_migrations {
        db.run_migrations().await.context("failed to run migrations")?;
    }

    let request_tier: Arc<dyn RequestTier> = Arc::new(db.request_tier());

    match request_tier.sweep_stuck_building().await {
        Ok(count) if count > 0 => warn!(count, "recovered jobs stuck in building at startup"),
        Ok(_) => {}
        Err(e) => error!(error = %e, "failed to sweep stuck building jobs"),
    }

    let store = fwforge_store::ArtifactStore::new(factory_config.download_folder.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker_handles = Vec::new();

    // Build worker pool: one BuildWorker per configured worker location,
    // all fed from the dispatcher's capacity-1 channel.
    let (build_tx, build_rx) = mpsc::channel::<(BuildJob, VersionOverlay)>(1);
    let build_rx = Arc::new(Mutex::new(build_rx));
    for location in &factory_config.workers {
        let paths = WorkerPaths {
            location: location.clone(),
            download_folder: factory_config.download_folder.clone(),
            tempdir: factory_config.tempdir.clone(),
        };
        let build_worker = BuildWorker::new(store.clone(), request_tier.clone(), paths);
        let build_rx = build_rx.clone();
        worker_handles.push(tokio::spawn(async move {
            if let Err(e) = build_worker.ensure_setup().await {
                error!(error = %e, "build worker setup failed, worker will not run");
                return;
            }
            loop {
                let job = { build_rx.lock().await.recv().await };
                match job {
                    Some((job, overlay)) => build_worker.build(job, overlay).await,
                    None => break,
                }
            }
        }));
    }

    // Update worker pool: all update workers share one toolchain
    // checkout location, matching the reference updater.
    let (update_tx, update_rx) = mpsc::channel::<(OutdatedSubtarget, VersionOverlay)>(1);
    let update_rx = Arc::new(Mutex::new(update_rx));
    for _ in 0..factory_config.updater_threads {
        let paths = WorkerPaths {
            location: factory_config.updater_dir.clone(),
            download_folder: factory_config.download_folder.clone(),
            tempdir: factory_config.tempdir.clone(),
        };
        let update_worker = UpdateWorker::new(request_tier.clone(), paths);
        let update_rx = update_rx.clone();
        worker_handles.push(tokio::spawn(async move {
            if let Err(e) = update_worker.ensure_setup().await {
                error!(error = %e, "update worker setup failed, worker will not run");
                return;
            }
            loop {
                let job = { update_rx.lock().await.recv().await };
                match job {
                    Some((job, overlay)) => update_worker.update(job, overlay).await,
                    None => break,
                }
            }
        }));
    }

    let dispatcher = Dispatcher::new(
        request_tier.clone(),
        factory_config.clone(),
        build_tx,
        service_config.dispatcher_idle_interval,
    );
    let dispatcher_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            dispatcher.run(shutdown_rx).await;
        }
    });

    let updater = Updater::new(
        request_tier.clone(),
        factory_config.clone(),
        update_tx,
        service_config.updater_idle_interval,
    );
    let updater_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            updater.run(shutdown_rx).await;
        }
    });

    let collector = Collector::new(
        request_tier.clone(),
        store.clone(),
        CollectorConfig {
            interval: service_config.collector_interval,
            snapshot_ttl_hours: factory_config.snapshot_ttl_hours,
            custom_image_ttl_days: factory_config.custom_image_ttl_days,
            stale_request_ttl_days: factory_config.stale_request_ttl_days,
        },
    );
    let collector_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            collector.run(shutdown_rx).await;
        }
    });

    let state = AppState::new(db);
    let app = api::create_router(state);
    let listener = tokio::net::TcpListener::bind(&service_config.listen_addr).await?;
    info!(addr = %service_config.listen_addr, "listening for health checks");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("health server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("health server exited normally"),
                Ok(Err(e)) => error!(error = %e, "health server error"),
                Err(e) => error!(error = %e, "health server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("waiting for workers to shut down");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, dispatcher_handle).await {
        warn!(error = %e, "dispatcher did not shut down in time");
    }
    if let Err(e) = tokio::time::timeout(shutdown_timeout, updater_handle).await {
        warn!(error = %e, "updater did not shut down in time");
    }
    if let Err(e) = tokio::time::timeout(shutdown_timeout, collector_handle).await {
        warn!(error = %e, "collector did not shut down in time");
    }

    for handle in worker_handles {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, handle).await {
            warn!(error = %e, "worker did not shut down in time");
        }
    }

    info!("fwforge-core shutdown complete");
    Ok(())
}
