use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use grader::config::{CliArgs, Config};
use grader::database as db;
use grader::sandbox::create_sandbox_runner;
use grader::web_server::build_server;
use grader::worker::dispatcher;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();

    let Config {
        server: server_config,
        database: database_config,
        language: language_config,
        dispatcher: dispatcher_config,
    } = cli.to_config().context("Failed to load configuration")?;

    let db_path = match database_config.path {
        Some(path) => path,
        None => db::get_db_path()?,
    };

    if cli.flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = db::init_db(&db_path)
        .await
        .context("Failed to initialize database")?;

    if cli.requeue_running {
        let requeued = db::requeue_running(&db_pool).await?;
        log::info!("Requeued {requeued} submissions left running");
    }

    let runner = create_sandbox_runner(&language_config, &dispatcher_config)?;
    let poll_interval = Duration::from_millis(dispatcher_config.poll_interval_ms);
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut dispatchers = JoinSet::new();
    for i in 1..=cli.dispatchers {
        dispatchers.spawn(dispatcher(
            i,
            runner.clone(),
            db_pool.clone(),
            poll_interval,
            shutdown_token.clone(),
        ));
    }

    let server = if cli.dispatch_only {
        None
    } else {
        Some(build_server(server_config, language_config, db_pool.clone())?)
    };
    let server_handle = server.as_ref().map(|s| s.handle());
    let server_task = async move {
        match server {
            Some(server) => actix_web::rt::spawn(server).await,
            None => std::future::pending().await,
        }
    };

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    let mut fault = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
        Some(res_dispatcher) = dispatchers.join_next() => {
            log::error!("A dispatcher terminated unexpectedly: {:?}", res_dispatcher);
            fault = Some(res_dispatcher);
        }
    }

    // 1. Shutdown actix-web server gracefully
    if let Some(handle) = server_handle {
        handle.stop(true).await;
    }

    // 2. Broadcast shutdown signal to dispatchers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to dispatchers, waiting for them to finish...");

    // 3. Wait until every dispatcher terminates
    while let Some(res) = dispatchers.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("Dispatcher finished with error: {e:#}"),
            Err(e) if e.is_panic() => log::error!("Dispatcher handle panicked: {:?}", e),
            Err(e) => log::error!("Dispatcher handle finished with error: {:?}", e),
        }
    }

    db_pool.close().await;

    match fault {
        Some(Ok(Err(e))) => Err(e.context("Dispatcher failed, restart required")),
        Some(Err(e)) => Err(anyhow::Error::new(e).context("Dispatcher task failed")),
        _ => {
            log::info!("Shutdown complete");
            Ok(())
        }
    }
}
