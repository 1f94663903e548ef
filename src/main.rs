use std::sync::Arc;
use axum::http::{HeaderValue, Method};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing::{info, warn, error};
use tokio_util::sync::CancellationToken;

mod routes;
mod models;
mod services;
mod config;
mod error;
mod utils;
mod state;

use crate::{
    config::Config,
    state::AppState,
    services::{Database, Scheduler},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置
    dotenv::dotenv().ok();

    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("LOG_LEVEL").unwrap_or_else(|_| "atletas_notify=debug,tower_http=debug".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Atletas notification service...");

    let config = Config::from_env()?;

    // 初始化数据库连接
    let db = match Database::new(&config).await {
        Ok(db) => {
            db.verify_connection().await?;
            info!("Database connection established successfully");
            Arc::new(db)
        }
        Err(e) => {
            error!("Failed to create database connection: {}", e);
            return Err(anyhow::anyhow!("Database initialization failed"));
        }
    };

    let cancel = CancellationToken::new();

    // 初始化所有服务
    let app_state = Arc::new(AppState::new(config.clone(), db, cancel.clone()).await?);
    if let Err(e) = app_state.dispatch_service.channels().check_ready() {
        warn!("Notification channels are not fully configured: {}", e);
    }

    // 启动后台任务
    let scheduler_handle = if config.scheduler_enabled {
        let scheduler = Scheduler::new(
            app_state.schedule_service.clone(),
            app_state.runner.clone(),
            config.scheduler_poll_interval,
        )?;
        Some(scheduler.start(cancel.clone()))
    } else {
        info!("Scheduler disabled");
        None
    };

    // 配置 CORS
    let origins = config
        .cors_allowed_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(origins);

    let runner = app_state.runner.clone();
    let app = routes::app(app_state)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    // 启动主服务器
    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on http://{}", addr);

    let shutdown = cancel.clone();
    axum::Server::bind(&addr.parse()?)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            error!("Scheduler terminated abnormally: {}", e);
        }
    }
    runner.shutdown().await;

    info!("Atletas notification service stopped");
    Ok(())
}
