use anyhow::Result;
use replyflow::{
    config::{Config, CooldownStoreKind},
    executor::{ActionExecutor, HttpPlatformClient},
    gate::{CooldownStore, ExecutionGate, MemoryCooldownStore, RedisCooldownStore},
    http::{context::WebContext, server::build_router},
    pipeline::EventPipeline,
    queue_adapter::MpscQueueAdapter,
    storage::log::PostgresExecutionLogStorage,
    storage::rule::PostgresRuleStorage,
    tasks::{DeliveryTask, DeliveryWork, spawn_cancellable_task, spawn_managed_task},
};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

#[tokio::main]
async fn main() -> Result<()> {
    let version = replyflow::config::version();

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{version}");
            std::process::exit(0);
        }
    });

    let config = Config::new()?;

    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "replyflow=info,tower_http=info,sqlx=warn".into()),
    );

    let fmt_layer = if std::env::var("JSON_LOGS").is_ok() {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!(version = %version, "Starting replyflow application");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let http_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(config.user_agent.clone())
        .timeout(*config.http_client_timeout.as_ref())
        .build()?;

    let rule_storage = Arc::new(PostgresRuleStorage::new(pool.clone()));
    let log_storage = Arc::new(PostgresExecutionLogStorage::new(pool.clone()));

    let cooldown_store: Arc<dyn CooldownStore> = match config.cooldown_store {
        CooldownStoreKind::Redis => {
            // Config::new already guaranteed REDIS_URL is present.
            let redis_url = config
                .redis_url
                .as_ref()
                .expect("redis cooldown store requires REDIS_URL");
            let redis_pool = deadpool_redis::Config::from_url(redis_url)
                .create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
            tracing::info!("Using Redis cooldown store");
            Arc::new(RedisCooldownStore::new(redis_pool))
        }
        CooldownStoreKind::Memory => {
            tracing::info!("Using in-memory cooldown store");
            Arc::new(MemoryCooldownStore::default())
        }
    };

    let platform_client = Arc::new(HttpPlatformClient::new(
        Arc::new(http_client),
        config.platform_api_base.clone(),
        config.platform_access_token.clone(),
    ));

    let gate = ExecutionGate::new(cooldown_store, log_storage.clone());
    let executor = ActionExecutor::new(platform_client, log_storage.clone(), rule_storage.clone());
    let pipeline = Arc::new(EventPipeline::new(
        rule_storage,
        gate,
        executor,
        *config.condition_timezone.as_ref(),
    ));

    let delivery_queue = Arc::new(MpscQueueAdapter::<DeliveryWork>::new(
        *config.delivery_queue_size.as_ref(),
    ));

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    // Delivery consumer. The task watches the cancellation token itself and
    // drains in-flight work before returning.
    {
        let delivery_task = DeliveryTask::new(delivery_queue.clone(), pipeline, token.clone());
        spawn_managed_task(&tracker, token.clone(), "delivery", async move {
            delivery_task.run().await.map_err(|e| anyhow::anyhow!(e))
        });
    }

    let web_context = WebContext::new(config.clone(), delivery_queue);
    let router = build_router(web_context);
    let port = *config.http_port.as_ref();

    // Signal handler.
    {
        let signal_tracker = tracker.clone();
        let signal_token = token.clone();

        tracing::info!("Starting signal handler task");
        tokio::spawn(async move {
            let ctrl_c = async {
                signal::ctrl_c()
                    .await
                    .expect("failed to install Ctrl+C handler");
            };

            #[cfg(unix)]
            let terminate = async {
                signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install signal handler")
                    .recv()
                    .await;
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                () = signal_token.cancelled() => {
                    tracing::info!("Signal handler task shutting down gracefully");
                },
                _ = terminate => {
                    tracing::info!("Received SIGTERM signal, initiating shutdown");
                },
                _ = ctrl_c => {
                    tracing::info!("Received Ctrl+C signal, initiating shutdown");
                },
            }

            signal_tracker.close();
            signal_token.cancel();
            tracing::info!("Signal handler task completed");
        });
    }

    // HTTP server.
    spawn_cancellable_task(&tracker, token.clone(), "http", move |cancel_token| {
        let version = version.clone();

        async move {
            let listener = TcpListener::bind(format!("0.0.0.0:{}", port))
                .await
                .map_err(|e| anyhow::anyhow!("Failed to bind to port {}: {}", port, e))?;

            tracing::info!(port = port, version = %version, "HTTP server listening");

            let shutdown_token = cancel_token.clone();
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                })
                .await
                .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

            Ok(())
        }
    });

    tracing::info!("Waiting for all tasks to complete...");
    tracker.wait().await;

    tracing::info!("All tasks completed, application shutting down");

    Ok(())
}
